// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used across both backend passes. The backend has
// no source text, so diagnostics carry an optional subject (the name or id
// of the graph entity involved) instead of a source span.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0500`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes, grouped by failure class.
pub mod codes {
    use super::DiagCode;

    /// Non-rectangular SplitJoin reached the partitioner.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Composite node with no children.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Splitter/joiner weight arity does not match the branch count.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Duplicate operator id in the stream tree.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Malformed flat graph (edge or weight index out of range).
    pub const E0104: DiagCode = DiagCode("E0104");
    /// Backend input is missing the section a pass requires.
    pub const E0105: DiagCode = DiagCode("E0105");

    /// Tile demand exceeds grid capacity.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// Reserved I/O column cannot hold all I/O nodes.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// Requested tile budget is zero.
    pub const E0202: DiagCode = DiagCode("E0202");

    /// Instruction-code-size search exhausted its tile-budget cap.
    pub const E0300: DiagCode = DiagCode("E0300");

    /// Route requested outside the mesh.
    pub const E0400: DiagCode = DiagCode("E0400");

    /// Partition postcondition verification failed.
    pub const E0500: DiagCode = DiagCode("E0500");
    /// Layout postcondition verification failed.
    pub const E0501: DiagCode = DiagCode("E0501");

    /// Traceback pruning collapsed extra partition records.
    pub const W0500: DiagCode = DiagCode("W0500");
    /// Tile usage reduced below the requested budget at equal bottleneck.
    pub const W0501: DiagCode = DiagCode("W0501");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A backend diagnostic emitted by either pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
    /// Name or id of the graph entity the diagnostic refers to.
    pub subject: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or subject.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            hint: None,
            subject: None,
        }
    }

    /// Shorthand for an error-level diagnostic with a code.
    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach the graph entity this diagnostic refers to.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(subject) = &self.subject {
            write!(f, " ({})", subject)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_subject() {
        let d = Diagnostic::error(codes::E0101, "splitjoin has no branches").with_subject("sj0");
        assert_eq!(
            format!("{d}"),
            "error[E0101]: splitjoin has no branches (sj0)"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::new(DiagLevel::Warning, "tile usage reduced")
            .with_code(codes::W0501)
            .with_hint("pass --tiles to pin the budget");
        assert_eq!(d.code, Some(codes::W0501));
        assert_eq!(d.hint.as_deref(), Some("pass --tiles to pin the budget"));
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let diags = vec![Diagnostic::new(DiagLevel::Warning, "w")];
        assert!(!has_errors(&diags));
        let diags = vec![
            Diagnostic::new(DiagLevel::Warning, "w"),
            Diagnostic::new(DiagLevel::Error, "e"),
        ];
        assert!(has_errors(&diags));
    }
}
