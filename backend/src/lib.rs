// smc — Stream Mesh Compiler backend
//
// Library root. Resource-mapping passes and their models live here.

pub mod diag;
pub mod dot;
pub mod flat;
pub mod grid;
pub mod layout;
pub mod partition;
pub mod pass;
pub mod pipeline;
pub mod rewrite;
pub mod stream;
