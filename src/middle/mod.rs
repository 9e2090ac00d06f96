//! Types and symbols shared by every later stage, the three-address IR the
//! typed AST is lowered into, and the analyses and optimizations run over
//! that IR before it is handed to the backend.

pub mod dataflow;
pub mod ir;
pub mod optimization;
pub mod primitive;
pub mod symbol;
pub mod ty;
