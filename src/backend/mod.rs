//! The backend turns optimized IR into x86-64 assembly. Every variable is
//! first given a home (a register or a frame slot) by the register
//! allocator, then each IR instruction of the linearized function is
//! selected into one or more machine instructions according to its types.

pub mod assemblers;
pub mod register_allocation;
pub mod targets;

#[derive(Debug, Clone, Copy, Default)]
pub struct CodegenOptions {
    /// Annotate every function with the location chosen for each variable
    pub emit_debug_info: bool,
}
