//! The tensor IR and the generator lowering checked kernels into it.

pub mod affine;
pub mod builder;
pub mod lower;
pub mod pattern;
pub mod print;
pub mod types;

pub use builder::{FuncBuilder, Function, IterKind, Module, Op, OpKind, Value};
pub use lower::{lower_def, lower_defs};
pub use types::{FloatKind, IrType, ScalarType};

/// How comprehension bodies are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOp {
    /// Prefer a single structured reduction operator where the
    /// preconditions hold.
    Structured,
    /// Always generate plain loop nests.
    LoopNest,
}

/// Options steering IR generation.
#[derive(Debug, Clone)]
pub struct LowerOptions {
    pub body_op: BodyOp,
    /// Replace recognized patterns with named specialized operators.
    pub specialize: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self {
            body_op: BodyOp::Structured,
            specialize: false,
        }
    }
}
