//! Symbolic expression engine for range inference.
//!
//! Semantic analysis collects, per statement, a set of solved iterator
//! ranges and residual constraints over a small integer expression
//! language. The IR generator consumes the solved ranges to derive loop
//! bounds and to prove that iterator domains match tensor extents.

pub mod analysis;
pub mod expr;
pub mod parser;
pub mod ranges;
pub mod transform;

pub use expr::{Expr, ExprRef, OpKind};
pub use ranges::{CmpOp, Constraint, InferenceProblem, Range};
