//! # tcfront - a Tensor Comprehensions front-end
//!
//! Translates TC kernels, a small index-based tensor DSL, into a tensor IR
//! of loop nests, affine memory accesses and structured reductions:
//!
//! ```text
//! source -> tokens -> AST -> checked AST (types, iterator classes,
//!           range problem) -> tensor IR function
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tcfront::{compile, CompileOptions};
//!
//! let source = r#"
//!     def mm(float(N,K) A, float(K,M) B) -> (float(N,M) C) {
//!         C(i,j) +=! A(i,k) * B(k,j)
//!     }
//! "#;
//!
//! let module = compile(source, "mm.tc", &CompileOptions::default()).unwrap();
//! assert_eq!(module.functions.len(), 1);
//! ```

#![warn(clippy::all)]

pub mod frontend;
pub mod inference;
pub mod ir;
pub mod utils;

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::frontend::{parse, Def, Lexer, Parser, Sema, SemaOptions};
    pub use crate::inference::{Constraint, Expr as SymExpr, InferenceProblem, Range};
    pub use crate::ir::{lower_def, lower_defs, BodyOp, LowerOptions, Module};
    pub use crate::utils::errors::*;
}

use crate::frontend::{Def, Sema, SemaOptions};
use crate::ir::{BodyOp, LowerOptions, Module};
use crate::utils::errors::CompileResult;

/// Options for a whole compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Emit warnings through the `log` facade.
    pub emit_warnings: bool,
    /// Print the per-statement range problems.
    pub print_ranges: bool,
    /// Body generation strategy.
    pub body_op: BodyOp,
    /// Replace recognized patterns with named specialized operators.
    pub specialize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            emit_warnings: true,
            print_ranges: false,
            body_op: BodyOp::Structured,
            specialize: false,
        }
    }
}

impl CompileOptions {
    fn sema_options(&self) -> SemaOptions {
        SemaOptions {
            emit_warnings: self.emit_warnings,
        }
    }

    fn lower_options(&self) -> LowerOptions {
        LowerOptions {
            body_op: self.body_op,
            specialize: self.specialize,
        }
    }
}

/// Parse source code into kernel definitions.
pub fn parse(source: &str, filename: &str) -> CompileResult<Vec<Def>> {
    frontend::parse(source, filename)
}

/// Parse and type-check all kernels in a source buffer.
pub fn check(source: &str, filename: &str, opts: &CompileOptions) -> CompileResult<Vec<Def>> {
    let defs = parse(source, filename)?;
    let mut sema = Sema::new(opts.sema_options());
    defs.iter().map(|d| sema.check_def(d)).collect()
}

/// Full pipeline: parse, check and lower every kernel, then verify the
/// module.
pub fn compile(source: &str, filename: &str, opts: &CompileOptions) -> CompileResult<Module> {
    let checked = check(source, filename, opts)?;
    let module = ir::lower_defs(&checked, &opts.lower_options())?;
    module.verify()?;
    Ok(module)
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_compile_smoke() {
        let module = compile(
            "def axpy(float a, float(N) x, float(N) y) -> (float(N) z) { z(i) = a * x(i) + y(i) }",
            "axpy.tc",
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].name, "axpy");
    }
}
