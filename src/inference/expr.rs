//! Symbolic expressions for range inference.
//!
//! These trees are independent of the AST: iterators become [`Expr::Variable`],
//! size symbols become [`Expr::Parameter`] and everything is integer-valued.
//! The derived ordering is total, which the range problem relies on for
//! de-duplication.

use crate::frontend::ast::{self, ExprKind as AstKind};
use crate::utils::errors::{SemaError, SemaErrorKind};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Shared handle to a symbolic expression.
pub type ExprRef = Rc<Expr>;

/// Binary operators of the symbolic language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum OpKind {
    Plus,
    Minus,
    Times,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Plus => write!(f, "+"),
            OpKind::Minus => write!(f, "-"),
            OpKind::Times => write!(f, "*"),
        }
    }
}

/// A symbolic integer expression.
///
/// Variant order defines the total order used by the constraint sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Expr {
    BinOp {
        op: OpKind,
        l: ExprRef,
        r: ExprRef,
    },
    Neg(ExprRef),
    Variable(String),
    Parameter(String),
    Constant(u64),
}

impl Expr {
    /// Build a binary operation.
    pub fn bin(op: OpKind, l: ExprRef, r: ExprRef) -> ExprRef {
        Rc::new(Expr::BinOp { op, l, r })
    }

    /// Build a negation.
    pub fn neg(e: ExprRef) -> ExprRef {
        Rc::new(Expr::Neg(e))
    }

    /// Build an iterator reference.
    pub fn var(name: impl Into<String>) -> ExprRef {
        Rc::new(Expr::Variable(name.into()))
    }

    /// Build a size-symbol reference.
    pub fn param(name: impl Into<String>) -> ExprRef {
        Rc::new(Expr::Parameter(name.into()))
    }

    /// Build a constant.
    pub fn constant(value: u64) -> ExprRef {
        Rc::new(Expr::Constant(value))
    }

    /// An expression is constant if it contains no variables.
    pub fn is_const_expr(&self) -> bool {
        match self {
            Expr::BinOp { l, r, .. } => l.is_const_expr() && r.is_const_expr(),
            Expr::Neg(e) => e.is_const_expr(),
            Expr::Variable(_) => false,
            Expr::Parameter(_) | Expr::Constant(_) => true,
        }
    }

    /// An expression is affine if products have at least one constant factor.
    pub fn is_affine_expr(&self) -> bool {
        match self {
            Expr::BinOp { op, l, r } => match op {
                OpKind::Plus | OpKind::Minus => l.is_affine_expr() && r.is_affine_expr(),
                OpKind::Times => {
                    (l.is_affine_expr() && r.is_const_expr())
                        || (r.is_affine_expr() && l.is_const_expr())
                }
            },
            Expr::Neg(e) => e.is_affine_expr(),
            Expr::Variable(_) | Expr::Parameter(_) | Expr::Constant(_) => true,
        }
    }

    /// A sum expression is a top-level `+` or `-`.
    pub fn is_sum_expr(&self) -> bool {
        matches!(
            self,
            Expr::BinOp {
                op: OpKind::Plus | OpKind::Minus,
                ..
            }
        )
    }

    /// A monomial is a product of atoms, possibly negated.
    pub fn is_monomial_expr(&self) -> bool {
        match self {
            Expr::BinOp { op, l, r } => {
                *op == OpKind::Times && l.is_monomial_expr() && r.is_monomial_expr()
            }
            Expr::Neg(e) => e.is_monomial_expr(),
            Expr::Variable(_) | Expr::Parameter(_) | Expr::Constant(_) => true,
        }
    }

    /// Check for a variable leaf.
    pub fn is_variable(&self) -> bool {
        matches!(self, Expr::Variable(_))
    }

    /// The variable name, if this is a variable leaf.
    pub fn variable_name(&self) -> Option<&str> {
        match self {
            Expr::Variable(n) => Some(n),
            _ => None,
        }
    }

    /// Build a symbolic expression from an AST expression.
    ///
    /// Identifiers listed in `range_params` become parameters (symbolic
    /// constants); all other identifiers become variables. Only `+`, `-`,
    /// `*`, unary negation, identifiers and constants are representable.
    pub fn from_tree(
        e: &ast::Expr,
        range_params: &HashSet<String>,
    ) -> Result<ExprRef, SemaError> {
        match &e.kind {
            AstKind::Binary { op, left, right } => {
                let op = match op {
                    ast::BinaryOp::Add => OpKind::Plus,
                    ast::BinaryOp::Sub => OpKind::Minus,
                    ast::BinaryOp::Mul => OpKind::Times,
                    other => {
                        return Err(SemaError::new(
                            SemaErrorKind::TypeMismatch,
                            format!("operator '{}' is not allowed in a range expression", other),
                            e.range.clone(),
                        ))
                    }
                };
                Ok(Expr::bin(
                    op,
                    Self::from_tree(left, range_params)?,
                    Self::from_tree(right, range_params)?,
                ))
            }
            AstKind::Unary {
                op: ast::UnaryOp::Neg,
                operand,
            } => Ok(Expr::neg(Self::from_tree(operand, range_params)?)),
            AstKind::Ident(name) => {
                if range_params.contains(name) {
                    Ok(Expr::param(name.clone()))
                } else {
                    Ok(Expr::var(name.clone()))
                }
            }
            AstKind::Const { value, .. } => Ok(Expr::constant(value.as_u64())),
            _ => Err(SemaError::new(
                SemaErrorKind::TypeMismatch,
                "expression is not allowed in a range expression",
                e.range.clone(),
            )),
        }
    }

    /// Build a symbolic expression from a tensor dimension.
    pub fn from_dim(dim: &ast::DimExpr, range_params: &HashSet<String>) -> ExprRef {
        match dim {
            ast::DimExpr::Ident(ident) => {
                if range_params.contains(&ident.name) {
                    Expr::param(ident.name.clone())
                } else {
                    Expr::var(ident.name.clone())
                }
            }
            ast::DimExpr::Const { value, .. } => Expr::constant(*value as u64),
        }
    }

    /// Evaluate under the given variable and parameter assignments.
    ///
    /// Used to check that transformations preserve the semantic value.
    pub fn evaluate(
        &self,
        vars: &HashMap<String, i64>,
        params: &HashMap<String, i64>,
    ) -> Option<i64> {
        match self {
            Expr::BinOp { op, l, r } => {
                let l = l.evaluate(vars, params)?;
                let r = r.evaluate(vars, params)?;
                Some(match op {
                    OpKind::Plus => l.wrapping_add(r),
                    OpKind::Minus => l.wrapping_sub(r),
                    OpKind::Times => l.wrapping_mul(r),
                })
            }
            Expr::Neg(e) => Some(e.evaluate(vars, params)?.wrapping_neg()),
            Expr::Variable(n) => vars.get(n).copied(),
            Expr::Parameter(n) => params.get(n).copied(),
            Expr::Constant(c) => Some(*c as i64),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::BinOp { op, l, r } => write!(f, "({}{}{})", l, op, r),
            Expr::Neg(e) => write!(f, "(-{})", e),
            Expr::Variable(n) => write!(f, "{}", n),
            Expr::Parameter(n) => write!(f, "${}", n),
            Expr::Constant(c) => write!(f, "{}", c),
        }
    }
}

impl crate::utils::pretty::PrettyPrint for Expr {
    fn to_doc<'a, D: pretty::DocAllocator<'a>>(
        &self,
        allocator: &'a D,
    ) -> pretty::DocBuilder<'a, D> {
        match self {
            Expr::BinOp { op, l, r } => allocator
                .text("(")
                .append(l.to_doc(allocator))
                .append(allocator.text(format!(" {} ", op)))
                .append(r.to_doc(allocator))
                .append(allocator.text(")"))
                .group(),
            Expr::Neg(e) => allocator
                .text("(-")
                .append(e.to_doc(allocator))
                .append(allocator.text(")"))
                .group(),
            Expr::Variable(n) => allocator.text(n.clone()),
            Expr::Parameter(n) => allocator.text(format!("${}", n)),
            Expr::Constant(c) => allocator.text(c.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n_times_i() -> ExprRef {
        Expr::bin(OpKind::Times, Expr::param("N"), Expr::var("i"))
    }

    #[test]
    fn test_queries() {
        let c = Expr::constant(4);
        let p = Expr::param("N");
        let v = Expr::var("i");

        assert!(c.is_const_expr() && p.is_const_expr());
        assert!(!v.is_const_expr());

        // N * i is affine (N is a symbolic constant).
        assert!(n_times_i().is_affine_expr());

        // i * j is not affine.
        let ij = Expr::bin(OpKind::Times, Expr::var("i"), Expr::var("j"));
        assert!(!ij.is_affine_expr());
        // But it is a monomial.
        assert!(ij.is_monomial_expr());

        let sum = Expr::bin(OpKind::Plus, Expr::var("i"), Expr::constant(1));
        assert!(sum.is_sum_expr());
        assert!(!sum.is_monomial_expr());
    }

    #[test]
    fn test_neg_monomial() {
        let m = Expr::neg(n_times_i());
        assert!(m.is_monomial_expr());
        assert!(!m.is_sum_expr());
    }

    #[test]
    fn test_total_order_and_equality() {
        let a = Expr::var("i");
        let b = Expr::var("i");
        let c = Expr::var("j");
        assert_eq!(a, b);
        assert!(a < c);

        // Kind order: BinOp < Neg < Variable < Parameter < Constant.
        let bin = n_times_i();
        let neg = Expr::neg(Expr::var("i"));
        let par = Expr::param("i");
        let cst = Expr::constant(0);
        assert!(*bin < *neg);
        assert!(*neg < *a);
        assert!(*a < *par);
        assert!(*par < *cst);
    }

    #[test]
    fn test_display() {
        let e = Expr::bin(
            OpKind::Minus,
            Expr::param("N"),
            Expr::bin(OpKind::Times, Expr::constant(2), Expr::var("i")),
        );
        assert_eq!(e.to_string(), "($N-(2*i))");
    }

    #[test]
    fn test_evaluate() {
        let mut vars = HashMap::new();
        vars.insert("i".to_string(), 3);
        let mut params = HashMap::new();
        params.insert("N".to_string(), 10);

        let e = Expr::bin(
            OpKind::Minus,
            Expr::param("N"),
            Expr::bin(OpKind::Times, Expr::constant(2), Expr::var("i")),
        );
        assert_eq!(e.evaluate(&vars, &params), Some(4));

        let unknown = Expr::var("k");
        assert_eq!(unknown.evaluate(&vars, &params), None);
    }
}
