//! Affine expressions and maps for structured operators.

use crate::frontend::ast::{self, BinaryOp, ConstValue, ExprKind};
use crate::utils::errors::{IrError, IrErrorKind};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// An affine expression over iteration dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffineExpr {
    /// The i-th iteration dimension.
    Dim(usize),
    Const(i64),
    Add(Box<AffineExpr>, Box<AffineExpr>),
    Mul(Box<AffineExpr>, Box<AffineExpr>),
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffineExpr::Dim(i) => write!(f, "d{}", i),
            AffineExpr::Const(c) => write!(f, "{}", c),
            AffineExpr::Add(l, r) => write!(f, "({} + {})", l, r),
            AffineExpr::Mul(l, r) => write!(f, "({} * {})", l, r),
        }
    }
}

/// One affine map: `(d0, ..., dn) -> (results...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffineMap {
    pub num_dims: usize,
    pub results: Vec<AffineExpr>,
}

impl AffineMap {
    pub fn new(num_dims: usize, results: Vec<AffineExpr>) -> Self {
        Self { num_dims, results }
    }

    /// The identity map over `n` dimensions.
    pub fn identity(n: usize) -> Self {
        Self::new(n, (0..n).map(AffineExpr::Dim).collect())
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for i in 0..self.num_dims {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "d{}", i)?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", r)?;
        }
        write!(f, ")")
    }
}

/// Translate a tensor index expression to an affine expression over the
/// given iterator dimensions. The caller must ensure the expression is
/// affine; unsupported shapes are an error.
pub fn affine_from_index_expr(
    e: &ast::Expr,
    dims: &HashMap<String, usize>,
) -> Result<AffineExpr, IrError> {
    match &e.kind {
        ExprKind::Ident(name) => match dims.get(name) {
            Some(i) => Ok(AffineExpr::Dim(*i)),
            None => Err(IrError::at(
                IrErrorKind::UnsupportedConstruct,
                format!("'{}' is not an iterator of this comprehension", name),
                e.range.clone(),
            )),
        },
        ExprKind::Const { value, .. } => match value {
            ConstValue::Int(i) => Ok(AffineExpr::Const(*i)),
            ConstValue::Float(_) => Err(IrError::at(
                IrErrorKind::UnsupportedConstruct,
                "constant index is not an integer",
                e.range.clone(),
            )),
        },
        ExprKind::Binary { op, left, right } => {
            let l = affine_from_index_expr(left, dims)?;
            let r = affine_from_index_expr(right, dims)?;
            match op {
                BinaryOp::Add => Ok(AffineExpr::Add(Box::new(l), Box::new(r))),
                // There is no affine subtraction; emulate with a -1 factor.
                BinaryOp::Sub => Ok(AffineExpr::Add(
                    Box::new(l),
                    Box::new(AffineExpr::Mul(
                        Box::new(AffineExpr::Const(-1)),
                        Box::new(r),
                    )),
                )),
                BinaryOp::Mul => Ok(AffineExpr::Mul(Box::new(l), Box::new(r))),
                other => Err(IrError::at(
                    IrErrorKind::UnsupportedConstruct,
                    format!("unsupported operator '{}' in affine expression", other),
                    e.range.clone(),
                )),
            }
        }
        ExprKind::Unary {
            op: ast::UnaryOp::Neg,
            operand,
        } => {
            let inner = affine_from_index_expr(operand, dims)?;
            Ok(AffineExpr::Mul(
                Box::new(AffineExpr::Const(-1)),
                Box::new(inner),
            ))
        }
        _ => Err(IrError::at(
            IrErrorKind::UnsupportedConstruct,
            "unsupported expression in affine context",
            e.range.clone(),
        )),
    }
}

/// Check whether `e` contains no iterator references (it may still mention
/// size symbols or constants).
fn is_const_wrt(e: &ast::Expr, iterators: &HashSet<String>) -> bool {
    match &e.kind {
        ExprKind::Ident(name) => !iterators.contains(name),
        ExprKind::Const { .. } => true,
        ExprKind::Binary { left, right, .. } => {
            is_const_wrt(left, iterators) && is_const_wrt(right, iterators)
        }
        ExprKind::Unary { operand, .. } => is_const_wrt(operand, iterators),
        _ => false,
    }
}

/// Check whether an index expression is affine with respect to the
/// iterator set: sums of affine terms, products with at most one
/// iterator-dependent factor. Division has no [`AffineExpr`] form and is
/// never affine here; such accesses lower through the loop-nest path.
pub fn is_affine_index_expr(e: &ast::Expr, iterators: &HashSet<String>) -> bool {
    match &e.kind {
        ExprKind::Ident(_) | ExprKind::Const { .. } => true,
        ExprKind::Binary { op, left, right } => match op {
            BinaryOp::Add | BinaryOp::Sub => {
                is_affine_index_expr(left, iterators) && is_affine_index_expr(right, iterators)
            }
            BinaryOp::Mul => {
                (is_const_wrt(left, iterators) && is_affine_index_expr(right, iterators))
                    || (is_const_wrt(right, iterators) && is_affine_index_expr(left, iterators))
            }
            _ => false,
        },
        ExprKind::Unary {
            op: ast::UnaryOp::Neg,
            operand,
        } => is_affine_index_expr(operand, iterators),
        _ => false,
    }
}
