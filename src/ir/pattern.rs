//! Recognition of specializable comprehension shapes.
//!
//! The matchers are pure predicates over checked comprehensions. On a
//! match they return the positions of the two multiplication operands in
//! canonical order, so specialized operators always receive their inputs
//! in a fixed position.

use crate::frontend::ast::{AssignOp, BinaryOp, Comprehension, Expr, ExprKind, Ident};

/// The two RHS operands of a recognized product, in canonical order.
pub type CanonicalOrder = [usize; 2];

fn product_accesses(c: &Comprehension) -> Option<[(&Ident, &[Expr]); 2]> {
    // Only sums of products with default-initialized accumulation.
    if c.assignment != AssignOp::PlusEqB {
        return None;
    }
    let (left, right) = match &c.rhs.kind {
        ExprKind::Binary {
            op: BinaryOp::Mul,
            left,
            right,
        } => (left, right),
        _ => return None,
    };
    let a = match &left.kind {
        ExprKind::Access { name, args } => (name, args.as_slice()),
        _ => return None,
    };
    let b = match &right.kind {
        ExprKind::Access { name, args } => (name, args.as_slice()),
        _ => return None,
    };
    Some([a, b])
}

fn bare_idents<'a>(args: &'a [Expr]) -> Option<Vec<&'a str>> {
    args.iter()
        .map(|a| match &a.kind {
            ExprKind::Ident(name) => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

/// Match `C(i,j) +=! A(i,k) * B(k,j)` or `C(i,j) +=! B(k,j) * A(i,k)`.
///
/// Returns the operand positions in the canonical order `[A, B]`.
pub fn match_matmul(c: &Comprehension) -> Option<CanonicalOrder> {
    if c.indices.len() != 2 {
        return None;
    }
    let accesses = product_accesses(c)?;

    // The output must not be one of the inputs.
    if accesses[0].0.name == c.ident.name || accesses[1].0.name == c.ident.name {
        return None;
    }

    // Both operands must be matrices directly indexed by identifiers.
    let lhs0 = c.indices[0].name.as_str();
    let lhs1 = c.indices[1].name.as_str();
    let args0 = bare_idents(accesses[0].1)?;
    let args1 = bare_idents(accesses[1].1)?;
    if args0.len() != 2 || args1.len() != 2 {
        return None;
    }

    // C(i, j) +=! A(i, k) * B(k, j)
    if lhs0 == args0[0] && args0[1] == args1[0] && lhs1 == args1[1] {
        return Some([0, 1]);
    }
    // C(i, j) +=! B(k, j) * A(i, k)
    if lhs0 == args1[0] && args1[1] == args0[0] && lhs1 == args0[1] {
        return Some([1, 0]);
    }

    None
}

/// Match `y(i) +=! A(i,k) * x(k)` or `y(i) +=! x(k) * A(i,k)`.
///
/// Returns the operand positions in the canonical order `[A, x]`.
pub fn match_matvec(c: &Comprehension) -> Option<CanonicalOrder> {
    if c.indices.len() != 1 {
        return None;
    }
    let accesses = product_accesses(c)?;

    if accesses[0].0.name == c.ident.name || accesses[1].0.name == c.ident.name {
        return None;
    }

    let lhs = c.indices[0].name.as_str();
    let args0 = bare_idents(accesses[0].1)?;
    let args1 = bare_idents(accesses[1].1)?;

    // y(i) +=! A(i, k) * x(k)
    if args0.len() == 2 && args1.len() == 1 {
        if lhs == args0[0] && args0[1] == args1[0] {
            return Some([0, 1]);
        }
        return None;
    }
    // y(i) +=! x(k) * A(i, k)
    if args0.len() == 1 && args1.len() == 2 {
        if lhs == args1[0] && args1[1] == args0[0] {
            return Some([1, 0]);
        }
        return None;
    }

    None
}
