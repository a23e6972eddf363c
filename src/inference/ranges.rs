//! The per-statement range inference problem: solved ranges and residual
//! constraints over symbolic expressions.

use crate::inference::expr::{Expr, ExprRef};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Comparison operators for constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        };
        write!(f, "{}", s)
    }
}

/// An unsolved constraint `l op r`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Constraint {
    pub l: ExprRef,
    pub op: CmpOp,
    pub r: ExprRef,
}

impl Constraint {
    pub fn new(l: ExprRef, op: CmpOp, r: ExprRef) -> Self {
        Self { l, op, r }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.l, self.op, self.r)
    }
}

/// A solved range, standing for the two constraints `low <= name` and
/// `name < up`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Range {
    pub name: String,
    pub low: ExprRef,
    pub up: ExprRef,
}

impl Range {
    pub fn new(name: impl Into<String>, low: ExprRef, up: ExprRef) -> Self {
        Self {
            name: name.into(),
            low,
            up,
        }
    }

    /// The two half-constraints this range stands for.
    pub fn as_constraints(&self) -> [Constraint; 2] {
        let var = Expr::var(self.name.clone());
        [
            Constraint::new(self.low.clone(), CmpOp::Le, var.clone()),
            Constraint::new(var, CmpOp::Lt, self.up.clone()),
        ]
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <= {} < {}", self.low, self.name, self.up)
    }
}

/// The accumulated problem for one statement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceProblem {
    pub solved: BTreeSet<Range>,
    pub constraints: BTreeSet<Constraint>,
}

impl InferenceProblem {
    /// Record a solved range; duplicates are suppressed by the set.
    pub fn add_range(&mut self, name: &str, low: ExprRef, up: ExprRef) {
        self.solved.insert(Range::new(name, low, up));
    }

    /// Record an unsolved constraint unless a solved range already implies
    /// it.
    pub fn add_constraint(&mut self, l: ExprRef, op: CmpOp, r: ExprRef) {
        let c = Constraint::new(l, op, r);
        for range in &self.solved {
            if range.as_constraints().contains(&c) {
                return;
            }
        }
        self.constraints.insert(c);
    }

    /// Record `lower <= middle` and `middle < upper`, promoting them to a
    /// solved range when `lower` and `upper` are constant expressions and
    /// `middle` is a bare variable. Promotion also erases the corresponding
    /// half-constraints.
    pub fn add_constraints(&mut self, lower: ExprRef, middle: ExprRef, upper: ExprRef) {
        if lower.is_const_expr() && middle.is_variable() && upper.is_const_expr() {
            let name = middle.variable_name().unwrap_or_default().to_string();
            self.add_range(&name, lower.clone(), upper.clone());

            self.constraints
                .remove(&Constraint::new(lower, CmpOp::Le, middle.clone()));
            self.constraints
                .remove(&Constraint::new(middle, CmpOp::Lt, upper));
        } else {
            self.add_constraint(lower, CmpOp::Le, middle.clone());
            self.add_constraint(middle, CmpOp::Lt, upper);
        }
    }

    /// Look up the solved range for an iterator.
    pub fn solved_range(&self, name: &str) -> Option<&Range> {
        self.solved.iter().find(|r| r.name == name)
    }

    /// Drop all accumulated state.
    pub fn clear(&mut self) {
        self.solved.clear();
        self.constraints.clear();
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.solved.is_empty() && self.constraints.is_empty()
    }
}

impl fmt::Display for InferenceProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.solved {
            writeln!(f, "Range: {}", r)?;
        }
        for c in &self.constraints {
            writeln!(f, "Constraint: {}", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::expr::OpKind;

    #[test]
    fn test_promotion_to_range() {
        let mut p = InferenceProblem::default();
        p.add_constraints(Expr::constant(0), Expr::var("i"), Expr::param("N"));

        assert_eq!(p.solved.len(), 1);
        assert!(p.constraints.is_empty());
        let r = p.solved_range("i").unwrap();
        assert_eq!(r.low, Expr::constant(0));
        assert_eq!(r.up, Expr::param("N"));
    }

    #[test]
    fn test_promotion_erases_half_constraints() {
        let mut p = InferenceProblem::default();
        // First insert the halves as unsolved constraints.
        p.add_constraint(Expr::constant(0), CmpOp::Le, Expr::var("i"));
        p.add_constraint(Expr::var("i"), CmpOp::Lt, Expr::param("N"));
        assert_eq!(p.constraints.len(), 2);

        // Promotion removes them again.
        p.add_constraints(Expr::constant(0), Expr::var("i"), Expr::param("N"));
        assert_eq!(p.solved.len(), 1);
        assert!(p.constraints.is_empty());
    }

    #[test]
    fn test_non_variable_middle_stays_constraint() {
        let mut p = InferenceProblem::default();
        let middle = Expr::bin(OpKind::Plus, Expr::var("i"), Expr::constant(1));
        p.add_constraints(Expr::constant(0), middle, Expr::param("N"));

        assert!(p.solved.is_empty());
        assert_eq!(p.constraints.len(), 2);
    }

    #[test]
    fn test_implied_constraint_suppressed() {
        let mut p = InferenceProblem::default();
        p.add_constraints(Expr::constant(0), Expr::var("i"), Expr::param("N"));

        // Both halves are implied by the solved range and must not appear.
        p.add_constraint(Expr::constant(0), CmpOp::Le, Expr::var("i"));
        p.add_constraint(Expr::var("i"), CmpOp::Lt, Expr::param("N"));
        assert!(p.constraints.is_empty());

        // A different constraint is kept.
        p.add_constraint(Expr::var("i"), CmpOp::Lt, Expr::param("M"));
        assert_eq!(p.constraints.len(), 1);
    }

    #[test]
    fn test_duplicate_ranges_suppressed() {
        let mut p = InferenceProblem::default();
        p.add_range("i", Expr::constant(0), Expr::param("N"));
        p.add_range("i", Expr::constant(0), Expr::param("N"));
        assert_eq!(p.solved.len(), 1);
    }

    #[test]
    fn test_display() {
        let mut p = InferenceProblem::default();
        p.add_range("i", Expr::constant(0), Expr::param("N"));
        p.add_constraint(
            Expr::constant(0),
            CmpOp::Le,
            Expr::bin(OpKind::Plus, Expr::var("j"), Expr::constant(1)),
        );
        let s = p.to_string();
        assert!(s.contains("Range: 0 <= i < $N"));
        assert!(s.contains("Constraint: 0 <= (j+1)"));
    }

    #[test]
    fn test_clear() {
        let mut p = InferenceProblem::default();
        p.add_range("i", Expr::constant(0), Expr::param("N"));
        p.clear();
        assert!(p.is_empty());
    }
}
