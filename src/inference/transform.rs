//! Value-preserving transformations on symbolic expressions: distribution,
//! sign conversion and full normalization.

use crate::inference::analysis::{collect_monomials, Monomial};
use crate::inference::expr::{Expr, ExprRef, OpKind};
use std::collections::HashMap;

/// Association direction for reconstructed expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
}

/// Apply `a*(b±c) → a*b ± a*c` and `(a±b)*c → a*c ± b*c` recursively,
/// bottom-up. The result contains no `*` with a sum operand.
pub fn distribute(e: &ExprRef) -> ExprRef {
    match &**e {
        Expr::BinOp { op, l, r } => {
            let l = distribute(l);
            let r = distribute(r);

            if *op != OpKind::Times {
                return Expr::bin(*op, l, r);
            }

            if let Expr::BinOp {
                op: sum_op,
                l: a,
                r: b,
            } = &*l
            {
                if l.is_sum_expr() {
                    let left = distribute(&Expr::bin(OpKind::Times, a.clone(), r.clone()));
                    let right = distribute(&Expr::bin(OpKind::Times, b.clone(), r));
                    return Expr::bin(*sum_op, left, right);
                }
            }

            if let Expr::BinOp {
                op: sum_op,
                l: a,
                r: b,
            } = &*r
            {
                if r.is_sum_expr() {
                    let left = distribute(&Expr::bin(OpKind::Times, l.clone(), a.clone()));
                    let right = distribute(&Expr::bin(OpKind::Times, l, b.clone()));
                    return Expr::bin(*sum_op, left, right);
                }
            }

            Expr::bin(OpKind::Times, l, r)
        }
        Expr::Neg(inner) => Expr::neg(distribute(inner)),
        _ => e.clone(),
    }
}

/// Push negations and subtractions toward the leaves. Afterwards, `Neg`
/// appears only directly around constants, parameters and variables, and no
/// `-` operator remains.
pub fn sign_convert(e: &ExprRef) -> ExprRef {
    convert(e, 0)
}

fn convert(e: &ExprRef, signs: u32) -> ExprRef {
    match &**e {
        Expr::BinOp { op, l, r } => match op {
            // Signs travel only down the left operand of a multiplication;
            // the right operand starts from a fresh sign context.
            OpKind::Times => Expr::bin(OpKind::Times, convert(l, signs), convert(r, 0)),
            // A subtraction becomes an addition with one extra sign passed
            // rightward.
            OpKind::Minus => Expr::bin(OpKind::Plus, convert(l, signs), convert(r, signs + 1)),
            OpKind::Plus => Expr::bin(OpKind::Plus, convert(l, signs), convert(r, signs)),
        },
        Expr::Neg(inner) => convert(inner, signs + 1),
        Expr::Variable(_) | Expr::Parameter(_) | Expr::Constant(_) => {
            if signs % 2 == 1 {
                Expr::neg(e.clone())
            } else {
                e.clone()
            }
        }
    }
}

fn monomials_to_expr(monomials: &[Monomial], assoc: Assoc) -> ExprRef {
    match assoc {
        Assoc::Left => {
            let mut iter = monomials.iter().map(|m| m.to_expr_l());
            // An expression always yields at least one monomial.
            let first = iter.next().unwrap_or_else(|| Expr::constant(0));
            iter.fold(first, |acc, e| Expr::bin(OpKind::Plus, acc, e))
        }
        Assoc::Right => {
            let mut iter = monomials.iter().rev().map(|m| m.to_expr_r());
            let first = iter.next().unwrap_or_else(|| Expr::constant(0));
            iter.fold(first, |acc, e| Expr::bin(OpKind::Plus, e, acc))
        }
    }
}

/// Normalize: sign conversion, then distribution, then monomial collection
/// and reconstruction as a sum of normalized monomials.
pub fn normalize(e: &ExprRef, assoc: Assoc) -> ExprRef {
    let converted = sign_convert(e);
    let distributed = distribute(&converted);
    let monomials = collect_monomials(&distributed);
    monomials_to_expr(&monomials, assoc)
}

/// Replaces variable and parameter leaves according to two name maps;
/// non-leaf structure is preserved.
#[derive(Debug, Default, Clone)]
pub struct Substitution {
    variables: HashMap<String, ExprRef>,
    parameters: HashMap<String, ExprRef>,
}

impl Substitution {
    /// A substitution for a single variable.
    pub fn for_variable(name: impl Into<String>, replacement: ExprRef) -> Self {
        let mut s = Self::default();
        s.variables.insert(name.into(), replacement);
        s
    }

    /// A substitution for a single parameter.
    pub fn for_parameter(name: impl Into<String>, replacement: ExprRef) -> Self {
        let mut s = Self::default();
        s.parameters.insert(name.into(), replacement);
        s
    }

    /// Add a variable replacement.
    pub fn set_variable(&mut self, name: impl Into<String>, replacement: ExprRef) {
        self.variables.insert(name.into(), replacement);
    }

    /// Add a parameter replacement.
    pub fn set_parameter(&mut self, name: impl Into<String>, replacement: ExprRef) {
        self.parameters.insert(name.into(), replacement);
    }

    /// Apply the substitution.
    pub fn apply(&self, e: &ExprRef) -> ExprRef {
        match &**e {
            Expr::BinOp { op, l, r } => Expr::bin(*op, self.apply(l), self.apply(r)),
            Expr::Neg(inner) => Expr::neg(self.apply(inner)),
            Expr::Variable(n) => self
                .variables
                .get(n)
                .cloned()
                .unwrap_or_else(|| e.clone()),
            Expr::Parameter(n) => self
                .parameters
                .get(n)
                .cloned()
                .unwrap_or_else(|| e.clone()),
            Expr::Constant(_) => e.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::parser::parse_expr;

    fn eval_env() -> (HashMap<String, i64>, HashMap<String, i64>) {
        let mut vars = HashMap::new();
        vars.insert("i".to_string(), 3);
        vars.insert("j".to_string(), -7);
        vars.insert("k".to_string(), 11);
        let mut params = HashMap::new();
        params.insert("N".to_string(), 17);
        params.insert("M".to_string(), 23);
        (vars, params)
    }

    fn assert_value_preserved(source: &str, f: impl Fn(&ExprRef) -> ExprRef) {
        let e = parse_expr(source).unwrap();
        let (vars, params) = eval_env();
        let before = e.evaluate(&vars, &params).unwrap();
        let after = f(&e).evaluate(&vars, &params).unwrap();
        assert_eq!(before, after, "value changed for {}", source);
    }

    fn no_product_of_sum(e: &Expr) -> bool {
        match e {
            Expr::BinOp { op, l, r } => {
                if *op == OpKind::Times && (l.is_sum_expr() || r.is_sum_expr()) {
                    return false;
                }
                no_product_of_sum(l) && no_product_of_sum(r)
            }
            Expr::Neg(inner) => no_product_of_sum(inner),
            _ => true,
        }
    }

    fn neg_only_over_leaves(e: &Expr) -> bool {
        match e {
            Expr::BinOp { op, l, r } => {
                *op != OpKind::Minus && neg_only_over_leaves(l) && neg_only_over_leaves(r)
            }
            Expr::Neg(inner) => matches!(
                &**inner,
                Expr::Variable(_) | Expr::Parameter(_) | Expr::Constant(_)
            ),
            _ => true,
        }
    }

    #[test]
    fn test_distribute_shape() {
        let e = parse_expr("(i + 2) * ($N - j)").unwrap();
        let d = distribute(&e);
        assert!(no_product_of_sum(&d));
    }

    #[test]
    fn test_distribute_preserves_value() {
        assert_value_preserved("(i + 2) * ($N - j)", |e| distribute(e));
        assert_value_preserved("i * (j + k) * 2", |e| distribute(e));
        assert_value_preserved("-(i + 1) * ($M + $N)", |e| distribute(e));
    }

    #[test]
    fn test_sign_convert_shape() {
        let e = parse_expr("-(i - -j) - $N").unwrap();
        let c = sign_convert(&e);
        assert!(neg_only_over_leaves(&c));
    }

    #[test]
    fn test_sign_convert_preserves_value() {
        assert_value_preserved("-(i - -j) - $N", |e| sign_convert(e));
        assert_value_preserved("i - j - k", |e| sign_convert(e));
        assert_value_preserved("-(i * j) - -(2 * k)", |e| sign_convert(e));
        // Signs must not leak into the right operand of a multiplication.
        assert_value_preserved("-(i * (j - 1))", |e| sign_convert(e));
    }

    #[test]
    fn test_normalize_preserves_value_both_directions() {
        for source in [
            "(i + 2) * ($N - j)",
            "-(i - j) * 3 + $M * (k - 1)",
            "2*i + 3*i - i",
            "$N * $M - $M * $N",
            "7",
            "-i",
        ] {
            assert_value_preserved(source, |e| normalize(e, Assoc::Left));
            assert_value_preserved(source, |e| normalize(e, Assoc::Right));
        }
    }

    #[test]
    fn test_normalize_left_right_same_value() {
        let e = parse_expr("(i + 2) * ($N - j) + k").unwrap();
        let (vars, params) = eval_env();
        let l = normalize(&e, Assoc::Left).evaluate(&vars, &params);
        let r = normalize(&e, Assoc::Right).evaluate(&vars, &params);
        assert_eq!(l, r);
    }

    #[test]
    fn test_normalize_is_sum_of_monomials() {
        fn sum_of_monomials(e: &Expr) -> bool {
            match e {
                Expr::BinOp {
                    op: OpKind::Plus,
                    l,
                    r,
                } => sum_of_monomials(l) && sum_of_monomials(r),
                other => other.is_monomial_expr() || !other.is_sum_expr(),
            }
        }
        let e = parse_expr("(i + 2) * ($N - j)").unwrap();
        let n = normalize(&e, Assoc::Left);
        assert!(sum_of_monomials(&n));
    }

    #[test]
    fn test_normalize_cancellation_keeps_one_monomial() {
        // i - i normalizes to a single all-zero monomial, not an empty sum.
        let e = parse_expr("i - i").unwrap();
        let n = normalize(&e, Assoc::Left);
        let (vars, params) = eval_env();
        assert_eq!(n.evaluate(&vars, &params), Some(0));
    }

    #[test]
    fn test_substitution() {
        let e = parse_expr("i + $N").unwrap();
        let sub = Substitution::for_variable("i", parse_expr("j * 2").unwrap());
        let applied = sub.apply(&e);
        assert_eq!(applied.to_string(), "((j*2)+$N)");

        let sub = Substitution::for_parameter("N", Expr::constant(8));
        let applied = sub.apply(&e);
        assert_eq!(applied.to_string(), "(i+8)");
    }

    #[test]
    fn test_substitution_preserves_structure() {
        let e = parse_expr("-(i * (i + 1))").unwrap();
        let sub = Substitution::for_variable("i", Expr::constant(4));
        let applied = sub.apply(&e);
        assert_eq!(
            applied.evaluate(&HashMap::new(), &HashMap::new()),
            Some(-20)
        );
    }
}
