//! Analyses over symbolic expressions: atom collection and monomial
//! extraction.

use crate::inference::expr::{Expr, ExprRef, OpKind};
use std::collections::BTreeMap;

/// The atoms of a (candidate monomial) expression: its constants, parameter
/// names, variable names and the number of negations.
#[derive(Debug, Default, Clone)]
pub struct Atoms {
    pub constants: Vec<u64>,
    pub parameters: Vec<String>,
    pub variables: Vec<String>,
    pub negations: u32,
}

impl Atoms {
    /// The sign of the monomial: odd negation counts flip it.
    pub fn is_negative(&self) -> bool {
        self.negations % 2 == 1
    }
}

/// Collect the atoms of `e`.
pub fn collect_atoms(e: &Expr) -> Atoms {
    let mut atoms = Atoms::default();
    collect_atoms_into(e, &mut atoms);
    atoms
}

fn collect_atoms_into(e: &Expr, atoms: &mut Atoms) {
    match e {
        Expr::BinOp { l, r, .. } => {
            collect_atoms_into(l, atoms);
            collect_atoms_into(r, atoms);
        }
        Expr::Neg(inner) => {
            atoms.negations += 1;
            collect_atoms_into(inner, atoms);
        }
        Expr::Constant(c) => atoms.constants.push(*c),
        Expr::Parameter(p) => atoms.parameters.push(p.clone()),
        Expr::Variable(v) => atoms.variables.push(v.clone()),
    }
}

/// A coefficient with separate positive and negative constant parts; its
/// semantic value is `positive - negative`, times the product of its
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coefficient {
    pub positive: u64,
    pub negative: u64,
    pub parameters: Vec<String>,
}

impl Coefficient {
    pub fn new(positive: u64, negative: u64, parameters: Vec<String>) -> Self {
        Self {
            positive,
            negative,
            parameters,
        }
    }

    /// Normalize by sorting the parameters.
    pub fn normalize(&mut self) {
        self.parameters.sort();
    }

    fn prefactor(&self) -> ExprRef {
        if self.positive == 0 && self.negative != 0 {
            Expr::neg(Expr::constant(self.negative))
        } else if self.negative == 0 {
            Expr::constant(self.positive)
        } else {
            Expr::bin(
                OpKind::Minus,
                Expr::constant(self.positive),
                Expr::constant(self.negative),
            )
        }
    }

    /// Rebuild an expression, multiplications associating to the left.
    pub fn to_expr_l(&self) -> ExprRef {
        let mut expr = self.prefactor();
        for p in &self.parameters {
            expr = Expr::bin(OpKind::Times, expr, Expr::param(p.clone()));
        }
        expr
    }

    /// Rebuild an expression, multiplications associating to the right.
    pub fn to_expr_r(&self) -> ExprRef {
        let mut expr = self.prefactor();
        for p in self.parameters.iter().rev() {
            expr = Expr::bin(OpKind::Times, Expr::param(p.clone()), expr);
        }
        expr
    }
}

/// A monomial: a sum of coefficients times a product of variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monomial {
    pub coefficients: Vec<Coefficient>,
    pub variables: Vec<String>,
}

impl Monomial {
    /// Normalize by sorting the variables, combining coefficients that
    /// share the same parameter key, and sorting the coefficients by their
    /// parameter keys.
    pub fn normalize(&mut self) {
        self.variables.sort();

        let mut combined: BTreeMap<Vec<String>, (u64, u64)> = BTreeMap::new();
        for c in &mut self.coefficients {
            c.normalize();
            let entry = combined.entry(c.parameters.clone()).or_insert((0, 0));
            entry.0 += c.positive;
            entry.1 += c.negative;
        }

        // BTreeMap iteration orders the coefficients by their parameters.
        self.coefficients = combined
            .into_iter()
            .map(|(parameters, (positive, negative))| Coefficient {
                positive,
                negative,
                parameters,
            })
            .collect();
    }

    fn fold_coefficients(mut exprs: Vec<ExprRef>, reverse: bool) -> ExprRef {
        if reverse {
            exprs.reverse();
        }
        let mut iter = exprs.into_iter();
        // A monomial always carries at least one coefficient.
        let first = match iter.next() {
            Some(e) => e,
            None => Expr::constant(0),
        };
        if reverse {
            iter.fold(first, |acc, e| Expr::bin(OpKind::Plus, e, acc))
        } else {
            iter.fold(first, |acc, e| Expr::bin(OpKind::Plus, acc, e))
        }
    }

    /// Rebuild an expression, associating to the left.
    pub fn to_expr_l(&self) -> ExprRef {
        let coeffs = self.coefficients.iter().map(|c| c.to_expr_l()).collect();
        let mut expr = Self::fold_coefficients(coeffs, false);
        for v in &self.variables {
            expr = Expr::bin(OpKind::Times, expr, Expr::var(v.clone()));
        }
        expr
    }

    /// Rebuild an expression, associating to the right.
    pub fn to_expr_r(&self) -> ExprRef {
        let coeffs = self.coefficients.iter().map(|c| c.to_expr_r()).collect();
        let mut expr = Self::fold_coefficients(coeffs, true);
        for v in self.variables.iter().rev() {
            expr = Expr::bin(OpKind::Times, Expr::var(v.clone()), expr);
        }
        expr
    }
}

/// Extract the normalized monomials of a (distributed, sign-converted)
/// expression. Sums are walked; every maximal monomial subtree contributes
/// one coefficient; a negation above a subtree flips the sign of every
/// monomial underneath.
pub fn collect_monomials(e: &Expr) -> Vec<Monomial> {
    let mut monomials: BTreeMap<Vec<String>, Vec<Coefficient>> = BTreeMap::new();
    collect_into(e, &mut monomials);
    monomials
        .into_iter()
        .map(|(variables, coefficients)| {
            let mut m = Monomial {
                coefficients,
                variables,
            };
            m.normalize();
            m
        })
        .collect()
}

fn collect_into(e: &Expr, monomials: &mut BTreeMap<Vec<String>, Vec<Coefficient>>) {
    match e {
        Expr::BinOp { l, r, .. } => {
            if !e.is_monomial_expr() {
                collect_into(l, monomials);
                collect_into(r, monomials);
                return;
            }

            let atoms = collect_atoms(e);
            let mut vars = atoms.variables.clone();
            vars.sort();

            let factor: u64 = atoms.constants.iter().product();
            let (positive, negative) = if atoms.is_negative() {
                (0, factor)
            } else {
                (factor, 0)
            };

            monomials
                .entry(vars)
                .or_default()
                .push(Coefficient::new(positive, negative, atoms.parameters));
        }
        Expr::Neg(inner) => {
            // Only reached when not inside another monomial: flip the signs
            // of everything collected underneath.
            let mut nested: BTreeMap<Vec<String>, Vec<Coefficient>> = BTreeMap::new();
            collect_into(inner, &mut nested);
            for (vars, coeffs) in nested {
                for mut c in coeffs {
                    std::mem::swap(&mut c.positive, &mut c.negative);
                    monomials.entry(vars.clone()).or_default().push(c);
                }
            }
        }
        Expr::Constant(c) => {
            monomials
                .entry(Vec::new())
                .or_default()
                .push(Coefficient::new(*c, 0, Vec::new()));
        }
        Expr::Parameter(p) => {
            monomials
                .entry(Vec::new())
                .or_default()
                .push(Coefficient::new(1, 0, vec![p.clone()]));
        }
        Expr::Variable(v) => {
            monomials
                .entry(vec![v.clone()])
                .or_default()
                .push(Coefficient::new(1, 0, Vec::new()));
        }
    }
}
