//! Semantic analysis for TC kernels.
//!
//! Sema transforms a raw parsed kernel into a typed, semantically checked
//! one. It rewrites call-shaped `Apply` nodes into tensor `Access`es or
//! `BuiltIn` calls, attaches a scalar type to every expression, discovers
//! reduction variables, checks that inputs stay read-only, and collects the
//! per-statement range inference problem consumed by the IR generator.

use crate::frontend::ast::*;
use crate::frontend::builtins::{is_builtin, BUILTIN_FUNCTIONS};
use crate::inference::expr::Expr as SymExpr;
use crate::inference::InferenceProblem;
use crate::utils::errors::{CompileResult, SemaError, SemaErrorKind};
use crate::utils::location::SourceRange;
use std::collections::{HashMap, HashSet};

/// Options steering semantic analysis.
#[derive(Debug, Clone)]
pub struct SemaOptions {
    /// Emit warnings through the `log` facade.
    pub emit_warnings: bool,
}

impl Default for SemaOptions {
    fn default() -> Self {
        Self {
            emit_warnings: true,
        }
    }
}

/// The type of a resolved symbol.
#[derive(Debug, Clone)]
pub enum SymType {
    Scalar(TypeInfo),
    Tensor(TensorSig),
}

/// A tensor signature: element type plus dimension expressions.
#[derive(Debug, Clone)]
pub struct TensorSig {
    pub scalar: TypeInfo,
    pub dims: Vec<DimExpr>,
}

type Env = HashMap<String, SymType>;

/// The semantic analyzer. One instance checks any number of kernels; all
/// environments are scoped per kernel.
pub struct Sema {
    opts: SemaOptions,

    /// Tensor and scalar types, per kernel.
    env: Env,
    /// Iterator bindings, per statement.
    index_env: Env,
    /// `let` bindings, per statement.
    let_env: Env,
    /// Declared return types, per kernel.
    annotated_output_types: HashMap<String, TensorType>,

    /// Names currently referring to an unwritten input tensor. Writing to
    /// a name removes it, so it can no longer size range expressions.
    live_input_names: HashSet<String>,
    input_parameters: HashSet<String>,
    non_temporaries: HashSet<String>,
    /// Size symbols; these become parameters of the symbolic expressions.
    range_parameters: HashSet<String>,
    /// Output names actually written by an earlier statement.
    written_outputs: HashSet<String>,

    /// Reduction variables of the current statement, in order of first use.
    reduction_variables: Vec<Ident>,
    /// Range problem of the current statement.
    ranges: InferenceProblem,

    warnings: Vec<String>,
}

impl Sema {
    /// Create an analyzer.
    pub fn new(opts: SemaOptions) -> Self {
        Self {
            opts,
            env: Env::new(),
            index_env: Env::new(),
            let_env: Env::new(),
            annotated_output_types: HashMap::new(),
            live_input_names: HashSet::new(),
            input_parameters: HashSet::new(),
            non_temporaries: HashSet::new(),
            range_parameters: HashSet::new(),
            written_outputs: HashSet::new(),
            reduction_variables: Vec::new(),
            ranges: InferenceProblem::default(),
            warnings: Vec::new(),
        }
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn reset(&mut self) {
        self.env.clear();
        self.index_env.clear();
        self.let_env.clear();
        self.annotated_output_types.clear();
        self.live_input_names.clear();
        self.input_parameters.clear();
        self.non_temporaries.clear();
        self.range_parameters.clear();
        self.written_outputs.clear();
        self.reduction_variables.clear();
        self.ranges.clear();
    }

    /// Check one kernel, returning the checked copy.
    pub fn check_def(&mut self, def: &Def) -> CompileResult<Def> {
        self.reset();
        let mut def = def.clone();

        for p in &def.params {
            self.check_param(p)?;
        }

        for r in &def.returns {
            if let Some(tt) = &r.tensor_type {
                self.annotated_output_types
                    .insert(r.ident.name.clone(), tt.clone());
                self.add_range_parameters(tt);
                self.check_param(r)?;
            }
        }

        for p in &def.params {
            self.non_temporaries.insert(p.ident.name.clone());
            self.input_parameters.insert(p.ident.name.clone());
            if let Some(tt) = &p.tensor_type {
                self.add_range_parameters(tt);
            }
        }
        for r in &def.returns {
            self.non_temporaries.insert(r.ident.name.clone());
        }

        for stmt in &mut def.statements {
            self.check_stmt(stmt)?;
        }

        for r in &def.returns {
            if !self.env.contains_key(&r.ident.name) {
                return Err(SemaError::new(
                    SemaErrorKind::UnknownIdentifier,
                    format!("undefined variable {} used here", r.ident.name),
                    r.ident.range.clone(),
                )
                .into());
            }
        }

        self.range_parameters.clear();
        Ok(def)
    }

    /// Record every identifier occurring in a tensor type as a size symbol.
    fn add_range_parameters(&mut self, tt: &TensorType) {
        for d in &tt.dims {
            if let Some(name) = d.name() {
                self.range_parameters.insert(name.to_string());
            }
        }
    }

    fn check_param(&mut self, p: &Param) -> CompileResult<()> {
        let tt = match &p.tensor_type {
            Some(tt) => tt,
            None => return Ok(()),
        };
        // Dimension symbols become int32 scalars in the environment.
        for d in &tt.dims {
            if let DimExpr::Ident(ident) = d {
                Self::insert(
                    &mut self.env,
                    ident,
                    SymType::Scalar(TypeInfo::index_type()),
                    false,
                )?;
            }
        }
        Self::insert(
            &mut self.env,
            &p.ident,
            SymType::Tensor(TensorSig {
                scalar: tt.scalar.into(),
                dims: tt.dims.clone(),
            }),
            true,
        )?;
        self.live_input_names.insert(p.ident.name.clone());
        Ok(())
    }

    fn insert(
        env: &mut Env,
        ident: &Ident,
        value: SymType,
        must_be_undefined: bool,
    ) -> Result<(), SemaError> {
        if is_builtin(&ident.name) {
            return Err(SemaError::new(
                SemaErrorKind::AlreadyDefined,
                format!(
                    "'{}' is a built-in function and cannot be redefined",
                    ident.name
                ),
                ident.range.clone(),
            ));
        }
        if must_be_undefined && env.contains_key(&ident.name) {
            return Err(SemaError::new(
                SemaErrorKind::AlreadyDefined,
                format!("{} already defined", ident.name),
                ident.range.clone(),
            ));
        }
        env.entry(ident.name.clone()).or_insert(value);
        Ok(())
    }

    /// Resolve a name: iterators shadow `let` bindings shadow the kernel
    /// environment.
    fn lookup(&self, name: &str) -> Option<&SymType> {
        self.index_env
            .get(name)
            .or_else(|| self.let_env.get(name))
            .or_else(|| self.env.get(name))
    }

    fn lookup_required(&self, ident: &Ident) -> Result<SymType, SemaError> {
        self.lookup(&ident.name).cloned().ok_or_else(|| {
            SemaError::new(
                SemaErrorKind::UnknownIdentifier,
                format!("undefined variable {} used here", ident.name),
                ident.range.clone(),
            )
        })
    }

    /// Resolve a name, classifying it as a fresh reduction variable when it
    /// is not bound anywhere.
    fn lookup_var_or_create_index(&mut self, ident: &Ident) -> CompileResult<SymType> {
        if let Some(t) = self.lookup(&ident.name) {
            return Ok(t.clone());
        }
        let ty = SymType::Scalar(TypeInfo::index_type());
        Self::insert(&mut self.index_env, ident, ty.clone(), true)?;
        self.reduction_variables.push(ident.clone());
        Ok(ty)
    }

    fn expect_integral(&self, ty: TypeInfo, range: &SourceRange) -> Result<(), SemaError> {
        if ty.is_float() {
            return Err(SemaError::new(
                SemaErrorKind::NonIntegerIndex,
                format!("expected integral type but found {}", ty),
                range.clone(),
            ));
        }
        Ok(())
    }

    fn expect_bool(&self, ty: TypeInfo, range: &SourceRange) -> Result<(), SemaError> {
        if ty != TypeInfo::bool_type() {
            return Err(SemaError::new(
                SemaErrorKind::TypeMismatch,
                format!("expected boolean but found {}", ty),
                range.clone(),
            ));
        }
        Ok(())
    }

    /// Check a call-shaped node (`Apply` or a re-checked `Access`),
    /// rewriting it into an `Access` or `BuiltIn`.
    fn check_apply(&mut self, e: &mut Expr, allow_access: bool) -> CompileResult<TypeInfo> {
        let kind = std::mem::replace(&mut e.kind, ExprKind::Ident(String::new()));
        let (name, mut args) = match kind {
            ExprKind::Apply { name, args } | ExprKind::Access { name, args } => (name, args),
            other => {
                e.kind = other;
                return Err(SemaError::new(
                    SemaErrorKind::TypeMismatch,
                    "internal: not a call-shaped expression",
                    e.range.clone(),
                )
                .into());
            }
        };

        if is_builtin(&name.name) {
            let arity = BUILTIN_FUNCTIONS.get(name.name.as_str()).copied().unwrap_or(0);
            if arity != args.len() {
                return Err(SemaError::new(
                    SemaErrorKind::WrongArity,
                    format!("expected {} arguments but found {}", arity, args.len()),
                    e.range.clone(),
                )
                .into());
            }
            // Built-ins propagate their argument types like arithmetic,
            // seeded with float.
            let mut ty = TypeInfo::float_type();
            for a in &mut args {
                let at = self.check_exp(a, allow_access)?;
                ty = match_types(ty, at);
            }
            e.kind = ExprKind::BuiltIn {
                name: name.name,
                args,
            };
            e.ty = Some(ty);
            return Ok(ty);
        }

        if !allow_access {
            return Err(SemaError::new(
                SemaErrorKind::ScalarTensorMismatch,
                "tensor accesses cannot be used in this context",
                e.range.clone(),
            )
            .into());
        }

        let sig = match self.lookup_required(&name)? {
            SymType::Tensor(sig) => sig,
            SymType::Scalar(_) => {
                return Err(SemaError::new(
                    SemaErrorKind::ScalarTensorMismatch,
                    "expected a tensor but found a scalar",
                    name.range.clone(),
                )
                .into())
            }
        };

        if sig.dims.len() != args.len() {
            return Err(SemaError::new(
                SemaErrorKind::WrongArity,
                format!(
                    "expected {} dimensions but found {} dimensions",
                    sig.dims.len(),
                    args.len()
                ),
                e.range.clone(),
            )
            .into());
        }

        for a in &mut args {
            let at = self.check_exp(a, allow_access)?;
            self.expect_integral(at, &a.range)?;
        }

        // Collect `0 <= arg < dim` for each index. The annotated output
        // type supplies the dimensions for writes to declared outputs.
        let dims = self
            .annotated_output_types
            .get(&name.name)
            .map(|t| t.dims.clone())
            .unwrap_or_else(|| sig.dims.clone());
        for (arg, dim) in args.iter().zip(dims.iter()) {
            // Indices the symbolic language cannot model contribute no
            // constraint.
            if let Ok(mid) = SymExpr::from_tree(arg, &self.range_parameters) {
                let hi = SymExpr::from_dim(dim, &self.range_parameters);
                self.ranges
                    .add_constraints(SymExpr::constant(0), mid, hi);
            }
        }

        let ty = sig.scalar;
        e.kind = ExprKind::Access { name, args };
        e.ty = Some(ty);
        Ok(ty)
    }

    /// Type-check an expression, attaching its scalar type.
    pub fn check_exp(&mut self, e: &mut Expr, allow_access: bool) -> CompileResult<TypeInfo> {
        if matches!(e.kind, ExprKind::Apply { .. } | ExprKind::Access { .. }) {
            return self.check_apply(e, allow_access);
        }

        let ty = match &mut e.kind {
            ExprKind::Ident(name) => {
                let ident = Ident::new(name.clone(), e.range.clone());
                match self.lookup_var_or_create_index(&ident)? {
                    SymType::Tensor(sig) if sig.dims.is_empty() => {
                        // A rank-0 tensor in scalar position reads its
                        // single element.
                        e.kind = ExprKind::Apply {
                            name: ident,
                            args: Vec::new(),
                        };
                        return self.check_apply(e, allow_access);
                    }
                    SymType::Tensor(_) => {
                        return Err(SemaError::new(
                            SemaErrorKind::ScalarTensorMismatch,
                            "expected a scalar but found a tensor expression",
                            e.range.clone(),
                        )
                        .into())
                    }
                    SymType::Scalar(ti) => ti,
                }
            }

            ExprKind::Select { name, .. } => {
                match self.lookup_required(name)? {
                    SymType::Tensor(_) => {}
                    SymType::Scalar(_) => {
                        return Err(SemaError::new(
                            SemaErrorKind::ScalarTensorMismatch,
                            "expected a tensor but found a scalar",
                            name.range.clone(),
                        )
                        .into())
                    }
                }
                TypeInfo::index_type()
            }

            ExprKind::Const { kind, .. } => TypeInfo::from(*kind),

            ExprKind::Binary { op, left, right } => {
                let lt = self.check_exp(left, allow_access)?;
                let rt = self.check_exp(right, allow_access)?;
                if op.is_comparison() {
                    match_types(lt, rt);
                    TypeInfo::bool_type()
                } else if op.is_logical() {
                    self.expect_bool(match_types(lt, rt), &e.range)?;
                    TypeInfo::bool_type()
                } else {
                    match_types(lt, rt)
                }
            }

            ExprKind::Unary { op, operand } => {
                let ot = self.check_exp(operand, allow_access)?;
                match op {
                    UnaryOp::Neg => ot,
                    UnaryOp::Not => {
                        self.expect_bool(ot, &operand.range)?;
                        TypeInfo::bool_type()
                    }
                }
            }

            ExprKind::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let ct = self.check_exp(condition, allow_access)?;
                self.expect_bool(ct, &condition.range)?;
                let tt = self.check_exp(then_expr, allow_access)?;
                let et = self.check_exp(else_expr, allow_access)?;
                match_types(tt, et)
            }

            ExprKind::Cast { expr, kind } => {
                let inner = self.check_exp(expr, allow_access)?;
                // The cast may narrow; unification only determines the
                // common type and never fails here.
                match_types(inner, TypeInfo::from(*kind));
                TypeInfo::from(*kind)
            }

            ExprKind::BuiltIn { args, .. } => {
                let mut ty = TypeInfo::float_type();
                for a in args {
                    let at = self.check_exp(a, allow_access)?;
                    ty = match_types(ty, at);
                }
                ty
            }

            // Handled above.
            ExprKind::Apply { .. } | ExprKind::Access { .. } => TypeInfo::float_type(),
        };

        e.ty = Some(ty);
        Ok(ty)
    }

    fn check_where_clause(&mut self, clause: &mut WhereClause) -> CompileResult<()> {
        match clause {
            WhereClause::Range(rc) => {
                // The constraint may mention the iterator before the RHS
                // introduces it.
                self.lookup_var_or_create_index(&rc.ident)?;
                if !self.index_env.contains_key(&rc.ident.name) {
                    return Err(SemaError::new(
                        SemaErrorKind::UnknownIdentifier,
                        format!("'{}' does not name an iterator", rc.ident.name),
                        rc.ident.range.clone(),
                    )
                    .into());
                }
                let st = self.check_exp(&mut rc.start, false)?;
                self.expect_integral(st, &rc.start.range)?;
                let et = self.check_exp(&mut rc.end, false)?;
                self.expect_integral(et, &rc.end.range)?;

                let lo = SymExpr::from_tree(&rc.start, &self.range_parameters)?;
                let hi = SymExpr::from_tree(&rc.end, &self.range_parameters)?;
                let mid = if self.range_parameters.contains(&rc.ident.name) {
                    SymExpr::param(rc.ident.name.clone())
                } else {
                    SymExpr::var(rc.ident.name.clone())
                };
                self.ranges.add_constraints(lo, mid, hi);
                Ok(())
            }
            WhereClause::Let(l) => {
                let ty = self.check_exp(&mut l.rhs, true)?;
                Self::insert(&mut self.let_env, &l.name, SymType::Scalar(ty), true)?;
                Ok(())
            }
            WhereClause::Exists(e) => {
                self.check_exp(e, true)?;
                Ok(())
            }
        }
    }

    /// Check one comprehension.
    fn check_stmt(&mut self, stmt: &mut Comprehension) -> CompileResult<()> {
        let name = stmt.ident.name.clone();

        if !self.non_temporaries.contains(&name) {
            return Err(SemaError::new(
                SemaErrorKind::NotAnOutput,
                format!(
                    "{} is not listed as an input or output to this function; \
                     temporary tensors are not supported",
                    name
                ),
                stmt.ident.range.clone(),
            )
            .into());
        }

        if self.input_parameters.contains(&name) {
            return Err(SemaError::new(
                SemaErrorKind::InputWritten,
                "kernel inputs are immutable",
                stmt.ident.range.clone(),
            )
            .into());
        }

        let tt = match self.annotated_output_types.get(&name) {
            Some(tt) => tt.clone(),
            None => {
                return Err(SemaError::new(
                    SemaErrorKind::OutputTypeNotDeclared,
                    format!("type of output tensor {} is not declared", name),
                    stmt.ident.range.clone(),
                )
                .into())
            }
        };

        // Register the LHS iterators with their ranges over the declared
        // output dimensions.
        for (i, idx) in stmt.indices.iter().enumerate() {
            if let Some(dim) = tt.dims.get(i) {
                self.ranges.add_range(
                    &idx.name,
                    SymExpr::constant(0),
                    SymExpr::from_dim(dim, &self.range_parameters),
                );
            }
            Self::insert(
                &mut self.index_env,
                idx,
                SymType::Scalar(TypeInfo::index_type()),
                true,
            )?;
        }

        // Where clauses come before the RHS: their bindings are in scope
        // there.
        for clause in &mut stmt.where_clauses {
            self.check_where_clause(clause)?;
        }

        let scalar_ty = self.check_exp(&mut stmt.rhs, true)?;

        let declared = TypeInfo::from(tt.scalar);
        let matched = match_types(scalar_ty, declared);
        if declared != matched {
            return Err(SemaError::new(
                SemaErrorKind::NarrowingAssignment,
                format!(
                    "attempting to assign type {} to narrower type {} without an explicit cast",
                    scalar_ty, declared
                ),
                stmt.range.clone(),
            )
            .into());
        }
        if tt.dims.len() != stmt.indices.len() {
            return Err(SemaError::new(
                SemaErrorKind::RankMismatch,
                format!(
                    "tensor defined with {} dimensions but declared as an output with {} dimensions",
                    stmt.indices.len(),
                    tt.dims.len()
                ),
                stmt.range.clone(),
            )
            .into());
        }

        // A reduction without `!` assumes the output carries a value
        // already; warn when no earlier statement wrote one.
        if stmt.assignment.is_uninitialized_reduction() && !self.written_outputs.contains(&name) {
            let msg = format!(
                "{}: reduction without initialization; if {} is not pre-initialized before \
                 calling the kernel, consider using the reduction operator {}! instead of {}",
                stmt.range, name, stmt.assignment, stmt.assignment
            );
            if self.opts.emit_warnings {
                log::warn!("{}", msg);
            }
            self.warnings.push(msg);
        }

        // Subsequent statements see this tensor with one symbolic
        // dimension per LHS index.
        let output_dims: Vec<DimExpr> = (0..stmt.indices.len())
            .map(|i| {
                DimExpr::Ident(Ident::new(
                    format!("{}.{}", name, i),
                    stmt.ident.range.clone(),
                ))
            })
            .collect();
        Self::insert(
            &mut self.env,
            &stmt.ident,
            SymType::Tensor(TensorSig {
                scalar: scalar_ty,
                dims: output_dims,
            }),
            false,
        )?;
        self.written_outputs.insert(name.clone());

        // A written name no longer sizes range expressions.
        self.live_input_names.remove(&name);

        if let Some(eq) = &mut stmt.equivalent {
            for access in &mut eq.accesses {
                self.check_exp(access, true)?;
            }
        }

        // `+=!` with no reduction dimensions is a plain assignment.
        if self.reduction_variables.is_empty() && stmt.assignment.is_initializing() {
            stmt.assignment = AssignOp::Assign;
        }

        if !self.reduction_variables.is_empty() && stmt.assignment == AssignOp::Assign {
            let last = &self.reduction_variables[self.reduction_variables.len() - 1];
            return Err(SemaError::new(
                SemaErrorKind::ReductionMarker,
                format!("'=' used with reduction variable '{}'", last.name),
                stmt.range.clone(),
            )
            .into());
        }

        stmt.reduction_vars = std::mem::take(&mut self.reduction_variables);
        stmt.ranges = std::mem::take(&mut self.ranges);

        // Per-statement environments end here.
        self.index_env.clear();
        self.let_env.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse_defs;
    use crate::utils::errors::CompilerError;

    fn check(source: &str) -> CompileResult<(Def, Vec<String>)> {
        let defs = parse_defs(source, "test.tc")?;
        let mut sema = Sema::new(SemaOptions {
            emit_warnings: false,
        });
        let checked = sema.check_def(&defs[0])?;
        Ok((checked, sema.warnings().to_vec()))
    }

    fn check_err(source: &str) -> SemaError {
        match check(source) {
            Err(CompilerError::Sema(e)) => e,
            other => panic!("expected semantic error, got {:?}", other.map(|_| ())),
        }
    }

    const MM: &str =
        "def mm(float(N,K) A, float(K,M) B) -> (float(N,M) C) { C(i,j) +=! A(i,k)*B(k,j) }";

    #[test]
    fn test_matmul_checks() {
        let (def, warnings) = check(MM).unwrap();
        assert!(warnings.is_empty());
        let stmt = &def.statements[0];

        // k is the only reduction variable.
        let names: Vec<_> = stmt.reduction_vars.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["k"]);

        // Applies were rewritten to accesses.
        match &stmt.rhs.kind {
            ExprKind::Binary { left, right, .. } => {
                assert!(matches!(left.kind, ExprKind::Access { .. }));
                assert!(matches!(right.kind, ExprKind::Access { .. }));
            }
            other => panic!("expected binary rhs, got {:?}", other),
        }

        // The statement's range problem solved all three iterators.
        assert!(stmt.ranges.solved_range("i").is_some());
        assert!(stmt.ranges.solved_range("j").is_some());
        assert!(stmt.ranges.solved_range("k").is_some());
        assert!(stmt.ranges.constraints.is_empty());
    }

    #[test]
    fn test_types_attached() {
        let (def, _) = check(MM).unwrap();
        let rhs = &def.statements[0].rhs;
        assert_eq!(rhs.ty, Some(TypeInfo::float_type()));
    }

    #[test]
    fn test_idempotence() {
        let (checked, _) = check(MM).unwrap();
        let mut sema = Sema::new(SemaOptions {
            emit_warnings: false,
        });
        let rechecked = sema.check_def(&checked).unwrap();
        assert_eq!(
            rechecked.statements[0].reduction_vars.len(),
            checked.statements[0].reduction_vars.len()
        );
        assert_eq!(
            rechecked.statements[0].assignment,
            checked.statements[0].assignment
        );
        assert_eq!(
            format!("{}", rechecked.statements[0].ranges),
            format!("{}", checked.statements[0].ranges)
        );
    }

    #[test]
    fn test_uninitialized_reduction_warns() {
        let (_, warnings) =
            check("def f(float(N) x) -> (float s) { s += x(i) }").unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("reduction without initialization"));
        assert!(warnings[0].contains("+=!"));
    }

    #[test]
    fn test_initialized_reduction_does_not_warn() {
        let (_, warnings) =
            check("def f(float(N) x) -> (float s) { s +=! x(i) }").unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_no_warning_after_write() {
        let (_, warnings) = check(
            "def f(float(N) x) -> (float s) { s = 0.0 s += x(i) }",
        )
        .unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_narrowing_assignment_is_error() {
        let e = check_err("def g(float32(N) x) -> (float16(N) y) { y(i) = x(i) }");
        assert_eq!(e.kind, SemaErrorKind::NarrowingAssignment);
        assert!(e
            .message
            .contains("attempting to assign type f32 to narrower type f16"));
    }

    #[test]
    fn test_widening_assignment_is_fine() {
        assert!(check("def g(float16(N) x) -> (float32(N) y) { y(i) = x(i) }").is_ok());
    }

    #[test]
    fn test_reduction_var_with_plain_assign_is_error() {
        let e = check_err("def h(float(N,M) A) -> (float(N) y) { y(i) = A(i,k) }");
        assert_eq!(e.kind, SemaErrorKind::ReductionMarker);
        assert!(e.message.contains("reduction variable 'k'"));
    }

    #[test]
    fn test_initializing_op_without_reductions_downgrades() {
        let (def, _) =
            check("def f(float(N) x) -> (float(N) y) { y(i) +=! x(i) }").unwrap();
        assert_eq!(def.statements[0].assignment, AssignOp::Assign);
        assert!(def.statements[0].reduction_vars.is_empty());
    }

    #[test]
    fn test_write_to_input_is_error() {
        let e = check_err("def f(float(N) x) -> (float(N) y) { x(i) = 1.0 }");
        assert_eq!(e.kind, SemaErrorKind::InputWritten);
    }

    #[test]
    fn test_write_to_temporary_is_error() {
        let e = check_err("def f(float(N) x) -> (float(N) y) { t(i) = x(i) }");
        assert_eq!(e.kind, SemaErrorKind::NotAnOutput);
    }

    #[test]
    fn test_undeclared_output_type_is_error() {
        let e = check_err("def f(float(N) x) -> (y) { y(i) = x(i) }");
        assert_eq!(e.kind, SemaErrorKind::OutputTypeNotDeclared);
    }

    #[test]
    fn test_access_arity_is_checked() {
        let e = check_err("def f(float(N,M) A) -> (float(N) y) { y(i) +=! A(i) }");
        assert_eq!(e.kind, SemaErrorKind::WrongArity);
    }

    #[test]
    fn test_rank_mismatch_is_error() {
        let e = check_err("def f(float(N) x) -> (float(N) y) { y(i,j) = x(i) }");
        assert_eq!(e.kind, SemaErrorKind::RankMismatch);
    }

    #[test]
    fn test_float_index_is_error() {
        let e = check_err("def f(float(N) x) -> (float(N) y) { y(i) = x(1.5) }");
        assert_eq!(e.kind, SemaErrorKind::NonIntegerIndex);
    }

    #[test]
    fn test_builtin_rewrite() {
        let (def, _) = check("def f(float(N) x) -> (float(N) y) { y(i) = exp(x(i)) }").unwrap();
        match &def.statements[0].rhs.kind {
            ExprKind::BuiltIn { name, args } => {
                assert_eq!(name, "exp");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected builtin, got {:?}", other),
        }
    }

    #[test]
    fn test_builtin_arity_is_checked() {
        let e = check_err("def f(float(N) x) -> (float(N) y) { y(i) = pow(x(i)) }");
        assert_eq!(e.kind, SemaErrorKind::WrongArity);
    }

    #[test]
    fn test_scalar_access_rewrite() {
        // `s` on the RHS of the second statement reads the rank-0 output.
        let (def, _) = check(
            "def f(float(N) x) -> (float s, float(N) y) { s +=! x(i) y(i) = x(i) * s }",
        )
        .unwrap();
        match &def.statements[1].rhs.kind {
            ExprKind::Binary { right, .. } => {
                assert!(matches!(&right.kind, ExprKind::Access { args, .. } if args.is_empty()));
            }
            other => panic!("expected binary rhs, got {:?}", other),
        }
    }

    #[test]
    fn test_where_range_constraint() {
        let (def, _) = check(
            "def f(float(N) x) -> (float(N) y) { y(i) = x(i) where i in 1:N-1 }",
        )
        .unwrap();
        let stmt = &def.statements[0];
        // The explicit constraint and the LHS-derived range both solved i;
        // the halo range has non-constant shape only on the upper end,
        // which is still a constant expression (N-1), so both are ranges.
        assert!(stmt.ranges.solved.len() >= 1);
    }

    #[test]
    fn test_let_binding_scopes() {
        assert!(check(
            "def f(float(N) x) -> (float(N) y) { y(i) = x(i) * t where let t = x(0) }"
        )
        .is_ok());
    }

    #[test]
    fn test_exists_clause_checked_only() {
        let (def, _) = check(
            "def f(float(N) x) -> (float(N) y) { y(i) = x(i) where exists x(i) }",
        )
        .unwrap();
        // `exists` does not contribute ranges beyond the access constraints.
        assert!(def.statements[0].ranges.solved_range("i").is_some());
    }

    #[test]
    fn test_select_types_as_index() {
        assert!(check("def f(float(N) x) -> (float s) { s = x.0 ? 1.0 : 0.0 }").is_err());
        assert!(check("def f(float(N) x) -> (int32 s) { s = x.0 }").is_ok());
    }

    #[test]
    fn test_comparison_and_ternary() {
        assert!(check(
            "def f(float(N) x) -> (float(N) y) { y(i) = x(i) > 0.0 ? x(i) : 0.0 }"
        )
        .is_ok());
        // Non-boolean condition is rejected.
        assert!(check(
            "def f(float(N) x) -> (float(N) y) { y(i) = x(i) ? 1.0 : 0.0 }"
        )
        .is_err());
    }

    #[test]
    fn test_duplicate_lhs_index_is_error() {
        let e = check_err("def f(float(N,N) A) -> (float(N,N) B) { B(i,i) = A(i,i) }");
        assert_eq!(e.kind, SemaErrorKind::AlreadyDefined);
    }
}
