//! Lowering of checked kernels into tensor IR functions.
//!
//! Each comprehension becomes either a single structured reduction
//! operator (with per-access affine maps and per-iterator parallel or
//! reduction tags) or a plain loop nest. Specializable shapes may become
//! named operators instead.

use crate::frontend::ast::{
    AssignOp, BinaryOp, Comprehension, ConstValue, Def, DimExpr, Expr, ExprKind, RangeConstraint,
    TensorType, TypeInfo, UnaryOp, WhereClause,
};
use crate::inference::expr::Expr as SymExpr;
use crate::ir::affine::{affine_from_index_expr, is_affine_index_expr, AffineExpr, AffineMap};
use crate::ir::builder::{ArithOp, CmpPred, FuncBuilder, Function, IterKind, Module, Value};
use crate::ir::pattern::{match_matmul, match_matvec};
use crate::ir::types::{scalar_type_of, IrType, ScalarType};
use crate::ir::{BodyOp, LowerOptions};
use crate::utils::errors::{IrError, IrErrorKind};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Lower all kernels into one module.
pub fn lower_defs(defs: &[Def], opts: &LowerOptions) -> Result<Module, IrError> {
    let mut module = Module::default();
    for def in defs {
        module.push(lower_def(def, opts)?);
    }
    Ok(module)
}

/// Lower one checked kernel into a function.
pub fn lower_def(def: &Def, opts: &LowerOptions) -> Result<Function, IrError> {
    let mut decl_types: HashMap<String, TensorType> = HashMap::new();
    let mut param_order: Vec<(String, TensorType)> = Vec::new();

    for p in def.params.iter().chain(def.returns.iter()) {
        let tt = match &p.tensor_type {
            Some(tt) => tt,
            None => {
                return Err(IrError::at(
                    IrErrorKind::BadOutput,
                    format!("type for output tensor {} not specified", p.ident.name),
                    p.ident.range.clone(),
                ))
            }
        };
        decl_types.insert(p.ident.name.clone(), tt.clone());
        param_order.push((p.ident.name.clone(), tt.clone()));
    }

    // Declared output ranks must agree with how the body indexes them.
    let mut used_ranks: HashMap<String, usize> = HashMap::new();
    for stmt in &def.statements {
        let rank = stmt.indices.len();
        if let Some(prev) = used_ranks.insert(stmt.ident.name.clone(), rank) {
            if prev != rank {
                return Err(IrError::at(
                    IrErrorKind::BadOutput,
                    format!("multiple ranks found for output tensor {}", stmt.ident.name),
                    stmt.ident.range.clone(),
                ));
            }
        }
    }
    for r in &def.returns {
        if let (Some(tt), Some(used)) = (&r.tensor_type, used_ranks.get(&r.ident.name)) {
            if tt.dims.len() != *used {
                return Err(IrError::at(
                    IrErrorKind::BadOutput,
                    format!(
                        "output tensor {} has been declared with {} dimensions, but is indexed \
                         with {} dimensions",
                        r.ident.name,
                        tt.dims.len(),
                        used
                    ),
                    r.ident.range.clone(),
                ));
            }
        }
    }

    let mut param_types = Vec::new();
    for (_, tt) in &param_order {
        let elem = scalar_type_of(TypeInfo::from(tt.scalar))?;
        param_types.push(IrType::MemRef {
            elem,
            rank: tt.dims.len(),
        });
    }

    let mut b = FuncBuilder::new(def.name.name.clone(), param_types);

    // Tensors, then one representative extent per size symbol: walking
    // inputs and outputs in order, a symbol binds to `dim(tensor, i)` at
    // its first occurrence.
    let mut symtab: HashMap<String, Value> = HashMap::new();
    let params = b.params();
    for ((name, _), value) in param_order.iter().zip(params.iter()) {
        symtab.insert(name.clone(), *value);
    }
    for ((_, tt), value) in param_order.iter().zip(params.iter()) {
        for (i, dim) in tt.dims.iter().enumerate() {
            if let Some(sym) = dim.name() {
                if !symtab.contains_key(sym) {
                    let extent = b.dim(*value, i);
                    symtab.insert(sym.to_string(), extent);
                }
            }
        }
    }

    for stmt in &def.statements {
        lower_comprehension(&mut b, &symtab, stmt, &decl_types, opts)?;
    }

    Ok(b.finish())
}

/// A loop bound, either from an explicit `where` constraint or from the
/// statement's solved range problem.
enum Bound<'a> {
    Explicit(&'a RangeConstraint),
    Solved(crate::inference::Range),
}

impl Bound<'_> {
    /// `[0, dim)` check: the domain starts at zero and ends exactly at the
    /// given tensor dimension.
    fn matches_dim(&self, dim: &DimExpr) -> bool {
        match self {
            Bound::Explicit(rc) => {
                let starts_at_zero = matches!(
                    &rc.start.kind,
                    ExprKind::Const { value, .. } if value.is_zero()
                );
                let ends_at_dim = match (&rc.end.kind, dim) {
                    (ExprKind::Ident(n), DimExpr::Ident(d)) => *n == d.name,
                    (
                        ExprKind::Const {
                            value: ConstValue::Int(v),
                            ..
                        },
                        DimExpr::Const { value, .. },
                    ) => v == value,
                    _ => false,
                };
                starts_at_zero && ends_at_dim
            }
            Bound::Solved(range) => {
                let starts_at_zero = *range.low == SymExpr::Constant(0);
                let ends_at_dim = match (&*range.up, dim) {
                    (SymExpr::Parameter(n), DimExpr::Ident(d)) => *n == d.name,
                    (SymExpr::Variable(n), DimExpr::Ident(d)) => *n == d.name,
                    (SymExpr::Constant(c), DimExpr::Const { value, .. }) => *c as i64 == *value,
                    _ => false,
                };
                starts_at_zero && ends_at_dim
            }
        }
    }
}

struct StmtLowering<'a> {
    symtab: HashMap<String, Value>,
    stmt: &'a Comprehension,
    decl_types: &'a HashMap<String, TensorType>,
    /// Iterators in stable order with their parallel/reduction kind.
    iterators: BTreeMap<String, IterKind>,
    bounds: HashMap<String, Bound<'a>>,
}

fn lower_comprehension(
    b: &mut FuncBuilder,
    symtab: &HashMap<String, Value>,
    stmt: &Comprehension,
    decl_types: &HashMap<String, TensorType>,
    opts: &LowerOptions,
) -> Result<(), IrError> {
    // min=/max= have no combiner in the IR.
    if matches!(
        stmt.assignment,
        AssignOp::MinEq | AssignOp::MaxEq | AssignOp::MinEqB | AssignOp::MaxEqB
    ) {
        return Err(IrError::at(
            IrErrorKind::UnsupportedReduction,
            format!("unsupported reduction operator '{}'", stmt.assignment),
            stmt.range.clone(),
        ));
    }

    let mut iterators = BTreeMap::new();
    for idx in &stmt.indices {
        iterators.insert(idx.name.clone(), IterKind::Parallel);
    }
    for red in &stmt.reduction_vars {
        iterators.insert(red.name.clone(), IterKind::Reduction);
    }

    let mut bounds: HashMap<String, Bound> = HashMap::new();
    for clause in &stmt.where_clauses {
        if let WhereClause::Range(rc) = clause {
            bounds.insert(rc.ident.name.clone(), Bound::Explicit(rc));
        }
    }
    for name in iterators.keys() {
        if !bounds.contains_key(name) {
            match stmt.ranges.solved_range(name) {
                Some(range) => {
                    bounds.insert(name.clone(), Bound::Solved(range.clone()));
                }
                None => {
                    return Err(IrError::at(
                        IrErrorKind::MissingBound,
                        format!("cannot infer bounds for iterator '{}'", name),
                        stmt.range.clone(),
                    ))
                }
            }
        }
    }

    let mut lowering = StmtLowering {
        symtab: symtab.clone(),
        stmt,
        decl_types,
        iterators,
        bounds,
    };

    lowering.run(b, opts)
}

impl<'a> StmtLowering<'a> {
    fn run(&mut self, b: &mut FuncBuilder, opts: &LowerOptions) -> Result<(), IrError> {
        let out_tensor = self.tensor_value(&self.stmt.ident.name, &self.stmt.range)?;

        // Per-iterator index-typed bound values, in iterator order.
        let mut bound_values: HashMap<String, (Value, Value)> = HashMap::new();
        for name in self.iterators.keys().cloned().collect::<Vec<_>>() {
            let (lo, hi) = match &self.bounds[&name] {
                Bound::Explicit(rc) => {
                    let lo = self.build_index_expr(b, &rc.start)?;
                    let hi = self.build_index_expr(b, &rc.end)?;
                    (lo, hi)
                }
                Bound::Solved(range) => {
                    let lo = self.build_sym_expr(b, &range.low)?;
                    let hi = self.build_sym_expr(b, &range.up)?;
                    (lo, hi)
                }
            };
            bound_values.insert(name, (lo, hi));
        }

        // Default-initialized reductions broadcast the neutral element
        // into the written region of the output first.
        if self.stmt.assignment.is_initializing() {
            let elem = b.elem_type(out_tensor)?;
            let neutral = match stmt_combiner(self.stmt.assignment) {
                Some(ArithOp::Mul) => 1,
                _ => 0,
            };
            let neutral = match elem {
                ScalarType::Float(kind) => b.const_float(neutral as f64, kind),
                ScalarType::Int(_) => b.const_int(neutral, elem),
            };

            if self.lhs_spans_output() {
                b.fill(neutral, out_tensor);
            } else {
                let mut offsets = Vec::new();
                let mut sizes = Vec::new();
                for idx in &self.stmt.indices {
                    let (lo, hi) = bound_values[&idx.name];
                    offsets.push(lo);
                    sizes.push(b.arith(ArithOp::Sub, hi, lo));
                }
                let view = b.subview(out_tensor, &offsets, &sizes)?;
                b.fill(neutral, view);
            }
        }

        if opts.body_op == BodyOp::Structured && self.structured_eligible() {
            if opts.specialize {
                if let Some(order) = match_matmul(self.stmt) {
                    let accesses = rhs_accesses(&self.stmt.rhs);
                    let a = self.tensor_value(&accesses[order[0]].0, &self.stmt.range)?;
                    let bb = self.tensor_value(&accesses[order[1]].0, &self.stmt.range)?;
                    b.matmul(a, bb, out_tensor);
                    return Ok(());
                }
                if let Some(order) = match_matvec(self.stmt) {
                    let accesses = rhs_accesses(&self.stmt.rhs);
                    let a = self.tensor_value(&accesses[order[0]].0, &self.stmt.range)?;
                    let x = self.tensor_value(&accesses[order[1]].0, &self.stmt.range)?;
                    b.matvec(a, x, out_tensor);
                    return Ok(());
                }
            }
            return self.emit_generic(b, out_tensor);
        }

        self.emit_loop_nest(b, out_tensor, &bound_values)
    }

    fn tensor_value(
        &self,
        name: &str,
        range: &crate::utils::location::SourceRange,
    ) -> Result<Value, IrError> {
        self.symtab.get(name).copied().ok_or_else(|| {
            IrError::at(
                IrErrorKind::UnsupportedConstruct,
                format!("no value for '{}'", name),
                range.clone(),
            )
        })
    }

    /// All four structured-generation conditions on the statement itself.
    fn structured_eligible(&self) -> bool {
        // Only +, * and pure assignment combine in a structured body.
        if stmt_combiner(self.stmt.assignment).is_none() && self.stmt.assignment != AssignOp::Assign
        {
            return false;
        }
        // `let` bindings force materialization in a loop body.
        if self
            .stmt
            .where_clauses
            .iter()
            .any(|c| matches!(c, WhereClause::Let(_)))
        {
            return false;
        }

        let iter_names: HashSet<String> = self.iterators.keys().cloned().collect();
        let accesses = rhs_accesses(&self.stmt.rhs);

        // Iterator values cannot be referenced inside the structured body.
        if rhs_uses_iterator_value(&self.stmt.rhs, &iter_names) {
            return false;
        }

        // All indexing expressions must be affine in the iterators.
        for (_, args) in &accesses {
            for arg in args.iter() {
                if !is_affine_index_expr(arg, &iter_names) {
                    return false;
                }
            }
        }

        // Every reduction iterator must directly index some tensor
        // dimension.
        let mut direct: HashSet<&str> = HashSet::new();
        for (_, args) in &accesses {
            for arg in args.iter() {
                if let ExprKind::Ident(n) = &arg.kind {
                    direct.insert(n.as_str());
                }
            }
        }
        for (name, kind) in &self.iterators {
            if *kind == IterKind::Reduction && !direct.contains(name.as_str()) {
                return false;
            }
        }

        // Every directly-indexing iterator's domain must equal the indexed
        // dimension.
        if !self.lhs_spans_output() {
            return false;
        }
        for (tensor, args) in &accesses {
            let decl = match self.decl_types.get(tensor) {
                Some(decl) => decl,
                None => return false,
            };
            for (i, arg) in args.iter().enumerate() {
                if let ExprKind::Ident(n) = &arg.kind {
                    if !iter_names.contains(n) {
                        continue;
                    }
                    let dim = match decl.dims.get(i) {
                        Some(dim) => dim,
                        None => return false,
                    };
                    match self.bounds.get(n) {
                        Some(bound) if bound.matches_dim(dim) => {}
                        _ => return false,
                    }
                }
            }
        }

        true
    }

    /// Check that the LHS iterators exactly cover the output tensor.
    fn lhs_spans_output(&self) -> bool {
        let decl = match self.decl_types.get(&self.stmt.ident.name) {
            Some(decl) => decl,
            None => return false,
        };
        for (i, idx) in self.stmt.indices.iter().enumerate() {
            let dim = match decl.dims.get(i) {
                Some(dim) => dim,
                None => return false,
            };
            match self.bounds.get(&idx.name) {
                Some(bound) if bound.matches_dim(dim) => {}
                _ => return false,
            }
        }
        true
    }

    /// Emit the generic structured operator for this statement.
    fn emit_generic(&mut self, b: &mut FuncBuilder, out_tensor: Value) -> Result<(), IrError> {
        let dim_order: HashMap<String, usize> = self
            .iterators
            .keys()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        let num_dims = dim_order.len();

        // Deduplicate reads so each distinct access appears exactly once.
        let accesses = rhs_accesses(&self.stmt.rhs);
        let mut input_values = Vec::new();
        let mut input_maps = Vec::new();
        let mut access_slots: HashMap<String, usize> = HashMap::new();
        for (tensor, args) in &accesses {
            let key = access_key(tensor, args);
            if access_slots.contains_key(&key) {
                continue;
            }
            let mut results = Vec::new();
            for arg in args.iter() {
                results.push(affine_from_index_expr(arg, &dim_order)?);
            }
            access_slots.insert(key, input_values.len());
            input_values.push(self.tensor_value(tensor, &self.stmt.range)?);
            input_maps.push(AffineMap::new(num_dims, results));
        }

        // The output map reads off the LHS iterators.
        let mut out_results = Vec::new();
        for idx in &self.stmt.indices {
            match dim_order.get(&idx.name) {
                Some(d) => out_results.push(AffineExpr::Dim(*d)),
                None => {
                    return Err(IrError::at(
                        IrErrorKind::UnsupportedConstruct,
                        format!("'{}' is not an iterator", idx.name),
                        idx.range.clone(),
                    ))
                }
            }
        }
        let mut maps = input_maps;
        maps.push(AffineMap::new(num_dims, out_results));

        let iterator_types: Vec<IterKind> = self.iterators.values().copied().collect();
        let out_elem = b.elem_type(out_tensor)?;
        let combiner = stmt_combiner(self.stmt.assignment);
        let stmt = self.stmt;
        let symtab = self.symtab.clone();

        b.build_generic(
            &input_values,
            out_tensor,
            maps,
            iterator_types,
            |b, args| {
                let inputs = &args[..args.len() - 1];
                let out_arg = args[args.len() - 1];

                let rhs = build_region_expr(b, &stmt.rhs, &access_slots, inputs, &symtab)?;
                let rhs = convert_value(b, rhs, out_elem, &stmt.range)?;
                match combiner {
                    Some(op) => Ok(b.arith(op, out_arg, rhs)),
                    None => Ok(rhs),
                }
            },
        )
    }

    /// Emit the nested-loop fallback for this statement.
    fn emit_loop_nest(
        &mut self,
        b: &mut FuncBuilder,
        out_tensor: Value,
        bound_values: &HashMap<String, (Value, Value)>,
    ) -> Result<(), IrError> {
        let order: Vec<String> = self.iterators.keys().cloned().collect();
        let loops: Vec<(String, Value, Value)> = order
            .iter()
            .map(|name| {
                let (lo, hi) = bound_values[name];
                (name.clone(), lo, hi)
            })
            .collect();
        self.emit_loops(b, &loops, out_tensor)
    }

    fn emit_loops(
        &mut self,
        b: &mut FuncBuilder,
        loops: &[(String, Value, Value)],
        out_tensor: Value,
    ) -> Result<(), IrError> {
        match loops.split_first() {
            Some(((name, lo, hi), rest)) => {
                let name = name.clone();
                b.build_loop(*lo, *hi, |b, induction| {
                    self.symtab.insert(name, induction);
                    self.emit_loops(b, rest, out_tensor)
                })
            }
            None => self.emit_innermost(b, out_tensor),
        }
    }

    fn emit_innermost(&mut self, b: &mut FuncBuilder, out_tensor: Value) -> Result<(), IrError> {
        // `let` bindings are in scope for the RHS, in clause order.
        for clause in &self.stmt.where_clauses {
            if let WhereClause::Let(l) = clause {
                let value = self.build_value_expr(b, &l.rhs)?;
                self.symtab.insert(l.name.name.clone(), value);
            }
        }

        let rhs = self.build_value_expr(b, &self.stmt.rhs)?;

        let mut indices = Vec::new();
        for idx in &self.stmt.indices {
            indices.push(self.tensor_value(&idx.name, &idx.range)?);
        }

        let elem = b.elem_type(out_tensor)?;
        let result = match stmt_combiner(self.stmt.assignment) {
            Some(op) => {
                let current = b.load(out_tensor, &indices)?;
                let rhs = convert_value(b, rhs, elem, &self.stmt.range)?;
                b.arith(op, current, rhs)
            }
            None => convert_value(b, rhs, elem, &self.stmt.range)?,
        };
        b.store(result, out_tensor, &indices);
        Ok(())
    }

    /// Build an index-typed value from an index expression: identifiers
    /// resolve through the symbol table, constants become index constants.
    fn build_index_expr(&self, b: &mut FuncBuilder, e: &Expr) -> Result<Value, IrError> {
        match &e.kind {
            ExprKind::Ident(name) => {
                let v = self.tensor_value(name, &e.range)?;
                if b.value_type(v).is_index() {
                    Ok(v)
                } else {
                    Err(IrError::at(
                        IrErrorKind::UnsupportedConstruct,
                        format!("'{}' cannot be used in an index expression", name),
                        e.range.clone(),
                    ))
                }
            }
            ExprKind::Const {
                value: ConstValue::Int(v),
                ..
            } => Ok(b.const_index(*v)),
            ExprKind::Binary { op, left, right } => {
                let l = self.build_index_expr(b, left)?;
                let r = self.build_index_expr(b, right)?;
                let op = match op {
                    BinaryOp::Add => ArithOp::Add,
                    BinaryOp::Sub => ArithOp::Sub,
                    BinaryOp::Mul => ArithOp::Mul,
                    BinaryOp::Div => ArithOp::Div,
                    other => {
                        return Err(IrError::at(
                            IrErrorKind::UnsupportedConstruct,
                            format!("unsupported operator '{}' in index expression", other),
                            e.range.clone(),
                        ))
                    }
                };
                Ok(b.arith(op, l, r))
            }
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                let zero = b.const_index(0);
                let v = self.build_index_expr(b, operand)?;
                Ok(b.arith(ArithOp::Sub, zero, v))
            }
            _ => Err(IrError::at(
                IrErrorKind::UnsupportedConstruct,
                "unsupported index expression",
                e.range.clone(),
            )),
        }
    }

    /// Build an index-typed value from a symbolic range expression.
    fn build_sym_expr(&self, b: &mut FuncBuilder, e: &SymExpr) -> Result<Value, IrError> {
        match e {
            SymExpr::Constant(c) => Ok(b.const_index(*c as i64)),
            SymExpr::Parameter(n) | SymExpr::Variable(n) => {
                match self.symtab.get(n) {
                    Some(v) if b.value_type(*v).is_index() => Ok(*v),
                    _ => Err(IrError::new(
                        IrErrorKind::MissingBound,
                        format!("no extent bound for size symbol '{}'", n),
                    )),
                }
            }
            SymExpr::BinOp { op, l, r } => {
                let l = self.build_sym_expr(b, l)?;
                let r = self.build_sym_expr(b, r)?;
                let op = match op {
                    crate::inference::OpKind::Plus => ArithOp::Add,
                    crate::inference::OpKind::Minus => ArithOp::Sub,
                    crate::inference::OpKind::Times => ArithOp::Mul,
                };
                Ok(b.arith(op, l, r))
            }
            SymExpr::Neg(inner) => {
                let zero = b.const_index(0);
                let v = self.build_sym_expr(b, inner)?;
                Ok(b.arith(ArithOp::Sub, zero, v))
            }
        }
    }

    /// Build a scalar value from a checked RHS expression, loading tensor
    /// elements as needed.
    fn build_value_expr(&self, b: &mut FuncBuilder, e: &Expr) -> Result<Value, IrError> {
        match &e.kind {
            ExprKind::Const { value, kind } => {
                build_constant(b, *value, TypeInfo::from(*kind), &e.range)
            }
            ExprKind::Ident(name) => self.tensor_value(name, &e.range),
            ExprKind::Access { name, args } => {
                let tensor = self.tensor_value(&name.name, &name.range)?;
                let mut indices = Vec::new();
                for arg in args {
                    indices.push(self.build_index_expr(b, arg)?);
                }
                b.load(tensor, &indices)
            }
            ExprKind::Select { name, dim } => {
                let tensor = self.tensor_value(&name.name, &name.range)?;
                Ok(b.dim(tensor, *dim))
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.build_value_expr(b, left)?;
                let r = self.build_value_expr(b, right)?;
                build_binary(b, *op, l, r, &e.range)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.build_value_expr(b, operand)?;
                build_unary(b, *op, v, &e.range)
            }
            ExprKind::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let c = self.build_value_expr(b, condition)?;
                let t = self.build_value_expr(b, then_expr)?;
                let e_val = self.build_value_expr(b, else_expr)?;
                let (t, e_val) = align_values(b, t, e_val, &e.range)?;
                Ok(b.select(c, t, e_val))
            }
            ExprKind::Cast { expr, kind } => {
                let v = self.build_value_expr(b, expr)?;
                let target = scalar_type_of(TypeInfo::from(*kind))
                    .map_err(|err| err_with_range(err, &e.range))?;
                convert_value(b, v, target, &e.range)
            }
            ExprKind::BuiltIn { name, .. } => Err(IrError::at(
                IrErrorKind::UnsupportedConstruct,
                format!("built-in function '{}' has no lowering", name),
                e.range.clone(),
            )),
            ExprKind::Apply { .. } => Err(IrError::at(
                IrErrorKind::UnsupportedConstruct,
                "unchecked expression reached lowering",
                e.range.clone(),
            )),
        }
    }
}

/// The combiner of an assignment operator, `None` for pure assignment.
fn stmt_combiner(op: AssignOp) -> Option<ArithOp> {
    match op {
        AssignOp::PlusEq | AssignOp::PlusEqB => Some(ArithOp::Add),
        AssignOp::TimesEq | AssignOp::TimesEqB => Some(ArithOp::Mul),
        _ => None,
    }
}

/// Collect the tensor accesses of an expression in pre-order.
fn rhs_accesses(e: &Expr) -> Vec<(String, Vec<Expr>)> {
    let mut out = Vec::new();
    collect_accesses(e, &mut out);
    out
}

fn collect_accesses(e: &Expr, out: &mut Vec<(String, Vec<Expr>)>) {
    match &e.kind {
        ExprKind::Access { name, args } => {
            out.push((name.name.clone(), args.clone()));
            for a in args {
                collect_accesses(a, out);
            }
        }
        ExprKind::Binary { left, right, .. } => {
            collect_accesses(left, out);
            collect_accesses(right, out);
        }
        ExprKind::Unary { operand, .. } => collect_accesses(operand, out),
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            collect_accesses(condition, out);
            collect_accesses(then_expr, out);
            collect_accesses(else_expr, out);
        }
        ExprKind::Cast { expr, .. } => collect_accesses(expr, out),
        ExprKind::BuiltIn { args, .. } | ExprKind::Apply { args, .. } => {
            for a in args {
                collect_accesses(a, out);
            }
        }
        _ => {}
    }
}

/// Check whether any bare identifier in value position names an iterator.
fn rhs_uses_iterator_value(e: &Expr, iterators: &HashSet<String>) -> bool {
    match &e.kind {
        ExprKind::Ident(n) => iterators.contains(n),
        ExprKind::Access { .. } => false, // indices are handled by maps
        ExprKind::Binary { left, right, .. } => {
            rhs_uses_iterator_value(left, iterators) || rhs_uses_iterator_value(right, iterators)
        }
        ExprKind::Unary { operand, .. } => rhs_uses_iterator_value(operand, iterators),
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            rhs_uses_iterator_value(condition, iterators)
                || rhs_uses_iterator_value(then_expr, iterators)
                || rhs_uses_iterator_value(else_expr, iterators)
        }
        ExprKind::Cast { expr, .. } => rhs_uses_iterator_value(expr, iterators),
        ExprKind::BuiltIn { args, .. } => {
            args.iter().any(|a| rhs_uses_iterator_value(a, iterators))
        }
        _ => false,
    }
}

/// Structural fingerprint of one access, for read deduplication.
fn access_key(tensor: &str, args: &[Expr]) -> String {
    let mut key = String::from(tensor);
    for a in args {
        key.push('[');
        expr_fingerprint(a, &mut key);
        key.push(']');
    }
    key
}

fn expr_fingerprint(e: &Expr, out: &mut String) {
    match &e.kind {
        ExprKind::Ident(n) => out.push_str(n),
        ExprKind::Const { value, .. } => out.push_str(&value.to_string()),
        ExprKind::Binary { op, left, right } => {
            out.push('(');
            expr_fingerprint(left, out);
            out.push_str(&op.to_string());
            expr_fingerprint(right, out);
            out.push(')');
        }
        ExprKind::Unary { operand, .. } => {
            out.push_str("(-");
            expr_fingerprint(operand, out);
            out.push(')');
        }
        other => out.push_str(&format!("{:?}", other)),
    }
}

/// Build the RHS inside a structured body: each access reads its block
/// argument instead of issuing a load.
fn build_region_expr(
    b: &mut FuncBuilder,
    e: &Expr,
    access_slots: &HashMap<String, usize>,
    inputs: &[Value],
    symtab: &HashMap<String, Value>,
) -> Result<Value, IrError> {
    match &e.kind {
        ExprKind::Access { name, args } => {
            let key = access_key(&name.name, args);
            match access_slots.get(&key) {
                Some(slot) => Ok(inputs[*slot]),
                None => Err(IrError::at(
                    IrErrorKind::UnsupportedConstruct,
                    format!("no structured operand for access to '{}'", name.name),
                    name.range.clone(),
                )),
            }
        }
        ExprKind::Const { value, kind } => {
            build_constant(b, *value, TypeInfo::from(*kind), &e.range)
        }
        ExprKind::Ident(n) => match symtab.get(n) {
            Some(v) => Ok(*v),
            None => Err(IrError::at(
                IrErrorKind::UnsupportedConstruct,
                format!("no value for '{}'", n),
                e.range.clone(),
            )),
        },
        ExprKind::Binary { op, left, right } => {
            let l = build_region_expr(b, left, access_slots, inputs, symtab)?;
            let r = build_region_expr(b, right, access_slots, inputs, symtab)?;
            build_binary(b, *op, l, r, &e.range)
        }
        ExprKind::Unary { op, operand } => {
            let v = build_region_expr(b, operand, access_slots, inputs, symtab)?;
            build_unary(b, *op, v, &e.range)
        }
        ExprKind::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            let c = build_region_expr(b, condition, access_slots, inputs, symtab)?;
            let t = build_region_expr(b, then_expr, access_slots, inputs, symtab)?;
            let e_val = build_region_expr(b, else_expr, access_slots, inputs, symtab)?;
            let (t, e_val) = align_values(b, t, e_val, &e.range)?;
            Ok(b.select(c, t, e_val))
        }
        ExprKind::Cast { expr, kind } => {
            let v = build_region_expr(b, expr, access_slots, inputs, symtab)?;
            let target = scalar_type_of(TypeInfo::from(*kind))
                .map_err(|err| err_with_range(err, &e.range))?;
            convert_value(b, v, target, &e.range)
        }
        _ => Err(IrError::at(
            IrErrorKind::UnsupportedConstruct,
            "unsupported expression in structured body",
            e.range.clone(),
        )),
    }
}

fn err_with_range(mut e: IrError, range: &crate::utils::location::SourceRange) -> IrError {
    if e.range.is_none() {
        e.range = Some(range.clone());
    }
    e
}

/// Materialize a constant of the given frontend type.
fn build_constant(
    b: &mut FuncBuilder,
    value: ConstValue,
    ti: TypeInfo,
    range: &crate::utils::location::SourceRange,
) -> Result<Value, IrError> {
    let ty = scalar_type_of(ti).map_err(|e| {
        err_with_range(
            IrError::new(IrErrorKind::UnsupportedConstant, e.message),
            range,
        )
    })?;
    match ty {
        ScalarType::Float(kind) => {
            let v = match value {
                ConstValue::Float(f) => f,
                ConstValue::Int(i) => i as f64,
            };
            Ok(b.const_float(v, kind))
        }
        ScalarType::Int(_) => {
            let v = match value {
                ConstValue::Int(i) => i,
                ConstValue::Float(f) => f as i64,
            };
            Ok(b.const_int(v, ty))
        }
    }
}

/// Losslessly convert `v` to the given element type: float widening,
/// signed integer widening, or integer-to-float when the width fits the
/// mantissa. Anything else is a fatal error.
fn convert_value(
    b: &mut FuncBuilder,
    v: Value,
    to: ScalarType,
    range: &crate::utils::location::SourceRange,
) -> Result<Value, IrError> {
    let from = match b.value_type(v) {
        IrType::Scalar(s) => s,
        other => {
            return Err(IrError::at(
                IrErrorKind::UnsupportedConversion,
                format!("cannot convert {} to {}", other, to),
                range.clone(),
            ))
        }
    };
    if from == to {
        return Ok(v);
    }
    match (from, to) {
        (ScalarType::Float(a), ScalarType::Float(t)) if t.bits() > a.bits() => {
            Ok(b.ext_f(v, t))
        }
        (ScalarType::Int(a), ScalarType::Int(t)) if t > a => Ok(b.ext_si(v, t)),
        (ScalarType::Int(a), ScalarType::Float(t)) if a <= t.mantissa_bits() => {
            Ok(b.si_to_fp(v, t))
        }
        _ => Err(IrError::at(
            IrErrorKind::UnsupportedConversion,
            format!("unsupported conversion for aligning operand types: {} to {}", from, to),
            range.clone(),
        )),
    }
}

/// Align two operand values to their unified type with lossless
/// conversions only.
fn align_values(
    b: &mut FuncBuilder,
    l: Value,
    r: Value,
    range: &crate::utils::location::SourceRange,
) -> Result<(Value, Value), IrError> {
    let lt = b.value_type(l);
    let rt = b.value_type(r);
    if lt == rt {
        return Ok((l, r));
    }
    let (ls, rs) = match (lt, rt) {
        (IrType::Scalar(a), IrType::Scalar(c)) => (a, c),
        _ => {
            return Err(IrError::at(
                IrErrorKind::UnsupportedConversion,
                format!("operands for binary expression have different types: {} and {}", lt, rt),
                range.clone(),
            ))
        }
    };
    let unified = unify_scalars(ls, rs).ok_or_else(|| {
        IrError::at(
            IrErrorKind::UnsupportedConversion,
            format!("unsupported conversion for aligning operand types: {} and {}", ls, rs),
            range.clone(),
        )
    })?;
    let l = convert_value(b, l, unified, range)?;
    let r = convert_value(b, r, unified, range)?;
    Ok((l, r))
}

fn unify_scalars(a: ScalarType, b: ScalarType) -> Option<ScalarType> {
    match (a, b) {
        (ScalarType::Float(x), ScalarType::Float(y)) => {
            Some(ScalarType::Float(if x.bits() >= y.bits() { x } else { y }))
        }
        (ScalarType::Int(x), ScalarType::Int(y)) => Some(ScalarType::Int(x.max(y))),
        (ScalarType::Int(x), ScalarType::Float(y)) | (ScalarType::Float(y), ScalarType::Int(x)) => {
            if x <= y.mantissa_bits() {
                Some(ScalarType::Float(y))
            } else {
                None
            }
        }
    }
}

fn build_binary(
    b: &mut FuncBuilder,
    op: BinaryOp,
    l: Value,
    r: Value,
    range: &crate::utils::location::SourceRange,
) -> Result<Value, IrError> {
    let (l, r) = align_values(b, l, r, range)?;
    let is_float = matches!(b.value_type(l), IrType::Scalar(ScalarType::Float(_)));
    match op {
        BinaryOp::Add => Ok(b.arith(ArithOp::Add, l, r)),
        BinaryOp::Sub => Ok(b.arith(ArithOp::Sub, l, r)),
        BinaryOp::Mul => Ok(b.arith(ArithOp::Mul, l, r)),
        BinaryOp::Div => Ok(b.arith(ArithOp::Div, l, r)),
        BinaryOp::Mod => {
            if is_float {
                Err(IrError::at(
                    IrErrorKind::UnsupportedConstruct,
                    "'%' is not supported for float operands",
                    range.clone(),
                ))
            } else {
                Ok(b.arith(ArithOp::Rem, l, r))
            }
        }
        // min/max become a compare plus select.
        BinaryOp::Min => {
            let c = b.cmp(CmpPred::Lt, l, r);
            Ok(b.select(c, l, r))
        }
        BinaryOp::Max => {
            let c = b.cmp(CmpPred::Gt, l, r);
            Ok(b.select(c, l, r))
        }
        BinaryOp::Eq => Ok(b.cmp(CmpPred::Eq, l, r)),
        BinaryOp::Ne => Ok(b.cmp(CmpPred::Ne, l, r)),
        BinaryOp::Lt => Ok(b.cmp(CmpPred::Lt, l, r)),
        BinaryOp::Le => Ok(b.cmp(CmpPred::Le, l, r)),
        BinaryOp::Gt => Ok(b.cmp(CmpPred::Gt, l, r)),
        BinaryOp::Ge => Ok(b.cmp(CmpPred::Ge, l, r)),
        // Logical connectives on i1 values lower to selects.
        BinaryOp::And => {
            let f = b.const_int(0, ScalarType::bool_type());
            Ok(b.select(l, r, f))
        }
        BinaryOp::Or => {
            let t = b.const_int(1, ScalarType::bool_type());
            Ok(b.select(l, t, r))
        }
    }
}

fn build_unary(
    b: &mut FuncBuilder,
    op: UnaryOp,
    v: Value,
    range: &crate::utils::location::SourceRange,
) -> Result<Value, IrError> {
    match op {
        UnaryOp::Neg => match b.value_type(v) {
            IrType::Scalar(ScalarType::Float(kind)) => {
                let zero = b.const_float(0.0, kind);
                Ok(b.arith(ArithOp::Sub, zero, v))
            }
            IrType::Scalar(ty @ ScalarType::Int(_)) => {
                let zero = b.const_int(0, ty);
                Ok(b.arith(ArithOp::Sub, zero, v))
            }
            other => Err(IrError::at(
                IrErrorKind::UnsupportedConstruct,
                format!("cannot negate a value of type {}", other),
                range.clone(),
            )),
        },
        UnaryOp::Not => {
            let zero = b.const_int(0, ScalarType::bool_type());
            Ok(b.cmp(CmpPred::Eq, v, zero))
        }
    }
}
