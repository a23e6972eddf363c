//! The tensor IR and its builder.
//!
//! The IR is a tree of operations: straight-line operations, `for` loops
//! with a body region, and structured `generic` reductions with an
//! element-typed body region. Values are function-local and typed; the
//! builder owns the function under construction and an insertion path into
//! its nested regions. Every helper that opens a region restores the
//! previous insertion point on all exit paths by construction.

use crate::ir::affine::AffineMap;
use crate::ir::types::{FloatKind, IrType, ScalarType};
use crate::utils::errors::{IrError, IrErrorKind};
use std::fmt;

/// A function-local SSA value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(pub u32);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "lt",
            CmpPred::Le => "le",
            CmpPred::Gt => "gt",
            CmpPred::Ge => "ge",
        };
        write!(f, "{}", s)
    }
}

/// Arithmetic operations; the `float` flag on the op selects the float or
/// integer variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Parallel or reduction tag of one iteration dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterKind {
    Parallel,
    Reduction,
}

impl fmt::Display for IterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterKind::Parallel => write!(f, "parallel"),
            IterKind::Reduction => write!(f, "reduction"),
        }
    }
}

/// The operation set of the IR.
#[derive(Debug, Clone)]
pub enum OpKind {
    ConstInt { value: i64, ty: ScalarType },
    ConstFloat { value: f64, kind: FloatKind },
    ConstIndex { value: i64 },
    Arith { op: ArithOp, float: bool },
    Cmp { pred: CmpPred, float: bool },
    /// `select(cond, a, b)`.
    Select,
    /// `load(memref, indices...)`.
    Load,
    /// `store(value, memref, indices...)`.
    Store,
    /// Broadcast a scalar into every element: `fill(value, memref)`.
    Fill,
    /// `subview(memref, offsets..., sizes...)` with unit strides.
    SubView,
    /// Extent of one memref dimension, as an index value.
    Dim { index: usize },
    /// Bounded loop `[lo, hi)` with step 1; the region argument is the
    /// induction variable.
    For,
    /// Structured reduction with one affine map per operand and one
    /// parallel/reduction tag per iteration dimension. The region receives
    /// one element-typed argument per operand and yields the combined
    /// output element.
    Generic {
        indexing_maps: Vec<AffineMap>,
        iterator_types: Vec<IterKind>,
    },
    /// Specialized `C += A * B`.
    Matmul,
    /// Specialized `y += A * x`.
    Matvec,
    /// Float widening.
    ExtF,
    /// Signed integer widening.
    ExtSI,
    /// Signed integer to float.
    SIToFP,
    /// Integer to index.
    IndexCast,
    Yield,
    Return,
}

/// One operation.
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub operands: Vec<Value>,
    pub results: Vec<Value>,
    pub regions: Vec<Region>,
}

/// A region: block arguments plus a list of operations.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub args: Vec<Value>,
    pub ops: Vec<Op>,
}

/// A function with typed parameters and a body region.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub param_types: Vec<IrType>,
    pub body: Region,
    value_types: Vec<IrType>,
}

impl Function {
    /// The type of a value.
    pub fn value_type(&self, v: Value) -> IrType {
        self.value_types[v.0 as usize]
    }

    /// The function parameters as values.
    pub fn params(&self) -> &[Value] {
        &self.body.args
    }
}

/// A module: a list of functions.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn push(&mut self, f: Function) {
        self.functions.push(f);
    }
}

/// Builder for one function.
pub struct FuncBuilder {
    func: Function,
    /// Insertion path: (operation index, region index) pairs from the body.
    path: Vec<(usize, usize)>,
}

impl FuncBuilder {
    /// Create a builder; the function parameters become the body's block
    /// arguments.
    pub fn new(name: impl Into<String>, param_types: Vec<IrType>) -> Self {
        let mut func = Function {
            name: name.into(),
            param_types: param_types.clone(),
            body: Region::default(),
            value_types: Vec::new(),
        };
        for ty in param_types {
            let v = Value(func.value_types.len() as u32);
            func.value_types.push(ty);
            func.body.args.push(v);
        }
        Self {
            func,
            path: Vec::new(),
        }
    }

    /// The function parameters as values.
    pub fn params(&self) -> Vec<Value> {
        self.func.body.args.clone()
    }

    /// The type of a value.
    pub fn value_type(&self, v: Value) -> IrType {
        self.func.value_type(v)
    }

    /// The element type of a memref value.
    pub fn elem_type(&self, v: Value) -> Result<ScalarType, IrError> {
        self.value_type(v).elem().ok_or_else(|| {
            IrError::new(
                IrErrorKind::Verification,
                "expected a memref value".to_string(),
            )
        })
    }

    fn new_value(&mut self, ty: IrType) -> Value {
        let v = Value(self.func.value_types.len() as u32);
        self.func.value_types.push(ty);
        v
    }

    fn current_region_mut(&mut self) -> &mut Region {
        let mut region = &mut self.func.body;
        for (op_idx, region_idx) in &self.path {
            region = &mut region.ops[*op_idx].regions[*region_idx];
        }
        region
    }

    fn push_op(&mut self, kind: OpKind, operands: Vec<Value>, result: Option<IrType>) -> Option<Value> {
        let result = result.map(|ty| self.new_value(ty));
        self.current_region_mut().ops.push(Op {
            kind,
            operands,
            results: result.into_iter().collect(),
            regions: Vec::new(),
        });
        result
    }

    fn push_op_with_result(
        &mut self,
        kind: OpKind,
        operands: Vec<Value>,
        result: IrType,
    ) -> Value {
        // push_op always returns a value when a result type is supplied.
        match self.push_op(kind, operands, Some(result)) {
            Some(v) => v,
            None => Value(u32::MAX),
        }
    }

    /// Integer constant of the given type.
    pub fn const_int(&mut self, value: i64, ty: ScalarType) -> Value {
        self.push_op_with_result(OpKind::ConstInt { value, ty }, vec![], IrType::Scalar(ty))
    }

    /// Float constant with the format's IEEE semantics.
    pub fn const_float(&mut self, value: f64, kind: FloatKind) -> Value {
        self.push_op_with_result(
            OpKind::ConstFloat { value, kind },
            vec![],
            IrType::Scalar(ScalarType::Float(kind)),
        )
    }

    /// Index constant.
    pub fn const_index(&mut self, value: i64) -> Value {
        self.push_op_with_result(OpKind::ConstIndex { value }, vec![], IrType::Index)
    }

    /// Binary arithmetic; the result has the type of `l`.
    pub fn arith(&mut self, op: ArithOp, l: Value, r: Value) -> Value {
        let ty = self.value_type(l);
        let float = matches!(ty, IrType::Scalar(ScalarType::Float(_)));
        self.push_op_with_result(OpKind::Arith { op, float }, vec![l, r], ty)
    }

    /// Comparison; result is `i1`.
    pub fn cmp(&mut self, pred: CmpPred, l: Value, r: Value) -> Value {
        let float = matches!(self.value_type(l), IrType::Scalar(ScalarType::Float(_)));
        self.push_op_with_result(
            OpKind::Cmp { pred, float },
            vec![l, r],
            IrType::Scalar(ScalarType::bool_type()),
        )
    }

    /// `select(cond, a, b)`; the result has the type of `a`.
    pub fn select(&mut self, cond: Value, a: Value, b: Value) -> Value {
        let ty = self.value_type(a);
        self.push_op_with_result(OpKind::Select, vec![cond, a, b], ty)
    }

    /// Load one element.
    pub fn load(&mut self, memref: Value, indices: &[Value]) -> Result<Value, IrError> {
        let elem = self.elem_type(memref)?;
        let mut operands = vec![memref];
        operands.extend_from_slice(indices);
        Ok(self.push_op_with_result(OpKind::Load, operands, IrType::Scalar(elem)))
    }

    /// Store one element.
    pub fn store(&mut self, value: Value, memref: Value, indices: &[Value]) {
        let mut operands = vec![value, memref];
        operands.extend_from_slice(indices);
        self.push_op(OpKind::Store, operands, None);
    }

    /// Broadcast a scalar into every element of a memref.
    pub fn fill(&mut self, value: Value, memref: Value) {
        self.push_op(OpKind::Fill, vec![value, memref], None);
    }

    /// Sub-view with the given offsets and sizes and unit strides.
    pub fn subview(
        &mut self,
        memref: Value,
        offsets: &[Value],
        sizes: &[Value],
    ) -> Result<Value, IrError> {
        let ty = self.value_type(memref);
        let mut operands = vec![memref];
        operands.extend_from_slice(offsets);
        operands.extend_from_slice(sizes);
        match ty {
            IrType::MemRef { .. } => Ok(self.push_op_with_result(OpKind::SubView, operands, ty)),
            _ => Err(IrError::new(
                IrErrorKind::Verification,
                "subview of a non-memref value",
            )),
        }
    }

    /// The extent of one dimension, as an index value.
    pub fn dim(&mut self, memref: Value, index: usize) -> Value {
        self.push_op_with_result(OpKind::Dim { index }, vec![memref], IrType::Index)
    }

    /// Specialized matrix multiplication `c += a * b`.
    pub fn matmul(&mut self, a: Value, b: Value, c: Value) {
        self.push_op(OpKind::Matmul, vec![a, b, c], None);
    }

    /// Specialized matrix-vector product `y += a * x`.
    pub fn matvec(&mut self, a: Value, x: Value, y: Value) {
        self.push_op(OpKind::Matvec, vec![a, x, y], None);
    }

    /// Widen a float value.
    pub fn ext_f(&mut self, v: Value, to: FloatKind) -> Value {
        self.push_op_with_result(OpKind::ExtF, vec![v], IrType::Scalar(ScalarType::Float(to)))
    }

    /// Widen a signed integer value.
    pub fn ext_si(&mut self, v: Value, to_bits: u8) -> Value {
        self.push_op_with_result(OpKind::ExtSI, vec![v], IrType::Scalar(ScalarType::Int(to_bits)))
    }

    /// Convert a signed integer to float.
    pub fn si_to_fp(&mut self, v: Value, to: FloatKind) -> Value {
        self.push_op_with_result(
            OpKind::SIToFP,
            vec![v],
            IrType::Scalar(ScalarType::Float(to)),
        )
    }

    /// Convert an integer value to index type.
    pub fn index_cast(&mut self, v: Value) -> Value {
        self.push_op_with_result(OpKind::IndexCast, vec![v], IrType::Index)
    }

    /// Build a `[lo, hi)` loop; the closure receives the induction value.
    /// The insertion point is restored when the closure returns, on every
    /// exit path.
    pub fn build_loop<F>(&mut self, lo: Value, hi: Value, f: F) -> Result<(), IrError>
    where
        F: FnOnce(&mut Self, Value) -> Result<(), IrError>,
    {
        let induction = self.new_value(IrType::Index);
        let region = Region {
            args: vec![induction],
            ops: Vec::new(),
        };
        let current = self.current_region_mut();
        current.ops.push(Op {
            kind: OpKind::For,
            operands: vec![lo, hi],
            results: vec![],
            regions: vec![region],
        });
        let op_idx = current.ops.len() - 1;

        self.path.push((op_idx, 0));
        let result = f(self, induction);
        self.path.pop();
        result
    }

    /// Build a structured reduction. The closure receives one element
    /// value per operand (inputs, then the output) and returns the value
    /// to yield. The insertion point is restored on every exit path.
    pub fn build_generic<F>(
        &mut self,
        inputs: &[Value],
        output: Value,
        indexing_maps: Vec<AffineMap>,
        iterator_types: Vec<IterKind>,
        f: F,
    ) -> Result<(), IrError>
    where
        F: FnOnce(&mut Self, &[Value]) -> Result<Value, IrError>,
    {
        let mut args = Vec::new();
        for operand in inputs.iter().chain(std::iter::once(&output)) {
            let elem = self.elem_type(*operand)?;
            let v = self.new_value(IrType::Scalar(elem));
            args.push(v);
        }

        let region = Region {
            args: args.clone(),
            ops: Vec::new(),
        };
        let mut operands = inputs.to_vec();
        operands.push(output);
        let current = self.current_region_mut();
        current.ops.push(Op {
            kind: OpKind::Generic {
                indexing_maps,
                iterator_types,
            },
            operands,
            results: vec![],
            regions: vec![region],
        });
        let op_idx = current.ops.len() - 1;

        self.path.push((op_idx, 0));
        let result = f(self, &args);
        let result = match result {
            Ok(value) => {
                self.push_op(OpKind::Yield, vec![value], None);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.path.pop();
        result
    }

    /// Terminate and return the finished function.
    pub fn finish(mut self) -> Function {
        self.push_op(OpKind::Return, vec![], None);
        self.func
    }
}

impl Module {
    /// Structural verification of every function.
    pub fn verify(&self) -> Result<(), IrError> {
        for func in &self.functions {
            verify_region(func, &func.body, true)?;
        }
        Ok(())
    }
}

fn verify_err(func: &Function, msg: String) -> IrError {
    IrError::new(
        IrErrorKind::Verification,
        format!("function '{}': {}", func.name, msg),
    )
}

fn verify_region(func: &Function, region: &Region, is_body: bool) -> Result<(), IrError> {
    for op in &region.ops {
        verify_op(func, op)?;
        for nested in &op.regions {
            verify_region(func, nested, false)?;
        }
    }
    if is_body {
        match region.ops.last() {
            Some(op) if matches!(op.kind, OpKind::Return) => {}
            _ => return Err(verify_err(func, "missing terminator".to_string())),
        }
    }
    Ok(())
}

fn verify_op(func: &Function, op: &Op) -> Result<(), IrError> {
    let operand_ty = |i: usize| func.value_type(op.operands[i]);
    match &op.kind {
        OpKind::Arith { float, .. } => {
            if op.operands.len() != 2 {
                return Err(verify_err(func, "arith needs two operands".into()));
            }
            let (l, r) = (operand_ty(0), operand_ty(1));
            if l != r {
                return Err(verify_err(
                    func,
                    format!("arith operand types differ: {} vs {}", l, r),
                ));
            }
            let is_float = matches!(l, IrType::Scalar(ScalarType::Float(_)));
            if is_float != *float {
                return Err(verify_err(func, "arith float flag mismatch".into()));
            }
        }
        OpKind::Cmp { .. } | OpKind::Select => {
            let want = if matches!(op.kind, OpKind::Select) { 3 } else { 2 };
            if op.operands.len() != want {
                return Err(verify_err(func, "wrong operand count".into()));
            }
        }
        OpKind::Load => {
            let ty = operand_ty(0);
            let rank = ty
                .rank()
                .ok_or_else(|| verify_err(func, "load from non-memref".into()))?;
            if op.operands.len() != 1 + rank {
                return Err(verify_err(func, "load index count != rank".into()));
            }
            for i in 1..op.operands.len() {
                if !operand_ty(i).is_index() {
                    return Err(verify_err(func, "load index is not index-typed".into()));
                }
            }
            if let (Some(elem), Some(res)) = (ty.elem(), op.results.first()) {
                if func.value_type(*res) != IrType::Scalar(elem) {
                    return Err(verify_err(func, "load result type mismatch".into()));
                }
            }
        }
        OpKind::Store => {
            let ty = operand_ty(1);
            let rank = ty
                .rank()
                .ok_or_else(|| verify_err(func, "store to non-memref".into()))?;
            if op.operands.len() != 2 + rank {
                return Err(verify_err(func, "store index count != rank".into()));
            }
            let elem = ty.elem().unwrap_or(ScalarType::Int(0));
            if operand_ty(0) != IrType::Scalar(elem) {
                return Err(verify_err(
                    func,
                    format!(
                        "assignment of a value of type {} to an element of type {}",
                        operand_ty(0),
                        elem
                    ),
                ));
            }
        }
        OpKind::Fill => {
            let elem = operand_ty(1)
                .elem()
                .ok_or_else(|| verify_err(func, "fill of non-memref".into()))?;
            if operand_ty(0) != IrType::Scalar(elem) {
                return Err(verify_err(func, "fill value type mismatch".into()));
            }
        }
        OpKind::SubView => {
            let rank = operand_ty(0)
                .rank()
                .ok_or_else(|| verify_err(func, "subview of non-memref".into()))?;
            if op.operands.len() != 1 + 2 * rank {
                return Err(verify_err(func, "subview operand count".into()));
            }
        }
        OpKind::Dim { index } => {
            let rank = operand_ty(0)
                .rank()
                .ok_or_else(|| verify_err(func, "dim of non-memref".into()))?;
            if *index >= rank {
                return Err(verify_err(func, "dim index out of range".into()));
            }
        }
        OpKind::For => {
            if op.operands.len() != 2
                || !operand_ty(0).is_index()
                || !operand_ty(1).is_index()
            {
                return Err(verify_err(func, "for bounds must be index-typed".into()));
            }
            let region = op
                .regions
                .first()
                .ok_or_else(|| verify_err(func, "for without body".into()))?;
            if region.args.len() != 1 {
                return Err(verify_err(func, "for needs one induction argument".into()));
            }
        }
        OpKind::Generic {
            indexing_maps,
            iterator_types,
        } => {
            if indexing_maps.len() != op.operands.len() {
                return Err(verify_err(func, "one indexing map per operand".into()));
            }
            for m in indexing_maps {
                if m.num_dims != iterator_types.len() {
                    return Err(verify_err(
                        func,
                        "indexing map dimension count mismatch".into(),
                    ));
                }
            }
            let region = op
                .regions
                .first()
                .ok_or_else(|| verify_err(func, "generic without body".into()))?;
            if region.args.len() != op.operands.len() {
                return Err(verify_err(
                    func,
                    "generic needs one block argument per operand".into(),
                ));
            }
            match region.ops.last() {
                Some(last) if matches!(last.kind, OpKind::Yield) && last.operands.len() == 1 => {
                    let yielded = func.value_type(last.operands[0]);
                    let out_elem = operand_ty(op.operands.len() - 1)
                        .elem()
                        .ok_or_else(|| verify_err(func, "generic output not memref".into()))?;
                    if yielded != IrType::Scalar(out_elem) {
                        return Err(verify_err(func, "generic yield type mismatch".into()));
                    }
                }
                _ => return Err(verify_err(func, "generic body must end in yield".into())),
            }
        }
        OpKind::Matmul => {
            if op.operands.len() != 3 {
                return Err(verify_err(func, "matmul needs three operands".into()));
            }
            for i in 0..3 {
                if operand_ty(i).rank() != Some(2) {
                    return Err(verify_err(func, "matmul operands must be rank 2".into()));
                }
            }
        }
        OpKind::Matvec => {
            let ranks: Vec<_> = (0..op.operands.len()).map(|i| operand_ty(i).rank()).collect();
            if ranks != vec![Some(2), Some(1), Some(1)] {
                return Err(verify_err(func, "matvec operand ranks must be 2, 1, 1".into()));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_memref(rank: usize) -> IrType {
        IrType::MemRef {
            elem: ScalarType::Float(FloatKind::F32),
            rank,
        }
    }

    #[test]
    fn test_loop_nest_and_verify() {
        let mut b = FuncBuilder::new("copy", vec![f32_memref(1), f32_memref(1)]);
        let params = b.params();
        let lo = b.const_index(0);
        let hi = b.dim(params[0], 0);
        b.build_loop(lo, hi, |b, i| {
            let v = b.load(params[0], &[i])?;
            b.store(v, params[1], &[i]);
            Ok(())
        })
        .unwrap();
        let func = b.finish();

        let mut module = Module::default();
        module.push(func);
        module.verify().unwrap();
    }

    #[test]
    fn test_insertion_point_restored() {
        let mut b = FuncBuilder::new("f", vec![f32_memref(1)]);
        let params = b.params();
        let lo = b.const_index(0);
        let hi = b.dim(params[0], 0);
        b.build_loop(lo, hi, |_, _| Ok(())).unwrap();
        // This op must land after the loop, in the function body.
        b.const_index(7);
        let func = b.finish();

        assert_eq!(func.body.ops.len(), 5); // lo, dim, for, const, return
        assert!(matches!(func.body.ops[2].kind, OpKind::For));
        assert!(matches!(
            func.body.ops[3].kind,
            OpKind::ConstIndex { value: 7 }
        ));
    }

    #[test]
    fn test_insertion_point_restored_on_error() {
        let mut b = FuncBuilder::new("f", vec![f32_memref(1)]);
        let params = b.params();
        let lo = b.const_index(0);
        let hi = b.dim(params[0], 0);
        let err = b.build_loop(lo, hi, |_, _| {
            Err(IrError::new(IrErrorKind::UnsupportedConstruct, "boom"))
        });
        assert!(err.is_err());
        b.const_index(1);
        let func = b.finish();
        // The constant is outside the loop body.
        assert!(matches!(
            func.body.ops[3].kind,
            OpKind::ConstIndex { value: 1 }
        ));
    }

    #[test]
    fn test_generic_region_and_yield() {
        let mut b = FuncBuilder::new("gen", vec![f32_memref(2), f32_memref(2), f32_memref(2)]);
        let p = b.params();
        let maps = vec![
            AffineMap::identity(3),
            AffineMap::identity(3),
            AffineMap::identity(3),
        ];
        let iters = vec![IterKind::Parallel, IterKind::Parallel, IterKind::Reduction];
        b.build_generic(&[p[0], p[1]], p[2], maps, iters, |b, args| {
            let prod = b.arith(ArithOp::Mul, args[0], args[1]);
            Ok(b.arith(ArithOp::Add, args[2], prod))
        })
        .unwrap();
        let func = b.finish();

        let mut module = Module::default();
        module.push(func);
        // Identity maps have 3 results for rank-2 operands, which the
        // verifier does not model; only dimension counts are checked.
        module.verify().unwrap();
    }

    #[test]
    fn test_verify_rejects_bad_store() {
        let mut b = FuncBuilder::new("bad", vec![f32_memref(1)]);
        let p = b.params();
        let c = b.const_int(1, ScalarType::Int(32));
        let i = b.const_index(0);
        b.store(c, p[0], &[i]);
        let func = b.finish();

        let mut module = Module::default();
        module.push(func);
        let err = module.verify().unwrap_err();
        assert!(err.message.contains("assignment of a value of type i32"));
    }

    #[test]
    fn test_verify_rejects_matvec_rank() {
        let mut b = FuncBuilder::new("bad", vec![f32_memref(2), f32_memref(2), f32_memref(1)]);
        let p = b.params();
        b.matvec(p[0], p[1], p[2]);
        let func = b.finish();

        let mut module = Module::default();
        module.push(func);
        assert!(module.verify().is_err());
    }

    #[test]
    fn test_value_types() {
        let mut b = FuncBuilder::new("t", vec![]);
        let c = b.const_float(1.5, FloatKind::F64);
        assert_eq!(
            b.value_type(c),
            IrType::Scalar(ScalarType::Float(FloatKind::F64))
        );
        let i = b.const_index(3);
        assert_eq!(b.value_type(i), IrType::Index);
    }
}
