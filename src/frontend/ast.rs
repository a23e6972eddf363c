//! Abstract syntax tree for TC kernels.
//!
//! The parser produces `Apply` nodes for every call-shaped expression;
//! semantic analysis rewrites them into `Access` (tensor reads) or
//! `BuiltIn` nodes and attaches a scalar type to every expression.

use crate::inference::ranges::InferenceProblem;
use crate::utils::location::SourceRange;
use std::fmt;

/// Scalar types of the surface language.
///
/// `float` and `double` normalize to `Float32`/`Float64` at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    SizeT,
    Float16,
    Float32,
    Float64,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::UInt8 => "uint8",
            ScalarKind::UInt16 => "uint16",
            ScalarKind::UInt32 => "uint32",
            ScalarKind::UInt64 => "uint64",
            ScalarKind::Int8 => "int8",
            ScalarKind::Int16 => "int16",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::SizeT => "size_t",
            ScalarKind::Float16 => "float16",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
        };
        write!(f, "{}", s)
    }
}

/// The family of a scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Int,
    UInt,
    Float,
}

/// A scalar type reduced to its family and bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    code: TypeCode,
    bits: u8,
}

impl TypeInfo {
    pub fn new(code: TypeCode, bits: u8) -> Self {
        Self { code, bits }
    }

    pub fn code(&self) -> TypeCode {
        self.code
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn is_float(&self) -> bool {
        self.code == TypeCode::Float
    }

    pub fn is_uint(&self) -> bool {
        self.code == TypeCode::UInt
    }

    /// The boolean type (modeled as a 1-bit unsigned integer).
    pub fn bool_type() -> Self {
        Self::new(TypeCode::UInt, 1)
    }

    /// The type of index expressions.
    pub fn index_type() -> Self {
        Self::new(TypeCode::Int, 32)
    }

    /// The default floating point type.
    pub fn float_type() -> Self {
        Self::new(TypeCode::Float, 32)
    }
}

impl From<ScalarKind> for TypeInfo {
    fn from(kind: ScalarKind) -> Self {
        use ScalarKind::*;
        match kind {
            Bool => TypeInfo::new(TypeCode::UInt, 1),
            UInt8 => TypeInfo::new(TypeCode::UInt, 8),
            UInt16 => TypeInfo::new(TypeCode::UInt, 16),
            UInt32 => TypeInfo::new(TypeCode::UInt, 32),
            UInt64 => TypeInfo::new(TypeCode::UInt, 64),
            Int8 => TypeInfo::new(TypeCode::Int, 8),
            Int16 => TypeInfo::new(TypeCode::Int, 16),
            Int32 => TypeInfo::new(TypeCode::Int, 32),
            Int64 => TypeInfo::new(TypeCode::Int, 64),
            SizeT => TypeInfo::new(TypeCode::UInt, 64),
            Float16 => TypeInfo::new(TypeCode::Float, 16),
            Float32 => TypeInfo::new(TypeCode::Float, 32),
            Float64 => TypeInfo::new(TypeCode::Float, 64),
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.code {
            TypeCode::Int => "i",
            TypeCode::UInt => "u",
            TypeCode::Float => "f",
        };
        write!(f, "{}{}", prefix, self.bits)
    }
}

/// Promote two scalar types to their common type.
///
/// Float wins over any integer; within floats and unsigned integers the
/// wider type wins; mixing signed and unsigned integers yields a signed
/// integer of the maximum width.
pub fn match_types(a: TypeInfo, b: TypeInfo) -> TypeInfo {
    if a == b {
        return a;
    }
    if !a.is_float() && b.is_float() {
        b
    } else if a.is_float() && !b.is_float() {
        a
    } else if a.is_float() && b.is_float() {
        if a.bits() > b.bits() {
            a
        } else {
            b
        }
    } else if a.is_uint() && b.is_uint() {
        if a.bits() > b.bits() {
            a
        } else {
            b
        }
    } else {
        TypeInfo::new(TypeCode::Int, a.bits().max(b.bits()))
    }
}

/// An identifier with its source range.
#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    pub range: SourceRange,
}

impl Ident {
    pub fn new(name: impl Into<String>, range: SourceRange) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }
}

/// A tensor dimension: either a size symbol or an integer constant.
#[derive(Debug, Clone)]
pub enum DimExpr {
    Ident(Ident),
    Const { value: i64, range: SourceRange },
}

impl DimExpr {
    pub fn range(&self) -> &SourceRange {
        match self {
            DimExpr::Ident(i) => &i.range,
            DimExpr::Const { range, .. } => range,
        }
    }

    /// The size symbol name, if this dimension is symbolic.
    pub fn name(&self) -> Option<&str> {
        match self {
            DimExpr::Ident(i) => Some(&i.name),
            DimExpr::Const { .. } => None,
        }
    }
}

impl fmt::Display for DimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimExpr::Ident(i) => write!(f, "{}", i.name),
            DimExpr::Const { value, .. } => write!(f, "{}", value),
        }
    }
}

/// A tensor type: a scalar kind plus dimension list (empty for scalars).
#[derive(Debug, Clone)]
pub struct TensorType {
    pub scalar: ScalarKind,
    pub dims: Vec<DimExpr>,
    pub range: SourceRange,
}

impl TensorType {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// A parameter or return value of a kernel.
#[derive(Debug, Clone)]
pub struct Param {
    pub ident: Ident,
    /// `None` when the type is to be inferred (allowed only for returns).
    pub tensor_type: Option<TensorType>,
    pub range: SourceRange,
}

impl Param {
    pub fn type_is_inferred(&self) -> bool {
        self.tensor_type.is_none()
    }
}

/// Comprehension assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    PlusEq,
    /// `*=`
    TimesEq,
    /// `min=`
    MinEq,
    /// `max=`
    MaxEq,
    /// `+=!`
    PlusEqB,
    /// `*=!`
    TimesEqB,
    /// `min=!`
    MinEqB,
    /// `max=!`
    MaxEqB,
}

impl AssignOp {
    /// All operators except plain `=` contract reduction dimensions.
    pub fn is_reduction(&self) -> bool {
        !matches!(self, AssignOp::Assign)
    }

    /// The `!`-suffixed operators initialize the output to the neutral
    /// element before reducing.
    pub fn is_initializing(&self) -> bool {
        matches!(
            self,
            AssignOp::PlusEqB | AssignOp::TimesEqB | AssignOp::MinEqB | AssignOp::MaxEqB
        )
    }

    /// Reduction operators without the `!` suffix.
    pub fn is_uninitialized_reduction(&self) -> bool {
        matches!(
            self,
            AssignOp::PlusEq | AssignOp::TimesEq | AssignOp::MinEq | AssignOp::MaxEq
        )
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssignOp::Assign => "=",
            AssignOp::PlusEq => "+=",
            AssignOp::TimesEq => "*=",
            AssignOp::MinEq => "min=",
            AssignOp::MaxEq => "max=",
            AssignOp::PlusEqB => "+=!",
            AssignOp::TimesEqB => "*=!",
            AssignOp::MinEqB => "min=!",
            AssignOp::MaxEqB => "max=!",
        };
        write!(f, "{}", s)
    }
}

/// Binary operators in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | Ne | Lt | Le | Gt | Ge)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
}

/// The value of a numeric literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

impl ConstValue {
    /// The value as an unsigned integer, for range inference.
    pub fn as_u64(&self) -> u64 {
        match self {
            ConstValue::Int(i) => *i as u64,
            ConstValue::Float(f) => *f as u64,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            ConstValue::Int(i) => *i == 0,
            ConstValue::Float(f) => *f == 0.0,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(i) => write!(f, "{}", i),
            ConstValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// An expression node with its (post-Sema) scalar type.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    /// Attached by semantic analysis.
    pub ty: Option<TypeInfo>,
    pub range: SourceRange,
}

impl Expr {
    pub fn new(kind: ExprKind, range: SourceRange) -> Self {
        Self {
            kind,
            ty: None,
            range,
        }
    }

    /// The attached type; only valid after semantic analysis.
    pub fn type_info(&self) -> Option<TypeInfo> {
        self.ty
    }
}

/// Expression shapes.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `cond ? t : e`
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Numeric literal.
    Const { value: ConstValue, kind: ScalarKind },
    /// Identifier reference.
    Ident(String),
    /// Call-shaped expression before semantic analysis.
    Apply { name: Ident, args: Vec<Expr> },
    /// Tensor read (post-Sema).
    Access { name: Ident, args: Vec<Expr> },
    /// Built-in function call (post-Sema).
    BuiltIn { name: String, args: Vec<Expr> },
    /// `type(expr)` cast.
    Cast { expr: Box<Expr>, kind: ScalarKind },
    /// Dimension access, e.g. `A.0`.
    Select { name: Ident, dim: usize },
}

/// `i in lo:hi` iterator domain constraint.
#[derive(Debug, Clone)]
pub struct RangeConstraint {
    pub ident: Ident,
    pub start: Expr,
    pub end: Expr,
    pub range: SourceRange,
}

/// `let name = expr` binding inside a `where` clause.
#[derive(Debug, Clone)]
pub struct LetBinding {
    pub name: Ident,
    pub rhs: Expr,
    pub range: SourceRange,
}

/// One clause of a `where` list.
#[derive(Debug, Clone)]
pub enum WhereClause {
    Range(RangeConstraint),
    Let(LetBinding),
    Exists(Expr),
}

/// `<=> name(accesses)` equivalence annotation.
#[derive(Debug, Clone)]
pub struct Equivalent {
    pub name: Ident,
    pub accesses: Vec<Expr>,
    pub range: SourceRange,
}

/// One TC statement assigning into a tensor at indexed positions.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub ident: Ident,
    pub indices: Vec<Ident>,
    pub assignment: AssignOp,
    pub rhs: Expr,
    pub where_clauses: Vec<WhereClause>,
    pub equivalent: Option<Equivalent>,
    /// Reduction variables discovered by semantic analysis, in order of
    /// first use.
    pub reduction_vars: Vec<Ident>,
    /// The per-statement range problem collected by semantic analysis.
    pub ranges: InferenceProblem,
    pub range: SourceRange,
}

/// A kernel definition.
#[derive(Debug, Clone)]
pub struct Def {
    pub name: Ident,
    pub params: Vec<Param>,
    pub returns: Vec<Param>,
    pub statements: Vec<Comprehension>,
    pub range: SourceRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ti(code: TypeCode, bits: u8) -> TypeInfo {
        TypeInfo::new(code, bits)
    }

    #[test]
    fn test_match_types_idempotent() {
        let t = ti(TypeCode::Float, 32);
        assert_eq!(match_types(t, t), t);
    }

    #[test]
    fn test_float_wins_over_int() {
        assert_eq!(
            match_types(ti(TypeCode::Int, 64), ti(TypeCode::Float, 16)),
            ti(TypeCode::Float, 16)
        );
        assert_eq!(
            match_types(ti(TypeCode::Float, 32), ti(TypeCode::UInt, 64)),
            ti(TypeCode::Float, 32)
        );
    }

    #[test]
    fn test_wider_wins_within_family() {
        assert_eq!(
            match_types(ti(TypeCode::Float, 16), ti(TypeCode::Float, 64)),
            ti(TypeCode::Float, 64)
        );
        assert_eq!(
            match_types(ti(TypeCode::UInt, 32), ti(TypeCode::UInt, 8)),
            ti(TypeCode::UInt, 32)
        );
    }

    #[test]
    fn test_int_uint_mix_is_signed() {
        assert_eq!(
            match_types(ti(TypeCode::Int, 16), ti(TypeCode::UInt, 32)),
            ti(TypeCode::Int, 32)
        );
        assert_eq!(
            match_types(ti(TypeCode::UInt, 8), ti(TypeCode::Int, 8)),
            ti(TypeCode::Int, 8)
        );
    }

    #[test]
    fn test_scalar_kind_to_type_info() {
        assert_eq!(TypeInfo::from(ScalarKind::SizeT), ti(TypeCode::UInt, 64));
        assert_eq!(TypeInfo::from(ScalarKind::Bool), ti(TypeCode::UInt, 1));
        assert_eq!(TypeInfo::from(ScalarKind::Float16), ti(TypeCode::Float, 16));
    }

    #[test]
    fn test_type_info_display() {
        assert_eq!(ti(TypeCode::Float, 32).to_string(), "f32");
        assert_eq!(ti(TypeCode::Int, 64).to_string(), "i64");
        assert_eq!(ti(TypeCode::UInt, 8).to_string(), "u8");
    }

    #[test]
    fn test_assign_op_classification() {
        assert!(AssignOp::PlusEqB.is_initializing());
        assert!(AssignOp::PlusEqB.is_reduction());
        assert!(AssignOp::PlusEq.is_uninitialized_reduction());
        assert!(!AssignOp::Assign.is_reduction());
        assert!(!AssignOp::MinEq.is_initializing());
    }
}
