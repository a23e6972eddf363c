//! Types of the tensor IR.

use crate::frontend::ast::{TypeCode, TypeInfo};
use crate::utils::errors::{IrError, IrErrorKind};
use std::fmt;

/// IEEE floating point formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    F16,
    F32,
    F64,
}

impl FloatKind {
    pub fn bits(&self) -> u8 {
        match self {
            FloatKind::F16 => 16,
            FloatKind::F32 => 32,
            FloatKind::F64 => 64,
        }
    }

    /// Mantissa width including the implicit bit; bounds which integers
    /// convert losslessly.
    pub fn mantissa_bits(&self) -> u8 {
        match self {
            FloatKind::F16 => 11,
            FloatKind::F32 => 24,
            FloatKind::F64 => 53,
        }
    }
}

/// Element types of tensors and scalars in the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Signed integer of the given width.
    Int(u8),
    Float(FloatKind),
}

impl ScalarType {
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::Float(_))
    }

    pub fn bits(&self) -> u8 {
        match self {
            ScalarType::Int(b) => *b,
            ScalarType::Float(k) => k.bits(),
        }
    }

    /// The boolean type used by comparisons.
    pub fn bool_type() -> Self {
        ScalarType::Int(1)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Int(b) => write!(f, "i{}", b),
            ScalarType::Float(k) => write!(f, "f{}", k.bits()),
        }
    }
}

/// Types of IR values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    /// Platform index type.
    Index,
    Scalar(ScalarType),
    /// A tensor handle with dynamic sizes.
    MemRef { elem: ScalarType, rank: usize },
}

impl IrType {
    pub fn is_index(&self) -> bool {
        matches!(self, IrType::Index)
    }

    /// The element type, for memref values.
    pub fn elem(&self) -> Option<ScalarType> {
        match self {
            IrType::MemRef { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            IrType::MemRef { rank, .. } => Some(*rank),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Index => write!(f, "index"),
            IrType::Scalar(s) => write!(f, "{}", s),
            IrType::MemRef { elem, rank } => {
                write!(f, "memref<")?;
                for _ in 0..*rank {
                    write!(f, "?x")?;
                }
                write!(f, "{}>", elem)
            }
        }
    }
}

/// Translate a frontend scalar type to an IR element type.
///
/// Unsigned integers (including `bool` and `size_t`) have no generated
/// arithmetic; widening uses signed semantics only.
pub fn scalar_type_of(ti: TypeInfo) -> Result<ScalarType, IrError> {
    match ti.code() {
        TypeCode::Float => {
            let kind = match ti.bits() {
                16 => FloatKind::F16,
                32 => FloatKind::F32,
                64 => FloatKind::F64,
                other => {
                    return Err(IrError::new(
                        IrErrorKind::UnsupportedConstant,
                        format!("unsupported float width {}", other),
                    ))
                }
            };
            Ok(ScalarType::Float(kind))
        }
        TypeCode::Int => Ok(ScalarType::Int(ti.bits())),
        TypeCode::UInt => Err(IrError::new(
            IrErrorKind::UnsupportedConstant,
            "unsigned integers are not supported",
        )),
    }
}
