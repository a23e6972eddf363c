//! Error types for the TC front-end, organized by the phase that produces
//! them. Every error carries the most specific source range available.

use crate::utils::location::SourceRange;
use std::fmt;
use thiserror::Error;

/// Top-level error type for a compilation.
#[derive(Error, Debug)]
pub enum CompilerError {
    /// Error during lexing.
    #[error("lexical error: {0}")]
    Lex(#[from] LexError),

    /// Error during parsing.
    #[error("syntax error: {0}")]
    Parse(#[from] ParseError),

    /// Error during semantic analysis.
    #[error("semantic error: {0}")]
    Sema(#[from] SemaError),

    /// Error during IR generation or verification.
    #[error("lowering error: {0}")]
    Ir(#[from] IrError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used across the compilation pipeline.
pub type CompileResult<T> = Result<T, CompilerError>;

/// Error during lexical analysis.
#[derive(Error, Debug, Clone)]
pub struct LexError {
    /// Human-readable message.
    pub message: String,
    /// Location in source.
    pub range: SourceRange,
}

impl LexError {
    pub fn new(message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            message: message.into(),
            range,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}\n{}", self.range, self.message, self.range.highlight())
    }
}

/// Error during parsing.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    /// Human-readable message.
    pub message: String,
    /// What the parser expected, if known.
    pub expected: Option<String>,
    /// What the parser found instead.
    pub found: Option<String>,
    /// Location in source.
    pub range: SourceRange,
}

impl ParseError {
    pub fn new(message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            message: message.into(),
            expected: None,
            found: None,
            range,
        }
    }

    pub fn expected(expected: impl Into<String>, found: impl Into<String>, range: SourceRange) -> Self {
        let expected = expected.into();
        let found = found.into();
        Self {
            message: format!("expected {}, found {}", expected, found),
            expected: Some(expected),
            found: Some(found),
            range,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}\n{}", self.range, self.message, self.range.highlight())
    }
}

/// The kind of a semantic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaErrorKind {
    /// Use of an identifier that resolves nowhere.
    UnknownIdentifier,
    /// A name was defined twice in the same environment.
    AlreadyDefined,
    /// Tensor accessed with the wrong number of arguments.
    WrongArity,
    /// Assignment would narrow the scalar type without a cast.
    NarrowingAssignment,
    /// A scalar was used where a tensor is required, or vice versa.
    ScalarTensorMismatch,
    /// A non-integral expression was used as a tensor index.
    NonIntegerIndex,
    /// A kernel input appears on the left-hand side.
    InputWritten,
    /// An output is written but its type was never declared.
    OutputTypeNotDeclared,
    /// Declared and used tensor ranks disagree.
    RankMismatch,
    /// `=` used with reduction variables, or similar marker inconsistency.
    ReductionMarker,
    /// Operand types cannot be unified.
    TypeMismatch,
    /// Writing to a name that is neither an input nor an output.
    NotAnOutput,
}

/// Error during semantic analysis.
#[derive(Error, Debug, Clone)]
pub struct SemaError {
    /// Human-readable message.
    pub message: String,
    /// The kind of semantic error.
    pub kind: SemaErrorKind,
    /// Location in source.
    pub range: SourceRange,
}

impl SemaError {
    pub fn new(kind: SemaErrorKind, message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            message: message.into(),
            kind,
            range,
        }
    }
}

impl fmt::Display for SemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}\n{}", self.range, self.message, self.range.highlight())
    }
}

/// The kind of an IR generation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrErrorKind {
    /// `min=`/`max=` have no lowering.
    UnsupportedReduction,
    /// Operand types cannot be aligned losslessly.
    UnsupportedConversion,
    /// A constant of this type cannot be materialized.
    UnsupportedConstant,
    /// Construct with no IR equivalent (e.g. built-in calls).
    UnsupportedConstruct,
    /// No bound could be determined for an iterator.
    MissingBound,
    /// Output tensor problems (undeclared type, rank mismatch).
    BadOutput,
    /// Module verification failed.
    Verification,
}

/// Error during IR generation or verification.
#[derive(Error, Debug, Clone)]
pub struct IrError {
    /// Human-readable message.
    pub message: String,
    /// The kind of IR error.
    pub kind: IrErrorKind,
    /// Location in source, if one is attributable.
    pub range: Option<SourceRange>,
}

impl IrError {
    pub fn new(kind: IrErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            range: None,
        }
    }

    pub fn at(kind: IrErrorKind, message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            message: message.into(),
            kind,
            range: Some(range),
        }
    }
}

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(r) => write!(f, "{}: {}\n{}", r, self.message, r.highlight()),
            None => write!(f, "{}", self.message),
        }
    }
}
