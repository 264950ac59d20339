use std::fmt;

use strum::{Display, IntoStaticStr};

/// Result type alias for core operations that can raise a Scheme error.
pub type SchemeResult<T> = Result<T, SchemeError>;

/// Categories of errors raised by the core.
///
/// Uses strum derives for automatic `Display` and `Into<&'static str>`
/// implementations. The string representation is the kebab-case condition
/// name surfaced to user programs (e.g. `TypeError` -> "type-error").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Wrong variant passed to a typed accessor.
    TypeError,
    /// Out-of-bounds index passed to an index accessor.
    IndexError,
    /// Malformed range passed to a range accessor.
    RangeError,
    /// Malformed special form encountered during expansion.
    SyntaxError,
    /// Wrapper for any error raised while evaluating or applying a macro
    /// transformer; the message carries the original error text.
    MacroExpandError,
    /// Unsupported object handed to the binary serializer.
    SerializeError,
    /// Malformed or truncated input handed to the binary deserializer.
    DeserializeError,
    /// Failure writing to an output port.
    IoError,
    /// The allocator could not satisfy a request.
    AllocationError,
    /// A request that requires the external compile/run collaborator
    /// (library resolution, transformer evaluation) could not be served.
    EvalError,
}

/// An error value raised by a core operation.
///
/// Every core operation either returns normally or raises exactly one
/// `SchemeError` that unwinds through `?` to the nearest recovery point.
/// Irritants are captured as printed text at raise time so the error can
/// outlive any collection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeError {
    kind: ErrorKind,
    message: String,
    irritants: Vec<String>,
}

impl SchemeError {
    /// Creates a new error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            irritants: Vec::new(),
        }
    }

    /// Attaches a printed irritant to the error.
    #[must_use]
    pub fn with_irritant(mut self, irritant: impl Into<String>) -> Self {
        self.irritants.push(irritant.into());
        self
    }

    /// Creates the type error raised by typed accessors: `"{name} required"`.
    ///
    /// `name` is the accessor's expected-type wording (e.g. "integer",
    /// "pair", "bytevector"), which intentionally differs from the printer's
    /// type names for a few variants.
    #[must_use]
    pub fn required(name: &str) -> Self {
        Self::new(ErrorKind::TypeError, format!("{name} required"))
    }

    /// Creates the index error raised by index accessors.
    #[must_use]
    pub fn index_out_of_range(index: i64) -> Self {
        Self::new(ErrorKind::IndexError, "index out of range").with_irritant(index.to_string())
    }

    /// Creates a syntax error with the original's terse wording.
    #[must_use]
    pub fn syntax() -> Self {
        Self::new(ErrorKind::SyntaxError, "syntax error")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn irritants(&self) -> &[String] {
        &self.irritants
    }
}

impl fmt::Display for SchemeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.irritants.is_empty() {
            write!(f, " ({})", self.irritants.join(" "))?;
        }
        Ok(())
    }
}

impl std::error::Error for SchemeError {}
