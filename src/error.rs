//! Error types for the KaRL middleware.
//!
//! All errors are strongly typed using thiserror. Conflict-resolution
//! rejections (low quality, stale clock) are deliberately *not* errors:
//! they are routine outcomes under concurrent writers and are reported
//! through [`crate::context::WriteOutcome`] instead.

use thiserror::Error;

/// Errors raised while compiling KaRL source text.
///
/// Compilation is fail-fast: a malformed expression never produces a
/// partial tree that could be evaluated.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("syntax error at byte {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("unterminated string literal starting at byte {position}")]
    UnterminatedString { position: usize },

    #[error("unterminated block comment starting at byte {position}")]
    UnterminatedComment { position: usize },
}

/// Errors raised while evaluating a compiled expression.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("call to undefined function '{name}'")]
    UndefinedFunction { name: String },

    #[error("invalid variable name '{key}'")]
    InvalidKey { key: String },

    #[error("for loop has a zero step")]
    ZeroLoopStep,
}

/// Errors crossing the transport boundary.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer '{peer}' is already registered on this fabric")]
    DuplicatePeer { peer: String },

    #[error("transport queue for '{peer}' is full (capacity {capacity})")]
    QueueFull { peer: String, capacity: usize },

    #[error("transport for '{peer}' is disconnected")]
    Disconnected { peer: String },

    #[error("malformed update payload: {message}")]
    MalformedPayload { message: String },
}

/// Top-level error type for the KaRL middleware.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KarlError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl KarlError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for a syntax error at a byte position.
    #[must_use]
    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self::Compile(CompileError::Syntax {
            message: message.into(),
            position,
        })
    }

    /// Returns true if this is a compile-time error.
    #[must_use]
    pub const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile(_))
    }

    /// Returns true if this is an evaluation error.
    #[must_use]
    pub const fn is_eval(&self) -> bool {
        matches!(self, Self::Eval(_))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type alias for KaRL operations.
pub type KarlResult<T> = Result<T, KarlError>;
