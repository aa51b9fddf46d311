//! Error types for lazyjit

use thiserror::Error;

/// Main error type for JIT operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    /// The code generator rejected a unit or partition.
    #[error("Structural compile error in '{unit}': {reason}")]
    StructuralCompile { unit: String, reason: String },

    /// Compiled code could not be mapped into executable memory.
    #[error("Link error in '{unit}': {reason}")]
    Link { unit: String, reason: String },

    /// A symbol required by the caller was not found by any resolution tier.
    #[error("Unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    /// The host target could not be configured.
    #[error("Target error: {0}")]
    Target(String),

    /// A handle that was never issued by this engine.
    #[error("Invalid module handle: {0}")]
    InvalidHandle(usize),

    /// Bad argument passed through the public API.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JitError {
    pub fn structural(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        JitError::StructuralCompile {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn link(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        JitError::Link {
            unit: unit.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for JIT operations
pub type JitResult<T> = std::result::Result<T, JitError>;
