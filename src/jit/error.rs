//! JIT error types.
//!
//! [`JitError`] never reaches the public API: any failure in the native back
//! end makes the pipeline fall back to the tree interpreter.

use std::fmt;

/// Error produced while building or finalizing native code.
#[derive(Debug, Clone)]
pub enum JitError {
    /// The host ISA is unavailable or rejected the configuration.
    Backend(String),

    /// Cranelift failed to build, define or finalize the function.
    CompilationError(String),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitError::Backend(msg) => write!(f, "backend unavailable: {}", msg),
            JitError::CompilationError(msg) => write!(f, "compilation error: {}", msg),
        }
    }
}

impl std::error::Error for JitError {}

/// Result type for JIT operations.
pub type JitResult<T> = Result<T, JitError>;
