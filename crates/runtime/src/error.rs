//! Error types of the interpreter.
//!
//! Compile errors short-circuit out of the parser as values; runtime
//! errors route through the dispatch loop the same way. Both end up in
//! an [`InterpretError`], which the shell reports and loops on and the
//! CLI maps to its exit codes. Fatal conditions (stack overflow,
//! division by zero) never reach here; they print a frame trace and
//! terminate the process with code 42.

use thiserror::Error;

pub use crispy_compiler::CompileError;

/// A runtime error with its message, e.g. a type rule violation or a
/// call of something that is not callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
        }
    }
}

/// The result of interpreting one source unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_displays_message() {
        let err = RuntimeError::new("Trying to call a primitive value");
        assert_eq!(err.to_string(), "Trying to call a primitive value");
    }

    #[test]
    fn test_interpret_error_is_transparent() {
        let err: InterpretError = CompileError::new(2, "Expected expression").into();
        assert_eq!(err.to_string(), "[Line 2] Expected expression");

        let err: InterpretError = RuntimeError::new("boom").into();
        assert_eq!(err.to_string(), "boom");
    }
}
