//! Compile-error type.

use thiserror::Error;

/// A compile error with the source line it was detected on. Rendered as
/// `[Line N] <message>`, the format the shell and the CLI print to
/// stderr.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[Line {line}] {message}")]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        CompileError {
            line,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let err = CompileError::new(3, "Expected ')'");
        assert_eq!(err.to_string(), "[Line 3] Expected ')'");
    }
}
