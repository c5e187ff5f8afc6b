//! Single-pass compiler for the Crispy language.
//!
//! Source bytes go in, bytecode comes out, in one traversal: the
//! [`scanner`] produces a one-token-lookahead stream with significant
//! newlines after `return`, and the [`compiler`] parses by precedence
//! climbing while emitting instructions straight into the current
//! frame's code buffer. There is no AST.
//!
//! Compile errors are ordinary `Result` values carrying the line and
//! message (`[Line N] <msg>`); the first error aborts the unit and no
//! partial bytecode is observable to the interpreter.

pub mod compiler;
pub mod error;
pub mod scanner;
pub mod variables;

pub use compiler::{Session, compile};
pub use error::CompileError;
pub use scanner::{Scanner, Token, TokenKind};
pub use variables::Variable;
