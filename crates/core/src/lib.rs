//! Core data model for the Crispy language.
//!
//! This crate holds everything the compiler and the VM share:
//!
//! - [`value::Value`]: the tagged value union and its comparison and
//!   formatting rules
//! - [`object`] / [`heap`]: heap objects (strings, lambdas, natives,
//!   dicts, lists) behind [`object::ObjRef`] handles, with mark/sweep
//!   primitives and byte accounting
//! - [`strings::StringInterner`]: the interned-string table for source
//!   literals
//! - [`table::Table`]: the chained-bucket hash table backing dicts, the
//!   interner, and the compiler's scope tables
//! - [`frame`]: compile-time frame builders and runtime call frames
//! - [`bytecode::Op`]: the instruction set
//! - [`disasm`]: a human-readable bytecode listing for diagnostics

pub mod bytecode;
pub mod disasm;
pub mod frame;
pub mod heap;
pub mod object;
pub mod strings;
pub mod table;
pub mod value;

pub use bytecode::Op;
pub use frame::{FrameBuilder, RunFrame, Variables};
pub use heap::Heap;
pub use object::{DictKey, DictObj, LambdaObj, NativeObj, ObjKind, ObjRef, StrObj};
pub use strings::StringInterner;
pub use value::Value;

/// Operand-stack capacity. Exceeding it is a fatal error.
pub const STACK_MAX: usize = 256;

/// Maximum nesting depth of lexical scopes in the compiler.
pub const SCOPES_MAX: usize = 256;

/// Initial garbage-collection threshold (1 MiB of live allocations).
pub const INITIAL_GC_THRESHOLD: usize = 1 << 20;
