//! A register-based bytecode engine for a prototype-based dynamic
//! scripting language (spec §1): a compiler from a small AST to a flat
//! instruction stream ([`codegen`]/[`opcode`]/[`code_block`]), and a
//! dispatch loop that executes it against a host-supplied object model
//! ([`machine`]/[`host`]/[`value`]).
//!
//! An embedder implements [`host::Host`] to provide the global object,
//! primitive wrapping, and `eval`, builds a program with [`ast`] nodes (or
//! its own front end producing the same tree), compiles it with
//! [`codegen::compile`], and runs it on a [`machine::Machine`].

mod activation;
mod analysis;
pub mod ast;
pub mod code_block;
pub mod codegen;
pub mod diagnostics;
pub mod error;
pub mod host;
mod label;
pub mod machine;
pub mod opcode;
mod register;
mod scope_chain;
pub mod value;

pub use code_block::CodeBlock;
pub use codegen::{compile, ScriptFunction};
pub use error::{ErrorKind, Result, SourceLocation, VmError};
pub use host::{Executor, Host};
pub use machine::{Machine, MachineConfig};
pub use scope_chain::ScopeChain;
pub use value::{Object, ScriptCallable, Value};
