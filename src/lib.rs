//! Runtime compiler for arithmetic expressions.
//!
//! This crate turns an expression such as `"2*x0 + sin(x1)^2"` into a function that
//! can be called millions of times without re-parsing the text. The source is
//! scanned and parsed in a single pass into a small stack-machine module, which is
//! then compiled to native code with
//! [Cranelift](https://github.com/bytecodealliance/wasmtime/tree/main/cranelift)
//! or, where no JIT is available, run by a portable interpreter.
//!
//! # Features
//!
//! - Operators `+ - * / ^`, unary `+ -`, parentheses
//! - Numeric literals with optional exponent, named constants `E` and `PI`
//! - Inputs `x0 .. x(n-1)`, optionally aliased by name
//! - Built-ins `acos asin atan abs cos exp log int floor round sin tan` and
//!   `max min pow` (two arguments)
//! - Immutable, thread-safe function handles with batch and parallel evaluation
//!
//! # Example
//!
//! ```rust
//! use exprc_jit::compile;
//!
//! let f = compile("2*x0 + x1^2", 2).unwrap();
//! assert_eq!(f.evaluate(&[1.0, 2.0]), 6.0);
//!
//! // Errors carry the byte offset of the failure
//! let err = compile("foo(1)", 0).unwrap_err();
//! assert_eq!(err.to_string(), "semantic error at 0: illegal function 'foo'");
//! ```
//!
//! # Precedence
//!
//! Binary `^` binds tightest, then unary signs, then `* /`, then binary `+ -`.
//! Chained powers evaluate left to right, so `2^3^2` is 64 and `-2^2` is -4.

pub use builder::clif_ir;
pub use compiler::{
    compile, compile_module, compile_module_with_names, compile_with, compile_with_names,
};
pub use errors::{CompileError, ErrorKind, ExprError, LinkError};
pub use function::CompiledFunction;
pub use module::Module;
pub use options::{Backend, CompileOptions, OptLevel};

pub mod prelude {
    pub use crate::backends::vector::Vector;
    pub use crate::compiler::{compile, compile_with, compile_with_names};
    pub use crate::function::CompiledFunction;
    pub use crate::options::{Backend, CompileOptions, OptLevel};
}

/// Storage types compiled functions read from and write to
pub mod backends {
    pub mod vector;
}
/// JIT compilation of modules using Cranelift
pub mod builder;
/// Public compile entry points
pub mod compiler;
/// Error types for the various failure modes
pub mod errors;
/// The callable handle
pub mod function;
/// Loading verified modules with the selected backend
pub mod linker;
/// Assembled stack-machine modules
pub mod module;
/// Built-in function table and the shims the JIT calls
pub mod operators;
/// Backend and code generator options
pub mod options;
/// Operator-precedence parser and code emitter
pub mod parser;
/// Constant pool
pub mod pool;
/// Tokenizer
pub mod scanner;
pub mod types;
mod vm;
