//! Error types for the exprc-jit crate.
//!
//! This module defines the error types that can occur while compiling and loading
//! an expression. The main error types are:
//!
//! - `CompileError`: Errors in the user's expression text (lexical, syntax, semantic),
//!   always carrying the byte offset of the failure
//! - `LinkError`: Failures while turning an assembled module into callable code. These
//!   indicate a defect in the compiler rather than bad input
//! - `ExprError`: High-level error returned by the public entry points
//!
//! Each error type implements the standard Error trait and provides detailed error messages.

use std::fmt;

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use thiserror::Error;

/// Classification of a compile-time failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed numeric literal or a character outside the grammar
    Lexical,
    /// Unbalanced parentheses, misplaced operators or operands, malformed variable index
    Syntax,
    /// Unknown function or identifier, variable index out of range
    Semantic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Lexical => write!(f, "lexical"),
            ErrorKind::Syntax => write!(f, "syntax"),
            ErrorKind::Semantic => write!(f, "semantic"),
        }
    }
}

/// An error in the expression text, reported before any function handle exists.
///
/// `position` is a byte offset into the source so an editor can highlight the
/// failure point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error at {position}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub position: usize,
    pub message: String,
}

impl CompileError {
    pub fn lexical(position: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lexical, position, message)
    }

    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, position, message)
    }

    pub fn semantic(position: usize, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Semantic, position, message)
    }

    fn new(kind: ErrorKind, position: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            position,
            message: message.into(),
        }
    }
}

/// Errors that can occur while loading an assembled module.
///
/// A link error never stems from user input: the assembler only hands well-formed
/// modules to the loader, so any of these indicates an internal defect or an
/// unsupported host. Retrying will not help.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Error when the target machine architecture is not supported
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error when a Cranelift setting is rejected
    #[error("invalid code generator setting: {0}")]
    Setting(String),
    /// Error during Cranelift code generation
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),
    /// Error in the Cranelift JIT module
    #[error("module error: {0}")]
    Module(#[from] ModuleError),
    /// Error when declaring a function in the JIT module
    #[error("declaration error: {0}")]
    Declaration(String),
    /// Error when defining the entry function
    #[error("definition error: {0}")]
    Definition(String),
    /// The module violates one of its structural invariants
    #[error("malformed module at instruction {at}: {reason}")]
    Malformed { at: usize, reason: String },
}

/// High-level errors returned by the compile entry points and the function handle.
#[derive(Debug, Error)]
pub enum ExprError {
    /// The expression text is invalid
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The assembled module could not be loaded
    #[error("failed to load compiled expression: {0}")]
    Link(#[from] LinkError),
    /// Error when the input length is not the number of declared inputs
    #[error("Invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when an input name is declared twice or collides with a reserved name
    #[error("duplicate or reserved input name: {0}")]
    DuplicateName(String),
    /// Error when a backend or optimisation level name is not recognised
    #[error("unknown option: {0}")]
    UnknownOption(String),
}

impl ExprError {
    /// Returns the source offset of a compile error, if this is one.
    pub fn position(&self) -> Option<usize> {
        match self {
            ExprError::Compile(err) => Some(err.position),
            _ => None,
        }
    }
}
