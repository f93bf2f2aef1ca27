//! Compile options: which backend loads a module and how Cranelift optimises it.

use std::fmt;
use std::str::FromStr;

use crate::errors::ExprError;

/// How an assembled module is turned into a callable function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// Native code through Cranelift
    #[default]
    Jit,
    /// Portable stack-machine interpreter
    Interpreter,
}

impl FromStr for Backend {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jit" => Ok(Backend::Jit),
            "interpreter" | "interp" | "vm" => Ok(Backend::Interpreter),
            _ => Err(ExprError::UnknownOption(format!("backend '{s}'"))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Jit => write!(f, "jit"),
            Backend::Interpreter => write!(f, "interpreter"),
        }
    }
}

/// Cranelift `opt_level` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Value of the Cranelift `opt_level` flag.
    pub fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

impl FromStr for OptLevel {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(OptLevel::None),
            "speed" => Ok(OptLevel::Speed),
            "speed_and_size" | "speed-and-size" => Ok(OptLevel::SpeedAndSize),
            _ => Err(ExprError::UnknownOption(format!("opt level '{s}'"))),
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_setting())
    }
}

/// Options for [`compile_with`](crate::compile_with) and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub backend: Backend,
    pub opt_level: OptLevel,
    /// Run the Cranelift IR verifier before code generation
    pub verify: bool,
    /// Load with the interpreter when the host has no JIT support
    pub fallback: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            opt_level: OptLevel::default(),
            verify: cfg!(debug_assertions),
            fallback: true,
        }
    }
}

impl CompileOptions {
    pub fn interpreter() -> Self {
        Self {
            backend: Backend::Interpreter,
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }
}
