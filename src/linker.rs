//! Turns a verified module into a callable [`CompiledFunction`].

use log::{debug, error, warn};

use crate::builder;
use crate::errors::LinkError;
use crate::function::CompiledFunction;
use crate::module::Module;
use crate::options::{Backend, CompileOptions};
use crate::types::JITFunction;
use crate::vm::Interpreter;

/// Loads `module` with the default options.
///
/// # Errors
/// See [`load_with`].
pub fn load(module: &Module) -> Result<CompiledFunction, LinkError> {
    load_with(module, &CompileOptions::default())
}

/// Verifies `module` and loads it with the backend selected in `options`.
///
/// When the JIT cannot target the host and `options.fallback` is set, the
/// module is loaded with the interpreter instead.
///
/// # Errors
/// Returns a LinkError if verification fails or the backend rejects the module.
/// Link errors indicate an internal defect and are logged at error level.
pub fn load_with(module: &Module, options: &CompileOptions) -> Result<CompiledFunction, LinkError> {
    load_inner(module, options).inspect_err(|err| {
        error!("failed to load '{}': {err}", module.source());
    })
}

fn load_inner(module: &Module, options: &CompileOptions) -> Result<CompiledFunction, LinkError> {
    module.verify()?;

    let (function, backend) = match options.backend {
        Backend::Interpreter => (Interpreter::new(module).into_function(), Backend::Interpreter),
        Backend::Jit => or_fallback(module, options, builder::build_native(module, options))?,
    };

    debug!(
        "loaded '{}' with the {backend} backend ({} instructions, max stack {})",
        module.source(),
        module.code().len(),
        module.max_stack()
    );
    Ok(CompiledFunction::new(function, module, backend))
}

/// Settles the outcome of a JIT build, using the interpreter when the host has
/// no JIT and `options.fallback` allows it.
fn or_fallback(
    module: &Module,
    options: &CompileOptions,
    built: Result<JITFunction, LinkError>,
) -> Result<(JITFunction, Backend), LinkError> {
    match built {
        Ok(function) => Ok((function, Backend::Jit)),
        Err(LinkError::HostMachineNotSupported(reason)) if options.fallback => {
            warn!("JIT unavailable ({reason}), falling back to the interpreter");
            Ok((Interpreter::new(module).into_function(), Backend::Interpreter))
        }
        Err(err) => Err(err),
    }
}
