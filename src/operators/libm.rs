//! Linking and calling out-of-line built-ins from JIT-compiled code.
//!
//! Functions Cranelift has no instruction for (trigonometric, exponential,
//! logarithm, power) are exported from this crate as `extern "C"` shims and
//! registered with the JIT builder under crate-private symbol names. A compiled
//! module imports them with [`link_builtin`] and calls them with [`call_builtin`].
//!
//! All shims operate on 64-bit floating point numbers (f64).

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_jit::JITBuilder;
use cranelift_module::{FuncId, Linkage, Module};

use super::Builtin;
use crate::errors::LinkError;

extern "C" fn exprc_acos(x: f64) -> f64 {
    x.acos()
}

extern "C" fn exprc_asin(x: f64) -> f64 {
    x.asin()
}

extern "C" fn exprc_atan(x: f64) -> f64 {
    x.atan()
}

extern "C" fn exprc_cos(x: f64) -> f64 {
    x.cos()
}

extern "C" fn exprc_exp(x: f64) -> f64 {
    x.exp()
}

extern "C" fn exprc_log(x: f64) -> f64 {
    x.ln()
}

extern "C" fn exprc_sin(x: f64) -> f64 {
    x.sin()
}

extern "C" fn exprc_tan(x: f64) -> f64 {
    x.tan()
}

extern "C" fn exprc_pow(base: f64, exponent: f64) -> f64 {
    base.powf(exponent)
}

/// Symbol name and address of the shim behind `builtin`.
///
/// Returns `None` for built-ins that are lowered to inline instructions.
pub(crate) fn symbol(builtin: Builtin) -> Option<(&'static str, *const u8)> {
    let entry: (&'static str, *const u8) = match builtin {
        Builtin::Acos => ("exprc_acos", exprc_acos as *const u8),
        Builtin::Asin => ("exprc_asin", exprc_asin as *const u8),
        Builtin::Atan => ("exprc_atan", exprc_atan as *const u8),
        Builtin::Cos => ("exprc_cos", exprc_cos as *const u8),
        Builtin::Exp => ("exprc_exp", exprc_exp as *const u8),
        Builtin::Log => ("exprc_log", exprc_log as *const u8),
        Builtin::Sin => ("exprc_sin", exprc_sin as *const u8),
        Builtin::Tan => ("exprc_tan", exprc_tan as *const u8),
        Builtin::Pow => ("exprc_pow", exprc_pow as *const u8),
        Builtin::Abs | Builtin::Max | Builtin::Min | Builtin::Floor | Builtin::Round => {
            return None
        }
    };
    Some(entry)
}

/// Registers every shim with the JIT builder so imports resolve in-process.
pub(crate) fn register_symbols(builder: &mut JITBuilder) {
    for descriptor in super::BUILTINS.iter() {
        if let Some((name, address)) = symbol(descriptor.builtin) {
            builder.symbol(name, address);
        }
    }
}

/// Declares the shim for `builtin` as an import of `module`.
///
/// The signature takes one f64 per argument and returns one f64.
///
/// # Errors
/// Returns `LinkError::Declaration` if the built-in is inline-only or the
/// declaration is rejected by the module.
pub(crate) fn link_builtin(
    module: &mut dyn Module,
    builtin: Builtin,
    arity: u8,
) -> Result<FuncId, LinkError> {
    let (name, _) = symbol(builtin).ok_or_else(|| {
        LinkError::Declaration(format!("{builtin:?} has no out-of-line implementation"))
    })?;

    let mut sig = module.make_signature();
    for _ in 0..arity {
        sig.params.push(AbiParam::new(F64));
    }
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| LinkError::Declaration(e.to_string()))
}

/// Generates the IR to call a previously linked shim and returns its result.
pub(crate) fn call_builtin(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    args: &[Value],
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, args);
    builder.inst_results(call)[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::BUILTINS;

    #[test]
    fn test_shims_match_builtin_semantics() {
        for descriptor in BUILTINS.iter() {
            let Some((_, address)) = symbol(descriptor.builtin) else {
                continue;
            };
            let (a, b) = (0.3, 1.7);
            // SAFETY: every address returned by `symbol` is an extern "C" shim with
            // one f64 parameter per argument of the descriptor's arity.
            let got = unsafe {
                if descriptor.arity == 2 {
                    let f: extern "C" fn(f64, f64) -> f64 = std::mem::transmute(address);
                    f(a, b)
                } else {
                    let f: extern "C" fn(f64) -> f64 = std::mem::transmute(address);
                    f(a)
                }
            };
            assert_eq!(got, descriptor.builtin.apply2(a, b), "{}", descriptor.name);
        }
    }

    #[test]
    fn test_inline_builtins_have_no_symbol() {
        assert!(symbol(Builtin::Abs).is_none());
        assert!(symbol(Builtin::Round).is_none());
        assert_eq!(symbol(Builtin::Pow).map(|(name, _)| name), Some("exprc_pow"));
    }
}
