//! Public compile entry points.
//!
//! Each call runs its own session (scanner, pool, parser, emitter) on the calling
//! thread, so independent compiles may run concurrently. Nothing is returned
//! unless every stage succeeded.

use std::collections::HashSet;

use log::debug;

use crate::errors::{CompileError, ExprError};
use crate::function::CompiledFunction;
use crate::linker;
use crate::module::Module;
use crate::operators;
use crate::options::CompileOptions;
use crate::parser::Parser;
use crate::pool::ConstantPool;

/// Largest number of input slots a module can address.
pub const MAX_INPUTS: usize = u16::MAX as usize + 1;

/// Compiles `source` over the inputs `x0 .. x(n_inputs-1)` with default options.
///
/// # Example
/// ```
/// use exprc_jit::compile;
///
/// let f = compile("sin(x0)*cos(x0)", 1).unwrap();
/// let x = 0.3f64;
/// assert!((f.evaluate(&[x]) - x.sin() * x.cos()).abs() < 1e-12);
///
/// let err = compile("2+(3*4", 0).unwrap_err();
/// assert_eq!(err.position(), Some(6));
/// ```
///
/// # Errors
/// Returns `ExprError::Compile` for invalid expression text and `ExprError::Link`
/// if the assembled module could not be loaded.
pub fn compile(source: &str, n_inputs: usize) -> Result<CompiledFunction, ExprError> {
    compile_with(source, n_inputs, &CompileOptions::default())
}

/// Compiles `source` with explicit options.
///
/// # Errors
/// See [`compile`].
pub fn compile_with(
    source: &str,
    n_inputs: usize,
    options: &CompileOptions,
) -> Result<CompiledFunction, ExprError> {
    let module = compile_module(source, n_inputs)?;
    Ok(linker::load_with(&module, options)?)
}

/// Compiles `source` where `names[i]` is an alias for input `x<i>`.
///
/// The numbered form stays available, so `x0` and `names[0]` are the same input.
///
/// # Example
/// ```
/// use exprc_jit::{compile_with_names, CompileOptions};
///
/// let names = ["x", "amp", "tau"];
/// let f = compile_with_names("amp * exp(-x / tau)", &names, &CompileOptions::default()).unwrap();
/// assert_eq!(f.evaluate(&[0.0, 3.0, 1.0]), 3.0);
/// ```
///
/// # Errors
/// Returns `ExprError::DuplicateName` if a name repeats or shadows a named
/// constant, a built-in function or the `x<N>` form. Otherwise see [`compile`].
pub fn compile_with_names(
    source: &str,
    names: &[&str],
    options: &CompileOptions,
) -> Result<CompiledFunction, ExprError> {
    let module = compile_module_with_names(source, names)?;
    let function = linker::load_with(&module, options)?;
    Ok(function.with_names(names.iter().map(|name| name.to_string()).collect()))
}

/// Runs the front end only and returns the assembled module.
///
/// # Errors
/// Returns the first lexical, syntax or semantic error.
pub fn compile_module(source: &str, n_inputs: usize) -> Result<Module, CompileError> {
    session(source, n_inputs, &[])
}

/// Like [`compile_module`], resolving `names[i]` to input `i`.
///
/// # Errors
/// Returns `ExprError::DuplicateName` for an invalid name list, otherwise the
/// first lexical, syntax or semantic error.
pub fn compile_module_with_names(source: &str, names: &[&str]) -> Result<Module, ExprError> {
    let names = validate_names(names)?;
    Ok(session(source, names.len(), &names)?)
}

fn session(source: &str, n_inputs: usize, names: &[String]) -> Result<Module, CompileError> {
    if n_inputs > MAX_INPUTS {
        return Err(CompileError::syntax(0, "expression too large"));
    }

    let module = Parser::new(source, n_inputs, names).parse()?;
    debug!(
        "compiled '{}': {} inputs, {} instructions, {} constants, {} functions, max stack {}",
        source,
        n_inputs,
        module.code().len(),
        module.constants().len(),
        module.functions().len(),
        module.max_stack()
    );
    Ok(module)
}

fn validate_names(names: &[&str]) -> Result<Vec<String>, ExprError> {
    let mut seen = HashSet::new();
    for &name in names {
        let valid_identifier = name.starts_with(|c: char| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_identifier || !seen.insert(name) || is_reserved(name) {
            return Err(ExprError::DuplicateName(name.to_string()));
        }
    }
    Ok(names.iter().map(|name| name.to_string()).collect())
}

/// Names that already mean something in an expression.
fn is_reserved(name: &str) -> bool {
    let numbered = name
        .strip_prefix(|c: char| c == 'x' || c == 'X')
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
    numbered || ConstantPool::named_constant(name).is_some() || operators::lookup(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::options::Backend;

    fn eval(source: &str, x: &[f64]) -> f64 {
        compile(source, x.len()).unwrap().evaluate(x)
    }

    fn compile_error(source: &str, n_inputs: usize) -> CompileError {
        match compile(source, n_inputs) {
            Err(ExprError::Compile(err)) => err,
            other => panic!("expected a compile error for {source:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_forms() {
        let (a, b) = (0.75, -1.25);
        assert_eq!(eval("2*x0+3*x1", &[a, b]), 2.0 * a + 3.0 * b);
        assert!((eval("sin(x0)*cos(x0)", &[a]) - a.sin() * a.cos()).abs() < 1e-12);
        assert_eq!(eval("pow(x0,2)", &[b]), b.powf(2.0));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2+3*4", &[]), 14.0);
        assert_eq!(eval("8/4/2", &[]), 1.0);
        assert_eq!(eval("5-3+1", &[]), 3.0);
    }

    /// Chained `^` is evaluated left to right and unary minus binds looser than
    /// `^`. These are long-standing quirks kept for compatibility with existing
    /// expressions, not mathematical convention.
    #[test]
    fn test_documented_power_quirks() {
        assert_eq!(eval("2^3^2", &[]), 64.0);
        assert_eq!(eval("-2^2", &[]), -4.0);
        assert_eq!(eval("2^-2", &[]), 0.25);
        assert_eq!(eval("(-2)^2", &[]), 4.0);
        assert_eq!(eval("-x0^2", &[3.0]), -9.0);
    }

    #[test]
    fn test_unary_disambiguation() {
        assert_eq!(eval("3*-2", &[]), -6.0);
        assert_eq!(eval("-3+2", &[]), -1.0);
        assert_eq!(eval("(-3)", &[]), -3.0);
        assert_eq!(eval("+3", &[]), 3.0);
        assert_eq!(eval("max(-1, -2)", &[]), -1.0);
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(eval("max(3,5)", &[]), 5.0);
        assert_eq!(eval("pow(2,10)", &[]), 1024.0);
        assert_eq!(eval("abs(-7)", &[]), 7.0);
        assert_eq!(eval("min(3,5)", &[]), 3.0);
        assert_eq!(eval("int(2.7) + round(2.5)", &[]), 5.0);
        assert!((eval("exp(log(x0))", &[5.0]) - 5.0).abs() < 1e-12);
        let angles = eval("acos(0) + asin(0) + atan(1) + tan(0)", &[]);
        assert!((angles - 3.0 * std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    }

    #[test]
    fn test_single_literal() {
        let f = compile("42", 3).unwrap();
        assert_eq!(f.evaluate(&[1.0, 2.0, 3.0]), 42.0);
        assert_eq!(f.evaluate(&[-1.0, f64::NAN, 0.0]), 42.0);
        assert_eq!(eval("PI", &[]), std::f64::consts::PI);
    }

    #[test]
    fn test_domain_issues_propagate() {
        assert!(eval("log(x0)", &[-1.0]).is_nan());
        assert_eq!(eval("1/x0", &[0.0]), f64::INFINITY);
        assert_eq!(eval("-1/x0", &[0.0]), f64::NEG_INFINITY);
        assert!(eval("x0/x0", &[0.0]).is_nan());
        assert!(eval("asin(2)", &[]).is_nan());
    }

    #[test]
    fn test_error_cases() {
        let err = compile_error("2+(3*4", 0);
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.position >= 5);

        assert_eq!(compile_error("2++3", 0).kind, ErrorKind::Syntax);

        let err = compile_error("foo(1)", 0);
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert!(err.message.contains("illegal function"));

        let err = compile_error("x5", 2);
        assert_eq!((err.kind, err.position), (ErrorKind::Semantic, 0));

        assert_eq!(compile_error("2 # 3", 0).kind, ErrorKind::Lexical);
    }

    #[test]
    fn test_idempotence() {
        let f = compile("x0^3 - 2*x0 + atan(x0)", 1).unwrap();
        let g = compile("x0^3 - 2*x0 + atan(x0)", 1).unwrap();
        for i in -20..20 {
            let x = [f64::from(i) * 0.37];
            assert_eq!(f.evaluate(&x), g.evaluate(&x));
        }
    }

    #[test]
    fn test_backends_agree() {
        let source = "x0 * sin(x1) - max(x0, 1.5) / (1 + x1^2) + pow(abs(x0), 0.5)";
        let jit = compile_with(source, 2, &CompileOptions::default()).unwrap();
        let vm = compile_with(source, 2, &CompileOptions::interpreter()).unwrap();
        assert_eq!(vm.backend(), Backend::Interpreter);
        for x in [[0.0, 0.0], [1.5, -2.0], [-3.25, 10.0], [1e6, 1e-6]] {
            let (a, b) = (jit.evaluate(&x), vm.evaluate(&x));
            assert!((a - b).abs() <= 1e-12 * a.abs().max(1.0), "{a} != {b} at {x:?}");
        }
    }

    #[test]
    fn test_default_options_load_native_code() {
        let f = compile("x0+1", 1).unwrap();
        assert_eq!(f.backend(), Backend::Jit);
        assert_eq!(f.evaluate(&[41.0]), 42.0);

        let f = compile_with("x0^-2", 1, &CompileOptions::default()).unwrap();
        assert_eq!(f.backend(), Backend::Jit);
        assert_eq!(f.evaluate(&[2.0]), 0.25);
    }

    #[test]
    fn test_backends_agree_near_underflow() {
        for source in ["x0^-2", "x0^-3", "1/x0^2", "x0^64"] {
            let jit = compile_with(source, 1, &CompileOptions::default()).unwrap();
            let vm = compile_with(source, 1, &CompileOptions::interpreter()).unwrap();
            for x in [1e155, 1e160, -1e110, 3.0] {
                let (a, b) = (jit.evaluate(&[x]), vm.evaluate(&[x]));
                assert!(
                    a == b || (a - b).abs() <= 1e-12 * a.abs().max(b.abs()),
                    "{source} at {x}: jit {a} != interpreter {b}"
                );
            }
        }
    }

    #[test]
    fn test_named_inputs() {
        let options = CompileOptions::default();
        let f = compile_with_names("a*t^2 + b*t + x0", &["t", "a", "b"], &options).unwrap();
        assert_eq!(f.names(), &["t", "a", "b"]);
        assert_eq!(f.evaluate(&[2.0, 1.0, 3.0]), 4.0 + 6.0 + 2.0);

        let err = compile_with_names("a", &["a", "a"], &options).unwrap_err();
        assert!(matches!(err, ExprError::DuplicateName(name) if name == "a"));
        for reserved in ["PI", "sin", "x1", "X0", "2x", "", "a-b"] {
            assert!(
                matches!(
                    compile_with_names("1", &[reserved], &options),
                    Err(ExprError::DuplicateName(_))
                ),
                "{reserved:?} should be rejected"
            );
        }
        assert!(compile_with_names("x + xs", &["x", "xs"], &options).is_ok());

        let err = compile_with_names("c", &["a", "b"], &options).unwrap_err();
        assert!(matches!(err, ExprError::Compile(e) if e.kind == ErrorKind::Semantic));
    }

    #[test]
    fn test_too_many_inputs() {
        assert_eq!(
            compile_error("x0", MAX_INPUTS + 1).message,
            "expression too large"
        );
        let f = compile("x65535", MAX_INPUTS).unwrap();
        let mut x = vec![0.0; MAX_INPUTS];
        x[65535] = 7.0;
        assert_eq!(f.evaluate(&x), 7.0);
    }

    #[test]
    fn test_compile_module_listing() {
        let module = compile_module("pow(x0, 2) + 1", 1).unwrap();
        let listing = module.to_string();
        assert!(listing.contains("; source: pow(x0, 2) + 1"));
        assert!(listing.contains("call f0"));
    }

    #[test]
    fn test_concurrent_compile_and_evaluate() {
        let shared = compile("x0 * x0 + x1", 2).unwrap();
        std::thread::scope(|scope| {
            for t in 0..8 {
                let shared = &shared;
                scope.spawn(move || {
                    let own = compile(&format!("x0 + {t}"), 1).unwrap();
                    for i in 0..1000 {
                        let x = f64::from(i);
                        assert_eq!(shared.evaluate(&[x, f64::from(t)]), x * x + f64::from(t));
                        assert_eq!(own.evaluate(&[x]), x + f64::from(t));
                    }
                });
            }
        });
    }
}
