//! Property-based tests for the compile pipeline using `proptest`.

use exprc_jit::{compile_with, CompileOptions, ExprError};
use proptest::prelude::*;

const N_INPUTS: usize = 3;

// ---------------------------------------------------------------------------
// Reference evaluator
// ---------------------------------------------------------------------------

/// Expression tree rendered fully parenthesised, so its meaning does not depend
/// on operator precedence.
#[derive(Debug, Clone)]
enum Tree {
    Literal(f64),
    Input(usize),
    Negate(Box<Tree>),
    Binary(char, Box<Tree>, Box<Tree>),
    /// `^` with a non-integer literal exponent
    Power(Box<Tree>, f64),
    Unary(&'static str, Box<Tree>),
    Pair(&'static str, Box<Tree>, Box<Tree>),
}

impl Tree {
    fn render(&self) -> String {
        match self {
            Tree::Literal(value) => format!("{value}"),
            Tree::Input(slot) => format!("x{slot}"),
            Tree::Negate(inner) => format!("(-{})", inner.render()),
            Tree::Binary(op, l, r) => format!("({}{op}{})", l.render(), r.render()),
            Tree::Power(base, exponent) => format!("({}^{exponent})", base.render()),
            Tree::Unary(name, arg) => format!("{name}({})", arg.render()),
            Tree::Pair(name, a, b) => format!("{name}({}, {})", a.render(), b.render()),
        }
    }

    fn eval(&self, x: &[f64]) -> f64 {
        match self {
            Tree::Literal(value) => *value,
            Tree::Input(slot) => x[*slot],
            Tree::Negate(inner) => -inner.eval(x),
            Tree::Binary(op, l, r) => {
                let (l, r) = (l.eval(x), r.eval(x));
                match op {
                    '+' => l + r,
                    '-' => l - r,
                    '*' => l * r,
                    _ => l / r,
                }
            }
            Tree::Power(base, exponent) => base.eval(x).powf(*exponent),
            Tree::Unary(name, arg) => {
                let v = arg.eval(x);
                match *name {
                    "abs" => v.abs(),
                    "atan" => v.atan(),
                    "cos" => v.cos(),
                    "sin" => v.sin(),
                    "exp" => v.exp(),
                    "log" => v.ln(),
                    "floor" | "int" => v.floor(),
                    _ => (v + 0.5).floor(),
                }
            }
            Tree::Pair(name, a, b) => {
                let (a, b) = (a.eval(x), b.eval(x));
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else if *name == "max" {
                    a.max(b)
                } else {
                    a.min(b)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_tree() -> impl Strategy<Value = Tree> {
    let leaf = prop_oneof![
        (0.0..100.0f64).prop_map(Tree::Literal),
        (0..N_INPUTS).prop_map(Tree::Input),
    ];
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| Tree::Negate(Box::new(t))),
            (
                prop_oneof![Just('+'), Just('-'), Just('*'), Just('/')],
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, l, r)| Tree::Binary(op, Box::new(l), Box::new(r))),
            (inner.clone(), 0..4i32)
                .prop_map(|(t, e)| Tree::Power(Box::new(t), f64::from(e) + 0.5)),
            (
                prop_oneof![
                    Just("abs"),
                    Just("atan"),
                    Just("cos"),
                    Just("sin"),
                    Just("exp"),
                    Just("log"),
                    Just("floor"),
                    Just("int"),
                    Just("round"),
                ],
                inner.clone()
            )
                .prop_map(|(name, t)| Tree::Unary(name, Box::new(t))),
            (prop_oneof![Just("max"), Just("min")], inner.clone(), inner)
                .prop_map(|(name, a, b)| Tree::Pair(name, Box::new(a), Box::new(b))),
        ]
    })
}

fn arb_inputs() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(-10.0..10.0f64, N_INPUTS)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn close(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn compiled_code_matches_reference_evaluator(tree in arb_tree(), x in arb_inputs()) {
        let source = tree.render();
        let f = compile_with(&source, N_INPUTS, &CompileOptions::default()).unwrap();
        let (got, expected) = (f.evaluate(&x), tree.eval(&x));
        prop_assert!(close(got, expected), "{source} at {x:?}: {got} != {expected}");
    }

    #[test]
    fn jit_and_interpreter_agree(tree in arb_tree(), x in arb_inputs()) {
        let source = tree.render();
        let jit = compile_with(&source, N_INPUTS, &CompileOptions::default()).unwrap();
        let vm = compile_with(&source, N_INPUTS, &CompileOptions::interpreter()).unwrap();
        let (a, b) = (jit.evaluate(&x), vm.evaluate(&x));
        prop_assert!(close(a, b), "{source} at {x:?}: jit {a} != interpreter {b}");
    }

    #[test]
    fn compiling_arbitrary_text_never_panics(source in "[ -~]{0,48}") {
        match compile_with(&source, N_INPUTS, &CompileOptions::interpreter()) {
            Ok(f) => {
                let _ = f.evaluate(&[0.5; N_INPUTS]);
            }
            Err(ExprError::Compile(err)) => prop_assert!(err.position <= source.len()),
            Err(other) => prop_assert!(false, "unexpected error for {source:?}: {other}"),
        }
    }
}
