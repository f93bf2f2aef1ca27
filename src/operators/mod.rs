//! Built-in functions callable from expressions.
//!
//! The table is fixed: expressions cannot define functions. Each compiled module
//! carries only the descriptors its code actually calls, collected in a
//! [`FunctionTable`] while parsing.

pub(crate) mod libm;

/// Implementation selector of a built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Acos,
    Asin,
    Atan,
    Abs,
    Cos,
    Exp,
    /// Natural logarithm
    Log,
    Max,
    Min,
    Floor,
    /// Half-up rounding, `floor(x + 0.5)`
    Round,
    Sin,
    Tan,
    Pow,
}

impl Builtin {
    /// Applies the function to one argument. Two-argument functions use `x` twice.
    #[inline]
    pub fn apply1(self, x: f64) -> f64 {
        match self {
            Builtin::Acos => x.acos(),
            Builtin::Asin => x.asin(),
            Builtin::Atan => x.atan(),
            Builtin::Abs => x.abs(),
            Builtin::Cos => x.cos(),
            Builtin::Exp => x.exp(),
            Builtin::Log => x.ln(),
            Builtin::Floor => x.floor(),
            Builtin::Round => round_half_up(x),
            Builtin::Sin => x.sin(),
            Builtin::Tan => x.tan(),
            Builtin::Max | Builtin::Min | Builtin::Pow => self.apply2(x, x),
        }
    }

    /// Applies a two-argument function.
    #[inline]
    pub fn apply2(self, a: f64, b: f64) -> f64 {
        match self {
            Builtin::Max => nan_max(a, b),
            Builtin::Min => nan_min(a, b),
            Builtin::Pow => a.powf(b),
            _ => self.apply1(a),
        }
    }
}

/// Half-up rounding: `round(2.5) == 3`, `round(-2.5) == -2`.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// Maximum that returns NaN when either side is NaN.
pub fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

/// Minimum that returns NaN when either side is NaN.
pub fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

/// Name and arity of a built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionDescriptor {
    pub name: &'static str,
    pub arity: u8,
    pub builtin: Builtin,
}

const fn unary(name: &'static str, builtin: Builtin) -> FunctionDescriptor {
    FunctionDescriptor {
        name,
        arity: 1,
        builtin,
    }
}

const fn binary(name: &'static str, builtin: Builtin) -> FunctionDescriptor {
    FunctionDescriptor {
        name,
        arity: 2,
        builtin,
    }
}

/// Every function an expression may call.
pub const BUILTINS: [FunctionDescriptor; 15] = [
    unary("acos", Builtin::Acos),
    unary("asin", Builtin::Asin),
    unary("atan", Builtin::Atan),
    unary("abs", Builtin::Abs),
    unary("cos", Builtin::Cos),
    unary("exp", Builtin::Exp),
    unary("log", Builtin::Log),
    binary("max", Builtin::Max),
    binary("min", Builtin::Min),
    unary("int", Builtin::Floor),
    unary("floor", Builtin::Floor),
    unary("round", Builtin::Round),
    unary("sin", Builtin::Sin),
    unary("tan", Builtin::Tan),
    binary("pow", Builtin::Pow),
];

/// Finds the built-in called `name`. Names are case-sensitive.
pub fn lookup(name: &str) -> Option<&'static FunctionDescriptor> {
    BUILTINS.iter().find(|descriptor| descriptor.name == name)
}

/// Descriptors referenced by one module, in first-use order.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    entries: Vec<FunctionDescriptor>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the module-local index of `descriptor`, adding it on first use.
    pub fn intern(&mut self, descriptor: &FunctionDescriptor) -> Option<u16> {
        let position = match self.entries.iter().position(|d| d == descriptor) {
            Some(position) => position,
            None => {
                self.entries.push(*descriptor);
                self.entries.len() - 1
            }
        };
        u16::try_from(position).ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<FunctionDescriptor> {
        self.entries
    }
}
