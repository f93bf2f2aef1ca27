//! Self-contained compiled expression modules.
//!
//! A [`Module`] is what the parser's output gets packaged into before loading:
//!
//! - a header with the number of inputs and the declared operand-stack depth
//! - the constant pool, in index order
//! - the descriptors of the built-ins the code calls
//! - one linear instruction stream for a small stack machine
//!
//! Every index inside the stream refers to the module's own tables, so two
//! modules never share symbols or mutable state. [`Module::verify`] re-checks
//! these invariants before a loader turns the module into native code.

use std::fmt;

use itertools::Itertools;

use crate::errors::LinkError;
use crate::operators::{FunctionDescriptor, FunctionTable};
use crate::pool::ConstantPool;

/// Name of the single entry point of every module.
pub const ENTRY_POINT: &str = "evaluate";

/// One stack-machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Push input slot `n`
    LoadInput(u16),
    /// Push constant-pool entry `n`
    LoadConst(u16),
    Add,
    Sub,
    Mul,
    Div,
    /// Binary `^`
    Pow,
    /// Unary minus
    Neg,
    /// Call function-table entry `n`, popping its arity and pushing the result
    Call(u16),
}

impl Instruction {
    /// Returns `(pops, pushes)`, or `None` if a call refers past the function table.
    pub fn stack_effect(&self, functions: &[FunctionDescriptor]) -> Option<(usize, usize)> {
        match self {
            Instruction::LoadInput(_) | Instruction::LoadConst(_) => Some((0, 1)),
            Instruction::Add
            | Instruction::Sub
            | Instruction::Mul
            | Instruction::Div
            | Instruction::Pow => Some((2, 1)),
            Instruction::Neg => Some((1, 1)),
            Instruction::Call(index) => functions
                .get(usize::from(*index))
                .map(|descriptor| (usize::from(descriptor.arity), 1)),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LoadInput(n) => write!(f, "load_input x{n}"),
            Instruction::LoadConst(n) => write!(f, "load_const c{n}"),
            Instruction::Add => write!(f, "add"),
            Instruction::Sub => write!(f, "sub"),
            Instruction::Mul => write!(f, "mul"),
            Instruction::Div => write!(f, "div"),
            Instruction::Pow => write!(f, "pow"),
            Instruction::Neg => write!(f, "neg"),
            Instruction::Call(n) => write!(f, "call f{n}"),
        }
    }
}

/// Calling convention and resource declaration of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    /// Number of f64 inputs the entry point takes
    pub n_inputs: usize,
    /// Maximum operand-stack depth reached by the code
    pub max_stack: usize,
}

/// A compiled expression ready for loading.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    header: ModuleHeader,
    source: String,
    constants: Vec<f64>,
    functions: Vec<FunctionDescriptor>,
    code: Vec<Instruction>,
}

/// Packages an emitted instruction stream and the tables it refers to.
///
/// The parser guarantees the invariants checked by [`Module::verify`], so
/// assembly itself cannot fail.
pub fn assemble(
    source: &str,
    n_inputs: usize,
    code: Vec<Instruction>,
    max_stack: usize,
    pool: ConstantPool,
    functions: FunctionTable,
) -> Module {
    Module {
        header: ModuleHeader {
            n_inputs,
            max_stack,
        },
        source: source.to_string(),
        constants: pool.into_values(),
        functions: functions.into_entries(),
        code,
    }
}

impl Module {
    pub fn header(&self) -> &ModuleHeader {
        &self.header
    }

    pub fn n_inputs(&self) -> usize {
        self.header.n_inputs
    }

    pub fn max_stack(&self) -> usize {
        self.header.max_stack
    }

    /// The expression text the module was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn constants(&self) -> &[f64] {
        &self.constants
    }

    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Checks the structural invariants a loader relies on.
    ///
    /// - every input, constant and function index is in range
    /// - the stack never underflows and never exceeds the declared depth
    /// - exactly one value remains at the end
    ///
    /// # Errors
    /// Returns `LinkError::Malformed` naming the first offending instruction.
    pub fn verify(&self) -> Result<(), LinkError> {
        let malformed = |at: usize, reason: String| LinkError::Malformed { at, reason };

        let mut depth = 0usize;
        for (at, instruction) in self.code.iter().enumerate() {
            match instruction {
                Instruction::LoadInput(n) if usize::from(*n) >= self.header.n_inputs => {
                    return Err(malformed(
                        at,
                        format!(
                            "input x{n} out of range for {} inputs",
                            self.header.n_inputs
                        ),
                    ));
                }
                Instruction::LoadConst(n) if usize::from(*n) >= self.constants.len() => {
                    return Err(malformed(
                        at,
                        format!(
                            "constant c{n} out of range for pool of {}",
                            self.constants.len()
                        ),
                    ));
                }
                _ => {}
            }

            let (pops, pushes) = instruction
                .stack_effect(&self.functions)
                .ok_or_else(|| malformed(at, format!("{instruction} has no function entry")))?;
            depth = depth
                .checked_sub(pops)
                .ok_or_else(|| malformed(at, format!("{instruction} underflows the stack")))?;
            depth += pushes;
            if depth > self.header.max_stack {
                return Err(malformed(
                    at,
                    format!(
                        "stack depth {depth} exceeds declared maximum {}",
                        self.header.max_stack
                    ),
                ));
            }
        }

        if depth != 1 {
            return Err(malformed(
                self.code.len(),
                format!("{depth} values left on the stack, expected 1"),
            ));
        }
        Ok(())
    }
}

/// Renders a disassembly listing of the module.
impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; source: {}", self.source)?;
        writeln!(
            f,
            "; entry: {ENTRY_POINT}({} inputs) -> f64, max stack {}",
            self.header.n_inputs, self.header.max_stack
        )?;
        if !self.constants.is_empty() {
            writeln!(
                f,
                "; constants: {}",
                self.constants
                    .iter()
                    .enumerate()
                    .map(|(i, value)| format!("c{i} = {value}"))
                    .join(", ")
            )?;
        }
        if !self.functions.is_empty() {
            writeln!(
                f,
                "; functions: {}",
                self.functions
                    .iter()
                    .enumerate()
                    .map(|(i, d)| format!("f{i} = {}/{}", d.name, d.arity))
                    .join(", ")
            )?;
        }
        for (at, instruction) in self.code.iter().enumerate() {
            writeln!(f, "{at:04}  {instruction}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::lookup;

    fn module(n_inputs: usize, code: Vec<Instruction>, max_stack: usize) -> Module {
        let mut pool = ConstantPool::new();
        pool.intern("2").unwrap();
        let mut functions = FunctionTable::new();
        functions.intern(lookup("pow").unwrap()).unwrap();
        assemble("test", n_inputs, code, max_stack, pool, functions)
    }

    #[test]
    fn test_verify_accepts_well_formed_module() {
        let m = module(
            1,
            vec![
                Instruction::LoadInput(0),
                Instruction::LoadConst(0),
                Instruction::Call(0),
                Instruction::Neg,
            ],
            2,
        );
        assert!(m.verify().is_ok());
        assert_eq!(m.n_inputs(), 1);
        assert_eq!(m.max_stack(), 2);
        assert_eq!(m.constants(), &[2.0]);
    }

    #[test]
    fn test_verify_rejects_out_of_range_indices() {
        let m = module(1, vec![Instruction::LoadInput(1)], 1);
        assert!(matches!(m.verify(), Err(LinkError::Malformed { at: 0, .. })));

        let m = module(1, vec![Instruction::LoadConst(3)], 1);
        assert!(matches!(m.verify(), Err(LinkError::Malformed { at: 0, .. })));

        let m = module(
            1,
            vec![
                Instruction::LoadInput(0),
                Instruction::LoadInput(0),
                Instruction::Call(4),
            ],
            2,
        );
        assert!(matches!(m.verify(), Err(LinkError::Malformed { at: 2, .. })));
    }

    #[test]
    fn test_verify_checks_stack_discipline() {
        let underflow = module(1, vec![Instruction::LoadInput(0), Instruction::Add], 1);
        assert!(matches!(
            underflow.verify(),
            Err(LinkError::Malformed { at: 1, .. })
        ));

        let too_deep = module(
            1,
            vec![
                Instruction::LoadInput(0),
                Instruction::LoadInput(0),
                Instruction::Mul,
            ],
            1,
        );
        assert!(too_deep.verify().is_err());

        let leftover = module(
            1,
            vec![Instruction::LoadInput(0), Instruction::LoadConst(0)],
            2,
        );
        assert!(matches!(
            leftover.verify(),
            Err(LinkError::Malformed { at: 2, .. })
        ));

        let empty = module(1, vec![], 0);
        assert!(empty.verify().is_err());
    }

    #[test]
    fn test_listing() {
        let m = module(
            2,
            vec![
                Instruction::LoadInput(1),
                Instruction::LoadConst(0),
                Instruction::Call(0),
            ],
            2,
        );
        let listing = m.to_string();
        assert!(listing.contains("; entry: evaluate(2 inputs) -> f64, max stack 2"));
        assert!(listing.contains("; constants: c0 = 2"));
        assert!(listing.contains("; functions: f0 = pow/2"));
        assert!(listing.contains("0002  call f0"));
    }
}
