//! Portable stack-machine interpreter for assembled modules.
//!
//! Used when the host has no JIT support or when asked for explicitly. It runs
//! the same instruction stream the JIT lowers, with the same built-in semantics,
//! so both backends agree on every input up to floating-point rounding of `^`.

use std::sync::Arc;

use crate::module::{Instruction, Module};
use crate::operators::FunctionDescriptor;
use crate::types::JITFunction;

/// Modules whose declared depth fits here run on a fixed array instead of a `Vec`.
const INLINE_STACK_SIZE: usize = 32;

/// A verified module prepared for interpretation.
#[derive(Debug, Clone)]
pub(crate) struct Interpreter {
    code: Vec<Instruction>,
    constants: Vec<f64>,
    functions: Vec<FunctionDescriptor>,
    max_stack: usize,
}

impl Interpreter {
    /// `module` must have passed [`Module::verify`].
    pub(crate) fn new(module: &Module) -> Self {
        Self {
            code: module.code().to_vec(),
            constants: module.constants().to_vec(),
            functions: module.functions().to_vec(),
            max_stack: module.max_stack(),
        }
    }

    pub(crate) fn into_function(self) -> JITFunction {
        let interpreter = Arc::new(self);
        Arc::new(move |input: &[f64]| interpreter.evaluate(input))
    }

    /// Runs the module on `input`, which must hold every input the code loads.
    pub(crate) fn evaluate(&self, input: &[f64]) -> f64 {
        if self.max_stack <= INLINE_STACK_SIZE {
            let mut stack = [0.0; INLINE_STACK_SIZE];
            self.run(input, &mut stack)
        } else {
            let mut stack = vec![0.0; self.max_stack];
            self.run(input, &mut stack)
        }
    }

    fn run(&self, input: &[f64], stack: &mut [f64]) -> f64 {
        // Number of live slots. Verification guarantees it stays within
        // 1..=max_stack wherever an instruction reads it.
        let mut len = 0usize;

        for instruction in &self.code {
            match *instruction {
                Instruction::LoadInput(slot) => {
                    stack[len] = input[usize::from(slot)];
                    len += 1;
                }
                Instruction::LoadConst(index) => {
                    stack[len] = self.constants[usize::from(index)];
                    len += 1;
                }
                Instruction::Add => {
                    len -= 1;
                    stack[len - 1] += stack[len];
                }
                Instruction::Sub => {
                    len -= 1;
                    stack[len - 1] -= stack[len];
                }
                Instruction::Mul => {
                    len -= 1;
                    stack[len - 1] *= stack[len];
                }
                Instruction::Div => {
                    len -= 1;
                    stack[len - 1] /= stack[len];
                }
                Instruction::Pow => {
                    len -= 1;
                    stack[len - 1] = stack[len - 1].powf(stack[len]);
                }
                Instruction::Neg => {
                    stack[len - 1] = -stack[len - 1];
                }
                Instruction::Call(index) => {
                    let descriptor = &self.functions[usize::from(index)];
                    if descriptor.arity == 2 {
                        len -= 1;
                        stack[len - 1] = descriptor.builtin.apply2(stack[len - 1], stack[len]);
                    } else {
                        stack[len - 1] = descriptor.builtin.apply1(stack[len - 1]);
                    }
                }
            }
        }

        stack[0]
    }
}
