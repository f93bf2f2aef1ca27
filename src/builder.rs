//! Native loading of assembled modules through Cranelift.
//!
//! The stack-machine code of a [`Module`] is lowered into one Cranelift function
//! `evaluate(inputs: *const f64) -> f64`. Stack slots become SSA values during
//! lowering, so the generated code never touches an operand stack at run time.
//!
//! The main entry points are:
//! - `build_native()` - Loads a module as a thread-safe native function
//! - `clif_ir()` - Renders the Cranelift IR a module lowers to

use std::sync::Arc;

use cranelift::prelude::*;
use cranelift_codegen::ir::immediates::Offset32;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module as _};
use isa::TargetIsa;
use log::trace;

use crate::errors::LinkError;
use crate::module::{Instruction, Module, ENTRY_POINT};
use crate::operators::{libm, Builtin, FunctionDescriptor};
use crate::options::CompileOptions;
use crate::types::JITFunction;

/// Largest constant integer exponent expanded into multiplications.
const MAX_INLINE_EXPONENT: f64 = 64.0;

/// Finalized machine code together with the JIT module that owns its memory.
struct NativeCode {
    module: Option<JITModule>,
    entry: *const u8,
}

// SAFETY: the code is immutable after finalization and reads nothing but its
// argument, and the module is only touched again in `drop`.
unsafe impl Send for NativeCode {}
unsafe impl Sync for NativeCode {}

impl NativeCode {
    /// `input` must hold at least the module's declared number of inputs.
    #[inline]
    fn call(&self, input: &[f64]) -> f64 {
        // SAFETY: `entry` was compiled with the signature
        // extern "C" fn(*const f64) -> f64 and stays valid while `module` lives.
        let f = unsafe {
            std::mem::transmute::<*const u8, extern "C" fn(*const f64) -> f64>(self.entry)
        };
        f(input.as_ptr())
    }
}

impl Drop for NativeCode {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: the only pointer into this module's memory is `entry`, which
            // dies with `self`.
            unsafe { module.free_memory() };
        }
    }
}

/// Loads `module` as native code.
///
/// The module must have passed [`Module::verify`]. The returned function does
/// not check the input length, callers do.
///
/// # Errors
/// Returns a LinkError if the host is unsupported or Cranelift rejects the code.
pub(crate) fn build_native(
    module: &Module,
    options: &CompileOptions,
) -> Result<JITFunction, LinkError> {
    let isa = create_isa(options)?;
    let (mut jit, mut ctx) = create_module_and_context(isa);
    build_function_body(&mut ctx, module, &mut jit)?;
    let entry = compile_and_finalize(&mut jit, &mut ctx)?;

    let code = Arc::new(NativeCode {
        module: Some(jit),
        entry,
    });
    Ok(Arc::new(move |input: &[f64]| code.call(input)))
}

/// Renders the Cranelift IR `module` lowers to under `options`, before code generation.
///
/// # Errors
/// Returns a LinkError if the host is unsupported or lowering fails.
pub fn clif_ir(module: &Module, options: &CompileOptions) -> Result<String, LinkError> {
    let isa = create_isa(options)?;
    let (mut jit, mut ctx) = create_module_and_context(isa);
    build_function_body(&mut ctx, module, &mut jit)?;
    Ok(ctx.func.display().to_string())
}

fn set_flag(builder: &mut settings::Builder, name: &str, value: &str) -> Result<(), LinkError> {
    builder
        .set(name, value)
        .map_err(|e| LinkError::Setting(format!("{name}={value}: {e}")))
}

/// Creates an Instruction Set Architecture (ISA) target for the host machine.
///
/// # Errors
/// Returns a LinkError if:
/// - The host machine architecture is not supported
/// - A code generator setting is rejected
pub(crate) fn create_isa(options: &CompileOptions) -> Result<Arc<dyn TargetIsa>, LinkError> {
    let mut flag_builder = settings::builder();

    // cranelift-jit rejects position-independent code on every host
    set_flag(&mut flag_builder, "use_colocated_libcalls", "false")?;
    set_flag(&mut flag_builder, "is_pic", "false")?;

    set_flag(&mut flag_builder, "opt_level", options.opt_level.as_setting())?;
    let verify = if options.verify { "true" } else { "false" };
    set_flag(&mut flag_builder, "enable_verifier", verify)?;

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| LinkError::HostMachineNotSupported(msg.to_string()))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(LinkError::Codegen)
}

/// Creates a JIT module with the built-in shims registered, and a context whose
/// signature takes a pointer to the input array and returns f64.
pub(crate) fn create_module_and_context(isa: Arc<dyn TargetIsa>) -> (JITModule, Context) {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    libm::register_symbols(&mut builder);

    let module = JITModule::new(builder);
    let mut ctx = module.make_context();

    let pointer = module.target_config().pointer_type();
    ctx.func.signature.params.push(AbiParam::new(pointer));
    ctx.func.signature.returns.push(AbiParam::new(types::F64));

    (module, ctx)
}

/// Declares an import for every out-of-line built-in in the function table.
///
/// Inline built-ins get `None`.
fn link_imports(
    jit: &mut dyn cranelift_module::Module,
    functions: &[FunctionDescriptor],
) -> Result<Vec<Option<FuncId>>, LinkError> {
    functions
        .iter()
        .map(|descriptor| match libm::symbol(descriptor.builtin) {
            Some(_) => libm::link_builtin(jit, descriptor.builtin, descriptor.arity).map(Some),
            None => Ok(None),
        })
        .collect()
}

fn build_function_body(
    ctx: &mut Context,
    module: &Module,
    jit: &mut dyn cranelift_module::Module,
) -> Result<(), LinkError> {
    let imports = link_imports(jit, module.functions())?;

    let mut builder_ctx = FunctionBuilderContext::new();
    let mut func_builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

    let entry_block = func_builder.create_block();
    func_builder.append_block_params_for_function_params(entry_block);
    func_builder.switch_to_block(entry_block);
    func_builder.seal_block(entry_block);

    let input_ptr = func_builder.block_params(entry_block)[0];
    let result = lower(module, &imports, &mut func_builder, jit, input_ptr)?;
    func_builder.ins().return_(&[result]);
    func_builder.finalize();

    Ok(())
}

/// SSA value standing in for one operand-stack slot.
#[derive(Clone, Copy)]
struct Operand {
    value: Value,
    /// Known value when the slot holds a constant
    constant: Option<f64>,
}

impl Operand {
    fn of(value: Value) -> Self {
        Self {
            value,
            constant: None,
        }
    }
}

fn pop(stack: &mut Vec<Operand>, at: usize) -> Result<Operand, LinkError> {
    stack.pop().ok_or_else(|| LinkError::Malformed {
        at,
        reason: "operand stack underflow during lowering".to_string(),
    })
}

/// Replays the instruction stream on a compile-time stack of SSA values.
fn lower(
    module: &Module,
    imports: &[Option<FuncId>],
    builder: &mut FunctionBuilder,
    jit: &mut dyn cranelift_module::Module,
    input_ptr: Value,
) -> Result<Value, LinkError> {
    let mut stack: Vec<Operand> = Vec::with_capacity(module.max_stack());
    let mut input_cache: Vec<Option<Value>> = vec![None; module.n_inputs()];

    for (at, instruction) in module.code().iter().enumerate() {
        trace!("lowering {at:04}  {instruction}");
        match *instruction {
            Instruction::LoadInput(slot) => {
                let slot = usize::from(slot);
                let value = match input_cache.get(slot).copied().flatten() {
                    Some(value) => value,
                    None => {
                        let offset = i32::try_from(slot * 8).map_err(|_| LinkError::Malformed {
                            at,
                            reason: format!("input x{slot} offset out of range"),
                        })?;
                        let mem = MemFlags::trusted().with_readonly();
                        let value =
                            builder
                                .ins()
                                .load(types::F64, mem, input_ptr, Offset32::new(offset));
                        if let Some(cached) = input_cache.get_mut(slot) {
                            *cached = Some(value);
                        }
                        value
                    }
                };
                stack.push(Operand::of(value));
            }
            Instruction::LoadConst(index) => {
                let constant = module
                    .constants()
                    .get(usize::from(index))
                    .copied()
                    .ok_or_else(|| LinkError::Malformed {
                        at,
                        reason: format!("constant c{index} out of range"),
                    })?;
                stack.push(Operand {
                    value: builder.ins().f64const(constant),
                    constant: Some(constant),
                });
            }
            Instruction::Add | Instruction::Sub | Instruction::Mul | Instruction::Div => {
                let r = pop(&mut stack, at)?.value;
                let l = pop(&mut stack, at)?.value;
                let value = match instruction {
                    Instruction::Add => builder.ins().fadd(l, r),
                    Instruction::Sub => builder.ins().fsub(l, r),
                    Instruction::Mul => builder.ins().fmul(l, r),
                    _ => builder.ins().fdiv(l, r),
                };
                stack.push(Operand::of(value));
            }
            Instruction::Pow => {
                let exponent = pop(&mut stack, at)?;
                let base = pop(&mut stack, at)?.value;
                let value = match exponent.constant {
                    // 1/x^n underflows to 0 where powf still has a subnormal, so
                    // negative exponents always go through powf
                    Some(e) if e.fract() == 0.0 && (0.0..=MAX_INLINE_EXPONENT).contains(&e) => {
                        generate_optimized_power(builder, base, e as u64)
                    }
                    _ => {
                        let func_id = libm::link_builtin(jit, Builtin::Pow, 2)?;
                        libm::call_builtin(builder, jit, func_id, &[base, exponent.value])
                    }
                };
                stack.push(Operand::of(value));
            }
            Instruction::Neg => {
                let operand = pop(&mut stack, at)?;
                stack.push(Operand {
                    value: builder.ins().fneg(operand.value),
                    constant: operand.constant.map(|c| -c),
                });
            }
            Instruction::Call(index) => {
                let index = usize::from(index);
                let descriptor =
                    module
                        .functions()
                        .get(index)
                        .ok_or_else(|| LinkError::Malformed {
                            at,
                            reason: format!("function f{index} out of range"),
                        })?;
                let value = if descriptor.arity == 2 {
                    let b = pop(&mut stack, at)?.value;
                    let a = pop(&mut stack, at)?.value;
                    lower_call(builder, jit, descriptor.builtin, imports[index], &[a, b])
                } else {
                    let x = pop(&mut stack, at)?.value;
                    lower_call(builder, jit, descriptor.builtin, imports[index], &[x])
                };
                stack.push(Operand::of(value?));
            }
        }
    }

    let result = pop(&mut stack, module.code().len())?;
    if !stack.is_empty() {
        return Err(LinkError::Malformed {
            at: module.code().len(),
            reason: format!("{} extra values left after lowering", stack.len()),
        });
    }
    Ok(result.value)
}

/// Emits a built-in call: inline instructions where Cranelift has them, a shim call otherwise.
fn lower_call(
    builder: &mut FunctionBuilder,
    jit: &mut dyn cranelift_module::Module,
    builtin: Builtin,
    import: Option<FuncId>,
    args: &[Value],
) -> Result<Value, LinkError> {
    let value = match (builtin, args) {
        (Builtin::Abs, &[x]) => builder.ins().fabs(x),
        (Builtin::Floor, &[x]) => builder.ins().floor(x),
        (Builtin::Round, &[x]) => {
            let half = builder.ins().f64const(0.5);
            let shifted = builder.ins().fadd(x, half);
            builder.ins().floor(shifted)
        }
        // fmax/fmin return NaN when either operand is NaN
        (Builtin::Max, &[a, b]) => builder.ins().fmax(a, b),
        (Builtin::Min, &[a, b]) => builder.ins().fmin(a, b),
        _ => {
            let func_id = import.ok_or_else(|| {
                LinkError::Declaration(format!("{builtin:?} was not linked"))
            })?;
            libm::call_builtin(builder, jit, func_id, args)
        }
    };
    Ok(value)
}

/// Expands `base^exp` into multiplications, by binary exponentiation past the
/// small cases.
fn generate_optimized_power(builder: &mut FunctionBuilder, base: Value, exp: u64) -> Value {
    match exp {
        0 => builder.ins().f64const(1.0),
        1 => base,
        2 => builder.ins().fmul(base, base),
        3 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, base)
        }
        4 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, square)
        }
        _ => {
            let mut result = builder.ins().f64const(1.0);
            let mut current_base = base;
            let mut remaining = exp;

            while remaining > 0 {
                if remaining & 1 == 1 {
                    result = builder.ins().fmul(result, current_base);
                }
                if remaining > 1 {
                    current_base = builder.ins().fmul(current_base, current_base);
                }
                remaining >>= 1;
            }
            result
        }
    }
}

/// Compiles and finalizes the entry function, returning its address.
///
/// # Errors
/// Returns a LinkError if:
/// - Function declaration fails
/// - Function definition fails
/// - Module finalization fails
fn compile_and_finalize(jit: &mut JITModule, ctx: &mut Context) -> Result<*const u8, LinkError> {
    let func_id = jit
        .declare_function(ENTRY_POINT, Linkage::Local, &ctx.func.signature)
        .map_err(|msg| LinkError::Declaration(msg.to_string()))?;

    jit.define_function(func_id, ctx)
        .map_err(|msg| LinkError::Definition(msg.to_string()))?;

    jit.clear_context(ctx);
    jit.finalize_definitions()?;

    Ok(jit.get_finalized_function(func_id))
}
