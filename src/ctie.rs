//! Compile-time interface execution (spec §4.C).
//!
//! A small interpreter over MIR that evaluates pure functions called with
//! fully-constant arguments, replacing the call with a `LoadConst` of the
//! result. This runs as its own stage between the builder and the
//! optimizer: by the time stage D's constant folding runs, calls that
//! could be resolved at compile time already have been, so folding never
//! has to reason through a call boundary itself.
//!
//! A register's single static definition (spec §3.3) makes "is this
//! argument fully constant" a local question: look at the instruction
//! that defines it and see whether it is a `LoadConst`. No dataflow
//! analysis is needed here, unlike in a non-SSA IR.

use crate::entity::EntityRef;
use crate::ir::entities::Register;
use crate::ir::function::{FuncId, Function};
use crate::ir::instructions::{Imm, Opcode};
use crate::ir::module::Module;
use std::collections::HashMap;

/// Interpreter value domain: typed integers (booleans fold into `0`/`1`)
/// and byte sequences for string literals (spec §4.C).
#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Int(i64),
    Bytes(Vec<u8>),
}

impl Value {
    fn as_int(&self) -> Result<i64, ExecError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Bytes(_) => Err(ExecError::Unsupported),
        }
    }
}

/// Why a call could not be folded. Every variant means "leave the call
/// untouched" (spec §4.C): none of these are reported as diagnostics.
#[derive(Debug)]
enum ExecError {
    BudgetExhausted,
    Impure,
    Unsupported,
    DivByZero,
}

/// Runs CTIE over every function in `module`, folding eligible calls in
/// place. Returns the number of calls folded, purely for caller logging.
pub fn run(module: &mut Module, max_steps: u64) -> usize {
    let func_ids: Vec<FuncId> = module.function_ids().collect();
    let mut folded = 0;
    for id in func_ids {
        folded += fold_function(module, id, max_steps);
    }
    folded
}

fn fold_function(module: &mut Module, id: FuncId, max_steps: u64) -> usize {
    let insts_len = module.function(id).insts.len();
    let mut folded = 0;
    for idx in 0..insts_len {
        let (func, args, dst) = {
            let f = module.function(id);
            match &f.insts[idx].opcode {
                Opcode::Call { func, args, dst, tail: false } => (*func, args.clone(), *dst),
                _ => continue,
            }
        };
        let Some(dst) = dst else { continue };
        let callee_id: FuncId = func.into();

        let caller = module.function(id);
        let Some(args) = args
            .iter()
            .map(|r| const_value_of(caller, *r))
            .collect::<Option<Vec<Value>>>()
        else {
            continue;
        };

        let mut interp = Interpreter { module: &*module, steps_left: max_steps };
        match interp.call(callee_id, &args) {
            Ok(Some(Value::Int(result))) => {
                let f = module.function_mut(id);
                f.insts[idx].opcode = Opcode::LoadConst { dst, imm: Imm(result) };
                folded += 1;
            }
            // Void results, byte-sequence results, or any execution error
            // leave the call as-is (spec §4.C: "the call is left
            // untouched").
            _ => {}
        }
    }
    folded
}

/// If `reg`'s single static definition in `f` is a `LoadConst`, its
/// constant value; `None` otherwise.
fn const_value_of(f: &Function, reg: Register) -> Option<Value> {
    f.insts.iter().find_map(|inst| match &inst.opcode {
        Opcode::LoadConst { dst, imm } if *dst == reg => Some(Value::Int(imm.0)),
        _ => None,
    })
}

struct Interpreter<'m> {
    module: &'m Module,
    steps_left: u64,
}

impl<'m> Interpreter<'m> {
    fn call(&mut self, func_id: FuncId, args: &[Value]) -> Result<Option<Value>, ExecError> {
        let f = self.module.function(func_id);
        if !f.flags.is_pure {
            return Err(ExecError::Impure);
        }

        let mut regs: HashMap<Register, Value> = HashMap::new();
        let mut pc: usize = 0;
        loop {
            let Some(inst) = f.insts.get(pc) else { return Ok(None) };
            self.steps_left = self.steps_left.checked_sub(1).ok_or(ExecError::BudgetExhausted)?;

            match &inst.opcode {
                Opcode::LoadConst { dst, imm } => {
                    regs.insert(*dst, Value::Int(imm.0));
                }
                Opcode::LoadParam { dst, index } => {
                    let v = args.get(*index as usize).cloned().ok_or(ExecError::Unsupported)?;
                    regs.insert(*dst, v);
                }
                Opcode::Move { dst, src } => {
                    let v = read(&regs, *src)?;
                    regs.insert(*dst, v);
                }
                Opcode::Add { dst, lhs, rhs, .. } => binop(&mut regs, *dst, *lhs, *rhs, i64::wrapping_add)?,
                Opcode::Sub { dst, lhs, rhs, .. } => binop(&mut regs, *dst, *lhs, *rhs, i64::wrapping_sub)?,
                Opcode::Mul { dst, lhs, rhs, .. } => binop(&mut regs, *dst, *lhs, *rhs, i64::wrapping_mul)?,
                Opcode::Div { dst, lhs, rhs, .. } => {
                    let (a, b) = operands(&regs, *lhs, *rhs)?;
                    if b == 0 {
                        return Err(ExecError::DivByZero);
                    }
                    regs.insert(*dst, Value::Int(a.wrapping_div(b)));
                }
                Opcode::Mod { dst, lhs, rhs, .. } => {
                    let (a, b) = operands(&regs, *lhs, *rhs)?;
                    if b == 0 {
                        return Err(ExecError::DivByZero);
                    }
                    regs.insert(*dst, Value::Int(a.wrapping_rem(b)));
                }
                Opcode::And { dst, lhs, rhs } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| a & b)?,
                Opcode::Or { dst, lhs, rhs } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| a | b)?,
                Opcode::Xor { dst, lhs, rhs } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| a ^ b)?,
                Opcode::Shl { dst, lhs, rhs } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| a.wrapping_shl(b as u32))?,
                Opcode::Shr { dst, lhs, rhs } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| a.wrapping_shr(b as u32))?,
                Opcode::Eq { dst, lhs, rhs } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| (a == b) as i64)?,
                Opcode::Ne { dst, lhs, rhs } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| (a != b) as i64)?,
                Opcode::Lt { dst, lhs, rhs, .. } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| (a < b) as i64)?,
                Opcode::Le { dst, lhs, rhs, .. } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| (a <= b) as i64)?,
                Opcode::Gt { dst, lhs, rhs, .. } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| (a > b) as i64)?,
                Opcode::Ge { dst, lhs, rhs, .. } => binop(&mut regs, *dst, *lhs, *rhs, |a, b| (a >= b) as i64)?,
                Opcode::Jump { target } => {
                    pc = label_pc(f, *target)?;
                    continue;
                }
                Opcode::JumpIfTrue { cond, target } => {
                    if read(&regs, *cond)?.as_int()? != 0 {
                        pc = label_pc(f, *target)?;
                        continue;
                    }
                }
                Opcode::JumpIfFalse { cond, target } => {
                    if read(&regs, *cond)?.as_int()? == 0 {
                        pc = label_pc(f, *target)?;
                        continue;
                    }
                }
                Opcode::Label { .. } => {}
                Opcode::Call { func, args: call_args, dst, .. } => {
                    let callee_id: FuncId = (*func).into();
                    let arg_vals: Vec<Value> = call_args
                        .iter()
                        .map(|r| read(&regs, *r))
                        .collect::<Result<_, _>>()?;
                    let result = self.call(callee_id, &arg_vals)?;
                    if let Some(d) = dst {
                        regs.insert(*d, result.ok_or(ExecError::Unsupported)?);
                    }
                }
                Opcode::Return { value } => {
                    return match value {
                        Some(r) => Ok(Some(read(&regs, *r)?)),
                        None => Ok(None),
                    };
                }
                Opcode::LoadString { dst, string } => {
                    let bytes = self.module.strings.bytes(string.index() as u32).to_vec();
                    regs.insert(*dst, Value::Bytes(bytes));
                }
                // I/O, memory, and global access are observable effects
                // (or read state outside this interpreter's value domain)
                // that a *pure* function can never reach by construction,
                // but guard anyway rather than trust the flag alone.
                _ => return Err(ExecError::Impure),
            }
            pc += 1;
        }
    }
}

fn read(regs: &HashMap<Register, Value>, r: Register) -> Result<Value, ExecError> {
    regs.get(&r).cloned().ok_or(ExecError::Unsupported)
}

fn operands(regs: &HashMap<Register, Value>, lhs: Register, rhs: Register) -> Result<(i64, i64), ExecError> {
    Ok((read(regs, lhs)?.as_int()?, read(regs, rhs)?.as_int()?))
}

fn binop(
    regs: &mut HashMap<Register, Value>,
    dst: Register,
    lhs: Register,
    rhs: Register,
    f: impl FnOnce(i64, i64) -> i64,
) -> Result<(), ExecError> {
    let (a, b) = operands(regs, lhs, rhs)?;
    regs.insert(dst, Value::Int(f(a, b)));
    Ok(())
}

fn label_pc(f: &Function, target: crate::ir::entities::Label) -> Result<usize, ExecError> {
    f.label_position(target).map(|p| p as usize).ok_or(ExecError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::ArithWidth;
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData, TypeInterner};

    fn double_fn(u8_ty: crate::types::Type) -> Function {
        let mut f = Function::new("double", u8_ty, None);
        f.flags.is_pure = true;
        let p = f.new_register(u8_ty);
        let two = f.new_register(u8_ty);
        let r = f.new_register(u8_ty);
        f.push(Opcode::LoadParam { dst: p, index: 0 }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: two, imm: Imm(2) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Mul { dst: r, lhs: p, rhs: two, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(r) }, SourceSpan::SYNTHETIC);
        f
    }

    #[test]
    fn call_with_constant_argument_folds_to_load_const() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut module = Module::new();
        let callee_id = module.declare_function(double_fn(u8_ty));

        let mut caller = Function::new("main", u8_ty, None);
        let c = caller.new_register(u8_ty);
        let dst = caller.new_register(u8_ty);
        caller.push(Opcode::LoadConst { dst: c, imm: Imm(21) }, SourceSpan::SYNTHETIC);
        caller.push(
            Opcode::Call { func: callee_id.into(), args: vec![c], dst: Some(dst), tail: false },
            SourceSpan::SYNTHETIC,
        );
        let caller_id = module.declare_function(caller);

        let folded = run(&mut module, 1_000);
        assert_eq!(folded, 1);
        match module.function(caller_id).insts[1].opcode {
            Opcode::LoadConst { imm: Imm(42), .. } => {}
            ref other => panic!("expected folded LoadConst(42), got {:?}", other),
        }
        // the callee itself is untouched
        assert_eq!(module.function(callee_id).insts.len(), 4);
    }

    #[test]
    fn call_with_non_constant_argument_is_left_untouched() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut module = Module::new();
        let callee_id = module.declare_function(double_fn(u8_ty));

        let mut caller = Function::new("main", u8_ty, None);
        let p = caller.new_register(u8_ty);
        let dst = caller.new_register(u8_ty);
        caller.push(Opcode::LoadParam { dst: p, index: 0 }, SourceSpan::SYNTHETIC);
        caller.push(
            Opcode::Call { func: callee_id.into(), args: vec![p], dst: Some(dst), tail: false },
            SourceSpan::SYNTHETIC,
        );
        let caller_id = module.declare_function(caller);

        let folded = run(&mut module, 1_000);
        assert_eq!(folded, 0);
        assert!(matches!(
            module.function(caller_id).insts[1].opcode,
            Opcode::Call { .. }
        ));
    }

    #[test]
    fn call_to_impure_function_is_left_untouched() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut module = Module::new();
        let mut impure = double_fn(u8_ty);
        impure.flags.is_pure = false;
        let callee_id = module.declare_function(impure);

        let mut caller = Function::new("main", u8_ty, None);
        let c = caller.new_register(u8_ty);
        let dst = caller.new_register(u8_ty);
        caller.push(Opcode::LoadConst { dst: c, imm: Imm(21) }, SourceSpan::SYNTHETIC);
        caller.push(
            Opcode::Call { func: callee_id.into(), args: vec![c], dst: Some(dst), tail: false },
            SourceSpan::SYNTHETIC,
        );
        module.declare_function(caller);

        assert_eq!(run(&mut module, 1_000), 0);
    }

    #[test]
    fn budget_exhaustion_leaves_call_untouched() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut module = Module::new();
        let callee_id = module.declare_function(double_fn(u8_ty));

        let mut caller = Function::new("main", u8_ty, None);
        let c = caller.new_register(u8_ty);
        let dst = caller.new_register(u8_ty);
        caller.push(Opcode::LoadConst { dst: c, imm: Imm(21) }, SourceSpan::SYNTHETIC);
        caller.push(
            Opcode::Call { func: callee_id.into(), args: vec![c], dst: Some(dst), tail: false },
            SourceSpan::SYNTHETIC,
        );
        module.declare_function(caller);

        // one step is not enough to execute the four-instruction callee.
        assert_eq!(run(&mut module, 1), 0);
    }
}
