//! MIR optimizer (spec §4.D): a fixed-point loop over independent passes,
//! capped at 16 iterations so a pathological interaction between passes
//! can never loop forever. [`crate::config::OptLevel`] gates which passes
//! beyond constant folding and dead-code elimination participate.
//!
//! Loop recognition (spec §4.D.5) is not one of these passes: MIR has no
//! opcode or function flag to record "this back-edge is a countable
//! loop" on, so marking it here would have nowhere to persist the result
//! between stages. Instead [`loops::countable_djnz_loops`] is a pure
//! analysis the Z80 backend (stage E) calls directly when it lowers a
//! loop's back-edge, recomputing the answer from the CFG at the point it
//! is needed.

mod const_fold;
mod dce;
pub mod loops;
mod schedule;
mod strength;
mod tailcall;

use crate::config::{Config, OptLevel};
use crate::ir::function::Function;
use crate::ir::module::Module;

const MAX_FIXPOINT_ITERATIONS: u32 = 16;

/// Runs the optimizer over every function in `module`, in place.
pub fn run(module: &mut Module, config: &Config) {
    let func_ids: Vec<_> = module.function_ids().collect();
    for id in func_ids {
        optimize_function(module.function_mut(id), config);
    }
}

fn optimize_function(f: &mut Function, config: &Config) {
    log::trace!("optimizing {} at {:?}", f.name, config.optimize);
    for iteration in 0..MAX_FIXPOINT_ITERATIONS {
        let mut changed = false;
        changed |= const_fold::run(f);
        changed |= dce::run(f);

        if config.optimize >= OptLevel::Default {
            changed |= strength::run(f);
            changed |= schedule::run(f);
        }
        if config.optimize >= OptLevel::Aggressive {
            changed |= tailcall::run(f);
        }

        log::trace!("{}: fixpoint iteration {} changed={}", f.name, iteration, changed);

        let last_iteration = iteration + 1 == MAX_FIXPOINT_ITERATIONS;
        if last_iteration {
            log::debug!("{}: optimizer hit the {}-iteration cap without stabilizing", f.name, MAX_FIXPOINT_ITERATIONS);
            break;
        }
        // Aggressive mode runs every pass the full 16 times even once
        // stable, per spec §6; other levels stop as soon as nothing
        // changed in a round.
        if !changed && config.optimize != OptLevel::Aggressive {
            log::trace!("{}: optimizer stabilized after {} iteration(s)", f.name, iteration + 1);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::{ArithWidth, Imm, Opcode};
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData, TypeInterner};

    #[test]
    fn constant_add_folds_and_then_becomes_dead_if_unused() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut module = Module::new();
        let mut f = Function::new("f", u8_ty, None);
        let a = f.new_register(u8_ty);
        let b = f.new_register(u8_ty);
        let sum = f.new_register(u8_ty);
        let result = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: a, imm: Imm(2) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: b, imm: Imm(3) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Add { dst: sum, lhs: a, rhs: b, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: result, imm: Imm(99) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(result) }, SourceSpan::SYNTHETIC);
        let id = module.declare_function(f);

        optimize_function(module.function_mut(id), &Config::default());

        let optimized = module.function(id);
        // `sum` is computed but never used, so DCE should remove both the
        // fold and its now-redundant inputs, leaving only the live path.
        assert!(optimized.insts.iter().all(|i| !matches!(i.opcode, Opcode::Add { .. })));
        assert!(optimized
            .insts
            .iter()
            .any(|i| matches!(i.opcode, Opcode::Return { value: Some(_) })));
    }
}
