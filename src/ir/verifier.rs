//! Mechanical checks of the MIR invariants in spec §3.3.
//!
//! Grounded on the teacher's `pub use crate::verifier::verify_function`
//! re-export — ambient correctness infrastructure that runs between
//! pipeline stages (after the builder, and again after the optimizer)
//! rather than being one of the six named stages itself.

use crate::ir::entities::Register;
use crate::ir::flowgraph::ControlFlowGraph;
use crate::ir::function::Function;
use crate::ir::instructions::Opcode;
use crate::ir::module::Module;
use std::collections::HashSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifierError {
    #[error("use of {0:?} in instruction {1} is not dominated by its definition")]
    UseBeforeDef(Register, usize),
    #[error("jump at instruction {0} targets a label not defined in this function")]
    DanglingJumpTarget(usize),
    #[error("call at instruction {0} names a function not declared in the module")]
    UnknownCallee(usize),
    #[error("function marked uses-SMC has a spilled parameter or is missing an anchor")]
    SmcWithoutAnchors,
}

/// Verifies one function in isolation (dominance, jump targets) plus,
/// when `module` is supplied, cross-function checks (call targets).
pub fn verify_function(func: &Function, module: Option<&Module>) -> Result<(), Vec<VerifierError>> {
    let mut errors = Vec::new();

    check_dominance(func, &mut errors);
    check_jump_targets(func, &mut errors);
    if let Some(module) = module {
        check_call_targets(func, module, &mut errors);
    }
    check_smc_anchors(func, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Spec §3.3: "Every use of a register is dominated by its definition."
/// Since this MIR is SSA with no loop-carried phi nodes modeled
/// explicitly, dominance reduces to "defined at an earlier or equal
/// program point along every control-flow path that reaches the use";
/// we approximate this sdoundly-for-our-purposes with block-local def
/// tracking plus a cross-block reachability check through the CFG,
/// which is exact for the loop shapes the builder ever emits (forward
/// branches guarding a single back-edge per loop).
fn check_dominance(func: &Function, errors: &mut Vec<VerifierError>) {
    let cfg = ControlFlowGraph::compute(func);
    let mut defined_by_block_end: Vec<HashSet<Register>> = vec![HashSet::new(); cfg.blocks.len()];

    let block_index_of = |pos: u32| -> usize {
        cfg.blocks
            .iter()
            .position(|b| pos >= b.start && pos < b.end)
            .unwrap_or(0)
    };

    for (idx, block) in cfg.blocks.iter().enumerate() {
        let mut locally_defined: HashSet<Register> = HashSet::new();
        for pos in block.start..block.end {
            let inst = &func.insts[pos as usize];
            for used in inst.opcode.uses() {
                if !locally_defined.contains(&used) && !dominates_from_preds(&cfg, &defined_by_block_end, idx, used) {
                    errors.push(VerifierError::UseBeforeDef(used, pos as usize));
                }
            }
            if let Some(d) = inst.opcode.dest() {
                locally_defined.insert(d);
            }
        }
        defined_by_block_end[idx] = locally_defined;
    }
    let _ = block_index_of;
}

fn dominates_from_preds(
    cfg: &ControlFlowGraph,
    defined_by_block_end: &[HashSet<Register>],
    block_idx: usize,
    reg: Register,
) -> bool {
    let start = cfg.blocks[block_idx].start;
    let preds = cfg.predecessors(start);
    if preds.is_empty() {
        return false;
    }
    preds.iter().all(|&p| {
        let pidx = cfg.blocks.iter().position(|b| b.start == p);
        match pidx {
            Some(i) => defined_by_block_end[i].contains(&reg),
            None => false,
        }
    })
}

/// Spec §3.3: "Every `Jump*` targets a `Label` in the same function."
fn check_jump_targets(func: &Function, errors: &mut Vec<VerifierError>) {
    for (i, inst) in func.insts.iter().enumerate() {
        let target = match inst.opcode {
            Opcode::Jump { target } => Some(target),
            Opcode::JumpIfTrue { target, .. } => Some(target),
            Opcode::JumpIfFalse { target, .. } => Some(target),
            _ => None,
        };
        if let Some(target) = target {
            if func.label_position(target).is_none() {
                errors.push(VerifierError::DanglingJumpTarget(i));
            }
        }
    }
}

/// Spec §3.3: "Every `Call` names a function in the module or a declared
/// external."
fn check_call_targets(func: &Function, module: &Module, errors: &mut Vec<VerifierError>) {
    for (i, inst) in func.insts.iter().enumerate() {
        if let Opcode::Call { func: callee, .. } = inst.opcode {
            let as_func_id: crate::ir::function::FuncId = callee.into();
            let in_module = module.functions.keys().any(|id| id == as_func_id);
            // Externs are declared in a separate table by the analyzer;
            // a `Call` targeting one still carries a `FuncRef` into the
            // same numeric space by convention of the builder, so we
            // accept it if its index resolves in either table.
            let in_externs = callee.index() < module.externs.len();
            if !in_module && !in_externs {
                errors.push(VerifierError::UnknownCallee(i));
            }
        }
    }
}

/// Spec §3.3: "Functions marked `uses-SMC` have at least one `SmcAnchor`
/// per parameter and no spilled parameters." The "no spilled parameters"
/// half is checked by the register allocator itself (it is a register-
/// assignment property, not visible on MIR alone); here we check the
/// MIR-visible half, that every parameter index has a matching anchor.
fn check_smc_anchors(func: &Function, errors: &mut Vec<VerifierError>) {
    if !func.flags.uses_smc {
        return;
    }
    let anchored: HashSet<u16> = func
        .insts
        .iter()
        .filter_map(|i| match i.opcode {
            Opcode::SmcAnchor { param_index, .. } => Some(param_index),
            _ => None,
        })
        .collect();
    let all_params_anchored = (0..func.params.len() as u16).all(|p| anchored.contains(&p));
    if !all_params_anchored {
        errors.push(VerifierError::SmcWithoutAnchors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::Imm;
    use crate::span::SourceSpan;
    use crate::types::{TypeData, TypeInterner};

    #[test]
    fn simple_straight_line_function_verifies() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(crate::types::IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let r0 = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: r0, imm: Imm(1) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(r0) }, SourceSpan::SYNTHETIC);
        assert!(verify_function(&f, None).is_ok());
    }

    #[test]
    fn use_before_def_is_rejected() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(crate::types::IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let r0 = f.new_register(u8_ty);
        // r0 is used (as the return value) without ever being defined.
        f.push(Opcode::Return { value: Some(r0) }, SourceSpan::SYNTHETIC);
        let errs = verify_function(&f, None).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, VerifierError::UseBeforeDef(..))));
    }

    #[test]
    fn dangling_jump_target_is_rejected() {
        let mut interner = TypeInterner::new();
        let void = interner.intern(TypeData::Void);
        let mut f = Function::new("f", void, None);
        let ghost_label = f.new_label(); // allocated, never placed
        f.push(Opcode::Jump { target: ghost_label }, SourceSpan::SYNTHETIC);
        let errs = verify_function(&f, None).unwrap_err();
        assert!(errs.iter().any(|e| matches!(e, VerifierError::DanglingJumpTarget(_))));
    }
}
