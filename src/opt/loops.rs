//! Loop recognition (spec §4.D.5): identifies back-edges that are
//! 8-bit counted loops decrementing a single register toward zero, so
//! the Z80 backend can lower them to `DJNZ` instead of a generic
//! compare-and-branch. See [`crate::opt`]'s module docs for why this is
//! an analysis called from the backend rather than a MIR-mutating pass.

use crate::ir::entities::{Label, Register};
use crate::ir::flowgraph::ControlFlowGraph;
use crate::ir::function::Function;
use crate::ir::instructions::{ArithWidth, Opcode};
use std::collections::HashSet;

/// The labels of loop header blocks recognized as 8-bit counted loops:
/// a back-edge whose block decrements a register by exactly one, of
/// `ArithWidth::U8`, and branches back while that register is nonzero.
pub fn countable_djnz_loops(f: &Function) -> HashSet<Label> {
    let cfg = ControlFlowGraph::compute(f);
    let mut headers = HashSet::new();

    for block in &cfg.blocks {
        if block.end == block.start {
            continue;
        }
        let last = &f.insts[(block.end - 1) as usize].opcode;
        let (cond, target) = match last {
            Opcode::JumpIfTrue { cond, target } => (*cond, *target),
            Opcode::JumpIfFalse { cond, target } => (*cond, *target),
            _ => continue,
        };
        // The back-edge must return to this same block (a single-block
        // loop body) and the branch condition must be "counter != 0",
        // computed from decrementing a register by exactly one.
        if f.label_position(target) != Some(block.start) {
            continue;
        }
        if decrements_by_one(f, block.start, block.end, cond) {
            if let Some(label) = label_at(f, block.start) {
                headers.insert(label);
            }
        }
    }
    headers
}

/// Whether `cond` is defined, within `[start, end)`, by subtracting a
/// register whose own constant value is exactly one. Registers are
/// single-static-definition, so each lookup is a direct instruction scan
/// rather than a dataflow fixed point.
fn decrements_by_one(f: &Function, start: u32, end: u32, cond: Register) -> bool {
    let subtrahend = f.insts[start as usize..end as usize].iter().find_map(|inst| match inst.opcode {
        Opcode::Sub { dst, rhs, width: ArithWidth::U8, .. } if dst == cond => Some(rhs),
        _ => None,
    });
    let Some(subtrahend) = subtrahend else { return false };
    f.insts.iter().any(|inst| {
        matches!(inst.opcode, Opcode::LoadConst { dst, imm } if dst == subtrahend && imm.0 == 1)
    })
}

fn label_at(f: &Function, pos: u32) -> Option<Label> {
    for idx in (0..=pos).rev() {
        if let Opcode::Label { label } = f.insts[idx as usize].opcode {
            return Some(label);
        }
        if idx == 0 {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::Imm;
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData, TypeInterner};

    #[test]
    fn straight_line_function_has_no_loops() {
        let mut interner = TypeInterner::new();
        let void = interner.intern(TypeData::Void);
        let mut f = Function::new("f", void, None);
        f.push(Opcode::Return { value: None }, SourceSpan::SYNTHETIC);
        assert!(countable_djnz_loops(&f).is_empty());
    }

    #[test]
    fn decrement_and_branch_loop_is_recognized() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let void = interner.intern(TypeData::Void);
        let mut f = Function::new("f", void, None);
        let counter = f.new_register(u8_ty);
        let one = f.new_register(u8_ty);
        let decremented = f.new_register(u8_ty);
        let header = f.new_label();
        let exit = f.new_label();

        f.push(Opcode::LoadConst { dst: counter, imm: Imm(10) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Label { label: header }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: one, imm: Imm(1) }, SourceSpan::SYNTHETIC);
        f.push(
            Opcode::Sub { dst: decremented, lhs: counter, rhs: one, width: ArithWidth::U8 },
            SourceSpan::SYNTHETIC,
        );
        f.push(Opcode::JumpIfTrue { cond: decremented, target: header }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Label { label: exit }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: None }, SourceSpan::SYNTHETIC);

        let loops = countable_djnz_loops(&f);
        assert_eq!(loops.len(), 1);
        assert!(loops.contains(&header));
    }
}
