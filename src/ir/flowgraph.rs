//! Control-flow graph recovered from a flat MIR instruction stream.
//!
//! Grounded on `cranelift-codegen`'s `flowgraph::ControlFlowGraph` (a
//! mapping of blocks to predecessors/successors), adapted from EBB-keyed
//! blocks to basic blocks recovered from [`Opcode::Label`] markers, since
//! this MIR has no block container of its own (spec §3.2 is a flat
//! instruction sequence). Used by register-pressure scheduling (spec
//! §4.D.3), loop recognition (spec §4.D.5), and the dominance check in
//! [`crate::ir::verifier`].

use crate::ir::entities::Label;
use crate::ir::function::Function;
use crate::ir::instructions::Opcode;
use std::collections::HashMap;

/// A maximal straight-line run of instructions: `[start, end)` indices
/// into `Function::insts`, beginning at a label (or function entry) and
/// ending just after a control-transfer instruction (or at the next
/// label).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub start: u32,
    pub end: u32,
}

/// Successor/predecessor edges between basic blocks, indexed by the
/// basic block's start offset (its entry label's position, or 0 for the
/// function's entry block).
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    pub blocks: Vec<BasicBlock>,
    successors: HashMap<u32, Vec<u32>>,
    predecessors: HashMap<u32, Vec<u32>>,
}

impl ControlFlowGraph {
    /// Recomputes the CFG from scratch. Cheap enough (single linear pass)
    /// that passes call this on demand rather than trying to keep it
    /// incrementally valid across edits, matching the teacher's own
    /// `compute`/`recompute` split but collapsing it since this MIR has
    /// no separate "invalidate" bookkeeping to preserve.
    pub fn compute(func: &Function) -> Self {
        let mut block_starts = vec![0u32];
        for (i, inst) in func.insts.iter().enumerate() {
            if let Opcode::Label { .. } = inst.opcode {
                if i as u32 != 0 {
                    block_starts.push(i as u32);
                }
            }
        }
        block_starts.sort_unstable();
        block_starts.dedup();

        let mut blocks = Vec::with_capacity(block_starts.len());
        for (idx, &start) in block_starts.iter().enumerate() {
            let end = block_starts
                .get(idx + 1)
                .copied()
                .unwrap_or(func.insts.len() as u32);
            blocks.push(BasicBlock { start, end });
        }

        let mut label_to_start: HashMap<Label, u32> = HashMap::new();
        for inst in &func.insts {
            if let Opcode::Label { label } = inst.opcode {
                let start = block_starts
                    .iter()
                    .rev()
                    .find(|&&s| s <= func_label_index(func, label))
                    .copied()
                    .unwrap_or(0);
                label_to_start.insert(label, start);
            }
        }

        let mut successors: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut predecessors: HashMap<u32, Vec<u32>> = HashMap::new();
        for block in &blocks {
            let mut succs = Vec::new();
            if block.end > block.start {
                match &func.insts[(block.end - 1) as usize].opcode {
                    Opcode::Jump { target } => {
                        if let Some(&s) = label_to_start.get(target) {
                            succs.push(s);
                        }
                    }
                    Opcode::JumpIfTrue { target, .. } | Opcode::JumpIfFalse { target, .. } => {
                        if let Some(&s) = label_to_start.get(target) {
                            succs.push(s);
                        }
                        if block.end < func.insts.len() as u32 {
                            succs.push(block.end);
                        }
                    }
                    Opcode::Return { .. } => {}
                    _ => {
                        if block.end < func.insts.len() as u32 {
                            succs.push(block.end);
                        }
                    }
                }
            }
            for &s in &succs {
                predecessors.entry(s).or_default().push(block.start);
            }
            successors.insert(block.start, succs);
        }

        ControlFlowGraph {
            blocks,
            successors,
            predecessors,
        }
    }

    pub fn successors(&self, block_start: u32) -> &[u32] {
        self.successors.get(&block_start).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, block_start: u32) -> &[u32] {
        self.predecessors.get(&block_start).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn block_containing(&self, inst_index: u32) -> Option<BasicBlock> {
        self.blocks
            .iter()
            .copied()
            .find(|b| inst_index >= b.start && inst_index < b.end)
    }
}

fn func_label_index(func: &Function, label: Label) -> u32 {
    func.label_position(label).unwrap_or(u32::max_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::Function;
    use crate::span::SourceSpan;
    use crate::types::{TypeData, TypeInterner};

    #[test]
    fn straight_line_function_is_one_block() {
        let mut interner = TypeInterner::new();
        let void = interner.intern(TypeData::Void);
        let mut f = Function::new("f", void, None);
        f.push(Opcode::Return { value: None }, SourceSpan::SYNTHETIC);
        let cfg = ControlFlowGraph::compute(&f);
        assert_eq!(cfg.blocks.len(), 1);
    }

    #[test]
    fn conditional_jump_creates_two_successors() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(crate::types::IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let cond = f.new_register(u8_ty);
        let l_true = f.new_label();
        f.push(Opcode::LoadConst { dst: cond, imm: crate::ir::instructions::Imm(1) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::JumpIfTrue { cond, target: l_true }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: None }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Label { label: l_true }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: None }, SourceSpan::SYNTHETIC);

        let cfg = ControlFlowGraph::compute(&f);
        assert_eq!(cfg.blocks.len(), 2);
        assert_eq!(cfg.successors(0).len(), 2);
    }
}
