//! Strength reduction (spec §4.D.4).
//!
//! `x * k` becomes shifts and adds for the constant set this pass
//! recognizes (any power of two, plus 3, 5, 6, 7, 9, 10, 12, 15 via a
//! shift-and-add/subtract decomposition); `x / k` and `x % k` for k a
//! power of two become a shift and a mask respectively. Only the
//! `variable OP constant` operand order is recognized — the builder
//! always places the variable operand first for commutative arithmetic,
//! so `constant OP variable` is not expected to occur.

use crate::ir::entities::Register;
use crate::ir::function::Function;
use crate::ir::instructions::{ArithWidth, Imm, Instruction, Opcode};
use crate::span::SourceSpan;
use std::collections::HashMap;

enum Candidate {
    Mul(Register, Register, Vec<(u32, i8)>, ArithWidth),
    ShiftDiv(Register, Register, u32),
    MaskMod(Register, Register, i64),
}

pub fn run(f: &mut Function) -> bool {
    let mut known: HashMap<Register, i64> = HashMap::new();
    let mut candidates: Vec<(usize, Candidate, SourceSpan)> = Vec::new();

    for (i, inst) in f.insts.iter().enumerate() {
        match &inst.opcode {
            Opcode::LoadConst { dst, imm } => {
                known.insert(*dst, imm.0);
            }
            Opcode::Mul { dst, lhs, rhs, width } => {
                if let Some(terms) = known.get(rhs).copied().and_then(decompose) {
                    candidates.push((i, Candidate::Mul(*dst, *lhs, terms, *width), inst.loc));
                }
            }
            Opcode::Div { dst, lhs, rhs, .. } => {
                if let Some(k) = known.get(rhs).copied().filter(|&k| is_pow2(k)) {
                    candidates.push((i, Candidate::ShiftDiv(*dst, *lhs, k.trailing_zeros()), inst.loc));
                }
            }
            Opcode::Mod { dst, lhs, rhs, .. } => {
                if let Some(k) = known.get(rhs).copied().filter(|&k| is_pow2(k)) {
                    candidates.push((i, Candidate::MaskMod(*dst, *lhs, k), inst.loc));
                }
            }
            _ => {}
        }
    }

    if candidates.is_empty() {
        return false;
    }

    let mut replacements: HashMap<usize, Vec<Instruction>> = HashMap::new();
    for (i, cand, loc) in candidates {
        let seq = match cand {
            Candidate::Mul(dst, lhs, terms, width) => build_mul(f, dst, lhs, &terms, width, loc),
            Candidate::ShiftDiv(dst, lhs, shift) => build_shift_div(f, dst, lhs, shift, loc),
            Candidate::MaskMod(dst, lhs, k) => build_mask_mod(f, dst, lhs, k, loc),
        };
        replacements.insert(i, seq);
    }

    let old = std::mem::take(&mut f.insts);
    let mut new_insts = Vec::with_capacity(old.len());
    for (i, inst) in old.into_iter().enumerate() {
        match replacements.remove(&i) {
            Some(seq) => new_insts.extend(seq),
            None => new_insts.push(inst),
        }
    }
    f.insts = new_insts;
    true
}

fn is_pow2(k: i64) -> bool {
    k > 0 && (k as u64).is_power_of_two()
}

/// Shift-and-add/subtract terms summing to `k * x`: `(shift, sign)` means
/// `sign * (x << shift)`.
fn decompose(k: i64) -> Option<Vec<(u32, i8)>> {
    if is_pow2(k) {
        return Some(vec![(k.trailing_zeros(), 1)]);
    }
    match k {
        3 => Some(vec![(1, 1), (0, 1)]),   // 2x + x
        5 => Some(vec![(2, 1), (0, 1)]),   // 4x + x
        6 => Some(vec![(2, 1), (1, 1)]),   // 4x + 2x
        7 => Some(vec![(3, 1), (0, -1)]),  // 8x - x
        9 => Some(vec![(3, 1), (0, 1)]),   // 8x + x
        10 => Some(vec![(3, 1), (1, 1)]),  // 8x + 2x
        12 => Some(vec![(3, 1), (2, 1)]),  // 8x + 4x
        15 => Some(vec![(4, 1), (0, -1)]), // 16x - x
        _ => None,
    }
}

fn build_mul(
    f: &mut Function,
    dst: Register,
    lhs: Register,
    terms: &[(u32, i8)],
    width: ArithWidth,
    loc: SourceSpan,
) -> Vec<Instruction> {
    let ty = f.register_type(lhs);
    let mut insts = Vec::new();
    let mut term_regs: Vec<(Register, i8)> = Vec::with_capacity(terms.len());

    for &(shift, sign) in terms {
        if shift == 0 {
            term_regs.push((lhs, sign));
            continue;
        }
        let amount = f.new_register(ty);
        insts.push(Instruction::new(Opcode::LoadConst { dst: amount, imm: Imm(shift as i64) }, loc));
        let shifted = f.new_register(ty);
        insts.push(Instruction::new(Opcode::Shl { dst: shifted, lhs, rhs: amount }, loc));
        term_regs.push((shifted, sign));
    }

    if term_regs.len() == 1 {
        let (reg, _) = term_regs[0];
        if reg == lhs {
            insts.push(Instruction::new(Opcode::Move { dst, src: lhs }, loc));
        } else if let Some(last) = insts.last_mut() {
            // Retarget the shift we just built to write `dst` directly
            // instead of wasting a register and a copy.
            if let Opcode::Shl { dst: d, .. } = &mut last.opcode {
                *d = dst;
            }
        }
        return insts;
    }

    let mut acc = term_regs[0].0;
    for (idx, &(reg, sign)) in term_regs.iter().enumerate().skip(1) {
        let target = if idx == term_regs.len() - 1 { dst } else { f.new_register(ty) };
        let op = if sign > 0 {
            Opcode::Add { dst: target, lhs: acc, rhs: reg, width }
        } else {
            Opcode::Sub { dst: target, lhs: acc, rhs: reg, width }
        };
        insts.push(Instruction::new(op, loc));
        acc = target;
    }
    insts
}

fn build_shift_div(f: &mut Function, dst: Register, lhs: Register, shift: u32, loc: SourceSpan) -> Vec<Instruction> {
    let ty = f.register_type(lhs);
    let amount = f.new_register(ty);
    vec![
        Instruction::new(Opcode::LoadConst { dst: amount, imm: Imm(shift as i64) }, loc),
        Instruction::new(Opcode::Shr { dst, lhs, rhs: amount }, loc),
    ]
}

fn build_mask_mod(f: &mut Function, dst: Register, lhs: Register, k: i64, loc: SourceSpan) -> Vec<Instruction> {
    let ty = f.register_type(lhs);
    let mask = f.new_register(ty);
    vec![
        Instruction::new(Opcode::LoadConst { dst: mask, imm: Imm(k - 1) }, loc),
        Instruction::new(Opcode::And { dst, lhs, rhs: mask }, loc),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData, TypeInterner};

    #[test]
    fn multiply_by_three_becomes_shift_and_add() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let x = f.new_register(u8_ty);
        let k = f.new_register(u8_ty);
        let dst = f.new_register(u8_ty);
        f.push(Opcode::LoadParam { dst: x, index: 0 }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: k, imm: Imm(3) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Mul { dst, lhs: x, rhs: k, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);

        assert!(run(&mut f));
        assert!(f.insts.iter().all(|i| !matches!(i.opcode, Opcode::Mul { .. })));
        assert!(f.insts.iter().any(|i| matches!(i.opcode, Opcode::Shl { .. })));
        assert!(f.insts.iter().any(|i| matches!(i.opcode, Opcode::Add { dst: d, .. } if d == dst)));
    }

    #[test]
    fn divide_by_power_of_two_becomes_shift() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let x = f.new_register(u8_ty);
        let k = f.new_register(u8_ty);
        let dst = f.new_register(u8_ty);
        f.push(Opcode::LoadParam { dst: x, index: 0 }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: k, imm: Imm(8) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Div { dst, lhs: x, rhs: k, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);

        assert!(run(&mut f));
        assert!(f.insts.iter().any(|i| matches!(i.opcode, Opcode::Shr { dst: d, .. } if d == dst)));
    }

    #[test]
    fn multiply_by_unrecognized_constant_is_untouched() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let x = f.new_register(u8_ty);
        let k = f.new_register(u8_ty);
        let dst = f.new_register(u8_ty);
        f.push(Opcode::LoadParam { dst: x, index: 0 }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: k, imm: Imm(11) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Mul { dst, lhs: x, rhs: k, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);

        assert!(!run(&mut f));
    }
}
