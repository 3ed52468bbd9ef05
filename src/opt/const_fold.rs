//! Constant propagation and folding (spec §4.D.1).
//!
//! Every register has exactly one static definition, so "is this operand
//! constant" only needs the set of `LoadConst`s seen earlier in the same
//! linear walk — no fixed-point dataflow solve is required within a
//! single pass. Folding arithmetic applies modular overflow semantics
//! per operand width; bitwise and comparison opcodes carry no width tag
//! of their own and are folded as exact 64-bit operations (the backend's
//! instruction selection truncates to the destination register's real
//! width when it lowers the resulting `LoadConst`).

use crate::ir::entities::Register;
use crate::ir::function::Function;
use crate::ir::instructions::{ArithWidth, Imm, Opcode};
use std::collections::HashMap;

pub fn run(f: &mut Function) -> bool {
    let mut known: HashMap<Register, i64> = HashMap::new();
    let mut changed = false;

    for inst in &mut f.insts {
        if let Some(folded) = fold_one(&inst.opcode, &known) {
            inst.opcode = folded;
            changed = true;
        }
        if let Opcode::LoadConst { dst, imm } = &inst.opcode {
            known.insert(*dst, imm.0);
        }
    }
    changed
}

fn fold_one(op: &Opcode, known: &HashMap<Register, i64>) -> Option<Opcode> {
    use Opcode::*;
    let c = |r: &Register| known.get(r).copied();
    let ldc = |dst: Register, v: i64| LoadConst { dst, imm: Imm(v) };

    match op {
        Move { dst, src } => c(src).map(|v| ldc(*dst, v)),
        Add { dst, lhs, rhs, width } => Some(ldc(*dst, truncate(c(lhs)?.wrapping_add(c(rhs)?), *width))),
        Sub { dst, lhs, rhs, width } => Some(ldc(*dst, truncate(c(lhs)?.wrapping_sub(c(rhs)?), *width))),
        Mul { dst, lhs, rhs, width } => Some(ldc(*dst, truncate(c(lhs)?.wrapping_mul(c(rhs)?), *width))),
        Div { dst, lhs, rhs, width } => {
            let (a, b) = (c(lhs)?, c(rhs)?);
            (b != 0).then(|| ldc(*dst, truncate(a.wrapping_div(b), *width)))
        }
        Mod { dst, lhs, rhs, width } => {
            let (a, b) = (c(lhs)?, c(rhs)?);
            (b != 0).then(|| ldc(*dst, truncate(a.wrapping_rem(b), *width)))
        }
        And { dst, lhs, rhs } => Some(ldc(*dst, c(lhs)? & c(rhs)?)),
        Or { dst, lhs, rhs } => Some(ldc(*dst, c(lhs)? | c(rhs)?)),
        Xor { dst, lhs, rhs } => Some(ldc(*dst, c(lhs)? ^ c(rhs)?)),
        Shl { dst, lhs, rhs } => Some(ldc(*dst, c(lhs)?.wrapping_shl(c(rhs)? as u32))),
        Shr { dst, lhs, rhs } => Some(ldc(*dst, c(lhs)?.wrapping_shr(c(rhs)? as u32))),
        Eq { dst, lhs, rhs } => Some(ldc(*dst, (c(lhs)? == c(rhs)?) as i64)),
        Ne { dst, lhs, rhs } => Some(ldc(*dst, (c(lhs)? != c(rhs)?) as i64)),
        Lt { dst, lhs, rhs, .. } => Some(ldc(*dst, (c(lhs)? < c(rhs)?) as i64)),
        Le { dst, lhs, rhs, .. } => Some(ldc(*dst, (c(lhs)? <= c(rhs)?) as i64)),
        Gt { dst, lhs, rhs, .. } => Some(ldc(*dst, (c(lhs)? > c(rhs)?) as i64)),
        Ge { dst, lhs, rhs, .. } => Some(ldc(*dst, (c(lhs)? >= c(rhs)?) as i64)),
        _ => None,
    }
}

fn width_bits(w: ArithWidth) -> u32 {
    match w {
        ArithWidth::U8 | ArithWidth::I8 => 8,
        ArithWidth::U16 | ArithWidth::I16 => 16,
        ArithWidth::U24 | ArithWidth::I24 => 24,
    }
}

fn is_signed(w: ArithWidth) -> bool {
    matches!(w, ArithWidth::I8 | ArithWidth::I16 | ArithWidth::I24)
}

/// Truncates `value` to `width`'s modulus, re-biasing into the signed
/// range for signed widths (spec §4.D.1's "modular overflow semantics").
fn truncate(value: i64, width: ArithWidth) -> i64 {
    let modulus = 1i64 << width_bits(width);
    let mut v = value.rem_euclid(modulus);
    if is_signed(width) && v >= modulus / 2 {
        v -= modulus;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData, TypeInterner};

    #[test]
    fn add_of_two_constants_folds() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let a = f.new_register(u8_ty);
        let b = f.new_register(u8_ty);
        let sum = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: a, imm: Imm(200) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: b, imm: Imm(100) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Add { dst: sum, lhs: a, rhs: b, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);
        assert!(run(&mut f));
        match f.insts[2].opcode {
            Opcode::LoadConst { imm: Imm(44), .. } => {} // 300 wraps mod 256 to 44
            ref other => panic!("expected wrapped LoadConst(44), got {:?}", other),
        }
    }

    #[test]
    fn division_by_constant_zero_is_left_unfolded() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let a = f.new_register(u8_ty);
        let z = f.new_register(u8_ty);
        let q = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: a, imm: Imm(10) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: z, imm: Imm(0) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Div { dst: q, lhs: a, rhs: z, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);
        assert!(!run(&mut f));
        assert!(matches!(f.insts[2].opcode, Opcode::Div { .. }));
    }

    #[test]
    fn signed_width_truncation_rebiases_negative() {
        assert_eq!(truncate(200, ArithWidth::I8), -56);
        assert_eq!(truncate(300, ArithWidth::U8), 44);
    }
}
