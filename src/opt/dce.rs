//! Dead-code elimination (spec §4.D.2): a single backward mark-and-sweep
//! pass. An instruction survives if it has an observable side effect, is
//! control flow, or defines a register some surviving instruction reads
//! — reusing [`Opcode::has_observable_side_effect`] and
//! [`Opcode::is_control_flow`] rather than re-deriving which opcodes
//! must never be dropped.

use crate::ir::entities::Register;
use crate::ir::function::Function;
use std::collections::HashSet;

pub fn run(f: &mut Function) -> bool {
    let mut live: HashSet<Register> = HashSet::new();
    let mut keep = vec![false; f.insts.len()];

    for (i, inst) in f.insts.iter().enumerate().rev() {
        let dest_live = inst.opcode.dest().map(|d| live.contains(&d)).unwrap_or(false);
        let must_keep = inst.opcode.has_observable_side_effect() || inst.opcode.is_control_flow();
        if must_keep || dest_live {
            keep[i] = true;
            if let Some(d) = inst.opcode.dest() {
                live.remove(&d);
            }
            live.extend(inst.opcode.uses());
        }
    }

    let before = f.insts.len();
    let mut idx = 0;
    f.insts.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
    f.insts.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::{ArithWidth, Imm, Opcode};
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData, TypeInterner};

    #[test]
    fn unused_computation_is_removed() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let a = f.new_register(u8_ty);
        let b = f.new_register(u8_ty);
        let dead = f.new_register(u8_ty);
        let live = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: a, imm: Imm(1) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: b, imm: Imm(2) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Add { dst: dead, lhs: a, rhs: b, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: live, imm: Imm(9) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(live) }, SourceSpan::SYNTHETIC);

        assert!(run(&mut f));
        assert_eq!(f.insts.len(), 2);
        assert!(matches!(f.insts[0].opcode, Opcode::LoadConst { imm: Imm(9), .. }));
    }

    #[test]
    fn print_is_kept_even_with_no_dest() {
        let mut interner = TypeInterner::new();
        let void = interner.intern(TypeData::Void);
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", void, None);
        let a = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: a, imm: Imm(65) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::PrintU8 { src: a }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: None }, SourceSpan::SYNTHETIC);

        assert!(!run(&mut f));
        assert_eq!(f.insts.len(), 3);
    }
}
