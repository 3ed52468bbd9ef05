//! Tail-call marking (spec §4.D.6): a `Call` immediately followed by a
//! `Return` of exactly its own result (or, for a void call, a bare
//! `Return`) is marked `tail`, letting the backend emit a jump instead
//! of a call-then-return.

use crate::ir::function::Function;
use crate::ir::instructions::Opcode;

pub fn run(f: &mut Function) -> bool {
    let mut changed = false;
    for i in 0..f.insts.len().saturating_sub(1) {
        let is_tail = matches!(
            (&f.insts[i].opcode, &f.insts[i + 1].opcode),
            (Opcode::Call { dst: None, .. }, Opcode::Return { value: None })
        ) || matches!(
            (&f.insts[i].opcode, &f.insts[i + 1].opcode),
            (Opcode::Call { dst: Some(d), .. }, Opcode::Return { value: Some(r) }) if d == r
        );
        if is_tail {
            if let Opcode::Call { tail, .. } = &mut f.insts[i].opcode {
                changed |= !*tail;
                *tail = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::ir::instructions::Imm;
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData, TypeInterner};

    #[test]
    fn call_followed_by_matching_return_is_marked_tail() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut module_fn = Function::new("f", u8_ty, None);
        let dst = module_fn.new_register(u8_ty);
        module_fn.push(
            Opcode::Call { func: crate::ir::entities::FuncRef::new(0), args: vec![], dst: Some(dst), tail: false },
            SourceSpan::SYNTHETIC,
        );
        module_fn.push(Opcode::Return { value: Some(dst) }, SourceSpan::SYNTHETIC);

        assert!(run(&mut module_fn));
        assert!(matches!(module_fn.insts[0].opcode, Opcode::Call { tail: true, .. }));
    }

    #[test]
    fn call_followed_by_unrelated_return_is_untouched() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let dst = f.new_register(u8_ty);
        let other = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: other, imm: Imm(1) }, SourceSpan::SYNTHETIC);
        f.push(
            Opcode::Call { func: crate::ir::entities::FuncRef::new(0), args: vec![], dst: Some(dst), tail: false },
            SourceSpan::SYNTHETIC,
        );
        f.push(Opcode::Return { value: Some(other) }, SourceSpan::SYNTHETIC);

        assert!(!run(&mut f));
    }
}
