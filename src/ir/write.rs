//! Textual MIR printer, grounded on the teacher's `pub use
//! crate::write::write_function` re-export. Used by tests and
//! diagnostics to render MIR for debugging; not part of any named
//! pipeline stage.

use crate::ir::function::Function;
use crate::ir::instructions::Opcode;
use std::fmt::Write;

pub fn write_function(func: &Function) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "function {}({}) -> {:?} {{", func.name, func.params.len(), func.ret);
    for inst in &func.insts {
        match &inst.opcode {
            Opcode::Label { label } => {
                let _ = writeln!(out, "{}:", label);
            }
            other => {
                let _ = writeln!(out, "    {}", format_opcode(other));
            }
        }
    }
    let _ = writeln!(out, "}}");
    out
}

fn format_opcode(op: &Opcode) -> String {
    use Opcode::*;
    match op {
        LoadConst { dst, imm } => format!("{} = const {}", dst, imm.0),
        LoadVar { dst, var } => format!("{} = load_var {}", dst, var),
        LoadGlobalAddr { dst, var } => format!("{} = addr_of {}", dst, var),
        StoreVar { var, src } => format!("store_var {}, {}", var, src),
        LoadParam { dst, index } => format!("{} = param {}", dst, index),
        Move { dst, src } => format!("{} = {}", dst, src),
        Add { dst, lhs, rhs, .. } => format!("{} = {} + {}", dst, lhs, rhs),
        Sub { dst, lhs, rhs, .. } => format!("{} = {} - {}", dst, lhs, rhs),
        Mul { dst, lhs, rhs, .. } => format!("{} = {} * {}", dst, lhs, rhs),
        Div { dst, lhs, rhs, .. } => format!("{} = {} / {}", dst, lhs, rhs),
        Mod { dst, lhs, rhs, .. } => format!("{} = {} % {}", dst, lhs, rhs),
        And { dst, lhs, rhs } => format!("{} = {} & {}", dst, lhs, rhs),
        Or { dst, lhs, rhs } => format!("{} = {} | {}", dst, lhs, rhs),
        Xor { dst, lhs, rhs } => format!("{} = {} ^ {}", dst, lhs, rhs),
        Shl { dst, lhs, rhs } => format!("{} = {} << {}", dst, lhs, rhs),
        Shr { dst, lhs, rhs } => format!("{} = {} >> {}", dst, lhs, rhs),
        Eq { dst, lhs, rhs } => format!("{} = {} == {}", dst, lhs, rhs),
        Ne { dst, lhs, rhs } => format!("{} = {} != {}", dst, lhs, rhs),
        Lt { dst, lhs, rhs, .. } => format!("{} = {} < {}", dst, lhs, rhs),
        Le { dst, lhs, rhs, .. } => format!("{} = {} <= {}", dst, lhs, rhs),
        Gt { dst, lhs, rhs, .. } => format!("{} = {} > {}", dst, lhs, rhs),
        Ge { dst, lhs, rhs, .. } => format!("{} = {} >= {}", dst, lhs, rhs),
        Jump { target } => format!("jump {}", target),
        JumpIfTrue { cond, target } => format!("jump_if {}, {}", cond, target),
        JumpIfFalse { cond, target } => format!("jump_unless {}, {}", cond, target),
        Label { label } => format!("{}:", label),
        Call { func, args, dst, tail } => {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            let tail = if *tail { " [tail]" } else { "" };
            match dst {
                Some(d) => format!("{} = call {}({}){}", d, func, args.join(", "), tail),
                None => format!("call {}({}){}", func, args.join(", "), tail),
            }
        }
        Return { value } => match value {
            Some(v) => format!("return {}", v),
            None => "return".to_string(),
        },
        LoadIndirect { dst, addr } => format!("{} = load [{}]", dst, addr),
        StoreIndirect { addr, src } => format!("store [{}], {}", addr, src),
        LoadField { dst, base, offset } => format!("{} = {}.[{}]", dst, base, offset),
        StoreField { base, offset, src } => format!("{}.[{}] = {}", base, offset, src),
        LoadIndex { dst, base, index, .. } => format!("{} = {}[{}]", dst, base, index),
        StoreIndex { base, index, src, .. } => format!("{}[{}] = {}", base, index, src),
        LoadString { dst, string } => format!("{} = string {}", dst, string),
        PrintString { src } => format!("print_string {}", src),
        PrintU8 { src } => format!("print_u8 {}", src),
        PrintU16 { src } => format!("print_u16 {}", src),
        SmcAnchor { dst, param_index } => format!("{} = smc_anchor param{}", dst, param_index),
        SmcPatch { param_index, value } => format!("smc_patch param{}, {}", param_index, value),
        In { dst, port } => format!("{} = in {}", dst, port),
        Out { port, value } => format!("out {}, {}", port, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::Imm;
    use crate::span::SourceSpan;
    use crate::types::{TypeData, TypeInterner};

    #[test]
    fn prints_a_readable_skeleton() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(crate::types::IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let r0 = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: r0, imm: Imm(42) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(r0) }, SourceSpan::SYNTHETIC);
        let text = write_function(&f);
        assert!(text.contains("const 42"));
        assert!(text.contains("return v"));
    }
}
