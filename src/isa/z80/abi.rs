//! Register-based calling convention and TSMC anchor/patch emission
//! (spec §4.E.3, §4.E.5).
//!
//! Non-TSMC ABI: the first 8-bit argument passes in `A`, the first
//! 16-bit argument in `HL`, then `DE`, then `BC`; anything past that
//! spills to a fixed per-call memory slot. Return value is `A` for
//! 8-bit, `HL` for 16-bit; the carry flag carries error state for
//! fallible functions (§4.E.5) — `select::lower_function` is what
//! actually emits the `RET C` / `OR A` sequences that read and clear it.

use crate::encoder::{AsmOp, Expr, Operand};
use crate::types::{Type, TypeData, TypeInterner};

/// A physical argument slot in the non-TSMC calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    A,
    Hl,
    De,
    Bc,
    /// Overflow slot, numbered from 0, each two bytes wide regardless of
    /// the argument's actual width (kept simple: no packing).
    Mem(u16),
}

/// Assigns each parameter type an [`ArgSlot`] in declaration order.
pub fn assign_arg_slots(params: &[Type], types: &TypeInterner, overflow_origin: u16) -> Vec<ArgSlot> {
    let mut slots = Vec::with_capacity(params.len());
    let mut byte_used = false;
    let mut next_word = 0u8;
    let mut overflow = overflow_origin;

    for &ty in params {
        let is_word = matches!(types.size_of(ty), Some(n) if n >= 2) || matches!(types.lookup(ty), TypeData::Pointer(_));
        if !is_word && !byte_used {
            slots.push(ArgSlot::A);
            byte_used = true;
        } else if is_word && next_word < 3 {
            slots.push(match next_word {
                0 => ArgSlot::Hl,
                1 => ArgSlot::De,
                _ => ArgSlot::Bc,
            });
            next_word += 1;
        } else {
            slots.push(ArgSlot::Mem(overflow));
            overflow += 2;
        }
    }
    slots
}

/// The return-value register for a function's declared return type:
/// `A` for an 8-bit (or `void`) result, `HL` otherwise.
pub fn return_reg(ret: Type, types: &TypeInterner) -> &'static str {
    match types.size_of(ret) {
        Some(n) if n >= 2 => "HL",
        _ => "A",
    }
}

/// The TSMC parameter-anchor label for `fn_name`'s parameter `param`
/// (spec §4.E.3): `<fn>_param_<name>`. Label hygiene (§4.E.7) is the
/// caller's job via [`super::hygiene::sanitize`] — `fn_name` arrives
/// already sanitized.
pub fn anchor_symbol(fn_name: &str, param: &str) -> String {
    format!("{}_param_{}", fn_name, param)
}

/// Emits the per-parameter SMC anchor for an 8-bit parameter: the
/// `.op`-suffixed instruction label, the `equ` pointing one byte past it
/// (the patchable slot), and the placeholder `LD A,#00`.
pub fn emit_anchor_u8(anchor: &str) -> Vec<AsmOp> {
    vec![
        AsmOp::labeled(format!("{}.op", anchor), "LD", vec![Operand::Reg8("A"), Operand::Imm8(Expr::Const(0))]),
    ]
}

/// As [`emit_anchor_u8`] but for a 16-bit parameter loaded into `HL`.
pub fn emit_anchor_u16(anchor: &str) -> Vec<AsmOp> {
    vec![
        AsmOp::labeled(format!("{}.op", anchor), "LD", vec![Operand::Reg16("HL"), Operand::Imm16(Expr::Const(0))]),
    ]
}

/// One row of the per-module PATCH_TABLE (spec §6): an anchor symbol and
/// its patch size in bytes.
#[derive(Debug, Clone)]
pub struct PatchEntry {
    pub anchor: String,
    pub size: u8,
}
