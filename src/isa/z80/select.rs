//! Instruction selection (spec §4.E.4): walks one function's linear MIR
//! body and emits Z80 assembly, consulting the register allocator for
//! each virtual register's physical home and the DJNZ analysis for the
//! one shape that needs structural (not per-instruction) lowering.
//!
//! One function, `lower_function`, owns the whole pass rather than a
//! pattern-matcher DSL — Z80's idiom set is small enough that a direct
//! match on `Opcode` reads more clearly here than a rule table would,
//! unlike `cranelift-codegen`'s ISLE lowering (which earns a DSL from
//! having dozens of targets sharing it).

use std::collections::{HashMap, HashSet};

use crate::encoder::{AsmItem, AsmOp, Directive, Expr, Operand};
use crate::entity::EntityRef;
use crate::ir::entities::{Label, Register, StringRef};
use crate::ir::flowgraph::ControlFlowGraph;
use crate::ir::function::{FuncId, Function};
use crate::ir::instructions::{ArithWidth, Opcode};
use crate::ir::module::Module;
use crate::isa::BackendError;
use crate::regalloc::{Allocation, PhysLoc, Reg16, Reg8};
use crate::types::{TypeData, TypeInterner};

use super::abi::{self, ArgSlot, PatchEntry};
use super::hygiene::LocalLabels;

/// Base of the non-TSMC overflow-argument area, distinct from the
/// register allocator's own spill region so the two never collide.
const ARG_OVERFLOW_ORIGIN: u16 = 0xF800;

/// The label a string literal's data is emitted under (spec §6): shared
/// between [`lower_function`]'s `LoadString` handling and the module
/// orchestrator, which actually emits the `DB` bytes at this label.
pub fn string_label(s: StringRef) -> String {
    format!("__str{}", s.index())
}

/// One function's lowered body plus what the orchestrator needs from it:
/// every symbol referenced (for tree shaking, spec §4.E.6) and every TSMC
/// anchor defined (for the module PATCH_TABLE, spec §6).
pub struct Lowered {
    pub items: Vec<AsmItem>,
    pub referenced: HashSet<String>,
    pub patches: Vec<PatchEntry>,
}

struct DjnzLoop {
    counter: Register,
    decremented: Register,
    sub_index: u32,
}

/// Recovers, for each header [`crate::opt::loops::countable_djnz_loops`]
/// already confirmed is a countable loop, the specific `Sub`/branch
/// instruction indices so they can be elided or replaced — the analysis
/// pass itself only reports the header label.
fn analyze_djnz(f: &Function, headers: &HashSet<Label>) -> HashMap<Label, DjnzLoop> {
    let cfg = ControlFlowGraph::compute(f);
    let mut out = HashMap::new();
    for &header in headers {
        let Some(start) = f.label_position(header) else { continue };
        let Some(block) = cfg.block_containing(start) else { continue };
        if block.end <= block.start {
            continue;
        }
        let branch_idx = block.end - 1;
        let cond = match &f.insts[branch_idx as usize].opcode {
            Opcode::JumpIfTrue { cond, .. } => *cond,
            Opcode::JumpIfFalse { cond, .. } => *cond,
            _ => continue,
        };
        let found = f.insts[block.start as usize..block.end as usize]
            .iter()
            .enumerate()
            .find_map(|(i, inst)| match &inst.opcode {
                Opcode::Sub { dst, lhs, width: ArithWidth::U8, .. } if *dst == cond => Some((block.start + i as u32, *lhs)),
                _ => None,
            });
        if let Some((sub_index, counter)) = found {
            out.insert(header, DjnzLoop { counter, decremented: cond, sub_index });
        }
    }
    out
}

/// A run of `arm_bodies.len()` consecutive `Pattern::IntLiteral` arms
/// (spec §4.A.6's jump-table shape, ≥4 consecutive values) recognized in
/// `build_case`'s uniform compare-chain output: each arm still compiles
/// to `LoadConst`/`Eq`/`JumpIfFalse` against the same scrutinee, but
/// those three instructions are redundant once the values are known to
/// be `base, base+1, ..., base+N-1` — an index computed directly from
/// the scrutinee reaches the right arm without comparing against any of
/// them.
struct CaseChain {
    /// Index of the first arm's `LoadConst`.
    start: u32,
    /// Every `LoadConst`/`Eq`/`JumpIfFalse` index across the whole run,
    /// elided once the chain is replaced by a table dispatch.
    prologue: Vec<u32>,
    scrutinee: Register,
    base: i64,
    /// Each arm's body entry index, in ascending value order.
    arm_bodies: Vec<u32>,
    /// Where control continues once the scrutinee falls outside
    /// `base..base+arm_bodies.len()` — the last recognized arm's own
    /// `JumpIfFalse` target, so out-of-range values land exactly where
    /// the original linear chain would have sent them (a guard, the next
    /// arm's test, or `end_label`).
    default: Label,
}

/// Tries to match a dense `IntLiteral` run starting at `start`; returns
/// `None` if fewer than four consecutive arms match (spec §4.A.6's
/// density threshold) or the shape doesn't hold at all.
fn try_case_chain(f: &Function, types: &TypeInterner, start: u32) -> Option<CaseChain> {
    let mut prologue = Vec::new();
    let mut arm_bodies = Vec::new();
    let mut scrutinee: Option<Register> = None;
    let mut base: Option<i64> = None;
    let mut next_value: i64 = 0;
    let mut default: Option<Label> = None;
    let mut idx = start;

    loop {
        let (imm_dst, v) = match f.insts.get(idx as usize).map(|i| &i.opcode) {
            Some(Opcode::LoadConst { dst, imm }) => (*dst, imm.0),
            _ => break,
        };
        let eq_idx = idx + 1;
        let (eq_dst, lhs) = match f.insts.get(eq_idx as usize).map(|i| &i.opcode) {
            Some(Opcode::Eq { dst, lhs, rhs }) if *rhs == imm_dst => (*dst, *lhs),
            _ => break,
        };
        let jf_idx = eq_idx + 1;
        let target = match f.insts.get(jf_idx as usize).map(|i| &i.opcode) {
            Some(Opcode::JumpIfFalse { cond, target }) if *cond == eq_dst => *target,
            _ => break,
        };

        // The dispatch this chain lowers to works a byte at a time (spec
        // §4.A.6's example is a `u8` scrutinee); a word-width scrutinee
        // falls back to the ordinary compare chain.
        if is_word(types, f.register_type(lhs)) || v < 0 || v > 255 {
            break;
        }

        match scrutinee {
            None => scrutinee = Some(lhs),
            Some(s) if s == lhs => {}
            _ => break,
        }
        match base {
            None => {
                base = Some(v);
                next_value = v;
            }
            Some(_) if v == next_value => {}
            _ => break,
        }

        prologue.push(idx);
        prologue.push(eq_idx);
        prologue.push(jf_idx);
        arm_bodies.push(jf_idx + 1);
        default = Some(target);
        next_value += 1;

        let Some(label_pos) = f.label_position(target) else { break };
        idx = label_pos + 1;
    }

    if arm_bodies.len() < 4 {
        return None;
    }
    Some(CaseChain { start, prologue, scrutinee: scrutinee?, base: base?, arm_bodies, default: default? })
}

/// Scans the whole function once for [`CaseChain`]s, skipping past each
/// recognized run so overlapping false matches inside it aren't
/// attempted.
fn detect_case_chains(f: &Function, types: &TypeInterner) -> Vec<CaseChain> {
    let mut out = Vec::new();
    let mut idx = 0u32;
    let n = f.insts.len() as u32;
    while idx < n {
        match try_case_chain(f, types, idx) {
            Some(chain) => {
                idx = chain.arm_bodies.last().copied().unwrap_or(idx) + 1;
                out.push(chain);
            }
            None => idx += 1,
        }
    }
    out
}

/// What [`CaseChain`] needs translated into concrete assembly: synthetic
/// labels for the table itself and each arm's entry point.
struct ChainDispatch {
    scrutinee: Register,
    base: i64,
    count: i64,
    default: Label,
    table_label: String,
    arm_labels: Vec<String>,
}

/// Emits the indexed dispatch replacing a [`CaseChain`]'s compare
/// prologue (spec §4.A.6): `scrutinee - base` bounds-checked against
/// `count`, then a word lookup in a `DW` table of arm addresses and an
/// indirect jump. Z80 has no `JP (HL+n)` addressing, so the table
/// lookup is done by hand rather than indexed directly off `HL`.
fn emit_case_dispatch(sel: &mut Selector, dispatch: &ChainDispatch) {
    sel.load_byte_to(dispatch.scrutinee, Reg8::A);
    if dispatch.base != 0 {
        sel.push(AsmOp::new("SUB", vec![Operand::Reg8("A"), Operand::Imm8(Expr::Const(dispatch.base))]));
    }
    sel.push(AsmOp::new("CP", vec![Operand::Reg8("A"), Operand::Imm8(Expr::Const(dispatch.count))]));
    let default_name = sel.labels.name_of(dispatch.default);
    sel.push(AsmOp::new("JP", vec![Operand::Cond("NC"), Operand::Imm16(Expr::sym(default_name))]));

    sel.push(AsmOp::new("LD", vec![Operand::Reg16("DE"), Operand::Imm16(Expr::sym(dispatch.table_label.clone()))]));
    sel.push(AsmOp::new("LD", vec![Operand::Reg8("H"), Operand::Imm8(Expr::Const(0))]));
    sel.push(AsmOp::new("LD", vec![Operand::Reg8("L"), Operand::Reg8("A")]));
    sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("HL")]));
    sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
    sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndReg("HL")]));
    sel.push(AsmOp::new("INC", vec![Operand::Reg16("HL")]));
    sel.push(AsmOp::new("LD", vec![Operand::Reg8("H"), Operand::IndReg("HL")]));
    sel.push(AsmOp::new("LD", vec![Operand::Reg8("L"), Operand::Reg8("A")]));
    sel.push(AsmOp::new("JP", vec![Operand::IndReg("HL")]));

    sel.label(dispatch.table_label.clone());
    let entries: Vec<Expr> = dispatch.arm_labels.iter().map(|l| Expr::sym(l.clone())).collect();
    sel.items.push(AsmItem::Directive(Directive::Dw(entries)));
}

fn is_word(types: &TypeInterner, ty: crate::types::Type) -> bool {
    matches!(types.size_of(ty), Some(n) if n >= 2)
}

fn pair_halves(r: Reg16) -> (&'static str, &'static str) {
    match r {
        Reg16::Hl => ("H", "L"),
        Reg16::De => ("D", "E"),
        Reg16::Bc => ("B", "C"),
    }
}

struct Selector<'a> {
    alloc: &'a Allocation,
    overrides: HashMap<Register, PhysLoc>,
    labels: LocalLabels,
    synth: u32,
    items: Vec<AsmItem>,
    referenced: HashSet<String>,
}

impl<'a> Selector<'a> {
    fn home(&self, reg: Register) -> PhysLoc {
        self.overrides.get(&reg).copied().unwrap_or_else(|| self.alloc.loc(reg))
    }

    fn push(&mut self, op: AsmOp) {
        self.items.push(AsmItem::Op(op));
    }

    fn label(&mut self, name: String) {
        self.items.push(AsmItem::Directive(Directive::LabelOnly(name)));
    }

    fn synth_label(&mut self, tag: &str) -> String {
        let n = self.synth;
        self.synth += 1;
        format!(".syn{}_{}", n, tag)
    }

    /// Wraps `body` in the shadow-bank toggle the teacher's register model
    /// calls for when `reg`'s home lives in the shadow bank (spec §4.E.2):
    /// `EX AF,AF'` for a shadowed `A`, `EXX` for anything else, bracketing
    /// just this one access so the toggle never leaks across instructions.
    fn access<F: FnOnce(&mut Self)>(&mut self, reg: Register, body: F) {
        if !self.alloc.is_shadow(reg) {
            body(self);
            return;
        }
        let af = matches!(self.home(reg), PhysLoc::Reg8(Reg8::A));
        if af {
            self.push(AsmOp::new("EX", vec![Operand::Reg16("AF"), Operand::Reg16("AF'")]));
        } else {
            self.push(AsmOp::new("EXX", vec![]));
        }
        body(self);
        if af {
            self.push(AsmOp::new("EX", vec![Operand::Reg16("AF"), Operand::Reg16("AF'")]));
        } else {
            self.push(AsmOp::new("EXX", vec![]));
        }
    }

    fn load_byte_to(&mut self, reg: Register, dest: Reg8) {
        self.access(reg, |s| match s.home(reg) {
            PhysLoc::Reg8(r) if r == dest => {}
            PhysLoc::Reg8(r) => s.push(AsmOp::new("LD", vec![Operand::Reg8(dest.name()), Operand::Reg8(r.name())])),
            PhysLoc::Mem(addr) => {
                if dest == Reg8::A {
                    s.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndImm(Expr::Const(addr as i64))]));
                } else {
                    s.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndImm(Expr::Const(addr as i64))]));
                    s.push(AsmOp::new("LD", vec![Operand::Reg8(dest.name()), Operand::Reg8("A")]));
                }
            }
            PhysLoc::Reg16(_) => unreachable!("byte register never homes to a pair"),
        });
    }

    fn store_byte_from(&mut self, reg: Register, src: Reg8) {
        self.access(reg, |s| match s.home(reg) {
            PhysLoc::Reg8(r) if r == src => {}
            PhysLoc::Reg8(r) => s.push(AsmOp::new("LD", vec![Operand::Reg8(r.name()), Operand::Reg8(src.name())])),
            PhysLoc::Mem(addr) => {
                if src != Reg8::A {
                    s.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::Reg8(src.name())]));
                }
                s.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::Const(addr as i64)), Operand::Reg8("A")]));
            }
            PhysLoc::Reg16(_) => unreachable!(),
        });
    }

    /// Returns a register name holding `reg`'s byte value, spilling into
    /// `tmp` first if its home is memory. `tmp` must be a register the
    /// caller knows is otherwise free for the current instruction.
    fn byte_operand(&mut self, reg: Register, tmp: Reg8) -> &'static str {
        match self.home(reg) {
            PhysLoc::Reg8(r) => r.name(),
            PhysLoc::Mem(_) => {
                self.load_byte_to(reg, tmp);
                tmp.name()
            }
            PhysLoc::Reg16(_) => unreachable!(),
        }
    }

    fn load_word_to(&mut self, reg: Register, dest: Reg16) {
        self.access(reg, |s| match s.home(reg) {
            PhysLoc::Reg16(r) if r == dest => {}
            PhysLoc::Reg16(r) => {
                let (src_hi, src_lo) = pair_halves(r);
                let (dst_hi, dst_lo) = pair_halves(dest);
                s.push(AsmOp::new("LD", vec![Operand::Reg8(dst_hi), Operand::Reg8(src_hi)]));
                s.push(AsmOp::new("LD", vec![Operand::Reg8(dst_lo), Operand::Reg8(src_lo)]));
            }
            PhysLoc::Mem(addr) => {
                s.push(AsmOp::new("LD", vec![Operand::Reg16("HL"), Operand::IndImm(Expr::Const(addr as i64))]));
                if dest != Reg16::Hl {
                    let (dst_hi, dst_lo) = pair_halves(dest);
                    s.push(AsmOp::new("LD", vec![Operand::Reg8(dst_hi), Operand::Reg8("H")]));
                    s.push(AsmOp::new("LD", vec![Operand::Reg8(dst_lo), Operand::Reg8("L")]));
                }
            }
            PhysLoc::Reg8(_) => unreachable!("word register never homes to a byte"),
        });
    }

    fn store_word_from(&mut self, reg: Register, src: Reg16) {
        self.access(reg, |s| match s.home(reg) {
            PhysLoc::Reg16(r) if r == src => {}
            PhysLoc::Reg16(r) => {
                let (src_hi, src_lo) = pair_halves(src);
                let (dst_hi, dst_lo) = pair_halves(r);
                s.push(AsmOp::new("LD", vec![Operand::Reg8(dst_hi), Operand::Reg8(src_hi)]));
                s.push(AsmOp::new("LD", vec![Operand::Reg8(dst_lo), Operand::Reg8(src_lo)]));
            }
            PhysLoc::Mem(addr) => {
                if src != Reg16::Hl {
                    let (src_hi, src_lo) = pair_halves(src);
                    s.push(AsmOp::new("LD", vec![Operand::Reg8("H"), Operand::Reg8(src_hi)]));
                    s.push(AsmOp::new("LD", vec![Operand::Reg8("L"), Operand::Reg8(src_lo)]));
                }
                s.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::Const(addr as i64)), Operand::Reg16("HL")]));
            }
            PhysLoc::Reg8(_) => unreachable!(),
        });
    }

    fn lower_byte_binop(&mut self, mnemonic: &'static str, dst: Register, lhs: Register, rhs: Register) {
        self.load_byte_to(lhs, Reg8::A);
        let operand = self.byte_operand(rhs, Reg8::C);
        self.push(AsmOp::new(mnemonic, vec![Operand::Reg8("A"), Operand::Reg8(operand)]));
        self.store_byte_from(dst, Reg8::A);
    }

    fn lower_bitop(&mut self, mnemonic: &'static str, f: &Function, types: &TypeInterner, dst: Register, lhs: Register, rhs: Register) {
        if is_word(types, f.register_type(dst)) {
            self.load_word_to(lhs, Reg16::Hl);
            self.load_word_to(rhs, Reg16::De);
            self.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::Reg8("H")]));
            self.push(AsmOp::new(mnemonic, vec![Operand::Reg8("A"), Operand::Reg8("D")]));
            self.push(AsmOp::new("LD", vec![Operand::Reg8("H"), Operand::Reg8("A")]));
            self.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::Reg8("L")]));
            self.push(AsmOp::new(mnemonic, vec![Operand::Reg8("A"), Operand::Reg8("E")]));
            self.push(AsmOp::new("LD", vec![Operand::Reg8("L"), Operand::Reg8("A")]));
            self.store_word_from(dst, Reg16::Hl);
        } else {
            self.lower_byte_binop(mnemonic, dst, lhs, rhs);
        }
    }

    /// Leaves the appropriate flags set (from `CP` or `SBC HL,DE`) and
    /// folds them down to a 0/1 byte in `dst` via a pair of synthetic
    /// local labels distinct from [`LocalLabels`]'s `.Lnnn` scheme.
    fn materialize_bool(&mut self, dst: Register, conds: &[&'static str]) {
        let true_label = self.synth_label("true");
        let done_label = self.synth_label("done");
        for &cc in conds {
            self.push(AsmOp::new("JR", vec![Operand::Cond(cc), Operand::Relative(Expr::sym(true_label.clone()))]));
        }
        self.push(AsmOp::new("XOR", vec![Operand::Reg8("A"), Operand::Reg8("A")]));
        self.push(AsmOp::new("JR", vec![Operand::Relative(Expr::sym(done_label.clone()))]));
        self.label(true_label);
        self.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::Imm8(Expr::Const(1))]));
        self.label(done_label);
        self.store_byte_from(dst, Reg8::A);
    }

    /// Comparisons are always lowered as `a <relation> b`; `swap` flips
    /// the operand order so `Gt(a,b)`/`Ge(a,b)` reuse the `Lt`/`Le` flag
    /// tests against `(b,a)` instead of needing their own flag logic.
    /// Known simplification: signed widths use the same unsigned `C`/`Z`
    /// tests as unsigned ones (documented in `DESIGN.md`).
    fn do_compare(&mut self, f: &Function, types: &TypeInterner, dst: Register, lhs: Register, rhs: Register, conds: &[&'static str], swap: bool) {
        let (a, b) = if swap { (rhs, lhs) } else { (lhs, rhs) };
        if is_word(types, f.register_type(a)) {
            self.load_word_to(a, Reg16::Hl);
            self.load_word_to(b, Reg16::De);
            self.push(AsmOp::new("OR", vec![Operand::Reg8("A"), Operand::Reg8("A")]));
            self.push(AsmOp::new("SBC", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
        } else {
            self.load_byte_to(a, Reg8::A);
            let op = self.byte_operand(b, Reg8::C);
            self.push(AsmOp::new("CP", vec![Operand::Reg8("A"), Operand::Reg8(op)]));
        }
        self.materialize_bool(dst, conds);
    }
}

fn width_is_word(w: ArithWidth) -> Result<bool, BackendError> {
    match w {
        ArithWidth::U8 | ArithWidth::I8 => Ok(false),
        ArithWidth::U16 | ArithWidth::I16 => Ok(true),
        ArithWidth::U24 | ArithWidth::I24 => Err(BackendError::Unsupported("24-bit arithmetic".into())),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn lower_function(
    f: &Function,
    module: &Module,
    types: &TypeInterner,
    alloc: &Allocation,
    djnz_headers: &HashSet<Label>,
    tsmc_functions: &HashSet<String>,
) -> Result<Lowered, BackendError> {
    let djnz = analyze_djnz(f, djnz_headers);

    let mut overrides = HashMap::new();
    let mut counter_by_header = HashMap::new();
    let mut sub_suppress = HashSet::new();
    let mut branch_is_djnz = HashMap::new();
    for (&header, info) in &djnz {
        overrides.insert(info.decremented, PhysLoc::Reg8(Reg8::B));
        counter_by_header.insert(header, info.counter);
        sub_suppress.insert(info.sub_index);
        if let Some(start) = f.label_position(header) {
            if let Some(block) = ControlFlowGraph::compute(f).block_containing(start) {
                branch_is_djnz.insert(block.end - 1, header);
            }
        }
    }

    let mut suppress: HashSet<u32> = sub_suppress;
    for (i, inst) in f.insts.iter().enumerate() {
        if let Opcode::Call { tail: true, dst, .. } = &inst.opcode {
            if let Some(next) = f.insts.get(i + 1) {
                if let Opcode::Return { value } = &next.opcode {
                    if value == dst {
                        suppress.insert((i + 1) as u32);
                    }
                }
            }
        }
    }

    let mangled = f.name.clone();
    let use_tsmc = tsmc_functions.contains(&mangled);

    let arg_slots = if use_tsmc {
        None
    } else {
        let param_types: Vec<_> = f.params.iter().map(|p| p.ty).collect();
        Some(abi::assign_arg_slots(&param_types, types, ARG_OVERFLOW_ORIGIN))
    };
    let anchors: Vec<String> = f.params.iter().map(|p| abi::anchor_symbol(&mangled, &p.name)).collect();

    // Ports passed to `In`/`Out` are only supported when traceable to a
    // literal — the common case for embedded I/O — rather than building
    // full register-indirect `IN r,(C)`/`OUT (C),r` support.
    let mut const_defs: HashMap<Register, i64> = HashMap::new();
    for inst in &f.insts {
        if let Opcode::LoadConst { dst, imm } = &inst.opcode {
            const_defs.insert(*dst, imm.0);
        }
    }

    let mut sel = Selector {
        alloc,
        overrides,
        labels: LocalLabels::new(),
        synth: 0,
        items: Vec::new(),
        referenced: HashSet::new(),
    };
    let mut patches = Vec::new();

    sel.label(mangled.clone());

    // Dense `case` runs (spec §4.A.6) replace their compare-chain
    // prologue with an indexed jump; each arm still lowers its own body
    // normally, just reached through a synthesized entry label instead
    // of a fallthrough test.
    let mut dispatch_at: HashMap<u32, ChainDispatch> = HashMap::new();
    let mut arm_entry_name: HashMap<u32, String> = HashMap::new();
    for chain in detect_case_chains(f, types) {
        for &idx in &chain.prologue {
            suppress.insert(idx);
        }
        let table_label = sel.synth_label("case_table");
        let mut arm_labels = Vec::with_capacity(chain.arm_bodies.len());
        for &body_idx in &chain.arm_bodies {
            let name = sel.synth_label("case_arm");
            arm_entry_name.insert(body_idx, name.clone());
            arm_labels.push(name);
        }
        dispatch_at.insert(
            chain.start,
            ChainDispatch { scrutinee: chain.scrutinee, base: chain.base, count: chain.arm_bodies.len() as i64, default: chain.default, table_label, arm_labels },
        );
    }

    if use_tsmc {
        for (i, param) in f.params.iter().enumerate() {
            let anchor = anchors[i].clone();
            let ops = if is_word(types, param.ty) { abi::emit_anchor_u16(&anchor) } else { abi::emit_anchor_u8(&anchor) };
            for op in ops {
                sel.items.push(AsmItem::Op(op));
            }
            patches.push(PatchEntry { anchor, size: if is_word(types, param.ty) { 2 } else { 1 } });
        }
    }

    for idx in 0..f.insts.len() as u32 {
        if let Some(name) = arm_entry_name.get(&idx) {
            sel.label(name.clone());
        }
        if let Some(dispatch) = dispatch_at.get(&idx) {
            emit_case_dispatch(&mut sel, dispatch);
        }
        if suppress.contains(&idx) {
            continue;
        }
        if let Some(&header) = branch_is_djnz.get(&idx) {
            let name = sel.labels.name_of(header);
            sel.push(AsmOp::new("DJNZ", vec![Operand::Relative(Expr::sym(name))]));
            continue;
        }
        let inst = &f.insts[idx as usize];
        lower_inst(&mut sel, f, module, types, inst, idx, &counter_by_header, use_tsmc, &anchors, arg_slots.as_deref(), tsmc_functions, &const_defs)?;
    }

    Ok(Lowered { items: sel.items, referenced: sel.referenced, patches })
}

#[allow(clippy::too_many_arguments)]
fn lower_inst(
    sel: &mut Selector,
    f: &Function,
    module: &Module,
    types: &TypeInterner,
    inst: &crate::ir::instructions::Instruction,
    idx: u32,
    counter_by_header: &HashMap<Label, Register>,
    use_tsmc: bool,
    anchors: &[String],
    arg_slots: Option<&[ArgSlot]>,
    tsmc_functions: &HashSet<String>,
    const_defs: &HashMap<Register, i64>,
) -> Result<(), BackendError> {
    let _ = idx;
    match &inst.opcode {
        Opcode::LoadConst { dst, imm } => {
            if is_word(types, f.register_type(*dst)) {
                sel.push(AsmOp::new("LD", vec![Operand::Reg16("HL"), Operand::Imm16(Expr::Const(imm.0))]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else if imm.0 == 0 {
                sel.push(AsmOp::new("XOR", vec![Operand::Reg8("A"), Operand::Reg8("A")]));
                sel.store_byte_from(*dst, Reg8::A);
            } else {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::Imm8(Expr::Const(imm.0))]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }

        Opcode::LoadVar { dst, var } => {
            let g = &module.globals[*var];
            let name = super::hygiene::sanitize(&g.name);
            if is_word(types, g.ty) {
                sel.push(AsmOp::new("LD", vec![Operand::Reg16("HL"), Operand::IndImm(Expr::sym(name))]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndImm(Expr::sym(name))]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }
        Opcode::LoadGlobalAddr { dst, var } => {
            let g = &module.globals[*var];
            let name = super::hygiene::sanitize(&g.name);
            sel.push(AsmOp::new("LD", vec![Operand::Reg16("HL"), Operand::Imm16(Expr::sym(name))]));
            sel.store_word_from(*dst, Reg16::Hl);
        }
        Opcode::StoreVar { var, src } => {
            let g = &module.globals[*var];
            let name = super::hygiene::sanitize(&g.name);
            if is_word(types, g.ty) {
                sel.load_word_to(*src, Reg16::Hl);
                sel.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::sym(name)), Operand::Reg16("HL")]));
            } else {
                sel.load_byte_to(*src, Reg8::A);
                sel.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::sym(name)), Operand::Reg8("A")]));
            }
        }

        Opcode::LoadParam { dst, index } => {
            if use_tsmc {
                let anchor = &anchors[*index as usize];
                if is_word(types, f.register_type(*dst)) {
                    sel.push(AsmOp::new("LD", vec![Operand::Reg16("HL"), Operand::IndImm(Expr::sym(anchor.clone()))]));
                    sel.store_word_from(*dst, Reg16::Hl);
                } else {
                    sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndImm(Expr::sym(anchor.clone()))]));
                    sel.store_byte_from(*dst, Reg8::A);
                }
            } else {
                let slot = &arg_slots.expect("non-TSMC function always has arg slots")[*index as usize];
                match slot {
                    ArgSlot::A => sel.store_byte_from(*dst, Reg8::A),
                    ArgSlot::Hl => sel.store_word_from(*dst, Reg16::Hl),
                    ArgSlot::De => sel.store_word_from(*dst, Reg16::De),
                    ArgSlot::Bc => sel.store_word_from(*dst, Reg16::Bc),
                    ArgSlot::Mem(addr) => {
                        if is_word(types, f.register_type(*dst)) {
                            sel.push(AsmOp::new("LD", vec![Operand::Reg16("HL"), Operand::IndImm(Expr::Const(*addr as i64))]));
                            sel.store_word_from(*dst, Reg16::Hl);
                        } else {
                            sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndImm(Expr::Const(*addr as i64))]));
                            sel.store_byte_from(*dst, Reg8::A);
                        }
                    }
                }
            }
        }

        Opcode::Move { dst, src } => {
            if is_word(types, f.register_type(*dst)) {
                sel.load_word_to(*src, Reg16::Hl);
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.load_byte_to(*src, Reg8::A);
                sel.store_byte_from(*dst, Reg8::A);
            }
        }

        Opcode::Add { dst, lhs, rhs, width } => {
            if width_is_word(*width)? {
                sel.load_word_to(*lhs, Reg16::Hl);
                sel.load_word_to(*rhs, Reg16::De);
                sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.lower_byte_binop("ADD", *dst, *lhs, *rhs);
            }
        }
        Opcode::Sub { dst, lhs, rhs, width } => {
            if width_is_word(*width)? {
                sel.load_word_to(*lhs, Reg16::Hl);
                sel.load_word_to(*rhs, Reg16::De);
                sel.push(AsmOp::new("OR", vec![Operand::Reg8("A"), Operand::Reg8("A")]));
                sel.push(AsmOp::new("SBC", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.lower_byte_binop("SUB", *dst, *lhs, *rhs);
            }
        }
        Opcode::Mul { dst, lhs, rhs, width } => {
            if width_is_word(*width)? {
                sel.load_word_to(*lhs, Reg16::Hl);
                sel.load_word_to(*rhs, Reg16::De);
                sel.referenced.insert("__mul16".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__mul16"))]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.load_byte_to(*lhs, Reg8::A);
                sel.load_byte_to(*rhs, Reg8::E);
                sel.referenced.insert("__mul8".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__mul8"))]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }
        Opcode::Div { dst, lhs, rhs, width } => {
            if width_is_word(*width)? {
                sel.load_word_to(*lhs, Reg16::Hl);
                sel.load_word_to(*rhs, Reg16::De);
                sel.referenced.insert("__divmod16".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__divmod16"))]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.load_byte_to(*lhs, Reg8::A);
                sel.load_byte_to(*rhs, Reg8::E);
                sel.referenced.insert("__divmod8".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__divmod8"))]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }
        Opcode::Mod { dst, lhs, rhs, width } => {
            if width_is_word(*width)? {
                sel.load_word_to(*lhs, Reg16::Hl);
                sel.load_word_to(*rhs, Reg16::De);
                sel.referenced.insert("__divmod16".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__divmod16"))]));
                sel.store_word_from(*dst, Reg16::Bc);
            } else {
                sel.load_byte_to(*lhs, Reg8::A);
                sel.load_byte_to(*rhs, Reg8::E);
                sel.referenced.insert("__divmod8".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__divmod8"))]));
                sel.store_byte_from(*dst, Reg8::B);
            }
        }

        Opcode::And { dst, lhs, rhs } => sel.lower_bitop("AND", f, types, *dst, *lhs, *rhs),
        Opcode::Or { dst, lhs, rhs } => sel.lower_bitop("OR", f, types, *dst, *lhs, *rhs),
        Opcode::Xor { dst, lhs, rhs } => sel.lower_bitop("XOR", f, types, *dst, *lhs, *rhs),

        Opcode::Shl { dst, lhs, rhs } => {
            if is_word(types, f.register_type(*dst)) {
                sel.load_word_to(*lhs, Reg16::Hl);
                sel.load_byte_to(*rhs, Reg8::A);
                sel.referenced.insert("__shl16".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__shl16"))]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.load_byte_to(*lhs, Reg8::A);
                sel.load_byte_to(*rhs, Reg8::B);
                sel.referenced.insert("__shl8".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__shl8"))]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }
        Opcode::Shr { dst, lhs, rhs } => {
            if is_word(types, f.register_type(*dst)) {
                sel.load_word_to(*lhs, Reg16::Hl);
                sel.load_byte_to(*rhs, Reg8::A);
                sel.referenced.insert("__shr16".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__shr16"))]));
                sel.store_word_from(*dst, Reg16::Hl);
            } else {
                sel.load_byte_to(*lhs, Reg8::A);
                sel.load_byte_to(*rhs, Reg8::B);
                sel.referenced.insert("__shr8".into());
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("__shr8"))]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }

        Opcode::Eq { dst, lhs, rhs } => sel.do_compare(f, types, *dst, *lhs, *rhs, &["Z"], false),
        Opcode::Ne { dst, lhs, rhs } => sel.do_compare(f, types, *dst, *lhs, *rhs, &["NZ"], false),
        Opcode::Lt { dst, lhs, rhs, .. } => sel.do_compare(f, types, *dst, *lhs, *rhs, &["C"], false),
        Opcode::Le { dst, lhs, rhs, .. } => sel.do_compare(f, types, *dst, *lhs, *rhs, &["C", "Z"], false),
        Opcode::Gt { dst, lhs, rhs, .. } => sel.do_compare(f, types, *dst, *lhs, *rhs, &["C"], true),
        Opcode::Ge { dst, lhs, rhs, .. } => sel.do_compare(f, types, *dst, *lhs, *rhs, &["C", "Z"], true),

        Opcode::Jump { target } => {
            let name = sel.labels.name_of(*target);
            sel.push(AsmOp::new("JR", vec![Operand::Relative(Expr::sym(name))]));
        }
        Opcode::JumpIfTrue { cond, target } => {
            sel.load_byte_to(*cond, Reg8::A);
            sel.push(AsmOp::new("OR", vec![Operand::Reg8("A"), Operand::Reg8("A")]));
            let name = sel.labels.name_of(*target);
            sel.push(AsmOp::new("JR", vec![Operand::Cond("NZ"), Operand::Relative(Expr::sym(name))]));
        }
        Opcode::JumpIfFalse { cond, target } => {
            sel.load_byte_to(*cond, Reg8::A);
            sel.push(AsmOp::new("OR", vec![Operand::Reg8("A"), Operand::Reg8("A")]));
            let name = sel.labels.name_of(*target);
            sel.push(AsmOp::new("JR", vec![Operand::Cond("Z"), Operand::Relative(Expr::sym(name))]));
        }
        Opcode::Label { label } => {
            if let Some(&counter) = counter_by_header.get(label) {
                sel.load_byte_to(counter, Reg8::B);
            }
            let name = sel.labels.name_of(*label);
            sel.label(name);
        }

        Opcode::Call { func, args, dst, tail } => {
            let callee_id: FuncId = (*func).into();
            let callee = module.function(callee_id);
            let callee_name = callee.name.clone();
            let callee_is_tsmc = tsmc_functions.contains(&callee_name);

            if callee_is_tsmc {
                for (i, &arg) in args.iter().enumerate() {
                    let param = &callee.params[i];
                    let anchor = abi::anchor_symbol(&callee_name, &param.name);
                    // `anchor` is EQU'd (by the module orchestrator) to the
                    // address one past the anchor instruction's opcode byte
                    // — i.e. the embedded immediate operand itself.
                    if is_word(types, param.ty) {
                        sel.load_word_to(arg, Reg16::Hl);
                        sel.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::sym(anchor)), Operand::Reg16("HL")]));
                    } else {
                        sel.load_byte_to(arg, Reg8::A);
                        sel.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::sym(anchor)), Operand::Reg8("A")]));
                    }
                }
            } else {
                let param_types: Vec<_> = callee.params.iter().map(|p| p.ty).collect();
                let slots = abi::assign_arg_slots(&param_types, types, ARG_OVERFLOW_ORIGIN);
                for (&arg, slot) in args.iter().zip(slots.iter()) {
                    match slot {
                        ArgSlot::A => sel.load_byte_to(arg, Reg8::A),
                        ArgSlot::Hl => sel.load_word_to(arg, Reg16::Hl),
                        ArgSlot::De => sel.load_word_to(arg, Reg16::De),
                        ArgSlot::Bc => sel.load_word_to(arg, Reg16::Bc),
                        ArgSlot::Mem(addr) => {
                            if is_word(types, f.register_type(arg)) {
                                sel.load_word_to(arg, Reg16::Hl);
                                sel.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::Const(*addr as i64)), Operand::Reg16("HL")]));
                            } else {
                                sel.load_byte_to(arg, Reg8::A);
                                sel.push(AsmOp::new("LD", vec![Operand::IndImm(Expr::Const(*addr as i64)), Operand::Reg8("A")]));
                            }
                        }
                    }
                }
            }

            sel.referenced.insert(callee_name.clone());

            if *tail {
                sel.push(AsmOp::new("JP", vec![Operand::Imm16(Expr::sym(callee_name))]));
            } else {
                sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym(callee_name))]));
                if callee.error_type.is_some() && f.error_type.is_some() {
                    sel.push(AsmOp::new("RET", vec![Operand::Cond("C")]));
                }
                if let Some(d) = dst {
                    if is_word(types, callee.ret) {
                        sel.store_word_from(*d, Reg16::Hl);
                    } else if !matches!(types.lookup(callee.ret), TypeData::Void) {
                        sel.store_byte_from(*d, Reg8::A);
                    }
                }
            }
        }

        Opcode::Return { value } => {
            if let Some(v) = value {
                if is_word(types, f.register_type(*v)) {
                    sel.load_word_to(*v, Reg16::Hl);
                } else {
                    sel.load_byte_to(*v, Reg8::A);
                }
            }
            if f.error_type.is_some() {
                sel.push(AsmOp::new("OR", vec![Operand::Reg8("A"), Operand::Reg8("A")]));
            }
            sel.push(AsmOp::new("RET", vec![]));
        }

        Opcode::LoadIndirect { dst, addr } => {
            sel.load_word_to(*addr, Reg16::Hl);
            if is_word(types, f.register_type(*dst)) {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("E"), Operand::IndReg("HL")]));
                sel.push(AsmOp::new("INC", vec![Operand::Reg16("HL")]));
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("D"), Operand::IndReg("HL")]));
                sel.store_word_from(*dst, Reg16::De);
            } else {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndReg("HL")]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }
        Opcode::StoreIndirect { addr, src } => {
            if is_word(types, f.register_type(*src)) {
                sel.load_word_to(*src, Reg16::De);
                sel.load_word_to(*addr, Reg16::Hl);
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("E")]));
                sel.push(AsmOp::new("INC", vec![Operand::Reg16("HL")]));
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("D")]));
            } else {
                sel.load_byte_to(*src, Reg8::A);
                sel.load_word_to(*addr, Reg16::Hl);
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("A")]));
            }
        }

        Opcode::LoadField { dst, base, offset } => {
            sel.load_word_to(*base, Reg16::Hl);
            add_offset(sel, *offset);
            if is_word(types, f.register_type(*dst)) {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("E"), Operand::IndReg("HL")]));
                sel.push(AsmOp::new("INC", vec![Operand::Reg16("HL")]));
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("D"), Operand::IndReg("HL")]));
                sel.store_word_from(*dst, Reg16::De);
            } else {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndReg("HL")]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }
        Opcode::StoreField { base, offset, src } => {
            if is_word(types, f.register_type(*src)) {
                sel.load_word_to(*src, Reg16::De);
                sel.load_word_to(*base, Reg16::Hl);
                add_offset(sel, *offset);
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("E")]));
                sel.push(AsmOp::new("INC", vec![Operand::Reg16("HL")]));
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("D")]));
            } else {
                sel.load_byte_to(*src, Reg8::A);
                sel.load_word_to(*base, Reg16::Hl);
                add_offset(sel, *offset);
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("A")]));
            }
        }

        Opcode::LoadIndex { dst, base, index, elem_size } => {
            sel.load_byte_to(*index, Reg8::E);
            sel.push(AsmOp::new("LD", vec![Operand::Reg8("D"), Operand::Imm8(Expr::Const(0))]));
            scale_de(sel, *elem_size)?;
            sel.load_word_to(*base, Reg16::Hl);
            sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
            if is_word(types, f.register_type(*dst)) {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("E"), Operand::IndReg("HL")]));
                sel.push(AsmOp::new("INC", vec![Operand::Reg16("HL")]));
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("D"), Operand::IndReg("HL")]));
                sel.store_word_from(*dst, Reg16::De);
            } else {
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("A"), Operand::IndReg("HL")]));
                sel.store_byte_from(*dst, Reg8::A);
            }
        }
        Opcode::StoreIndex { base, index, elem_size, src } => {
            if is_word(types, f.register_type(*src)) {
                sel.load_word_to(*src, Reg16::Bc);
                sel.load_byte_to(*index, Reg8::E);
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("D"), Operand::Imm8(Expr::Const(0))]));
                scale_de(sel, *elem_size)?;
                sel.load_word_to(*base, Reg16::Hl);
                sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("C")]));
                sel.push(AsmOp::new("INC", vec![Operand::Reg16("HL")]));
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("B")]));
            } else {
                sel.load_byte_to(*src, Reg8::A);
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("C"), Operand::Reg8("A")]));
                sel.load_byte_to(*index, Reg8::E);
                sel.push(AsmOp::new("LD", vec![Operand::Reg8("D"), Operand::Imm8(Expr::Const(0))]));
                scale_de(sel, *elem_size)?;
                sel.load_word_to(*base, Reg16::Hl);
                sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
                sel.push(AsmOp::new("LD", vec![Operand::IndReg("HL"), Operand::Reg8("C")]));
            }
        }

        Opcode::LoadString { dst, string } => {
            sel.push(AsmOp::new("LD", vec![Operand::Reg16("HL"), Operand::Imm16(Expr::sym(string_label(*string)))]));
            sel.store_word_from(*dst, Reg16::Hl);
        }
        Opcode::PrintString { src } => {
            sel.load_word_to(*src, Reg16::Hl);
            sel.referenced.insert("print_string".into());
            sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("print_string"))]));
        }
        Opcode::PrintU8 { src } => {
            sel.load_byte_to(*src, Reg8::A);
            sel.referenced.insert("print_u8_decimal".into());
            sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("print_u8_decimal"))]));
        }
        Opcode::PrintU16 { src } => {
            sel.load_word_to(*src, Reg16::Hl);
            sel.referenced.insert("print_u16_decimal".into());
            sel.push(AsmOp::new("CALL", vec![Operand::Imm16(Expr::sym("print_u16_decimal"))]));
        }

        Opcode::In { dst, port } => {
            let &p = const_defs.get(port).ok_or_else(|| BackendError::Unsupported("IN with a non-constant port".into()))?;
            sel.push(AsmOp::new("IN", vec![Operand::Reg8("A"), Operand::IndImm(Expr::Const(p))]));
            sel.store_byte_from(*dst, Reg8::A);
        }
        Opcode::Out { port, value } => {
            let &p = const_defs.get(port).ok_or_else(|| BackendError::Unsupported("OUT with a non-constant port".into()))?;
            sel.load_byte_to(*value, Reg8::A);
            sel.push(AsmOp::new("OUT", vec![Operand::IndImm(Expr::Const(p)), Operand::Reg8("A")]));
        }

        Opcode::SmcAnchor { .. } | Opcode::SmcPatch { .. } => {
            return Err(BackendError::Unsupported("SmcAnchor/SmcPatch MIR is never emitted by the builder".into()));
        }
    }
    Ok(())
}

/// `HL += offset`, via `DE`/`ADD HL,DE` since Z80 has no immediate-operand
/// add to `HL`.
fn add_offset(sel: &mut Selector, offset: u32) {
    if offset == 0 {
        return;
    }
    sel.push(AsmOp::new("LD", vec![Operand::Reg16("DE"), Operand::Imm16(Expr::Const(offset as i64))]));
    sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("DE")]));
}

/// Scales the zero-extended index already in `DE` by `elem_size`, a
/// power of two up to 8 (arrays of larger or non-power-of-two elements
/// are outside this backend's scope).
fn scale_de(sel: &mut Selector, elem_size: u32) -> Result<(), BackendError> {
    let shifts = match elem_size {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        other => return Err(BackendError::Unsupported(format!("array element size {} (only powers of two up to 8 are supported)", other))),
    };
    for _ in 0..shifts {
        sel.push(AsmOp::new("LD", vec![Operand::Reg8("H"), Operand::Reg8("D")]));
        sel.push(AsmOp::new("LD", vec![Operand::Reg8("L"), Operand::Reg8("E")]));
        sel.push(AsmOp::new("ADD", vec![Operand::Reg16("HL"), Operand::Reg16("HL")]));
        sel.push(AsmOp::new("LD", vec![Operand::Reg8("D"), Operand::Reg8("H")]));
        sel.push(AsmOp::new("LD", vec![Operand::Reg8("E"), Operand::Reg8("L")]));
    }
    Ok(())
}
