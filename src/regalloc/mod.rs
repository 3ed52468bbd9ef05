//! Z80 register model and hierarchical greedy allocator (spec §4.E.1–4.E.2).
//!
//! Assigns each MIR virtual register to a physical location in three tiers
//! tried in order — primary 8/16-bit registers, the shadow bank (bracketed
//! by `EXX`/`EX AF,AF'`), and a fixed memory region — via a linear-scan
//! allocator over per-register live ranges recovered from first-definition
//! and last-use instruction indices. Grounded on `cranelift-codegen`'s
//! `isa::RegClass`/`RegUnit` split: register *class* (byte vs. word) is a
//! property of the virtual register's type, physical *unit* assignment is
//! this module's job, done with a linear scan over sorted live ranges
//! rather than full graph coloring — appropriate for whole-function,
//! small-register-count Z80 code.

use crate::ir::entities::{Label, Register};
use crate::ir::flowgraph::ControlFlowGraph;
use crate::ir::function::Function;
use crate::ir::instructions::Opcode;
use crate::types::TypeInterner;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// An 8-bit primary register.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Reg8 {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
}

impl Reg8 {
    pub fn name(self) -> &'static str {
        match self {
            Reg8::A => "A",
            Reg8::B => "B",
            Reg8::C => "C",
            Reg8::D => "D",
            Reg8::E => "E",
            Reg8::H => "H",
            Reg8::L => "L",
        }
    }
}

impl fmt::Display for Reg8 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A 16-bit register pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Reg16 {
    Bc,
    De,
    Hl,
}

impl Reg16 {
    pub fn name(self) -> &'static str {
        match self {
            Reg16::Bc => "BC",
            Reg16::De => "DE",
            Reg16::Hl => "HL",
        }
    }

    /// Whether this pair contains [`Reg8::B`] — reserved while a DJNZ loop
    /// counts down (spec §4.E.2).
    pub fn contains_b(self) -> bool {
        matches!(self, Reg16::Bc)
    }
}

impl fmt::Display for Reg16 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a virtual register ended up. Shadow-bank placement uses the same
/// names as primary (spec §4.E.2: "while the shadow bank is active,
/// register names in emitted assembly are the non-primed names"); whether
/// a given register's home is in the shadow bank is tracked separately in
/// [`Allocation::in_shadow`], so no `PhysLoc` ever carries a primed name
/// (spec §8 property 4).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PhysLoc {
    Reg8(Reg8),
    Reg16(Reg16),
    /// Absolute address of a compiler-owned spill slot.
    Mem(u16),
}

impl fmt::Display for PhysLoc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PhysLoc::Reg8(r) => write!(f, "{}", r),
            PhysLoc::Reg16(r) => write!(f, "{}", r),
            PhysLoc::Mem(addr) => write!(f, "${:04X}", addr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegClass {
    Byte,
    Word,
}

#[derive(Debug, Clone, Copy)]
struct LiveRange {
    start: u32,
    end: u32,
    class: RegClass,
}

/// The result of allocation: a physical home for every register [`Function`]
/// defines, which of those homes live in the shadow bank, and the extent
/// of the spill region used.
#[derive(Debug, Default)]
pub struct Allocation {
    pub locs: HashMap<Register, PhysLoc>,
    pub in_shadow: HashSet<Register>,
    /// One past the highest spill address handed out; `None` if nothing
    /// was spilled.
    pub spill_top: Option<u16>,
}

impl Allocation {
    pub fn loc(&self, reg: Register) -> PhysLoc {
        self.locs
            .get(&reg)
            .copied()
            .expect("register allocator assigns a location to every defined register")
    }

    pub fn is_shadow(&self, reg: Register) -> bool {
        self.in_shadow.contains(&reg)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// Origin of the compiler-owned spill region (spec §4.E.2's default
    /// `$F000`).
    pub spill_origin: u16,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig { spill_origin: 0xF000 }
    }
}

/// Assigns every register `f` defines to a physical location. `djnz_loops`
/// (typically [`crate::opt::loops::countable_djnz_loops`]'s output) marks
/// header labels whose body block must not receive `B`/`BC` — the counter
/// itself lives there.
pub fn allocate(
    f: &Function,
    types: &TypeInterner,
    djnz_loops: &HashSet<Label>,
    config: &AllocatorConfig,
) -> Allocation {
    let ranges = live_ranges(f, types);
    let reserved_b = reserved_b_positions(f, djnz_loops);

    let mut order: Vec<Register> = ranges.keys().copied().collect();
    order.sort_by_key(|r| ranges[r].start);

    let mut alloc = Allocation::default();

    let mut primary_bytes = vec![Reg8::A, Reg8::B, Reg8::C, Reg8::D, Reg8::E, Reg8::H, Reg8::L];
    let mut primary_words = vec![Reg16::Hl, Reg16::De, Reg16::Bc];
    let mut shadow_bytes = primary_bytes.clone();
    let mut shadow_words = primary_words.clone();

    let mut active_primary: Vec<(u32, PhysLoc)> = Vec::new();
    let mut active_shadow: Vec<(u32, PhysLoc)> = Vec::new();
    let mut spill_next = config.spill_origin;

    for reg in order {
        let range = ranges[&reg];
        expire(&mut active_primary, range.start, &mut primary_bytes, &mut primary_words);
        expire(&mut active_shadow, range.start, &mut shadow_bytes, &mut shadow_words);

        let b_reserved = (range.start..range.end).any(|p| reserved_b.contains(&p));

        let loc = take_primary(range.class, b_reserved, &mut primary_bytes, &mut primary_words)
            .map(|loc| {
                active_primary.push((range.end, loc));
                loc
            })
            .or_else(|| {
                if has_call_in_range(f, range.start, range.end) {
                    return None;
                }
                take_primary(range.class, b_reserved, &mut shadow_bytes, &mut shadow_words).map(|loc| {
                    alloc.in_shadow.insert(reg);
                    active_shadow.push((range.end, loc));
                    loc
                })
            })
            .unwrap_or_else(|| {
                let size: u16 = if range.class == RegClass::Word { 2 } else { 1 };
                let addr = spill_next;
                spill_next = spill_next.wrapping_add(size);
                alloc.spill_top = Some(spill_next);
                log::debug!(
                    "{}: spilling {} ({:?}, live {}..{}) to ${:04x}",
                    f.name, reg, range.class, range.start, range.end, addr
                );
                PhysLoc::Mem(addr)
            });

        alloc.locs.insert(reg, loc);
    }

    alloc
}

fn expire(active: &mut Vec<(u32, PhysLoc)>, before: u32, bytes: &mut Vec<Reg8>, words: &mut Vec<Reg16>) {
    active.retain(|&(end, loc)| {
        if end > before {
            return true;
        }
        match loc {
            PhysLoc::Reg8(r) => bytes.push(r),
            PhysLoc::Reg16(r) => words.push(r),
            PhysLoc::Mem(_) => {}
        }
        false
    });
}

fn take_primary(class: RegClass, b_reserved: bool, bytes: &mut Vec<Reg8>, words: &mut Vec<Reg16>) -> Option<PhysLoc> {
    match class {
        RegClass::Byte => {
            let idx = bytes
                .iter()
                .position(|&r| !(b_reserved && r == Reg8::B))
                .or_else(|| if b_reserved { None } else { bytes.iter().position(|_| true) })?;
            Some(PhysLoc::Reg8(bytes.remove(idx)))
        }
        RegClass::Word => {
            let idx = words
                .iter()
                .position(|&r| !(b_reserved && r.contains_b()))?;
            Some(PhysLoc::Reg16(words.remove(idx)))
        }
    }
}

fn has_call_in_range(f: &Function, start: u32, end: u32) -> bool {
    f.insts[start as usize..end as usize]
        .iter()
        .any(|i| matches!(i.opcode, Opcode::Call { .. }))
}

fn live_ranges(f: &Function, types: &TypeInterner) -> HashMap<Register, LiveRange> {
    let mut ranges: HashMap<Register, LiveRange> = HashMap::new();
    for (i, inst) in f.insts.iter().enumerate() {
        let i = i as u32;
        if let Some(d) = inst.opcode.dest() {
            let class = class_of(f, types, d);
            ranges.insert(d, LiveRange { start: i, end: i, class });
        }
        for used in inst.opcode.uses() {
            if let Some(r) = ranges.get_mut(&used) {
                r.end = r.end.max(i);
            }
        }
    }
    ranges
}

fn class_of(f: &Function, types: &TypeInterner, reg: Register) -> RegClass {
    let ty = f.register_type(reg);
    match types.size_of(ty) {
        Some(n) if n <= 1 => RegClass::Byte,
        Some(_) => RegClass::Word,
        None => RegClass::Byte,
    }
}

/// Instruction positions that fall inside a recognized DJNZ loop body —
/// `B`/`BC` must not be handed to any register whose live range overlaps
/// one of these (spec §4.E.2: "`B` is reserved when a DJNZ loop is active
/// in the enclosing block").
fn reserved_b_positions(f: &Function, djnz_loops: &HashSet<Label>) -> HashSet<u32> {
    let mut positions = HashSet::new();
    if djnz_loops.is_empty() {
        return positions;
    }
    let cfg = ControlFlowGraph::compute(f);
    for &header in djnz_loops {
        if let Some(start) = f.label_position(header) {
            if let Some(block) = cfg.block_containing(start) {
                positions.extend(block.start..block.end);
            }
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::Imm;
    use crate::span::SourceSpan;
    use crate::types::{IntWidth, TypeData};

    #[test]
    fn two_disjoint_byte_registers_both_get_primary_homes() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let a = f.new_register(u8_ty);
        let b = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: a, imm: Imm(1) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(a) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::LoadConst { dst: b, imm: Imm(2) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(b) }, SourceSpan::SYNTHETIC);

        let alloc = allocate(&f, &interner, &HashSet::new(), &AllocatorConfig::default());
        assert!(matches!(alloc.loc(a), PhysLoc::Reg8(_)));
        assert!(matches!(alloc.loc(b), PhysLoc::Reg8(_)));
        assert!(alloc.spill_top.is_none());
    }

    #[test]
    fn sixteen_bit_register_gets_a_pair() {
        let mut interner = TypeInterner::new();
        let u16_ty = interner.intern(TypeData::Int(IntWidth::U16));
        let mut f = Function::new("f", u16_ty, None);
        let r = f.new_register(u16_ty);
        f.push(Opcode::LoadConst { dst: r, imm: Imm(1000) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(r) }, SourceSpan::SYNTHETIC);

        let alloc = allocate(&f, &interner, &HashSet::new(), &AllocatorConfig::default());
        assert!(matches!(alloc.loc(r), PhysLoc::Reg16(_)));
    }

    #[test]
    fn exhausting_primary_and_shadow_tiers_spills_to_memory() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        // 7 primary + 7 shadow byte slots = 14; allocate 15 live-at-once
        // byte registers (all defined before any is used, so every range
        // overlaps every other) to force a spill.
        let mut regs = Vec::new();
        for i in 0..15 {
            let r = f.new_register(u8_ty);
            f.push(Opcode::LoadConst { dst: r, imm: Imm(i) }, SourceSpan::SYNTHETIC);
            regs.push(r);
        }
        for &r in &regs {
            f.push(Opcode::Return { value: Some(r) }, SourceSpan::SYNTHETIC);
        }

        let alloc = allocate(&f, &interner, &HashSet::new(), &AllocatorConfig::default());
        assert!(regs.iter().any(|r| matches!(alloc.loc(*r), PhysLoc::Mem(_))));
        assert!(alloc.spill_top.is_some());
    }

    #[test]
    fn djnz_active_register_never_receives_b() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(IntWidth::U8));
        let mut f = Function::new("f", u8_ty, None);
        let header = f.new_label();
        let counter = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: counter, imm: Imm(5) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Label { label: header }, SourceSpan::SYNTHETIC);
        let body_reg = f.new_register(u8_ty);
        f.push(Opcode::LoadConst { dst: body_reg, imm: Imm(9) }, SourceSpan::SYNTHETIC);
        f.push(Opcode::JumpIfTrue { cond: body_reg, target: header }, SourceSpan::SYNTHETIC);
        f.push(Opcode::Return { value: Some(body_reg) }, SourceSpan::SYNTHETIC);

        let mut headers = HashSet::new();
        headers.insert(header);
        let alloc = allocate(&f, &interner, &headers, &AllocatorConfig::default());
        assert_ne!(alloc.loc(body_reg), PhysLoc::Reg8(Reg8::B));
    }
}
