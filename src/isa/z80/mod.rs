//! Z80 code generator (spec §4.E, §6): the only [`TargetIsa`] this crate
//! ships. Owns the per-function pipeline — DJNZ recognition, TSMC
//! eligibility, register allocation, instruction selection — and the
//! whole-module concerns instruction selection can't see on its own:
//! reachability-based tree shaking of dead functions, the runtime-helper
//! closure, and final assembly text layout.

pub mod abi;
pub mod hygiene;
pub mod runtime;
pub mod select;
pub mod tsmc;

use std::collections::{HashSet, VecDeque};

use crate::config::Config;
use crate::encoder::{self, AsmItem, DbItem, Directive, Expr};
use crate::entity::EntityRef;
use crate::ir::function::FuncId;
use crate::ir::instructions::Opcode;
use crate::ir::module::{GlobalInit, Module};
use crate::opt::loops::countable_djnz_loops;
use crate::regalloc::{self, AllocatorConfig};
use crate::types::{TypeData, TypeInterner};

use super::{BackendError, Capabilities, TargetIsa};

/// Origin of the `$F000` data section (spec §6): string literals, globals,
/// and the register allocator's spill region share this one area, laid
/// out data-then-globals-then-spills so the allocator's own origin can
/// simply start after however many bytes the two fixed parts above it
/// take.
const DATA_ORIGIN: u16 = 0xF000;

/// Origin of the `$8000` code section (spec §6).
const CODE_ORIGIN: u16 = 0x8000;

pub struct Z80Backend;

impl Z80Backend {
    pub fn new() -> Self {
        Z80Backend
    }
}

impl Default for Z80Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetIsa for Z80Backend {
    fn name(&self) -> &'static str {
        "z80"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { supports_tsmc: true, has_shadow_registers: true, has_djnz: true }
    }

    fn emit_module(&self, module: &Module, types: &TypeInterner, config: &Config) -> Result<String, BackendError> {
        let reachable = reachable_functions(module);

        let tsmc_functions: HashSet<String> = if config.enable_smc {
            reachable
                .iter()
                .filter_map(|&id| {
                    let f = module.function(id);
                    tsmc::is_tsmc_eligible(f).then(|| f.name.clone())
                })
                .collect()
        } else {
            HashSet::new()
        };

        let mut referenced: HashSet<String> = HashSet::new();
        let mut patches_by_fn: Vec<(String, Vec<abi::PatchEntry>)> = Vec::new();
        let mut code_items: Vec<AsmItem> = Vec::new();

        let mut fn_ids: Vec<FuncId> = reachable.into_iter().collect();
        fn_ids.sort_by_key(|id| id.index());

        for id in fn_ids {
            let f = module.function(id);
            let headers = countable_djnz_loops(f);
            let alloc_config = AllocatorConfig { spill_origin: spill_origin_for(module, types) };
            let alloc = regalloc::allocate(f, types, &headers, &alloc_config);

            let lowered = select::lower_function(f, module, types, &alloc, &headers, &tsmc_functions)?;
            referenced.extend(lowered.referenced);
            code_items.extend(lowered.items);
            if !lowered.patches.is_empty() {
                patches_by_fn.push((f.name.clone(), lowered.patches));
            }
        }

        let runtime_routines = runtime::shake(&referenced, config.target);
        for routine in &runtime_routines {
            code_items.extend(routine.body.clone());
        }

        let mut items = Vec::new();
        items.push(AsmItem::Directive(Directive::Org(DATA_ORIGIN)));
        items.extend(data_section(module, types));
        items.push(AsmItem::Directive(Directive::Org(CODE_ORIGIN)));
        items.extend(code_items);
        items.extend(patch_table(&patches_by_fn));

        let entry = module.function_by_name("main").map(|id| module.function(id).name.clone()).unwrap_or_else(|| "main".to_string());
        items.push(AsmItem::Directive(Directive::Raw(format!("    END {}", entry))));

        Ok(encoder::render(&items))
    }
}

/// BFS over `Call` edges from `main`: a function never reached from
/// `main` contributes no code (spec §4.E.6's tree shaking applies to
/// user functions the same way [`runtime::shake`] applies to runtime
/// helpers). `main` itself is always kept even if nothing calls it.
fn reachable_functions(module: &Module) -> HashSet<FuncId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    if let Some(main_id) = module.function_by_name("main") {
        queue.push_back(main_id);
    }
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        for inst in &module.function(id).insts {
            if let Opcode::Call { func, .. } = &inst.opcode {
                let callee: FuncId = (*func).into();
                queue.push_back(callee);
            }
        }
    }
    seen
}

/// Every reachable function's spill slots share one pool starting right
/// after the fixed data laid out ahead of it (strings, then globals),
/// since no two functions' spill regions are ever live at once.
fn spill_origin_for(module: &Module, types: &TypeInterner) -> u16 {
    let mut size: u32 = 0;
    for (idx, _) in module.strings.iter() {
        size += module.strings.encoded(idx).len() as u32;
    }
    for g in module.globals.values() {
        size += types.size_of(g.ty).unwrap_or(2);
    }
    DATA_ORIGIN.saturating_add(size as u16)
}

fn data_section(module: &Module, types: &TypeInterner) -> Vec<AsmItem> {
    let mut items = Vec::new();

    for (idx, _) in module.strings.iter() {
        let label = select::string_label(crate::ir::entities::StringRef::new(idx));
        items.push(AsmItem::Directive(Directive::LabelOnly(label)));
        items.push(AsmItem::Directive(Directive::Db(vec![DbItem::Str(module.strings.encoded(idx))])));
    }

    for g in module.globals.values() {
        let name = hygiene::sanitize(&g.name);
        items.push(AsmItem::Directive(Directive::LabelOnly(name)));
        let size = types.size_of(g.ty).unwrap_or(2);
        let word = size >= 2 && !matches!(types.lookup(g.ty), TypeData::Struct(_) | TypeData::Array(_, _));
        match (&g.init, word) {
            (Some(GlobalInit::Array(vals)), _) => {
                let bytes = vals.iter().map(|v| DbItem::Byte(Expr::Const(*v))).collect();
                items.push(AsmItem::Directive(Directive::Db(bytes)));
            }
            (Some(GlobalInit::Int(v)), true) => {
                items.push(AsmItem::Directive(Directive::Dw(vec![Expr::Const(*v)])));
            }
            (Some(GlobalInit::Int(v)), false) => {
                items.push(AsmItem::Directive(Directive::Db(vec![DbItem::Byte(Expr::Const(*v))])));
            }
            (_, _) => {
                let zeros = (0..size).map(|_| DbItem::Byte(Expr::Const(0))).collect();
                items.push(AsmItem::Directive(Directive::Db(zeros)));
            }
        }
    }

    items
}

/// `PATCH_TABLE:` section (spec §6): one `DW <anchor>` + `DB <size>` +
/// `DB <reserved>` row per TSMC parameter, terminated by `DW 0`. Each
/// `anchor` symbol is EQU'd here to the address of the anchor
/// instruction's embedded immediate operand — one past its opcode byte
/// — so both the table and the patching code at call sites (spec §4.E.3)
/// refer to the same name without repeating the `+1` arithmetic.
fn patch_table(patches_by_fn: &[(String, Vec<abi::PatchEntry>)]) -> Vec<AsmItem> {
    let mut items = Vec::new();
    let mut equs = Vec::new();
    for (_, entries) in patches_by_fn {
        for entry in entries {
            equs.push(AsmItem::Directive(Directive::Equ(
                entry.anchor.clone(),
                Expr::sym(format!("{}.op", entry.anchor)).add(Expr::Const(1)),
            )));
        }
    }
    items.extend(equs);

    items.push(AsmItem::Directive(Directive::LabelOnly("PATCH_TABLE".to_string())));
    for (_, entries) in patches_by_fn {
        for entry in entries {
            items.push(AsmItem::Directive(Directive::Dw(vec![Expr::sym(entry.anchor.clone())])));
            items.push(AsmItem::Directive(Directive::Db(vec![
                DbItem::Byte(Expr::Const(entry.size as i64)),
                DbItem::Byte(Expr::Const(0)),
            ])));
        }
    }
    items.push(AsmItem::Directive(Directive::Dw(vec![Expr::Const(0)])));

    items
}
