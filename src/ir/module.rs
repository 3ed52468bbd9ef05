//! MIR [`Module`] (spec §3.2).
//!
//! A module owns globals, deduplicated string literals, and functions;
//! per-function metadata flags (`uses-SMC`/`is-leaf`/`is-pure`/
//! `is-recursive`) live on [`crate::ir::function::FunctionFlags`] since
//! they describe properties of individual functions rather than the
//! module as a whole.

use crate::entity::{entity_impl, EntityRef, PrimaryMap};
use crate::ir::entities::GlobalRef;
use crate::ir::function::{FuncId, Function};
use crate::ir::strings::StringTable;
use crate::types::Type;

/// A module-level global: either a typed constant or zero-initialized
/// storage (spec §3.2).
#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub init: Option<GlobalInit>,
}

#[derive(Debug, Clone)]
pub enum GlobalInit {
    Int(i64),
    /// Element values of a materialized array literal (spec §3.1(e)),
    /// one entry per element, laid out contiguously in declaration order.
    Array(Vec<i64>),
    Zero,
}

/// Declared-but-not-defined function, reachable only through a `Call`
/// (spec §3.3: "Every `Call` names a function in the module or a declared
/// external").
#[derive(Debug, Clone)]
pub struct ExternalFunction {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternId(u32);
entity_impl!(ExternId, "extern");

/// The whole compilation unit MIR is built into and optimized within.
#[derive(Default)]
pub struct Module {
    pub globals: PrimaryMap<GlobalRef, Global>,
    pub strings: StringTable,
    pub functions: PrimaryMap<FuncId, Function>,
    pub externs: PrimaryMap<ExternId, ExternalFunction>,
    /// Maps a function's mangled name back to its id, so overload
    /// resolution (spec §4.A.1) and call-site lowering can look up a
    /// callee by name without a linear scan.
    name_index: std::collections::HashMap<String, FuncId>,
    extern_name_index: std::collections::HashMap<String, ExternId>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_function(&mut self, func: Function) -> FuncId {
        let name = func.name.clone();
        let id = self.functions.push(func);
        self.name_index.insert(name, id);
        id
    }

    pub fn declare_extern(&mut self, ext: ExternalFunction) -> ExternId {
        let name = ext.name.clone();
        let id = self.externs.push(ext);
        self.extern_name_index.insert(name, id);
        id
    }

    pub fn declare_global(&mut self, global: Global) -> GlobalRef {
        self.globals.push(global)
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.name_index.get(name).copied()
    }

    pub fn extern_by_name(&self, name: &str) -> Option<ExternId> {
        self.extern_name_index.get(name).copied()
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id]
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.functions.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeData, TypeInterner};

    #[test]
    fn functions_are_looked_up_by_mangled_name() {
        let mut interner = TypeInterner::new();
        let u8_ty = interner.intern(TypeData::Int(crate::types::IntWidth::U8));
        let mut m = Module::new();
        let f = Function::new("add$u8$u8", u8_ty, None);
        let id = m.declare_function(f);
        assert_eq!(m.function_by_name("add$u8$u8"), Some(id));
        assert_eq!(m.function_by_name("nope"), None);
    }
}
