//! Overload-set name mangling and call-site resolution (spec §4.A.1).
//!
//! Mangled names are `base$tag1$tag2...`, where each tag is the
//! [`TypeInterner::mangle`] tag of a parameter type, in declaration
//! order. A zero-parameter function mangles to its bare base name so
//! that `main` and other argument-free entry points stay readable.

use super::symtab::SymbolTable;
use crate::types::{Type, TypeInterner};

pub fn mangle_name(base: &str, params: &[Type], types: &TypeInterner) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let mut name = base.to_string();
    for p in params {
        name.push('$');
        name.push_str(&types.mangle(*p));
    }
    name
}

/// Picks the overload of `callee` whose parameters accept `arg_types`,
/// per spec §4.A.1: an exact match wins; failing that, the unique
/// overload every argument can implicitly widen into. Returns the
/// winning overload's mangled name, or `None` if no overload matches or
/// more than one does ambiguously.
pub fn resolve_overload(
    callee: &str,
    arg_types: &[Type],
    symtab: &SymbolTable,
    types: &TypeInterner,
) -> Option<String> {
    let candidates = symtab.overloads_of(callee);
    if candidates.is_empty() {
        return None;
    }

    let exact = candidates.iter().find(|m| {
        symtab
            .signature_of(m)
            .map(|sig| sig.params.as_slice() == arg_types)
            .unwrap_or(false)
    });
    if let Some(m) = exact {
        return Some(m.clone());
    }

    let mut widened: Vec<&String> = candidates
        .iter()
        .filter(|m| {
            symtab
                .signature_of(m)
                .map(|sig| {
                    sig.params.len() == arg_types.len()
                        && sig
                            .params
                            .iter()
                            .zip(arg_types.iter())
                            .all(|(p, a)| types.can_widen(*a, *p))
                })
                .unwrap_or(false)
        })
        .collect();

    if widened.len() == 1 {
        widened.pop().cloned()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::symtab::FunctionSignature;
    use crate::types::{IntWidth, TypeData};

    #[test]
    fn zero_params_mangle_to_bare_name() {
        let types = TypeInterner::new();
        assert_eq!(mangle_name("main", &[], &types), "main");
    }

    #[test]
    fn params_append_mangled_type_tags() {
        let mut types = TypeInterner::new();
        let u8_ty = types.intern(TypeData::Int(IntWidth::U8));
        let u16_ty = types.intern(TypeData::Int(IntWidth::U16));
        assert_eq!(mangle_name("add", &[u8_ty, u16_ty], &types), "add$u8$u16");
    }

    #[test]
    fn exact_match_is_preferred_over_widening() {
        let mut types = TypeInterner::new();
        let u8_ty = types.intern(TypeData::Int(IntWidth::U8));
        let u16_ty = types.intern(TypeData::Int(IntWidth::U16));
        let mut symtab = SymbolTable::new();
        symtab.declare_function(
            "f".into(),
            FunctionSignature {
                mangled_name: "f$u8".into(),
                params: vec![u8_ty],
                ret: u8_ty,
                error_type: None,
                ctie_hint: false,
            },
        );
        symtab.declare_function(
            "f".into(),
            FunctionSignature {
                mangled_name: "f$u16".into(),
                params: vec![u16_ty],
                ret: u16_ty,
                error_type: None,
                ctie_hint: false,
            },
        );
        let resolved = resolve_overload("f", &[u8_ty], &symtab, &types);
        assert_eq!(resolved, Some("f$u8".to_string()));
    }

    #[test]
    fn single_widening_candidate_resolves() {
        let mut types = TypeInterner::new();
        let u16_ty = types.intern(TypeData::Int(IntWidth::U16));
        let u8_ty = types.intern(TypeData::Int(IntWidth::U8));
        let mut symtab = SymbolTable::new();
        symtab.declare_function(
            "f".into(),
            FunctionSignature {
                mangled_name: "f$u16".into(),
                params: vec![u16_ty],
                ret: u16_ty,
                error_type: None,
                ctie_hint: false,
            },
        );
        let resolved = resolve_overload("f", &[u8_ty], &symtab, &types);
        assert_eq!(resolved, Some("f$u16".to_string()));
    }
}
