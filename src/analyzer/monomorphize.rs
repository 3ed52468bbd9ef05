//! Interface monomorphization (spec §4.A.2): "no vtables, ever" — every
//! `impl Interface for Type` method becomes its own top-level function,
//! named `Type_method`. A call through an interface value is expected to
//! already name the concrete receiver type by the time this pass runs
//! (an earlier desugaring step's responsibility); this pass only
//! flattens the declarations and registers their signatures so call
//! resolution (spec §4.A.1) treats them like any other overload set.
//!
//! Plain functions pass through unchanged — they were already registered
//! by pass 1.

use super::mangle;
use super::symtab::{FunctionSignature, SymbolTable};
use crate::ast;
use crate::diagnostics::Diagnostics;
use crate::types::TypeInterner;

pub fn expand(
    module: &ast::Module,
    types: &mut TypeInterner,
    symtab: &mut SymbolTable,
    _diagnostics: &mut Diagnostics,
) -> Vec<ast::FunctionDecl> {
    let mut out: Vec<ast::FunctionDecl> = module.functions.clone();

    for imp in &module.impls {
        let receiver_name = type_expr_name(&imp.for_type);
        for method in &imp.methods {
            let flat_name = format!("{}_{}", receiver_name, method.name);
            let mut flattened = method.clone();
            flattened.name = flat_name.clone();

            let params: Vec<_> = flattened
                .params
                .iter()
                .map(|p| super::resolve_type_expr_standalone(&p.ty, types, symtab))
                .collect();
            let ret = flattened
                .ret
                .as_ref()
                .map(|t| super::resolve_type_expr_standalone(t, types, symtab))
                .unwrap_or_else(|| types.intern(crate::types::TypeData::Void));
            let error_type = flattened
                .error_type
                .as_ref()
                .map(|t| super::resolve_type_expr_standalone(t, types, symtab));
            let mangled = mangle::mangle_name(&flat_name, &params, types);

            symtab.declare_function(
                flat_name,
                FunctionSignature {
                    mangled_name: mangled,
                    params,
                    ret,
                    error_type,
                    ctie_hint: flattened.ctie_hint,
                },
            );
            out.push(flattened);
        }
    }

    out
}

fn type_expr_name(texpr: &ast::TypeExpr) -> String {
    match texpr {
        ast::TypeExpr::Name(name) => name.clone(),
        ast::TypeExpr::Pointer(inner) => format!("p_{}", type_expr_name(inner)),
        ast::TypeExpr::Array(inner, n) => format!("a_{}_{}", type_expr_name(inner), n),
        ast::TypeExpr::Resolved(_) => "resolved".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceSpan;

    #[test]
    fn impl_methods_flatten_to_receiver_prefixed_names() {
        let method = ast::FunctionDecl {
            name: "area".into(),
            params: vec![],
            ret: None,
            error_type: None,
            body: Some(ast::Block { stmts: vec![] }),
            ctie_hint: false,
            span: SourceSpan::SYNTHETIC,
        };
        let module = ast::Module {
            impls: vec![ast::ImplDecl {
                interface: Some("Shape".into()),
                for_type: ast::TypeExpr::Name("Circle".into()),
                methods: vec![method],
                span: SourceSpan::SYNTHETIC,
            }],
            ..Default::default()
        };
        let mut types = TypeInterner::new();
        let mut symtab = SymbolTable::new();
        let mut diagnostics = Diagnostics::default();
        let out = expand(&module, &mut types, &mut symtab, &mut diagnostics);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Circle_area");
        assert!(symtab.resolve_by_arity("Circle_area", 0).is_some());
    }
}
