//! Lambda lifting (spec §4.A.4): every `|params| body` becomes its own
//! top-level function, and the `Lambda` expression at its use site is
//! replaced with an `Ident` naming the lifted function. Captures are
//! only legal when every free identifier in the body names a compile-time
//! constant; anything else is rejected here rather than silently
//! captured, since this backend has no closure environment to store it
//! in.

use super::symtab::{FunctionSignature, SymbolTable};
use crate::ast::{self, BinOp, Expr, UnaryOp};
use crate::diagnostics::{Diagnostics, ErrorKind};
use crate::types::{IntWidth, Type, TypeData, TypeInterner};
use std::collections::HashSet;

pub fn lift_all(
    decls: Vec<ast::FunctionDecl>,
    types: &mut TypeInterner,
    symtab: &mut SymbolTable,
    diagnostics: &mut Diagnostics,
) -> Vec<ast::FunctionDecl> {
    let mut lifted = Vec::new();
    let mut out = Vec::with_capacity(decls.len());

    for mut decl in decls {
        let mut counter = 0u32;
        let owner = decl.name.clone();
        if let Some(body) = &mut decl.body {
            lift_block(body, &owner, &mut counter, types, symtab, diagnostics, &mut lifted);
        }
        out.push(decl);
    }

    out.extend(lifted);
    out
}

fn lift_block(
    block: &mut ast::Block,
    owner: &str,
    counter: &mut u32,
    types: &mut TypeInterner,
    symtab: &mut SymbolTable,
    diagnostics: &mut Diagnostics,
    lifted: &mut Vec<ast::FunctionDecl>,
) {
    for stmt in &mut block.stmts {
        lift_stmt(stmt, owner, counter, types, symtab, diagnostics, lifted);
    }
}

fn lift_stmt(
    stmt: &mut ast::Stmt,
    owner: &str,
    counter: &mut u32,
    types: &mut TypeInterner,
    symtab: &mut SymbolTable,
    diagnostics: &mut Diagnostics,
    lifted: &mut Vec<ast::FunctionDecl>,
) {
    use ast::Stmt::*;
    match stmt {
        Let { init: Some(e), .. } => lift_expr(e, owner, counter, types, symtab, diagnostics, lifted),
        Let { init: None, .. } => {}
        Assign { target, value, .. } => {
            lift_expr(target, owner, counter, types, symtab, diagnostics, lifted);
            lift_expr(value, owner, counter, types, symtab, diagnostics, lifted);
        }
        Expr(e) => lift_expr(e, owner, counter, types, symtab, diagnostics, lifted),
        Return { value: Some(e), .. } => lift_expr(e, owner, counter, types, symtab, diagnostics, lifted),
        Return { value: None, .. } => {}
        If { cond, then_block, else_block, .. } => {
            lift_expr(cond, owner, counter, types, symtab, diagnostics, lifted);
            lift_block(then_block, owner, counter, types, symtab, diagnostics, lifted);
            if let Some(b) = else_block {
                lift_block(b, owner, counter, types, symtab, diagnostics, lifted);
            }
        }
        While { cond, body, .. } => {
            lift_expr(cond, owner, counter, types, symtab, diagnostics, lifted);
            lift_block(body, owner, counter, types, symtab, diagnostics, lifted);
        }
        Case { scrutinee, arms, .. } => {
            lift_expr(scrutinee, owner, counter, types, symtab, diagnostics, lifted);
            for arm in arms {
                if let Some(g) = &mut arm.guard {
                    lift_expr(g, owner, counter, types, symtab, diagnostics, lifted);
                }
                lift_block(&mut arm.body, owner, counter, types, symtab, diagnostics, lifted);
            }
        }
    }
}

fn lift_expr(
    expr: &mut Expr,
    owner: &str,
    counter: &mut u32,
    types: &mut TypeInterner,
    symtab: &mut SymbolTable,
    diagnostics: &mut Diagnostics,
    lifted: &mut Vec<ast::FunctionDecl>,
) {
    match expr {
        Expr::Unary(_, inner, _) => lift_expr(inner, owner, counter, types, symtab, diagnostics, lifted),
        Expr::Binary(_, lhs, rhs, _) => {
            lift_expr(lhs, owner, counter, types, symtab, diagnostics, lifted);
            lift_expr(rhs, owner, counter, types, symtab, diagnostics, lifted);
        }
        Expr::Call { args, .. } => {
            for a in args.iter_mut() {
                lift_expr(a, owner, counter, types, symtab, diagnostics, lifted);
            }
        }
        Expr::FieldAccess(base, _, _) => lift_expr(base, owner, counter, types, symtab, diagnostics, lifted),
        Expr::Index(base, idx, _) => {
            lift_expr(base, owner, counter, types, symtab, diagnostics, lifted);
            lift_expr(idx, owner, counter, types, symtab, diagnostics, lifted);
        }
        Expr::ArrayLiteral(elems, _) => {
            for e in elems.iter_mut() {
                lift_expr(e, owner, counter, types, symtab, diagnostics, lifted);
            }
        }
        Expr::Cast(inner, _, _) => lift_expr(inner, owner, counter, types, symtab, diagnostics, lifted),
        Expr::Try(inner, _) => lift_expr(inner, owner, counter, types, symtab, diagnostics, lifted),
        Expr::TryDefault(inner, default, _) => {
            lift_expr(inner, owner, counter, types, symtab, diagnostics, lifted);
            lift_expr(default, owner, counter, types, symtab, diagnostics, lifted);
        }
        Expr::IterChain { source, ops, .. } => {
            lift_expr(source, owner, counter, types, symtab, diagnostics, lifted);
            for op in ops.iter_mut() {
                lift_iter_op(op, owner, counter, types, symtab, diagnostics, lifted);
            }
        }
        Expr::Lambda { params, body, span } => {
            let param_names: HashSet<&str> = params.iter().map(|p| p.name.as_str()).collect();
            let mut free = HashSet::new();
            collect_free_idents(body, &param_names, &mut free);
            for name in &free {
                diagnostics.error(
                    ErrorKind::Semantic,
                    *span,
                    format!("lambda capture `{}` is not a compile-time constant", name),
                );
            }

            lift_expr(body, owner, counter, types, symtab, diagnostics, lifted);

            *counter += 1;
            let lifted_name = format!("{}__lambda{}", owner, counter);

            let param_types: Vec<_> = params
                .iter()
                .map(|p| super::resolve_type_expr_standalone(&p.ty, types, symtab))
                .collect();
            let named_params: Vec<(&str, Type)> =
                params.iter().map(|p| p.name.as_str()).zip(param_types.iter().copied()).collect();
            let ret_ty = infer_lambda_ret(body, &named_params, types, symtab);

            let lifted_decl = ast::FunctionDecl {
                name: lifted_name.clone(),
                params: params.clone(),
                ret: None,
                error_type: None,
                body: Some(ast::Block {
                    stmts: vec![ast::Stmt::Return {
                        value: Some((**body).clone()),
                        span: *span,
                    }],
                }),
                ctie_hint: false,
                span: *span,
            };

            symtab.declare_function(
                lifted_name.clone(),
                FunctionSignature {
                    mangled_name: lifted_name.clone(),
                    params: param_types,
                    ret: ret_ty,
                    error_type: None,
                    ctie_hint: false,
                },
            );

            lifted.push(lifted_decl);
            *expr = Expr::Ident(lifted_name, *span);
        }
        Expr::IntLiteral(..) | Expr::BoolLiteral(..) | Expr::StringLiteral(..) | Expr::Ident(..) => {}
    }
}

/// Best-effort static type of a lifted lambda's single-expression body,
/// used as the lifted function's declared return type. Comparisons and
/// logical ops resolve to `bool` regardless of their operands' types —
/// the common case this exists for is a `filter` predicate — everything
/// else falls back to identity-like propagation (the same param or
/// literal type the body evaluates to) or `void` when nothing narrower
/// is knowable without full expression type-checking.
fn infer_lambda_ret(body: &Expr, params: &[(&str, Type)], types: &mut TypeInterner, symtab: &SymbolTable) -> Type {
    match body {
        Expr::BoolLiteral(..) => types.intern(TypeData::Bool),
        Expr::Binary(op, lhs, rhs, _) => match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::LogicalAnd | BinOp::LogicalOr => {
                types.intern(TypeData::Bool)
            }
            _ => {
                let _ = rhs;
                infer_lambda_ret(lhs, params, types, symtab)
            }
        },
        Expr::Unary(UnaryOp::Not, _, _) => types.intern(TypeData::Bool),
        Expr::Unary(_, inner, _) => infer_lambda_ret(inner, params, types, symtab),
        Expr::Ident(name, _) => params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
            .unwrap_or_else(|| types.intern(TypeData::Void)),
        Expr::IntLiteral(v, _) => {
            if *v >= 0 && *v <= 255 {
                types.intern(TypeData::Int(IntWidth::U8))
            } else if *v >= 0 && *v <= 65535 {
                types.intern(TypeData::Int(IntWidth::U16))
            } else {
                types.intern(TypeData::Int(IntWidth::U24))
            }
        }
        Expr::Cast(_, texpr, _) => super::resolve_type_expr_standalone(texpr, types, symtab),
        _ => types.intern(TypeData::Void),
    }
}

fn lift_iter_op(
    op: &mut ast::IterOp,
    owner: &str,
    counter: &mut u32,
    types: &mut TypeInterner,
    symtab: &mut SymbolTable,
    diagnostics: &mut Diagnostics,
    lifted: &mut Vec<ast::FunctionDecl>,
) {
    use ast::IterOp::*;
    match op {
        Map(f) | Filter(f) | Take(f) | Skip(f) | Zip(f) | Chain(f) | ForEach(f) => {
            lift_expr(f, owner, counter, types, symtab, diagnostics, lifted)
        }
        Reduce(init, f) => {
            lift_expr(init, owner, counter, types, symtab, diagnostics, lifted);
            lift_expr(f, owner, counter, types, symtab, diagnostics, lifted);
        }
        Enumerate => {}
    }
}

fn collect_free_idents(expr: &Expr, bound: &HashSet<&str>, out: &mut HashSet<String>) {
    match expr {
        Expr::Ident(name, _) => {
            if !bound.contains(name.as_str()) {
                out.insert(name.clone());
            }
        }
        Expr::Unary(_, inner, _) | Expr::Cast(inner, _, _) | Expr::Try(inner, _) => {
            collect_free_idents(inner, bound, out)
        }
        Expr::Binary(_, lhs, rhs, _) => {
            collect_free_idents(lhs, bound, out);
            collect_free_idents(rhs, bound, out);
        }
        Expr::Call { args, .. } => {
            for a in args {
                collect_free_idents(a, bound, out);
            }
        }
        Expr::FieldAccess(base, _, _) => collect_free_idents(base, bound, out),
        Expr::Index(base, idx, _) => {
            collect_free_idents(base, bound, out);
            collect_free_idents(idx, bound, out);
        }
        Expr::ArrayLiteral(elems, _) => {
            for e in elems {
                collect_free_idents(e, bound, out);
            }
        }
        Expr::TryDefault(inner, default, _) => {
            collect_free_idents(inner, bound, out);
            collect_free_idents(default, bound, out);
        }
        Expr::IterChain { source, .. } => collect_free_idents(source, bound, out),
        Expr::Lambda { .. } => {}
        Expr::IntLiteral(..) | Expr::BoolLiteral(..) | Expr::StringLiteral(..) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceSpan;

    fn decl_with_lambda() -> ast::FunctionDecl {
        let lambda = Expr::Lambda {
            params: vec![ast::Param {
                name: "x".into(),
                ty: ast::TypeExpr::Name("u8".into()),
                span: SourceSpan::SYNTHETIC,
            }],
            body: Box::new(Expr::Ident("x".into(), SourceSpan::SYNTHETIC)),
            span: SourceSpan::SYNTHETIC,
        };
        ast::FunctionDecl {
            name: "f".into(),
            params: vec![],
            ret: None,
            error_type: None,
            body: Some(ast::Block {
                stmts: vec![ast::Stmt::Expr(lambda)],
            }),
            ctie_hint: false,
            span: SourceSpan::SYNTHETIC,
        }
    }

    #[test]
    fn lambda_is_replaced_by_ident_naming_the_lifted_function() {
        let mut types = TypeInterner::new();
        let mut symtab = SymbolTable::new();
        let mut diagnostics = Diagnostics::default();
        let out = lift_all(vec![decl_with_lambda()], &mut types, &mut symtab, &mut diagnostics);
        // one lifted function plus the original, now-rewritten one
        assert_eq!(out.len(), 2);
        let rewritten = &out[0];
        match &rewritten.body.as_ref().unwrap().stmts[0] {
            ast::Stmt::Expr(Expr::Ident(name, _)) => assert!(name.starts_with("f__lambda")),
            other => panic!("expected Ident, got {:?}", other),
        }
    }

    #[test]
    fn pure_identity_lambda_has_no_free_captures() {
        let decl = decl_with_lambda();
        if let ast::Stmt::Expr(Expr::Lambda { params, body, .. }) = &decl.body.unwrap().stmts[0] {
            let bound: HashSet<&str> = params.iter().map(|p| p.name.as_str()).collect();
            let mut free = HashSet::new();
            collect_free_idents(body, &bound, &mut free);
            assert!(free.is_empty());
        } else {
            panic!("expected a lambda statement");
        }
    }
}
