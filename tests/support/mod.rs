//! Shared AST-construction helpers for the end-to-end scenario tests
//! (spec §8). Every helper here builds real `ast` nodes so each test
//! drives the same public `minzc::compile_module` entry point a caller
//! would use, rather than poking at any one stage directly.

use minzc::ast::{self, Block, Expr, FunctionDecl, Param, Stmt, TypeExpr};
use minzc::span::SourceSpan;

pub fn span() -> SourceSpan {
    SourceSpan::SYNTHETIC
}

pub fn ty(name: &str) -> TypeExpr {
    TypeExpr::Name(name.to_string())
}

pub fn param(name: &str, ty_name: &str) -> Param {
    Param { name: name.to_string(), ty: ty(ty_name), span: span() }
}

pub fn ident(name: &str) -> Expr {
    Expr::Ident(name.to_string(), span())
}

pub fn int(v: i64) -> Expr {
    Expr::IntLiteral(v, span())
}

pub fn block(stmts: Vec<Stmt>) -> Block {
    Block { stmts }
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return { value: Some(value), span: span() }
}

#[allow(clippy::too_many_arguments)]
pub fn func(
    name: &str,
    params: Vec<Param>,
    ret_ty: Option<&str>,
    error_ty: Option<&str>,
    ctie_hint: bool,
    body: Block,
) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        params,
        ret: ret_ty.map(ty),
        error_type: error_ty.map(ty),
        body: Some(body),
        ctie_hint,
        span: span(),
    }
}

pub fn module(functions: Vec<FunctionDecl>) -> ast::Module {
    ast::Module { functions, ..Default::default() }
}
