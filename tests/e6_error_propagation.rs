//! E6 (spec §8, §4.A.7/§4.E.5): calling a fallible function from another
//! fallible function propagates failure through the Z80 carry flag —
//! `CALL` is immediately followed by `RET C` — and a fallible function's
//! own return path clears/tests `A` before its final `RET`.

mod support;

use minzc::ast::{BinOp, Expr, Stmt};
use minzc::config::Config;
use support::*;

fn program() -> minzc::ast::Module {
    let read = func(
        "read",
        vec![param("port", "u8")],
        Some("u8"),
        Some("IoError"),
        false,
        block(vec![ret(ident("port"))]),
    );
    let main = func(
        "main",
        vec![],
        Some("u8"),
        Some("IoError"),
        false,
        block(vec![
            Stmt::Let {
                name: "v".to_string(),
                ty: None,
                init: Some(Expr::Try(Box::new(Expr::Call { callee: "read".to_string(), args: vec![int(0xFE)], span: span() }), span())),
                span: span(),
            },
            ret(Expr::Binary(BinOp::Add, Box::new(ident("v")), Box::new(int(1)), span())),
        ]),
    );
    module(vec![read, main])
}

#[test]
fn carry_flag_propagates_through_a_fallible_call() {
    let asm = minzc::compile_module(&program(), &Config::default()).expect("compiles");
    let call_idx = asm.find("CALL read").expect("main should call read");
    let after_call = &asm[call_idx..];
    let window = &after_call[..60.min(after_call.len())];
    assert!(window.contains("RET C"), "RET C should immediately follow the fallible call:\n{window}");
    assert!(asm.contains("OR A, A"), "main's own return path should test A before RET:\n{asm}");
}
