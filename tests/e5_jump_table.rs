//! E5 (spec §8, §4.A.6): a `case` over four-or-more dense consecutive
//! `u8` literals lowers to an indexed jump table instead of a linear
//! compare chain.

mod support;

use minzc::ast::{CaseArm, Pattern, Stmt};
use minzc::config::Config;
use support::*;

// `main` must stay nullary: any parameter would make it mangle away
// from the bare "main" name the backend's entry point/tree-shaking BFS
// look up by (spec §4.A.1), so the scrutinee here is a local `let`
// instead of a parameter.

fn arm(v: i64, result: i64) -> CaseArm {
    CaseArm { pattern: Pattern::IntLiteral(v), guard: None, body: block(vec![Stmt::Expr(int(result))]), span: span() }
}

fn program() -> minzc::ast::Module {
    let main = func(
        "main",
        vec![],
        Some("u8"),
        None,
        false,
        block(vec![
            Stmt::Let { name: "x".to_string(), ty: Some(ty("u8")), init: Some(int(2)), span: span() },
            Stmt::Case {
                scrutinee: ident("x"),
                arms: vec![
                    arm(0, 10),
                    arm(1, 11),
                    arm(2, 12),
                    arm(3, 13),
                    CaseArm { pattern: Pattern::Wildcard, guard: None, body: block(vec![Stmt::Expr(int(99))]), span: span() },
                ],
                span: span(),
            },
            ret(int(0)),
        ]),
    );
    module(vec![main])
}

#[test]
fn dense_case_lowers_to_indexed_jump_table() {
    let asm = minzc::compile_module(&program(), &Config::default()).expect("compiles");
    assert!(asm.contains("CP A, 4"), "expected a bounds check against the 4-arm count:\n{asm}");
    assert!(asm.contains("JP NC,"), "expected an out-of-range guard:\n{asm}");
    assert!(asm.contains("JP (HL)"), "expected the indirect table jump:\n{asm}");
    assert!(asm.contains(".syn0_case_table:"), "expected the synthesized jump table label:\n{asm}");
}
