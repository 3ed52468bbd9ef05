//! E2 (spec §8): a `@ctie`-hinted pure function called with a constant
//! argument is folded to its result at compile time; the now-unreferenced
//! callee is tree-shaken out of the emitted module.

mod support;

use minzc::ast::{BinOp, Expr};
use minzc::config::Config;
use support::*;

fn program() -> minzc::ast::Module {
    let sq = func(
        "sq",
        vec![param("x", "u8")],
        Some("u8"),
        None,
        true,
        block(vec![ret(Expr::Binary(BinOp::Mul, Box::new(ident("x")), Box::new(ident("x")), span()))]),
    );
    let main = func(
        "main",
        vec![],
        Some("u8"),
        None,
        false,
        block(vec![ret(Expr::Call { callee: "sq".to_string(), args: vec![int(6)], span: span() })]),
    );
    module(vec![sq, main])
}

#[test]
fn ctie_folds_constant_call_and_tree_shakes_the_callee() {
    let asm = minzc::compile_module(&program(), &Config::default()).expect("compiles");
    assert!(asm.contains("LD A, 36"), "expected sq(6) folded to 36:\n{asm}");
    // `sq` takes one `u8` parameter, so it mangles to `sq$u8` (spec
    // §4.A.1) — checked directly rather than via a bare "sq:"/"CALL sq"
    // substring, which a mangled label would never match anyway.
    assert!(!asm.contains("sq$u8"), "sq should have been tree-shaken after CTIE folded its only call site:\n{asm}");
}
