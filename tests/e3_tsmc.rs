//! E3 (spec §8): a non-recursive function compiled with self-modifying
//! parameter anchors gets an `_param_*` anchor per parameter, `main`
//! patches each anchor before calling, and a `PATCH_TABLE` row backs
//! each one.

mod support;

use minzc::ast::{Expr, Stmt};
use minzc::config::Config;
use support::*;

fn program() -> minzc::ast::Module {
    let set_pixel = func(
        "set_pixel",
        vec![param("x", "u8"), param("y", "u8")],
        None,
        None,
        false,
        block(vec![Stmt::Expr(ident("x"))]),
    );
    let main = func(
        "main",
        vec![],
        None,
        None,
        false,
        block(vec![Stmt::Expr(Expr::Call {
            callee: "set_pixel".to_string(),
            args: vec![int(10), int(20)],
            span: span(),
        })]),
    );
    module(vec![set_pixel, main])
}

#[test]
fn tsmc_anchors_are_emitted_and_patched_at_the_call_site() {
    let asm = minzc::compile_module(&program(), &Config::default()).expect("compiles");
    // `set_pixel` takes two `u8` parameters, so it mangles to
    // `set_pixel$u8$u8` (spec §4.A.1), and the TSMC anchor symbol is
    // built from that mangled name (`abi::anchor_symbol`), not the bare
    // source name.
    assert!(asm.contains("set_pixel$u8$u8_param_x.op:"), "missing x anchor:\n{asm}");
    assert!(asm.contains("set_pixel$u8$u8_param_y.op:"), "missing y anchor:\n{asm}");
    assert!(asm.contains("LD A, 0"), "expected an 8-bit anchor placeholder:\n{asm}");
    assert!(
        asm.contains("LD (set_pixel$u8$u8_param_x), A") || asm.contains("LD (set_pixel$u8$u8_param_y), A"),
        "main should patch an anchor slot before the call:\n{asm}"
    );
    assert!(asm.contains("CALL set_pixel$u8$u8"), "main should still call set_pixel:\n{asm}");
    assert!(asm.contains("PATCH_TABLE:"), "missing PATCH_TABLE section:\n{asm}");
}
