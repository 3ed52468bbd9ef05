//! E1 (spec §8): two `add` overloads distinguished by parameter width;
//! a call with `u8`-inferred literal arguments resolves to the `u8`
//! overload, and the unreached `u16` overload is tree-shaken out.

mod support;

use minzc::ast::Expr;
use minzc::config::Config;
use support::*;

fn program() -> minzc::ast::Module {
    let add_u8 = func(
        "add",
        vec![param("a", "u8"), param("b", "u8")],
        Some("u8"),
        None,
        false,
        block(vec![ret(Expr::Binary(minzc::ast::BinOp::Add, Box::new(ident("a")), Box::new(ident("b")), span()))]),
    );
    let add_u16 = func(
        "add",
        vec![param("a", "u16"), param("b", "u16")],
        Some("u16"),
        None,
        false,
        block(vec![ret(Expr::Binary(minzc::ast::BinOp::Add, Box::new(ident("a")), Box::new(ident("b")), span()))]),
    );
    let main = func(
        "main",
        vec![],
        Some("u8"),
        None,
        false,
        block(vec![ret(Expr::Call { callee: "add".to_string(), args: vec![int(1), int(2)], span: span() })]),
    );
    module(vec![add_u8, add_u16, main])
}

#[test]
fn u8_overload_is_selected_and_u16_overload_is_tree_shaken() {
    let asm = minzc::compile_module(&program(), &Config::default()).expect("compiles");
    assert!(asm.contains("add$u8$u8:"), "missing u8 overload label:\n{asm}");
    assert!(asm.contains("CALL add$u8$u8"), "main does not call the u8 overload:\n{asm}");
    assert!(!asm.contains("add$u16$u16"), "unreached u16 overload was not tree-shaken:\n{asm}");
}
