//! E4 (spec §8, §4.A.5): `arr.iter().filter(pred).forEach(cb)` fuses into
//! a single counted loop with no intermediate collection — the
//! predicate is called and gates the rest of that iteration, the
//! callback only runs on elements it keeps.
//!
//! Exercised directly against [`minzc::ir::build_function`] with an
//! already-typed array parameter, bypassing array-literal/global lowering
//! (out of scope here) so this stays focused on the iterator-fusion
//! lowering itself.

use minzc::ir::entities::FuncRef;
use minzc::ir::function::{FuncId, Function, Parameter};
use minzc::ir::instructions::{ArithWidth, Imm, Opcode};
use minzc::ir::module::Module;
use minzc::ir::{build_function, BuilderError};
use minzc::span::SourceSpan;
use minzc::types::{IntWidth, TypeData, TypeInterner};

fn pred_fn(u8_ty: minzc::types::Type, bool_ty: minzc::types::Type) -> Function {
    let mut f = Function::new("pred", bool_ty, None);
    f.params.push(Parameter { name: "x".to_string(), ty: u8_ty });
    let x = f.new_register(u8_ty);
    let two = f.new_register(u8_ty);
    let gt = f.new_register(bool_ty);
    f.push(Opcode::LoadParam { dst: x, index: 0 }, SourceSpan::SYNTHETIC);
    f.push(Opcode::LoadConst { dst: two, imm: Imm(2) }, SourceSpan::SYNTHETIC);
    f.push(Opcode::Gt { dst: gt, lhs: x, rhs: two, width: ArithWidth::U8 }, SourceSpan::SYNTHETIC);
    f.push(Opcode::Return { value: Some(gt) }, SourceSpan::SYNTHETIC);
    f
}

fn cb_fn(u8_ty: minzc::types::Type, void_ty: minzc::types::Type) -> Function {
    let mut f = Function::new("cb", void_ty, None);
    f.params.push(Parameter { name: "x".to_string(), ty: u8_ty });
    f.push(Opcode::LoadParam { dst: f.new_register(u8_ty), index: 0 }, SourceSpan::SYNTHETIC);
    f.push(Opcode::Return { value: None }, SourceSpan::SYNTHETIC);
    f
}

fn iter_chain_body() -> minzc::ast::Block {
    use minzc::ast::{Block, Expr, IterOp, Stmt};
    let span = SourceSpan::SYNTHETIC;
    Block {
        stmts: vec![Stmt::Expr(Expr::IterChain {
            source: Box::new(Expr::Ident("arr".to_string(), span)),
            ops: vec![
                IterOp::Filter(Box::new(Expr::Ident("pred".to_string(), span))),
                IterOp::ForEach(Box::new(Expr::Ident("cb".to_string(), span))),
            ],
            span,
        })],
    }
}

fn as_func_id(func: FuncRef) -> FuncId {
    func.into()
}

#[test]
fn filter_predicate_gates_the_callback() -> Result<(), BuilderError> {
    let mut types = TypeInterner::new();
    let u8_ty = types.intern(TypeData::Int(IntWidth::U8));
    let bool_ty = types.intern(TypeData::Bool);
    let void_ty = types.intern(TypeData::Void);
    let array_ty = types.intern(TypeData::Array(u8_ty, 5));

    let mut module = Module::new();
    let pred_id = module.declare_function(pred_fn(u8_ty, bool_ty));
    let cb_id = module.declare_function(cb_fn(u8_ty, void_ty));

    let body = iter_chain_body();
    let f = build_function(&mut module, &mut types, "iter_user".to_string(), vec![("arr".to_string(), array_ty)], void_ty, None, &body)?;

    let pred_call = f
        .insts
        .iter()
        .enumerate()
        .find_map(|(i, inst)| match &inst.opcode {
            Opcode::Call { func, dst, .. } if as_func_id(*func) == pred_id => Some((i, *dst)),
            _ => None,
        })
        .expect("the filter predicate should be called");
    let (call_idx, keep_reg) = pred_call;
    let keep_reg = keep_reg.expect("a filter predicate's result must be captured, not discarded");

    let gates_on_result = f.insts[call_idx + 1..].iter().any(|inst| matches!(&inst.opcode, Opcode::JumpIfFalse { cond, .. } if *cond == keep_reg));
    assert!(gates_on_result, "predicate result should drive a JumpIfFalse skipping the rest of the iteration");

    let cb_called = f.insts.iter().any(|inst| matches!(&inst.opcode, Opcode::Call { func, dst, .. } if as_func_id(*func) == cb_id && dst.is_none()));
    assert!(cb_called, "forEach callback should still be called for elements that pass the filter");

    let loads_array_element = f.insts.iter().any(|inst| matches!(&inst.opcode, Opcode::LoadIndex { .. }));
    assert!(loads_array_element, "the loop should index into the array parameter directly, with no intermediate collection");

    Ok(())
}
