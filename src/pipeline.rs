//! Compiler driver (spec §2): glues the six named stages together over
//! one [`ast::Module`], in the order the spec's stage table lists them.
//!
//! Grounded on the teacher's `Compiler::compile_to_target`-style facade:
//! one function downstream crates (a CLI, a REPL, a test) call instead of
//! reaching into `analyzer`/`ir`/`ctie`/`opt`/`isa` themselves.

use std::collections::{HashMap, HashSet};

use crate::analyzer::Analyzer;
use crate::ast;
use crate::config::Config;
use crate::ctie;
use crate::diagnostics::{CompileError, CompileResult, Diagnostics, ErrorKind};
use crate::ir::build_function;
use crate::ir::function::FuncId;
use crate::ir::instructions::Opcode;
use crate::ir::module::{ExternalFunction, Module};
use crate::ir::verifier::verify_function;
use crate::isa::z80::Z80Backend;
use crate::isa::TargetIsa;
use crate::opt;
use crate::span::SourceSpan;
use crate::types::TypeInterner;

/// Runs every stage over `program` and returns the Z80 assembly text
/// (spec §2, §6). Aborts with [`CompileError::Aborted`] at the first
/// stage boundary that recorded any diagnostic, and with
/// [`CompileError::Verifier`] if the MIR invariants in spec §3.3 are
/// ever violated — which always means a bug in an earlier stage, not a
/// problem with the input program.
pub fn compile_module(program: &ast::Module, config: &Config) -> CompileResult<String> {
    log::debug!("stage A: analyzing {} source function(s)", program.functions.len());
    let analyzed = Analyzer::new().analyze(program).map_err(|d| into_aborted(d))?;
    let mut types: TypeInterner = analyzed.types;

    let mut module = Module::new();
    for ext in analyzed.externs {
        module.declare_extern(ExternalFunction {
            name: ext.name,
            params: ext.params,
            ret: ext.ret,
        });
    }

    // Pass 1: declare every function under its final signature so call
    // sites anywhere in the program — including forward references and
    // mutual recursion — resolve by mangled name (spec §4.A.1) regardless
    // of build order.
    let mut ids = Vec::with_capacity(analyzed.functions.len());
    for af in &analyzed.functions {
        let mut stub = crate::ir::function::Function::new(af.mangled_name.clone(), af.ret, af.error_type);
        for (name, ty) in &af.params {
            stub.params.push(crate::ir::function::Parameter { name: name.clone(), ty: *ty });
        }
        ids.push(module.declare_function(stub));
    }

    // Pass 2: lower every body now that every callee is resolvable.
    log::debug!("stage B: building MIR for {} function(s)", ids.len());
    let mut diagnostics = Diagnostics::new();
    for (af, &id) in analyzed.functions.iter().zip(ids.iter()) {
        match build_function(
            &mut module,
            &mut types,
            af.mangled_name.clone(),
            af.params.clone(),
            af.ret,
            af.error_type,
            &af.body,
        ) {
            Ok(mut built) => {
                // `ctie_eligible` already folds in the `@ctie` hint on top
                // of inferred purity (spec §4.A.3/§4.C); `is_pure` is the
                // only flag `ctie::run` consults, so it is the one that
                // carries this forward rather than raw purity alone.
                built.flags.is_pure = af.ctie_eligible;
                *module.function_mut(id) = built;
            }
            Err(e) => diagnostics.error(ErrorKind::Resolution, SourceSpan::SYNTHETIC, e.to_string()),
        }
    }
    if diagnostics.has_errors() {
        return Err(CompileError::Aborted(diagnostics.errors().to_vec()));
    }

    mark_recursive_functions(&mut module);

    for id in module.function_ids() {
        verify_function(module.function(id), Some(&module)).map_err(verifier_failed)?;
    }

    // Stage C (spec §4.C): folds fully-constant calls before stage D's
    // own constant folding ever has to reason through a call boundary.
    if config.enable_ctie {
        log::debug!("stage C: running CTIE (max {} steps per call)", config.max_ctie_steps);
        let folded = ctie::run(&mut module, config.max_ctie_steps);
        log::debug!("stage C: folded {} call site(s)", folded);
    }

    // Stage D (spec §4.D).
    log::debug!("stage D: optimizing MIR");
    opt::run(&mut module, config);

    for id in module.function_ids() {
        verify_function(module.function(id), Some(&module)).map_err(verifier_failed)?;
    }

    // Stage E+F (spec §4.E/§4.F): the only [`TargetIsa`] this crate
    // ships, so there is nothing to select between yet.
    log::debug!("stage E/F: selecting and encoding instructions");
    let backend = Z80Backend::new();
    let asm = backend.emit_module(&module, &types, config)?;
    log::info!("compiled {} function(s) to {} byte(s) of assembly text", module.function_ids().count(), asm.len());
    Ok(asm)
}

fn into_aborted(d: Diagnostics) -> CompileError {
    CompileError::Aborted(d.errors().to_vec())
}

fn verifier_failed(errors: Vec<crate::ir::verifier::VerifierError>) -> CompileError {
    CompileError::Verifier(
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// A function is recursive (spec §3.2's `is-recursive` flag, consumed by
/// [`crate::isa::z80::tsmc::is_tsmc_eligible`]) if it can reach itself
/// through zero or more `Call` edges — direct self-calls and mutual
/// recursion both count. Computed here, once the whole call graph is
/// available, rather than by the analyzer or the builder since neither
/// sees the fully-resolved module at the point it runs.
fn mark_recursive_functions(module: &mut Module) {
    let ids: Vec<FuncId> = module.function_ids().collect();
    let mut callees: HashMap<FuncId, Vec<FuncId>> = HashMap::new();
    for &id in &ids {
        let mut out = Vec::new();
        for inst in &module.function(id).insts {
            if let Opcode::Call { func, .. } = &inst.opcode {
                out.push((*func).into());
            }
        }
        callees.insert(id, out);
    }

    for &id in &ids {
        if reaches_self(id, &callees) {
            module.function_mut(id).flags.is_recursive = true;
        }
    }
}

fn reaches_self(start: FuncId, callees: &HashMap<FuncId, Vec<FuncId>>) -> bool {
    let mut seen: HashSet<FuncId> = HashSet::new();
    let mut stack: Vec<FuncId> = callees.get(&start).cloned().unwrap_or_default();
    while let Some(id) = stack.pop() {
        if id == start {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(next) = callees.get(&id) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Block, Expr, Stmt};
    use crate::span::SourceSpan;

    fn main_returning(value: i64) -> ast::Module {
        ast::Module {
            functions: vec![ast::FunctionDecl {
                name: "main".to_string(),
                params: Vec::new(),
                ret: Some(ast::TypeExpr::Name("u8".to_string())),
                error_type: None,
                body: Some(Block {
                    stmts: vec![Stmt::Return {
                        value: Some(Expr::IntLiteral(value, SourceSpan::SYNTHETIC)),
                        span: SourceSpan::SYNTHETIC,
                    }],
                }),
                ctie_hint: false,
                span: SourceSpan::SYNTHETIC,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn compiles_trivial_program_to_assembly_text() {
        let program = main_returning(7);
        let asm = compile_module(&program, &Config::default()).expect("compiles");
        assert!(asm.contains("main:"));
        assert!(asm.contains("END main"));
    }
}
