//! `case` exhaustiveness (spec §4.A.6).
//!
//! Full coverage analysis over an enum's tag set would need the
//! resolved scrutinee type threaded all the way down from pass 2; as a
//! conservative approximation we require every `case` to end in a
//! `Wildcard` arm unless the compiler can prove the literal/range arms
//! already cover every value a scrutinee of the inferred width could
//! take. The latter is out of scope for now — recorded as an open
//! question in the grounding ledger — so today every `case` must name a
//! wildcard.

use crate::ast::{self, Pattern, Stmt};
use crate::diagnostics::{Diagnostics, ErrorKind};

pub fn check_block(block: &ast::Block, diagnostics: &mut Diagnostics) {
    for stmt in &block.stmts {
        check_stmt(stmt, diagnostics);
    }
}

fn check_stmt(stmt: &Stmt, diagnostics: &mut Diagnostics) {
    match stmt {
        Stmt::If { then_block, else_block, .. } => {
            check_block(then_block, diagnostics);
            if let Some(b) = else_block {
                check_block(b, diagnostics);
            }
        }
        Stmt::While { body, .. } => check_block(body, diagnostics),
        Stmt::Case { arms, span, .. } => {
            for arm in arms {
                check_block(&arm.body, diagnostics);
            }
            let has_wildcard = arms.iter().any(|a| matches!(a.pattern, Pattern::Wildcard) && a.guard.is_none());
            if !has_wildcard {
                diagnostics.error(
                    ErrorKind::Type,
                    *span,
                    "case is not exhaustive: add a wildcard arm to cover the remaining values",
                );
            }
        }
        Stmt::Let { .. } | Stmt::Assign { .. } | Stmt::Expr(_) | Stmt::Return { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::SourceSpan;

    fn case_with_arms(arms: Vec<ast::CaseArm>) -> ast::Block {
        ast::Block {
            stmts: vec![Stmt::Case {
                scrutinee: ast::Expr::IntLiteral(0, SourceSpan::SYNTHETIC),
                arms,
                span: SourceSpan::SYNTHETIC,
            }],
        }
    }

    #[test]
    fn case_without_wildcard_is_rejected() {
        let block = case_with_arms(vec![ast::CaseArm {
            pattern: Pattern::IntLiteral(1),
            guard: None,
            body: ast::Block { stmts: vec![] },
            span: SourceSpan::SYNTHETIC,
        }]);
        let mut diagnostics = Diagnostics::default();
        check_block(&block, &mut diagnostics);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn case_with_trailing_wildcard_is_accepted() {
        let block = case_with_arms(vec![
            ast::CaseArm {
                pattern: Pattern::IntLiteral(1),
                guard: None,
                body: ast::Block { stmts: vec![] },
                span: SourceSpan::SYNTHETIC,
            },
            ast::CaseArm {
                pattern: Pattern::Wildcard,
                guard: None,
                body: ast::Block { stmts: vec![] },
                span: SourceSpan::SYNTHETIC,
            },
        ]);
        let mut diagnostics = Diagnostics::default();
        check_block(&block, &mut diagnostics);
        assert!(!diagnostics.has_errors());
    }
}
