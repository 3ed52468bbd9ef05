//! The typed AST contract handed to us by the parser (spec §6, "Input").
//!
//! Lexing and parsing are out of scope for this crate (spec §1); this
//! module only defines the node shapes the Semantic Analyzer ([`crate::analyzer`])
//! consumes. Identifiers carry only syntactic names — type and symbol
//! resolution is the analyzer's job, not the parser's.

use crate::span::SourceSpan;
use crate::types::Type;

/// A top-level compilation unit: every declaration the analyzer's Pass 1
/// needs to see before walking any function body (spec §4.A: "registers
/// every top-level declaration ... so forward references and mutual
/// recursion work without source ordering").
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<FunctionDecl>,
    pub structs: Vec<StructDecl>,
    pub enums: Vec<EnumDecl>,
    pub interfaces: Vec<InterfaceDecl>,
    pub impls: Vec<ImplDecl>,
    pub constants: Vec<ConstDecl>,
    pub globals: Vec<GlobalDecl>,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    /// `fun name?(...) -> T ? ErrorType` (spec §4.A.7).
    pub error_type: Option<TypeExpr>,
    pub body: Option<Block>,
    /// `@ctie` annotation (spec E2); purity is otherwise inferred.
    pub ctie_hint: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<(String, TypeExpr)>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl {
    pub name: String,
    pub methods: Vec<FunctionDecl>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ImplDecl {
    pub interface: Option<String>,
    pub for_type: TypeExpr,
    pub methods: Vec<FunctionDecl>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub value: Expr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub init: Option<Expr>,
    pub span: SourceSpan,
}

/// A syntactic type reference, as written by the programmer; resolved to
/// an interned [`Type`] by the analyzer. `Resolved` is the escape hatch
/// used once the analyzer has rewritten a subtree (monomorphization,
/// lambda lifting) and wants to attach a concrete type without a round
/// trip through syntax.
#[derive(Debug, Clone)]
pub enum TypeExpr {
    Name(String),
    Pointer(Box<TypeExpr>),
    Array(Box<TypeExpr>, u32),
    Resolved(Type),
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
        span: SourceSpan,
    },
    Assign {
        target: Expr,
        value: Expr,
        span: SourceSpan,
    },
    Expr(Expr),
    Return {
        value: Option<Expr>,
        span: SourceSpan,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        span: SourceSpan,
    },
    While {
        cond: Expr,
        body: Block,
        span: SourceSpan,
    },
    Case {
        scrutinee: Expr,
        arms: Vec<CaseArm>,
        span: SourceSpan,
    },
}

#[derive(Debug, Clone)]
pub struct CaseArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Block,
    pub span: SourceSpan,
}

/// Patterns supported by `case` (spec §4.A.6): integer literal, enum
/// variant, wildcard, inclusive-exclusive range, with an optional guard
/// carried on the [`CaseArm`] rather than the pattern itself.
#[derive(Debug, Clone)]
pub enum Pattern {
    IntLiteral(i64),
    EnumVariant(String, String),
    Wildcard,
    Range(i64, i64),
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLiteral(i64, SourceSpan),
    BoolLiteral(bool, SourceSpan),
    StringLiteral(String, SourceSpan),
    Ident(String, SourceSpan),
    Unary(UnaryOp, Box<Expr>, SourceSpan),
    Binary(BinOp, Box<Expr>, Box<Expr>, SourceSpan),
    Call {
        callee: String,
        args: Vec<Expr>,
        span: SourceSpan,
    },
    FieldAccess(Box<Expr>, String, SourceSpan),
    Index(Box<Expr>, Box<Expr>, SourceSpan),
    ArrayLiteral(Vec<Expr>, SourceSpan),
    Cast(Box<Expr>, TypeExpr, SourceSpan),
    /// `expr?` — fallible-call propagation (spec §4.A.7).
    Try(Box<Expr>, SourceSpan),
    /// `expr ?? default` — fallible-call default (spec §4.A.7).
    TryDefault(Box<Expr>, Box<Expr>, SourceSpan),
    /// `|params| body`; captures are forbidden unless every captured
    /// binding is compile-time constant (spec §4.A.4).
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
        span: SourceSpan,
    },
    /// `source.iter().op(...)....forEach(f)` (spec §4.A.5). The parser is
    /// expected to recognize the method-chain shape syntactically; the
    /// analyzer validates and fuses it.
    IterChain {
        source: Box<Expr>,
        ops: Vec<IterOp>,
        span: SourceSpan,
    },
}

#[derive(Debug, Clone)]
pub enum IterOp {
    Map(Box<Expr>),
    Filter(Box<Expr>),
    Take(Box<Expr>),
    Skip(Box<Expr>),
    Enumerate,
    Zip(Box<Expr>),
    Chain(Box<Expr>),
    ForEach(Box<Expr>),
    Reduce(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    /// `&i`: a reference to a binding (spec §9 open question: may
    /// deoptimize a DJNZ counter loop).
    Ref,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}
