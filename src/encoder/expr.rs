//! Constant expressions over the symbol table (spec §4.F): `label+10`,
//! `SIZE*2`, `end-start`, and character literals all reduce to an `i64`
//! once every symbol they reference has an address.

use super::{EncodeError, SymbolTable};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(i64),
    Symbol(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    pub fn char_lit(c: char) -> Self {
        Expr::Const(c as i64)
    }

    pub fn add(self, rhs: Expr) -> Self {
        Expr::Add(Box::new(self), Box::new(rhs))
    }

    pub fn sub(self, rhs: Expr) -> Self {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }

    pub fn eval(&self, symbols: &SymbolTable) -> Result<i64, EncodeError> {
        Ok(match self {
            Expr::Const(n) => *n,
            Expr::Symbol(name) => *symbols
                .get(name)
                .ok_or_else(|| EncodeError::UndefinedSymbol(name.clone()))?,
            Expr::Add(a, b) => a.eval(symbols)?.wrapping_add(b.eval(symbols)?),
            Expr::Sub(a, b) => a.eval(symbols)?.wrapping_sub(b.eval(symbols)?),
            Expr::Mul(a, b) => a.eval(symbols)?.wrapping_mul(b.eval(symbols)?),
            Expr::Div(a, b) => {
                let divisor = b.eval(symbols)?;
                if divisor == 0 {
                    return Err(EncodeError::Decode(format!("division by zero in `{}`", self)));
                }
                a.eval(symbols)? / divisor
            }
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Const(n) => write!(f, "{}", n),
            Expr::Symbol(s) => write!(f, "{}", s),
            Expr::Add(a, b) => write!(f, "{}+{}", a, b),
            Expr::Sub(a, b) => write!(f, "{}-{}", a, b),
            Expr::Mul(a, b) => write!(f, "{}*{}", a, b),
            Expr::Div(a, b) => write!(f, "{}/{}", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_plus_constant_resolves() {
        let mut symbols = SymbolTable::new();
        symbols.insert("label".to_string(), 0x8010);
        let e = Expr::sym("label").add(Expr::Const(10));
        assert_eq!(e.eval(&symbols).unwrap(), 0x801A);
    }

    #[test]
    fn undefined_symbol_is_an_error() {
        let symbols = SymbolTable::new();
        assert!(matches!(Expr::sym("missing").eval(&symbols), Err(EncodeError::UndefinedSymbol(_))));
    }
}
