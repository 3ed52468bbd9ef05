//! TSMC eligibility (spec §4.E.3, §9): "not recursive" is a hard
//! rejection in this backend — the source material's undo-log-based
//! recursive/TSMC scheme is explicitly out of scope (spec §9) — "not
//! reentered from an ISR" and "target region is RAM" are properties of
//! the whole program rather than of one function, so they're folded into
//! whether the target [`Capabilities`] even offers TSMC and whether
//! [`crate::config::Config::enable_smc`] is set, rather than re-checked
//! per function here.

use crate::ir::function::Function;

/// Whether `f` may use parameter-anchor self-modifying code. The simple
/// backend's only per-function disqualifier is recursion (spec §9: "TSMC
/// is incompatible with recursion in the simple backend").
pub fn is_tsmc_eligible(f: &Function) -> bool {
    !f.flags.is_recursive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeData, TypeInterner};

    #[test]
    fn non_recursive_function_is_eligible() {
        let mut interner = TypeInterner::new();
        let void = interner.intern(TypeData::Void);
        let f = Function::new("f", void, None);
        assert!(is_tsmc_eligible(&f));
    }

    #[test]
    fn recursive_function_is_not_eligible() {
        let mut interner = TypeInterner::new();
        let void = interner.intern(TypeData::Void);
        let mut f = Function::new("f", void, None);
        f.flags.is_recursive = true;
        assert!(!is_tsmc_eligible(&f));
    }
}
