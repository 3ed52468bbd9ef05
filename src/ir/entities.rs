//! MIR entity references (spec §3.2).
//!
//! Instructions reference registers, labels, and module-level items by
//! opaque index rather than by Rust reference, following
//! `cranelift-codegen`'s `ir::entities` pattern: a newtype wrapping a
//! `u32`, one type per kind of reference, so mixing up a `Register` and a
//! `Label` is a type error rather than a runtime bug.

use crate::entity::entity_impl;

/// A virtual register: dense per-function index, single static definition
/// (spec §3.2: "every register has exactly one static definition (SSA)").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u32);
entity_impl!(Register, "v");

/// A label, the target of `Jump*`/`Call` within one function (spec §3.3:
/// "Every `Jump*` targets a `Label` in the same function").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);
entity_impl!(Label, "L");

/// A reference to a function defined in the module, or a declared
/// external (spec §3.3: "Every `Call` names a function in the module or a
/// declared external").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");

/// A reference to a deduplicated string literal (spec §3.2: "string
/// literals (deduplicated)").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringRef(u32);
entity_impl!(StringRef, "str");

/// A reference to a module-level global.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalRef(u32);
entity_impl!(GlobalRef, "g");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn display_matches_textual_prefix() {
        assert_eq!(Register::new(3).to_string(), "v3");
        assert_eq!(Label::new(1).to_string(), "L1");
        assert_eq!(FuncRef::new(0).to_string(), "fn0");
    }
}
