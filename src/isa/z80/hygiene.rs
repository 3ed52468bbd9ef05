//! Label hygiene (spec §4.E.7): emitted labels must be legal assembler
//! identifiers, and each function gets its own local-label numbering
//! scheme so two functions' internal branch targets never collide.

use crate::entity::EntityRef;
use crate::ir::entities::Label;
use std::collections::HashMap;

/// Replaces every character illegal in an sjasmplus identifier (`.` `/`
/// `-` and friends, left over from mangled names like `add$u8$u8`... no,
/// mangled names use `$`, which IS legal; this guards against anything
/// a future mangling scheme might introduce) with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect()
}

/// Assigns each MIR label within one function a `.Lnnn`-style local name,
/// scoped to that function so label numbers reset per function.
pub struct LocalLabels {
    names: HashMap<Label, String>,
}

impl LocalLabels {
    pub fn new() -> Self {
        LocalLabels { names: HashMap::new() }
    }

    pub fn name_of(&mut self, label: Label) -> String {
        let next = self.names.len();
        self.names.entry(label).or_insert_with(|| format!(".L{}", next)).clone()
    }
}

impl Default for LocalLabels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_characters_are_replaced() {
        assert_eq!(sanitize("foo.bar-baz/qux"), "foo_bar_baz_qux");
    }

    #[test]
    fn same_label_reuses_its_name() {
        let mut labels = LocalLabels::new();
        let l = Label::new(0);
        assert_eq!(labels.name_of(l), labels.name_of(l));
    }
}
