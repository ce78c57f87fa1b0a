//! Namespace registry. Namespace handles are issued here and compose into
//! fully qualified names on demand.

use crate::interner::{StringInterner, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceHandle(u32);

#[derive(Debug)]
struct NamespaceEntry {
    name: Symbol,
    parent: Option<NamespaceHandle>,
}

#[derive(Debug)]
pub struct NamespaceRegistry {
    entries: Vec<NamespaceEntry>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        NamespaceRegistry { entries: Vec::new() }
    }

    pub fn global(&self) -> Option<NamespaceHandle> {
        None
    }

    pub fn declare(&mut self, name: Symbol, parent: Option<NamespaceHandle>) -> NamespaceHandle {
        let handle = NamespaceHandle(self.entries.len() as u32);
        self.entries.push(NamespaceEntry { name, parent });
        handle
    }

    /// Composes `a::b::c` from innermost to outermost, then reverses.
    pub fn qualified_name(&self, handle: NamespaceHandle, interner: &StringInterner) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(handle);
        while let Some(h) = cur {
            let entry = &self.entries[h.0 as usize];
            parts.push(interner.view(entry.name));
            cur = entry.parent;
        }
        parts.reverse();
        parts.join("::")
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_composes_outer_to_inner() {
        let mut interner = StringInterner::new();
        let mut reg = NamespaceRegistry::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        let ns_a = reg.declare(a, None);
        let ns_b = reg.declare(b, Some(ns_a));
        assert_eq!(reg.qualified_name(ns_b, &interner), "a::b");
    }
}
