//! Type registry.
//!
//! Global table of type descriptors, keyed by interned name. Owns struct
//! layouts, enum layouts, and template-instantiation placeholders. Backed
//! by a dense vector of descriptors indexed by [`TypeIndex`] (so indices
//! stay valid forever — handles returned remain valid for the program's
//! lifetime, realized as stable indices rather than raw pointers, since the
//! registry is owned by a [`crate::CompilationSession`] value instead of a
//! `static`) plus a
//! sparse map from name to index for `find`.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::interner::{StringInterner, Symbol};
use crate::types::{BaseKind, StructLayout, TemplateArgumentList, TemplateInstantiationRecord, TypeDescriptor, TypeIndex};

#[derive(Debug)]
pub struct TypeRegistry {
    descriptors: Vec<TypeDescriptor>,
    by_name: HashMap<Symbol, TypeIndex>,
    /// Maps a hash of (base template, argument tuple) to the instantiation's
    /// type index, so re-instantiating the same key is a cache hit
    /// (an idempotence guarantee: re-instantiating with the same arguments
    /// must return the same type).
    instantiations: HashMap<u64, TypeIndex>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry { descriptors: Vec::new(), by_name: HashMap::new(), instantiations: HashMap::new() }
    }

    fn push(&mut self, desc: TypeDescriptor) -> TypeIndex {
        let name = desc.name;
        let idx = TypeIndex(self.descriptors.len() as u32);
        self.descriptors.push(desc);
        self.by_name.insert(name, idx);
        idx
    }

    pub fn add_struct(&mut self, name: Symbol) -> TypeIndex {
        if let Some(&idx) = self.by_name.get(&name) {
            return idx;
        }
        let mut desc = TypeDescriptor::new_placeholder(name, BaseKind::Struct);
        desc.struct_layout = Some(StructLayout::default());
        self.push(desc)
    }

    pub fn add_enum(&mut self, name: Symbol) -> TypeIndex {
        if let Some(&idx) = self.by_name.get(&name) {
            return idx;
        }
        let desc = TypeDescriptor::new_placeholder(name, BaseKind::Enum);
        self.push(desc)
    }

    pub fn add_scalar(&mut self, name: Symbol, kind: BaseKind) -> TypeIndex {
        if let Some(&idx) = self.by_name.get(&name) {
            return idx;
        }
        self.push(TypeDescriptor::new_placeholder(name, kind))
    }

    pub fn find(&self, name: Symbol) -> Option<TypeIndex> {
        self.by_name.get(&name).copied()
    }

    pub fn get(&self, idx: TypeIndex) -> &TypeDescriptor {
        &self.descriptors[idx.0 as usize]
    }

    pub fn get_mut(&mut self, idx: TypeIndex) -> &mut TypeDescriptor {
        &mut self.descriptors[idx.0 as usize]
    }

    /// Finalizes the struct layout at `idx`. Returns whether finalization
    /// succeeded (it fails, leaving the layout as-is, if a base class is
    /// still deferred).
    pub fn set_struct_layout(&mut self, idx: TypeIndex, layout: StructLayout) -> bool {
        let base_sizes: Vec<(u32, u32)> = layout
            .bases
            .iter()
            .filter_map(|b| b.type_index)
            .map(|ti| {
                let d = self.get(ti);
                (d.size_bits, d.align_bits)
            })
            .collect();
        let mut layout = layout;
        let ok = layout.finalize(&base_sizes);
        let desc = self.get_mut(idx);
        if ok {
            desc.size_bits = layout.size_bits;
            desc.align_bits = layout.align_bits;
        }
        desc.struct_layout = Some(layout);
        ok
    }

    fn hash_instantiation_key(base: Symbol, args: &TemplateArgumentList) -> u64 {
        let mut hasher = DefaultHasher::new();
        base.hash(&mut hasher);
        args.as_slice().hash(&mut hasher);
        hasher.finish()
    }

    /// Records a template instantiation, returning the mangled name of the
    /// (possibly newly created) instantiation descriptor. Two equal
    /// argument tuples for the same base template always produce the same
    /// descriptor (the instantiation cache's idempotence guarantee): the
    /// `interner` is used to synthesize a unique name only on first
    /// instantiation.
    pub fn record_template_instantiation(
        &mut self,
        base: Symbol,
        args: TemplateArgumentList,
        interner: &mut StringInterner,
    ) -> Symbol {
        let key = Self::hash_instantiation_key(base, &args);
        if let Some(&idx) = self.instantiations.get(&key) {
            return self.get(idx).name;
        }
        let mangled = mangle_instantiation_name(interner.view(base), &args, interner);
        let mangled_sym = interner.intern(&mangled);
        let mut desc = TypeDescriptor::new_placeholder(mangled_sym, BaseKind::Struct);
        desc.instantiation = Some(TemplateInstantiationRecord { base_template: base, arguments: args });
        desc.struct_layout = Some(StructLayout::default());
        let idx = self.push(desc);
        self.instantiations.insert(key, idx);
        mangled_sym
    }

    pub fn type_index_for_instantiation(&self, base: Symbol, args: &TemplateArgumentList) -> Option<TypeIndex> {
        let key = Self::hash_instantiation_key(base, args);
        self.instantiations.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a readable, unique instantiation name, e.g. `A<7>` ->
/// `A__I7E` or `Vec<int>` -> `Vec__IiE`. Real Itanium/MSVC mangling for
/// the *function* carrying this type happens in `emitter::mangling`; this
/// is only the internal registry key, not an ABI-facing symbol.
fn mangle_instantiation_name(base: &str, args: &TemplateArgumentList, interner: &StringInterner) -> String {
    use crate::types::TemplateArgument;
    let mut out = String::with_capacity(base.len() + 8);
    out.push_str(base);
    out.push_str("__I");
    for arg in args {
        match arg {
            TemplateArgument::Type { kind, pointer_depth, .. } => {
                out.push_str(&format!("{kind:?}"));
                for _ in 0..*pointer_depth {
                    out.push('P');
                }
            }
            TemplateArgument::NonType { value, .. } => {
                out.push_str(&value.to_string());
            }
            TemplateArgument::Dependent(sym) => {
                out.push_str(interner.view(*sym));
            }
        }
        out.push('_');
    }
    out.push('E');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Access, BaseClassInfo, MemberInfo, TemplateArgument};

    #[test]
    fn add_struct_is_idempotent_by_name() {
        let mut interner = StringInterner::new();
        let name = interner.intern("Foo");
        let mut reg = TypeRegistry::new();
        let a = reg.add_struct(name);
        let b = reg.add_struct(name);
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn equal_instantiation_tuples_produce_equal_mangled_names() {
        let mut interner = StringInterner::new();
        let base = interner.intern("A");
        let mut reg = TypeRegistry::new();
        let args1: TemplateArgumentList = smallvec::smallvec![TemplateArgument::NonType { value: 7, value_type: BaseKind::Int }];
        let args2 = args1.clone();
        let n1 = reg.record_template_instantiation(base, args1, &mut interner);
        let n2 = reg.record_template_instantiation(base, args2, &mut interner);
        assert_eq!(n1, n2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn different_instantiation_tuples_produce_different_descriptors() {
        let mut interner = StringInterner::new();
        let base = interner.intern("A");
        let mut reg = TypeRegistry::new();
        let args1: TemplateArgumentList = smallvec::smallvec![TemplateArgument::NonType { value: 7, value_type: BaseKind::Int }];
        let args2: TemplateArgumentList = smallvec::smallvec![TemplateArgument::NonType { value: 8, value_type: BaseKind::Int }];
        let n1 = reg.record_template_instantiation(base, args1, &mut interner);
        let n2 = reg.record_template_instantiation(base, args2, &mut interner);
        assert_ne!(n1, n2);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn struct_size_is_at_least_sum_of_members_and_aligned() {
        let mut interner = StringInterner::new();
        let name = interner.intern("S");
        let mut reg = TypeRegistry::new();
        let idx = reg.add_struct(name);
        let layout = StructLayout {
            members: vec![
                MemberInfo {
                    name: interner.intern("a"),
                    kind: BaseKind::Int,
                    type_index: TypeIndex(0),
                    size_bits: 32,
                    align_bits: 32,
                    offset_bits: 0,
                    access: Access::Public,
                    pointer_depth: 0,
                    bitfield_width: None,
                    is_reference: false,
                },
                MemberInfo {
                    name: interner.intern("b"),
                    kind: BaseKind::Char,
                    type_index: TypeIndex(0),
                    size_bits: 8,
                    align_bits: 8,
                    offset_bits: 0,
                    access: Access::Public,
                    pointer_depth: 0,
                    bitfield_width: None,
                    is_reference: false,
                },
            ],
            ..Default::default()
        };
        assert!(reg.set_struct_layout(idx, layout));
        let desc = reg.get(idx);
        let sum: u32 = desc.struct_layout.as_ref().unwrap().members.iter().map(|m| m.size_bits).sum();
        assert!(desc.size_bits >= sum);
        assert_eq!(desc.size_bits % desc.align_bits, 0);
    }

    #[test]
    fn set_struct_layout_fails_with_deferred_base_and_leaves_descriptor_incomplete() {
        let mut interner = StringInterner::new();
        let name = interner.intern("D");
        let mut reg = TypeRegistry::new();
        let idx = reg.add_struct(name);
        let layout = StructLayout {
            bases: vec![BaseClassInfo {
                name: interner.intern("T"),
                type_index: None,
                access: Access::Public,
                is_virtual: false,
                deferred: true,
            }],
            ..Default::default()
        };
        assert!(!reg.set_struct_layout(idx, layout));
        assert!(!reg.get(idx).is_complete());
    }
}
