//! Symbol table.
//!
//! A stack of lexically nested scopes. Each scope maps an identifier to
//! one or more declaration nodes (function overloads coexist under one
//! key; a non-function redefinition in the same scope is an error).
//! Template-parameter names are recognized via a secondary,
//! current-template-parameters list supplied by the parser.

use std::collections::HashMap;

use crate::interner::Symbol;

/// Opaque reference to a declaration AST node, owned by the caller's AST
/// arena. The symbol table never inspects declaration contents, only
/// stores and returns these handles, so cyclic references between
/// declarations are broken by routing through the symbol table via handles
/// instead of direct pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Namespace,
    Function,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    /// A single non-function declaration; redeclaring under the same name
    /// in the same scope is an error.
    Single(DeclId),
    /// One or more function overloads.
    Overloads(Vec<DeclId>),
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    bindings: HashMap<Symbol, Binding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclareError {
    /// A non-function redefinition of `name` already exists in this scope.
    Redefinition,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    /// Names currently recognized as template parameters, supplied by the
    /// parser while it is inside a template's parameter list or body
    /// (a secondary, current-template-parameters list).
    template_parameters: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = SymbolTable { scopes: Vec::new(), template_parameters: Vec::new() };
        table.scopes.push(Scope { kind: ScopeKind::Global, bindings: HashMap::new() });
        table
    }

    /// Opens a new lexical scope. The caller must pair this with exactly
    /// one [`ScopeGuard`] drop (or manual [`SymbolTable::pop_scope`]) on
    /// every exit path via an RAII scope guard.
    pub fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope { kind, bindings: HashMap::new() });
    }

    pub fn pop_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot pop the global scope");
        self.scopes.pop();
    }

    pub fn current_kind(&self) -> ScopeKind {
        self.scopes.last().unwrap().kind
    }

    /// Declares a non-function symbol in the current scope.
    pub fn declare(&mut self, name: Symbol, decl: DeclId) -> Result<(), DeclareError> {
        let scope = self.scopes.last_mut().unwrap();
        match scope.bindings.get(&name) {
            Some(_) => Err(DeclareError::Redefinition),
            None => {
                scope.bindings.insert(name, Binding::Single(decl));
                Ok(())
            }
        }
    }

    /// Declares a function overload in the current scope. Multiple calls
    /// with the same `name` accumulate into one overload set; declaring a
    /// function where a non-function binding already exists is an error.
    pub fn declare_overload(&mut self, name: Symbol, decl: DeclId) -> Result<(), DeclareError> {
        let scope = self.scopes.last_mut().unwrap();
        match scope.bindings.get_mut(&name) {
            None => {
                scope.bindings.insert(name, Binding::Overloads(vec![decl]));
                Ok(())
            }
            Some(Binding::Overloads(v)) => {
                v.push(decl);
                Ok(())
            }
            Some(Binding::Single(_)) => Err(DeclareError::Redefinition),
        }
    }

    /// Looks up `name`, walking outward through enclosing scopes. Returns
    /// every declaration bound to that name in the innermost scope where
    /// it is found (an overload set, or a single-element vec for a
    /// non-function binding).
    pub fn lookup(&self, name: Symbol) -> Option<&[DeclId]> {
        for scope in self.scopes.iter().rev() {
            match scope.bindings.get(&name) {
                Some(Binding::Single(d)) => return Some(std::slice::from_ref(d)),
                Some(Binding::Overloads(v)) => return Some(v.as_slice()),
                None => continue,
            }
        }
        None
    }

    pub fn is_template_parameter(&self, name: Symbol) -> bool {
        self.template_parameters.contains(&name)
    }

    pub fn push_template_parameters(&mut self, names: &[Symbol]) {
        self.template_parameters.extend_from_slice(names);
    }

    pub fn pop_template_parameters(&mut self, count: usize) {
        let new_len = self.template_parameters.len().saturating_sub(count);
        self.template_parameters.truncate(new_len);
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that closes the scope it opened when dropped, on every exit
/// path including early returns via `?`.
pub struct ScopeGuard<'a> {
    table: &'a mut SymbolTable,
}

impl<'a> ScopeGuard<'a> {
    pub fn open(table: &'a mut SymbolTable, kind: ScopeKind) -> Self {
        table.push_scope(kind);
        ScopeGuard { table }
    }

    pub fn table(&mut self) -> &mut SymbolTable {
        self.table
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.table.pop_scope();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_outward_through_enclosing_scopes() {
        let mut table = SymbolTable::new();
        let x = Symbol::dummy();
        table.declare(x, DeclId(0)).unwrap();
        {
            let mut guard = ScopeGuard::open(&mut table, ScopeKind::Block);
            assert_eq!(guard.table().lookup(x), Some(&[DeclId(0)][..]));
        }
        assert_eq!(table.depth(), 1);
    }

    #[test]
    fn function_overloads_coexist_under_one_key() {
        let mut table = SymbolTable::new();
        let f = Symbol::dummy();
        table.declare_overload(f, DeclId(0)).unwrap();
        table.declare_overload(f, DeclId(1)).unwrap();
        assert_eq!(table.lookup(f), Some(&[DeclId(0), DeclId(1)][..]));
    }

    #[test]
    fn non_function_redefinition_in_same_scope_is_an_error() {
        let mut table = SymbolTable::new();
        let x = Symbol::dummy();
        table.declare(x, DeclId(0)).unwrap();
        assert_eq!(table.declare(x, DeclId(1)), Err(DeclareError::Redefinition));
    }

    #[test]
    fn scope_guard_closes_scope_on_early_return_path() {
        fn helper(table: &mut SymbolTable) -> Result<(), ()> {
            let _guard = ScopeGuard::open(table, ScopeKind::Function);
            Err(())
        }
        let mut table = SymbolTable::new();
        let _ = helper(&mut table);
        assert_eq!(table.depth(), 1);
    }

    #[test]
    fn template_parameter_recognition_is_scoped_to_push_pop() {
        let mut table = SymbolTable::new();
        let t = Symbol::dummy();
        table.push_template_parameters(&[t]);
        assert!(table.is_template_parameter(t));
        table.pop_template_parameters(1);
        assert!(!table.is_template_parameter(t));
    }
}
