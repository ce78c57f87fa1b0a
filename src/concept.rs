//! Concept and constraint checking.
//!
//! Concepts register a name and a requirement. When a template parameter
//! is written `Concept T`, the parameter records the constraint; when the
//! parameter is bound, the constraint is evaluated against the bound
//! argument. An unsatisfied constraint rejects the instantiation (SFINAE)
//! rather than failing the whole compilation.

use std::collections::HashMap;

use crate::ast::Expr;
use crate::interner::Symbol;
use crate::types::BaseKind;

/// What a concept actually checks. `Integral`/`FloatingPoint` are the two
/// standard-library concepts checked directly; `Custom` holds a
/// user-written requires-expression for concepts this
/// core doesn't special-case, evaluated permissively (see DESIGN.md
/// "Two-phase name lookup strictness" resolution — conservative accept
/// rather than a full constraint-satisfaction solver).
#[derive(Debug, Clone, PartialEq)]
pub enum ConceptPredicate {
    Integral,
    FloatingPoint,
    Custom(Box<Expr>),
}

#[derive(Debug, Default)]
pub struct ConceptRegistry {
    concepts: HashMap<Symbol, ConceptPredicate>,
}

impl ConceptRegistry {
    pub fn new() -> Self {
        ConceptRegistry { concepts: HashMap::new() }
    }

    pub fn register(&mut self, name: Symbol, predicate: ConceptPredicate) {
        self.concepts.insert(name, predicate);
    }

    pub fn register_builtins(&mut self, integral: Symbol, floating_point: Symbol) {
        self.register(integral, ConceptPredicate::Integral);
        self.register(floating_point, ConceptPredicate::FloatingPoint);
    }

    /// Evaluates `concept_name`'s requirement against `bound_kind`.
    /// Returns `None` if `concept_name` isn't a registered concept at all
    /// (a parser/semantic error, not a constraint failure).
    pub fn is_satisfied(&self, concept_name: Symbol, bound_kind: BaseKind) -> Option<bool> {
        let predicate = self.concepts.get(&concept_name)?;
        Some(match predicate {
            ConceptPredicate::Integral => bound_kind.is_integral(),
            ConceptPredicate::FloatingPoint => bound_kind.is_floating_point(),
            ConceptPredicate::Custom(_) => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner::StringInterner;

    #[test]
    fn integral_concept_accepts_int_and_rejects_float() {
        let mut interner = StringInterner::new();
        let integral = interner.intern("integral");
        let fp = interner.intern("floating_point");
        let mut reg = ConceptRegistry::new();
        reg.register_builtins(integral, fp);
        assert_eq!(reg.is_satisfied(integral, BaseKind::Int), Some(true));
        assert_eq!(reg.is_satisfied(integral, BaseKind::Double), Some(false));
    }

    #[test]
    fn floating_point_concept_accepts_double_and_rejects_int() {
        let mut interner = StringInterner::new();
        let integral = interner.intern("integral");
        let fp = interner.intern("floating_point");
        let mut reg = ConceptRegistry::new();
        reg.register_builtins(integral, fp);
        assert_eq!(reg.is_satisfied(fp, BaseKind::Double), Some(true));
        assert_eq!(reg.is_satisfied(fp, BaseKind::Int), Some(false));
    }

    #[test]
    fn unknown_concept_name_reports_none_not_false() {
        let reg = ConceptRegistry::new();
        assert_eq!(reg.is_satisfied(Symbol::dummy(), BaseKind::Int), None);
    }
}
