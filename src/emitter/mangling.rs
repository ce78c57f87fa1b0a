//! Name mangling: Itanium and MSVC schemes built on top of
//! [`InternBuilder`], the same incremental-string tool the template engine
//! uses for its internal instantiation keys.

use crate::interner::{InternBuilder, StringInterner, Symbol};
use crate::types::BaseKind;

fn itanium_builtin_code(kind: BaseKind) -> Option<&'static str> {
    use BaseKind::*;
    Some(match kind {
        Void => "v",
        Bool => "b",
        Char => "c",
        Short => "s",
        Int => "i",
        Long => "l",
        LongLong => "x",
        UChar => "h",
        UShort => "t",
        UInt => "j",
        ULong => "m",
        ULongLong => "y",
        Float => "f",
        Double => "d",
        LongDouble => "e",
        Nullptr => "Dn",
        _ => return None,
    })
}

/// `_Z` + `N<len><name>E` (or bare `<len><name>` if there is no enclosing
/// class) + parameter codes, `v` for an empty parameter list.
pub fn itanium_mangle_function(
    interner: &mut StringInterner,
    name: &str,
    owning_class: Option<&str>,
    param_kinds: &[(BaseKind, u8)],
) -> Symbol {
    let mut b = InternBuilder::new();
    b.push_str("_Z");
    match owning_class {
        Some(class) => {
            b.push('N');
            b.push_str(&class.len().to_string());
            b.push_str(class);
            b.push_str(&name.len().to_string());
            b.push_str(name);
            b.push('E');
        }
        None => {
            b.push_str(&name.len().to_string());
            b.push_str(name);
        }
    }
    if param_kinds.is_empty() {
        b.push('v');
    } else {
        for &(kind, pointer_depth) in param_kinds {
            for _ in 0..pointer_depth {
                b.push('P');
            }
            b.push_str(itanium_builtin_code(kind).unwrap_or("i"));
        }
    }
    b.commit(interner)
}

/// `_ZTI<len><name>` — the `type_info` object for a class.
pub fn itanium_mangle_type_info(interner: &mut StringInterner, class_name: &str) -> Symbol {
    let mut b = InternBuilder::new();
    b.push_str("_ZTI");
    b.push_str(&class_name.len().to_string());
    b.push_str(class_name);
    b.commit(interner)
}

/// `_ZTV<len><name>` — the vtable object for a class.
pub fn itanium_mangle_vtable(interner: &mut StringInterner, class_name: &str) -> Symbol {
    let mut b = InternBuilder::new();
    b.push_str("_ZTV");
    b.push_str(&class_name.len().to_string());
    b.push_str(class_name);
    b.commit(interner)
}

fn msvc_builtin_code(kind: BaseKind) -> Option<&'static str> {
    use BaseKind::*;
    Some(match kind {
        Void => "X",
        Bool => "_N",
        Char => "D",
        Short => "F",
        Int => "H",
        Long => "J",
        LongLong => "_J",
        UChar => "E",
        UShort => "G",
        UInt => "I",
        ULong => "K",
        ULongLong => "_K",
        Float => "M",
        Double => "N",
        LongDouble => "O",
        _ => return None,
    })
}

/// `?<name>@<class>@@YA<ret><params>@Z` free/static-style mangling. A full
/// MSVC mangler also encodes calling convention and cv-qualification on
/// member functions; this core only needs a stable, collision-free name
/// the object writer can key symbols on.
pub fn msvc_mangle_function(
    interner: &mut StringInterner,
    name: &str,
    owning_class: Option<&str>,
    return_kind: Option<BaseKind>,
    param_kinds: &[(BaseKind, u8)],
) -> Symbol {
    let mut b = InternBuilder::new();
    b.push('?');
    b.push_str(name);
    if let Some(class) = owning_class {
        b.push('@');
        b.push_str(class);
    }
    b.push_str("@@YA");
    b.push_str(return_kind.and_then(msvc_builtin_code).unwrap_or("H"));
    if param_kinds.is_empty() {
        b.push_str("XZ");
    } else {
        for &(kind, pointer_depth) in param_kinds {
            for _ in 0..pointer_depth {
                b.push('P');
            }
            b.push_str(msvc_builtin_code(kind).unwrap_or("H"));
        }
        b.push('Z');
    }
    b.commit(interner)
}

/// `??_R0<name>@@8` — the MSVC RTTI type descriptor for a class.
pub fn msvc_mangle_type_descriptor(interner: &mut StringInterner, class_name: &str) -> Symbol {
    let mut b = InternBuilder::new();
    b.push_str("??_R0");
    b.push_str(class_name);
    b.push_str("@@8");
    b.commit(interner)
}

/// `??_7<name>@@6B@` — the MSVC vftable symbol for a class.
pub fn msvc_mangle_vtable(interner: &mut StringInterner, class_name: &str) -> Symbol {
    let mut b = InternBuilder::new();
    b.push_str("??_7");
    b.push_str(class_name);
    b.push_str("@@6B@");
    b.commit(interner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itanium_free_function_with_no_params_uses_v() {
        let mut interner = StringInterner::new();
        let sym = itanium_mangle_function(&mut interner, "foo", None, &[]);
        assert_eq!(interner.view(sym), "_Z3foov");
    }

    #[test]
    fn itanium_member_function_nests_class_and_name_under_n_e() {
        let mut interner = StringInterner::new();
        let sym = itanium_mangle_function(&mut interner, "bar", Some("Widget"), &[(BaseKind::Int, 0)]);
        assert_eq!(interner.view(sym), "_ZN6Widget3barEi");
    }

    #[test]
    fn itanium_pointer_params_prefix_with_p_per_level() {
        let mut interner = StringInterner::new();
        let sym = itanium_mangle_function(&mut interner, "f", None, &[(BaseKind::Char, 2)]);
        assert_eq!(interner.view(sym), "_Z1fPPc");
    }

    #[test]
    fn msvc_function_with_no_params_uses_xz() {
        let mut interner = StringInterner::new();
        let sym = msvc_mangle_function(&mut interner, "foo", None, Some(BaseKind::Void), &[]);
        assert_eq!(interner.view(sym), "?foo@@YAXXZ");
    }

    #[test]
    fn distinct_signatures_yield_distinct_mangled_names() {
        let mut interner = StringInterner::new();
        let a = itanium_mangle_function(&mut interner, "f", None, &[(BaseKind::Int, 0)]);
        let b = itanium_mangle_function(&mut interner, "f", None, &[(BaseKind::Double, 0)]);
        assert_ne!(a, b);
    }
}
