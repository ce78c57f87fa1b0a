//! Type descriptors, struct/enum layout, and template-instantiation
//! records.
//!
//! These are plain data; the table that owns and pins them is
//! [`crate::type_registry::TypeRegistry`].

use crate::interner::Symbol;
use bitflags::bitflags;
use smallvec::SmallVec;

/// Dense index into the type registry's descriptor vector. Stable for the
/// lifetime of the owning [`crate::type_registry::TypeRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIndex(pub u32);

bitflags! {
    /// CV-qualifiers for a single pointer/reference level or the pointee
    /// itself. Stored per pointer-depth level in [`TypeDescriptor::cv_per_level`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CvQualifiers: u8 {
        const CONST    = 0b001;
        const VOLATILE = 0b010;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefQualifier {
    None,
    LValue,
    RValue,
}

/// Base kind of a type, before pointer/reference/array composition is
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseKind {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    LongLong,
    UChar,
    UShort,
    UInt,
    ULong,
    ULongLong,
    Float,
    Double,
    LongDouble,
    Struct,
    Enum,
    UserDefined,
    FunctionPointer,
    MemberFunctionPointer,
    MemberObjectPointer,
    Nullptr,
    Auto,
}

impl BaseKind {
    /// `size_bits`/`align_bits` for the built-in scalar kinds, per the
    /// System V / Windows x64 common ABI (both agree on these widths).
    /// Struct/Enum/UserDefined sizes come from their layout instead.
    pub fn scalar_size_bits(self) -> Option<u32> {
        use BaseKind::*;
        Some(match self {
            Void => 0,
            Bool | Char | UChar => 8,
            Short | UShort => 16,
            Int | UInt | Float => 32,
            Long | ULong | LongLong | ULongLong | Double => 64,
            LongDouble => 128,
            FunctionPointer | MemberFunctionPointer | MemberObjectPointer | Nullptr => 64,
            Struct | Enum | UserDefined | Auto => return None,
        })
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BaseKind::UChar | BaseKind::UShort | BaseKind::UInt | BaseKind::ULong | BaseKind::ULongLong
        )
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, BaseKind::Float | BaseKind::Double | BaseKind::LongDouble)
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            BaseKind::Bool
                | BaseKind::Char
                | BaseKind::Short
                | BaseKind::Int
                | BaseKind::Long
                | BaseKind::LongLong
                | BaseKind::UChar
                | BaseKind::UShort
                | BaseKind::UInt
                | BaseKind::ULong
                | BaseKind::ULongLong
                | BaseKind::Enum
        )
    }
}

/// One member of a struct/class layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: Symbol,
    pub kind: BaseKind,
    pub type_index: TypeIndex,
    pub size_bits: u32,
    pub align_bits: u32,
    pub offset_bits: u32,
    pub access: Access,
    pub pointer_depth: u8,
    pub bitfield_width: Option<u32>,
    pub is_reference: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Public,
    Protected,
    Private,
}

/// A base class entry. `deferred` is set when the base's name is a
/// still-unsubstituted template parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseClassInfo {
    pub name: Symbol,
    pub type_index: Option<TypeIndex>,
    pub access: Access,
    pub is_virtual: bool,
    pub deferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMemberInfo {
    pub name: Symbol,
    pub type_index: TypeIndex,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFunctionInfo {
    pub name: Symbol,
    pub mangled_name: Option<Symbol>,
    pub is_const: bool,
    pub is_volatile: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub is_final: bool,
    /// Slot in the vtable, if virtual.
    pub vtable_slot: Option<u32>,
}

/// Finalized struct layout. Once `finalized` is set, size/align/offsets
/// are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructLayout {
    pub members: Vec<MemberInfo>,
    pub bases: Vec<BaseClassInfo>,
    pub statics: Vec<StaticMemberInfo>,
    pub methods: Vec<MemberFunctionInfo>,
    pub vtable: Vec<Symbol>,
    pub is_union: bool,
    pub pack: Option<u32>,
    pub size_bits: u32,
    pub align_bits: u32,
    pub finalized: bool,
}

impl StructLayout {
    pub fn has_unresolved_deferred_bases(&self) -> bool {
        self.bases.iter().any(|b| b.deferred)
    }

    /// Computes sequential member offsets with alignment padding, honoring
    /// `#pragma pack` if set, or offset-zero-for-every-member if this is a
    /// union. Bases are laid out before members, in declaration order.
    ///
    /// Fails (returns `false`, leaving the layout unfinalized) if any base
    /// is still `deferred` — finalization must be retried after the base
    /// becomes concrete.
    pub fn finalize(&mut self, base_sizes_bits: &[(u32, u32)]) -> bool {
        if self.has_unresolved_deferred_bases() {
            return false;
        }
        if self.is_union {
            let mut size = 0u32;
            let mut align = 8u32;
            for m in &mut self.members {
                m.offset_bits = 0;
                size = size.max(m.size_bits);
                align = align.max(m.align_bits);
            }
            self.size_bits = round_up(size, align);
            self.align_bits = align;
            self.finalized = true;
            return true;
        }

        let mut cursor = 0u32;
        let mut max_align = 8u32;
        for &(base_size, base_align) in base_sizes_bits {
            let align = self.pack.map_or(base_align, |p| base_align.min(p * 8));
            cursor = round_up(cursor, align);
            cursor += base_size;
            max_align = max_align.max(align);
        }
        for m in &mut self.members {
            let align = self.pack.map_or(m.align_bits, |p| m.align_bits.min(p * 8));
            if m.bitfield_width.is_none() {
                cursor = round_up(cursor, align);
            }
            m.offset_bits = cursor;
            cursor += m.bitfield_width.unwrap_or(m.size_bits);
            max_align = max_align.max(align);
        }
        self.size_bits = round_up(cursor, max_align);
        self.align_bits = max_align;
        self.finalized = true;
        true
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumLayout {
    pub underlying: BaseKind,
    pub enumerators: Vec<(Symbol, i64)>,
    pub is_scoped: bool,
}

/// Tag distinguishing a type-argument from a non-type-argument in a
/// template-argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateArgument {
    Type {
        kind: BaseKind,
        type_index: Option<TypeIndex>,
        pointer_depth: u8,
        reference: RefQualifierHashable,
        cv: CvQualifiers,
        is_pack: bool,
    },
    NonType {
        value: i64,
        value_type: BaseKind,
    },
    /// A placeholder for a name not yet resolvable.
    Dependent(Symbol),
}

/// [`RefQualifier`] doesn't implement `Hash` by hand above but template
/// argument tuples must hash by value, so the
/// wrapper derives it directly rather than re-deriving on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefQualifierHashable {
    None,
    LValue,
    RValue,
}

impl From<RefQualifier> for RefQualifierHashable {
    fn from(r: RefQualifier) -> Self {
        match r {
            RefQualifier::None => RefQualifierHashable::None,
            RefQualifier::LValue => RefQualifierHashable::LValue,
            RefQualifier::RValue => RefQualifierHashable::RValue,
        }
    }
}

pub type TemplateArgumentList = SmallVec<[TemplateArgument; 4]>;

/// Record stored on a type descriptor that is itself a template
/// instantiation: the base template's name plus the captured argument
/// vector, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateInstantiationRecord {
    pub base_template: Symbol,
    pub arguments: TemplateArgumentList,
}

/// The full type descriptor owned by the type registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: Symbol,
    pub kind: BaseKind,
    pub size_bits: u32,
    pub align_bits: u32,
    /// One [`CvQualifiers`] entry per pointer level, innermost (pointee)
    /// first.
    pub cv_per_level: Vec<CvQualifiers>,
    pub pointer_depth: u8,
    pub reference: RefQualifier,
    pub array_dims: Vec<u32>,
    pub struct_layout: Option<StructLayout>,
    pub enum_layout: Option<EnumLayout>,
    pub instantiation: Option<TemplateInstantiationRecord>,
}

impl TypeDescriptor {
    pub fn new_placeholder(name: Symbol, kind: BaseKind) -> Self {
        TypeDescriptor {
            name,
            kind,
            size_bits: kind.scalar_size_bits().unwrap_or(0),
            align_bits: kind.scalar_size_bits().unwrap_or(8).min(64),
            cv_per_level: Vec::new(),
            pointer_depth: 0,
            reference: RefQualifier::None,
            array_dims: Vec::new(),
            struct_layout: None,
            enum_layout: None,
            instantiation: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self.kind {
            BaseKind::Struct => self.struct_layout.as_ref().is_some_and(|l| l.finalized),
            BaseKind::Enum => self.enum_layout.is_some(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: Symbol, size_bits: u32, align_bits: u32) -> MemberInfo {
        MemberInfo {
            name,
            kind: BaseKind::Int,
            type_index: TypeIndex(0),
            size_bits,
            align_bits,
            offset_bits: 0,
            access: Access::Public,
            pointer_depth: 0,
            bitfield_width: None,
            is_reference: false,
        }
    }

    #[test]
    fn finalize_pads_members_to_alignment() {
        let mut layout = StructLayout {
            members: vec![member(Symbol::dummy(), 8, 8), member(Symbol::dummy(), 32, 32)],
            ..Default::default()
        };
        assert!(layout.finalize(&[]));
        // char then int: offset 0 (char), pad to 4, offset 4 (int) -> size 8
        assert_eq!(layout.members[0].offset_bits, 0);
        assert_eq!(layout.members[1].offset_bits, 32);
        assert_eq!(layout.size_bits, 64);
        assert_eq!(layout.size_bits % layout.align_bits, 0);
    }

    #[test]
    fn finalize_fails_while_a_base_is_deferred() {
        let mut layout = StructLayout {
            bases: vec![BaseClassInfo {
                name: Symbol::dummy(),
                type_index: None,
                access: Access::Public,
                is_virtual: false,
                deferred: true,
            }],
            ..Default::default()
        };
        assert!(!layout.finalize(&[]));
        assert!(!layout.finalized);
    }

    #[test]
    fn union_members_all_start_at_offset_zero() {
        let mut layout = StructLayout {
            members: vec![member(Symbol::dummy(), 8, 8), member(Symbol::dummy(), 32, 32)],
            is_union: true,
            ..Default::default()
        };
        assert!(layout.finalize(&[]));
        assert!(layout.members.iter().all(|m| m.offset_bits == 0));
        assert_eq!(layout.size_bits, 32);
    }

    #[test]
    fn equal_argument_tuples_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let args_a: TemplateArgumentList = smallvec::smallvec![TemplateArgument::NonType {
            value: 7,
            value_type: BaseKind::Int,
        }];
        let args_b = args_a.clone();

        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        args_a.as_slice().hash(&mut ha);
        args_b.as_slice().hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
        assert_eq!(args_a, args_b);
    }
}
