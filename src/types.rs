//! The MinZ type lattice (spec §3.1).
//!
//! Types are interned (spec §3.5: "identity by pointer/ID"); this module
//! defines the lattice itself plus the interner. Structs/enums/interfaces
//! are nominal (compared by name), everything else is structural.

use std::collections::HashMap;
use std::fmt;

/// A primitive integer width/signedness pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IntWidth {
    U8,
    U16,
    U24,
    I8,
    I16,
    I24,
}

impl IntWidth {
    pub fn bytes(self) -> u8 {
        match self {
            IntWidth::U8 | IntWidth::I8 => 1,
            IntWidth::U16 | IntWidth::I16 => 2,
            IntWidth::U24 | IntWidth::I24 => 3,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntWidth::I8 | IntWidth::I16 | IntWidth::I24)
    }

    /// Mangled short tag used by overload-name mangling (spec §4.A.1).
    pub fn mangle_tag(self) -> &'static str {
        match self {
            IntWidth::U8 => "u8",
            IntWidth::U16 => "u16",
            IntWidth::U24 => "u24",
            IntWidth::I8 => "i8",
            IntWidth::I16 => "i16",
            IntWidth::I24 => "i24",
        }
    }

    /// The modulus used for wraparound arithmetic folding (spec §4.D.1).
    pub fn modulus(self) -> u32 {
        1u32 << (self.bytes() as u32 * 8)
    }
}

impl fmt::Display for IntWidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.mangle_tag())
    }
}

/// Fixed-point format, `Q` integer-bits `.` fractional-bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FixedWidth {
    F8_8,
    F16_8,
    F8_16,
}

impl FixedWidth {
    pub fn bytes(self) -> u8 {
        match self {
            FixedWidth::F8_8 => 2,
            FixedWidth::F16_8 => 3,
            FixedWidth::F8_16 => 3,
        }
    }

    pub fn mangle_tag(self) -> &'static str {
        match self {
            FixedWidth::F8_8 => "f8_8",
            FixedWidth::F16_8 => "f16_8",
            FixedWidth::F8_16 => "f8_16",
        }
    }
}

/// An interned reference to a [`TypeData`]; cheap to copy and compare,
/// per spec §3.5 ("Types are interned; identity by pointer/ID").
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Type(u32);

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ty{}", self.0)
    }
}

/// The full structural description of a [`Type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeData {
    Int(IntWidth),
    Bool,
    Void,
    Fixed(FixedWidth),
    Pointer(Type),
    Array(Type, u32),
    Struct(StructDef),
    Enum(EnumDef),
    String,
    Interface(String),
    Function(FunctionSig),
}

/// Ordered named fields, packed layout (spec §3.1.f).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

/// A tagged enum; representation is the smallest integer holding all tags
/// (spec §3.1.g).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDef {
    /// The smallest unsigned integer width that can hold every variant tag.
    pub fn tag_width(&self) -> IntWidth {
        let n = self.variants.len() as u32;
        if n <= 256 {
            IntWidth::U8
        } else if n <= 65536 {
            IntWidth::U16
        } else {
            IntWidth::U24
        }
    }
}

/// A function signature; optionally error-returning (spec §3.1.j, §4.A.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub params: Vec<Type>,
    pub ret: Type,
    pub error_type: Option<Type>,
}

/// Interns [`TypeData`] values, handing back cheap [`Type`] handles.
///
/// Structs/enums/interfaces are nominal: two struct types with the same
/// name but different field lists are never unified (that would be a
/// duplicate-definition error caught earlier, in the analyzer). Arrays,
/// pointers and function types are structural and therefore interned by
/// full structural equality.
#[derive(Debug, Default)]
pub struct TypeInterner {
    table: Vec<TypeData>,
    index: HashMap<TypeData, Type>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, data: TypeData) -> Type {
        if let Some(&ty) = self.index.get(&data) {
            return ty;
        }
        let id = self.table.len() as u32;
        let ty = Type(id);
        self.table.push(data.clone());
        self.index.insert(data, ty);
        ty
    }

    pub fn lookup(&self, ty: Type) -> &TypeData {
        &self.table[ty.0 as usize]
    }

    /// Byte size of a type's in-memory representation; `None` for `void`,
    /// functions, and unmonomorphized interfaces (spec §3.1).
    pub fn size_of(&self, ty: Type) -> Option<u32> {
        match self.lookup(ty) {
            TypeData::Int(w) => Some(w.bytes() as u32),
            TypeData::Bool => Some(1),
            TypeData::Void => None,
            TypeData::Fixed(w) => Some(w.bytes() as u32),
            TypeData::Pointer(_) => Some(2),
            TypeData::Array(elem, n) => self.size_of(*elem).map(|e| e * n),
            TypeData::Struct(s) => {
                let mut total = 0u32;
                for (_, fty) in &s.fields {
                    total += self.size_of(*fty)?;
                }
                Some(total)
            }
            TypeData::Enum(e) => Some(e.tag_width().bytes() as u32),
            TypeData::String => None, // length-prefixed, variable size
            TypeData::Interface(_) => None,
            TypeData::Function(_) => Some(2), // a code pointer
        }
    }

    /// Implicit widening is allowed iff the target size is >= source size
    /// and signedness matches (spec §3.1).
    pub fn can_widen(&self, from: Type, to: Type) -> bool {
        if from == to {
            return true;
        }
        match (self.lookup(from), self.lookup(to)) {
            (TypeData::Int(a), TypeData::Int(b)) => {
                a.is_signed() == b.is_signed() && b.bytes() >= a.bytes()
            }
            _ => false,
        }
    }

    /// Mangled type tag used in overload-set name mangling (spec §4.A.1).
    pub fn mangle(&self, ty: Type) -> String {
        match self.lookup(ty) {
            TypeData::Int(w) => w.mangle_tag().to_string(),
            TypeData::Bool => "bool".to_string(),
            TypeData::Void => "void".to_string(),
            TypeData::Fixed(w) => w.mangle_tag().to_string(),
            TypeData::Pointer(inner) => format!("p_{}", self.mangle(*inner)),
            TypeData::Array(inner, n) => format!("a_{}_{}", self.mangle(*inner), n),
            TypeData::Struct(s) => s.name.clone(),
            TypeData::Enum(e) => e.name.clone(),
            TypeData::String => "str".to_string(),
            TypeData::Interface(name) => name.clone(),
            TypeData::Function(_) => "fn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_types_are_deduplicated() {
        let mut i = TypeInterner::new();
        let u8_ty = i.intern(TypeData::Int(IntWidth::U8));
        let p1 = i.intern(TypeData::Pointer(u8_ty));
        let p2 = i.intern(TypeData::Pointer(u8_ty));
        assert_eq!(p1, p2);
    }

    #[test]
    fn nominal_structs_with_same_fields_are_distinct_by_name() {
        let mut i = TypeInterner::new();
        let u8_ty = i.intern(TypeData::Int(IntWidth::U8));
        let a = i.intern(TypeData::Struct(StructDef {
            name: "Point".into(),
            fields: vec![("x".into(), u8_ty)],
        }));
        let b = i.intern(TypeData::Struct(StructDef {
            name: "Scalar".into(),
            fields: vec![("x".into(), u8_ty)],
        }));
        assert_ne!(a, b);
    }

    #[test]
    fn widening_requires_matching_signedness_and_no_narrowing() {
        let mut i = TypeInterner::new();
        let u8_ty = i.intern(TypeData::Int(IntWidth::U8));
        let u16_ty = i.intern(TypeData::Int(IntWidth::U16));
        let i16_ty = i.intern(TypeData::Int(IntWidth::I16));
        assert!(i.can_widen(u8_ty, u16_ty));
        assert!(!i.can_widen(u16_ty, u8_ty));
        assert!(!i.can_widen(u8_ty, i16_ty));
    }

    #[test]
    fn enum_tag_width_is_smallest_that_fits() {
        let small = EnumDef {
            name: "E".into(),
            variants: (0..4).map(|i| format!("v{}", i)).collect(),
        };
        assert_eq!(small.tag_width(), IntWidth::U8);
        let big = EnumDef {
            name: "Big".into(),
            variants: (0..300).map(|i| format!("v{}", i)).collect(),
        };
        assert_eq!(big.tag_width(), IntWidth::U16);
    }

    #[test]
    fn mangle_matches_spec_rules() {
        let mut i = TypeInterner::new();
        let u8_ty = i.intern(TypeData::Int(IntWidth::U8));
        let arr = i.intern(TypeData::Array(u8_ty, 5));
        assert_eq!(i.mangle(u8_ty), "u8");
        assert_eq!(i.mangle(arr), "a_u8_5");
        let ptr = i.intern(TypeData::Pointer(u8_ty));
        assert_eq!(i.mangle(ptr), "p_u8");
    }
}
