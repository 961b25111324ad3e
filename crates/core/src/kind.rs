//! The static `Kind` lattice and the tagged value that flows through code generation.
//!
//! Every AST node generator returns a [`TaggedValue`]: a fragment of WAT source text
//! paired with the static kind the generator used to pick instructions for it. Kinds
//! never change at runtime - they are an artifact of compilation only - but the value
//! they describe (an `f64`) is itself runtime-polymorphic when it is NaN-boxed.

use std::fmt;

/// Static kind of a compiled expression.
///
/// `F64` and `I32` are the two real WASM value types the generator emits; the rest
/// describe what a NaN-boxed `f64` happens to point at, so the generator can pick
/// memory-layout-aware instructions without runtime tag checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A WASM `f64`. May itself be a NaN-boxed pointer at runtime if statically unknown.
    F64,
    /// A WASM `i32`, used for booleans and values known to fit a machine word.
    I32,
    /// The null/undefined sentinel (runtime representation: `f64` zero).
    Ref,
    /// Pointer to a homogeneous, growable array of `f64` (or NaN-boxed) elements.
    Array,
    /// Pointer to a UTF-16 string, possibly short-string-optimised into the pointer itself.
    String,
    /// Pointer to an array of `f64` slots with an associated property-name schema.
    Object,
    /// Pointer to a closure box: `(funcTableIdx, envLen, envOffset)`.
    Closure,
    /// Pointer to an array whose elements carry a per-element `Kind` (mixed-kind arrays).
    RefArray,
    /// Pointer to a typed array with a fixed element type and stride.
    TypedArray,
}

impl Kind {
    /// True for any kind whose runtime representation is itself an `f64`
    /// (including all pointer-bearing kinds, which are NaN-boxed doubles).
    pub fn is_f64_repr(self) -> bool {
        !matches!(self, Kind::I32)
    }

    /// True for kinds that denote a NaN-boxed heap pointer rather than a plain number.
    pub fn is_pointer_kind(self) -> bool {
        matches!(
            self,
            Kind::Array | Kind::String | Kind::Object | Kind::Closure | Kind::RefArray | Kind::TypedArray
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::F64 => "f64",
            Kind::I32 => "i32",
            Kind::Ref => "ref",
            Kind::Array => "array",
            Kind::String => "string",
            Kind::Object => "object",
            Kind::Closure => "closure",
            Kind::RefArray => "refarray",
            Kind::TypedArray => "typedarray",
        };
        f.write_str(name)
    }
}

/// Auxiliary static metadata a [`TaggedValue`] may carry alongside its `Kind`.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Object literal: the schema id assigned by the schema registry.
    ObjectSchema(u32),
    /// Mixed-kind array literal: the per-element static kind, in element order.
    ElementKinds(Vec<Kind>),
    /// Typed array: the element type that determines stride and load/store instruction.
    TypedElement(TypedElementKind),
    /// A `Map` value: method dispatch goes to the hash-table helpers.
    Map,
    /// A `Set` value: same layout as `Map` with the key stored as its own value.
    Set,
    /// A regex literal: the index into the compilation's compiled-pattern list.
    Regex(u32),
    /// An array or object laid out in a data segment. Structure-changing
    /// methods (`push`/`pop`) are rejected on these at compile time.
    StaticData,
}

/// Element type of a `TypedArray`, selecting stride and WASM load/store instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedElementKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl TypedElementKind {
    /// Size in bytes of one element.
    pub fn byte_size(self) -> u32 {
        match self {
            TypedElementKind::I8 | TypedElementKind::U8 => 1,
            TypedElementKind::I16 | TypedElementKind::U16 => 2,
            TypedElementKind::I32 | TypedElementKind::U32 | TypedElementKind::F32 => 4,
            TypedElementKind::F64 => 8,
        }
    }

    /// The 3-bit tag stored in a typed-array pointer's `elemType` field.
    pub fn tag(self) -> u32 {
        match self {
            TypedElementKind::I8 => 0,
            TypedElementKind::U8 => 1,
            TypedElementKind::I16 => 2,
            TypedElementKind::U16 => 3,
            TypedElementKind::I32 => 4,
            TypedElementKind::U32 => 5,
            TypedElementKind::F32 => 6,
            TypedElementKind::F64 => 7,
        }
    }

    /// The WASM load instruction mnemonic used to read one element.
    pub fn load_instr(self) -> &'static str {
        match self {
            TypedElementKind::I8 => "i32.load8_s",
            TypedElementKind::U8 => "i32.load8_u",
            TypedElementKind::I16 => "i32.load16_s",
            TypedElementKind::U16 => "i32.load16_u",
            TypedElementKind::I32 | TypedElementKind::U32 => "i32.load",
            TypedElementKind::F32 => "f32.load",
            TypedElementKind::F64 => "f64.load",
        }
    }

    /// The WASM store instruction mnemonic used to write one element.
    pub fn store_instr(self) -> &'static str {
        match self {
            TypedElementKind::I8 | TypedElementKind::U8 => "i32.store8",
            TypedElementKind::I16 | TypedElementKind::U16 => "i32.store16",
            TypedElementKind::I32 | TypedElementKind::U32 => "i32.store",
            TypedElementKind::F32 => "f32.store",
            TypedElementKind::F64 => "f64.store",
        }
    }
}

/// A generated WAT fragment tagged with the static kind the generator used to produce it.
///
/// Equality is structural: two tagged values are equal iff their kind, code text and
/// schema are all equal. This is only used in tests; during generation tagged values
/// flow forward as plain return values and are never looked up by equality.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedValue {
    pub kind: Kind,
    pub code: String,
    pub schema: Option<Schema>,
}

impl TaggedValue {
    pub fn new(kind: Kind, code: impl Into<String>) -> Self {
        TaggedValue {
            kind,
            code: code.into(),
            schema: None,
        }
    }

    pub fn with_schema(kind: Kind, code: impl Into<String>, schema: Schema) -> Self {
        TaggedValue {
            kind,
            code: code.into(),
            schema: Some(schema),
        }
    }

    /// The sentinel `Ref` value: runtime representation is `f64.const 0`.
    pub fn null() -> Self {
        TaggedValue::new(Kind::Ref, "(f64.const 0)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_repr_covers_all_pointer_kinds() {
        for k in [
            Kind::F64,
            Kind::Ref,
            Kind::Array,
            Kind::String,
            Kind::Object,
            Kind::Closure,
            Kind::RefArray,
            Kind::TypedArray,
        ] {
            assert!(k.is_f64_repr(), "{k} should be f64-represented");
        }
        assert!(!Kind::I32.is_f64_repr());
    }

    #[test]
    fn typed_element_tags_are_distinct() {
        let kinds = [
            TypedElementKind::I8,
            TypedElementKind::U8,
            TypedElementKind::I16,
            TypedElementKind::U16,
            TypedElementKind::I32,
            TypedElementKind::U32,
            TypedElementKind::F32,
            TypedElementKind::F64,
        ];
        let mut tags: Vec<u32> = kinds.iter().map(|k| k.tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), kinds.len());
    }

    #[test]
    fn null_is_ref_kind_zero() {
        let v = TaggedValue::null();
        assert_eq!(v.kind, Kind::Ref);
        assert_eq!(v.code, "(f64.const 0)");
    }
}
