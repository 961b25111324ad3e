//! Tagged-value coercions: `to_f64`, `to_i32`, `truthy`, `reconcile`.
//!
//! These never touch the context beyond what the caller already decided to
//! mark used; they are pure text-to-text transforms over a [`TaggedValue`]'s
//! WAT fragment.

use jz_core::{Kind, TaggedValue};

pub fn to_f64(v: &TaggedValue) -> TaggedValue {
    match v.kind {
        Kind::F64 | Kind::Array | Kind::String | Kind::Object | Kind::Closure | Kind::RefArray | Kind::TypedArray => {
            v.clone()
        }
        Kind::Ref => TaggedValue::new(Kind::F64, format!("(drop {}) (f64.const 0)", v.code)),
        Kind::I32 => TaggedValue::new(Kind::F64, format!("(f64.convert_i32_s {})", v.code)),
    }
}

pub fn to_i32(v: &TaggedValue) -> TaggedValue {
    match v.kind {
        Kind::I32 => v.clone(),
        Kind::Ref | Kind::Object | Kind::Closure => {
            TaggedValue::new(Kind::I32, format!("(drop {}) (i32.const 0)", v.code))
        }
        _ => TaggedValue::new(Kind::I32, format!("(i32.trunc_f64_s {})", v.code)),
    }
}

/// Emits an `i32` 0/1. `ref` is a null check against the zero sentinel; `i32`
/// compares to zero; everything else (an `f64`, including NaN-boxed pointers,
/// which are never bit-identical to zero) compares the raw `f64` to zero.
pub fn truthy(v: &TaggedValue) -> TaggedValue {
    match v.kind {
        Kind::Ref => TaggedValue::new(Kind::I32, format!("(f64.ne {} (f64.const 0))", v.code)),
        Kind::I32 => TaggedValue::new(Kind::I32, format!("(i32.ne {} (i32.const 0))", v.code)),
        _ => TaggedValue::new(Kind::I32, format!("(f64.ne {} (f64.const 0))", v.code)),
    }
}

/// Widen a pair of operands to a common kind: both `i32` stay `i32`,
/// otherwise both become `f64`.
pub fn reconcile(a: &TaggedValue, b: &TaggedValue) -> (TaggedValue, TaggedValue) {
    if a.kind == Kind::I32 && b.kind == Kind::I32 {
        (a.clone(), b.clone())
    } else {
        (to_f64(a), to_f64(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_f64_is_identity_for_pointer_kinds() {
        let v = TaggedValue::new(Kind::String, "(local.get $s)");
        assert_eq!(to_f64(&v).code, v.code);
    }

    #[test]
    fn to_i32_truncates_f64() {
        let v = TaggedValue::new(Kind::F64, "(f64.const 3)");
        assert!(to_i32(&v).code.contains("i32.trunc_f64_s"));
    }

    #[test]
    fn reconcile_keeps_both_i32_when_both_are_i32() {
        let a = TaggedValue::new(Kind::I32, "(i32.const 1)");
        let b = TaggedValue::new(Kind::I32, "(i32.const 2)");
        let (ra, rb) = reconcile(&a, &b);
        assert_eq!(ra.kind, Kind::I32);
        assert_eq!(rb.kind, Kind::I32);
    }

    #[test]
    fn reconcile_widens_mixed_kinds_to_f64() {
        let a = TaggedValue::new(Kind::I32, "(i32.const 1)");
        let b = TaggedValue::new(Kind::F64, "(f64.const 2)");
        let (ra, rb) = reconcile(&a, &b);
        assert_eq!(ra.kind, Kind::F64);
        assert_eq!(rb.kind, Kind::F64);
    }

    #[test]
    fn truthy_on_i32_compares_to_zero() {
        let v = TaggedValue::new(Kind::I32, "(local.get $x)");
        assert_eq!(truthy(&v).code, "(i32.ne (local.get $x) (i32.const 0))");
    }
}
