//! Method dispatch: `receiver.method(args)`.
//!
//! The receiver's static kind (plus its schema, for Map/Set/regex values)
//! selects a per-kind table. Each table either returns a tagged value or
//! `None`, the sentinel for "no such method with these argument kinds", which
//! becomes an `unknown-method` compile error here. Implementations emit
//! inline WAT loops over the receiver's memory layout using the runtime
//! primitives; nothing is dispatched at runtime.

pub mod array;
pub mod mapset;
mod math;
pub mod regexp;
pub mod string;
pub mod typed;

use crate::ast::Ast;
use crate::codegen::generate;
use crate::context::Context;
use crate::error::{CResult, CompileError};
use jz_core::{Kind, Schema, TaggedValue};

/// `["method", receiver, "name", arg0, ...]`.
pub fn generate_method_call(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let recv_node = node.child(0)?;
    let name = node
        .child(1)?
        .as_ident()
        .or_else(|| node.child(1).ok()?.as_string())
        .ok_or_else(|| CompileError::malformed(node))?
        .to_string();
    let args = &node.children()[2..];

    // `Math` is a namespace, not a value; it only shadows the intrinsics if
    // the program declared a variable of that name.
    if recv_node.as_ident() == Some("Math") && ctx.resolve("Math").is_none() {
        return math::generate(ctx, &name, args);
    }

    let recv = generate(ctx, recv_node)?;
    let dispatched = match (recv.kind, &recv.schema) {
        (_, Some(Schema::Map)) => mapset::map_method(ctx, &recv, &name, args)?,
        (_, Some(Schema::Set)) => mapset::set_method(ctx, &recv, &name, args)?,
        (_, Some(Schema::Regex(id))) => {
            let id = *id;
            regexp::regex_method(ctx, id, &name, args)?
        }
        (Kind::Array | Kind::RefArray, _) => array::method(ctx, recv_node, &recv, &name, args)?,
        (Kind::String, _) => string::method(ctx, &recv, &name, args)?,
        (Kind::TypedArray, _) => typed::method(ctx, &recv, &name, args)?,
        _ => None,
    };
    dispatched.ok_or_else(|| CompileError::unknown_method(&recv.kind.to_string(), &name))
}

/// Evaluate `v` once into a fresh f64 temp; returns `(set-code, read-expr)`.
pub(crate) fn saved(ctx: &mut Context, hint: &str, v: &TaggedValue) -> (String, String) {
    let tmp = ctx.fresh_local(hint, Kind::F64);
    (
        format!("(local.set ${tmp} {})", v.code),
        format!("(local.get ${tmp})"),
    )
}

/// An interned string literal as a WAT f64 expression.
pub(crate) fn interned_code(ctx: &mut Context, s: &str) -> String {
    ctx.used.memory = true;
    ctx.used.string = true;
    let interned = ctx.strings.intern(s);
    format!("(f64.reinterpret_i64 (i64.const {}))", interned.bits as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn unknown_method_on_an_array_is_a_compile_error() {
        let mut ctx = Context::new();
        let ast = parse(json!(["method", ["array", [null, 1.0]], "frobnicate"]));
        let err = generate(&mut ctx, &ast).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnknownMethod);
    }

    #[test]
    fn math_floor_lowers_to_the_native_instruction() {
        let mut ctx = Context::new();
        let ast = parse(json!(["method", "Math", "floor", [null, 2.5]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert!(tv.code.contains("f64.floor"));
    }

    #[test]
    fn array_map_emits_an_index_loop_with_an_indirect_callback() {
        let mut ctx = Context::new();
        let ast = parse(json!([
            "method",
            ["array", [null, 1.0], [null, 2.0], [null, 3.0]],
            "map",
            ["=>", "x", ["*", "x", [null, 2.0]]]
        ]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::Array);
        assert!(tv.code.contains("rt_call3"));
        assert!(tv.code.contains("rt_alloc_array"));
    }

    #[test]
    fn string_slice_with_negative_start_uses_the_normalising_helper() {
        let mut ctx = Context::new();
        let ast = parse(json!(["method", [null, "hello"], "slice", [null, -3.0]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::String);
        assert!(tv.code.contains("rt_str_slice"));
    }
}
