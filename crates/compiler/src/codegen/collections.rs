//! Arrays, objects, member access, and indexing.

use super::coerce::to_i32;
use super::generate;
use crate::ast::Ast;
use crate::context::Context;
use crate::error::{CompileError, CResult};
use jz_core::{Kind, Schema, TaggedValue};

/// `["array", elem0, elem1, ...]`.
pub fn generate_array(ctx: &mut Context, children: &[Ast]) -> CResult<TaggedValue> {
    if !children.is_empty() && children.iter().all(is_constant_number) {
        let values: Vec<f64> = children.iter().map(|c| c.as_number().unwrap()).collect();
        let offset = ctx.alloc_static_array(values);
        ctx.used.memory = true;
        // The pointer is a compile-time constant; the marker schema lets
        // `push`/`pop` reject growing data-segment storage.
        return Ok(TaggedValue::with_schema(
            Kind::Array,
            format!("(call $rt_mkptr (i64.const 0) (i64.const 0) (i64.const {offset}))"),
            Schema::StaticData,
        ));
    }

    ctx.used.memory = true;
    let len = children.len();
    let tmp = ctx.fresh_local("arr", Kind::F64);
    let mut elems = Vec::with_capacity(len);
    let mut elem_kinds = Vec::with_capacity(len);
    for c in children {
        let v = generate(ctx, c)?;
        elem_kinds.push(v.kind);
        elems.push(super::coerce::to_f64(&v));
    }
    let mixed = elem_kinds.windows(2).any(|w| w[0] != w[1]);

    let mut code = String::new();
    code.push_str(&format!("(local.set ${tmp} (call $rt_alloc_array (i32.const {len})))"));
    for (i, v) in elems.iter().enumerate() {
        code.push_str(&format!("(call $rt_arr_set (local.get ${tmp}) (i32.const {i}) {})", v.code));
    }
    code.push_str(&format!("(local.get ${tmp})"));

    if mixed {
        Ok(TaggedValue::with_schema(Kind::RefArray, code, Schema::ElementKinds(elem_kinds)))
    } else {
        Ok(TaggedValue::new(Kind::Array, code))
    }
}

fn is_constant_number(c: &Ast) -> bool {
    matches!(c, Ast::Literal(v) if v.is_number())
}

/// `["object", ["prop", "x", value], ...]`.
pub fn generate_object(ctx: &mut Context, children: &[Ast]) -> CResult<TaggedValue> {
    if children.is_empty() {
        return Ok(TaggedValue::null());
    }
    let mut names = Vec::with_capacity(children.len());
    for c in children {
        let name = c.child(0)?.as_ident().or_else(|| c.child(0).ok()?.as_string()).ok_or_else(|| CompileError::malformed(c))?;
        names.push(name.to_string());
    }

    // Fully constant literal: lay the property values out in a data segment
    // and reference them through a constant pointer carrying the schema id.
    if children.iter().all(|c| c.child(1).map(is_constant_number).unwrap_or(false)) {
        let values: Vec<f64> = children.iter().map(|c| c.child(1).unwrap().as_number().unwrap()).collect();
        let schema_id = ctx.schemas.intern(names);
        let offset = ctx.alloc_static_object(schema_id, values);
        ctx.used.memory = true;
        return Ok(TaggedValue::with_schema(
            Kind::Object,
            format!("(call $rt_mkptr (i64.const 2) (i64.const {schema_id}) (i64.const {offset}))"),
            Schema::ObjectSchema(schema_id),
        ));
    }

    let mut values = Vec::with_capacity(children.len());
    for c in children {
        let v = generate(ctx, c.child(1)?)?;
        values.push(super::coerce::to_f64(&v));
    }
    let schema_id = ctx.schemas.intern(names);

    ctx.used.memory = true;
    let tmp = ctx.fresh_local("obj", Kind::F64);
    let len = values.len();
    let mut code = format!("(local.set ${tmp} (call $rt_alloc_array (i32.const {len})))");
    for (i, v) in values.iter().enumerate() {
        code.push_str(&format!("(call $rt_arr_set (local.get ${tmp}) (i32.const {i}) {})", v.code));
    }
    code.push_str(&format!("(call $rt_ptr_with_id (local.get ${tmp}) (i64.const {schema_id}))"));
    Ok(TaggedValue::with_schema(Kind::Object, code, Schema::ObjectSchema(schema_id)))
}

/// `[".", receiver, "prop"]` or `["?.", receiver, "prop"]`.
pub fn generate_member(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    let receiver = generate(ctx, node.child(0)?)?;
    let prop = node.child(1)?.as_string().or_else(|| node.child(1).ok()?.as_ident()).ok_or_else(|| CompileError::malformed(node))?;

    if tag == "?." {
        ctx.used.memory = true;
        let tmp = ctx.fresh_local("opt", Kind::F64);
        let saved = TaggedValue {
            kind: receiver.kind,
            code: format!("(local.get ${tmp})"),
            schema: receiver.schema.clone(),
        };
        let inner = member_access(ctx, &saved, prop)?;
        return Ok(TaggedValue::new(
            inner.kind,
            format!(
                "(local.set ${tmp} {}) (if (result f64) (f64.ne (local.get ${tmp}) (f64.const 0)) (then {}) (else (f64.const 0)))",
                receiver.code, inner.code
            ),
        ));
    }
    member_access(ctx, &receiver, prop)
}

fn member_access(ctx: &mut Context, receiver: &TaggedValue, prop: &str) -> CResult<TaggedValue> {
    ctx.used.memory = true;
    if prop == "length" {
        return Ok(match receiver.kind {
            Kind::Array | Kind::String | Kind::RefArray => {
                TaggedValue::new(Kind::F64, format!("(call $rt_ptr_len {})", receiver.code))
            }
            Kind::TypedArray => {
                ctx.used.typed_array = true;
                TaggedValue::new(Kind::F64, format!("(f64.convert_i32_u (call $rt_typed_len {}))", receiver.code))
            }
            _ => return Err(CompileError::unknown_method(&receiver.kind.to_string(), "length")),
        });
    }
    match &receiver.schema {
        Some(Schema::ObjectSchema(id)) => {
            let idx = ctx.schemas.index_of(*id, prop).ok_or_else(|| CompileError::unknown_method("object", prop))?;
            Ok(TaggedValue::new(Kind::F64, format!("(call $rt_arr_get {} (i32.const {idx}))", receiver.code)))
        }
        _ => Err(CompileError::unknown_method(&receiver.kind.to_string(), prop)),
    }
}

/// `["[]", receiver, index]` - numeric index, or a schema-resolved property
/// name represented as a string-literal index on a known-shape object.
pub fn generate_index(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let receiver = generate(ctx, node.child(0)?)?;
    let index_node = node.child(1)?;
    ctx.used.memory = true;

    if let Some(Schema::ObjectSchema(id)) = &receiver.schema {
        if let Some(name) = index_node.as_string() {
            let idx = ctx.schemas.index_of(*id, name).ok_or_else(|| CompileError::unknown_method("object", name))?;
            return Ok(TaggedValue::new(Kind::F64, format!("(call $rt_arr_get {} (i32.const {idx}))", receiver.code)));
        }
    }

    let index = to_i32(&generate(ctx, index_node)?);
    match receiver.kind {
        Kind::Array | Kind::RefArray => Ok(TaggedValue::new(Kind::F64, format!("(call $rt_arr_get {} {})", receiver.code, index.code))),
        Kind::String => {
            ctx.used.string = true;
            Ok(TaggedValue::new(Kind::F64, format!("(f64.convert_i32_u (call $rt_str_char_at {} {}))", receiver.code, index.code)))
        }
        Kind::TypedArray => {
            ctx.used.typed_array = true;
            Ok(TaggedValue::new(Kind::F64, format!("(call $rt_typed_get {} {})", receiver.code, index.code)))
        }
        _ => Err(CompileError::type_error(format!("cannot index a `{}`", receiver.kind))),
    }
}

/// `["new", "Map"]`, `["new", "Set"]`, `["new", "Float64Array", length]`, and
/// the other TypedArray constructors. `new RegExp(pattern, flags)` routes to
/// the regex subsystem.
pub fn generate_new(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    use jz_core::TypedElementKind;
    let what = node.child(0)?.as_ident().ok_or_else(|| CompileError::malformed(node))?;
    match what {
        "Map" => {
            ctx.used.memory = true;
            ctx.used.mapset = true;
            Ok(TaggedValue::with_schema(
                Kind::Object,
                "(call $rt_map_alloc (i32.const 64))",
                Schema::Map,
            ))
        }
        "Set" => {
            ctx.used.memory = true;
            ctx.used.mapset = true;
            Ok(TaggedValue::with_schema(
                Kind::Object,
                "(call $rt_map_alloc (i32.const 64))",
                Schema::Set,
            ))
        }
        "RegExp" => crate::regex::generate_literal(ctx, node),
        _ => {
            let elem = match what {
                "Int8Array" => TypedElementKind::I8,
                "Uint8Array" => TypedElementKind::U8,
                "Int16Array" => TypedElementKind::I16,
                "Uint16Array" => TypedElementKind::U16,
                "Int32Array" => TypedElementKind::I32,
                "Uint32Array" => TypedElementKind::U32,
                "Float32Array" => TypedElementKind::F32,
                "Float64Array" => TypedElementKind::F64,
                other => return Err(CompileError::type_error(format!("cannot construct `{other}`"))),
            };
            let len = to_i32(&generate(ctx, node.child(1)?)?);
            ctx.used.memory = true;
            ctx.used.typed_array = true;
            Ok(TaggedValue::with_schema(
                Kind::TypedArray,
                format!(
                    "(call $rt_alloc_typed (i64.const {}) {} (i32.const {}))",
                    elem.tag(),
                    len.code,
                    elem.byte_size()
                ),
                Schema::TypedElement(elem),
            ))
        }
    }
}
