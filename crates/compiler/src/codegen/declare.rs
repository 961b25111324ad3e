//! Declarations (`let`/`const`/`var`), assignment, and destructuring.

use super::coerce::to_f64;
use super::generate;
use crate::ast::Ast;
use crate::context::{Context, Resolved};
use crate::error::{CompileError, CResult};
use jz_core::{Kind, TaggedValue};

/// `["let"|"const"|"var", "name", initialiser]` or, for destructuring,
/// `["let"|"const"|"var", pattern, initialiser]` where `pattern` is an
/// `"array-pattern"` or `"object-pattern"` node.
pub fn generate_declaration(ctx: &mut Context, tag: &str, children: &[Ast]) -> CResult<TaggedValue> {
    let target = children.first().ok_or_else(|| CompileError::arity(tag, 2, children.len()))?;
    let init_node = children.get(1);
    let is_const = tag == "const";

    match target {
        Ast::Ident(name) => {
            let value = match init_node {
                Some(n) => to_f64_unless_pointer(ctx, n)?,
                None => TaggedValue::null(),
            };
            if ctx.is_hoisted(name) {
                let stored = to_f64(&value);
                let idx = ctx.hoisted_field_index(name).unwrap_or(0);
                return Ok(TaggedValue::new(
                    stored.kind,
                    format!("(f64.store offset={} (local.get $_env) {}) (f64.load offset={} (local.get $_env))", idx * 8, stored.code, idx * 8),
                ));
            }
            let schema = value.schema.clone();
            let mangled = ctx.declare_var(name, value.kind, schema.clone(), is_const);
            Ok(TaggedValue {
                kind: value.kind,
                code: format!("(local.tee ${mangled} {})", value.code),
                schema,
            })
        }
        Ast::Node(pat_tag, elements) if pat_tag == "array-pattern" => {
            let init = init_node.ok_or_else(|| CompileError::type_error("destructuring declaration requires an initialiser"))?;
            destructure_array(ctx, elements, init, is_const)
        }
        Ast::Node(pat_tag, elements) if pat_tag == "object-pattern" => {
            let init = init_node.ok_or_else(|| CompileError::type_error("destructuring declaration requires an initialiser"))?;
            destructure_object(ctx, elements, init, is_const)
        }
        other => Err(CompileError::malformed(other)),
    }
}

fn to_f64_unless_pointer(ctx: &mut Context, n: &Ast) -> CResult<TaggedValue> {
    let v = generate(ctx, n)?;
    Ok(if v.kind.is_pointer_kind() || v.kind == Kind::F64 { v } else { to_f64(&v) })
}

/// `[a, b = default, ...rest]` positional destructuring over an array value.
fn destructure_array(ctx: &mut Context, elements: &[Ast], init: &Ast, is_const: bool) -> CResult<TaggedValue> {
    let source = generate(ctx, init)?;
    ctx.used.memory = true;
    let source_local = ctx.fresh_local("destr_src", Kind::F64);
    let mut code = format!("(local.set ${source_local} {})", source.code);

    for (i, el) in elements.iter().enumerate() {
        match el.tag() {
            Some("rest") => {
                let rest_name = el.child(0)?.as_ident().ok_or_else(|| CompileError::malformed(el))?;
                let rest_mangled = ctx.declare_var(rest_name, Kind::Array, None, is_const);
                code.push_str(&format!(
                    "(local.set ${rest_mangled} (call $rt_array_slice (local.get ${source_local}) (i32.const {i})))"
                ));
            }
            Some("default") => {
                let name = el.child(0)?.as_ident().ok_or_else(|| CompileError::malformed(el))?;
                let default_v = to_f64(&generate(ctx, el.child(1)?)?);
                let mangled = ctx.declare_var(name, Kind::F64, None, is_const);
                code.push_str(&format!(
                    "(local.set ${mangled} (if (result f64) (i32.lt_s (i32.const {i}) (i32.trunc_f64_u (call $rt_ptr_len (local.get ${source_local})))) \
                       (then (call $rt_arr_get (local.get ${source_local}) (i32.const {i}))) (else {})))",
                    default_v.code
                ));
            }
            None => {
                let name = el.as_ident().ok_or_else(|| CompileError::malformed(el))?;
                let mangled = ctx.declare_var(name, Kind::F64, None, is_const);
                code.push_str(&format!("(local.set ${mangled} (call $rt_arr_get (local.get ${source_local}) (i32.const {i})))"));
            }
            Some(other) => return Err(CompileError::type_error(format!("unsupported array destructuring element `{other}`"))),
        }
    }
    code.push_str("(f64.const 0)");
    Ok(TaggedValue::new(Kind::Ref, code))
}

/// `{a, b: renamed, c = default, ...rest}` object destructuring. Requires the
/// initialiser's schema to be known at compile time (it is, per the object
/// model: every object carries a fixed schema id).
fn destructure_object(ctx: &mut Context, elements: &[Ast], init: &Ast, is_const: bool) -> CResult<TaggedValue> {
    use jz_core::Schema;
    let source = generate(ctx, init)?;
    let Some(Schema::ObjectSchema(schema_id)) = source.schema else {
        return Err(CompileError::type_error("object destructuring requires a statically known schema"));
    };
    ctx.used.memory = true;
    let source_local = ctx.fresh_local("destr_obj", Kind::F64);
    let mut code = format!("(local.set ${source_local} {})", source.code);
    let mut matched = Vec::new();

    for el in elements {
        match el.tag() {
            Some("rest") => continue, // handled in a second pass once `matched` is complete
            Some("prop") => {
                let prop_name = el.child(0)?.as_ident().or_else(|| el.child(0).ok()?.as_string()).ok_or_else(|| CompileError::malformed(el))?;
                let binding = el.child(1).ok().and_then(Ast::as_ident).unwrap_or(prop_name);
                let idx = ctx.schemas.index_of(schema_id, prop_name).ok_or_else(|| CompileError::unknown_method("object", prop_name))?;
                matched.push(prop_name.to_string());
                let mangled = ctx.declare_var(binding, Kind::F64, None, is_const);
                code.push_str(&format!("(local.set ${mangled} (call $rt_arr_get (local.get ${source_local}) (i32.const {idx})))"));
            }
            other => return Err(CompileError::type_error(format!("unsupported object destructuring element {other:?}"))),
        }
    }

    if let Some(rest_el) = elements.iter().find(|e| e.tag() == Some("rest")) {
        let rest_name = rest_el.child(0)?.as_ident().ok_or_else(|| CompileError::malformed(rest_el))?;
        let all_props = ctx.schemas.props(schema_id).unwrap_or(&[]).to_vec();
        let remaining: Vec<String> = all_props.iter().filter(|p| !matched.contains(p)).cloned().collect();
        let rest_schema = ctx.schemas.intern(remaining.clone());
        let rest_mangled = ctx.declare_var(rest_name, Kind::Object, Some(jz_core::Schema::ObjectSchema(rest_schema)), is_const);
        let rest_local = ctx.fresh_local("destr_rest", Kind::F64);
        code.push_str(&format!("(local.set ${rest_local} (call $rt_alloc_array (i32.const {})))", remaining.len()));
        for (i, prop) in remaining.iter().enumerate() {
            let src_idx = ctx.schemas.index_of(schema_id, prop).unwrap();
            code.push_str(&format!(
                "(call $rt_arr_set (local.get ${rest_local}) (i32.const {i}) (call $rt_arr_get (local.get ${source_local}) (i32.const {src_idx})))"
            ));
        }
        code.push_str(&format!(
            "(local.set ${rest_mangled} (call $rt_ptr_with_id (local.get ${rest_local}) (i64.const {rest_schema})))"
        ));
    }

    code.push_str("(f64.const 0)");
    Ok(TaggedValue::new(Kind::Ref, code))
}

/// `["=", target, value]`. `target` is an identifier, an index expression
/// `["[]", receiver, index]`, or a member expression `[".", receiver, prop]`.
pub fn generate_assignment(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let target = node.child(0)?;
    let value = generate(ctx, node.child(1)?)?;

    match target {
        Ast::Ident(name) => match ctx.resolve(name) {
            Some(Resolved::Local(slot)) => {
                if ctx.is_const(&slot.mangled) {
                    return Err(CompileError::const_reassign(name));
                }
                // The slot's WASM type was fixed at declaration; coerce the
                // right-hand side to it.
                let stored = if slot.kind == Kind::I32 {
                    super::coerce::to_i32(&value)
                } else {
                    to_f64(&value)
                };
                Ok(TaggedValue::new(slot.kind, format!("(local.tee ${} {})", slot.mangled, stored.code)))
            }
            Some(Resolved::OwnEnv(field, kind)) => {
                let stored = to_f64(&value);
                let idx = ctx.hoisted_field_index(&field).unwrap_or(0);
                Ok(TaggedValue::new(
                    kind,
                    format!(
                        "(f64.store offset={} (local.get $_env) {}) (f64.load offset={} (local.get $_env))",
                        idx * 8,
                        stored.code,
                        idx * 8
                    ),
                ))
            }
            Some(Resolved::ReceivedEnv(field, kind)) => {
                // The received environment is shared with the scope that owns
                // the variable, so a store here is visible to it as well.
                let stored = to_f64(&value);
                let idx = ctx.received_field_index(&field).unwrap_or(0);
                Ok(TaggedValue::new(
                    kind,
                    format!(
                        "(f64.store offset={} (local.get $_penv) {}) (f64.load offset={} (local.get $_penv))",
                        idx * 8,
                        stored.code,
                        idx * 8
                    ),
                ))
            }
            None if ctx.globals.contains_key(name) => {
                Ok(TaggedValue::new(ctx.globals[name].kind, format!("(global.set ${name} {}) (global.get ${name})", value.code)))
            }
            None => Err(CompileError::unknown_id(name)),
        },
        Ast::Node(tag, _) if tag == "[]" => {
            let receiver = generate(ctx, target.child(0)?)?;
            let index = super::coerce::to_i32(&generate(ctx, target.child(1)?)?);
            ctx.used.memory = true;
            let store_helper = if receiver.kind == Kind::TypedArray {
                ctx.used.typed_array = true;
                "rt_typed_set"
            } else {
                "rt_arr_set"
            };
            let tmp = ctx.fresh_local("asg", Kind::F64);
            let stored = to_f64(&value);
            Ok(TaggedValue::new(
                stored.kind,
                format!(
                    "(local.set ${tmp} {}) (call ${store_helper} {} {} (local.get ${tmp})) (local.get ${tmp})",
                    stored.code, receiver.code, index.code
                ),
            ))
        }
        Ast::Node(tag, _) if tag == "." => {
            let receiver = generate(ctx, target.child(0)?)?;
            let prop = target.child(1)?.as_string().or_else(|| target.child(1).ok()?.as_ident()).ok_or_else(|| CompileError::malformed(target))?;
            let jz_core::Schema::ObjectSchema(schema_id) = receiver.schema.clone().ok_or_else(|| CompileError::type_error("cannot assign a property on a non-object"))? else {
                return Err(CompileError::type_error("cannot assign a property on a non-object"));
            };
            let idx = ctx.schemas.index_of(schema_id, prop).ok_or_else(|| CompileError::unknown_method("object", prop))?;
            ctx.used.memory = true;
            let tmp = ctx.fresh_local("asg", Kind::F64);
            let stored = to_f64(&value);
            Ok(TaggedValue::new(
                stored.kind,
                format!(
                    "(local.set ${tmp} {}) (call $rt_arr_set {} (i32.const {idx}) (local.get ${tmp})) (local.get ${tmp})",
                    stored.code, receiver.code
                ),
            ))
        }
        other => Err(CompileError::type_error(format!("invalid assignment target: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn let_declares_a_local_and_tees_its_value() {
        let mut ctx = Context::new();
        let ast = parse(json!(["let", "x", [null, 5.0]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert!(tv.code.contains("local.tee $x"));
        assert!(ctx.resolve("x").is_some());
    }

    #[test]
    fn reassigning_a_const_is_an_error() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["const", "x", [null, 1.0]]))).unwrap();
        let err = generate(&mut ctx, &parse(json!(["=", "x", [null, 2.0]]))).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConstReassign);
    }

    #[test]
    fn assigning_an_undeclared_identifier_is_unknown_id() {
        let mut ctx = Context::new();
        let err = generate(&mut ctx, &parse(json!(["=", "ghost", [null, 1.0]]))).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnknownId);
    }

    #[test]
    fn array_index_assignment_stores_and_yields_the_value() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["let", "a", ["array", [null, 1.0], [null, 2.0]]]))).unwrap();
        let tv = generate(&mut ctx, &parse(json!(["=", ["[]", "a", [null, 0.0]], [null, 9.0]]))).unwrap();
        assert!(tv.code.contains("rt_arr_set"));
    }
}
