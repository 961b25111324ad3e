//! Per-node code generation.
//!
//! [`generate`] dispatches on the AST tag and returns a [`TaggedValue`]:
//! a WAT fragment plus the static kind the caller needs to pick follow-on
//! instructions. Every submodule here is a pure function of `(Context, Ast)`;
//! the context is mutated for its bookkeeping (locals, used-feature flags,
//! interning) but the generated text is always returned, never buffered
//! globally, so nested generation composes by plain function composition.

pub mod coerce;
mod collections;
mod control;
mod declare;
mod funcs;
mod operators;

pub use funcs::compile_top_level;

use crate::ast::Ast;
use crate::context::Context;
use crate::error::{CompileError, ErrorCode};
use crate::methods;
use jz_core::{Kind, TaggedValue};
use serde_json::Value;

pub fn generate(ctx: &mut Context, node: &Ast) -> crate::error::CResult<TaggedValue> {
    match node {
        Ast::Literal(v) => generate_literal(ctx, v),
        Ast::Ident(name) => generate_ident(ctx, name),
        Ast::Node(tag, children) => generate_node(ctx, tag, children, node),
    }
}

fn generate_literal(ctx: &mut Context, v: &Value) -> crate::error::CResult<TaggedValue> {
    match v {
        Value::Null => Ok(TaggedValue::null()),
        Value::Bool(b) => Ok(TaggedValue::new(Kind::I32, format!("(i32.const {})", *b as i32))),
        Value::Number(n) => {
            let f = n.as_f64().ok_or_else(|| CompileError::type_error("non-finite JSON number literal"))?;
            Ok(TaggedValue::new(Kind::F64, format!("(f64.const {})", jz_core::numfmt::fmt_num(f))))
        }
        Value::String(s) => {
            ctx.used.memory = true;
            ctx.used.string = true;
            let interned = ctx.strings.intern(s);
            Ok(TaggedValue::new(Kind::String, format!("(f64.reinterpret_i64 (i64.const {}))", interned.bits as i64)))
        }
        other => Err(CompileError::malformed(other)),
    }
}

fn generate_ident(ctx: &mut Context, name: &str) -> crate::error::CResult<TaggedValue> {
    use crate::context::Resolved;
    if let Some(resolved) = ctx.resolve(name) {
        return Ok(match resolved {
            Resolved::Local(slot) => TaggedValue {
                kind: slot.kind,
                code: format!("(local.get ${})", slot.mangled),
                schema: slot.schema,
            },
            Resolved::OwnEnv(field, kind) => {
                let idx = ctx.hoisted_field_index(&field).unwrap_or(0);
                TaggedValue::new(kind, format!("(f64.load offset={} (local.get $_env))", idx * 8))
            }
            Resolved::ReceivedEnv(field, kind) => {
                let idx = ctx.received_field_index(&field).unwrap_or(0);
                TaggedValue::new(kind, format!("(f64.load offset={} (local.get $_penv))", idx * 8))
            }
        });
    }
    if let Some(g) = ctx.globals.get(name) {
        return Ok(TaggedValue::new(g.kind, format!("(global.get ${name})")));
    }
    if ctx.functions.contains_key(name) {
        return Ok(TaggedValue::new(Kind::Closure, funcs::func_value_code(ctx, name)));
    }
    if let Some(constant) = crate::context::reserved_constant(name) {
        return Ok(TaggedValue::new(Kind::F64, constant));
    }
    Err(CompileError::unknown_id(name))
}

/// Statement sequencing: every child's code runs in order, the value of the
/// last one is the value of the whole sequence.
fn generate_sequence(ctx: &mut Context, children: &[Ast]) -> crate::error::CResult<TaggedValue> {
    let mut code = String::new();
    let mut last = TaggedValue::null();
    for (i, c) in children.iter().enumerate() {
        let v = generate(ctx, c)?;
        if i + 1 == children.len() {
            code.push_str(&v.code);
            last = TaggedValue {
                kind: v.kind,
                code: String::new(),
                schema: v.schema,
            };
        } else {
            code.push_str(&format!("(drop {}) ", v.code));
        }
    }
    if code.is_empty() {
        return Ok(TaggedValue::null());
    }
    last.code = code;
    Ok(last)
}

/// `x op= v` desugars to `x = x op v`. An index or member target is
/// re-evaluated on the read side, which is observable only for a receiver
/// expression with side effects.
fn generate_compound_assignment(ctx: &mut Context, tag: &str, node: &Ast) -> crate::error::CResult<TaggedValue> {
    let target = node.child(0)?;
    let value = node.child(1)?;
    let op = &tag[..tag.len() - 1];
    let desugared = Ast::Node(
        "=".to_string(),
        vec![
            target.clone(),
            Ast::Node(op.to_string(), vec![target.clone(), value.clone()]),
        ],
    );
    generate(ctx, &desugared)
}

/// Prefix `++x`/`--x`: the value is the updated one.
fn generate_inc_dec(ctx: &mut Context, tag: &str, node: &Ast) -> crate::error::CResult<TaggedValue> {
    let target = node.child(0)?;
    let op = if tag == "++" { "+" } else { "-" };
    let one = Ast::Literal(serde_json::json!(1.0));
    let desugared = Ast::Node(
        "=".to_string(),
        vec![
            target.clone(),
            Ast::Node(op.to_string(), vec![target.clone(), one]),
        ],
    );
    generate(ctx, &desugared)
}

fn generate_node(ctx: &mut Context, tag: &str, children: &[Ast], node: &Ast) -> crate::error::CResult<TaggedValue> {
    match tag {
        ";" => generate_sequence(ctx, children),
        "{}" => {
            ctx.push_scope();
            let v = generate_sequence(ctx, children);
            ctx.pop_scope();
            v
        }
        "void" => {
            let v = generate(ctx, node.child(0)?)?;
            Ok(TaggedValue::new(Kind::F64, format!("(drop {}) (f64.const 0)", v.code)))
        }
        "let" | "const" | "var" => declare::generate_declaration(ctx, tag, children),
        "=" => declare::generate_assignment(ctx, node),
        "+=" | "-=" | "*=" | "/=" | "%=" | "**=" | "&=" | "|=" | "^=" | "<<=" | ">>=" | ">>>=" => {
            generate_compound_assignment(ctx, tag, node)
        }
        "++" | "--" => generate_inc_dec(ctx, tag, node),
        "if" | "for" | "for-of" | "for-in" | "while" | "switch" | "break" | "continue" | "return" => {
            control::generate(ctx, tag, node)
        }
        "=>" | "function" => funcs::generate_function_literal(ctx, tag, node),
        "call" => funcs::generate_call(ctx, node),
        "array" => collections::generate_array(ctx, children),
        "object" => collections::generate_object(ctx, children),
        "new" => collections::generate_new(ctx, node),
        "." | "?." => collections::generate_member(ctx, tag, node),
        "[]" => collections::generate_index(ctx, node),
        "method" => methods::generate_method_call(ctx, node),
        "regex" => crate::regex::generate_literal(ctx, node),
        "template" => Err(CompileError::type_error(
            "interpolated template literals are not supported; concatenate with `+`",
        )),
        "typeof" => operators::generate_typeof(ctx, node),
        "?:" => control::generate_ternary(ctx, node),
        _ => operators::generate_operator(ctx, tag, children, node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn number_literal_compiles_to_f64_const() {
        let mut ctx = Context::new();
        let ast = parse(json!([null, 42.0]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::F64);
        assert!(tv.code.contains("f64.const 42"));
    }

    #[test]
    fn boolean_literal_compiles_to_i32_const() {
        let mut ctx = Context::new();
        let ast = parse(json!([null, true]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::I32);
        assert!(tv.code.contains("i32.const 1"));
    }

    #[test]
    fn unresolved_identifier_is_a_compile_error() {
        let mut ctx = Context::new();
        let ast = parse(json!("mystery"));
        let err = generate(&mut ctx, &ast).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownId);
    }

    #[test]
    fn block_pushes_and_pops_its_own_scope() {
        let mut ctx = Context::new();
        let ast = parse(json!(["{}", ["let", "x", [null, 1.0]]]));
        generate(&mut ctx, &ast).unwrap();
        assert!(ctx.resolve("x").is_none());
    }

    #[test]
    fn compound_assignment_desugars_to_read_modify_write() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["let", "x", [null, 4.0]]))).unwrap();
        let tv = generate(&mut ctx, &parse(json!(["+=", "x", [null, 2.0]]))).unwrap();
        assert!(tv.code.contains("local.tee $x"));
        assert!(tv.code.contains("f64.add"));
    }

    #[test]
    fn prefix_increment_yields_the_updated_value() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["let", "n", [null, 0.0]]))).unwrap();
        let tv = generate(&mut ctx, &parse(json!(["++", "n"]))).unwrap();
        assert!(tv.code.contains("f64.add"));
        assert!(tv.code.contains("f64.const 1"));
    }

    #[test]
    fn compound_assignment_to_a_const_is_rejected() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["const", "k", [null, 1.0]]))).unwrap();
        let err = generate(&mut ctx, &parse(json!(["-=", "k", [null, 1.0]]))).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConstReassign);
    }
}
