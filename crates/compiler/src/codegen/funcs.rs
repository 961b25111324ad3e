//! Function and arrow literals, calls, and closure lifting.
//!
//! Every compiled function shares one calling convention regardless of
//! whether it captures anything: `(param $_penv i32) (param p0 f64) ...`,
//! where `$_penv` is the raw byte address of the environment struct (zero for
//! a non-capturing function, which simply never reads it). That uniformity is
//! what makes `call_indirect` through the function table work without a
//! family of table types - see `ensure_table_slot`'s trampoline, which
//! unpacks a boxed argument array into positional params for the one case
//! (calling through a first-class value) where the callee isn't known at the
//! call site.
//!
//! Environment sharing: when a literal's captures all live in the enclosing
//! function's own environment struct, the closure receives that struct's
//! address directly - its shape *is* the enclosing function's hoisted shape -
//! so writes on either side of the capture stay visible to the other. Only a
//! capture set that mixes sources falls back to copying values into a fresh
//! environment at the creation site.

use super::coerce::to_f64;
use super::generate;
use crate::ast::Ast;
use crate::context::{ClosureDescriptor, Context, EnvShape, FunctionDef, Resolved};
use crate::error::{CResult, CompileError};
use crate::scope;
use jz_core::{Kind, TaggedValue};
use std::collections::HashSet;

pub fn generate_function_literal(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    let children = node.children();
    if tag == "function" {
        let name = node.child(0)?.as_ident().ok_or_else(|| CompileError::malformed(node))?.to_string();
        let split = children.len().saturating_sub(1);
        if split < 1 {
            return Err(CompileError::arity("function", 2, children.len()));
        }
        let params: Vec<String> = children[1..split].iter().filter_map(Ast::as_ident).map(str::to_string).collect();
        let body = children.last().expect("split >= 1 guarantees a last child");
        compile_function_literal(ctx, &name, &params, body)
    } else {
        let split = children.len().saturating_sub(1);
        let params: Vec<String> = children[..split].iter().filter_map(Ast::as_ident).map(str::to_string).collect();
        let body = children.last().ok_or_else(|| CompileError::arity("=>", 1, children.len()))?;
        let name = format!("_fn{}", ctx.fresh_id());
        compile_function_literal(ctx, &name, &params, body)
    }
}

/// How the closure being created obtains its environment.
enum EnvSource {
    /// No captures: `$_penv` is passed as zero and never read.
    None,
    /// All captures live in the creator's own environment struct: share its
    /// address, so mutation flows both ways. The callee's received shape is
    /// the creator's full hoisted shape.
    ShareOwn(EnvShape),
    /// All captures come from the environment the creator itself received:
    /// pass it straight through.
    PassThrough(EnvShape),
    /// Mixed sources: copy each captured value into a fresh struct.
    Fresh(Vec<String>),
}

/// Compile `name(params) { body }`, returning the boxed closure value for
/// whatever expression this literal appears in.
fn compile_function_literal(ctx: &mut Context, name: &str, params: &[String], body: &Ast) -> CResult<TaggedValue> {
    let outer_defined = ctx.visible_names();
    let scope_info = scope::analyze_scope(body, params, &outer_defined);

    // Resolve every free name now, at the creation site, in the creator's frame.
    let mut captured: Vec<(String, Resolved)> = Vec::new();
    for free_name in &scope_info.free {
        match ctx.resolve(free_name) {
            Some(Resolved::Local(slot)) => {
                // The hoisting pre-pass normally promotes these before any code
                // for the enclosing body is generated; a block-scoped capture
                // can still surface here, so promote it now.
                ctx.promote_to_hoisted(free_name, slot.kind);
                let r = ctx.resolve(free_name).expect("promoted name must resolve");
                captured.push((free_name.clone(), r));
            }
            Some(r) => captured.push((free_name.clone(), r)),
            None if ctx.globals.contains_key(free_name) => {}
            None if ctx.functions.contains_key(free_name) => {}
            None => return Err(CompileError::unknown_id(free_name)),
        }
    }

    let env_source = if captured.is_empty() {
        EnvSource::None
    } else if captured.iter().all(|(_, r)| matches!(r, Resolved::OwnEnv(..))) {
        EnvSource::ShareOwn(ctx.hoisted_shape())
    } else if captured.iter().all(|(_, r)| matches!(r, Resolved::ReceivedEnv(..))) {
        EnvSource::PassThrough(ctx.received_shape())
    } else {
        EnvSource::Fresh(captured.iter().map(|(n, _)| n.clone()).collect())
    };

    let (received_shape, creation_code, env_addr_code) = match &env_source {
        EnvSource::None => (None, String::new(), "(i32.const 0)".to_string()),
        EnvSource::ShareOwn(shape) => (Some(shape.clone()), String::new(), "(local.get $_env)".to_string()),
        EnvSource::PassThrough(shape) => (Some(shape.clone()), String::new(), "(local.get $_penv)".to_string()),
        EnvSource::Fresh(fields) => {
            ctx.used.memory = true;
            let env_local = ctx.fresh_local("newenv", Kind::I32);
            let mut code = format!(
                "(local.set ${env_local} (call $rt_ptr_offset (call $rt_alloc_array (i32.const {}))))",
                fields.len()
            );
            for (i, field_name) in fields.iter().enumerate() {
                let read = match ctx.resolve(field_name).expect("capture was resolved above") {
                    Resolved::Local(slot) => format!("(local.get ${})", slot.mangled),
                    Resolved::OwnEnv(f, _) => {
                        let idx = ctx.hoisted_field_index(&f).unwrap_or(0);
                        format!("(f64.load offset={} (local.get $_env))", idx * 8)
                    }
                    Resolved::ReceivedEnv(f, _) => {
                        let idx = ctx.received_field_index(&f).unwrap_or(0);
                        format!("(f64.load offset={} (local.get $_penv))", idx * 8)
                    }
                };
                code.push_str(&format!("(f64.store offset={} (local.get ${env_local}) {read})", i * 8));
            }
            let shape = EnvShape(fields.iter().map(|f| (f.clone(), Kind::F64)).collect());
            (Some(shape), code, format!("(local.get ${env_local})"))
        }
    };

    let closure = received_shape.as_ref().map(|shape| ClosureDescriptor {
        env_type_id: ctx.new_env_shape(shape.clone()),
    });

    ctx.register_function(
        name,
        FunctionDef {
            params: params.iter().map(|p| (p.clone(), Kind::F64)).collect(),
            return_kind: Kind::F64,
            closure,
            wat: None,
            table_index: None,
            trampoline: None,
        },
    );

    ctx.enter_function();
    ctx.set_current_function_name(name);

    let mut hoist_names: Vec<String> = scope_info.to_hoist.into_iter().collect();
    hoist_names.sort();
    for h in &hoist_names {
        ctx.hoist(h, Kind::F64);
    }

    let mut prologue = String::new();
    if !hoist_names.is_empty() {
        ctx.used.memory = true;
        prologue.push_str(&format!(
            "(local.set $_env (call $rt_ptr_offset (call $rt_alloc_array (i32.const {}))))",
            hoist_names.len()
        ));
    }
    for p in params {
        if hoist_names.iter().any(|h| h == p) {
            let idx = ctx.hoisted_field_index(p).unwrap_or(0);
            prologue.push_str(&format!("(f64.store offset={} (local.get $_env) (local.get ${p}))", idx * 8));
        } else {
            ctx.declare_param(p, Kind::F64);
        }
    }
    if let Some(shape) = &received_shape {
        ctx.set_received_environment(shape);
    }

    let body_v = to_f64(&generate(ctx, body)?);
    let locals = ctx.exit_function();

    let mut header = format!("(func ${name} (param $_penv i32)");
    for p in params {
        header.push_str(&format!(" (param ${p} f64)"));
    }
    header.push_str(" (result f64)");
    if !hoist_names.is_empty() {
        header.push_str(" (local $_env i32)");
    }
    for l in &locals {
        header.push_str(&format!(" (local ${} {})", l.mangled, if l.kind == Kind::I32 { "i32" } else { "f64" }));
    }
    header.push(' ');
    header.push_str(&prologue);
    header.push_str(&body_v.code);
    header.push(')');

    if let Some(def) = ctx.functions.get_mut(name) {
        def.wat = Some(header);
    }

    let table_idx = ensure_table_slot(ctx, name, params.len());
    let value_code = format!(
        "{creation_code}(call $rt_mkptr (i64.const 3) (i64.const {table_idx}) (i64.extend_i32_u {env_addr_code}))"
    );
    Ok(TaggedValue::new(Kind::Closure, value_code))
}

/// Generate a boxed closure value for a named function referenced bare (a
/// `function name(){}` declaration used as a value rather than called
/// directly). A self-reference from within the function's own body reuses the
/// live activation's `$_penv` rather than trying to re-derive a box for a
/// closure that hasn't finished being constructed yet.
pub fn func_value_code(ctx: &mut Context, name: &str) -> String {
    let needs_penv = ctx.functions.get(name).and_then(|d| d.closure.as_ref()).is_some();
    let param_count = ctx.functions.get(name).map(|d| d.params.len()).unwrap_or(0);
    let table_idx = ensure_table_slot(ctx, name, param_count);
    if needs_penv && ctx.current_function_name() == Some(name) {
        format!("(call $rt_mkptr (i64.const 3) (i64.const {table_idx}) (i64.extend_i32_u (local.get $_penv)))")
    } else {
        format!("(call $rt_mkptr (i64.const 3) (i64.const {table_idx}) (i64.const 0))")
    }
}

/// Place `name` in the indirect-call table the first time it is boxed as a
/// value, generating the trampoline that unpacks a boxed-args array into its
/// positional parameters so `call_indirect` can reach it through the single
/// shared table type.
fn ensure_table_slot(ctx: &mut Context, name: &str, param_count: usize) -> u32 {
    if let Some(idx) = ctx.functions.get(name).and_then(|d| d.table_index) {
        return idx;
    }
    let trampoline_name = format!("{name}_tbl");
    let idx = ctx.add_to_func_table(&trampoline_name);
    let mut t = format!("(func ${trampoline_name} (param $_penv i32) (param $_args f64) (result f64) (call ${name} (local.get $_penv)");
    for i in 0..param_count {
        t.push_str(&format!(" (call $rt_arr_get (local.get $_args) (i32.const {i}))"));
    }
    t.push_str("))");
    if let Some(def) = ctx.functions.get_mut(name) {
        def.table_index = Some(idx);
        def.trampoline = Some(t);
    }
    idx
}

/// `["call", callee, arg0, arg1, ...]`. A callee that's a bare identifier
/// naming an already-declared, unshadowed function compiles to a direct
/// `call`; anything else - a variable holding a closure, a member expression,
/// an immediately-invoked literal - boxes its arguments and goes through
/// `call_indirect`.
pub fn generate_call(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let callee_node = node.child(0)?;
    let arg_nodes = &node.children()[1..];

    if let Ast::Ident(name) = callee_node {
        if ctx.resolve(name).is_none() && !ctx.globals.contains_key(name) && ctx.functions.contains_key(name) {
            return generate_direct_call(ctx, name, arg_nodes);
        }
    }
    generate_indirect_call(ctx, callee_node, arg_nodes)
}

/// The environment argument a direct call must pass: the caller's own
/// environment when the callee's declared shape matches it, the caller's
/// received environment when that matches instead (covers self-recursion),
/// zero for a non-capturing callee.
fn direct_call_env(ctx: &mut Context, name: &str) -> String {
    let Some(descriptor) = ctx.functions.get(name).and_then(|d| d.closure.clone()) else {
        return "(i32.const 0)".to_string();
    };
    let shape = ctx.closure_env_types[descriptor.env_type_id as usize].clone();
    if ctx.current_function_name() == Some(name) || ctx.received_shape() == shape {
        return "(local.get $_penv)".to_string();
    }
    if ctx.has_hoisted() && ctx.hoisted_shape() == shape {
        return "(local.get $_env)".to_string();
    }
    ctx.warn(
        crate::error::ErrorCode::TypeError,
        format!("direct call to `{name}` cannot supply its captured environment here"),
    );
    "(i32.const 0)".to_string()
}

fn generate_direct_call(ctx: &mut Context, name: &str, arg_nodes: &[Ast]) -> CResult<TaggedValue> {
    let return_kind = ctx.functions.get(name).map(|d| d.return_kind).unwrap_or(Kind::F64);
    let expected = ctx.functions.get(name).map(|d| d.params.len()).unwrap_or(0);
    if arg_nodes.len() != expected {
        return Err(CompileError::arity(name, expected, arg_nodes.len()));
    }
    let penv = direct_call_env(ctx, name);
    let mut code = format!("(call ${name} {penv}");
    for a in arg_nodes {
        let v = to_f64(&generate(ctx, a)?);
        code.push(' ');
        code.push_str(&v.code);
    }
    code.push(')');
    Ok(TaggedValue::new(return_kind, code))
}

fn generate_indirect_call(ctx: &mut Context, callee_node: &Ast, arg_nodes: &[Ast]) -> CResult<TaggedValue> {
    ctx.used.memory = true;
    let callee_v = generate(ctx, callee_node)?;
    let callee_local = ctx.fresh_local("callee", Kind::F64);
    let args_local = ctx.fresh_local("args", Kind::F64);
    let mut code = format!("(local.set ${callee_local} {})", callee_v.code);
    code.push_str(&format!("(local.set ${args_local} (call $rt_alloc_array (i32.const {})))", arg_nodes.len()));
    for (i, a) in arg_nodes.iter().enumerate() {
        let v = to_f64(&generate(ctx, a)?);
        code.push_str(&format!("(call $rt_arr_set (local.get ${args_local}) (i32.const {i}) {})", v.code));
    }
    code.push_str(&format!(
        "(call_indirect (type $closure_fn) (call $rt_ptr_offset (local.get ${callee_local})) (local.get ${args_local}) (call $rt_ptr_aux (local.get ${callee_local})))"
    ));
    Ok(TaggedValue::new(Kind::F64, code))
}

/// Compile the program's top-level statements into the module's entry
/// function, applying the same up-front hoisting pass a nested function
/// literal gets: a top-level `let` captured by a closure anywhere in the
/// program needs its own environment slot too, allocated once before the
/// first statement runs (the program body executes exactly once, so there's
/// no per-activation allocation to worry about the way a called function has).
/// The entry point returns the last top-level expression's value as `f64`.
pub fn compile_top_level(ctx: &mut Context, body: &Ast) -> CResult<String> {
    let scope_info = scope::analyze_scope(body, &[], &HashSet::new());
    let mut hoist_names: Vec<String> = scope_info.to_hoist.into_iter().collect();
    hoist_names.sort();
    for h in &hoist_names {
        ctx.hoist(h, Kind::F64);
    }

    let mut prologue = String::new();
    if !hoist_names.is_empty() {
        ctx.used.memory = true;
        prologue.push_str(&format!(
            "(local.set $_env (call $rt_ptr_offset (call $rt_alloc_array (i32.const {}))))",
            hoist_names.len()
        ));
    }

    let body_v = to_f64(&generate(ctx, body)?);
    let locals = ctx.exit_function();

    let mut header = "(func $__main (result f64)".to_string();
    if !hoist_names.is_empty() {
        header.push_str(" (local $_env i32)");
    }
    for l in &locals {
        header.push_str(&format!(" (local ${} {})", l.mangled, if l.kind == Kind::I32 { "i32" } else { "f64" }));
    }
    header.push(' ');
    header.push_str(&prologue);
    header.push_str(&body_v.code);
    header.push(')');
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn named_function_declaration_registers_and_compiles() {
        let mut ctx = Context::new();
        let ast = parse(json!(["function", "add", "a", "b", ["+", "a", "b"]]));
        generate(&mut ctx, &ast).unwrap();
        assert!(ctx.functions.contains_key("add"));
        let wat = ctx.functions["add"].wat.as_ref().unwrap();
        assert!(wat.contains("func $add"));
        assert!(wat.contains("(param $a f64)"));
    }

    #[test]
    fn bare_call_to_a_declared_function_emits_a_direct_call() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["function", "add", "a", "b", ["+", "a", "b"]]))).unwrap();
        let tv = generate(&mut ctx, &parse(json!(["call", "add", [null, 1.0], [null, 2.0]]))).unwrap();
        assert!(tv.code.contains("call $add"));
    }

    #[test]
    fn direct_call_arity_mismatch_is_an_error() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["function", "one", "a", "a"]))).unwrap();
        let err = generate(&mut ctx, &parse(json!(["call", "one"]))).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Arity);
    }

    #[test]
    fn arrow_capturing_a_hoisted_outer_local_shares_the_environment() {
        let mut ctx = Context::new();
        // The hoisting pre-pass would have promoted n already; simulate it.
        ctx.hoist("n", Kind::F64);
        let tv = generate(&mut ctx, &parse(json!(["=>", ["+", "n", [null, 1.0]]]))).unwrap();
        assert_eq!(tv.kind, Kind::Closure);
        assert!(
            tv.code.contains("(local.get $_env)"),
            "a capture satisfied by the creator's own environment passes that environment's address: {}",
            tv.code
        );
        assert!(!tv.code.contains("rt_alloc_array"), "no fresh environment copy is needed");
    }

    #[test]
    fn closure_body_reads_captures_through_received_environment() {
        let mut ctx = Context::new();
        ctx.hoist("n", Kind::F64);
        generate(&mut ctx, &parse(json!(["=>", ["+", "n", [null, 1.0]]]))).unwrap();
        let arrow_name = ctx.function_order.last().cloned().unwrap();
        let wat = ctx.functions[&arrow_name].wat.as_ref().unwrap();
        assert!(wat.contains("local.get $_penv"));
    }

    #[test]
    fn call_through_a_variable_goes_through_call_indirect() {
        let mut ctx = Context::new();
        generate(&mut ctx, &parse(json!(["let", "f", ["=>", "x", ["+", "x", [null, 1.0]]]]))).unwrap();
        let tv = generate(&mut ctx, &parse(json!(["call", "f", [null, 5.0]]))).unwrap();
        assert!(tv.code.contains("call_indirect"));
    }

    #[test]
    fn top_level_returns_the_final_expression_value() {
        let mut ctx = Context::new();
        let body = parse(json!([";", ["let", "x", [null, 2.0]], ["*", "x", [null, 3.0]]]));
        let wat = compile_top_level(&mut ctx, &body).unwrap();
        assert!(wat.contains("(func $__main (result f64)"));
        assert!(wat.contains("f64.mul"));
    }
}
