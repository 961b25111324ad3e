//! Control flow: `if`, `for`, `while`, `switch`, `break`/`continue`/`return`, `?:`.
//!
//! Loops and switches target WASM `block`/`loop` labels directly rather than
//! modelling a control-flow graph: `break` branches to the construct's outer
//! block label, `continue` to the loop label, so structured control flow
//! lowers one-for-one into WAT.

use super::coerce::{to_f64, truthy};
use super::generate as generate_expr;
use crate::ast::Ast;
use crate::context::Context;
use crate::error::{CompileError, CResult};
use jz_core::{Kind, TaggedValue};

pub fn generate(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    match tag {
        "if" => generate_if(ctx, node),
        "for" => generate_for(ctx, node),
        "for-of" => generate_for_of(ctx, node),
        "for-in" => generate_for_in(ctx, node),
        "while" => generate_while(ctx, node),
        "switch" => generate_switch(ctx, node),
        "break" => generate_break(ctx),
        "continue" => generate_continue(ctx),
        "return" => generate_return(ctx, node),
        _ => unreachable!("control::generate called with non-control tag {tag}"),
    }
}

pub fn generate_ternary(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let cond = truthy(&generate_expr(ctx, node.child(0)?)?);
    let then_v = generate_expr(ctx, node.child(1)?)?;
    let else_v = generate_expr(ctx, node.child(2)?)?;
    let (then_v, else_v) = super::coerce::reconcile(&then_v, &else_v);
    let instr = if then_v.kind == Kind::I32 { "i32" } else { "f64" };
    Ok(TaggedValue::new(
        then_v.kind,
        format!("(if (result {instr}) {} (then {}) (else {}))", cond.code, then_v.code, else_v.code),
    ))
}

fn generate_if(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let cond = truthy(&generate_expr(ctx, node.child(0)?)?);
    ctx.push_scope();
    let then_v = generate_expr(ctx, node.child(1)?)?;
    ctx.pop_scope();
    let else_code = if node.children().len() > 2 {
        ctx.push_scope();
        let v = generate_expr(ctx, node.child(2)?)?;
        ctx.pop_scope();
        format!("(drop {}) ", v.code)
    } else {
        String::new()
    };
    Ok(TaggedValue::new(
        Kind::Ref,
        format!("(if {} (then (drop {})) (else {}))(f64.const 0)", cond.code, then_v.code, else_code),
    ))
}

fn generate_for(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    ctx.push_scope();
    let init = node.child(0)?;
    if !init.is_nullish_literal() {
        generate_expr(ctx, init)?;
    }
    let cond_node = node.child(1)?;
    let step_node = node.child(2)?;
    let body_node = node.child(3)?;

    let break_label = ctx.fresh_label("for_break");
    let continue_label = ctx.fresh_label("for_continue");
    let loop_label = ctx.fresh_label("for_loop");
    ctx.push_loop_labels(break_label.clone(), continue_label.clone());

    let cond = if cond_node.is_nullish_literal() {
        TaggedValue::new(Kind::I32, "(i32.const 1)")
    } else {
        truthy(&generate_expr(ctx, cond_node)?)
    };
    let body = generate_expr(ctx, body_node)?;
    let step = if step_node.is_nullish_literal() {
        None
    } else {
        Some(generate_expr(ctx, step_node)?)
    };

    ctx.pop_loop_labels();
    ctx.pop_scope();

    // `continue` branches to the end of the body block, landing on the step.
    let step_code = step.map(|s| format!("(drop {}) ", s.code)).unwrap_or_default();
    Ok(TaggedValue::new(
        Kind::Ref,
        format!(
            "(block {break_label} (loop {loop_label} \
               (br_if {break_label} (i32.eqz {})) \
               (block {continue_label} (drop {})) \
               {step_code}\
               (br {loop_label}))) (f64.const 0)",
            cond.code, body.code
        ),
    ))
}

/// `["for-of", "name", iterable, body]`: an index loop over the iterable's
/// elements. Strings iterate as one-character strings; typed arrays through
/// their element stride.
fn generate_for_of(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let name = node.child(0)?.as_ident().ok_or_else(|| CompileError::malformed(node))?.to_string();
    let iter_v = generate_expr(ctx, node.child(1)?)?;

    ctx.push_scope();
    let it = ctx.fresh_local("fo_it", Kind::F64);
    let len = ctx.fresh_local("fo_len", Kind::I32);
    let idx = ctx.fresh_local("fo_i", Kind::I32);

    let (len_code, elem_code, elem_kind) = match iter_v.kind {
        Kind::Array | Kind::RefArray => (
            format!("(i32.trunc_f64_u (call $rt_ptr_len (local.get ${it})))"),
            format!("(call $rt_arr_get (local.get ${it}) (local.get ${idx}))"),
            Kind::F64,
        ),
        Kind::String => {
            ctx.used.string = true;
            (
                format!("(call $rt_str_len (local.get ${it}))"),
                format!("(call $rt_char_to_str (call $rt_str_char_at (local.get ${it}) (local.get ${idx})))"),
                Kind::String,
            )
        }
        Kind::TypedArray => {
            ctx.used.typed_array = true;
            (
                format!("(call $rt_typed_len (local.get ${it}))"),
                format!("(call $rt_typed_get (local.get ${it}) (local.get ${idx}))"),
                Kind::F64,
            )
        }
        other => return Err(CompileError::type_error(format!("cannot iterate a `{other}`"))),
    };
    ctx.used.memory = true;

    let mangled = ctx.declare_var(&name, elem_kind, None, false);
    let break_label = ctx.fresh_label("forof_break");
    let continue_label = ctx.fresh_label("forof_continue");
    let loop_label = ctx.fresh_label("forof_loop");
    ctx.push_loop_labels(break_label.clone(), continue_label.clone());
    let body = generate_expr(ctx, node.child(2)?)?;
    ctx.pop_loop_labels();
    ctx.pop_scope();

    Ok(TaggedValue::new(
        Kind::Ref,
        format!(
            "(local.set ${it} {}) (local.set ${len} {len_code}) (local.set ${idx} (i32.const 0)) \
             (block {break_label} (loop {loop_label} \
               (br_if {break_label} (i32.ge_s (local.get ${idx}) (local.get ${len}))) \
               (local.set ${mangled} {elem_code}) \
               (block {continue_label} (drop {})) \
               (local.set ${idx} (i32.add (local.get ${idx}) (i32.const 1))) \
               (br {loop_label}))) (f64.const 0)",
            iter_v.code, body.code
        ),
    ))
}

/// `["for-in", "name", object, body]`: the object's schema is fixed at
/// compile time, so its keys become a static array of interned strings and
/// the loop is an ordinary element loop over it.
fn generate_for_in(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    use jz_core::Schema;
    let name = node.child(0)?.as_ident().ok_or_else(|| CompileError::malformed(node))?.to_string();
    let obj_v = generate_expr(ctx, node.child(1)?)?;
    let Some(Schema::ObjectSchema(schema_id)) = obj_v.schema else {
        return Err(CompileError::type_error("`for..in` requires an object with a statically known schema"));
    };
    let props: Vec<String> = ctx.schemas.props(schema_id).unwrap_or(&[]).to_vec();
    ctx.used.memory = true;
    ctx.used.string = true;
    let keys: Vec<f64> = props
        .iter()
        .map(|p| f64::from_bits(ctx.strings.intern(p).bits))
        .collect();
    let keys_offset = ctx.alloc_static_array(keys);

    ctx.push_scope();
    let idx = ctx.fresh_local("fi_i", Kind::I32);
    let mangled = ctx.declare_var(&name, Kind::String, None, false);
    let break_label = ctx.fresh_label("forin_break");
    let continue_label = ctx.fresh_label("forin_continue");
    let loop_label = ctx.fresh_label("forin_loop");
    ctx.push_loop_labels(break_label.clone(), continue_label.clone());
    let body = generate_expr(ctx, node.child(2)?)?;
    ctx.pop_loop_labels();
    ctx.pop_scope();

    Ok(TaggedValue::new(
        Kind::Ref,
        format!(
            "(drop {}) (local.set ${idx} (i32.const 0)) \
             (block {break_label} (loop {loop_label} \
               (br_if {break_label} (i32.ge_s (local.get ${idx}) (i32.const {}))) \
               (local.set ${mangled} (f64.load (i32.add (i32.const {keys_offset}) (i32.shl (local.get ${idx}) (i32.const 3))))) \
               (block {continue_label} (drop {})) \
               (local.set ${idx} (i32.add (local.get ${idx}) (i32.const 1))) \
               (br {loop_label}))) (f64.const 0)",
            obj_v.code,
            props.len(),
            body.code
        ),
    ))
}

fn generate_while(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let cond_node = node.child(0)?;
    let body_node = node.child(1)?;

    let break_label = ctx.fresh_label("while_break");
    let continue_label = ctx.fresh_label("while_continue");
    ctx.push_loop_labels(break_label.clone(), continue_label.clone());

    let cond = truthy(&generate_expr(ctx, cond_node)?);
    ctx.push_scope();
    let body = generate_expr(ctx, body_node)?;
    ctx.pop_scope();

    ctx.pop_loop_labels();

    Ok(TaggedValue::new(
        Kind::Ref,
        format!(
            "(block {break_label} (loop {continue_label} \
               (br_if {break_label} (i32.eqz {})) \
               (drop {}) \
               (br {continue_label}))) (f64.const 0)",
            cond.code, body.code
        ),
    ))
}

/// Linear fall-through: a dispatch prologue compares the discriminant
/// against each case test in order and branches into a ladder of nested
/// blocks, one per case body. A matched case's body then falls straight
/// into the next case's body until a `break` branches to the switch label;
/// no native jump table.
fn generate_switch(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let discriminant = to_f64(&generate_expr(ctx, node.child(0)?)?);
    let disc_local = ctx.fresh_local("switch_disc", Kind::F64);
    let break_label = ctx.fresh_label("switch_break");
    ctx.push_break_only_label(break_label.clone());

    let cases = &node.children()[1..];
    let mut tests: Vec<Option<String>> = Vec::with_capacity(cases.len());
    let mut bodies: Vec<String> = Vec::with_capacity(cases.len());
    let mut labels: Vec<String> = Vec::with_capacity(cases.len());
    for case in cases {
        let (test, stmts) = match case.tag() {
            Some("case") => {
                let test = to_f64(&generate_expr(ctx, case.child(0)?)?);
                (Some(test.code), &case.children()[1..])
            }
            Some("default") => (None, case.children()),
            _ => return Err(CompileError::malformed(case)),
        };
        let mut stmt_code = String::new();
        for s in stmts {
            let v = generate_expr(ctx, s)?;
            stmt_code.push_str(&format!("(drop {}) ", v.code));
        }
        tests.push(test);
        bodies.push(stmt_code);
        labels.push(ctx.fresh_label("switch_case"));
    }
    ctx.pop_loop_labels();

    // Dispatch: first matching test enters its case's block; no match goes
    // to the default's block, or straight out of the switch.
    let mut dispatch = String::new();
    for (label, test) in labels.iter().zip(&tests) {
        if let Some(test) = test {
            dispatch.push_str(&format!(
                "(br_if {label} (f64.eq (local.get ${disc_local}) {test}))"
            ));
        }
    }
    let default_target = labels
        .iter()
        .zip(&tests)
        .find(|(_, t)| t.is_none())
        .map(|(l, _)| l.as_str())
        .unwrap_or(&break_label);
    dispatch.push_str(&format!("(br {default_target})"));

    // Each `br` lands at the end of its case's block, which is where that
    // case's body starts; bodies then run in source order to the end of the
    // switch unless a `break` intervenes.
    let mut chain = dispatch;
    for (i, body) in bodies.iter().enumerate() {
        chain = format!("(block {} {chain}) {body}", labels[i]);
    }

    Ok(TaggedValue::new(
        Kind::Ref,
        format!(
            "(local.set ${disc_local} {}) (block {break_label} {chain}) (f64.const 0)",
            discriminant.code
        ),
    ))
}

fn generate_break(ctx: &Context) -> CResult<TaggedValue> {
    let label = ctx.break_label().ok_or_else(|| CompileError::type_error("`break` outside a loop or switch"))?;
    Ok(TaggedValue::new(Kind::Ref, format!("(br {label})")))
}

fn generate_continue(ctx: &Context) -> CResult<TaggedValue> {
    let label = ctx.continue_label().ok_or_else(|| CompileError::type_error("`continue` outside a loop"))?;
    Ok(TaggedValue::new(Kind::Ref, format!("(br {label})")))
}

fn generate_return(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    if node.children().is_empty() {
        return Ok(TaggedValue::new(Kind::Ref, "(return (f64.const 0))"));
    }
    let v = to_f64(&generate_expr(ctx, node.child(0)?)?);
    Ok(TaggedValue::new(Kind::Ref, format!("(return {})", v.code)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn break_outside_a_loop_is_an_error() {
        let ctx = Context::new();
        let err = generate_break(&ctx).unwrap_err();
        assert!(err.message.contains("break"));
    }

    #[test]
    fn for_loop_body_can_break_and_continue() {
        let mut ctx = Context::new();
        ctx.declare_var("i", Kind::F64, None, false);
        let ast = parse(json!([
            "for",
            [null, null],
            ["<", "i", [null, 10.0]],
            [null, null],
            ["{}", ["break"]]
        ]));
        let tv = generate(&mut ctx, "for", &ast).unwrap();
        assert!(tv.code.contains("br $for_break"));
    }

    #[test]
    fn switch_cases_fall_through_until_break() {
        let mut ctx = Context::new();
        ctx.declare_var("y", Kind::F64, None, false);
        let ast = parse(json!([
            "switch", [null, 1.0],
            ["case", [null, 1.0], ["=", "y", [null, 10.0]]],
            ["case", [null, 2.0], ["=", "y", [null, 20.0]], ["break"]],
            ["default", ["=", "y", [null, 99.0]]]
        ]));
        let tv = generate(&mut ctx, "switch", &ast).unwrap();
        // One dispatch comparison per tested case, branching into the chain.
        assert_eq!(tv.code.matches("(br_if $switch_case").count(), 2);
        // The bodies sit in source order with nothing between them: a match
        // on case 1 runs its body and falls into case 2's until the break.
        let c1 = tv.code.find("f64.const 10").expect("case 1 body");
        let c2 = tv.code.find("f64.const 20").expect("case 2 body");
        let cd = tv.code.find("f64.const 99").expect("default body");
        assert!(c1 < c2 && c2 < cd);
        assert!(tv.code.contains("(br $switch_break"));
    }

    #[test]
    fn switch_without_default_dispatches_straight_out() {
        let mut ctx = Context::new();
        let ast = parse(json!([
            "switch", [null, 3.0],
            ["case", [null, 1.0], [null, 1.0]]
        ]));
        let tv = generate(&mut ctx, "switch", &ast).unwrap();
        assert!(tv.code.contains("(br $switch_break"));
    }

    #[test]
    fn ternary_widens_mismatched_branch_kinds() {
        let mut ctx = Context::new();
        let ast = parse(json!(["?:", [null, true], [null, 1.0], [null, 2.0]]));
        let tv = generate_ternary(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::F64);
    }

    #[test]
    fn for_of_over_an_array_binds_each_element() {
        let mut ctx = Context::new();
        crate::codegen::generate(&mut ctx, &parse(json!(["let", "total", [null, 0.0]]))).unwrap();
        let ast = parse(json!([
            "for-of", "x",
            ["array", [null, 1.0], [null, 2.0]],
            ["=", "total", ["+", "total", "x"]]
        ]));
        let tv = crate::codegen::generate(&mut ctx, &ast).unwrap();
        assert!(tv.code.contains("rt_arr_get"));
        assert!(tv.code.contains("$forof_break"));
        assert!(ctx.resolve("x").is_none(), "the loop variable is scoped to the loop");
    }

    #[test]
    fn for_in_unrolls_the_schema_keys_into_a_static_array() {
        let mut ctx = Context::new();
        crate::codegen::generate(
            &mut ctx,
            &parse(json!(["let", "o", ["object", ["prop", "a", [null, 1.0]], ["prop", "b", [null, 2.0]]]])),
        )
        .unwrap();
        crate::codegen::generate(&mut ctx, &parse(json!(["let", "k", [null, ""]]))).unwrap();
        let tv = crate::codegen::generate(&mut ctx, &parse(json!(["for-in", "key", "o", ["=", "k", "key"]]))).unwrap();
        assert!(tv.code.contains("$forin_loop"));
        // Two keys planned as one static array of interned string values.
        assert!(ctx.static_arrays.iter().any(|a| a.elements.len() == 2));
    }

    #[test]
    fn for_of_over_a_number_is_a_type_error() {
        let mut ctx = Context::new();
        let err = crate::codegen::generate(
            &mut ctx,
            &parse(json!(["for-of", "x", [null, 5.0], [null, null]])),
        )
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::TypeError);
    }
}
