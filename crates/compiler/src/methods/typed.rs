//! TypedArray methods: the array loops, re-indexed through the element
//! type's stride with `rt_typed_get`/`rt_typed_set`. The element type rides
//! in the pointer itself, so the loops here never consult the schema at
//! runtime; the compile-time schema only matters for allocating a result
//! array of the same element type in `map`/`slice`.

use super::saved;
use crate::ast::Ast;
use crate::codegen::coerce::{to_f64, to_i32};
use crate::codegen::generate;
use crate::context::Context;
use crate::error::{CResult, CompileError};
use jz_core::{Kind, Schema, TaggedValue, TypedElementKind};

pub fn method(ctx: &mut Context, recv: &TaggedValue, name: &str, args: &[Ast]) -> CResult<Option<TaggedValue>> {
    ctx.used.memory = true;
    ctx.used.typed_array = true;
    let elem = match recv.schema {
        Some(Schema::TypedElement(e)) => Some(e),
        _ => None,
    };
    match name {
        "fill" => fill(ctx, recv, args).map(Some),
        "map" => map(ctx, recv, args, elem).map(Some),
        "forEach" => for_each(ctx, recv, args).map(Some),
        "reduce" => reduce(ctx, recv, args).map(Some),
        "indexOf" | "includes" => index_of(ctx, recv, args, name == "includes").map(Some),
        "every" | "some" => quantifier(ctx, recv, args, name == "every").map(Some),
        "slice" => slice(ctx, recv, args, elem).map(Some),
        "reverse" => reverse(ctx, recv, args).map(Some),
        _ => Ok(None),
    }
}

struct TypedLoop {
    set_up: String,
    r: String,
    len: String,
    i: String,
    i_name: String,
    done: String,
    head: String,
    tail: String,
}

fn typed_loop(ctx: &mut Context, recv: &TaggedValue) -> TypedLoop {
    let (set_r, r) = saved(ctx, "ta", recv);
    let len = ctx.fresh_local("talen", Kind::I32);
    let i = ctx.fresh_local("tai", Kind::I32);
    let done = ctx.fresh_label("ta_done");
    let each = ctx.fresh_label("ta_each");
    TypedLoop {
        set_up: format!("{set_r} (local.set ${len} (call $rt_typed_len {r})) (local.set ${i} (i32.const 0))"),
        r,
        len: format!("(local.get ${len})"),
        i: format!("(local.get ${i})"),
        i_name: i.clone(),
        done: done.clone(),
        head: format!("(block {done} (loop {each} (br_if {done} (i32.ge_s (local.get ${i}) (local.get ${len})))"),
        tail: format!("(local.set ${i} (i32.add (local.get ${i}) (i32.const 1))) (br {each})))"),
    }
}

fn callback_arg(ctx: &mut Context, method: &str, args: &[Ast]) -> CResult<(String, String)> {
    let node = args.first().ok_or_else(|| CompileError::arity(method, 1, 0))?;
    let f = generate(ctx, node)?;
    if !matches!(f.kind, Kind::Closure | Kind::F64) {
        return Err(CompileError::type_error(format!("`{method}` expects a function argument")));
    }
    Ok(saved(ctx, "cb", &to_f64(&f)))
}

fn fill(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let x = to_f64(&generate(
        ctx,
        args.first().ok_or_else(|| CompileError::arity("fill", 1, 0))?,
    )?);
    let (set_x, xv) = saved(ctx, "fillv", &x);
    let TypedLoop { set_up, r, i, head, tail, .. } = typed_loop(ctx, recv);
    Ok(TaggedValue {
        kind: Kind::TypedArray,
        code: format!("{set_up} {set_x} {head} (call $rt_typed_set {r} {i} {xv}) {tail} {r}"),
        schema: recv.schema.clone(),
    })
}

fn map(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], elem: Option<TypedElementKind>) -> CResult<TaggedValue> {
    let elem = elem.ok_or_else(|| CompileError::type_error("`map` requires a statically typed receiver"))?;
    let (set_f, f) = callback_arg(ctx, "map", args)?;
    let TypedLoop { set_up, r, len, i, head, tail, .. } = typed_loop(ctx, recv);
    let out = ctx.fresh_local("taout", Kind::F64);
    Ok(TaggedValue::with_schema(
        Kind::TypedArray,
        format!(
            "{set_up} {set_f} \
             (local.set ${out} (call $rt_alloc_typed (i64.const {}) {len} (i32.const {}))) \
             {head} \
               (call $rt_typed_set (local.get ${out}) {i} \
                 (call $rt_call3 {f} (call $rt_typed_get {r} {i}) (f64.convert_i32_u {i}) {r})) \
             {tail} \
             (local.get ${out})",
            elem.tag(),
            elem.byte_size()
        ),
        Schema::TypedElement(elem),
    ))
}

fn for_each(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_f, f) = callback_arg(ctx, "forEach", args)?;
    let TypedLoop { set_up, r, i, head, tail, .. } = typed_loop(ctx, recv);
    Ok(TaggedValue::new(
        Kind::F64,
        format!(
            "{set_up} {set_f} {head} \
               (drop (call $rt_call3 {f} (call $rt_typed_get {r} {i}) (f64.convert_i32_u {i}) {r})) \
             {tail} (f64.const 0)"
        ),
    ))
}

fn reduce(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_f, f) = callback_arg(ctx, "reduce", args)?;
    let init = match args.get(1) {
        Some(a) => Some(to_f64(&generate(ctx, a)?)),
        None => None,
    };
    let TypedLoop { set_up, r, i, i_name, head, tail, .. } = typed_loop(ctx, recv);
    let acc = ctx.fresh_local("taacc", Kind::F64);
    let seed = match init {
        Some(v) => format!("(local.set ${acc} {})", v.code),
        None => format!("(local.set ${acc} (call $rt_typed_get {r} (i32.const 0))) (local.set ${i_name} (i32.const 1))"),
    };
    Ok(TaggedValue::new(
        Kind::F64,
        format!(
            "{set_up} {set_f} {seed} {head} \
               (local.set ${acc} (call $rt_call4 {f} (local.get ${acc}) (call $rt_typed_get {r} {i}) (f64.convert_i32_u {i}) {r})) \
             {tail} (local.get ${acc})"
        ),
    ))
}

fn index_of(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], as_bool: bool) -> CResult<TaggedValue> {
    let method = if as_bool { "includes" } else { "indexOf" };
    let x = to_f64(&generate(
        ctx,
        args.first().ok_or_else(|| CompileError::arity(method, 1, 0))?,
    )?);
    let (set_x, xv) = saved(ctx, "needle", &x);
    let TypedLoop { set_up, r, i, done, head, tail, .. } = typed_loop(ctx, recv);
    let res = ctx.fresh_local("taidx", Kind::I32);
    let body = format!(
        "{set_up} {set_x} (local.set ${res} (i32.const -1)) \
         {head} \
           (if (f64.eq (call $rt_typed_get {r} {i}) {xv}) \
             (then (local.set ${res} {i}) (br {done}))) \
         {tail}"
    );
    if as_bool {
        Ok(TaggedValue::new(Kind::I32, format!("{body} (i32.ne (local.get ${res}) (i32.const -1))")))
    } else {
        Ok(TaggedValue::new(Kind::F64, format!("{body} (f64.convert_i32_s (local.get ${res}))")))
    }
}

fn quantifier(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], all: bool) -> CResult<TaggedValue> {
    let method = if all { "every" } else { "some" };
    let (set_f, f) = callback_arg(ctx, method, args)?;
    let TypedLoop { set_up, r, i, done, head, tail, .. } = typed_loop(ctx, recv);
    let res = ctx.fresh_local("taquant", Kind::I32);
    let (seed, test, flip) = if all {
        ("(i32.const 1)", "(f64.eq", "(i32.const 0)")
    } else {
        ("(i32.const 0)", "(f64.ne", "(i32.const 1)")
    };
    Ok(TaggedValue::new(
        Kind::I32,
        format!(
            "{set_up} {set_f} (local.set ${res} {seed}) \
             {head} \
               (if {test} (call $rt_call3 {f} (call $rt_typed_get {r} {i}) (f64.convert_i32_u {i}) {r}) (f64.const 0)) \
                 (then (local.set ${res} {flip}) (br {done}))) \
             {tail} (local.get ${res})"
        ),
    ))
}

fn slice(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], elem: Option<TypedElementKind>) -> CResult<TaggedValue> {
    let elem = elem.ok_or_else(|| CompileError::type_error("`slice` requires a statically typed receiver"))?;
    let (set_r, r) = saved(ctx, "ta", recv);
    let a = ctx.fresh_local("tasa", Kind::I32);
    let b = ctx.fresh_local("tasb", Kind::I32);
    let l = ctx.fresh_local("tasl", Kind::I32);
    let out = ctx.fresh_local("tasout", Kind::F64);
    let i = ctx.fresh_local("tasi", Kind::I32);
    let done = ctx.fresh_label("tas_done");
    let each = ctx.fresh_label("tas_each");
    let start = match args.first() {
        Some(n) => to_i32(&generate(ctx, n)?).code,
        None => "(i32.const 0)".to_string(),
    };
    let end_given = match args.get(1) {
        Some(n) => Some(to_i32(&generate(ctx, n)?).code),
        None => None,
    };
    let b_init = end_given.unwrap_or_else(|| format!("(local.get ${l})"));
    Ok(TaggedValue::with_schema(
        Kind::TypedArray,
        format!(
            "{set_r} \
             (local.set ${l} (call $rt_typed_len {r})) \
             (local.set ${a} {start}) \
             (local.set ${b} {b_init}) \
             (if (i32.lt_s (local.get ${a}) (i32.const 0)) (then (local.set ${a} (i32.add (local.get ${a}) (local.get ${l}))))) \
             (if (i32.lt_s (local.get ${b}) (i32.const 0)) (then (local.set ${b} (i32.add (local.get ${b}) (local.get ${l}))))) \
             (if (i32.lt_s (local.get ${a}) (i32.const 0)) (then (local.set ${a} (i32.const 0)))) \
             (if (i32.gt_s (local.get ${b}) (local.get ${l})) (then (local.set ${b} (local.get ${l})))) \
             (if (i32.lt_s (local.get ${b}) (local.get ${a})) (then (local.set ${b} (local.get ${a})))) \
             (local.set ${out} (call $rt_alloc_typed (i64.const {}) (i32.sub (local.get ${b}) (local.get ${a})) (i32.const {}))) \
             (block {done} (loop {each} \
               (br_if {done} (i32.ge_s (i32.add (local.get ${a}) (local.get ${i})) (local.get ${b}))) \
               (call $rt_typed_set (local.get ${out}) (local.get ${i}) \
                 (call $rt_typed_get {r} (i32.add (local.get ${a}) (local.get ${i})))) \
               (local.set ${i} (i32.add (local.get ${i}) (i32.const 1))) \
               (br {each}))) \
             (local.get ${out})",
            elem.tag(),
            elem.byte_size()
        ),
        Schema::TypedElement(elem),
    ))
}

fn reverse(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    if !args.is_empty() {
        return Err(CompileError::arity("reverse", 0, args.len()));
    }
    let (set_r, r) = saved(ctx, "ta", recv);
    let a = ctx.fresh_local("tari", Kind::I32);
    let b = ctx.fresh_local("tarj", Kind::I32);
    let t = ctx.fresh_local("tart", Kind::F64);
    let done = ctx.fresh_label("tar_done");
    let swap = ctx.fresh_label("tar_swap");
    Ok(TaggedValue {
        kind: Kind::TypedArray,
        code: format!(
            "{set_r} \
             (local.set ${a} (i32.const 0)) \
             (local.set ${b} (i32.sub (call $rt_typed_len {r}) (i32.const 1))) \
             (block {done} (loop {swap} \
               (br_if {done} (i32.ge_s (local.get ${a}) (local.get ${b}))) \
               (local.set ${t} (call $rt_typed_get {r} (local.get ${a}))) \
               (call $rt_typed_set {r} (local.get ${a}) (call $rt_typed_get {r} (local.get ${b}))) \
               (call $rt_typed_set {r} (local.get ${b}) (local.get ${t})) \
               (local.set ${a} (i32.add (local.get ${a}) (i32.const 1))) \
               (local.set ${b} (i32.sub (local.get ${b}) (i32.const 1))) \
               (br {swap}))) \
             {r}"
        ),
        schema: recv.schema.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    fn call(ctx: &mut Context, v: serde_json::Value) -> CResult<TaggedValue> {
        crate::codegen::generate(ctx, &parse(v))
    }

    #[test]
    fn typed_map_allocates_the_same_element_type() {
        let mut ctx = Context::new();
        call(&mut ctx, json!(["let", "t", ["new", "Float32Array", [null, 8.0]]])).unwrap();
        let tv = call(&mut ctx, json!(["method", "t", "map", ["=>", "x", ["*", "x", [null, 2.0]]]])).unwrap();
        assert_eq!(tv.kind, Kind::TypedArray);
        assert_eq!(tv.schema, Some(Schema::TypedElement(TypedElementKind::F32)));
        assert!(tv.code.contains("rt_alloc_typed (i64.const 6)"));
    }

    #[test]
    fn typed_index_loops_use_typed_accessors() {
        let mut ctx = Context::new();
        call(&mut ctx, json!(["let", "t", ["new", "Int32Array", [null, 4.0]]])).unwrap();
        let tv = call(&mut ctx, json!(["method", "t", "indexOf", [null, 7.0]])).unwrap();
        assert!(tv.code.contains("rt_typed_get"));
        assert!(tv.code.contains("rt_typed_len"));
    }
}
