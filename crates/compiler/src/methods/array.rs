//! Array methods: explicit index loops over `rt_ptr_len` with element access
//! through `rt_arr_get`/`rt_arr_set`. Callback-taking methods invoke the
//! callback closure through `rt_call3`/`rt_call4` (element, index, array,
//! plus the accumulator for `reduce`); a callback declared with fewer
//! parameters simply never reads the extras.

use super::{interned_code, saved};
use crate::ast::Ast;
use crate::codegen::coerce::to_f64;
use crate::codegen::generate;
use crate::context::{Context, Resolved};
use crate::error::{CResult, CompileError};
use jz_core::{Kind, Schema, TaggedValue};

pub fn method(
    ctx: &mut Context,
    recv_node: &Ast,
    recv: &TaggedValue,
    name: &str,
    args: &[Ast],
) -> CResult<Option<TaggedValue>> {
    ctx.used.memory = true;
    match name {
        "push" => push(ctx, recv_node, recv, args).map(Some),
        "pop" => pop(ctx, recv, args).map(Some),
        "map" => callback_collect(ctx, recv, args).map(Some),
        "filter" => filter(ctx, recv, args).map(Some),
        "reduce" => reduce(ctx, recv, args).map(Some),
        "find" | "findIndex" => find(ctx, recv, args, name == "findIndex").map(Some),
        "indexOf" | "includes" => index_of(ctx, recv, args, name == "includes").map(Some),
        "every" | "some" => quantifier(ctx, recv, args, name == "every").map(Some),
        "forEach" => for_each(ctx, recv, args).map(Some),
        "fill" => fill(ctx, recv, args).map(Some),
        "slice" => slice(ctx, recv, args).map(Some),
        "reverse" => reverse(ctx, recv, args).map(Some),
        "concat" => concat(ctx, recv, args).map(Some),
        "join" => join(ctx, recv, args).map(Some),
        _ => Ok(None),
    }
}

fn expect_args(name: &str, args: &[Ast], n: usize) -> CResult<()> {
    if args.len() != n {
        return Err(CompileError::arity(name, n, args.len()));
    }
    Ok(())
}

/// `push` grows in place within the current capacity tier and reallocates
/// across one; reallocation moves the storage, so the receiver must be a
/// directly named, heap-allocated array whose local can be rebound.
fn push(ctx: &mut Context, recv_node: &Ast, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    expect_args("push", args, 1)?;
    if recv.schema == Some(Schema::StaticData) {
        return Err(CompileError::array_alias("cannot push into an array backed by constant data"));
    }
    let Some(Resolved::Local(slot)) = recv_node.as_ident().and_then(|n| ctx.resolve(n)) else {
        return Err(CompileError::array_alias(
            "push requires a directly named array local (growth may rebind it)",
        ));
    };
    let arr = slot.mangled;
    let x = to_f64(&generate(ctx, &args[0])?);
    let xl = ctx.fresh_local("pushv", Kind::F64);
    let ll = ctx.fresh_local("pushlen", Kind::I32);
    Ok(TaggedValue::new(
        Kind::F64,
        format!(
            "(local.set ${xl} {x}) \
             (local.set ${ll} (i32.trunc_f64_u (call $rt_ptr_len (local.get ${arr})))) \
             (if (i32.gt_s (i32.add (local.get ${ll}) (i32.const 1)) (call $rt_cap_for_len (local.get ${ll}))) \
               (then \
                 (local.set ${arr} (call $rt_realloc (local.get ${arr}) (i32.add (local.get ${ll}) (i32.const 1)))) \
                 (call $rt_arr_set (local.get ${arr}) (local.get ${ll}) (local.get ${xl}))) \
               (else \
                 (call $rt_arr_set (local.get ${arr}) (local.get ${ll}) (local.get ${xl})) \
                 (call $rt_ptr_set_len (local.get ${arr}) (f64.convert_i32_u (i32.add (local.get ${ll}) (i32.const 1)))))) \
             (f64.convert_i32_u (i32.add (local.get ${ll}) (i32.const 1)))",
            x = x.code,
            arr = format!("{arr}"),
        ),
    ))
}

fn pop(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    expect_args("pop", args, 0)?;
    if recv.schema == Some(Schema::StaticData) {
        return Err(CompileError::array_alias("cannot pop from an array backed by constant data"));
    }
    let (set_r, r) = saved(ctx, "poparr", recv);
    let ll = ctx.fresh_local("poplen", Kind::I32);
    Ok(TaggedValue::new(
        Kind::F64,
        format!(
            "{set_r} (local.set ${ll} (i32.trunc_f64_u (call $rt_ptr_len {r}))) \
             (if (result f64) (i32.eqz (local.get ${ll})) \
               (then (f64.const 0)) \
               (else \
                 (call $rt_ptr_set_len {r} (f64.convert_i32_u (i32.sub (local.get ${ll}) (i32.const 1)))) \
                 (call $rt_arr_get {r} (i32.sub (local.get ${ll}) (i32.const 1)))))"
        ),
    ))
}

/// Shared loop scaffolding: receiver and length temps plus a counter.
struct ArrLoop {
    set_up: String,
    r: String,
    len: String,
    i: String,
    i_name: String,
    done: String,
    head: String,
    tail: String,
}

fn arr_loop(ctx: &mut Context, recv: &TaggedValue) -> ArrLoop {
    let (set_r, r) = saved(ctx, "arr", recv);
    let len = ctx.fresh_local("len", Kind::I32);
    let i = ctx.fresh_local("i", Kind::I32);
    let done = ctx.fresh_label("arr_done");
    let each = ctx.fresh_label("arr_each");
    ArrLoop {
        set_up: format!(
            "{set_r} (local.set ${len} (i32.trunc_f64_u (call $rt_ptr_len {r}))) (local.set ${i} (i32.const 0))"
        ),
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
    if args.is_empty() {
        return Err(CompileError::arity(method, 1, 0));
    }
    let f = generate(ctx, &args[0])?;
    if !matches!(f.kind, Kind::Closure | Kind::F64) {
        return Err(CompileError::type_error(format!("`{method}` expects a function argument")));
    }
    Ok(saved(ctx, "cb", &to_f64(&f)))
}

fn callback_collect(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_f, f) = callback_arg(ctx, "map", args)?;
    let lp = arr_loop(ctx, recv);
    let out = ctx.fresh_local("mapout", Kind::F64);
    let ArrLoop { set_up, r, len, i, head, tail, .. } = lp;
    Ok(TaggedValue::new(
        Kind::Array,
        format!(
            "{set_up} {set_f} (local.set ${out} (call $rt_alloc_array {len})) \
             {head} \
               (call $rt_arr_set (local.get ${out}) {i} \
                 (call $rt_call3 {f} (call $rt_arr_get {r} {i}) (f64.convert_i32_u {i}) {r})) \
             {tail} \
             (local.get ${out})"
        ),
    ))
}

fn filter(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_f, f) = callback_arg(ctx, "filter", args)?;
    let lp = arr_loop(ctx, recv);
    let out = ctx.fresh_local("fltout", Kind::F64);
    let n = ctx.fresh_local("fltn", Kind::I32);
    let v = ctx.fresh_local("fltv", Kind::F64);
    let ArrLoop { set_up, r, len, i, head, tail, .. } = lp;
    Ok(TaggedValue::new(
        Kind::Array,
        format!(
            "{set_up} {set_f} (local.set ${out} (call $rt_alloc_array {len})) (local.set ${n} (i32.const 0)) \
             {head} \
               (local.set ${v} (call $rt_arr_get {r} {i})) \
               (if (f64.ne (call $rt_call3 {f} (local.get ${v}) (f64.convert_i32_u {i}) {r}) (f64.const 0)) \
                 (then \
                   (call $rt_arr_set (local.get ${out}) (local.get ${n}) (local.get ${v})) \
                   (local.set ${n} (i32.add (local.get ${n}) (i32.const 1))))) \
             {tail} \
             (call $rt_ptr_set_len (local.get ${out}) (f64.convert_i32_u (local.get ${n}))) \
             (local.get ${out})"
        ),
    ))
}

fn reduce(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_f, f) = callback_arg(ctx, "reduce", args)?;
    let init = args.get(1).map(|a| generate(ctx, a)).transpose()?.map(|v| to_f64(&v));
    let lp = arr_loop(ctx, recv);
    let acc = ctx.fresh_local("acc", Kind::F64);
    let ArrLoop { set_up, r, i, i_name, head, tail, .. } = lp;
    let seed = match init {
        Some(v) => format!("(local.set ${acc} {})", v.code),
        // Without an initial value the first element seeds the accumulator.
        None => format!("(local.set ${acc} (call $rt_arr_get {r} (i32.const 0))) (local.set ${i_name} (i32.const 1))"),
    };
    Ok(TaggedValue::new(
        Kind::F64,
        format!(
            "{set_up} {set_f} {seed} \
             {head} \
               (local.set ${acc} (call $rt_call4 {f} (local.get ${acc}) (call $rt_arr_get {r} {i}) (f64.convert_i32_u {i}) {r})) \
             {tail} \
             (local.get ${acc})"
        ),
    ))
}

fn find(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], want_index: bool) -> CResult<TaggedValue> {
    let method = if want_index { "findIndex" } else { "find" };
    let (set_f, f) = callback_arg(ctx, method, args)?;
    let lp = arr_loop(ctx, recv);
    let res = ctx.fresh_local("found", Kind::F64);
    let ArrLoop { set_up, r, i, done, head, tail, .. } = lp;
    let miss = if want_index { "(f64.const -1)" } else { "(f64.const 0)" };
    let hit = if want_index {
        format!("(local.set ${res} (f64.convert_i32_u {i}))")
    } else {
        format!("(local.set ${res} (call $rt_arr_get {r} {i}))")
    };
    let done_label = done;
    Ok(TaggedValue::new(
        Kind::F64,
        format!(
            "{set_up} {set_f} (local.set ${res} {miss}) \
             {head} \
               (if (f64.ne (call $rt_call3 {f} (call $rt_arr_get {r} {i}) (f64.convert_i32_u {i}) {r}) (f64.const 0)) \
                 (then {hit} (br {done_label}))) \
             {tail} \
             (local.get ${res})"
        ),
    ))
}

fn index_of(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], as_bool: bool) -> CResult<TaggedValue> {
    let method = if as_bool { "includes" } else { "indexOf" };
    expect_args(method, args, 1)?;
    let needle = to_f64(&generate(ctx, &args[0])?);
    let (set_n, n) = saved(ctx, "needle", &needle);
    let lp = arr_loop(ctx, recv);
    let res = ctx.fresh_local("idx", Kind::I32);
    let ArrLoop { set_up, r, i, done, head, tail, .. } = lp;
    let done_label = done;
    let body = format!(
        "{set_up} {set_n} (local.set ${res} (i32.const -1)) \
         {head} \
           (if (call $rt_f64_eq (call $rt_arr_get {r} {i}) {n}) \
             (then (local.set ${res} {i}) (br {done_label}))) \
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
    let lp = arr_loop(ctx, recv);
    let res = ctx.fresh_local("quant", Kind::I32);
    let ArrLoop { set_up, r, i, done, head, tail, .. } = lp;
    let done_label = done;
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
               (if {test} (call $rt_call3 {f} (call $rt_arr_get {r} {i}) (f64.convert_i32_u {i}) {r}) (f64.const 0)) \
                 (then (local.set ${res} {flip}) (br {done_label}))) \
             {tail} \
             (local.get ${res})"
        ),
    ))
}

fn for_each(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_f, f) = callback_arg(ctx, "forEach", args)?;
    let lp = arr_loop(ctx, recv);
    let ArrLoop { set_up, r, i, head, tail, .. } = lp;
    Ok(TaggedValue::new(
        Kind::F64,
        format!(
            "{set_up} {set_f} \
             {head} \
               (drop (call $rt_call3 {f} (call $rt_arr_get {r} {i}) (f64.convert_i32_u {i}) {r})) \
             {tail} \
             (f64.const 0)"
        ),
    ))
}

fn fill(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    expect_args("fill", args, 1)?;
    let x = to_f64(&generate(ctx, &args[0])?);
    let (set_x, xv) = saved(ctx, "fillv", &x);
    let lp = arr_loop(ctx, recv);
    let ArrLoop { set_up, r, i, head, tail, .. } = lp;
    Ok(TaggedValue::new(
        Kind::Array,
        format!("{set_up} {set_x} {head} (call $rt_arr_set {r} {i} {xv}) {tail} {r}"),
    ))
}

fn slice(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_r, r) = saved(ctx, "slicearr", recv);
    let start = match args.first() {
        Some(a) => to_f64(&generate(ctx, a)?).code,
        None => "(f64.const 0)".to_string(),
    };
    let end = match args.get(1) {
        Some(a) => to_f64(&generate(ctx, a)?).code,
        None => format!("(call $rt_ptr_len {r})"),
    };
    Ok(TaggedValue::new(
        Kind::Array,
        format!("{set_r} (call $rt_array_slice2 {r} {start} {end})"),
    ))
}

fn reverse(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    expect_args("reverse", args, 0)?;
    let (set_r, r) = saved(ctx, "revarr", recv);
    let a = ctx.fresh_local("ri", Kind::I32);
    let b = ctx.fresh_local("rj", Kind::I32);
    let t = ctx.fresh_local("rt", Kind::F64);
    let done = ctx.fresh_label("rev_done");
    let swap = ctx.fresh_label("rev_swap");
    Ok(TaggedValue::new(
        Kind::Array,
        format!(
            "{set_r} \
             (local.set ${a} (i32.const 0)) \
             (local.set ${b} (i32.sub (i32.trunc_f64_u (call $rt_ptr_len {r})) (i32.const 1))) \
             (block {done} (loop {swap} \
               (br_if {done} (i32.ge_s (local.get ${a}) (local.get ${b}))) \
               (local.set ${t} (call $rt_arr_get {r} (local.get ${a}))) \
               (call $rt_arr_set {r} (local.get ${a}) (call $rt_arr_get {r} (local.get ${b}))) \
               (call $rt_arr_set {r} (local.get ${b}) (local.get ${t})) \
               (local.set ${a} (i32.add (local.get ${a}) (i32.const 1))) \
               (local.set ${b} (i32.sub (local.get ${b}) (i32.const 1))) \
               (br {swap}))) \
             {r}"
        ),
    ))
}

fn concat(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    expect_args("concat", args, 1)?;
    let other = generate(ctx, &args[0])?;
    if !matches!(other.kind, Kind::Array | Kind::RefArray | Kind::F64) {
        return Err(CompileError::type_error("`concat` expects an array argument"));
    }
    let (set_a, a) = saved(ctx, "cata", recv);
    let (set_b, b) = saved(ctx, "catb", &other);
    let la = ctx.fresh_local("catla", Kind::I32);
    let lb = ctx.fresh_local("catlb", Kind::I32);
    let out = ctx.fresh_local("catout", Kind::F64);
    let i = ctx.fresh_local("cati", Kind::I32);
    let d1 = ctx.fresh_label("cat_d1");
    let l1 = ctx.fresh_label("cat_l1");
    let d2 = ctx.fresh_label("cat_d2");
    let l2 = ctx.fresh_label("cat_l2");
    Ok(TaggedValue::new(
        Kind::Array,
        format!(
            "{set_a} {set_b} \
             (local.set ${la} (i32.trunc_f64_u (call $rt_ptr_len {a}))) \
             (local.set ${lb} (i32.trunc_f64_u (call $rt_ptr_len {b}))) \
             (local.set ${out} (call $rt_alloc_array (i32.add (local.get ${la}) (local.get ${lb})))) \
             (local.set ${i} (i32.const 0)) \
             (block {d1} (loop {l1} \
               (br_if {d1} (i32.ge_s (local.get ${i}) (local.get ${la}))) \
               (call $rt_arr_set (local.get ${out}) (local.get ${i}) (call $rt_arr_get {a} (local.get ${i}))) \
               (local.set ${i} (i32.add (local.get ${i}) (i32.const 1))) \
               (br {l1}))) \
             (local.set ${i} (i32.const 0)) \
             (block {d2} (loop {l2} \
               (br_if {d2} (i32.ge_s (local.get ${i}) (local.get ${lb}))) \
               (call $rt_arr_set (local.get ${out}) (i32.add (local.get ${la}) (local.get ${i})) (call $rt_arr_get {b} (local.get ${i}))) \
               (local.set ${i} (i32.add (local.get ${i}) (i32.const 1))) \
               (br {l2}))) \
             (local.get ${out})"
        ),
    ))
}

fn join(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    ctx.used.string = true;
    let sep = match args.first() {
        Some(a) => {
            let v = generate(ctx, a)?;
            if !matches!(v.kind, Kind::String | Kind::F64) {
                return Err(CompileError::type_error("`join` expects a string separator"));
            }
            v.code
        }
        None => interned_code(ctx, ","),
    };
    let empty = interned_code(ctx, "");
    let (set_s, s) = saved(ctx, "joinsep", &TaggedValue::new(Kind::String, sep));
    let lp = arr_loop(ctx, recv);
    let acc = ctx.fresh_local("joinacc", Kind::F64);
    let ArrLoop { set_up, r, len, i, i_name, head, tail, .. } = lp;
    // Index 0 seeds the accumulator; the loop starts at 1 and prepends the
    // separator before each further element.
    Ok(TaggedValue::new(
        Kind::String,
        format!(
            "{set_up} {set_s} \
             (if (result f64) (i32.eqz {len}) \
               (then {empty}) \
               (else \
                 (local.set ${acc} (call $rt_num_to_str (call $rt_arr_get {r} (i32.const 0)))) \
                 (local.set ${i_name} (i32.const 1)) \
                 {head} \
                   (local.set ${acc} (call $rt_strcat3 (local.get ${acc}) {s} (call $rt_num_to_str (call $rt_arr_get {r} {i})))) \
                 {tail} \
                 (local.get ${acc})))"
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    fn call(ctx: &mut Context, v: serde_json::Value) -> CResult<TaggedValue> {
        generate(ctx, &parse(v))
    }

    #[test]
    fn push_requires_a_named_growable_array() {
        let mut ctx = Context::new();
        // Static constant array: rejected outright.
        let err = call(&mut ctx, json!(["method", ["array", [null, 1.0]], "push", [null, 2.0]])).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ArrayAlias);
    }

    #[test]
    fn push_on_a_local_updates_length_and_handles_tier_growth() {
        let mut ctx = Context::new();
        call(&mut ctx, json!(["let", "n", [null, 1.0]])).unwrap();
        call(&mut ctx, json!(["let", "a", ["array", "n", [null, 2.0]]])).unwrap();
        let tv = call(&mut ctx, json!(["method", "a", "push", [null, 3.0]])).unwrap();
        assert!(tv.code.contains("rt_cap_for_len"));
        assert!(tv.code.contains("rt_realloc"));
        assert!(tv.code.contains("rt_ptr_set_len"));
    }

    #[test]
    fn reduce_with_seed_threads_the_accumulator() {
        let mut ctx = Context::new();
        let tv = call(
            &mut ctx,
            json!([
                "method",
                ["array", [null, 1.0], [null, 2.0], [null, 3.0]],
                "reduce",
                ["=>", "a", "b", ["+", "a", "b"]],
                [null, 10.0]
            ]),
        )
        .unwrap();
        assert_eq!(tv.kind, Kind::F64);
        assert!(tv.code.contains("rt_call4"));
        assert!(tv.code.contains("f64.const 10"));
    }

    #[test]
    fn includes_compares_with_bitwise_equality() {
        let mut ctx = Context::new();
        let tv = call(&mut ctx, json!(["method", ["array", [null, 1.0]], "includes", [null, 1.0]])).unwrap();
        assert_eq!(tv.kind, Kind::I32);
        assert!(tv.code.contains("rt_f64_eq"));
    }

    #[test]
    fn join_defaults_to_a_comma_separator() {
        let mut ctx = Context::new();
        let tv = call(&mut ctx, json!(["method", ["array", [null, 1.0], [null, 2.0]], "join"])).unwrap();
        assert_eq!(tv.kind, Kind::String);
        assert!(tv.code.contains("rt_num_to_str"));
    }
}
