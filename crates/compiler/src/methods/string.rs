//! String methods: loops over UTF-16 code units via the SSO-transparent
//! string primitives. `split`/`replace`/`search`/`match` accept either a
//! literal string or a compiled regex as the pattern argument; the regex
//! paths go through the generic table-indexed drivers in the regex runtime.

use super::{regexp, saved};
use crate::ast::Ast;
use crate::codegen::coerce::{to_f64, to_i32};
use crate::codegen::generate;
use crate::context::Context;
use crate::error::{CResult, CompileError};
use jz_core::{Kind, Schema, TaggedValue};

pub fn method(ctx: &mut Context, recv: &TaggedValue, name: &str, args: &[Ast]) -> CResult<Option<TaggedValue>> {
    ctx.used.memory = true;
    ctx.used.string = true;
    match name {
        "charCodeAt" => char_code_at(ctx, recv, args).map(Some),
        "charAt" | "at" => char_at(ctx, recv, args, name == "at").map(Some),
        "concat" => concat(ctx, recv, args).map(Some),
        "slice" => slice(ctx, recv, args).map(Some),
        "substring" => substring(ctx, recv, args).map(Some),
        "substr" => substr(ctx, recv, args).map(Some),
        "indexOf" => index_of(ctx, recv, args).map(Some),
        "includes" => includes(ctx, recv, args).map(Some),
        "startsWith" => starts_with(ctx, recv, args).map(Some),
        "endsWith" => ends_with(ctx, recv, args).map(Some),
        "toLowerCase" => unary_helper(ctx, recv, args, "toLowerCase", "rt_str_lower").map(Some),
        "toUpperCase" => unary_helper(ctx, recv, args, "toUpperCase", "rt_str_upper").map(Some),
        "trim" => trim(ctx, recv, args, true, true).map(Some),
        "trimStart" => trim(ctx, recv, args, true, false).map(Some),
        "trimEnd" => trim(ctx, recv, args, false, true).map(Some),
        "repeat" => repeat(ctx, recv, args).map(Some),
        "padStart" => pad(ctx, recv, args, true).map(Some),
        "padEnd" => pad(ctx, recv, args, false).map(Some),
        "split" => split(ctx, recv, args).map(Some),
        "replace" => replace(ctx, recv, args).map(Some),
        "search" => search(ctx, recv, args).map(Some),
        "match" => match_method(ctx, recv, args).map(Some),
        _ => Ok(None),
    }
}

fn string_arg(ctx: &mut Context, method: &str, args: &[Ast], i: usize) -> CResult<TaggedValue> {
    let node = args
        .get(i)
        .ok_or_else(|| CompileError::arity(method, i + 1, args.len()))?;
    let v = generate(ctx, node)?;
    if !matches!(v.kind, Kind::String | Kind::F64) {
        return Err(CompileError::type_error(format!("`{method}` expects a string argument")));
    }
    Ok(v)
}

/// The pattern argument of `split`/`replace`/`search`/`match`: either a
/// string value or a compiled regex literal.
enum Pattern {
    Str(TaggedValue),
    Regex(u32),
}

fn pattern_arg(ctx: &mut Context, method: &str, args: &[Ast]) -> CResult<Pattern> {
    let node = args.first().ok_or_else(|| CompileError::arity(method, 1, args.len()))?;
    let v = generate(ctx, node)?;
    if let Some(Schema::Regex(id)) = v.schema {
        return Ok(Pattern::Regex(id));
    }
    if !matches!(v.kind, Kind::String | Kind::F64) {
        return Err(CompileError::type_error(format!(
            "`{method}` expects a string or regex pattern"
        )));
    }
    Ok(Pattern::Str(v))
}

fn char_code_at(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let i = match args.first() {
        Some(a) => to_i32(&generate(ctx, a)?).code,
        None => "(i32.const 0)".to_string(),
    };
    Ok(TaggedValue::new(
        Kind::F64,
        format!("(f64.convert_i32_u (call $rt_str_char_at {} {i}))", recv.code),
    ))
}

/// `charAt` and `at`: one-character string at an index; `at` counts negative
/// indices from the end.
fn char_at(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], negative_wraps: bool) -> CResult<TaggedValue> {
    let i_code = match args.first() {
        Some(a) => to_i32(&generate(ctx, a)?).code,
        None => "(i32.const 0)".to_string(),
    };
    let (set_r, r) = saved(ctx, "str", recv);
    let i = ctx.fresh_local("chi", Kind::I32);
    let norm = if negative_wraps {
        format!(
            "(if (i32.lt_s (local.get ${i}) (i32.const 0)) \
               (then (local.set ${i} (i32.add (local.get ${i}) (call $rt_str_len {r}))))) "
        )
    } else {
        String::new()
    };
    Ok(TaggedValue::new(
        Kind::String,
        format!(
            "{set_r} (local.set ${i} {i_code}) {norm}\
             (if (result f64) (i32.or (i32.lt_s (local.get ${i}) (i32.const 0)) (i32.ge_s (local.get ${i}) (call $rt_str_len {r}))) \
               (then (call $rt_str_copy {r} (i32.const 0) (i32.const 0))) \
               (else (call $rt_char_to_str (call $rt_str_char_at {r} (local.get ${i})))))"
        ),
    ))
}

fn concat(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let mut acc = recv.code.clone();
    if args.is_empty() {
        return Err(CompileError::arity("concat", 1, 0));
    }
    for idx in 0..args.len() {
        let part = string_arg(ctx, "concat", args, idx)?;
        acc = format!("(call $rt_strcat {acc} {})", part.code);
    }
    Ok(TaggedValue::new(Kind::String, acc))
}

fn slice(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_r, r) = saved(ctx, "str", recv);
    let start = match args.first() {
        Some(a) => to_f64(&generate(ctx, a)?).code,
        None => "(f64.const 0)".to_string(),
    };
    let end = match args.get(1) {
        Some(a) => to_f64(&generate(ctx, a)?).code,
        None => format!("(f64.convert_i32_u (call $rt_str_len {r}))"),
    };
    Ok(TaggedValue::new(
        Kind::String,
        format!("{set_r} (call $rt_str_slice {r} {start} {end})"),
    ))
}

fn substring(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_r, r) = saved(ctx, "str", recv);
    let a_code = match args.first() {
        Some(a) => to_i32(&generate(ctx, a)?).code,
        None => "(i32.const 0)".to_string(),
    };
    let b_given = match args.get(1) {
        Some(a) => Some(to_i32(&generate(ctx, a)?)),
        None => None,
    };
    let l = ctx.fresh_local("subl", Kind::I32);
    let a = ctx.fresh_local("suba", Kind::I32);
    let b = ctx.fresh_local("subb", Kind::I32);
    let t = ctx.fresh_local("subt", Kind::I32);
    let b_init = match &b_given {
        Some(v) => v.code.clone(),
        None => format!("(local.get ${l})"),
    };
    // substring clamps both ends to [0, len] and swaps an inverted range.
    Ok(TaggedValue::new(
        Kind::String,
        format!(
            "{set_r} \
             (local.set ${l} (call $rt_str_len {r})) \
             (local.set ${a} {a_code}) \
             (local.set ${b} {b_init}) \
             (if (i32.lt_s (local.get ${a}) (i32.const 0)) (then (local.set ${a} (i32.const 0)))) \
             (if (i32.gt_s (local.get ${a}) (local.get ${l})) (then (local.set ${a} (local.get ${l})))) \
             (if (i32.lt_s (local.get ${b}) (i32.const 0)) (then (local.set ${b} (i32.const 0)))) \
             (if (i32.gt_s (local.get ${b}) (local.get ${l})) (then (local.set ${b} (local.get ${l})))) \
             (if (i32.gt_s (local.get ${a}) (local.get ${b})) \
               (then \
                 (local.set ${t} (local.get ${a})) \
                 (local.set ${a} (local.get ${b})) \
                 (local.set ${b} (local.get ${t})))) \
             (call $rt_str_copy {r} (local.get ${a}) (i32.sub (local.get ${b}) (local.get ${a})))"
        ),
    ))
}

fn substr(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let (set_r, r) = saved(ctx, "str", recv);
    let from = match args.first() {
        Some(a) => to_i32(&generate(ctx, a)?).code,
        None => "(i32.const 0)".to_string(),
    };
    let n_given = match args.get(1) {
        Some(a) => Some(to_i32(&generate(ctx, a)?)),
        None => None,
    };
    let l = ctx.fresh_local("ssl", Kind::I32);
    let a = ctx.fresh_local("ssa", Kind::I32);
    let n = ctx.fresh_local("ssn", Kind::I32);
    let n_init = match &n_given {
        Some(v) => v.code.clone(),
        None => format!("(local.get ${l})"),
    };
    Ok(TaggedValue::new(
        Kind::String,
        format!(
            "{set_r} \
             (local.set ${l} (call $rt_str_len {r})) \
             (local.set ${a} {from}) \
             (if (i32.lt_s (local.get ${a}) (i32.const 0)) (then (local.set ${a} (i32.add (local.get ${a}) (local.get ${l}))))) \
             (if (i32.lt_s (local.get ${a}) (i32.const 0)) (then (local.set ${a} (i32.const 0)))) \
             (if (i32.gt_s (local.get ${a}) (local.get ${l})) (then (local.set ${a} (local.get ${l})))) \
             (local.set ${n} {n_init}) \
             (if (i32.lt_s (local.get ${n}) (i32.const 0)) (then (local.set ${n} (i32.const 0)))) \
             (if (i32.gt_s (local.get ${n}) (i32.sub (local.get ${l}) (local.get ${a}))) \
               (then (local.set ${n} (i32.sub (local.get ${l}) (local.get ${a}))))) \
             (call $rt_str_copy {r} (local.get ${a}) (local.get ${n}))"
        ),
    ))
}

fn index_of(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let needle = string_arg(ctx, "indexOf", args, 0)?;
    let from = match args.get(1) {
        Some(a) => to_i32(&generate(ctx, a)?).code,
        None => "(i32.const 0)".to_string(),
    };
    Ok(TaggedValue::new(
        Kind::F64,
        format!("(f64.convert_i32_s (call $rt_str_index_of {} {} {from}))", recv.code, needle.code),
    ))
}

fn includes(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let needle = string_arg(ctx, "includes", args, 0)?;
    Ok(TaggedValue::new(
        Kind::I32,
        format!(
            "(i32.ne (call $rt_str_index_of {} {} (i32.const 0)) (i32.const -1))",
            recv.code, needle.code
        ),
    ))
}

fn starts_with(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let needle = string_arg(ctx, "startsWith", args, 0)?;
    Ok(TaggedValue::new(
        Kind::I32,
        format!(
            "(i32.eq (call $rt_str_index_of {} {} (i32.const 0)) (i32.const 0))",
            recv.code, needle.code
        ),
    ))
}

fn ends_with(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let needle = string_arg(ctx, "endsWith", args, 0)?;
    let (set_r, r) = saved(ctx, "str", recv);
    let (set_n, n) = saved(ctx, "needle", &needle);
    let off = ctx.fresh_local("endoff", Kind::I32);
    Ok(TaggedValue::new(
        Kind::I32,
        format!(
            "{set_r} {set_n} \
             (local.set ${off} (i32.sub (call $rt_str_len {r}) (call $rt_str_len {n}))) \
             (if (result i32) (i32.lt_s (local.get ${off}) (i32.const 0)) \
               (then (i32.const 0)) \
               (else (i32.eq (call $rt_str_index_of {r} {n} (local.get ${off})) (local.get ${off}))))"
        ),
    ))
}

fn unary_helper(
    _ctx: &mut Context,
    recv: &TaggedValue,
    args: &[Ast],
    name: &str,
    helper: &str,
) -> CResult<TaggedValue> {
    if !args.is_empty() {
        return Err(CompileError::arity(name, 0, args.len()));
    }
    Ok(TaggedValue::new(Kind::String, format!("(call ${helper} {})", recv.code)))
}

fn trim(_ctx: &mut Context, recv: &TaggedValue, args: &[Ast], start: bool, end: bool) -> CResult<TaggedValue> {
    if !args.is_empty() {
        return Err(CompileError::arity("trim", 0, args.len()));
    }
    Ok(TaggedValue::new(
        Kind::String,
        format!(
            "(call $rt_str_trim {} (i32.const {}) (i32.const {}))",
            recv.code, start as i32, end as i32
        ),
    ))
}

fn repeat(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let n = to_i32(&generate(
        ctx,
        args.first().ok_or_else(|| CompileError::arity("repeat", 1, 0))?,
    )?);
    Ok(TaggedValue::new(
        Kind::String,
        format!("(call $rt_str_repeat {} {})", recv.code, n.code),
    ))
}

fn pad(ctx: &mut Context, recv: &TaggedValue, args: &[Ast], at_start: bool) -> CResult<TaggedValue> {
    let method = if at_start { "padStart" } else { "padEnd" };
    let target = to_i32(&generate(
        ctx,
        args.first().ok_or_else(|| CompileError::arity(method, 1, 0))?,
    )?);
    let pad = match args.get(1) {
        Some(_) => string_arg(ctx, method, args, 1)?.code,
        None => super::interned_code(ctx, " "),
    };
    Ok(TaggedValue::new(
        Kind::String,
        format!(
            "(call $rt_str_pad {} {} {pad} (i32.const {}))",
            recv.code,
            target.code,
            at_start as i32
        ),
    ))
}

fn split(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    match pattern_arg(ctx, "split", args)? {
        Pattern::Str(sep) => Ok(TaggedValue::new(
            Kind::Array,
            format!("(call $rt_str_split {} {})", recv.code, sep.code),
        )),
        Pattern::Regex(id) => {
            let fidx = regexp::match_table_idx(ctx, id);
            Ok(TaggedValue::new(
                Kind::Array,
                format!("(call $rt_re_split {} (i32.const {fidx}))", recv.code),
            ))
        }
    }
}

fn replace(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    let pat = pattern_arg(ctx, "replace", args)?;
    let repl = string_arg(ctx, "replace", args, 1)?;
    match pat {
        Pattern::Str(p) => Ok(TaggedValue::new(
            Kind::String,
            format!("(call $rt_str_replace_once {} {} {})", recv.code, p.code, repl.code),
        )),
        Pattern::Regex(id) => {
            let fidx = regexp::match_table_idx(ctx, id);
            let helper = if regexp::is_global(ctx, id) {
                "rt_re_replace_all"
            } else {
                "rt_re_replace"
            };
            Ok(TaggedValue::new(
                Kind::String,
                format!("(call ${helper} {} (i32.const {fidx}) {})", recv.code, repl.code),
            ))
        }
    }
}

fn search(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    match pattern_arg(ctx, "search", args)? {
        Pattern::Str(p) => Ok(TaggedValue::new(
            Kind::F64,
            format!("(f64.convert_i32_s (call $rt_str_index_of {} {} (i32.const 0)))", recv.code, p.code),
        )),
        Pattern::Regex(id) => {
            let fidx = regexp::match_table_idx(ctx, id);
            Ok(TaggedValue::new(
                Kind::F64,
                format!("(call $rt_re_search {} (i32.const {fidx}))", recv.code),
            ))
        }
    }
}

fn match_method(ctx: &mut Context, recv: &TaggedValue, args: &[Ast]) -> CResult<TaggedValue> {
    match pattern_arg(ctx, "match", args)? {
        // A string pattern behaves like a non-global regex made of literal
        // characters; the common case in this library is the regex one.
        Pattern::Str(p) => {
            let (set_r, r) = saved(ctx, "str", recv);
            let (set_p, pv) = saved(ctx, "pat", &p);
            let at = ctx.fresh_local("matchat", Kind::I32);
            let out = ctx.fresh_local("matchout", Kind::F64);
            Ok(TaggedValue::new(
                Kind::Array,
                format!(
                    "{set_r} {set_p} \
                     (local.set ${at} (call $rt_str_index_of {r} {pv} (i32.const 0))) \
                     (if (result f64) (i32.eq (local.get ${at}) (i32.const -1)) \
                       (then (f64.const 0)) \
                       (else \
                         (local.set ${out} (call $rt_alloc_array (i32.const 1))) \
                         (call $rt_arr_set (local.get ${out}) (i32.const 0) {pv}) \
                         (local.get ${out})))"
                ),
            ))
        }
        Pattern::Regex(id) => {
            if regexp::is_global(ctx, id) {
                let fidx = regexp::match_table_idx(ctx, id);
                return Ok(TaggedValue::new(
                    Kind::Array,
                    format!("(call $rt_re_match_all {} (i32.const {fidx}))", recv.code),
                ));
            }
            regexp::exec_into_groups(ctx, id, recv)
        }
    }
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
    fn replace_with_a_string_pattern_replaces_the_first_occurrence_only() {
        let mut ctx = Context::new();
        let tv = call(&mut ctx, json!(["method", [null, "abcabc"], "replace", [null, "b"], [null, "X"]])).unwrap();
        assert_eq!(tv.kind, Kind::String);
        assert!(tv.code.contains("rt_str_replace_once"));
    }

    #[test]
    fn replace_with_a_global_regex_replaces_every_occurrence() {
        let mut ctx = Context::new();
        let tv = call(
            &mut ctx,
            json!(["method", [null, "abcabc"], "replace", ["regex", [null, "b"], [null, "g"]], [null, "X"]]),
        )
        .unwrap();
        assert!(tv.code.contains("rt_re_replace_all"));
    }

    #[test]
    fn split_accepts_a_string_or_a_regex_separator() {
        let mut ctx = Context::new();
        let by_str = call(&mut ctx, json!(["method", [null, "a,b"], "split", [null, ","]])).unwrap();
        assert!(by_str.code.contains("rt_str_split"));
        let by_re = call(&mut ctx, json!(["method", [null, "a1b"], "split", ["regex", [null, "\\d"], [null, ""]]])).unwrap();
        assert!(by_re.code.contains("rt_re_split"));
    }

    #[test]
    fn ends_with_guards_a_needle_longer_than_the_receiver() {
        let mut ctx = Context::new();
        let tv = call(&mut ctx, json!(["method", [null, "ab"], "endsWith", [null, "abc"]])).unwrap();
        assert_eq!(tv.kind, Kind::I32);
        assert!(tv.code.contains("i32.lt_s"));
    }
}
