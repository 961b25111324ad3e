//! Methods on regex values (`test`, `exec`), plus the table plumbing the
//! string methods use to hand a compiled pattern to the generic drivers.
//!
//! A compiled pattern is a pair of module-level functions; putting them in
//! the indirect-call table lets one runtime driver serve every pattern.

use super::saved;
use crate::ast::Ast;
use crate::codegen::generate;
use crate::context::Context;
use crate::error::{CResult, CompileError};
use jz_core::{Kind, TaggedValue};

/// Table index of `$regex_N` (the match-at-position function).
pub fn match_table_idx(ctx: &mut Context, id: u32) -> u32 {
    ctx.add_to_func_table(&format!("regex_{id}"))
}

/// Table index of `$regex_N_exec` (the group-recording variant).
pub fn exec_table_idx(ctx: &mut Context, id: u32) -> u32 {
    ctx.add_to_func_table(&format!("regex_{id}_exec"))
}

pub fn is_global(ctx: &Context, id: u32) -> bool {
    ctx.regexes
        .get(id as usize)
        .map(|r| r.flags.contains('g'))
        .unwrap_or(false)
}

pub fn regex_method(ctx: &mut Context, id: u32, name: &str, args: &[Ast]) -> CResult<Option<TaggedValue>> {
    match name {
        "test" => {
            let s = subject_arg(ctx, "test", args)?;
            let fidx = match_table_idx(ctx, id);
            Ok(Some(TaggedValue::new(
                Kind::I32,
                format!("(i64.ne (call $rt_re_find {} (i32.const {fidx}) (i32.const 0)) (i64.const -1))", s.code),
            )))
        }
        "exec" => {
            let s = subject_arg(ctx, "exec", args)?;
            Ok(Some(exec_into_groups(ctx, id, &s)?))
        }
        _ => Ok(None),
    }
}

fn subject_arg(ctx: &mut Context, method: &str, args: &[Ast]) -> CResult<TaggedValue> {
    if args.len() != 1 {
        return Err(CompileError::arity(method, 1, args.len()));
    }
    let v = generate(ctx, &args[0])?;
    if !matches!(v.kind, Kind::String | Kind::F64) {
        return Err(CompileError::type_error(format!("`{method}` expects a string argument")));
    }
    Ok(v)
}

/// Run the pattern's `exec` variant over `subject` and materialise the
/// recorded groups as an array of strings (slot 0 is the whole match), or the
/// null sentinel when nothing matches. Backs both `regex.exec(s)` and the
/// non-global `s.match(regex)`.
pub fn exec_into_groups(ctx: &mut Context, id: u32, subject: &TaggedValue) -> CResult<TaggedValue> {
    let group_count = ctx
        .regexes
        .get(id as usize)
        .map(|r| r.group_count)
        .unwrap_or(0);
    let fidx = exec_table_idx(ctx, id);
    let slots = group_count + 1;
    let (set_s, s) = saved(ctx, "subj", subject);
    let buf = ctx.fresh_local("grpbuf", Kind::I32);
    let packed = ctx.fresh_local("grppk", Kind::F64);
    // The packed i64 find result rides in an f64 local via reinterpret, to
    // keep temp locals uniformly typed.
    Ok(TaggedValue::new(
        Kind::Array,
        format!(
            "{set_s} \
             (local.set ${buf} (call $rt_bump (i32.const {}))) \
             (local.set ${packed} (f64.reinterpret_i64 (call $rt_re_exec {s} (i32.const {fidx}) (local.get ${buf}) (i32.const 0)))) \
             (if (result f64) (i64.eq (i64.reinterpret_f64 (local.get ${packed})) (i64.const -1)) \
               (then (f64.const 0)) \
               (else (call $rt_re_groups {s} (local.get ${buf}) (i32.const {slots}))))",
            slots * 8
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(ctx: &mut Context, v: serde_json::Value) -> CResult<TaggedValue> {
        crate::codegen::generate(ctx, &Ast::from_json(&v).unwrap())
    }

    #[test]
    fn test_method_scans_through_the_generic_driver() {
        let mut ctx = Context::new();
        let tv = call(
            &mut ctx,
            json!(["method", ["regex", [null, "a+"], [null, ""]], "test", [null, "caa"]]),
        )
        .unwrap();
        assert_eq!(tv.kind, Kind::I32);
        assert!(tv.code.contains("rt_re_find"));
    }

    #[test]
    fn exec_allocates_one_slot_pair_per_group_plus_the_whole_match() {
        let mut ctx = Context::new();
        let tv = call(
            &mut ctx,
            json!(["method", ["regex", [null, "(a)(b)"], [null, ""]], "exec", [null, "ab"]]),
        )
        .unwrap();
        // Two groups plus the whole match: three 8-byte pairs.
        assert!(tv.code.contains("rt_bump (i32.const 24)"));
        assert!(tv.code.contains("rt_re_groups"));
    }
}
