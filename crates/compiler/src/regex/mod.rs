//! The regex subsystem: a recursive-descent pattern parser and a compiler
//! lowering each pattern to a `$regex_N`/`$regex_N_exec` function pair with
//! explicit backtracking. Literals are interned per compilation:
//! the same (pattern, flags) text compiles once.

pub mod compiler;
pub mod parser;

use crate::ast::Ast;
use crate::context::{Context, RegexDef};
use crate::error::{CResult, CompileError};
use jz_core::{Kind, Schema, TaggedValue};

/// `["regex", pattern, flags?]` or `["new", "RegExp", pattern, flags?]`.
/// The value is a boxed pointer whose aux field is the pattern's index, so a
/// regex stored in a variable still dispatches statically via its schema.
pub fn generate_literal(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let base = if node.tag() == Some("new") { 1 } else { 0 };
    let pat_node = node.child(base)?;
    let pattern = pat_node
        .as_string()
        .or_else(|| pat_node.as_ident())
        .ok_or_else(|| CompileError::parse_regex("regex pattern must be a literal string"))?
        .to_string();
    let flags = match node.children().get(base + 1) {
        Some(f) => f
            .as_string()
            .or_else(|| f.as_ident())
            .ok_or_else(|| CompileError::parse_regex("regex flags must be a literal string"))?
            .to_string(),
        None => String::new(),
    };

    let id = intern(ctx, &pattern, &flags)?;
    ctx.used.memory = true;
    Ok(TaggedValue::with_schema(
        Kind::Object,
        format!("(call $rt_mkptr (i64.const 2) (i64.const {id}) (i64.const 0))"),
        Schema::Regex(id),
    ))
}

fn intern(ctx: &mut Context, pattern: &str, flags: &str) -> CResult<u32> {
    if let Some(existing) = ctx
        .regexes
        .iter()
        .position(|r| r.pattern == pattern && r.flags == flags)
    {
        return Ok(existing as u32);
    }
    let parsed = parser::parse(pattern, flags)?;
    let id = ctx.regexes.len() as u32;
    let compiled = compiler::compile(id, &parsed)?;
    Ok(ctx.register_regex(RegexDef {
        pattern: pattern.to_string(),
        flags: flags.to_string(),
        group_count: parsed.groups,
        wat: compiled.wat,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_ast(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn regex_literal_registers_a_compiled_pattern() {
        let mut ctx = Context::new();
        let tv = crate::codegen::generate(&mut ctx, &parse_ast(json!(["regex", [null, "a+b"], [null, "i"]]))).unwrap();
        assert_eq!(tv.schema, Some(Schema::Regex(0)));
        assert_eq!(ctx.regexes.len(), 1);
        assert!(ctx.regexes[0].wat.contains("func $regex_0_exec"));
        assert_eq!(ctx.used.regex_ids, vec![0]);
    }

    #[test]
    fn identical_literals_share_one_compilation() {
        let mut ctx = Context::new();
        crate::codegen::generate(&mut ctx, &parse_ast(json!(["regex", [null, "x"], [null, "g"]]))).unwrap();
        let tv = crate::codegen::generate(&mut ctx, &parse_ast(json!(["regex", [null, "x"], [null, "g"]]))).unwrap();
        assert_eq!(tv.schema, Some(Schema::Regex(0)));
        assert_eq!(ctx.regexes.len(), 1);
    }

    #[test]
    fn malformed_patterns_surface_the_parse_regex_code() {
        let mut ctx = Context::new();
        let err = crate::codegen::generate(&mut ctx, &parse_ast(json!(["regex", [null, "a("], [null, ""]]))).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ParseRegex);
    }

    #[test]
    fn new_regexp_is_the_same_literal_path() {
        let mut ctx = Context::new();
        let tv = crate::codegen::generate(
            &mut ctx,
            &parse_ast(json!(["new", "RegExp", [null, "\\d+"], [null, "g"]])),
        )
        .unwrap();
        assert_eq!(tv.schema, Some(Schema::Regex(0)));
    }
}
