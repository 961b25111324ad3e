//! Arithmetic, bitwise, comparison, and short-circuit operators.

use super::coerce::{reconcile, to_f64, to_i32, truthy};
use super::generate;
use crate::ast::Ast;
use crate::context::Context;
use crate::error::{CResult, CompileError};
use jz_core::{Kind, TaggedValue};

pub fn generate_operator(ctx: &mut Context, tag: &str, children: &[Ast], node: &Ast) -> CResult<TaggedValue> {
    match tag {
        "&&" | "||" => generate_short_circuit(ctx, tag, node),
        "??" => generate_nullish_coalesce(ctx, node),
        "!" => {
            let v = generate(ctx, node.child(0)?)?;
            let t = truthy(&v);
            Ok(TaggedValue::new(Kind::I32, format!("(i32.eqz {})", t.code)))
        }
        "-u" => {
            let v = to_f64(&generate(ctx, node.child(0)?)?);
            Ok(TaggedValue::new(Kind::F64, format!("(f64.neg {})", v.code)))
        }
        "~" => {
            let v = to_i32(&generate(ctx, node.child(0)?)?);
            Ok(TaggedValue::new(Kind::I32, format!("(i32.xor {} (i32.const -1))", v.code)))
        }
        "+" | "-" | "*" | "&" | "|" | "^" | "<<" | ">>" | ">>>" => {
            generate_binary_arith(ctx, tag, node)
        }
        "/" | "%" | "**" => generate_widening_arith(ctx, tag, node),
        "<" | ">" | "<=" | ">=" => generate_ordering(ctx, tag, node),
        "==" | "!=" | "===" | "!==" => generate_equality(ctx, tag, node),
        _ => Err(CompileError::type_error(format!("unsupported operator `{tag}`"))),
    }
}

/// The name a statically-known kind reports for `typeof`, or `None` when the
/// kind (plain `f64`) could be either a number or a NaN-boxed pointer at
/// runtime and a tag check is required instead - see
/// [`generate_equality`]'s fold of `typeof x === "<name>"`.
pub fn static_typeof_name(kind: Kind) -> Option<&'static str> {
    match kind {
        Kind::I32 => Some("boolean"),
        Kind::Ref => Some("undefined"),
        Kind::String => Some("string"),
        Kind::Closure => Some("function"),
        Kind::Array | Kind::RefArray | Kind::TypedArray | Kind::Object => Some("object"),
        Kind::F64 => None,
    }
}

pub fn generate_typeof(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let v = generate(ctx, node.child(0)?)?;
    ctx.used.memory = true;
    ctx.used.string = true;
    let intern = |ctx: &mut Context, name: &str| {
        let bits = ctx.strings.intern(name).bits as i64;
        format!("(f64.reinterpret_i64 (i64.const {bits}))")
    };

    if let Some(name) = static_typeof_name(v.kind) {
        let constant = intern(ctx, name);
        return Ok(TaggedValue::new(
            Kind::String,
            format!("(drop {}) {constant}", v.code),
        ));
    }

    // Static kind `f64`: the value may be a plain number or any NaN-boxed
    // pointer, so the name is picked by the runtime tag, the same test the
    // folded `typeof x === "<name>"` comparison uses.
    let number_s = intern(ctx, "number");
    let string_s = intern(ctx, "string");
    let function_s = intern(ctx, "function");
    let object_s = intern(ctx, "object");
    let tmp = ctx.fresh_local("tof", Kind::F64);
    Ok(TaggedValue::new(
        Kind::String,
        format!(
            "(local.set ${tmp} {}) \
             (if (result f64) (i32.eqz (call $rt_is_pointer (local.get ${tmp}))) \
               (then {number_s}) \
               (else (if (result f64) (call $rt_is_ptr_type (local.get ${tmp}) (i32.const {str_tag})) \
                 (then {string_s}) \
                 (else (if (result f64) (call $rt_is_ptr_type (local.get ${tmp}) (i32.const {fn_tag})) \
                   (then {function_s}) \
                   (else {object_s}))))))",
            v.code,
            str_tag = jz_core::PointerKind::String as i32,
            fn_tag = jz_core::PointerKind::Closure as i32,
        ),
    ))
}

fn generate_short_circuit(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    let lhs = generate(ctx, node.child(0)?)?;
    let rhs = generate(ctx, node.child(1)?)?;
    let (l, r) = reconcile(&lhs, &rhs);
    let result_kind = l.kind;
    let instr = if result_kind == Kind::I32 { "i32" } else { "f64" };
    // The left operand is evaluated exactly once, into a temp, then either
    // yielded or replaced by the right operand.
    let tmp = ctx.fresh_local("sc", result_kind);
    let saved = TaggedValue::new(result_kind, format!("(local.get ${tmp})"));
    let cond = truthy(&saved);
    let code = if tag == "&&" {
        format!(
            "(local.set ${tmp} {}) (if (result {instr}) {} (then {}) (else (local.get ${tmp})))",
            l.code, cond.code, r.code
        )
    } else {
        format!(
            "(local.set ${tmp} {}) (if (result {instr}) {} (then (local.get ${tmp})) (else {}))",
            l.code, cond.code, r.code
        )
    };
    Ok(TaggedValue::new(result_kind, code))
}

fn generate_nullish_coalesce(ctx: &mut Context, node: &Ast) -> CResult<TaggedValue> {
    let lhs = generate(ctx, node.child(0)?)?;
    let rhs = generate(ctx, node.child(1)?)?;
    if lhs.kind == Kind::Ref {
        // Statically always nullish: compile-time reduces to the right side.
        return Ok(rhs);
    }
    let (l, r) = reconcile(&lhs, &rhs);
    let instr = if l.kind == Kind::I32 { "i32" } else { "f64" };
    let tmp = ctx.fresh_local("nc", l.kind);
    let is_null = if l.kind == Kind::I32 {
        // An i32 is never the null sentinel; the temp still evaluates once.
        "(i32.const 0)".to_string()
    } else {
        format!("(f64.eq (local.get ${tmp}) (f64.const 0))")
    };
    Ok(TaggedValue::new(
        l.kind,
        format!(
            "(local.set ${tmp} {}) (if (result {instr}) {is_null} (then {}) (else (local.get ${tmp})))",
            l.code, r.code
        ),
    ))
}

fn generate_binary_arith(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    let lhs = generate(ctx, node.child(0)?)?;
    let rhs = generate(ctx, node.child(1)?)?;

    if tag == "+" && lhs.kind == Kind::String && rhs.kind == Kind::String {
        ctx.used.memory = true;
        ctx.used.string = true;
        return Ok(TaggedValue::new(Kind::String, format!("(call $rt_strcat {} {})", lhs.code, rhs.code)));
    }

    let (l, r) = reconcile(&lhs, &rhs);
    if l.kind == Kind::I32 {
        let instr = match tag {
            "+" => "i32.add",
            "-" => "i32.sub",
            "*" => "i32.mul",
            "&" => "i32.and",
            "|" => "i32.or",
            "^" => "i32.xor",
            "<<" => "i32.shl",
            ">>" => "i32.shr_s",
            ">>>" => "i32.shr_u",
            _ => unreachable!(),
        };
        return Ok(TaggedValue::new(Kind::I32, format!("({instr} {} {})", l.code, r.code)));
    }
    // f64 has no native bitwise ops; route bitwise/shift operators through i32.
    match tag {
        "+" => Ok(TaggedValue::new(Kind::F64, format!("(f64.add {} {})", l.code, r.code))),
        "-" => Ok(TaggedValue::new(Kind::F64, format!("(f64.sub {} {})", l.code, r.code))),
        "*" => Ok(TaggedValue::new(Kind::F64, format!("(f64.mul {} {})", l.code, r.code))),
        "&" | "|" | "^" | "<<" | ">>" | ">>>" => {
            let li = to_i32(&l);
            let ri = to_i32(&r);
            let instr = match tag {
                "&" => "i32.and",
                "|" => "i32.or",
                "^" => "i32.xor",
                "<<" => "i32.shl",
                ">>" => "i32.shr_s",
                ">>>" => "i32.shr_u",
                _ => unreachable!(),
            };
            Ok(TaggedValue::new(
                Kind::F64,
                format!("(f64.convert_i32_s ({instr} {} {}))", li.code, ri.code),
            ))
        }
        _ => unreachable!(),
    }
}

fn generate_widening_arith(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    let lhs = to_f64(&generate(ctx, node.child(0)?)?);
    let rhs = to_f64(&generate(ctx, node.child(1)?)?);
    match tag {
        "/" => Ok(TaggedValue::new(Kind::F64, format!("(f64.div {} {})", lhs.code, rhs.code))),
        "%" => {
            ctx.used.memory = true;
            Ok(TaggedValue::new(Kind::F64, format!("(call $rt_f64_rem {} {})", lhs.code, rhs.code)))
        }
        "**" => {
            ctx.used.memory = true;
            Ok(TaggedValue::new(Kind::F64, format!("(call $rt_f64_pow {} {})", lhs.code, rhs.code)))
        }
        _ => unreachable!(),
    }
}

fn generate_ordering(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    let lhs = to_f64(&generate(ctx, node.child(0)?)?);
    let rhs = to_f64(&generate(ctx, node.child(1)?)?);
    let instr = match tag {
        "<" => "f64.lt",
        ">" => "f64.gt",
        "<=" => "f64.le",
        ">=" => "f64.ge",
        _ => unreachable!(),
    };
    Ok(TaggedValue::new(Kind::I32, format!("({instr} {} {})", lhs.code, rhs.code)))
}

fn generate_equality(ctx: &mut Context, tag: &str, node: &Ast) -> CResult<TaggedValue> {
    let negate = matches!(tag, "!=" | "!==");
    if let Some(folded) = try_fold_typeof_comparison(ctx, node.child(0)?, node.child(1)?, negate)? {
        return Ok(folded);
    }
    if let Some(folded) = try_fold_typeof_comparison(ctx, node.child(1)?, node.child(0)?, negate)? {
        return Ok(folded);
    }

    let lhs = generate(ctx, node.child(0)?)?;
    let rhs = generate(ctx, node.child(1)?)?;

    // Two static i32s compare natively; anything f64-represented goes
    // through `f64_eq`, since two NaN-boxed pointers are never IEEE-`==`
    // equal even with identical bits.
    let cmp = if lhs.kind == Kind::I32 && rhs.kind == Kind::I32 {
        format!("(i32.eq {} {})", lhs.code, rhs.code)
    } else {
        ctx.used.memory = true;
        let (l, r) = (to_f64(&lhs), to_f64(&rhs));
        format!("(call $rt_f64_eq {} {})", l.code, r.code)
    };
    let code = if negate { format!("(i32.eqz {cmp})") } else { cmp };
    Ok(TaggedValue::new(Kind::I32, code))
}

/// Lower `typeof x === "<name>"` (in either operand order) to a constant-time
/// tag comparison instead of materialising a `typeof` string just to compare
/// it. Returns `None` when `maybe_typeof` is not a `typeof` node or
/// `maybe_name` is not a string literal, so the caller falls through to
/// general equality.
fn try_fold_typeof_comparison(ctx: &mut Context, maybe_typeof: &Ast, maybe_name: &Ast, negate: bool) -> CResult<Option<TaggedValue>> {
    let Some("typeof") = maybe_typeof.tag() else { return Ok(None) };
    let Some(name) = maybe_name.as_string() else { return Ok(None) };
    let operand = generate(ctx, maybe_typeof.child(0)?)?;

    let code = match static_typeof_name(operand.kind) {
        // Statically known: the comparison reduces to a constant.
        Some(actual) => format!("(i32.const {})", (actual == name) as i32),
        None => {
            ctx.used.memory = true;
            let tmp = ctx.fresh_local("tof", Kind::F64);
            let set = format!("(local.set ${tmp} {}) ", operand.code);
            let op = format!("(local.get ${tmp})");
            let test = match name {
                "number" => format!("(i32.eqz (call $rt_is_pointer {op}))"),
                "string" => format!(
                    "(call $rt_is_ptr_type {op} (i32.const {}))",
                    jz_core::PointerKind::String as i32
                ),
                "function" => format!(
                    "(call $rt_is_ptr_type {op} (i32.const {}))",
                    jz_core::PointerKind::Closure as i32
                ),
                "object" => format!(
                    "(i32.and (call $rt_is_pointer {op}) (i32.and (i32.ne (call $rt_ptr_type {op}) (i32.const {str_tag})) (i32.ne (call $rt_ptr_type {op}) (i32.const {fn_tag}))))",
                    str_tag = jz_core::PointerKind::String as i32,
                    fn_tag = jz_core::PointerKind::Closure as i32,
                ),
                // No runtime value reaching this ambiguous (f64) path can ever
                // report "boolean" or "undefined" - those kinds resolve statically.
                _ => "(i32.const 0)".to_string(),
            };
            format!("{set}{test}")
        }
    };
    let code = if negate { format!("(i32.eqz {code})") } else { code };
    Ok(Some(TaggedValue::new(Kind::I32, code)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn integer_addition_stays_i32() {
        let mut ctx = Context::new();
        let ast = parse(json!(["+", [null, true], [null, false]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::I32);
    }

    #[test]
    fn mixed_kind_addition_widens_to_f64() {
        let mut ctx = Context::new();
        let ast = parse(json!(["+", [null, true], [null, 1.0]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::F64);
    }

    #[test]
    fn division_always_widens_to_f64() {
        let mut ctx = Context::new();
        let ast = parse(json!(["/", [null, true], [null, true]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::F64);
    }

    #[test]
    fn string_concatenation_uses_strcat() {
        let mut ctx = Context::new();
        let ast = parse(json!(["+", [null, "a"], [null, "b"]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert_eq!(tv.kind, Kind::String);
        assert!(tv.code.contains("rt_strcat"));
    }

    #[test]
    fn equality_between_numbers_uses_bitwise_helper() {
        let mut ctx = Context::new();
        let ast = parse(json!(["==", [null, 1.0], [null, 1.0]]));
        let tv = generate(&mut ctx, &ast).unwrap();
        assert!(tv.code.contains("rt_f64_eq"));
    }

    #[test]
    fn bare_typeof_on_a_statically_known_kind_is_a_constant_string() {
        let mut ctx = Context::new();
        let tv = generate(&mut ctx, &parse(json!(["typeof", [null, true]]))).unwrap();
        assert_eq!(tv.kind, Kind::String);
        assert!(!tv.code.contains("rt_is_pointer"), "boolean needs no runtime tag check");
    }

    #[test]
    fn bare_typeof_on_an_ambiguous_f64_selects_the_name_at_runtime() {
        let mut ctx = Context::new();
        ctx.declare_var("x", Kind::F64, None, false);
        let tv = generate(&mut ctx, &parse(json!(["typeof", "x"]))).unwrap();
        assert_eq!(tv.kind, Kind::String);
        // All four outcomes are possible, so all four interned names appear.
        assert!(tv.code.contains("rt_is_pointer"));
        assert_eq!(tv.code.matches("rt_is_ptr_type").count(), 2);
        assert_eq!(tv.code.matches("f64.reinterpret_i64").count(), 4);
    }
}
