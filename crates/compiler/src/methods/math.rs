//! `Math.*` intrinsics: lowered to native f64 instructions where WASM has
//! them, to the `pow` host import otherwise.

use crate::ast::Ast;
use crate::codegen::coerce::to_f64;
use crate::codegen::generate as generate_expr;
use crate::context::Context;
use crate::error::{CResult, CompileError};
use jz_core::{Kind, TaggedValue};

pub fn generate(ctx: &mut Context, name: &str, args: &[Ast]) -> CResult<TaggedValue> {
    let unary = |ctx: &mut Context, args: &[Ast], instr: &str| -> CResult<TaggedValue> {
        if args.len() != 1 {
            return Err(CompileError::arity(&format!("Math.{name}"), 1, args.len()));
        }
        let v = to_f64(&generate_expr(ctx, &args[0])?);
        Ok(TaggedValue::new(Kind::F64, format!("({instr} {})", v.code)))
    };

    match name {
        "floor" => unary(ctx, args, "f64.floor"),
        "ceil" => unary(ctx, args, "f64.ceil"),
        "trunc" => unary(ctx, args, "f64.trunc"),
        "sqrt" => unary(ctx, args, "f64.sqrt"),
        "abs" => unary(ctx, args, "f64.abs"),
        "sign" => {
            if args.len() != 1 {
                return Err(CompileError::arity("Math.sign", 1, args.len()));
            }
            let v = to_f64(&generate_expr(ctx, &args[0])?);
            let tmp = ctx.fresh_local("sgn", Kind::F64);
            Ok(TaggedValue::new(
                Kind::F64,
                format!(
                    "(local.set ${tmp} {}) (if (result f64) (f64.gt (local.get ${tmp}) (f64.const 0)) \
                       (then (f64.const 1)) \
                       (else (if (result f64) (f64.lt (local.get ${tmp}) (f64.const 0)) (then (f64.const -1)) (else (local.get ${tmp})))))",
                    v.code
                ),
            ))
        }
        "round" => {
            // Round-half-up, matching the source language, not f64.nearest's
            // round-half-even.
            if args.len() != 1 {
                return Err(CompileError::arity("Math.round", 1, args.len()));
            }
            let v = to_f64(&generate_expr(ctx, &args[0])?);
            Ok(TaggedValue::new(
                Kind::F64,
                format!("(f64.floor (f64.add {} (f64.const 0.5)))", v.code),
            ))
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(CompileError::arity(&format!("Math.{name}"), 1, 0));
            }
            let instr = if name == "min" { "f64.min" } else { "f64.max" };
            let mut acc = to_f64(&generate_expr(ctx, &args[0])?).code;
            for a in &args[1..] {
                let v = to_f64(&generate_expr(ctx, a)?);
                acc = format!("({instr} {acc} {})", v.code);
            }
            Ok(TaggedValue::new(Kind::F64, acc))
        }
        "pow" => {
            if args.len() != 2 {
                return Err(CompileError::arity("Math.pow", 2, args.len()));
            }
            ctx.used.memory = true;
            let a = to_f64(&generate_expr(ctx, &args[0])?);
            let b = to_f64(&generate_expr(ctx, &args[1])?);
            Ok(TaggedValue::new(Kind::F64, format!("(call $rt_f64_pow {} {})", a.code, b.code)))
        }
        _ => Err(CompileError::unknown_method("Math", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arg(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn min_folds_over_all_arguments() {
        let mut ctx = Context::new();
        let args = vec![arg(json!([null, 1.0])), arg(json!([null, 2.0])), arg(json!([null, 3.0]))];
        let tv = generate(&mut ctx, "min", &args).unwrap();
        assert_eq!(tv.code.matches("f64.min").count(), 2);
    }

    #[test]
    fn unknown_math_intrinsic_is_rejected() {
        let mut ctx = Context::new();
        let err = generate(&mut ctx, "frob", &[]).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnknownMethod);
    }
}
