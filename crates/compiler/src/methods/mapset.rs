//! Map/Set methods: thin delegations to the open-addressed hash-table
//! helpers in the stdlib. Keys compare with bitwise `rt_f64_eq`, so pointer
//! keys (strings, objects) compare by identity.

use super::saved;
use crate::ast::Ast;
use crate::codegen::coerce::to_f64;
use crate::codegen::generate;
use crate::context::Context;
use crate::error::{CResult, CompileError};
use jz_core::{Kind, TaggedValue};

pub fn map_method(ctx: &mut Context, recv: &TaggedValue, name: &str, args: &[Ast]) -> CResult<Option<TaggedValue>> {
    ctx.used.memory = true;
    ctx.used.mapset = true;
    match name {
        "has" => {
            let key = key_arg(ctx, "has", args)?;
            Ok(Some(TaggedValue::new(
                Kind::I32,
                format!("(call $rt_map_has {} {})", recv.code, key.code),
            )))
        }
        "get" => {
            let key = key_arg(ctx, "get", args)?;
            Ok(Some(TaggedValue::new(
                Kind::F64,
                format!("(call $rt_map_get {} {})", recv.code, key.code),
            )))
        }
        "set" => {
            if args.len() != 2 {
                return Err(CompileError::arity("set", 2, args.len()));
            }
            let key = to_f64(&generate(ctx, &args[0])?);
            let val = to_f64(&generate(ctx, &args[1])?);
            let (set_r, r) = saved(ctx, "map", recv);
            Ok(Some(TaggedValue {
                kind: Kind::Object,
                code: format!("{set_r} (call $rt_map_set {r} {} {}) {r}", key.code, val.code),
                schema: recv.schema.clone(),
            }))
        }
        "delete" => {
            let key = key_arg(ctx, "delete", args)?;
            Ok(Some(TaggedValue::new(
                Kind::I32,
                format!("(call $rt_map_delete {} {})", recv.code, key.code),
            )))
        }
        "clear" => {
            if !args.is_empty() {
                return Err(CompileError::arity("clear", 0, args.len()));
            }
            Ok(Some(TaggedValue::new(
                Kind::F64,
                format!("(call $rt_map_clear {}) (f64.const 0)", recv.code),
            )))
        }
        _ => Ok(None),
    }
}

pub fn set_method(ctx: &mut Context, recv: &TaggedValue, name: &str, args: &[Ast]) -> CResult<Option<TaggedValue>> {
    ctx.used.memory = true;
    ctx.used.mapset = true;
    match name {
        // A Set is a Map whose value slot repeats the key.
        "add" => {
            let key = key_arg(ctx, "add", args)?;
            let (set_k, k) = saved(ctx, "setkey", &key);
            let (set_r, r) = saved(ctx, "set", recv);
            Ok(Some(TaggedValue {
                kind: Kind::Object,
                code: format!("{set_r} {set_k} (call $rt_map_set {r} {k} {k}) {r}"),
                schema: recv.schema.clone(),
            }))
        }
        "has" => {
            let key = key_arg(ctx, "has", args)?;
            Ok(Some(TaggedValue::new(
                Kind::I32,
                format!("(call $rt_map_has {} {})", recv.code, key.code),
            )))
        }
        "delete" => {
            let key = key_arg(ctx, "delete", args)?;
            Ok(Some(TaggedValue::new(
                Kind::I32,
                format!("(call $rt_map_delete {} {})", recv.code, key.code),
            )))
        }
        "clear" => {
            if !args.is_empty() {
                return Err(CompileError::arity("clear", 0, args.len()));
            }
            Ok(Some(TaggedValue::new(
                Kind::F64,
                format!("(call $rt_map_clear {}) (f64.const 0)", recv.code),
            )))
        }
        _ => Ok(None),
    }
}

fn key_arg(ctx: &mut Context, method: &str, args: &[Ast]) -> CResult<TaggedValue> {
    if args.len() != 1 {
        return Err(CompileError::arity(method, 1, args.len()));
    }
    Ok(to_f64(&generate(ctx, &args[0])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(ctx: &mut Context, v: serde_json::Value) -> CResult<TaggedValue> {
        crate::codegen::generate(ctx, &Ast::from_json(&v).unwrap())
    }

    #[test]
    fn map_get_and_set_route_to_the_hash_helpers() {
        let mut ctx = Context::new();
        call(&mut ctx, json!(["let", "m", ["new", "Map"]])).unwrap();
        let set = call(&mut ctx, json!(["method", "m", "set", [null, 1.0], [null, 2.0]])).unwrap();
        assert!(set.code.contains("rt_map_set"));
        let get = call(&mut ctx, json!(["method", "m", "get", [null, 1.0]])).unwrap();
        assert!(get.code.contains("rt_map_get"));
    }

    #[test]
    fn set_add_stores_the_key_as_its_own_value() {
        let mut ctx = Context::new();
        call(&mut ctx, json!(["let", "s", ["new", "Set"]])).unwrap();
        let tv = call(&mut ctx, json!(["method", "s", "add", [null, 3.0]])).unwrap();
        assert!(tv.code.contains("rt_map_set"));
        assert!(ctx.used.mapset);
    }
}
