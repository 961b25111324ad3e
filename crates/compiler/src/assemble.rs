//! The module assembler: linearises everything the generator left in
//! the context into one WAT module, in a fixed field order - imports, type
//! declarations, the function table and its elem segment, a memory sized
//! from the heap/typed-arena split, data segments for interned strings and
//! static arrays/objects, globals, the reachable subset of the embedded
//! stdlib, per-regex function pairs, user functions with their trampolines,
//! the entry point, exports, and the `jz:sig` custom section for host-side
//! interop.
//!
//! Stdlib inclusion is per-function: starting from every `$rt_*` name the
//! generated code references, the transitive call closure over the embedded
//! helper sources decides what is emitted. Unreferenced helpers are dropped,
//! not merely left as dead code.

use crate::context::{Context, STATIC_REGION_BASE, STRING_REGION_BASE, TYPED_REGION_BASE};
use crate::error::{CResult, CompileError};
use crate::stdlib_embed;
use jz_core::Kind;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

/// Bytes reserved for the general bump heap above the static data segments.
const HEAP_BUDGET: u32 = 16 * 1024 * 1024;
const PAGE: u32 = 65536;

/// Helpers the module exports unconditionally (`_alloc` and friends), kept
/// alive even when the program itself never allocates.
const EXPORT_ROOTS: [&str; 2] = ["rt_alloc_array", "rt_bump"];

pub fn assemble(ctx: &Context, main_wat: &str) -> CResult<String> {
    // Two-level dead-code elimination: the used-feature flags select which
    // stdlib modules are even considered (with their declared dependencies),
    // then the per-function call closure keeps only helpers actually reached.
    let modules = stdlib_embed::transitive_closure(&ctx.used.stdlib_modules());
    let stdlib = StdlibIndex::build(&modules);

    // Everything generated outside the stdlib, for root scanning.
    let mut generated = String::new();
    generated.push_str(main_wat);
    for name in &ctx.function_order {
        let def = &ctx.functions[name];
        if let Some(w) = &def.wat {
            generated.push_str(w);
        }
        if let Some(t) = &def.trampoline {
            generated.push_str(t);
        }
    }
    for re in &ctx.regexes {
        generated.push_str(&re.wat);
    }

    let mut roots: Vec<String> = referenced_helpers(&generated);
    for r in EXPORT_ROOTS {
        roots.push(r.to_string());
    }
    // The arena reset is reached only through its export.
    if generated.contains("$rt_typed") {
        roots.push("rt_reset_typed_arrays".to_string());
    }
    let reachable = stdlib.closure(&roots);

    let mut uses_closure_ty = generated.contains("$closure_fn");
    let mut uses_regex_ty = generated.contains("$regex_fn");
    let mut uses_regex_exec_ty = generated.contains("$regex_exec_fn");
    let mut uses_pow_import = false;
    let mut uses_typed_globals = false;
    for name in &reachable {
        let body = &stdlib.funcs[name].text;
        uses_closure_ty |= body.contains("$closure_fn");
        uses_regex_ty |= body.contains("$regex_fn");
        uses_regex_exec_ty |= body.contains("$regex_exec_fn");
        uses_pow_import |= body.contains("$env_pow");
        uses_typed_globals |= body.contains("$rt_typed_cursor") || body.contains("$rt_typed_base");
    }

    // -- memory layout ------------------------------------------------------

    let strings_end = ctx
        .strings
        .heap_data
        .iter()
        .map(|(off, bytes)| off + bytes.len() as u32)
        .max()
        .unwrap_or(STRING_REGION_BASE);
    if strings_end > TYPED_REGION_BASE {
        return Err(CompileError::type_error(format!(
            "interned string data ({strings_end} bytes) overflows the {TYPED_REGION_BASE}-byte string region"
        )));
    }
    // The typed arena occupies [TYPED_REGION_BASE, STATIC_REGION_BASE): every
    // address it hands out fits the pointer's 22-bit offset field. Static
    // data and the heap sit above it, where only the 31-bit general offset
    // applies.
    let heap_start = ctx.static_end();
    let pages = (heap_start + HEAP_BUDGET).div_ceil(PAGE);

    // -- emission -----------------------------------------------------------

    let mut out = String::new();
    out.push_str("(module\n");

    if uses_pow_import {
        out.push_str("  (import \"env\" \"pow\" (func $env_pow (param f64 f64) (result f64)))\n");
    }

    if uses_closure_ty {
        out.push_str("  (type $closure_fn (func (param i32 f64) (result f64)))\n");
    }
    if uses_regex_ty {
        out.push_str("  (type $regex_fn (func (param i32 i32 i32) (result i32)))\n");
    }
    if uses_regex_exec_ty {
        out.push_str("  (type $regex_exec_fn (func (param i32 i32 i32 i32) (result i32)))\n");
    }

    if !ctx.func_table.is_empty() {
        writeln!(out, "  (table $fns {} funcref)", ctx.func_table.len())?;
        let entries: Vec<String> = ctx.func_table.iter().map(|n| format!("${n}")).collect();
        writeln!(out, "  (elem (i32.const 0) {})", entries.join(" "))?;
    } else if uses_closure_ty || uses_regex_ty {
        // call_indirect validates against a table even if nothing was boxed.
        out.push_str("  (table $fns 1 funcref)\n");
    }

    writeln!(out, "  (memory $mem {pages})")?;

    for (offset, bytes) in &ctx.strings.heap_data {
        writeln!(out, "  (data (i32.const {offset}) \"{}\")", escape_bytes(bytes))?;
    }
    for arr in &ctx.static_arrays {
        let mut bytes = Vec::with_capacity(8 + arr.elements.len() * 8);
        bytes.extend_from_slice(&(arr.elements.len() as f64).to_le_bytes());
        for e in &arr.elements {
            bytes.extend_from_slice(&e.to_le_bytes());
        }
        // The pointer offset points past the 8-byte length header.
        writeln!(out, "  (data (i32.const {}) \"{}\")", arr.offset - 8, escape_bytes(&bytes))?;
    }
    for obj in &ctx.static_objects {
        let mut bytes = Vec::with_capacity(obj.elements.len() * 8);
        for e in &obj.elements {
            bytes.extend_from_slice(&e.to_le_bytes());
        }
        writeln!(out, "  (data (i32.const {}) \"{}\")", obj.offset, escape_bytes(&bytes))?;
    }

    writeln!(out, "  (global $rt_heap_cursor (mut i64) (i64.const {heap_start}))")?;
    if uses_typed_globals {
        out.push_str("  (global $rt_typed_cursor (mut i32) (i32.const 0))\n");
        writeln!(out, "  (global $rt_typed_base (mut i32) (i32.const {TYPED_REGION_BASE}))")?;
    }
    for name in &ctx.global_order {
        let def = &ctx.globals[name];
        let ty = if def.kind == Kind::I32 { "i32" } else { "f64" };
        writeln!(out, "  (global ${name} (mut {ty}) {})", def.init)?;
    }

    for name in &reachable {
        writeln!(out, "  {}", stdlib.funcs[name].text)?;
    }

    for re in &ctx.regexes {
        writeln!(out, "  {}", re.wat)?;
    }

    for name in &ctx.function_order {
        let def = &ctx.functions[name];
        if let Some(w) = &def.wat {
            writeln!(out, "  {w}")?;
        }
        if let Some(t) = &def.trampoline {
            writeln!(out, "  {t}")?;
        }
    }

    writeln!(out, "  {main_wat}")?;

    out.push_str("  (export \"main\" (func $__main))\n");
    out.push_str("  (export \"_memory\" (memory $mem))\n");
    out.push_str("  (export \"_alloc\" (func $rt_alloc_array))\n");
    if reachable.contains(&"rt_reset_typed_arrays".to_string()) {
        out.push_str("  (export \"_resetTypedArrays\" (func $rt_reset_typed_arrays))\n");
    }
    for name in &ctx.function_order {
        if name.starts_with("_fn") {
            continue;
        }
        if ctx.functions[name].wat.is_some() {
            writeln!(out, "  (export \"{name}\" (func ${name}))")?;
        }
    }

    writeln!(out, "  (@custom \"jz:sig\" \"{}\")", escape_str(&signature_json(ctx)))?;
    out.push_str(")\n");
    Ok(out)
}

/// The `jz:sig` payload: per-exported-function pointer info plus the schema
/// registry, so a host can unbox array arguments and results.
fn signature_json(ctx: &Context) -> String {
    let mut functions = serde_json::Map::new();
    for name in &ctx.function_order {
        if name.starts_with("_fn") {
            continue;
        }
        let def = &ctx.functions[name];
        if def.wat.is_none() {
            continue;
        }
        let array_params: Vec<usize> = def
            .params
            .iter()
            .enumerate()
            .filter(|(_, (_, k))| matches!(k, Kind::Array | Kind::RefArray))
            .map(|(i, _)| i)
            .collect();
        functions.insert(
            name.clone(),
            serde_json::json!({
                "arrayParams": array_params,
                "returnsArray": matches!(def.return_kind, Kind::Array | Kind::RefArray),
            }),
        );
    }
    let mut schemas = serde_json::Map::new();
    for (id, props) in ctx.schemas.all() {
        schemas.insert(id.to_string(), serde_json::json!(props));
    }
    serde_json::json!({ "functions": functions, "schemas": schemas }).to_string()
}

fn escape_str(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:02x}");
            }
        }
    }
    out
}

/// Every `$rt_*` or `$regex_*` name the text mentions.
fn referenced_helpers(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while let Some(off) = text[i..].find("$rt_") {
        let start = i + off + 1;
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        out.push(text[start..end].to_string());
        i = end;
    }
    out
}

struct StdlibFunc {
    text: String,
    calls: Vec<String>,
}

struct StdlibIndex {
    funcs: HashMap<String, StdlibFunc>,
    order: Vec<String>,
}

impl StdlibIndex {
    fn build(modules: &[&str]) -> StdlibIndex {
        let mut funcs = HashMap::new();
        let mut order = Vec::new();
        for module in modules {
            let src = stdlib_embed::get_stdlib(module).expect("embedded stdlib module");
            for (name, text) in split_functions(src) {
                let calls = referenced_helpers(&text).into_iter().filter(|c| c != &name).collect();
                order.push(name.clone());
                funcs.insert(name, StdlibFunc { text, calls });
            }
        }
        StdlibIndex { funcs, order }
    }

    /// The transitive call closure of `roots`, in stable embedding order.
    fn closure(&self, roots: &[String]) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = roots
            .iter()
            .map(String::as_str)
            .filter(|n| self.funcs.contains_key(*n))
            .collect();
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            for callee in &self.funcs[name].calls {
                if self.funcs.contains_key(callee) && !seen.contains(callee.as_str()) {
                    stack.push(callee);
                }
            }
        }
        self.order.iter().filter(|n| seen.contains(n.as_str())).cloned().collect()
    }
}

/// Split a stdlib source into its top-level `(func $name ...)` items,
/// dropping comments. Only whole functions live in these files; the globals
/// they use are declared by the assembler.
fn split_functions(src: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current: Option<(String, String)> = None;
    let mut depth: i32 = 0;
    for line in src.lines() {
        let code = match line.find(";;") {
            Some(i) => &line[..i],
            None => line,
        };
        let trimmed = code.trim();
        if trimmed.is_empty() {
            continue;
        }
        if depth == 0 && trimmed.starts_with("(func $") {
            let name_end = trimmed[7..]
                .find(|c: char| c.is_whitespace() || c == ')')
                .map(|i| i + 7)
                .unwrap_or(trimmed.len());
            let name = trimmed[7..name_end].to_string();
            current = Some((name, String::new()));
        }
        if let Some((_, text)) = current.as_mut() {
            text.push_str(trimmed);
            text.push(' ');
        }
        depth += trimmed.matches('(').count() as i32;
        depth -= trimmed.matches(')').count() as i32;
        if depth == 0 {
            if let Some((name, text)) = current.take() {
                out.push((name, text.trim_end().to_string()));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_functions_finds_every_memory_helper() {
        let fns = split_functions(stdlib_embed::get_stdlib("memory").unwrap());
        let names: Vec<&str> = fns.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"rt_mkptr"));
        assert!(names.contains(&"rt_alloc_array"));
        assert!(names.contains(&"rt_realloc"));
    }

    #[test]
    fn closure_pulls_in_transitive_callees() {
        let idx = StdlibIndex::build(&["memory", "string", "mapset"]);
        let reachable = idx.closure(&["rt_strcat".to_string()]);
        // strcat spills SSO strings and bumps the heap.
        assert!(reachable.contains(&"rt_sso_to_heap".to_string()));
        assert!(reachable.contains(&"rt_bump".to_string()));
        // Nothing drags in the map helpers.
        assert!(!reachable.contains(&"rt_map_set".to_string()));
    }

    #[test]
    fn escape_bytes_hex_escapes_non_printables() {
        assert_eq!(escape_bytes(&[0x41, 0x00, 0x22]), "A\\00\\\"");
    }

    #[test]
    fn referenced_helpers_scans_call_sites() {
        let refs = referenced_helpers("(call $rt_strcat (call $rt_str_len x))");
        assert_eq!(refs, vec!["rt_strcat".to_string(), "rt_str_len".to_string()]);
    }
}
