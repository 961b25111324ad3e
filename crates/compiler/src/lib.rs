//! jz compiler library
//!
//! Compiles a C-like scripting-language AST (JSON arrays, per the host
//! contract) into a WebAssembly text module over a NaN-boxed linear memory.
//!
//! Pipeline: [`ast`] validates the JSON shape; [`scope`] finds free and
//! hoisted variables ahead of generation; [`codegen`] walks the tree
//! producing tagged WAT fragments against a mutable [`context::Context`];
//! [`methods`] and [`regex`] cover the library surface; [`assemble`] reads
//! the finished context back out as one module.
//!
//! ```rust
//! use serde_json::json;
//!
//! let ast = json!([";", ["let", "x", [null, 2.0]], ["*", "x", [null, 3.0]]]);
//! let out = jzc::compile(&ast, &jzc::CompilerConfig::new()).unwrap();
//! assert!(out.wat.contains("(export \"main\""));
//! ```

pub mod assemble;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod methods;
pub mod regex;
pub mod scope;
pub mod stdlib_embed;

pub use ast::Ast;
pub use config::CompilerConfig;
pub use context::Context;
pub use error::{CompileError, ErrorCode, Warning};

/// A finished compilation: the module text plus any non-fatal diagnostics.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub wat: String,
    pub warnings: Vec<Warning>,
}

/// Compile a program AST to a WAT module.
///
/// The first error aborts the compilation and propagates here; there is no
/// partial-module recovery.
pub fn compile(ast_json: &serde_json::Value, options: &CompilerConfig) -> Result<CompileOutput, CompileError> {
    let ast = Ast::from_json(ast_json)?;
    let mut ctx = Context::new();

    if options.gc {
        ctx.warn(
            ErrorCode::TypeError,
            "the reference-counted GC memory model is not implemented; falling back to NaN-boxed linear memory",
        );
    }
    // The module contract always exports `_memory`/`_alloc`, so the memory
    // primitives are live in every compilation.
    ctx.used.memory = true;

    let main_wat = codegen::compile_top_level(&mut ctx, &ast)?;
    let wat = assemble::assemble(&ctx, &main_wat)?;
    Ok(CompileOutput {
        wat,
        warnings: ctx.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile_ok(v: serde_json::Value) -> CompileOutput {
        compile(&v, &CompilerConfig::new()).expect("program should compile")
    }

    #[test]
    fn arithmetic_program_compiles_to_a_module_returning_f64() {
        // let x = 2; let y = 3; x * y + 1
        let out = compile_ok(json!([
            ";",
            ["let", "x", [null, 2.0]],
            ["let", "y", [null, 3.0]],
            ["+", ["*", "x", "y"], [null, 1.0]]
        ]));
        assert!(out.wat.starts_with("(module"));
        assert!(out.wat.contains("(func $__main (result f64)"));
        assert!(out.wat.contains("(export \"main\" (func $__main))"));
        assert!(out.wat.contains("(export \"_memory\" (memory $mem))"));
        assert!(out.wat.contains("(export \"_alloc\""));
        assert!(out.wat.contains("f64.mul"));
    }

    #[test]
    fn static_array_program_emits_a_data_segment_with_length_header() {
        // let a = [1,2,3]; a[1] = 20; a[0] + a[1] + a[2]
        let out = compile_ok(json!([
            ";",
            ["let", "a", ["array", [null, 1.0], [null, 2.0], [null, 3.0]]],
            ["=", ["[]", "a", [null, 1.0]], [null, 20.0]],
            ["+", ["+", ["[]", "a", [null, 0.0]], ["[]", "a", [null, 1.0]]], ["[]", "a", [null, 2.0]]]
        ]));
        // The segment begins with the 8-byte length header at the first
        // static-data address, above the typed arena's 22-bit horizon.
        assert!(out.wat.contains("(data (i32.const 4194304)"));
        assert!(out.wat.contains("rt_arr_set"));
        assert!(out.wat.contains("rt_arr_get"));
    }

    #[test]
    fn counter_closure_program_shares_the_environment() {
        // let counter = () => { let n = 0; return () => (n = n+1, n) };
        // let c = counter(); c(); c(); c()
        let out = compile_ok(json!([
            ";",
            ["let", "counter", ["=>", ["{}",
                ["let", "n", [null, 0.0]],
                ["return", ["=>", [";", ["=", "n", ["+", "n", [null, 1.0]]], "n"]]]
            ]]],
            ["let", "c", ["call", "counter"]],
            ["call", "c"],
            ["call", "c"],
            ["call", "c"]
        ]));
        // The inner arrow writes `n` through its received environment, which
        // is the creating activation's own environment, not a copy.
        assert!(out.wat.contains("local.get $_penv"));
        assert!(out.wat.contains("local $_env i32"));
        assert!(out.wat.contains("call_indirect"));
    }

    #[test]
    fn object_program_resolves_members_through_the_schema() {
        // let o = {x: 10, y: 20}; o.x + o.y
        let out = compile_ok(json!([
            ";",
            ["let", "o", ["object", ["prop", "x", [null, 10.0]], ["prop", "y", [null, 20.0]]]],
            ["+", [".", "o", [null, "x"]], [".", "o", [null, "y"]]]
        ]));
        assert!(out.wat.contains("jz:sig"));
        assert!(out.wat.contains("\\\"schemas\\\"") || out.wat.contains("schemas"));
    }

    #[test]
    fn regex_replace_program_includes_the_pattern_pair_and_driver() {
        // "abcabc".replace(/b/g, "X")
        let out = compile_ok(json!([
            "method",
            [null, "abcabc"],
            "replace",
            ["regex", [null, "b"], [null, "g"]],
            [null, "X"]
        ]));
        assert!(out.wat.contains("func $regex_0_exec"));
        assert!(out.wat.contains("rt_re_replace_all"));
        assert!(out.wat.contains("(type $regex_fn"));
        assert!(out.wat.contains("(elem (i32.const 0)"));
    }

    #[test]
    fn recursive_closure_program_goes_through_the_function_table() {
        // let f = n => n < 2 ? n : f(n-1) + f(n-2); f(10)
        let out = compile_ok(json!([
            ";",
            ["let", "f", ["=>", "n",
                ["?:", ["<", "n", [null, 2.0]],
                    "n",
                    ["+", ["call", "f", ["-", "n", [null, 1.0]]], ["call", "f", ["-", "n", [null, 2.0]]]]]]],
            ["call", "f", [null, 10.0]]
        ]));
        assert!(out.wat.contains("call_indirect"));
        assert!(out.wat.contains("(table $fns"));
        assert!(out.wat.contains("(type $closure_fn"));
    }

    #[test]
    fn gc_config_warns_and_falls_back() {
        let out = compile(&json!([null, 1.0]), &CompilerConfig::default()).unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].message.contains("NaN-boxed"));
    }

    #[test]
    fn unknown_identifier_aborts_compilation() {
        let err = compile(&json!(["+", "ghost", [null, 1.0]]), &CompilerConfig::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownId);
    }

    #[test]
    fn exported_user_functions_appear_in_the_signature_section() {
        let out = compile_ok(json!([
            ";",
            ["function", "double", "x", ["*", "x", [null, 2.0]]],
            ["call", "double", [null, 4.0]]
        ]));
        assert!(out.wat.contains("(export \"double\" (func $double))"));
        assert!(out.wat.contains("double"));
    }
}
