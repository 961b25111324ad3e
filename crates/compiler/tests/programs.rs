//! End-to-end compilation of whole programs through the public API,
//! asserting over the emitted module text.

use serde_json::json;

fn compile(v: serde_json::Value) -> jzc::CompileOutput {
    jzc::compile(&v, &jzc::CompilerConfig::new()).expect("program should compile")
}

#[test]
fn module_shape_has_the_assembler_field_order() {
    let out = compile(json!([
        ";",
        ["let", "s", [null, "a long enough string to hit the heap"]],
        ["method", "s", "indexOf", [null, "heap"]]
    ]));
    let wat = &out.wat;
    let memory = wat.find("(memory $mem").expect("memory");
    let data = wat.find("(data (i32.const").expect("data segment");
    let global = wat.find("(global $rt_heap_cursor").expect("heap cursor global");
    let main = wat.find("(func $__main").expect("entry point");
    let exports = wat.find("(export \"main\"").expect("main export");
    let custom = wat.find("(@custom \"jz:sig\"").expect("signature section");
    assert!(memory < data, "memory precedes data segments");
    assert!(data < global, "data precedes globals");
    assert!(global < main, "globals precede functions");
    assert!(main < exports, "entry point precedes exports");
    assert!(exports < custom, "custom section is last");
}

#[test]
fn map_over_an_array_boxes_the_callback_once() {
    // [1,2,3].map(x => x*2)
    let out = compile(json!([
        "method",
        ["array", [null, 1.0], [null, 2.0], [null, 3.0]],
        "map",
        ["=>", "x", ["*", "x", [null, 2.0]]]
    ]));
    assert!(out.wat.contains("(elem (i32.const 0) $_fn"));
    assert!(out.wat.contains("rt_call3"));
    // The arrow body itself compiles to a real function.
    assert!(out.wat.contains("(param $x f64)"));
}

#[test]
fn reduce_with_seed_compiles_the_boundary_example() {
    // [1,2,3].reduce((a,b) => a+b, 10)
    let out = compile(json!([
        "method",
        ["array", [null, 1.0], [null, 2.0], [null, 3.0]],
        "reduce",
        ["=>", "a", "b", ["+", "a", "b"]],
        [null, 10.0]
    ]));
    assert!(out.wat.contains("rt_call4"));
    assert!(out.wat.contains("f64.const 10"));
}

#[test]
fn negative_string_slice_goes_through_the_normaliser() {
    // "hello".slice(-3)
    let out = compile(json!(["method", [null, "hello"], "slice", [null, -3.0]]));
    assert!(out.wat.contains("rt_str_slice"));
    assert!(out.wat.contains("f64.const -3"));
}

#[test]
fn push_program_includes_tier_growth_machinery() {
    let out = compile(json!([
        ";",
        ["let", "n", [null, 1.0]],
        ["let", "a", ["array", "n"]],
        ["method", "a", "push", [null, 9.0]]
    ]));
    assert!(out.wat.contains("rt_cap_for_len"));
    assert!(out.wat.contains("rt_realloc"));
}

#[test]
fn distinct_constant_objects_get_distinct_static_offsets() {
    let out = compile(json!([
        ";",
        ["let", "p", ["object", ["prop", "x", [null, 1.0]], ["prop", "y", [null, 2.0]]]],
        ["let", "q", ["object", ["prop", "x", [null, 1.0]], ["prop", "y", [null, 2.0]]]],
        ["+", [".", "p", [null, "x"]], [".", "q", [null, "y"]]]
    ]));
    // Same schema id for both, but two data segments at different offsets.
    let first = out.wat.find("(data (i32.const 4194304)").expect("first object segment");
    let second = out.wat.find("(data (i32.const 4194320)").expect("second object segment");
    assert_ne!(first, second);
    assert!(out.wat.contains("(i64.const 1)"), "both literals share schema id 1");
}

#[test]
fn string_replace_with_regex_and_with_string_differ() {
    let by_string = compile(json!([
        "method", [null, "abcabc"], "replace", [null, "b"], [null, "X"]
    ]));
    assert!(by_string.wat.contains("rt_str_replace_once"));
    assert!(!by_string.wat.contains("func $regex_0"));

    let by_regex = compile(json!([
        "method", [null, "abcabc"], "replace", ["regex", [null, "b"], [null, "g"]], [null, "X"]
    ]));
    assert!(by_regex.wat.contains("rt_re_replace_all"));
    assert!(by_regex.wat.contains("func $regex_0_exec"));
}

#[test]
fn unused_stdlib_families_are_dropped() {
    let out = compile(json!(["+", [null, 1.0], [null, 2.0]]));
    // The allocator chain is exported and stays; hash-map and typed-array
    // helpers have no reference and go away.
    assert!(out.wat.contains("func $rt_alloc_array"));
    assert!(!out.wat.contains("func $rt_map_set"));
    assert!(!out.wat.contains("func $rt_typed_get"));
    assert!(!out.wat.contains("func $rt_re_find"));
}

#[test]
fn typed_array_program_gets_its_arena_and_reset_export() {
    let out = compile(json!([
        ";",
        ["let", "t", ["new", "Float64Array", [null, 16.0]]],
        ["=", ["[]", "t", [null, 0.0]], [null, 1.5]],
        ["[]", "t", [null, 0.0]]
    ]));
    // The arena must sit inside the low 4 MiB a 22-bit pointer offset can
    // address; the static segments start where it ends.
    assert!(out.wat.contains("(global $rt_typed_base (mut i32) (i32.const 65536))"));
    assert!(out.wat.contains("(export \"_resetTypedArrays\""));
    assert!(out.wat.contains("rt_typed_set") || out.wat.contains("rt_typed_get"));
}

#[test]
fn for_of_program_iterates_elements_with_scoped_binding() {
    let out = compile(json!([
        ";",
        ["let", "total", [null, 0.0]],
        ["for-of", "x", ["array", [null, 1.0], [null, 2.0], [null, 3.0]], ["+=", "total", "x"]],
        "total"
    ]));
    assert!(out.wat.contains("$forof_loop"));
    assert!(out.wat.contains("rt_arr_get"));
}

#[test]
fn for_in_program_iterates_interned_schema_keys() {
    let out = compile(json!([
        ";",
        ["let", "o", ["object", ["prop", "x", [null, 1.0]], ["prop", "y", [null, 2.0]]]],
        ["let", "last", [null, ""]],
        ["for-in", "key", "o", ["=", "last", "key"]],
        "last"
    ]));
    assert!(out.wat.contains("$forin_loop"));
}

#[test]
fn break_outside_a_loop_is_rejected_with_shape_information() {
    let err = jzc::compile(&json!(["break"]), &jzc::CompilerConfig::new()).unwrap_err();
    assert_eq!(err.code, jzc::ErrorCode::TypeError);
    assert!(err.message.contains("break"));
}

#[test]
fn const_reassignment_is_rejected() {
    let err = jzc::compile(
        &json!([";", ["const", "k", [null, 1.0]], ["=", "k", [null, 2.0]]]),
        &jzc::CompilerConfig::new(),
    )
    .unwrap_err();
    assert_eq!(err.code, jzc::ErrorCode::ConstReassign);
}

#[test]
fn switch_with_fallthrough_and_break_compiles() {
    let out = compile(json!([
        ";",
        ["let", "x", [null, 2.0]],
        ["let", "y", [null, 0.0]],
        ["switch", "x",
            ["case", [null, 1.0], ["=", "y", [null, 10.0]], ["break"]],
            ["case", [null, 2.0], ["=", "y", [null, 20.0]]],
            ["default", ["=", "y", [null, 99.0]]]],
        "y"
    ]));
    assert!(out.wat.contains("$switch_break"));
    // The dispatch ladder branches into per-case blocks; case 2 has no break
    // and falls through into the default body.
    assert!(out.wat.contains("(br_if $switch_case"));
}

#[test]
fn for_loop_with_continue_compiles_to_nested_blocks() {
    let out = compile(json!([
        ";",
        ["let", "total", [null, 0.0]],
        ["for",
            ["let", "i", [null, 0.0]],
            ["<", "i", [null, 10.0]],
            ["=", "i", ["+", "i", [null, 1.0]]],
            ["{}",
                ["if", ["==", ["%", "i", [null, 2.0]], [null, 0.0]], ["continue"]],
                ["=", "total", ["+", "total", "i"]]]],
        "total"
    ]));
    assert!(out.wat.contains("$for_continue"));
    assert!(out.wat.contains("$for_break"));
    assert!(out.wat.contains("rt_f64_rem"));
}
