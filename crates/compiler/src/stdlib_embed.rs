//! Embedded runtime helper library.
//!
//! The WAT text for every memory/string/typed-array/map helper function lives in
//! `stdlib/*.wat` and is embedded at compile time via `include_str!`, so `jzc` is a
//! single self-contained binary with no external runtime files to ship alongside it.
//! Only modules the generator actually used (tracked as [`crate::context::UsedFeatures`])
//! are pulled into the assembled output; unused helpers are dropped, not merely dead code.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Embedded stdlib modules (name -> WAT source).
static STDLIB: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert("memory", include_str!("../stdlib/memory.wat"));
    m.insert("string", include_str!("../stdlib/string.wat"));
    m.insert("typed_array", include_str!("../stdlib/typed_array.wat"));
    m.insert("mapset", include_str!("../stdlib/mapset.wat"));
    m.insert("regex_runtime", include_str!("../stdlib/regex_runtime.wat"));
    m
});

/// Declared dependencies between stdlib modules, for transitive-closure inclusion.
/// `string` and the others call into `memory`'s bump allocator and pointer helpers.
fn direct_deps(name: &str) -> &'static [&'static str] {
    match name {
        "string" => &["memory"],
        "typed_array" => &["memory"],
        "mapset" => &["memory"],
        // The generic scan/replace/split drivers slice pieces out of the
        // subject string and build result arrays.
        "regex_runtime" => &["string"],
        "memory" => &[],
        _ => &[],
    }
}

pub fn get_stdlib(name: &str) -> Option<&'static str> {
    STDLIB.get(name).copied()
}

pub fn has_stdlib(name: &str) -> bool {
    STDLIB.contains_key(name)
}

pub fn list_stdlib() -> Vec<&'static str> {
    STDLIB.keys().copied().collect()
}

/// Expand a set of directly-used module names into their full transitive closure,
/// stable-ordered so that a dependency always appears before its dependents.
pub fn transitive_closure(wanted: &[&'static str]) -> Vec<&'static str> {
    let mut order = Vec::new();
    let mut seen = std::collections::HashSet::new();
    fn visit(
        name: &'static str,
        seen: &mut std::collections::HashSet<&'static str>,
        order: &mut Vec<&'static str>,
    ) {
        if !seen.insert(name) {
            return;
        }
        for dep in direct_deps(name) {
            visit(dep, seen, order);
        }
        order.push(name);
    }
    for &name in wanted {
        visit(name, &mut seen, &mut order);
    }
    order
}
