//! Free-variable analysis for closure lifting.
//!
//! A function literal compiles to a top-level WASM function plus, if it reads
//! any name from an enclosing scope, an environment struct captured at the
//! creation site. Finding out which names those are - and which of the
//! *enclosing* function's own locals need to be hoisted into its own
//! environment so a nested closure can reach them by reference rather than by
//! a stale copy - is a single walk over the body before codegen touches it.

use crate::ast::Ast;
use std::collections::HashSet;

/// Result of walking one function literal's body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeInfo {
    /// Names this function reads that are not its own parameters, not declared
    /// in its own body, and not a nested function's own binding - these must
    /// come from the enclosing scope and so become this function's captured
    /// environment parameter.
    pub free: Vec<String>,
    /// Names declared directly in the body (`let`/`const`/`var` at any nesting
    /// depth, and the function's own parameters).
    pub defined: HashSet<String>,
    /// Names this function declares (params or lets) that a *nested* function
    /// reads - these must be hoisted into this function's own environment
    /// struct, allocated once at this function's entry, rather than left as
    /// plain locals, or the nested closure would only ever see the value at
    /// creation time instead of at call time.
    pub to_hoist: HashSet<String>,
    /// Nested function literals found directly in the body (not inside a
    /// further-nested function), for recursive lifting.
    pub inner_functions: Vec<Ast>,
}

/// Walk `body`, treating `outer_defined` as names already bound further out
/// (so a reference to one is free, not an error) and `params` as this
/// function's own parameters (defined, never free).
pub fn analyze_scope(body: &Ast, params: &[String], outer_defined: &HashSet<String>) -> ScopeInfo {
    let mut info = ScopeInfo::default();
    for p in params {
        info.defined.insert(p.clone());
    }
    let mut free = Vec::new();
    let mut free_seen = HashSet::new();
    walk(body, &mut info, &mut free, &mut free_seen, outer_defined);
    info.free = free;
    info
}

fn walk(node: &Ast, info: &mut ScopeInfo, free: &mut Vec<String>, free_seen: &mut HashSet<String>, outer_defined: &HashSet<String>) {
    match node {
        Ast::Literal(_) => {}
        Ast::Ident(name) => mark_if_free(name, info, free, free_seen, outer_defined),
        Ast::Node(tag, children) => match tag.as_str() {
            "func" | "arrow" | "=>" | "function" => {
                info.inner_functions.push(node.clone());
                analyze_nested(node, info, free, free_seen, outer_defined);
            }
            "let" | "const" | "var" => {
                if let Some(name) = children.first().and_then(Ast::as_ident) {
                    // A function-literal initialiser can reference the name
                    // being declared (self-recursion through the binding), so
                    // the name is in scope for it; any other initialiser is
                    // analysed before the name exists.
                    let init_is_function = children
                        .get(1)
                        .and_then(Ast::tag)
                        .is_some_and(|t| matches!(t, "=>" | "function" | "func" | "arrow"));
                    if init_is_function {
                        info.defined.insert(name.to_string());
                    }
                    for c in &children[1.min(children.len())..] {
                        walk(c, info, free, free_seen, outer_defined);
                    }
                    info.defined.insert(name.to_string());
                } else {
                    for c in children {
                        walk(c, info, free, free_seen, outer_defined);
                    }
                }
            }
            "for-of" | "for-in" => {
                if let Some(name) = children.first().and_then(Ast::as_ident) {
                    info.defined.insert(name.to_string());
                }
                for c in &children[1.min(children.len())..] {
                    walk(c, info, free, free_seen, outer_defined);
                }
            }
            _ => {
                for c in children {
                    walk(c, info, free, free_seen, outer_defined);
                }
            }
        },
    }
}

/// A nested function literal's own free-variable set is computed relative to
/// everything visible at this point: names the *enclosing* function has
/// already declared (`info.defined`, captured as a snapshot here) union names
/// visible from further out still (`outer_defined`). Any such name the nested
/// function reads that belongs to `info.defined` gets hoisted in the
/// enclosing function; any that only belongs to `outer_defined` propagates up
/// as a capture of the enclosing function itself.
fn analyze_nested(node: &Ast, info: &mut ScopeInfo, free: &mut Vec<String>, free_seen: &mut HashSet<String>, outer_defined: &HashSet<String>) {
    let children = node.children();
    let split = children.len().saturating_sub(1);
    let mut nested_defined: HashSet<String> = HashSet::new();
    for p in &children[..split] {
        if let Some(name) = p.as_ident() {
            nested_defined.insert(name.to_string());
        }
    }

    let local_so_far = info.defined.clone();
    let mut combined = local_so_far.clone();
    combined.extend(outer_defined.iter().cloned());

    let mut nested_free = Vec::new();
    let mut nested_seen = HashSet::new();
    let mut nested_info = ScopeInfo {
        defined: nested_defined,
        ..ScopeInfo::default()
    };
    if let Some(body) = children.last() {
        walk(body, &mut nested_info, &mut nested_free, &mut nested_seen, &combined);
    }

    for name in nested_free {
        if local_so_far.contains(&name) {
            info.to_hoist.insert(name);
        } else {
            mark_if_free(&name, info, free, free_seen, outer_defined);
        }
    }
}

fn mark_if_free(name: &str, info: &ScopeInfo, free: &mut Vec<String>, free_seen: &mut HashSet<String>, outer_defined: &HashSet<String>) {
    if info.defined.contains(name) {
        return;
    }
    if !outer_defined.contains(name) {
        return;
    }
    if free_seen.insert(name.to_string()) {
        free.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ast(v: serde_json::Value) -> Ast {
        Ast::from_json(&v).unwrap()
    }

    #[test]
    fn identifier_bound_by_enclosing_scope_is_free() {
        let outer: HashSet<String> = ["x".to_string()].into_iter().collect();
        let body = ast(json!(["+", "x", "y"]));
        let info = analyze_scope(&body, &["y".to_string()], &outer);
        assert_eq!(info.free, vec!["x".to_string()]);
    }

    #[test]
    fn own_parameter_is_never_free() {
        let outer: HashSet<String> = ["x".to_string()].into_iter().collect();
        let body = ast(json!(["+", "x", "x"]));
        let info = analyze_scope(&body, &["x".to_string()], &outer);
        assert!(info.free.is_empty());
    }

    #[test]
    fn locally_declared_let_shadows_an_outer_name() {
        let outer: HashSet<String> = ["x".to_string()].into_iter().collect();
        let body = ast(json!(["block", ["let", "x", [null, 1.0]], ["+", "x", [null, 1.0]]]));
        let info = analyze_scope(&body, &[], &outer);
        assert!(info.free.is_empty());
    }

    #[test]
    fn each_free_name_is_only_reported_once() {
        let outer: HashSet<String> = ["x".to_string()].into_iter().collect();
        let body = ast(json!(["+", "x", "x"]));
        let info = analyze_scope(&body, &[], &outer);
        assert_eq!(info.free, vec!["x".to_string()]);
    }

    #[test]
    fn a_locally_declared_let_captured_by_a_nested_closure_is_marked_for_hoisting() {
        // let n = 0; return () => (n = n+1, n)
        let body = ast(json!([
            "block",
            ["let", "n", [null, 0.0]],
            ["return", ["arrow", ["+", "n", [null, 1.0]]]]
        ]));
        let info = analyze_scope(&body, &[], &HashSet::new());
        assert!(info.to_hoist.contains("n"));
        assert!(info.free.is_empty(), "n is local, not captured from further out");
        assert_eq!(info.inner_functions.len(), 1);
    }

    #[test]
    fn a_function_initialiser_sees_its_own_binding() {
        // let f = n => f(n - 1): f is captured by its own body, so the
        // enclosing scope must hoist it.
        let body = ast(json!([
            "let",
            "f",
            ["=>", "n", ["call", "f", ["-", "n", [null, 1.0]]]]
        ]));
        let info = analyze_scope(&body, &[], &HashSet::new());
        assert!(info.to_hoist.contains("f"));
    }

    #[test]
    fn a_name_from_further_out_propagates_as_a_capture_of_the_enclosing_function() {
        let outer: HashSet<String> = ["shared".to_string()].into_iter().collect();
        let body = ast(json!(["arrow", ["+", "shared", [null, 1.0]]]));
        let info = analyze_scope(&body, &[], &outer);
        assert_eq!(info.free, vec!["shared".to_string()]);
        assert!(info.to_hoist.is_empty());
    }
}
