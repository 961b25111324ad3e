//! The input AST contract.
//!
//! The source-text parser is an external collaborator: it hands us a tree of
//! JSON arrays whose first element is an operator tag. Bare JSON strings are
//! identifiers; the empty-first-element form `[null, value]` is a literal; every
//! other array is `[tag, ...children]`.
//!
//! This module only validates shape and gives the generator convenient accessors -
//! it performs no semantic analysis.

use crate::error::{CResult, CompileError};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ast {
    /// A bare identifier reference.
    Ident(String),
    /// `[null, value]`: a literal number, string, boolean, or null/undefined.
    Literal(Value),
    /// `[tag, ...children]`: every other operator form.
    Node(String, Vec<Ast>),
}

impl Ast {
    pub fn from_json(v: &Value) -> CResult<Ast> {
        match v {
            Value::String(s) => Ok(Ast::Ident(s.clone())),
            Value::Number(_) | Value::Bool(_) | Value::Null => Ok(Ast::Literal(v.clone())),
            Value::Array(arr) => {
                let Some(head) = arr.first() else {
                    return Err(CompileError::malformed("empty AST node array"));
                };
                match head {
                    Value::Null => Ok(Ast::Literal(arr.get(1).cloned().unwrap_or(Value::Null))),
                    Value::String(tag) => {
                        let children = arr[1..]
                            .iter()
                            .map(Ast::from_json)
                            .collect::<CResult<Vec<_>>>()?;
                        Ok(Ast::Node(tag.clone(), children))
                    }
                    other => Err(CompileError::malformed(other)),
                }
            }
            Value::Object(_) => Err(CompileError::malformed(v)),
        }
    }

    /// The operator tag, if this is a `Node`.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Ast::Node(tag, _) => Some(tag.as_str()),
            _ => None,
        }
    }

    /// The node's children, or an empty slice for `Ident`/`Literal`.
    pub fn children(&self) -> &[Ast] {
        match self {
            Ast::Node(_, children) => children,
            _ => &[],
        }
    }

    pub fn child(&self, i: usize) -> CResult<&Ast> {
        self.children()
            .get(i)
            .ok_or_else(|| CompileError::arity(self.tag().unwrap_or("<node>"), i + 1, self.children().len()))
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Ast::Ident(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Ast::Literal(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Ast::Literal(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_nullish_literal(&self) -> bool {
        matches!(self, Ast::Literal(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_string_is_an_identifier() {
        let ast = Ast::from_json(&json!("x")).unwrap();
        assert_eq!(ast, Ast::Ident("x".to_string()));
    }

    #[test]
    fn null_first_element_is_a_literal() {
        let ast = Ast::from_json(&json!([null, 42.0])).unwrap();
        assert_eq!(ast, Ast::Literal(json!(42.0)));
    }

    #[test]
    fn tagged_array_is_a_node_with_parsed_children() {
        let ast = Ast::from_json(&json!(["+", "x", [null, 1.0]])).unwrap();
        assert_eq!(ast.tag(), Some("+"));
        assert_eq!(ast.children().len(), 2);
        assert_eq!(ast.children()[0], Ast::Ident("x".to_string()));
    }

    #[test]
    fn empty_array_is_malformed() {
        assert!(Ast::from_json(&json!([])).is_err());
    }
}
