//! Process-wide-during-one-compilation registry mapping a small integer schema id
//! to the ordered list of property names objects of that shape carry.
//!
//! Schema id `0` is reserved for "plain array" (no named properties) and is never
//! handed out by [`SchemaRegistry::intern`].

use std::collections::HashMap;

/// Schema id reserved for arrays and any object literal with no own properties.
pub const PLAIN_ARRAY_SCHEMA: u32 = 0;

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    /// Schema id -> ordered property names.
    schemas: Vec<Vec<String>>,
    /// Property-name tuple -> schema id, for sharing schemas between object literals
    /// with the same shape.
    by_shape: HashMap<Vec<String>, u32>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        // id 0 is reserved and has no properties.
        SchemaRegistry {
            schemas: vec![Vec::new()],
            by_shape: HashMap::new(),
        }
    }

    /// Look up (or allocate) the schema id for an ordered list of property names.
    /// Schemas are interned by shape: two object literals with identical property
    /// order share a schema id. Ids are allocated monotonically and an existing
    /// entry is never mutated.
    pub fn intern(&mut self, props: Vec<String>) -> u32 {
        if props.is_empty() {
            return PLAIN_ARRAY_SCHEMA;
        }
        if let Some(&id) = self.by_shape.get(&props) {
            return id;
        }
        let id = self.schemas.len() as u32;
        self.schemas.push(props.clone());
        self.by_shape.insert(props, id);
        id
    }

    /// Property names for a schema id, if it exists.
    pub fn props(&self, id: u32) -> Option<&[String]> {
        self.schemas.get(id as usize).map(Vec::as_slice)
    }

    /// Index of `name` within schema `id`'s property list, used to compile `.prop`
    /// into a constant-indexed load.
    pub fn index_of(&self, id: u32, name: &str) -> Option<usize> {
        self.props(id)?.iter().position(|p| p == name)
    }

    /// All registered schemas in id order, for the `jz:sig` custom section.
    pub fn all(&self) -> impl Iterator<Item = (u32, &[String])> {
        self.schemas
            .iter()
            .enumerate()
            .map(|(id, props)| (id as u32, props.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_props_is_plain_array_schema() {
        let mut reg = SchemaRegistry::new();
        assert_eq!(reg.intern(vec![]), PLAIN_ARRAY_SCHEMA);
    }

    #[test]
    fn same_shape_shares_id() {
        let mut reg = SchemaRegistry::new();
        let a = reg.intern(vec!["x".into(), "y".into()]);
        let b = reg.intern(vec!["x".into(), "y".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_order_is_a_different_schema() {
        let mut reg = SchemaRegistry::new();
        let a = reg.intern(vec!["x".into(), "y".into()]);
        let b = reg.intern(vec!["y".into(), "x".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn ids_allocate_monotonically_and_never_mutate() {
        let mut reg = SchemaRegistry::new();
        let a = reg.intern(vec!["x".into()]);
        let b = reg.intern(vec!["x".into(), "y".into()]);
        assert!(b > a);
        assert_eq!(reg.props(a), Some(&["x".to_string()][..]));
    }

    #[test]
    fn index_of_resolves_property_position() {
        let mut reg = SchemaRegistry::new();
        let id = reg.intern(vec!["x".into(), "y".into()]);
        assert_eq!(reg.index_of(id, "y"), Some(1));
        assert_eq!(reg.index_of(id, "z"), None);
    }
}
