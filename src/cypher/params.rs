//! The deduplicating parameter registry.
//!
//! Names are assigned once: registering a structurally equal value (map
//! key order ignored) returns the existing name. Lookup is a content hash
//! narrowed by full structural comparison.

use crate::errors::{Error, Result};
use crate::packstream::Value;
use indexmap::IndexMap;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamRegistry {
    values: IndexMap<String, Value>,
    by_hash: HashMap<u64, Vec<String>>,
    counter: usize,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generated parameter for `value`, reusing the name of any
    /// structurally equal value already present.
    pub fn register(&mut self, value: Value) -> String {
        if let Some(existing) = self.find_equal(&value) {
            return existing;
        }
        let name = self.next_name();
        self.insert_indexed(name.clone(), value);
        name
    }

    /// Declare a user-named parameter. Re-declaring the same name with a
    /// different value is a caller error.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        match self.values.get(&name) {
            Some(existing) if *existing == value => Ok(()),
            Some(_) => Err(Error::Configuration(format!(
                "parameter `{name}` is already declared with a different value"
            ))),
            None => {
                self.insert_indexed(name, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> IndexMap<String, Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge `other` into this registry. Names that collide with a
    /// different value are renumbered; values equal to already-registered
    /// ones collapse onto the existing name. Returns old-name → new-name
    /// for every renamed parameter.
    pub fn absorb(&mut self, other: ParamRegistry) -> HashMap<String, String> {
        let mut renames = HashMap::new();
        for (name, value) in other.values {
            match self.values.get(&name) {
                Some(existing) if *existing == value => {}
                Some(_) => {
                    let new_name = self.register(value);
                    renames.insert(name, new_name);
                }
                None => {
                    if let Some(existing) = self.find_equal(&value) {
                        renames.insert(name, existing);
                    } else {
                        self.insert_indexed(name, value);
                    }
                }
            }
        }
        renames
    }

    fn find_equal(&self, value: &Value) -> Option<String> {
        let names = self.by_hash.get(&value.content_hash())?;
        names
            .iter()
            .find(|name| self.values.get(*name) == Some(value))
            .cloned()
    }

    fn insert_indexed(&mut self, name: String, value: Value) {
        self.by_hash
            .entry(value.content_hash())
            .or_default()
            .push(name.clone());
        self.values.insert(name, value);
    }

    fn next_name(&mut self) -> String {
        loop {
            self.counter += 1;
            let name = format!("p{}", self.counter);
            if !self.values.contains_key(&name) {
                return name;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_a_name() {
        let mut registry = ParamRegistry::new();
        let a = registry.register(Value::Int(30));
        let b = registry.register(Value::Int(30));
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_values_get_sequential_names() {
        let mut registry = ParamRegistry::new();
        assert_eq!(registry.register(Value::Int(1)), "p1");
        assert_eq!(registry.register(Value::Int(2)), "p2");
        assert_eq!(registry.register(Value::String("1".into())), "p3");
    }

    #[test]
    fn map_key_order_does_not_split_names() {
        let mut registry = ParamRegistry::new();
        let a = registry.register(Value::map([("x", 1i64), ("y", 2i64)]));
        let b = registry.register(Value::map([("y", 2i64), ("x", 1i64)]));
        assert_eq!(a, b);
    }

    #[test]
    fn generated_names_dodge_user_names() {
        let mut registry = ParamRegistry::new();
        registry.declare("p1", Value::String("user".into())).unwrap();
        let generated = registry.register(Value::Int(5));
        assert_eq!(generated, "p2");
    }

    #[test]
    fn redeclaring_with_another_value_fails() {
        let mut registry = ParamRegistry::new();
        registry.declare("x", Value::Int(1)).unwrap();
        assert!(registry.declare("x", Value::Int(1)).is_ok());
        assert!(registry.declare("x", Value::Int(2)).is_err());
    }

    #[test]
    fn absorb_renumbers_collisions_and_collapses_duplicates() {
        let mut left = ParamRegistry::new();
        left.declare("limit", Value::Int(10)).unwrap();
        let p = left.register(Value::String("shared".into()));
        assert_eq!(p, "p1");

        let mut right = ParamRegistry::new();
        right.declare("limit", Value::Int(99)).unwrap(); // collides
        right.declare("other", Value::String("shared".into())).unwrap(); // collapses
        right.declare("fresh", Value::Bool(true)).unwrap(); // carried over

        let renames = left.absorb(right);
        assert_eq!(renames.get("other").map(String::as_str), Some("p1"));
        let renamed_limit = renames.get("limit").cloned().into_iter().next();
        let renamed_limit = renamed_limit.as_deref().unwrap_or_default();
        assert_eq!(left.get(renamed_limit), Some(&Value::Int(99)));
        assert_eq!(left.get("limit"), Some(&Value::Int(10)));
        assert_eq!(left.get("fresh"), Some(&Value::Bool(true)));
    }
}
