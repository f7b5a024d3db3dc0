use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interned entity type tag. Cheap to copy and compare; the owning
/// [`TypeRegistry`] maps it back to the type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(pub u16);

/// Explicit interning service for entity type names.
///
/// The registry is created by the caller and passed through context wherever
/// type tags are needed. Registering a name twice returns the existing tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRegistry {
    names: Vec<String>,
    by_name: BTreeMap<String, TypeTag>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str) -> TypeTag {
        if let Some(tag) = self.by_name.get(name) {
            return *tag;
        }
        let tag = TypeTag(self.names.len() as u16);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), tag);
        tag
    }

    pub fn tag(&self, name: &str) -> Option<TypeTag> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, tag: TypeTag) -> Option<&str> {
        self.names.get(tag.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut registry = TypeRegistry::new();
        let person = registry.register("person");
        let household = registry.register("household");
        assert_ne!(person, household);
        assert_eq!(registry.tag("person"), Some(person));
        assert_eq!(registry.name(household), Some("household"));
    }

    #[test]
    fn duplicate_registration_is_idempotent() {
        let mut registry = TypeRegistry::new();
        let a = registry.register("station");
        let b = registry.register("station");
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_names_and_tags() {
        let registry = TypeRegistry::new();
        assert!(registry.tag("venue").is_none());
        assert!(registry.name(TypeTag(9)).is_none());
    }
}
