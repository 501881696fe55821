//! Keys identify children and workers within one parent.
//!
//! A key is the pair of a declared Rust type and a caller-chosen string. The
//! same key reappearing in the next render pass refers to the *same* running
//! instance; a key that disappears tears its instance down.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a child workflow or worker within its parent's render pass.
///
/// Equality and hashing use the type's `TypeId` and the name. The type name is
/// carried for display and for snapshot persistence.
#[derive(Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    name: String,
}

impl Key {
    /// Create a key for type `T` with the given name.
    pub fn of<T: 'static>(name: impl Into<String>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            name: name.into(),
        }
    }

    /// The `TypeId` of the declared type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The full Rust type name of the declared type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The caller-chosen name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}:{}", self.type_name, self.name)
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Alpha;
    struct Beta;

    #[test]
    fn test_same_type_and_name_are_equal() {
        assert_eq!(Key::of::<Alpha>("x"), Key::of::<Alpha>("x"));
    }

    #[test]
    fn test_type_participates_in_identity() {
        assert_ne!(Key::of::<Alpha>("x"), Key::of::<Beta>("x"));
        assert_ne!(Key::of::<Alpha>("x"), Key::of::<Alpha>("y"));

        let set: HashSet<Key> = [
            Key::of::<Alpha>("x"),
            Key::of::<Beta>("x"),
            Key::of::<Alpha>("x"),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        let key = Key::of::<Alpha>("dup");
        assert!(key.to_string().ends_with("Alpha:dup"));
        let unnamed = Key::of::<Alpha>("");
        assert!(unnamed.to_string().ends_with("Alpha"));
        assert_eq!(key.name(), "dup");
        assert_eq!(key.type_id(), TypeId::of::<Alpha>());
    }
}
