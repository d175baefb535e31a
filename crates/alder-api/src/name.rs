//! Primitive identity.

use serde::Deserialize;
use serde::Serialize;

/// Namespaced name of a primitive.
///
/// The pair is the stable identity of a primitive handle: it forms the
/// session identity on every partition the primitive touches, and two clients
/// naming the same `(namespace, name)` operate on the same replicated state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimitiveName {
    /// Namespace the primitive lives in.
    pub namespace: String,
    /// Name of the primitive within its namespace.
    pub name: String,
}

impl PrimitiveName {
    /// Create a primitive name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PrimitiveName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_name_display() {
        let name = PrimitiveName::new("default", "orders");
        assert_eq!(name.to_string(), "default/orders");
    }

    #[test]
    fn test_primitive_name_equality() {
        assert_eq!(PrimitiveName::new("a", "b"), PrimitiveName::new("a", "b"));
        assert_ne!(PrimitiveName::new("a", "b"), PrimitiveName::new("a", "c"));
    }
}
