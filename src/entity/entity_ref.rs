//! Store-wide object identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, stable identity of one persisted object.
///
/// An `EntityRef` is assigned when the object is inserted into a context and
/// never changes afterwards. The same ref resolved through two contexts
/// yields two independent materialized copies of the same logical row.
///
/// # Examples
///
/// ```
/// use mellon::EntityRef;
///
/// let id = EntityRef::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(Uuid);

impl EntityRef {
    /// Creates a new random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identity from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityRef {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EntityRef> for Uuid {
    fn from(id: EntityRef) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refs_are_unique() {
        let a = EntityRef::new();
        let b = EntityRef::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ref_serializes_as_plain_uuid() {
        let id = EntityRef::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: EntityRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
