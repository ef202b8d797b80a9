//! Identity and ordering types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Client-assigned identifier of a local copy.
///
/// Assigned once when the local copy is created and never reused, so it
/// exists even before the entity is first synced. UUID v4 format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(uuid::Uuid);

impl LocalId {
    /// Create a new random LocalId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a LocalId from its hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, TypesError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| TypesError::InvalidId(s.to_string()))
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalId({})", &self.to_string()[..8])
    }
}

/// Server-assigned identifier of a synced entity.
///
/// Stable and globally unique; absent on local entities that were never
/// uploaded.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Wrap a server guid.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the guid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A guid with no characters carries no identity.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0)
    }
}

/// Update sequence number.
///
/// Assigned by the service, monotonically increasing per account. The
/// highest USN fully processed is the sync watermark.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usn(u32);

impl Usn {
    /// Create a USN with the given value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// The USN before any change was made.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Usn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_unique() {
        assert_ne!(LocalId::new(), LocalId::new());
    }

    #[test]
    fn local_id_parse_roundtrips_display() {
        let id = LocalId::new();
        assert_eq!(LocalId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn local_id_parse_rejects_garbage() {
        assert!(matches!(
            LocalId::parse("not-a-uuid"),
            Err(TypesError::InvalidId(_))
        ));
    }

    #[test]
    fn guid_serializes_as_plain_string() {
        let json = serde_json::to_string(&Guid::new("g1")).unwrap();
        assert_eq!(json, "\"g1\"");
    }

    #[test]
    fn usn_ordering() {
        assert!(Usn::new(6) > Usn::new(5));
        assert_eq!(Usn::zero().value(), 0);
    }
}
