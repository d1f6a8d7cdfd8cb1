//! Document identifiers.
//!
//! Every stored document is keyed by a [`DocumentId`], a UUID assigned by the
//! repository at creation time. Externally supplied identifiers (route
//! parameters, request payloads) must go through [`DocumentId::parse`], which
//! rejects malformed input before any store access happens.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors that can occur when parsing a [`DocumentId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("identifier cannot be empty")]
    Empty,
    /// The input is not a valid UUID.
    #[error("malformed identifier: {0}")]
    Malformed(String),
}

/// A unique document identifier.
///
/// Wraps a UUID and serializes transparently as its lowercase hyphenated
/// string form, so identifiers stored inside document bodies and identifiers
/// used as primary keys always compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Generate a fresh random (v4) identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse and normalize an externally supplied identifier.
    ///
    /// Accepts hyphenated, simple (32 hex digits), and urn UUID forms in any
    /// case; the result always displays in lowercase hyphenated form.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Empty`] for an empty string and
    /// [`IdError::Malformed`] for anything that is not a UUID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| IdError::Malformed(s.to_owned()))
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for DocumentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<DocumentId> for Uuid {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for DocumentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = DocumentId::new();
        let parsed = DocumentId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_normalizes_case_and_form() {
        let a = DocumentId::parse("550E8400-E29B-41D4-A716-446655440000").unwrap();
        let b = DocumentId::parse("550e8400e29b41d4a716446655440000").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(DocumentId::parse(""), Err(IdError::Empty));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            DocumentId::parse("not-a-uuid"),
            Err(IdError::Malformed(_))
        ));
        assert!(matches!(
            DocumentId::parse("12345"),
            Err(IdError::Malformed(_))
        ));
    }

    #[test]
    fn test_serde_transparent() {
        let id = DocumentId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        let back: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_new_ids_are_unique() {
        assert_ne!(DocumentId::new(), DocumentId::new());
    }
}
