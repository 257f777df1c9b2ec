//! Type-safe document identifiers using the TypeID specification
//!
//! Every entity type declares a short prefix (`usr`, `ord`, ...) and its
//! documents are identified by `<prefix>_<base32 UUIDv7>` strings. UUIDv7
//! keeps identifiers time-sortable, so natural insertion order and id order
//! agree.
//!
//! ```rust
//! use docstore_repository::ids::DocumentId;
//!
//! let id = DocumentId::new("usr");
//! assert_eq!(id.prefix(), "usr");
//!
//! let parsed = DocumentId::parse(id.as_str()).unwrap();
//! assert_eq!(parsed, id);
//! ```

use mti::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Identifier of a persisted document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(MagicTypeId);

impl DocumentId {
    /// Creates a new identifier with a UUIDv7 suffix.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self(prefix.create_type_id::<V7>())
    }

    /// Parses an identifier of any prefix.
    ///
    /// Empty input and malformed TypeIDs are rejected with
    /// [`Error::InvalidIdentifier`].
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::InvalidIdentifier("Invalid document ID".to_string()));
        }
        MagicTypeId::from_str(value)
            .map(Self)
            .map_err(|_| invalid_format(value))
    }

    /// Parses an identifier and checks that it belongs to the given prefix.
    pub fn parse_with_prefix(value: &str, prefix: &str) -> Result<Self> {
        let id = Self::parse(value)?;
        if id.prefix() != prefix {
            return Err(invalid_format(value));
        }
        Ok(id)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the prefix portion of the identifier.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.prefix().as_str()
    }
}

fn invalid_format(value: &str) -> Error {
    Error::InvalidIdentifier(format!("Invalid document ID format. Id={}", value))
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0.to_string()
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}
