//! Entity contract and field validation
//!
//! An entity declares the names of its persisted fields once, as an
//! [`EntitySchema`]. Filters, sort keys and update payloads are all resolved
//! against that declaration, so a typo in a field name is caught before a
//! query ever reaches the store.
//!
//! ```rust
//! use docstore_repository::schema::EntitySchema;
//!
//! const SCHEMA: EntitySchema =
//!     EntitySchema::new(&["id", "name", "email", "createdAt", "updatedAt", "deletedAt"]);
//!
//! assert_eq!(SCHEMA.resolve("EMAIL").unwrap(), "email");
//! assert!(SCHEMA.resolve("password").is_err());
//! assert!(SCHEMA.supports_soft_delete());
//! ```

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::ids::DocumentId;

/// Identifier field
pub const ID_FIELD: &str = "id";
/// Creation timestamp, set once by the repository
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Last-modification timestamp, set on every write
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Soft-delete timestamp; declaring it enables soft delete for the entity
pub const DELETED_AT_FIELD: &str = "deletedAt";

/// Declared shape of an entity: the canonical names of its persisted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySchema {
    fields: &'static [&'static str],
}

impl EntitySchema {
    /// Declares a schema from the entity's serialized field names.
    pub const fn new(fields: &'static [&'static str]) -> Self {
        Self { fields }
    }

    /// All declared field names in declaration order.
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Looks up a field case-insensitively, returning its canonical name.
    pub fn find(&self, field: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .copied()
            .find(|candidate| candidate.eq_ignore_ascii_case(field))
    }

    /// Resolves a logical field name to its canonical spelling.
    ///
    /// Fails with [`Error::InvalidField`] for empty or undeclared names.
    pub fn resolve(&self, field: &str) -> Result<&'static str> {
        if field.is_empty() {
            return Err(Error::InvalidField("Field name cannot be empty".to_string()));
        }
        self.find(field)
            .ok_or_else(|| Error::InvalidField(field.to_string()))
    }

    /// Whether the canonical field name is declared.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(&field)
    }

    /// Soft delete is available only to entities that declare `deletedAt`.
    pub fn supports_soft_delete(&self) -> bool {
        self.contains(DELETED_AT_FIELD)
    }
}

/// A persisted document type managed by a repository.
///
/// Implementations serialize their fields with the names listed in
/// [`Entity::SCHEMA`] (typically `#[serde(rename_all = "camelCase")]`).
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection the entity is stored in.
    const COLLECTION: &'static str;

    /// TypeID prefix for identifiers of this entity.
    const ID_PREFIX: &'static str;

    /// Declared fields of the entity.
    const SCHEMA: EntitySchema;

    /// Current identifier, if one has been assigned.
    fn id(&self) -> Option<&DocumentId>;

    /// Assigns the identifier.
    fn set_id(&mut self, id: DocumentId);

    /// Sets the creation timestamp.
    fn set_created_at(&mut self, at: DateTime<Utc>);

    /// Sets the last-modification timestamp.
    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Prepares the entity for insertion: assigns a fresh identifier when the
    /// current one is missing or belongs to another entity type, and stamps
    /// both timestamps with `now`.
    fn prepare_for_insert(&mut self, now: DateTime<Utc>) {
        let needs_id = self
            .id()
            .map_or(true, |id| id.prefix() != Self::ID_PREFIX);
        if needs_id {
            self.set_id(DocumentId::new(Self::ID_PREFIX));
        }
        self.set_created_at(now);
        self.set_updated_at(now);
    }
}
