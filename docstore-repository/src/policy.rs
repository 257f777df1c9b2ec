//! Per-entity repository policies
//!
//! A [`RepositoryPolicy`] customizes how a
//! [`DocumentRepository`](crate::repository::DocumentRepository) treats one
//! entity type. Every hook has a default, so most entities use
//! [`DefaultPolicy`] and specialised ones override only what differs:
//!
//! ```rust,ignore
//! struct UserPolicy;
//!
//! impl RepositoryPolicy<User> for UserPolicy {
//!     // Email addresses cannot be changed through partial updates
//!     fn should_update_field(&self, field: &str) -> bool {
//!         field != "email"
//!     }
//!
//!     fn index_models(&self) -> Vec<IndexModel> {
//!         let mut indexes = default_index_models::<User>();
//!         indexes.push(IndexModel::ascending("email").unique());
//!         indexes
//!     }
//! }
//! ```

use serde_json::Value;

use crate::schema::{Entity, CREATED_AT_FIELD, DELETED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
use crate::store::IndexModel;
use crate::update::UpdateOperation;

/// Entity-specific behaviour of a repository.
pub trait RepositoryPolicy<E: Entity>: Send + Sync + 'static {
    /// Fields partial updates never write.
    fn read_only_fields(&self) -> Vec<&'static str> {
        default_read_only_fields::<E>()
    }

    /// Whether a payload field may be written. Receives the canonical name.
    fn should_update_field(&self, _field: &str) -> bool {
        true
    }

    /// Builds the operation applying `value` to `field`.
    fn field_update(&self, field: &str, value: Value) -> UpdateOperation {
        UpdateOperation::Set {
            field: field.to_string(),
            value,
        }
    }

    /// Indexes provisioned on first use of the collection.
    fn index_models(&self) -> Vec<IndexModel> {
        default_index_models::<E>()
    }

    /// Whether deletes default to soft deletes. Only honoured for entities
    /// that declare `deletedAt`.
    fn supports_soft_delete(&self) -> bool {
        E::SCHEMA.supports_soft_delete()
    }
}

/// `id`, `updatedAt`, `createdAt`, plus `deletedAt` for soft-deletable entities.
pub fn default_read_only_fields<E: Entity>() -> Vec<&'static str> {
    let mut fields = vec![ID_FIELD, UPDATED_AT_FIELD, CREATED_AT_FIELD];
    if E::SCHEMA.supports_soft_delete() {
        fields.push(DELETED_AT_FIELD);
    }
    fields
}

/// Descending `updatedAt` and `createdAt`, ascending `deletedAt` when declared.
pub fn default_index_models<E: Entity>() -> Vec<IndexModel> {
    let mut indexes = vec![
        IndexModel::descending(UPDATED_AT_FIELD),
        IndexModel::descending(CREATED_AT_FIELD),
    ];
    if E::SCHEMA.supports_soft_delete() {
        indexes.push(IndexModel::ascending(DELETED_AT_FIELD));
    }
    indexes
}

/// Policy with every hook at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl<E: Entity> RepositoryPolicy<E> for DefaultPolicy {}
