//! Partial-update synthesis
//!
//! An update payload is any serializable value whose fields describe intended
//! changes. [`synthesize`] turns it into an [`UpdateDocument`]: one `Set` per
//! present, non-null, writable field, followed by an `updatedAt` stamp and, on
//! upsert, a `createdAt` set-on-insert.
//!
//! Field enumeration goes through the payload's `Serialize` implementation,
//! so the field table is generated at compile time by `#[derive(Serialize)]`.
//! Absent (`None`) and `null` values are never applied; clearing a field
//! through a partial update is not possible.
//!
//! # Example
//!
//! ```rust,ignore
//! #[derive(Serialize)]
//! struct RenameUser {
//!     name: Option<String>,
//! }
//!
//! impl UpdatePayload for RenameUser {}
//!
//! let update = synthesize::<User, _, _>(&DefaultPolicy, &payload, false, Utc::now())?;
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::policy::RepositoryPolicy;
use crate::schema::{Entity, CREATED_AT_FIELD, UPDATED_AT_FIELD};

/// A single field-level write.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    Set { field: String, value: Value },
    /// Applied only when an upsert inserts a new document
    SetOnInsert { field: String, value: Value },
    Inc { field: String, by: i64 },
    /// Increments an existing document's field by `by`; an upsert inserts the
    /// field with `initial` instead.
    IncrementOrInit { field: String, by: i64, initial: i64 },
}

impl UpdateOperation {
    pub fn field(&self) -> &str {
        match self {
            Self::Set { field, .. }
            | Self::SetOnInsert { field, .. }
            | Self::Inc { field, .. }
            | Self::IncrementOrInit { field, .. } => field,
        }
    }
}

/// An ordered list of update operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDocument {
    operations: Vec<UpdateOperation>,
}

impl UpdateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: UpdateOperation) {
        self.operations.push(operation);
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(UpdateOperation::Set {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn set_on_insert(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(UpdateOperation::SetOnInsert {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.push(UpdateOperation::Inc {
            field: field.into(),
            by,
        });
        self
    }

    pub fn increment_or_init(mut self, field: impl Into<String>, by: i64, initial: i64) -> Self {
        self.push(UpdateOperation::IncrementOrInit {
            field: field.into(),
            by,
            initial,
        });
        self
    }

    pub fn operations(&self) -> &[UpdateOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether any operation writes `field`.
    pub fn targets(&self, field: &str) -> bool {
        self.operations.iter().any(|op| op.field() == field)
    }

    /// The value a `Set` operation assigns to `field`, if any.
    pub fn set_value(&self, field: &str) -> Option<&Value> {
        self.operations.iter().find_map(|op| match op {
            UpdateOperation::Set { field: f, value } if f == field => Some(value),
            _ => None,
        })
    }

    /// Renders as a store update document (`$set`, `$setOnInsert`, `$inc`).
    pub fn to_document(&self) -> Value {
        let mut set = Map::new();
        let mut set_on_insert = Map::new();
        let mut inc = Map::new();
        for op in &self.operations {
            match op {
                UpdateOperation::Set { field, value } => {
                    set.insert(field.clone(), value.clone());
                }
                UpdateOperation::SetOnInsert { field, value } => {
                    set_on_insert.insert(field.clone(), value.clone());
                }
                UpdateOperation::Inc { field, by } => {
                    inc.insert(field.clone(), json!(by));
                }
                UpdateOperation::IncrementOrInit { field, by, initial } => {
                    inc.insert(field.clone(), json!({ "by": by, "initial": initial }));
                }
            }
        }
        let mut doc = Map::new();
        for (key, section) in [("$set", set), ("$setOnInsert", set_on_insert), ("$inc", inc)] {
            if !section.is_empty() {
                doc.insert(key.to_string(), Value::Object(section));
            }
        }
        Value::Object(doc)
    }
}

impl IntoIterator for UpdateDocument {
    type Item = UpdateOperation;
    type IntoIter = std::vec::IntoIter<UpdateOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

/// A value describing a partial update of an entity.
///
/// Field names are matched case-insensitively against the entity schema;
/// fields the entity does not declare are ignored.
pub trait UpdatePayload: Serialize + Send + Sync {
    /// Identifier of the document the payload targets, for self-identifying
    /// updates such as [`bulk_update`](crate::repository::DocumentRepository::bulk_update).
    fn id(&self) -> Option<&str> {
        None
    }

    /// Payload-level validation, checked before any store call.
    fn is_valid(&self) -> bool {
        true
    }
}

/// Builds the update operations for `payload`.
///
/// Returns `Ok(None)` when the payload contributes no applicable field; that
/// is "nothing to update", not an error.
pub fn synthesize<E, P, U>(
    policy: &P,
    payload: &U,
    is_upsert: bool,
    now: DateTime<Utc>,
) -> Result<Option<UpdateDocument>>
where
    E: Entity,
    P: RepositoryPolicy<E> + ?Sized,
    U: UpdatePayload + ?Sized,
{
    let fields = match serde_json::to_value(payload)? {
        Value::Object(fields) => fields,
        Value::Null => return Ok(None),
        _ => {
            return Err(Error::InvalidPayload(
                "update payload must serialize to an object".to_string(),
            ))
        }
    };

    let read_only = policy.read_only_fields();
    let mut update = UpdateDocument::new();

    for (name, value) in fields {
        let Some(field) = E::SCHEMA.find(&name) else {
            tracing::debug!(
                collection = E::COLLECTION,
                field = %name,
                "Skipping payload field not declared on entity"
            );
            continue;
        };
        if read_only.contains(&field) || !policy.should_update_field(field) || value.is_null() {
            continue;
        }
        update.push(policy.field_update(field, value));
    }

    if update.is_empty() {
        return Ok(None);
    }

    let now = serde_json::to_value(now)?;
    let created_at_targeted = update.targets(CREATED_AT_FIELD);
    update.push(UpdateOperation::Set {
        field: UPDATED_AT_FIELD.to_string(),
        value: now.clone(),
    });
    if is_upsert && !created_at_targeted {
        update.push(UpdateOperation::SetOnInsert {
            field: CREATED_AT_FIELD.to_string(),
            value: now,
        });
    }

    Ok(Some(update))
}
