//! Sort specifications and the `field` / `-field` ordering syntax

use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;

use crate::schema::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// One (field, direction) pair of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Ordered multi-key sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::default().then(field, SortDirection::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::default().then(field, SortDirection::Descending)
    }

    /// Appends a key with lower precedence than the existing ones.
    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Renders as a store sort document (`{"field": 1, "other": -1}`).
    pub fn to_document(&self) -> Value {
        let map: Map<String, Value> = self
            .keys
            .iter()
            .map(|key| {
                let order = match key.direction {
                    SortDirection::Ascending => 1,
                    SortDirection::Descending => -1,
                };
                (key.field.clone(), Value::from(order))
            })
            .collect();
        Value::Object(map)
    }
}

/// Resolves caller-supplied ordering specifiers for entity `E`.
///
/// Unlike filters, unknown fields are dropped rather than rejected: a bad
/// sort key from a listing request must not fail the listing.
pub struct SortResolver<E>(PhantomData<fn() -> E>);

impl<E: Entity> SortResolver<E> {
    /// Resolves a single specifier such as `name` or `-createdAt`.
    pub fn resolve(order_by: &str) -> Option<SortSpec> {
        Self::resolve_many([order_by])
    }

    /// Resolves a list of specifiers, preserving their order.
    ///
    /// Blank entries and unknown fields are skipped. A field named more than
    /// once keeps its first occurrence. Returns `None` when nothing valid
    /// remains.
    pub fn resolve_many<I, S>(order_by: I) -> Option<SortSpec>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = SortSpec::default();
        for entry in order_by {
            let Some(key) = Self::key(entry.as_ref()) else {
                continue;
            };
            if spec.keys.iter().any(|existing| existing.field == key.field) {
                continue;
            }
            spec.keys.push(key);
        }
        (!spec.is_empty()).then_some(spec)
    }

    fn key(entry: &str) -> Option<SortKey> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        let direction = if entry.starts_with('-') {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        };
        let field = E::SCHEMA.find(entry.trim_start_matches('-'))?;
        Some(SortKey {
            field: field.to_string(),
            direction,
        })
    }
}
