//! Lazy, once-per-process index provisioning

use dashmap::DashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::store::{Collection, IndexModel};

/// Registry of collections whose indexes have been provisioned.
///
/// Shared by every repository created from the same
/// [`DbContext`](crate::context::DbContext). Concurrent first callers may all
/// issue index creation, which the store treats as idempotent. A collection
/// is marked only after creation succeeds, so a failed attempt is retried by
/// the next caller.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    provisioned: Arc<DashSet<String>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_provisioned(&self, collection: &str) -> bool {
        self.provisioned.contains(collection)
    }

    /// Number of collections provisioned so far.
    pub fn len(&self) -> usize {
        self.provisioned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.provisioned.is_empty()
    }

    /// Creates the indexes produced by `build` unless `collection` was
    /// already provisioned.
    pub async fn ensure<F>(&self, collection: &dyn Collection, build: F) -> Result<()>
    where
        F: FnOnce() -> Vec<IndexModel>,
    {
        let name = collection.name();
        if self.is_provisioned(name) {
            return Ok(());
        }

        let indexes = build();
        if !indexes.is_empty() {
            let created = collection.create_indexes(&indexes).await.map_err(|e| {
                tracing::error!(
                    collection = name,
                    error = %e,
                    "Failed to create indexes"
                );
                e
            })?;
            tracing::info!(
                collection = name,
                indexes = ?created,
                "Indexes provisioned"
            );
        }

        self.provisioned.insert(name.to_string());
        Ok(())
    }
}
