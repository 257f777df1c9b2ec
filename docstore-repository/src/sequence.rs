//! Auto-increment sequences
//!
//! Counters live in a dedicated collection, one `{ name, value }` record per
//! sequence, created on first use. Two strategies produce the next value:
//!
//! - [`UpsertIncrementSequence`]: one atomic find-and-increment that inserts
//!   the counter with its initial value when absent. Requires the store's
//!   increment-with-default primitive.
//! - [`TransactionalSequence`]: increment inside a transaction, inserting the
//!   counter when absent, then commit. Aborts and re-raises on any failure.
//!   Degrades gracefully on deployments without transactions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Error, Result, StoreError, StoreErrorKind, StoreOperation, StoreResult};
use crate::filter::Filter;
use crate::index::IndexRegistry;
use crate::store::{
    Collection, Database, Document, FindOneAndUpdateOptions, IndexModel, ReadPreference,
    ReturnDocument, Session, StoreCapabilities, TransactionOptions,
};
use crate::update::UpdateDocument;

/// Default name of the collection holding sequence counters.
pub const DEFAULT_SEQUENCE_COLLECTION: &str = "auto_inc_sequences_internal";

const NAME_FIELD: &str = "name";
const VALUE_FIELD: &str = "value";

/// A persisted counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub name: String,
    pub value: i64,
}

impl SequenceRecord {
    fn from_document(sequence: &str, document: Document) -> StoreResult<Self> {
        serde_json::from_value(serde_json::Value::Object(document)).map_err(|e| {
            StoreError::query_failed(
                StoreOperation::Update,
                format!("malformed counter for sequence '{}': {}", sequence, e),
            )
        })
    }

    fn into_document(self) -> Document {
        let mut document = Document::new();
        document.insert(NAME_FIELD.to_string(), self.name.into());
        document.insert(VALUE_FIELD.to_string(), self.value.into());
        document
    }
}

/// Produces strictly increasing values per sequence name.
#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    /// Next value of `sequence`. A new sequence starts at `start_value + 1`;
    /// negative start values are treated as zero.
    async fn next(&self, sequence: &str, start_value: i64) -> Result<i64>;
}

/// How sequence values are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStrategy {
    /// Upsert-increment when the store supports it, transactional otherwise
    #[default]
    Auto,
    UpsertIncrement,
    Transactional,
}

impl SequenceStrategy {
    /// Replaces `Auto` with the concrete strategy for `capabilities`.
    pub fn resolve(self, capabilities: StoreCapabilities) -> Self {
        match self {
            Self::Auto if capabilities.increment_with_default => Self::UpsertIncrement,
            Self::Auto => Self::Transactional,
            other => other,
        }
    }

    /// Builds the generator for this strategy over `collection` in `database`.
    pub fn build(
        self,
        database: Arc<dyn Database>,
        collection: &str,
        indexes: IndexRegistry,
    ) -> Arc<dyn SequenceGenerator> {
        let counters = database.collection(collection);
        match self.resolve(database.capabilities()) {
            Self::UpsertIncrement => Arc::new(UpsertIncrementSequence::new(counters, indexes)),
            _ => Arc::new(TransactionalSequence::new(database, counters, indexes)),
        }
    }
}

fn sequence_error(sequence: &str, source: StoreError) -> Error {
    Error::SequenceGeneration {
        sequence: sequence.to_string(),
        source,
    }
}

/// Value a new counter starts at, checked before any store call.
fn initial_value(sequence: &str, start_value: i64) -> Result<i64> {
    start_value.max(0).checked_add(1).ok_or_else(|| {
        sequence_error(
            sequence,
            StoreError::query_failed(
                StoreOperation::Update,
                format!("start value {} leaves no room for sequence '{}'", start_value, sequence),
            ),
        )
    })
}

fn counter_indexes() -> Vec<IndexModel> {
    vec![IndexModel::ascending(NAME_FIELD).unique()]
}

async fn upsert_increment(
    counters: &dyn Collection,
    sequence: &str,
    initial: i64,
) -> StoreResult<i64> {
    let options = FindOneAndUpdateOptions {
        upsert: true,
        return_document: ReturnDocument::After,
        sort: None,
    };
    let update = UpdateDocument::new().increment_or_init(VALUE_FIELD, 1, initial);
    let document = counters
        .find_one_and_update(&Filter::eq(NAME_FIELD, sequence), &update, &options, None)
        .await?
        .ok_or_else(|| {
            StoreError::query_failed(
                StoreOperation::Update,
                format!("upsert returned no counter for sequence '{}'", sequence),
            )
        })?;
    Ok(SequenceRecord::from_document(sequence, document)?.value)
}

/// Atomic find-and-increment with insert-on-absent.
pub struct UpsertIncrementSequence {
    counters: Arc<dyn Collection>,
    indexes: IndexRegistry,
}

impl UpsertIncrementSequence {
    pub fn new(counters: Arc<dyn Collection>, indexes: IndexRegistry) -> Self {
        Self { counters, indexes }
    }
}

#[async_trait]
impl SequenceGenerator for UpsertIncrementSequence {
    async fn next(&self, sequence: &str, start_value: i64) -> Result<i64> {
        let initial = initial_value(sequence, start_value)?;
        self.indexes
            .ensure(self.counters.as_ref(), counter_indexes)
            .await?;

        upsert_increment(self.counters.as_ref(), sequence, initial)
            .await
            .map_err(|e| {
                tracing::error!(
                    sequence,
                    collection = self.counters.name(),
                    error = %e,
                    "Failed to generate sequence value"
                );
                sequence_error(sequence, e)
            })
    }
}

/// Read-modify-write inside a multi-document transaction.
pub struct TransactionalSequence {
    database: Arc<dyn Database>,
    counters: Arc<dyn Collection>,
    indexes: IndexRegistry,
}

impl TransactionalSequence {
    pub fn new(
        database: Arc<dyn Database>,
        counters: Arc<dyn Collection>,
        indexes: IndexRegistry,
    ) -> Self {
        Self {
            database,
            counters,
            indexes,
        }
    }

    async fn increment(
        &self,
        sequence: &str,
        session: Option<&dyn Session>,
    ) -> StoreResult<Option<i64>> {
        let options = FindOneAndUpdateOptions {
            upsert: false,
            return_document: ReturnDocument::After,
            sort: None,
        };
        self.counters
            .find_one_and_update(
                &Filter::eq(NAME_FIELD, sequence),
                &UpdateDocument::new().inc(VALUE_FIELD, 1),
                &options,
                session,
            )
            .await?
            .map(|document| SequenceRecord::from_document(sequence, document).map(|r| r.value))
            .transpose()
    }

    /// Increments the counter, inserting it at `initial` when absent.
    ///
    /// Outside a transaction a concurrent caller may create the counter
    /// between the increment and the insert; the unique `name` index rejects
    /// the second insert and the counter it lost to is incremented instead.
    async fn increment_or_insert(
        &self,
        sequence: &str,
        initial: i64,
        session: Option<&dyn Session>,
    ) -> StoreResult<i64> {
        if let Some(value) = self.increment(sequence, session).await? {
            return Ok(value);
        }

        let record = SequenceRecord {
            name: sequence.to_string(),
            value: initial,
        };
        match self.counters.insert_one(record.into_document(), session).await {
            Ok(()) => Ok(initial),
            Err(e) if session.is_none() && e.kind == StoreErrorKind::DuplicateKey => {
                tracing::debug!(sequence, "Counter created concurrently, incrementing it");
                self.increment(sequence, None).await?.ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_transaction(
        &self,
        session: &dyn Session,
        sequence: &str,
        initial: i64,
    ) -> StoreResult<i64> {
        session
            .start_transaction(TransactionOptions {
                read_preference: Some(ReadPreference::Primary),
            })
            .await?;

        let outcome = match self
            .increment_or_insert(sequence, initial, Some(session))
            .await
        {
            Ok(value) => session.commit_transaction().await.map(|()| value),
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::error!(
                sequence,
                collection = self.counters.name(),
                error = %e,
                "Sequence transaction failed, aborting"
            );
            if let Err(abort_error) = session.abort_transaction().await {
                tracing::error!(
                    sequence,
                    error = %abort_error,
                    "Failed to abort sequence transaction"
                );
            }
        }
        outcome
    }
}

#[async_trait]
impl SequenceGenerator for TransactionalSequence {
    async fn next(&self, sequence: &str, start_value: i64) -> Result<i64> {
        let initial = initial_value(sequence, start_value)?;
        self.indexes
            .ensure(self.counters.as_ref(), counter_indexes)
            .await?;

        let clustered = self
            .database
            .is_clustered()
            .await
            .map_err(|e| sequence_error(sequence, e))?;

        if !clustered {
            let result = if self.database.capabilities().increment_with_default {
                tracing::warn!(
                    sequence,
                    "Transactions unavailable, using upsert-increment"
                );
                upsert_increment(self.counters.as_ref(), sequence, initial).await
            } else {
                tracing::warn!(
                    sequence,
                    "Transactions unavailable, updating sequence without a transaction"
                );
                self.increment_or_insert(sequence, initial, None).await
            };
            return result.map_err(|e| {
                tracing::error!(
                    sequence,
                    collection = self.counters.name(),
                    error = %e,
                    "Failed to generate sequence value"
                );
                sequence_error(sequence, e)
            });
        }

        let session = self
            .database
            .start_session()
            .await
            .map_err(|e| sequence_error(sequence, e))?;
        self.run_transaction(session.as_ref(), sequence, initial)
            .await
            .map_err(|e| sequence_error(sequence, e))
    }
}
