//! Sessions and transactions for the in-memory store
//!
//! Transactions are serialized database-wide: starting one waits for the
//! previous transaction to commit or abort. Every document a transaction
//! inserts, modifies or removes is journaled; abort replays the journal
//! backwards, leaving documents written outside the transaction alone.

use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{CollectionData, CollectionState, Shared, TRANSACTION_SCOPE};
use crate::error::{StoreError, StoreOperation, StoreResult};
use crate::store::{Document, Session, TransactionOptions};

/// How to revert one document-level write.
#[derive(Debug, Clone)]
pub(super) enum Undo {
    /// Remove the inserted document
    Insert(Document),
    /// Put `before` back in place of `after`
    Update { before: Document, after: Document },
    /// Re-insert a removed document at its old position
    Delete { position: usize, document: Document },
}

impl Undo {
    /// Reverts the write. Documents are located by content; one that has
    /// since been changed outside the transaction is left as it is.
    fn revert(self, data: &mut CollectionData) {
        match self {
            Undo::Insert(document) => {
                if let Some(position) = data.documents.iter().position(|d| *d == document) {
                    data.documents.remove(position);
                }
            }
            Undo::Update { before, after } => {
                if let Some(current) = data.documents.iter_mut().find(|d| **d == after) {
                    *current = before;
                }
            }
            Undo::Delete { position, document } => {
                let position = position.min(data.documents.len());
                data.documents.insert(position, document);
            }
        }
    }
}

struct ActiveTransaction {
    _serialized: OwnedMutexGuard<()>,
    journal: Vec<(Arc<CollectionState>, Undo)>,
}

/// Session handle returned by [`MemoryDatabase::start_session`](crate::store::Database::start_session).
pub struct MemorySession {
    shared: Arc<Shared>,
    active: AtomicBool,
    transaction: Mutex<Option<ActiveTransaction>>,
}

impl MemorySession {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            active: AtomicBool::new(false),
            transaction: Mutex::new(None),
        }
    }

    /// Journals writes made to `state` while a transaction is running.
    pub(super) async fn record(&self, state: &Arc<CollectionState>, undo: Vec<Undo>) {
        if undo.is_empty() || !self.in_transaction() {
            return;
        }
        if let Some(transaction) = self.transaction.lock().await.as_mut() {
            transaction
                .journal
                .extend(undo.into_iter().map(|entry| (Arc::clone(state), entry)));
        }
    }

    fn take_transaction(&self, transaction: &mut Option<ActiveTransaction>) -> StoreResult<ActiveTransaction> {
        let active = transaction
            .take()
            .ok_or_else(|| StoreError::transaction_failed("no transaction in progress"))?;
        self.active.store(false, Ordering::SeqCst);
        Ok(active)
    }
}

/// Recovers the memory session behind a trait object.
pub(super) fn as_memory(session: Option<&dyn Session>) -> Option<&MemorySession> {
    session?.as_any().downcast_ref::<MemorySession>()
}

#[async_trait]
impl Session for MemorySession {
    async fn start_transaction(&self, options: TransactionOptions) -> StoreResult<()> {
        if !self.shared.is_clustered() {
            return Err(StoreError::transactions_unsupported(
                "multi-document transactions require a clustered deployment",
            ));
        }
        if self.in_transaction() {
            return Err(StoreError::transaction_failed("transaction already in progress"));
        }
        if let Some(err) = self
            .shared
            .take_failure(TRANSACTION_SCOPE, StoreOperation::Session)
        {
            return Err(err);
        }

        let serialized = Arc::clone(&self.shared.transaction_lock).lock_owned().await;
        *self.transaction.lock().await = Some(ActiveTransaction {
            _serialized: serialized,
            journal: Vec::new(),
        });
        self.active.store(true, Ordering::SeqCst);
        tracing::trace!(
            database = %self.shared.name,
            read_preference = ?options.read_preference,
            "Transaction started"
        );
        Ok(())
    }

    async fn commit_transaction(&self) -> StoreResult<()> {
        if let Some(err) = self
            .shared
            .take_failure(TRANSACTION_SCOPE, StoreOperation::Transaction)
        {
            return Err(err);
        }
        let mut transaction = self.transaction.lock().await;
        self.take_transaction(&mut transaction)?;
        tracing::trace!(database = %self.shared.name, "Transaction committed");
        Ok(())
    }

    async fn abort_transaction(&self) -> StoreResult<()> {
        let active = {
            let mut transaction = self.transaction.lock().await;
            self.take_transaction(&mut transaction)?
        };
        for (state, undo) in active.journal.into_iter().rev() {
            undo.revert(&mut *state.data.write().await);
        }
        tracing::trace!(database = %self.shared.name, "Transaction aborted");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
