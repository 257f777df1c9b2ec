//! In-process document store
//!
//! A complete implementation of the store traits backed by JSON documents in
//! memory. Selected with `memory://` connection strings; add
//! `?replicaSet=<name>` to make the database report a clustered topology,
//! which enables multi-document transactions.
//!
//! ```rust
//! use docstore_repository::store::memory::MemoryDatabase;
//!
//! let standalone = MemoryDatabase::open("memory://", "app").unwrap();
//! let replica_set = MemoryDatabase::open("memory://localhost/?replicaSet=rs0", "app").unwrap();
//! ```

mod eval;
mod session;

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub use session::MemorySession;
use session::Undo;

use crate::error::{sanitize_url, StoreError, StoreErrorKind, StoreOperation, StoreResult};
use crate::filter::Filter;
use crate::sort::SortSpec;
use crate::store::{
    BulkWriteResult, Collection, Database, DeleteResult, Document, FindOneAndUpdateOptions,
    FindOptions, IndexModel, ReturnDocument, Session, StoreCapabilities, UpdateOptions,
    UpdateResult, WriteModel,
};
use crate::update::UpdateDocument;

/// Failure-injection scope for session and transaction operations.
const TRANSACTION_SCOPE: &str = "";

#[derive(Debug, Default)]
pub(crate) struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexModel>,
}

pub(crate) struct CollectionState {
    name: String,
    data: RwLock<CollectionData>,
}

pub(crate) struct Shared {
    name: String,
    collections: DashMap<String, Arc<CollectionState>>,
    clustered: AtomicBool,
    increment_with_default: AtomicBool,
    transaction_lock: Arc<Mutex<()>>,
    failures: DashMap<(String, StoreOperation), usize>,
}

impl Shared {
    fn is_clustered(&self) -> bool {
        self.clustered.load(Ordering::SeqCst)
    }

    fn take_failure(&self, scope: &str, operation: StoreOperation) -> Option<StoreError> {
        let mut remaining = self.failures.get_mut(&(scope.to_string(), operation))?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(StoreError::with_context(
            operation,
            StoreErrorKind::Other,
            "injected failure",
            format!("collection={}", scope),
        ))
    }
}

/// In-memory database handle. Clones share the same data.
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    /// A standalone (non-clustered) database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                collections: DashMap::new(),
                clustered: AtomicBool::new(false),
                increment_with_default: AtomicBool::new(true),
                transaction_lock: Arc::new(Mutex::new(())),
                failures: DashMap::new(),
            }),
        }
    }

    /// Opens a database from a `memory://` connection string.
    pub fn open(url: &str, database_name: &str) -> StoreResult<Self> {
        let rest = url.strip_prefix("memory://").ok_or_else(|| {
            StoreError::connection_failed(format!(
                "unsupported connection string: {}",
                sanitize_url(url)
            ))
        })?;

        let database = Self::new(database_name);
        let replica_set = rest
            .split_once('?')
            .map(|(_, query)| query)
            .into_iter()
            .flat_map(|query| query.split('&'))
            .find_map(|param| param.strip_prefix("replicaSet="))
            .filter(|name| !name.is_empty());
        if let Some(replica_set) = replica_set {
            tracing::debug!(replica_set, "Memory store running as replica set");
            database.set_clustered(true);
        }
        Ok(database)
    }

    pub fn set_clustered(&self, clustered: bool) {
        self.shared.clustered.store(clustered, Ordering::SeqCst);
    }

    pub fn set_capabilities(&self, capabilities: StoreCapabilities) {
        self.shared
            .increment_with_default
            .store(capabilities.increment_with_default, Ordering::SeqCst);
    }

    /// Makes the next `operation` on `collection` fail.
    pub fn fail_next(&self, collection: &str, operation: StoreOperation) {
        *self
            .shared
            .failures
            .entry((collection.to_string(), operation))
            .or_insert(0) += 1;
    }

    /// Makes the next transaction commit fail.
    pub fn fail_next_commit(&self) {
        self.fail_next(TRANSACTION_SCOPE, StoreOperation::Transaction);
    }

    /// Snapshot of every document in `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.state(collection).data.read().await.documents.clone()
    }

    /// Names of the indexes on `collection`.
    pub async fn index_names(&self, collection: &str) -> Vec<String> {
        self.state(collection)
            .data
            .read()
            .await
            .indexes
            .iter()
            .map(IndexModel::index_name)
            .collect()
    }

    fn state(&self, name: &str) -> Arc<CollectionState> {
        self.shared
            .collections
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CollectionState {
                    name: name.to_string(),
                    data: RwLock::new(CollectionData::default()),
                })
            })
            .clone()
    }
}

impl fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("name", &self.shared.name)
            .field("collections", &self.shared.collections.len())
            .field("clustered", &self.shared.is_clustered())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MemoryCollection {
            state: self.state(name),
            shared: Arc::clone(&self.shared),
        })
    }

    async fn start_session(&self) -> StoreResult<Box<dyn Session>> {
        if let Some(err) = self
            .shared
            .take_failure(TRANSACTION_SCOPE, StoreOperation::Session)
        {
            return Err(err);
        }
        Ok(Box::new(MemorySession::new(Arc::clone(&self.shared))))
    }

    async fn is_clustered(&self) -> StoreResult<bool> {
        Ok(self.shared.is_clustered())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            increment_with_default: self.shared.increment_with_default.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct Applied {
    matched: u64,
    modified: u64,
    upserted: Option<Document>,
    before: Option<Document>,
    after: Option<Document>,
    undo: Vec<Undo>,
}

/// Collection handle over shared in-memory state.
pub struct MemoryCollection {
    state: Arc<CollectionState>,
    shared: Arc<Shared>,
}

impl MemoryCollection {
    fn check(&self, operation: StoreOperation) -> StoreResult<()> {
        match self.shared.take_failure(&self.state.name, operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn increment_with_default(&self) -> bool {
        self.shared.increment_with_default.load(Ordering::SeqCst)
    }

    /// Journals `undo` in the session's transaction, if one is running.
    async fn journal(&self, session: Option<&dyn Session>, undo: Vec<Undo>) {
        if let Some(session) = session::as_memory(session) {
            session.record(&self.state, undo).await;
        }
    }

    fn duplicate_key(&self, operation: StoreOperation, index: &str) -> StoreError {
        StoreError::with_context(
            operation,
            StoreErrorKind::DuplicateKey,
            format!("duplicate key error, index: {}", index),
            format!("collection={}", self.state.name),
        )
    }

    fn matching_positions(
        &self,
        data: &CollectionData,
        filter: &Filter,
        sort: Option<&SortSpec>,
    ) -> StoreResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (i, doc) in data.documents.iter().enumerate() {
            if eval::matches(doc, filter)? {
                positions.push(i);
            }
        }
        if let Some(sort) = sort {
            positions.sort_by(|a, b| eval::compare_by_spec(&data.documents[*a], &data.documents[*b], sort));
        }
        Ok(positions)
    }

    /// Inserts all of `documents` or, on a unique-index violation, none.
    fn insert_into(
        &self,
        data: &mut CollectionData,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<Undo>> {
        let mut staged = data.documents.clone();
        let mut undo = Vec::with_capacity(documents.len());
        for document in documents {
            if let Some(index) = eval::unique_violation(&data.indexes, &staged, &document, None) {
                return Err(self.duplicate_key(StoreOperation::Insert, &index));
            }
            undo.push(Undo::Insert(document.clone()));
            staged.push(document);
        }
        data.documents = staged;
        Ok(undo)
    }

    /// Applies `update` to the first (or every) match. A failure part way
    /// leaves the collection as it was.
    fn update_in(
        &self,
        data: &mut CollectionData,
        filter: &Filter,
        update: &UpdateDocument,
        upsert: bool,
        many: bool,
        sort: Option<&SortSpec>,
    ) -> StoreResult<Applied> {
        let mut positions = self.matching_positions(data, filter, sort)?;
        if !many {
            positions.truncate(1);
        }

        if positions.is_empty() {
            if !upsert {
                return Ok(Applied::default());
            }
            let mut document = Document::new();
            eval::seed_from_filter(filter, &mut document);
            eval::apply_update(&mut document, update, true, self.increment_with_default())?;
            if let Some(index) = eval::unique_violation(&data.indexes, &data.documents, &document, None) {
                return Err(self.duplicate_key(StoreOperation::Update, &index));
            }
            data.documents.push(document.clone());
            return Ok(Applied {
                upserted: Some(document.clone()),
                after: Some(document.clone()),
                undo: vec![Undo::Insert(document)],
                ..Applied::default()
            });
        }

        let mut applied = Applied::default();
        let mut replaced: Vec<(usize, Document)> = Vec::new();
        for position in positions {
            let before = data.documents[position].clone();
            let mut after = before.clone();
            let outcome = eval::apply_update(&mut after, update, false, self.increment_with_default())
                .and_then(|()| {
                    match eval::unique_violation(&data.indexes, &data.documents, &after, Some(position)) {
                        Some(index) => Err(self.duplicate_key(StoreOperation::Update, &index)),
                        None => Ok(()),
                    }
                });
            if let Err(e) = outcome {
                for (position, original) in replaced.into_iter().rev() {
                    data.documents[position] = original;
                }
                return Err(e);
            }

            applied.matched += 1;
            if after != before {
                applied.modified += 1;
                data.documents[position] = after.clone();
                applied.undo.push(Undo::Update {
                    before: before.clone(),
                    after: after.clone(),
                });
                replaced.push((position, before.clone()));
            }
            if applied.before.is_none() {
                applied.before = Some(before);
                applied.after = Some(after);
            }
        }
        Ok(applied)
    }

    /// Removes the first (or every) match, returning the removed documents
    /// in collection order.
    fn delete_in(
        &self,
        data: &mut CollectionData,
        filter: &Filter,
        many: bool,
    ) -> StoreResult<(Vec<Document>, Vec<Undo>)> {
        let mut positions = self.matching_positions(data, filter, None)?;
        if !many {
            positions.truncate(1);
        }
        let mut removed = Vec::with_capacity(positions.len());
        let mut undo = Vec::with_capacity(positions.len());
        for position in positions.into_iter().rev() {
            let document = data.documents.remove(position);
            undo.push(Undo::Delete {
                position,
                document: document.clone(),
            });
            removed.push(document);
        }
        removed.reverse();
        Ok((removed, undo))
    }
}

impl Applied {
    fn into_update_result(self) -> UpdateResult {
        UpdateResult {
            matched_count: self.matched,
            modified_count: self.modified,
            upserted_id: self
                .upserted
                .and_then(|doc| doc.get(crate::schema::ID_FIELD).cloned()),
            acknowledged: true,
        }
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
        _session: Option<&dyn Session>,
    ) -> StoreResult<Vec<Document>> {
        self.check(StoreOperation::Find)?;
        let mut found = {
            let data = self.state.data.read().await;
            let mut found = Vec::new();
            for doc in &data.documents {
                if eval::matches(doc, filter)? {
                    found.push(doc.clone());
                }
            }
            found
        };
        if let Some(sort) = &options.sort {
            eval::sort_documents(&mut found, sort);
        }
        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(found.into_iter().skip(skip).take(limit).collect())
    }

    async fn count(&self, filter: &Filter, _session: Option<&dyn Session>) -> StoreResult<u64> {
        self.check(StoreOperation::Count)?;
        let data = self.state.data.read().await;
        Ok(self.matching_positions(&data, filter, None)?.len() as u64)
    }

    async fn insert_one(
        &self,
        document: Document,
        session: Option<&dyn Session>,
    ) -> StoreResult<()> {
        self.check(StoreOperation::Insert)?;
        let mut data = self.state.data.write().await;
        let undo = self.insert_into(&mut data, vec![document])?;
        self.journal(session, undo).await;
        Ok(())
    }

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&dyn Session>,
    ) -> StoreResult<()> {
        self.check(StoreOperation::Insert)?;
        let mut data = self.state.data.write().await;
        let undo = self.insert_into(&mut data, documents)?;
        self.journal(session, undo).await;
        Ok(())
    }

    async fn update_one(
        &self,
        filter: &Filter,
        update: &UpdateDocument,
        options: UpdateOptions,
        session: Option<&dyn Session>,
    ) -> StoreResult<UpdateResult> {
        self.check(StoreOperation::Update)?;
        let mut data = self.state.data.write().await;
        let mut applied = self.update_in(&mut data, filter, update, options.upsert, false, None)?;
        self.journal(session, std::mem::take(&mut applied.undo)).await;
        Ok(applied.into_update_result())
    }

    async fn update_many(
        &self,
        filter: &Filter,
        update: &UpdateDocument,
        session: Option<&dyn Session>,
    ) -> StoreResult<UpdateResult> {
        self.check(StoreOperation::Update)?;
        let mut data = self.state.data.write().await;
        let mut applied = self.update_in(&mut data, filter, update, false, true, None)?;
        self.journal(session, std::mem::take(&mut applied.undo)).await;
        Ok(applied.into_update_result())
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &UpdateDocument,
        options: &FindOneAndUpdateOptions,
        session: Option<&dyn Session>,
    ) -> StoreResult<Option<Document>> {
        self.check(StoreOperation::Update)?;
        let mut data = self.state.data.write().await;
        let applied = self.update_in(
            &mut data,
            filter,
            update,
            options.upsert,
            false,
            options.sort.as_ref(),
        )?;
        self.journal(session, applied.undo).await;
        Ok(match options.return_document {
            ReturnDocument::Before => applied.before,
            ReturnDocument::After => applied.after,
        })
    }

    async fn find_one_and_delete(
        &self,
        filter: &Filter,
        session: Option<&dyn Session>,
    ) -> StoreResult<Option<Document>> {
        self.check(StoreOperation::Delete)?;
        let mut data = self.state.data.write().await;
        let (removed, undo) = self.delete_in(&mut data, filter, false)?;
        self.journal(session, undo).await;
        Ok(removed.into_iter().next())
    }

    async fn delete_one(
        &self,
        filter: &Filter,
        session: Option<&dyn Session>,
    ) -> StoreResult<DeleteResult> {
        self.check(StoreOperation::Delete)?;
        let mut data = self.state.data.write().await;
        let (removed, undo) = self.delete_in(&mut data, filter, false)?;
        self.journal(session, undo).await;
        Ok(DeleteResult {
            deleted_count: removed.len() as u64,
            acknowledged: true,
        })
    }

    async fn delete_many(
        &self,
        filter: &Filter,
        session: Option<&dyn Session>,
    ) -> StoreResult<DeleteResult> {
        self.check(StoreOperation::Delete)?;
        let mut data = self.state.data.write().await;
        let (removed, undo) = self.delete_in(&mut data, filter, true)?;
        self.journal(session, undo).await;
        Ok(DeleteResult {
            deleted_count: removed.len() as u64,
            acknowledged: true,
        })
    }

    /// Applies `models` in order. Models applied before a failing one stay
    /// applied.
    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        session: Option<&dyn Session>,
    ) -> StoreResult<BulkWriteResult> {
        self.check(StoreOperation::BulkWrite)?;
        let mut data = self.state.data.write().await;
        let mut result = BulkWriteResult::empty();
        let mut undo = Vec::new();
        let mut outcome = Ok(());
        for model in models {
            let step = match model {
                WriteModel::InsertOne { document } => {
                    self.insert_into(&mut data, vec![document]).map(|entries| {
                        result.inserted_count += 1;
                        entries
                    })
                }
                WriteModel::UpdateOne {
                    filter,
                    update,
                    upsert,
                } => self
                    .update_in(&mut data, &filter, &update, upsert, false, None)
                    .map(|applied| {
                        result.matched_count += applied.matched;
                        result.modified_count += applied.modified;
                        if applied.upserted.is_some() {
                            result.upserted_count += 1;
                        }
                        applied.undo
                    }),
                WriteModel::DeleteOne { filter } => {
                    self.delete_in(&mut data, &filter, false).map(|(removed, entries)| {
                        result.deleted_count += removed.len() as u64;
                        entries
                    })
                }
            };
            match step {
                Ok(entries) => undo.extend(entries),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.journal(session, undo).await;
        outcome.map(|()| result)
    }

    async fn create_indexes(&self, indexes: &[IndexModel]) -> StoreResult<Vec<String>> {
        self.check(StoreOperation::CreateIndexes)?;
        let mut data = self.state.data.write().await;
        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            let name = index.index_name();
            let existing = data
                .indexes
                .iter()
                .find(|existing| existing.keys == index.keys || existing.index_name() == name);
            match existing {
                Some(existing) if existing.keys == index.keys && existing.unique == index.unique => {}
                Some(existing) => {
                    return Err(StoreError::index_conflict(format!(
                        "index {} conflicts with existing index {}",
                        index,
                        existing
                    ))
                    .add_context(format!("collection={}", self.state.name)));
                }
                None => {
                    if index.unique {
                        for (i, doc) in data.documents.iter().enumerate() {
                            if eval::unique_violation(
                                std::slice::from_ref(index),
                                &data.documents[..i],
                                doc,
                                None,
                            )
                            .is_some()
                            {
                                return Err(self.duplicate_key(StoreOperation::CreateIndexes, &name));
                            }
                        }
                    }
                    data.indexes.push(index.clone());
                }
            }
            names.push(name);
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TransactionOptions;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn seeded(db: &MemoryDatabase) -> Arc<dyn Collection> {
        let collection = db.collection("items");
        collection
            .insert_many(
                vec![
                    doc(json!({"id": "a", "n": 3, "tag": "x"})),
                    doc(json!({"id": "b", "n": 1, "tag": "y"})),
                    doc(json!({"id": "c", "n": 2, "tag": "x"})),
                ],
                None,
            )
            .await
            .unwrap();
        collection
    }

    #[test]
    fn test_open_connection_strings() {
        assert!(!MemoryDatabase::open("memory://", "app").unwrap().shared.is_clustered());
        let clustered = MemoryDatabase::open("memory://host/?w=1&replicaSet=rs0", "app").unwrap();
        assert!(clustered.shared.is_clustered());
        assert_eq!(clustered.name(), "app");
        let debug = format!("{:?}", clustered);
        assert!(debug.contains("name: \"app\""));
        assert!(debug.contains("clustered: true"));

        let err = MemoryDatabase::open("mongodb://user:pw@host/app", "app").unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::ConnectionFailed);
        assert!(!err.message.contains("pw"));
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit() {
        let db = MemoryDatabase::new("app");
        let collection = seeded(&db).await;
        let options = FindOptions {
            sort: Some(SortSpec::ascending("n")),
            skip: 1,
            limit: Some(1),
        };
        let found = collection.find(&Filter::Empty, &options, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], json!("c"));
        assert_eq!(collection.count(&Filter::eq("tag", "x"), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_counts() {
        let db = MemoryDatabase::new("app");
        let collection = seeded(&db).await;
        let result = collection
            .update_many(&Filter::eq("tag", "x"), &UpdateDocument::new().set("tag", "x"), None)
            .await
            .unwrap();
        assert_eq!((result.matched_count, result.modified_count), (2, 0));

        let result = collection
            .update_one(
                &Filter::eq("tag", "x"),
                &UpdateDocument::new().set("tag", "z"),
                UpdateOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!((result.matched_count, result.modified_count), (1, 1));
    }

    #[tokio::test]
    async fn test_upsert_seeds_from_filter() {
        let db = MemoryDatabase::new("app");
        let collection = db.collection("counters");
        let filter = Filter::eq("name", "orders");
        let update = UpdateDocument::new().increment_or_init("value", 1, 5);
        let options = FindOneAndUpdateOptions {
            upsert: true,
            return_document: ReturnDocument::After,
            sort: None,
        };

        let first = collection
            .find_one_and_update(&filter, &update, &options, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(first), json!({"name": "orders", "value": 5}));

        let second = collection
            .find_one_and_update(&filter, &update, &options, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second["value"], json!(6));
    }

    #[tokio::test]
    async fn test_unique_index_enforced() {
        let db = MemoryDatabase::new("app");
        let collection = db.collection("users");
        collection
            .create_indexes(&[IndexModel::ascending("email").unique()])
            .await
            .unwrap();
        collection
            .insert_one(doc(json!({"email": "a@x"})), None)
            .await
            .unwrap();
        let err = collection
            .insert_one(doc(json!({"email": "a@x"})), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::DuplicateKey);
        assert_eq!(db.documents("users").await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_indexes_idempotent() {
        let db = MemoryDatabase::new("app");
        let collection = db.collection("users");
        let indexes = [IndexModel::descending("updatedAt"), IndexModel::ascending("email").unique()];
        collection.create_indexes(&indexes).await.unwrap();
        collection.create_indexes(&indexes).await.unwrap();
        assert_eq!(db.index_names("users").await, vec!["updatedAt_-1", "email_1"]);
    }

    #[tokio::test]
    async fn test_find_one_and_delete() {
        let db = MemoryDatabase::new("app");
        let collection = seeded(&db).await;
        let removed = collection
            .find_one_and_delete(&Filter::eq("id", "b"), None)
            .await
            .unwrap();
        assert_eq!(removed.unwrap()["n"], json!(1));
        assert_eq!(collection.count(&Filter::Empty, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bulk_write() {
        let db = MemoryDatabase::new("app");
        let collection = seeded(&db).await;
        let result = collection
            .bulk_write(
                vec![
                    WriteModel::UpdateOne {
                        filter: Filter::eq("id", "a"),
                        update: UpdateDocument::new().set("n", 10),
                        upsert: false,
                    },
                    WriteModel::UpdateOne {
                        filter: Filter::eq("id", "missing"),
                        update: UpdateDocument::new().set("n", 10),
                        upsert: false,
                    },
                    WriteModel::DeleteOne {
                        filter: Filter::eq("id", "c"),
                    },
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.deleted_count, 1);
    }

    #[tokio::test]
    async fn test_transactions_require_cluster() {
        let db = MemoryDatabase::new("app");
        let session = db.start_session().await.unwrap();
        let err = session
            .start_transaction(TransactionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::TransactionsUnsupported);
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn test_abort_restores_documents() {
        let db = MemoryDatabase::new("app");
        db.set_clustered(true);
        let collection = seeded(&db).await;

        let session = db.start_session().await.unwrap();
        session.start_transaction(TransactionOptions::default()).await.unwrap();
        collection
            .update_many(&Filter::Empty, &UpdateDocument::new().set("n", 0), Some(session.as_ref()))
            .await
            .unwrap();
        collection
            .insert_one(doc(json!({"id": "d"})), Some(session.as_ref()))
            .await
            .unwrap();
        db.collection("other")
            .insert_one(doc(json!({"id": "e"})), Some(session.as_ref()))
            .await
            .unwrap();
        session.abort_transaction().await.unwrap();

        let items = db.documents("items").await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["n"], json!(3));
        assert!(db.documents("other").await.is_empty());
    }

    #[tokio::test]
    async fn test_abort_keeps_writes_made_outside_transaction() {
        let db = MemoryDatabase::new("app");
        db.set_clustered(true);
        let collection = seeded(&db).await;

        let session = db.start_session().await.unwrap();
        session.start_transaction(TransactionOptions::default()).await.unwrap();
        collection
            .update_one(
                &Filter::eq("id", "a"),
                &UpdateDocument::new().set("n", 10),
                UpdateOptions::default(),
                Some(session.as_ref()),
            )
            .await
            .unwrap();
        collection
            .delete_one(&Filter::eq("id", "b"), Some(session.as_ref()))
            .await
            .unwrap();

        collection
            .insert_one(doc(json!({"id": "z", "n": 9})), None)
            .await
            .unwrap();
        collection
            .update_one(
                &Filter::eq("id", "c"),
                &UpdateDocument::new().set("tag", "outside"),
                UpdateOptions::default(),
                None,
            )
            .await
            .unwrap();
        session.abort_transaction().await.unwrap();

        let items = db.documents("items").await;
        let ids: Vec<&Value> = items.iter().map(|d| &d["id"]).collect();
        assert_eq!(ids, vec![&json!("a"), &json!("b"), &json!("c"), &json!("z")]);
        assert_eq!(items[0]["n"], json!(3));
        assert_eq!(items[2]["tag"], json!("outside"));
    }

    #[tokio::test]
    async fn test_failed_update_many_leaves_collection_unchanged() {
        let db = MemoryDatabase::new("app");
        let collection = seeded(&db).await;
        collection
            .create_indexes(&[IndexModel::ascending("n").unique()])
            .await
            .unwrap();

        // The first document takes n = 5, the second then collides with it
        let err = collection
            .update_many(&Filter::Empty, &UpdateDocument::new().set("n", 5), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::DuplicateKey);
        let counts: Vec<Value> = db
            .documents("items")
            .await
            .iter()
            .map(|d| d["n"].clone())
            .collect();
        assert_eq!(counts, vec![json!(3), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_commit_keeps_documents_and_releases_lock() {
        let db = MemoryDatabase::new("app");
        db.set_clustered(true);
        let collection = db.collection("items");

        let first = db.start_session().await.unwrap();
        first.start_transaction(TransactionOptions::default()).await.unwrap();
        collection
            .insert_one(doc(json!({"id": "a"})), Some(first.as_ref()))
            .await
            .unwrap();
        first.commit_transaction().await.unwrap();
        assert!(!first.in_transaction());

        let second = db.start_session().await.unwrap();
        second.start_transaction(TransactionOptions::default()).await.unwrap();
        second.commit_transaction().await.unwrap();
        assert_eq!(db.documents("items").await.len(), 1);
        assert!(second.commit_transaction().await.is_err());
    }

    #[tokio::test]
    async fn test_injected_failures_are_one_shot() {
        let db = MemoryDatabase::new("app");
        let collection = seeded(&db).await;
        db.fail_next("items", StoreOperation::Find);
        assert!(collection
            .find(&Filter::Empty, &FindOptions::default(), None)
            .await
            .is_err());
        assert_eq!(
            collection
                .find(&Filter::Empty, &FindOptions::default(), None)
                .await
                .unwrap()
                .len(),
            3
        );
    }
}
