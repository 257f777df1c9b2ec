//! Document-store collaborator contract
//!
//! The repository engine never talks to a driver directly. It speaks to the
//! object-safe traits in this module, and any document store can be plugged
//! in by implementing them:
//!
//! - [`Database`]: collection lookup, sessions, topology check, capabilities
//! - [`Collection`]: find/count/insert/update/delete/bulk-write/index primitives
//! - [`Session`]: unit of work with optional multi-document transaction
//!
//! [`memory`] provides a complete in-process implementation, selected by
//! `memory://` connection strings and used throughout the test suite.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::filter::Filter;
use crate::sort::SortSpec;
use crate::update::UpdateDocument;

pub mod memory;

/// A stored document.
pub type Document = Map<String, Value>;

/// Options for [`Collection::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub skip: u64,
    /// `None` returns every remaining document
    pub limit: Option<u64>,
}

/// Which version of a document a find-and-update returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    Before,
    #[default]
    After,
}

/// Options for [`Collection::find_one_and_update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndUpdateOptions {
    pub upsert: bool,
    pub return_document: ReturnDocument,
    pub sort: Option<SortSpec>,
}

/// Options for [`Collection::update_one`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub upsert: bool,
}

/// Outcome of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Value>,
    pub acknowledged: bool,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
    pub acknowledged: bool,
}

/// Outcome of a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    pub acknowledged: bool,
}

impl BulkWriteResult {
    /// An acknowledged result for an empty request.
    pub fn empty() -> Self {
        Self {
            acknowledged: true,
            ..Self::default()
        }
    }
}

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Filter,
        update: UpdateDocument,
        upsert: bool,
    },
    DeleteOne {
        filter: Filter,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexDirection {
    Ascending,
    Descending,
}

impl IndexDirection {
    fn as_i32(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// Declaration of an index on a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexModel {
    pub keys: Vec<(String, IndexDirection)>,
    pub unique: bool,
    pub background: bool,
    /// Explicit name; derived from the keys when absent
    pub name: Option<String>,
}

impl IndexModel {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(vec![(field.into(), IndexDirection::Ascending)])
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(vec![(field.into(), IndexDirection::Descending)])
    }

    /// Background index over `keys`.
    pub fn new(keys: Vec<(String, IndexDirection)>) -> Self {
        Self {
            keys,
            unique: false,
            background: true,
            name: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Index name, `field_1_other_-1` style unless set explicitly.
    pub fn index_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(field, direction)| format!("{}_{}", field, direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for IndexModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index_name())?;
        if self.unique {
            write!(f, " (unique)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// Options for [`Session::start_transaction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub read_preference: Option<ReadPreference>,
}

/// Optional features a store may support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Atomic find-and-increment that inserts with an initial value distinct
    /// from the increment ([`UpdateOperation::IncrementOrInit`](crate::update::UpdateOperation::IncrementOrInit))
    pub increment_with_default: bool,
}

/// A unit of work binding several operations together.
#[async_trait]
pub trait Session: Send + Sync {
    /// Begins a multi-document transaction.
    async fn start_transaction(&self, options: TransactionOptions) -> StoreResult<()>;

    async fn commit_transaction(&self) -> StoreResult<()>;

    async fn abort_transaction(&self) -> StoreResult<()>;

    fn in_transaction(&self) -> bool;

    /// Lets a store implementation recover its concrete session type.
    fn as_any(&self) -> &dyn Any;
}

/// Handle to one named collection.
///
/// Every data operation accepts an optional session; operations issued with
/// the same session participate in its transaction when one is active.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
        session: Option<&dyn Session>,
    ) -> StoreResult<Vec<Document>>;

    async fn count(&self, filter: &Filter, session: Option<&dyn Session>) -> StoreResult<u64>;

    async fn insert_one(&self, document: Document, session: Option<&dyn Session>)
        -> StoreResult<()>;

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&dyn Session>,
    ) -> StoreResult<()>;

    async fn update_one(
        &self,
        filter: &Filter,
        update: &UpdateDocument,
        options: UpdateOptions,
        session: Option<&dyn Session>,
    ) -> StoreResult<UpdateResult>;

    async fn update_many(
        &self,
        filter: &Filter,
        update: &UpdateDocument,
        session: Option<&dyn Session>,
    ) -> StoreResult<UpdateResult>;

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &UpdateDocument,
        options: &FindOneAndUpdateOptions,
        session: Option<&dyn Session>,
    ) -> StoreResult<Option<Document>>;

    async fn find_one_and_delete(
        &self,
        filter: &Filter,
        session: Option<&dyn Session>,
    ) -> StoreResult<Option<Document>>;

    async fn delete_one(
        &self,
        filter: &Filter,
        session: Option<&dyn Session>,
    ) -> StoreResult<DeleteResult>;

    async fn delete_many(
        &self,
        filter: &Filter,
        session: Option<&dyn Session>,
    ) -> StoreResult<DeleteResult>;

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        session: Option<&dyn Session>,
    ) -> StoreResult<BulkWriteResult>;

    /// Creates indexes. Creating an index equivalent to an existing one must
    /// succeed without changes.
    async fn create_indexes(&self, indexes: &[IndexModel]) -> StoreResult<Vec<String>>;
}

/// Handle to a database.
#[async_trait]
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    fn collection(&self, name: &str) -> Arc<dyn Collection>;

    async fn start_session(&self) -> StoreResult<Box<dyn Session>>;

    /// Topology check: true on deployments that support multi-document
    /// transactions (replica sets, sharded clusters).
    async fn is_clustered(&self) -> StoreResult<bool>;

    fn capabilities(&self) -> StoreCapabilities;
}
