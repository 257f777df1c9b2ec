//! # docstore-repository
//!
//! Generic repository engine for document stores. One
//! [`DocumentRepository`](repository::DocumentRepository) per entity type gives
//! CRUD, filtered search, paging, soft delete, bulk updates and auto-increment
//! sequences without hand-written per-entity queries.
//!
//! ## Features
//!
//! - **Schema-validated filters**: [`FilterBuilder`](filter::FilterBuilder) rejects unknown fields
//! - **Forgiving sorts**: [`SortResolver`](sort::SortResolver) drops unknown sort keys
//! - **Partial updates**: payload fields become set operations; nulls are never applied
//! - **Paging**: next-page detection through a concurrent one-row lookahead query
//! - **Soft delete**: entities declaring `deletedAt` are hidden, not removed, by default
//! - **Sequences**: upsert-increment or transactional counters
//! - **Index provisioning**: once per collection per process, on first use
//!
//! ## Example
//!
//! ```rust,no_run
//! use docstore_repository::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let context = DbContext::connect(&config).await?;
//!     let next_order = context.sequence_generator().next("orders", 0).await?;
//!     tracing::info!(next_order, "Allocated order number");
//!
//!     shutdown_tracing();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod ids;
pub mod index;
pub mod observability;
pub mod policy;
pub mod repository;
pub mod schema;
pub mod sequence;
pub mod sort;
pub mod store;
pub mod types;
pub mod update;

pub mod prelude {
    pub use crate::config::{Config, DatabaseConfig, RepositoryConfig, ServiceConfig};
    pub use crate::context::DbContext;
    pub use crate::error::{Error, Result, StoreError, StoreErrorKind, StoreOperation};
    pub use crate::filter::{Filter, FilterBuilder};
    pub use crate::ids::DocumentId;
    pub use crate::index::IndexRegistry;
    pub use crate::observability::{init_tracing, shutdown_tracing};
    pub use crate::policy::{default_index_models, default_read_only_fields, DefaultPolicy, RepositoryPolicy};
    pub use crate::repository::{
        DocumentRepository, Page, PageRequest, RepositoryOperation, UpdateOutcome, WriteResult,
    };
    pub use crate::schema::{Entity, EntitySchema};
    pub use crate::sequence::{SequenceGenerator, SequenceStrategy};
    pub use crate::sort::{SortDirection, SortResolver, SortSpec};
    pub use crate::store::{Collection, Database, IndexModel, Session};
    pub use crate::types::{DayTiming, GeoPoint, NearBy};
    pub use crate::update::{synthesize, UpdateDocument, UpdateOperation, UpdatePayload};
}
