//! Shared database context
//!
//! A [`DbContext`] is created once at startup and cloned into every
//! repository. It owns the database handle, the process-wide index registry
//! and the repository settings.

use chrono::FixedOffset;
use std::sync::Arc;

use crate::config::{Config, RepositoryConfig};
use crate::error::{sanitize_url, Error, Result, StoreOperation, StoreResult};
use crate::index::IndexRegistry;
use crate::schema::Entity;
use crate::sequence::SequenceGenerator;
use crate::store::memory::MemoryDatabase;
use crate::store::{Collection, Database, Session};

/// Database handle plus the state shared by all repositories.
#[derive(Clone)]
pub struct DbContext {
    database: Arc<dyn Database>,
    indexes: IndexRegistry,
    settings: RepositoryConfig,
}

impl DbContext {
    pub fn new(database: Arc<dyn Database>, settings: RepositoryConfig) -> Self {
        Self {
            database,
            indexes: IndexRegistry::new(),
            settings,
        }
    }

    /// Validates `config` and opens the in-process store it names.
    ///
    /// Only `memory://` connection strings are understood here. Other
    /// drivers plug in through [`connect_with`](Self::connect_with) or
    /// [`new`](Self::new).
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::connect_with(config, |url, database_name| {
            let database: Arc<dyn Database> = Arc::new(MemoryDatabase::open(url, database_name)?);
            Ok(database)
        })
        .await
    }

    /// Validates `config` and opens the store with `open`, which receives
    /// the connection string and database name.
    pub async fn connect_with<F>(config: &Config, open: F) -> Result<Self>
    where
        F: FnOnce(&str, &str) -> StoreResult<Arc<dyn Database>>,
    {
        config.validate()?;
        let url = &config.database.connection_string;

        tracing::info!(
            url = %sanitize_url(url),
            database = %config.database.database_name,
            "Connecting to document store"
        );

        let database = open(url, &config.database.database_name).map_err(|e| {
            tracing::error!(
                url = %sanitize_url(url),
                error = %e,
                "Failed to connect to document store"
            );
            e
        })?;

        let context = Self::new(database, config.repository.clone());
        let clustered = context.database.is_clustered().await?;
        tracing::info!(
            database = %context.database.name(),
            clustered,
            strategy = ?config.repository.sequence_strategy.resolve(context.database.capabilities()),
            "Connected to document store"
        );
        Ok(context)
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn collection(&self, name: &str) -> Arc<dyn Collection> {
        self.database.collection(name)
    }

    /// The collection configured for entity `E`.
    pub fn collection_for<E: Entity>(&self) -> Arc<dyn Collection> {
        self.collection(E::COLLECTION)
    }

    pub fn index_registry(&self) -> &IndexRegistry {
        &self.indexes
    }

    pub fn settings(&self) -> &RepositoryConfig {
        &self.settings
    }

    /// Offset used by availability-window filters.
    pub fn availability_offset(&self) -> Result<FixedOffset> {
        let minutes = self.settings.availability_utc_offset_minutes;
        FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "availability_utc_offset_minutes out of range: {}",
                minutes
            ))
        })
    }

    /// Sequence generator for the configured strategy and collection.
    pub fn sequence_generator(&self) -> Arc<dyn SequenceGenerator> {
        self.settings.sequence_strategy.build(
            Arc::clone(&self.database),
            &self.settings.sequence_collection,
            self.indexes.clone(),
        )
    }

    /// Starts a session for callers composing their own unit of work.
    pub async fn start_session(&self) -> Result<Box<dyn Session>> {
        self.database.start_session().await.map_err(|e| {
            tracing::error!(
                database = self.database.name(),
                operation = %StoreOperation::Session,
                error = %e,
                "Failed to start session"
            );
            Error::Store(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StoreError, StoreErrorKind};
    use crate::store::TransactionOptions;

    fn config(connection_string: &str) -> Config {
        let mut config = Config::default();
        config.database.connection_string = connection_string.to_string();
        config.database.database_name = "shop".to_string();
        config
    }

    #[tokio::test]
    async fn test_connect_memory_store() {
        let context = DbContext::connect(&config("memory://")).await.unwrap();
        assert_eq!(context.database().name(), "shop");
        assert!(!context.database().is_clustered().await.unwrap());
        assert_eq!(context.settings().default_limit, 50);
        assert_eq!(
            context.availability_offset().unwrap(),
            FixedOffset::east_opt(3 * 3600).unwrap()
        );
    }

    #[tokio::test]
    async fn test_connect_replica_set_supports_transactions() {
        let context = DbContext::connect(&config("memory://db1,db2/?replicaSet=rs0"))
            .await
            .unwrap();
        let session = context.start_session().await.unwrap();
        session
            .start_transaction(TransactionOptions::default())
            .await
            .unwrap();
        session.abort_transaction().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let err = DbContext::connect(&config("mongodb://admin:secret@db/shop"))
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.store_error().map(|e| e.kind),
            Some(StoreErrorKind::ConnectionFailed)
        );
        assert!(!err.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_connect_with_custom_opener() {
        let mut opened = None;
        let context = DbContext::connect_with(&config("docstore://cluster-a/shop"), |url, name| {
            opened = Some((url.to_string(), name.to_string()));
            let database = MemoryDatabase::new(name);
            database.set_clustered(true);
            let database: Arc<dyn Database> = Arc::new(database);
            Ok(database)
        })
        .await
        .unwrap();

        assert_eq!(
            opened,
            Some(("docstore://cluster-a/shop".to_string(), "shop".to_string()))
        );
        assert!(context.database().is_clustered().await.unwrap());

        let err = DbContext::connect_with(&config("docstore://down"), |_, _| {
            Err(StoreError::connection_failed("refused"))
        })
        .await
        .err()
        .unwrap();
        assert_eq!(
            err.store_error().map(|e| e.kind),
            Some(StoreErrorKind::ConnectionFailed)
        );
    }

    #[tokio::test]
    async fn test_connect_validates_config() {
        let err = DbContext::connect(&config("")).await.err().unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_clone_shares_database_and_offset_bounds() {
        let context = DbContext::new(
            Arc::new(MemoryDatabase::new("app")),
            RepositoryConfig::default(),
        );
        let clone = context.clone();
        assert!(Arc::ptr_eq(clone.database(), context.database()));

        let mut settings = RepositoryConfig::default();
        settings.availability_utc_offset_minutes = 24 * 60;
        let out_of_range = DbContext::new(Arc::new(MemoryDatabase::new("app")), settings);
        assert!(out_of_range.availability_offset().is_err());
    }
}
