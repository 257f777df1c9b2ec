//! Generic document repository
//!
//! [`DocumentRepository`] implements get/find/page/create/update/delete,
//! bulk updates and sequences for one entity collection. Entity-specific
//! behaviour comes from a [`RepositoryPolicy`]; partial updates come from
//! any [`UpdatePayload`].
//!
//! # Soft delete
//!
//! Entities that declare `deletedAt` are soft-deleted by default: deletes set
//! the timestamp and every read excludes documents where it is set. Pass
//! `permanent = true` to remove the document. Entities without the field are
//! always removed.
//!
//! # Example
//!
//! ```rust,ignore
//! let context = DbContext::connect(&Config::load()?).await?;
//! let users: DocumentRepository<User, UserChanges, UserPolicy> =
//!     DocumentRepository::with_policy(&context, UserPolicy);
//!
//! let user = users.create(User::new("Ada", "ada@example.com")).await?;
//! let page = users
//!     .find_paged(FilterBuilder::<User>::eq("name", "Ada")?, &PageRequest::new(0, 20))
//!     .await?;
//! users.delete_one(user.id().unwrap().as_str(), false).await?;
//! ```

mod error;
mod page;

#[cfg(test)]
mod tests;

pub use error::RepositoryOperation;
pub use page::{Page, PageRequest, UpdateOutcome, WriteResult};

use chrono::Utc;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::DbContext;
use crate::error::{Error, Result, StoreError};
use crate::filter::{Filter, FilterBuilder};
use crate::ids::DocumentId;
use crate::policy::{DefaultPolicy, RepositoryPolicy};
use crate::schema::{Entity, DELETED_AT_FIELD, ID_FIELD};
use crate::sequence::SequenceGenerator;
use crate::sort::{SortResolver, SortSpec};
use crate::store::{
    BulkWriteResult, Collection, Document, FindOneAndUpdateOptions, FindOptions, ReturnDocument,
    Session, UpdateOptions, WriteModel,
};
use crate::types::NearBy;
use crate::update::{synthesize, UpdateDocument, UpdatePayload};

/// Repository over the collection of entity `E`, updated through payloads
/// of type `U`.
pub struct DocumentRepository<E, U, P = DefaultPolicy>
where
    E: Entity,
    U: UpdatePayload,
    P: RepositoryPolicy<E>,
{
    context: DbContext,
    collection: Arc<dyn Collection>,
    policy: Arc<P>,
    sequences: Arc<dyn SequenceGenerator>,
    _marker: PhantomData<fn() -> (E, U)>,
}

impl<E, U, P> Clone for DocumentRepository<E, U, P>
where
    E: Entity,
    U: UpdatePayload,
    P: RepositoryPolicy<E>,
{
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            collection: Arc::clone(&self.collection),
            policy: Arc::clone(&self.policy),
            sequences: Arc::clone(&self.sequences),
            _marker: PhantomData,
        }
    }
}

impl<E, U, P> DocumentRepository<E, U, P>
where
    E: Entity,
    U: UpdatePayload,
    P: RepositoryPolicy<E> + Default,
{
    pub fn new(context: &DbContext) -> Self {
        Self::with_policy(context, P::default())
    }
}

impl<E, U, P> DocumentRepository<E, U, P>
where
    E: Entity,
    U: UpdatePayload,
    P: RepositoryPolicy<E>,
{
    pub fn with_policy(context: &DbContext, policy: P) -> Self {
        Self {
            context: context.clone(),
            collection: context.collection_for::<E>(),
            policy: Arc::new(policy),
            sequences: context.sequence_generator(),
            _marker: PhantomData,
        }
    }

    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn context(&self) -> &DbContext {
        &self.context
    }

    /// Whether deletes default to soft deletes for this repository.
    pub fn soft_delete_enabled(&self) -> bool {
        E::SCHEMA.supports_soft_delete() && self.policy.supports_soft_delete()
    }

    /// Provisions the policy's indexes once per process.
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.context
            .index_registry()
            .ensure(self.collection.as_ref(), || self.policy.index_models())
            .await
    }

    // ------------------------------------------------------------------
    // Filters using repository settings
    // ------------------------------------------------------------------

    /// Availability window for the current instant at the configured offset.
    pub fn availability_filter(&self, field: &str, available: bool) -> Result<Filter> {
        let offset = self.context.availability_offset()?;
        FilterBuilder::<E>::time_availability_at(field, Utc::now(), offset, available)
    }

    /// Proximity filter using the configured default radius.
    pub fn near_filter(&self, field: &str, latitude: f64, longitude: f64) -> Result<Filter> {
        let near = NearBy::new(latitude, longitude)
            .with_radius(self.context.settings().default_near_radius_meters);
        FilterBuilder::<E>::geo_near(field, &near)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Live document with the given identifier.
    pub async fn get(&self, id: &str) -> Result<Option<E>> {
        let filter = FilterBuilder::<E>::id(id)?;
        self.first(filter, None, RepositoryOperation::Get).await
    }

    /// First live document matching `filter`, ordered by `order_by`.
    pub async fn find_one(&self, filter: Filter, order_by: Option<&str>) -> Result<Option<E>> {
        let sort = order_by.and_then(SortResolver::<E>::resolve);
        self.find_one_sorted(filter, sort).await
    }

    pub async fn find_one_sorted(&self, filter: Filter, sort: Option<SortSpec>) -> Result<Option<E>> {
        let filter = FilterBuilder::<E>::exclude_deleted(filter);
        self.first(filter, sort, RepositoryOperation::Find).await
    }

    /// Number of live documents matching `filter`.
    pub async fn count(&self, filter: Filter) -> Result<u64> {
        self.ensure_indexes().await?;
        let filter = FilterBuilder::<E>::exclude_deleted(filter);
        self.collection
            .count(&filter, None)
            .await
            .map_err(|e| self.store_failure(RepositoryOperation::Count, e))
    }

    /// Page of live documents. `limit` defaults to the configured page size
    /// and `-1` returns every document.
    pub async fn find(
        &self,
        filter: Filter,
        offset: Option<u64>,
        limit: Option<i64>,
        order_by: Option<&str>,
    ) -> Result<Page<E>> {
        let sort = order_by.and_then(SortResolver::<E>::resolve);
        let limit = limit.unwrap_or(self.context.settings().default_limit);
        self.page(filter, sort, offset.unwrap_or(0), limit, None).await
    }

    /// Like [`find`](Self::find) with every filter AND-ed together.
    pub async fn find_all(
        &self,
        filters: Vec<Filter>,
        offset: Option<u64>,
        limit: Option<i64>,
        order_by: Option<&str>,
    ) -> Result<Page<E>> {
        self.find(Filter::and(filters), offset, limit, order_by).await
    }

    pub async fn find_paged(&self, filter: Filter, request: &PageRequest) -> Result<Page<E>> {
        let order_by = request.to_order_by();
        self.find(filter, request.offset, request.limit, order_by.as_deref())
            .await
    }

    /// Page described by raw find options. No limit means every document.
    pub async fn find_with_options(&self, filter: Filter, options: FindOptions) -> Result<Page<E>> {
        let limit = options
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        self.page(filter, options.sort, options.skip, limit, None).await
    }

    /// Pagination engine.
    ///
    /// Runs the page query and a one-row lookahead at `offset + limit`
    /// concurrently, on the same session when one is given. A negative
    /// `limit` is unbounded and skips the lookahead.
    pub async fn page(
        &self,
        filter: Filter,
        sort: Option<SortSpec>,
        offset: u64,
        limit: i64,
        session: Option<&dyn Session>,
    ) -> Result<Page<E>> {
        self.ensure_indexes().await?;
        let filter = FilterBuilder::<E>::exclude_deleted(filter);
        tracing::debug!(
            collection = self.collection.name(),
            filter = %filter.to_document(),
            offset,
            limit,
            "Finding documents"
        );

        let Ok(page_size) = u64::try_from(limit) else {
            let options = FindOptions {
                sort,
                skip: offset,
                limit: None,
            };
            let documents = self
                .collection
                .find(&filter, &options, session)
                .await
                .map_err(|e| self.store_failure(RepositoryOperation::Find, e))?;
            return Ok(Page {
                documents: decode_all(documents)?,
                offset,
                limit: i64::MAX,
                has_next_page: false,
            });
        };

        let page_options = FindOptions {
            sort: sort.clone(),
            skip: offset,
            limit: Some(page_size),
        };
        let lookahead_options = FindOptions {
            sort,
            skip: offset.saturating_add(page_size),
            limit: Some(1),
        };
        let (documents, lookahead) = futures::try_join!(
            self.collection.find(&filter, &page_options, session),
            self.collection.find(&filter, &lookahead_options, session),
        )
        .map_err(|e| self.store_failure(RepositoryOperation::Find, e))?;

        Ok(Page {
            documents: decode_all(documents)?,
            offset,
            limit,
            has_next_page: !lookahead.is_empty(),
        })
    }

    // ------------------------------------------------------------------
    // Creates
    // ------------------------------------------------------------------

    /// Inserts `entity`, assigning an identifier when it has none (or one
    /// of another entity type) and stamping both timestamps.
    pub async fn create(&self, mut entity: E) -> Result<E> {
        entity.prepare_for_insert(Utc::now());
        let document = encode(&entity)?;

        self.ensure_indexes().await?;
        self.collection
            .insert_one(document, None)
            .await
            .map_err(|e| self.store_failure(RepositoryOperation::Create, e))?;
        Ok(entity)
    }

    /// Inserts every entity in one call; empty input is a no-op.
    pub async fn create_many(&self, mut entities: Vec<E>) -> Result<Vec<E>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        let now = Utc::now();
        let mut documents = Vec::with_capacity(entities.len());
        for entity in &mut entities {
            entity.prepare_for_insert(now);
            documents.push(encode(entity)?);
        }

        self.ensure_indexes().await?;
        self.collection
            .insert_many(documents, None)
            .await
            .map_err(|e| self.store_failure(RepositoryOperation::Create, e))?;
        Ok(entities)
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    /// Applies a self-identifying payload.
    pub async fn update(&self, payload: &U) -> Result<UpdateOutcome> {
        let id = payload.id().unwrap_or_default();
        self.update_by_id(id, payload).await
    }

    /// Applies `payload` to the live document with identifier `id`.
    pub async fn update_by_id(&self, id: &str, payload: &U) -> Result<UpdateOutcome> {
        let filter = FilterBuilder::<E>::id(id)?;
        self.update_where(filter, payload, false).await
    }

    /// Applies `payload` to the first, or with `many` every, document
    /// matching `filter`.
    pub async fn update_where(&self, filter: Filter, payload: &U, many: bool) -> Result<UpdateOutcome> {
        self.validate_payload(payload)?;
        let Some(update) = synthesize::<E, _, _>(self.policy.as_ref(), payload, false, Utc::now())? else {
            tracing::debug!(
                collection = self.collection.name(),
                "Update payload has nothing to apply"
            );
            return Ok(UpdateOutcome::NothingToUpdate);
        };

        self.ensure_indexes().await?;
        let result = if many {
            self.collection.update_many(&filter, &update, None).await
        } else {
            self.collection
                .update_one(&filter, &update, UpdateOptions::default(), None)
                .await
        };
        let result = result.map_err(|e| self.store_failure(RepositoryOperation::Update, e))?;
        Ok(UpdateOutcome::Applied(result.into()))
    }

    /// Updates the live document with identifier `id` and returns it as it
    /// was after (`return_updated`) or before the update.
    pub async fn find_one_and_update(
        &self,
        id: &str,
        payload: &U,
        return_updated: bool,
    ) -> Result<Option<E>> {
        let filter = FilterBuilder::<E>::id(id)?;
        self.find_one_and_update_where(filter, payload, false, return_updated)
            .await
    }

    /// Updates the first document matching `filter`, inserting one when
    /// `upsert` is set and nothing matches. A payload with nothing to apply
    /// writes nothing and returns the current live match.
    pub async fn find_one_and_update_where(
        &self,
        filter: Filter,
        payload: &U,
        upsert: bool,
        return_updated: bool,
    ) -> Result<Option<E>> {
        self.validate_payload(payload)?;
        let Some(mut update) = synthesize::<E, _, _>(self.policy.as_ref(), payload, upsert, Utc::now())? else {
            tracing::debug!(
                collection = self.collection.name(),
                "Update payload has nothing to apply, returning current document"
            );
            return self.find_one_sorted(filter, None).await;
        };
        if upsert && !filter.pins_field(ID_FIELD) {
            update = update.set_on_insert(ID_FIELD, DocumentId::new(E::ID_PREFIX).to_string());
        }

        let options = FindOneAndUpdateOptions {
            upsert,
            return_document: if return_updated {
                ReturnDocument::After
            } else {
                ReturnDocument::Before
            },
            sort: None,
        };
        self.ensure_indexes().await?;
        let document = self
            .collection
            .find_one_and_update(&filter, &update, &options, None)
            .await
            .map_err(|e| self.store_failure(RepositoryOperation::Update, e))?;
        document.map(decode::<E>).transpose()
    }

    /// Applies each self-identifying payload in one bulk request.
    ///
    /// Every identifier is validated before any store call. Payloads with
    /// nothing to apply are left out; when none remain no request is made.
    pub async fn bulk_update(&self, payloads: &[U]) -> Result<BulkWriteResult> {
        if payloads.is_empty() {
            return Ok(BulkWriteResult::empty());
        }

        let now = Utc::now();
        let mut models = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let id = DocumentId::parse_with_prefix(payload.id().unwrap_or_default(), E::ID_PREFIX)?;
            self.validate_payload(payload)?;
            match synthesize::<E, _, _>(self.policy.as_ref(), payload, false, now)? {
                Some(update) => models.push(WriteModel::UpdateOne {
                    filter: Filter::eq(ID_FIELD, id.as_str()),
                    update,
                    upsert: false,
                }),
                None => tracing::debug!(
                    collection = self.collection.name(),
                    id = %id,
                    "Skipping bulk entry with nothing to apply"
                ),
            }
        }
        if models.is_empty() {
            return Ok(BulkWriteResult::empty());
        }

        self.ensure_indexes().await?;
        self.collection
            .bulk_write(models, None)
            .await
            .map_err(|e| self.store_failure(RepositoryOperation::BulkUpdate, e))
    }

    // ------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------

    /// Deletes the document with identifier `id` and returns it; soft
    /// deletes return the document with `deletedAt` set.
    pub async fn find_one_and_delete(&self, id: &str, permanent: bool) -> Result<Option<E>> {
        let id = DocumentId::parse_with_prefix(id, E::ID_PREFIX)?;
        self.find_one_and_delete_where(Filter::eq(ID_FIELD, id.as_str()), permanent)
            .await
    }

    pub async fn find_one_and_delete_where(&self, filter: Filter, permanent: bool) -> Result<Option<E>> {
        self.ensure_indexes().await?;
        let document = if permanent || !self.soft_delete_enabled() {
            self.collection
                .find_one_and_delete(&filter, None)
                .await
                .map_err(|e| self.store_failure(RepositoryOperation::Delete, e))?
        } else {
            let options = FindOneAndUpdateOptions {
                upsert: false,
                return_document: ReturnDocument::After,
                sort: None,
            };
            self.collection
                .find_one_and_update(&filter, &soft_delete_update()?, &options, None)
                .await
                .map_err(|e| self.store_failure(RepositoryOperation::SoftDelete, e))?
        };
        document.map(decode::<E>).transpose()
    }

    /// Deletes the document with identifier `id`.
    pub async fn delete_one(&self, id: &str, permanent: bool) -> Result<WriteResult> {
        let id = DocumentId::parse_with_prefix(id, E::ID_PREFIX)?;
        self.delete(Filter::eq(ID_FIELD, id.as_str()), false, permanent)
            .await
    }

    /// Deletes every document matching `filter`.
    pub async fn delete_where(&self, filter: Filter, permanent: bool) -> Result<WriteResult> {
        self.delete(filter, true, permanent).await
    }

    async fn delete(&self, filter: Filter, many: bool, permanent: bool) -> Result<WriteResult> {
        self.ensure_indexes().await?;
        if permanent || !self.soft_delete_enabled() {
            let result = if many {
                self.collection.delete_many(&filter, None).await
            } else {
                self.collection.delete_one(&filter, None).await
            };
            let result = result.map_err(|e| self.store_failure(RepositoryOperation::Delete, e))?;
            return Ok(result.into());
        }

        let update = soft_delete_update()?;
        let result = if many {
            self.collection.update_many(&filter, &update, None).await
        } else {
            self.collection
                .update_one(&filter, &update, UpdateOptions::default(), None)
                .await
        };
        let result = result.map_err(|e| self.store_failure(RepositoryOperation::SoftDelete, e))?;
        Ok(result.into())
    }

    // ------------------------------------------------------------------
    // Sequences
    // ------------------------------------------------------------------

    /// Next value of the named sequence; a new sequence starts at
    /// `start_value + 1`.
    pub async fn next_sequence(&self, sequence: &str, start_value: i64) -> Result<i64> {
        self.sequences.next(sequence, start_value).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn first(
        &self,
        filter: Filter,
        sort: Option<SortSpec>,
        operation: RepositoryOperation,
    ) -> Result<Option<E>> {
        self.ensure_indexes().await?;
        let options = FindOptions {
            sort,
            skip: 0,
            limit: Some(1),
        };
        let documents = self
            .collection
            .find(&filter, &options, None)
            .await
            .map_err(|e| self.store_failure(operation, e))?;
        documents.into_iter().next().map(decode::<E>).transpose()
    }

    fn validate_payload(&self, payload: &U) -> Result<()> {
        if payload.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidPayload(format!(
                "update payload for {} failed validation",
                E::COLLECTION
            )))
        }
    }

    fn store_failure(&self, operation: RepositoryOperation, error: StoreError) -> Error {
        tracing::error!(
            operation = %operation,
            collection = self.collection.name(),
            error = %error,
            "Repository operation failed"
        );
        Error::Store(error)
    }
}

fn soft_delete_update() -> Result<UpdateDocument> {
    Ok(UpdateDocument::new().set(DELETED_AT_FIELD, serde_json::to_value(Utc::now())?))
}

fn encode<E: Entity>(entity: &E) -> Result<Document> {
    match serde_json::to_value(entity)? {
        Value::Object(document) => Ok(document),
        _ => Err(Error::InvalidPayload(format!(
            "{} must serialize to an object",
            E::COLLECTION
        ))),
    }
}

fn decode<E: Entity>(document: Document) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

fn decode_all<E: Entity>(documents: Vec<Document>) -> Result<Vec<E>> {
    documents.into_iter().map(decode).collect()
}
