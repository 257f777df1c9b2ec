//! Paging parameters and write results

use serde::{Deserialize, Serialize};

use crate::store::{DeleteResult, UpdateResult};

/// One page of query results
///
/// `has_next_page` comes from a one-row lookahead query, not a count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub documents: Vec<T>,
    pub offset: u64,
    /// Requested page size; `i64::MAX` for an unbounded page
    pub limit: i64,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Converts the documents, keeping the paging metadata.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            documents: self.documents.into_iter().map(f).collect(),
            offset: self.offset,
            limit: self.limit,
            has_next_page: self.has_next_page,
        }
    }
}

/// Client-supplied paging parameters
///
/// ```rust
/// use docstore_repository::repository::PageRequest;
///
/// let request = PageRequest {
///     order_by: Some("createdAt".to_string()),
///     is_descending: true,
///     ..PageRequest::default()
/// };
/// assert_eq!(request.to_order_by().as_deref(), Some("-createdAt"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Defaults to 0
    #[serde(default)]
    pub offset: Option<u64>,
    /// Defaults to the configured page size; `-1` requests every document
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub is_descending: bool,
}

impl PageRequest {
    pub fn new(offset: u64, limit: i64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn ordered_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(field.into());
        self.is_descending = descending;
        self
    }

    /// Order specifier with a leading `-` when descending.
    pub fn to_order_by(&self) -> Option<String> {
        let field = self.order_by.as_deref()?.trim();
        if field.is_empty() {
            return None;
        }
        Some(if self.is_descending {
            format!("-{}", field)
        } else {
            field.to_string()
        })
    }
}

/// Counts reported by an update or delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    /// May exceed `modified_count` when matched documents already held the values
    pub matched_count: u64,
    pub modified_count: u64,
}

impl From<UpdateResult> for WriteResult {
    fn from(result: UpdateResult) -> Self {
        if !result.acknowledged {
            return Self::default();
        }
        Self {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        }
    }
}

impl From<DeleteResult> for WriteResult {
    fn from(result: DeleteResult) -> Self {
        if !result.acknowledged {
            return Self::default();
        }
        Self {
            matched_count: result.deleted_count,
            modified_count: result.deleted_count,
        }
    }
}

/// Result of a partial update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update reached the store
    Applied(WriteResult),
    /// The payload contributed no applicable field; nothing was sent
    NothingToUpdate,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Number of documents modified; zero when nothing was sent.
    pub fn modified_count(&self) -> u64 {
        match self {
            Self::Applied(result) => result.modified_count,
            Self::NothingToUpdate => 0,
        }
    }
}
