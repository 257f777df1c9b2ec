//! Operation names used in repository log records

use std::fmt;

/// Repository operation being performed when a store call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Fetching a single document
    Get,
    /// Finding or paging documents
    Find,
    /// Counting documents
    Count,
    /// Inserting documents
    Create,
    /// Partial update, including find-and-update
    Update,
    /// Bulk partial update
    BulkUpdate,
    /// Permanent removal
    Delete,
    /// Setting the delete timestamp
    SoftDelete,
    /// Generating a sequence value
    NextSequence,
    /// Provisioning collection indexes
    EnsureIndexes,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Find => write!(f, "find"),
            Self::Count => write!(f, "count"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::BulkUpdate => write!(f, "bulk_update"),
            Self::Delete => write!(f, "delete"),
            Self::SoftDelete => write!(f, "soft_delete"),
            Self::NextSequence => write!(f, "next_sequence"),
            Self::EnsureIndexes => write!(f, "ensure_indexes"),
        }
    }
}
