//! The persisted domain inventory, as seen by the reconciliation engine.

use serde::Serialize;
use std::collections::BTreeSet;

/// One monitored domain. Records are never deleted; deprecation clears a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRecord {
    pub domain: String,
    pub active: bool,
    pub live: bool,
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("domain already recorded: {0}")]
    DuplicateKey(String),
    #[error("domain not recorded: {0}")]
    NotFound(String),
    #[error("storage backend failure")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }

    /// `DuplicateKey` and `NotFound` mean the engine asked for an impossible
    /// transition, as opposed to the store itself failing.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_) | StoreError::NotFound(_))
    }
}

/// Keyed by canonical domain. Each call is atomic for its row; callers hold the
/// store exclusively for the length of a run.
pub trait StateStore {
    fn exists(&self, domain: &str) -> Result<bool, StoreError>;
    fn is_active(&self, domain: &str) -> Result<bool, StoreError>;
    fn is_live(&self, domain: &str) -> Result<bool, StoreError>;
    /// New record: active, not live, both timestamps now.
    fn insert(&self, domain: &str) -> Result<(), StoreError>;
    fn set_active(&self, domain: &str, value: bool) -> Result<(), StoreError>;
    fn set_live(&self, domain: &str, value: bool) -> Result<(), StoreError>;
    fn list_active(&self) -> Result<BTreeSet<String>, StoreError>;
    fn list_live(&self) -> Result<BTreeSet<String>, StoreError>;
}
