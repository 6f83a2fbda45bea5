// src/storage/mod.rs
pub mod json_store;

use async_trait::async_trait;

use crate::identity::{ProductKey, StoredProduct};
use crate::machine::ExtractionSession;
use crate::selectors::{NewSelector, SelectorCandidate, SelectorId};
use crate::utils::error::StorageError;

pub use json_store::JsonStore;

/// What a read-modify-write callback wants done with a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Write<T> {
    Put(T),
    Delete,
    Keep,
}

/// Row state before and after an atomic read-modify-write.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange<T> {
    pub before: Option<T>,
    pub after: Option<T>,
}

impl<T> RowChange<T> {
    pub fn unchanged(row: Option<T>) -> Self
    where
        T: Clone,
    {
        Self {
            before: row.clone(),
            after: row,
        }
    }
}

/// Keyed persistence for selector candidates, stored products and closed
/// sessions.
///
/// `modify_*` calls are atomic per row: the backend holds the row for the
/// whole read, callback and write, so concurrent sessions never lose an
/// update.
#[async_trait]
pub trait Persistence: Send + Sync {
    // Selector candidates
    async fn list_selectors(&self, domain: &str) -> Result<Vec<SelectorCandidate>, StorageError>;

    async fn all_selectors(&self) -> Result<Vec<SelectorCandidate>, StorageError>;

    async fn get_selector(&self, id: SelectorId) -> Result<Option<SelectorCandidate>, StorageError>;

    /// Inserts a candidate, or returns the existing row when the
    /// `(domain, expression)` pair is already stored. The flag is `true`
    /// when a new row was created.
    async fn insert_selector(
        &self,
        selector: NewSelector,
    ) -> Result<(SelectorCandidate, bool), StorageError>;

    async fn modify_selector(
        &self,
        id: SelectorId,
        apply: &(dyn for<'r> Fn(&'r SelectorCandidate) -> Write<SelectorCandidate> + Send + Sync),
    ) -> Result<RowChange<SelectorCandidate>, StorageError>;

    // Products
    async fn get_product(&self, key: &ProductKey) -> Result<Option<StoredProduct>, StorageError>;

    async fn modify_product(
        &self,
        key: &ProductKey,
        apply: &(dyn for<'r> Fn(Option<&'r StoredProduct>) -> Write<StoredProduct> + Send + Sync),
    ) -> Result<RowChange<StoredProduct>, StorageError>;

    async fn list_products(&self, domain: &str) -> Result<Vec<StoredProduct>, StorageError>;

    // Sessions (append-only)
    async fn record_session(&self, session: &ExtractionSession) -> Result<(), StorageError>;

    async fn list_sessions(&self) -> Result<Vec<ExtractionSession>, StorageError>;
}
