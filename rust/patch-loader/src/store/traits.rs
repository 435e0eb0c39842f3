// rust/patch-loader/src/store/traits.rs

//! Async store abstraction consumed by the catalog and the prefetch
//! pipeline.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ClassLabel, RawRecord, RowKey, SampleId};

/// The capabilities the loader needs from a backing column store.
///
/// Implementations must be safe to share between tasks: the catalog issues
/// several fetches at once and every split keeps its own resolve in flight.
/// Retry policy, if any, belongs to the implementation.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Lists the distinct `(sample, label)` partitions held by the store.
    ///
    /// # Errors
    ///
    /// Returns a store error if the listing fails.
    async fn list_distinct_samples(&self) -> Result<Vec<(SampleId, ClassLabel)>>;

    /// Returns the ordered row keys of one sample for one class.
    ///
    /// An empty vector means the sample has no rows of that class.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    async fn fetch_row_keys(&self, sample: &SampleId, label: ClassLabel) -> Result<Vec<RowKey>>;

    /// Resolves one row key to its raw record.
    ///
    /// # Errors
    ///
    /// Returns a store error if the key is unknown or the request fails.
    async fn resolve(&self, key: &RowKey) -> Result<RawRecord>;

    /// Resolves a batch of row keys, preserving their order.
    ///
    /// The default implementation issues every `resolve` concurrently and
    /// fails on the first error.
    ///
    /// # Errors
    ///
    /// Returns a store error if any key fails to resolve.
    async fn resolve_batch(&self, keys: &[RowKey]) -> Result<Vec<RawRecord>> {
        futures::future::try_join_all(keys.iter().map(|key| self.resolve(key))).await
    }

    /// Returns the backend type name (e.g., "memory", "cassandra").
    fn backend_type(&self) -> &'static str;
}
