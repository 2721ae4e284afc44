use async_trait::async_trait;
use serde_json::Value;

use super::remote_model::{QueryFilter, RawChange, RowFilter, Table};
use crate::errors::RemoteError;

/// Row store backing the cache (PostgREST-style tables).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads rows matching the filter, in the filter's order.
    async fn query(&self, table: Table, filter: &QueryFilter) -> Result<Vec<Value>, RemoteError>;

    /// Inserts rows and returns their stored representation.
    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, RemoteError>;

    /// Patches every row matching the filter and returns the updated rows.
    async fn update(
        &self,
        table: Table,
        filter: &QueryFilter,
        patch: Value,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Deletes every row matching the filter.
    async fn delete(&self, table: Table, filter: &QueryFilter) -> Result<(), RemoteError>;
}

/// Source of per-table change notifications.
#[async_trait]
pub trait ChangeStream: Send + Sync {
    /// Opens a channel for one table, filtered server-side.
    async fn subscribe(
        &self,
        table: Table,
        filter: &RowFilter,
    ) -> Result<Box<dyn ChangeChannel>, RemoteError>;
}

/// One open subscription on a [`ChangeStream`].
///
/// `next_change` must be cancel-safe: it is polled inside `select!` and
/// may be dropped before completing.
#[async_trait]
pub trait ChangeChannel: Send {
    /// Next notification in delivery order, or `None` once the channel closed.
    async fn next_change(&mut self) -> Option<Result<RawChange, RemoteError>>;

    /// Leaves the channel. Calling it more than once is harmless.
    async fn unsubscribe(&mut self);
}
