//! The seam between analytics queries and the event store.

use async_trait::async_trait;
use rootcause::prelude::Report;
use serde_json::Value;

use crate::error::QueryError;
use crate::query::Query;

/// Runs parameterized queries against the event store.
///
/// Implementations return one JSON object per result row.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Runs `query` and returns its rows.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Transport`] if the store cannot be reached and
    /// [`QueryError::Server`] if it rejects the query.
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, Report<QueryError>>;
}
