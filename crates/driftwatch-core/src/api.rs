//! Client contract for the remote change-detection service.

use crate::{ApiError, Snapshot, Watch};
use async_trait::async_trait;

/// Asynchronous gateway to the remote service.
///
/// Production: the reqwest client in `driftwatch-api`.
/// Testing: scripted fakes.
///
/// Every operation is idempotent except `trigger_recheck`, which callers
/// must not retry blindly.
#[async_trait]
pub trait WatchApi: Send + Sync {
    /// Fetch the full watch listing.
    async fn list_watches(&self) -> Result<Vec<Watch>, ApiError>;

    /// Fetch one watch's detail record.
    async fn get_watch(&self, id: &str) -> Result<Watch, ApiError>;

    /// Ask the remote to re-check a watch now. Fire-and-acknowledge; the
    /// remote queues the work and does not block for completion.
    async fn trigger_recheck(&self, id: &str) -> Result<(), ApiError>;

    /// Fetch the recorded snapshot history, oldest-first.
    async fn fetch_history(&self, id: &str) -> Result<Vec<Snapshot>, ApiError>;

    /// Fetch the rendered diff between two recorded versions.
    async fn fetch_diff(&self, id: &str, from: &str, to: &str) -> Result<String, ApiError>;
}
