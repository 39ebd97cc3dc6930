use std::future::Future;

use thiserror::Error;

use crate::storage::{Feed, NewPost};

/// Failures reported by a [`FeedStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// There are no feeds to select from
    #[error("no feeds to fetch")]
    Empty,
    /// The persistence layer itself failed
    #[error("feed store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence consumed by the scheduler.
///
/// Implemented by [`crate::storage::Database`]; tests provide in-memory
/// versions to exercise scheduling without SQLite.
pub trait FeedStore: Send + Sync {
    /// The feed with the oldest `last_fetched_at`, never-fetched feeds first.
    ///
    /// Fails with [`StoreError::Empty`] when no feeds exist.
    fn next_feed_to_fetch(&self) -> impl Future<Output = Result<Feed, StoreError>> + Send;

    /// Set `last_fetched_at` of `feed_id` to `fetched_at` (Unix milliseconds).
    fn mark_fetched(
        &self,
        feed_id: i64,
        fetched_at: i64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Store `post` unless `feed_id` already has a post with the same link.
    ///
    /// Resolves to whether a new post was written.
    fn insert_post_if_absent(
        &self,
        feed_id: i64,
        post: &NewPost,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
