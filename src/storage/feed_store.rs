use crate::feed::{FeedStore, StoreError};

use super::schema::Database;
use super::types::{DatabaseError, Feed, NewPost};

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl FeedStore for Database {
    async fn next_feed_to_fetch(&self) -> Result<Feed, StoreError> {
        Database::next_feed_to_fetch(self)
            .await?
            .ok_or(StoreError::Empty)
    }

    async fn mark_fetched(&self, feed_id: i64, fetched_at: i64) -> Result<(), StoreError> {
        Ok(self.mark_feed_fetched(feed_id, fetched_at).await?)
    }

    async fn insert_post_if_absent(&self, feed_id: i64, post: &NewPost) -> Result<bool, StoreError> {
        Ok(Database::insert_post_if_absent(self, feed_id, post).await?)
    }
}
