use super::schema::{now_millis, Database};
use super::types::{DatabaseError, NewPost, Post};

/// Hard cap on `browse` so a huge limit cannot pull the whole table into memory
const MAX_BROWSE_LIMIT: i64 = 1000;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert a post unless one with the same (feed, url) already exists.
    ///
    /// Returns `true` when a row was written, `false` for a duplicate.
    /// Duplicates are not errors: re-fetching a feed is expected to offer
    /// the same items again.
    pub async fn insert_post_if_absent(
        &self,
        feed_id: i64,
        post: &NewPost,
    ) -> Result<bool, DatabaseError> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO posts
                (feed_id, title, url, description, published_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(&post.published_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Newest posts from the feeds `user_id` follows.
    pub async fn posts_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Post>, DatabaseError> {
        let limit = limit.clamp(0, MAX_BROWSE_LIMIT);
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.url, p.description, p.published_at,
                   p.created_at, f.name AS feed_name
            FROM posts p
            JOIN feed_follows ff ON ff.feed_id = p.feed_id
            JOIN feeds f ON f.id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    /// Number of stored posts for one feed.
    pub async fn count_posts_for_feed(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// All posts of one feed in insertion order.
    #[cfg(test)]
    pub(crate) async fn posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>, DatabaseError> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.url, p.description, p.published_at,
                   p.created_at, f.name AS feed_name
            FROM posts p
            JOIN feeds f ON f.id = p.feed_id
            WHERE p.feed_id = ?
            ORDER BY p.id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}
