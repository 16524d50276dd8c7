//! Indexed posts.

use sqlx::Row;
use tracing::debug;

use super::{FeedRepository, IndexError, now_micros};

#[derive(Debug, Clone)]
pub struct StoredPost {
    pub did: String,
    pub rkey: String,
    pub uri: String,
    pub indexed_at: i64,
    pub nsfw: bool,
    pub confidence: f64,
}

impl FeedRepository {
    /// Index a post that passed enrichment. A second post with the same rkey
    /// is reported as [`IndexError::Conflict`].
    pub async fn insert_post(
        &self,
        did: &str,
        rkey: &str,
        uri: &str,
        nsfw: bool,
        confidence: f64,
    ) -> Result<(), IndexError> {
        let result = sqlx::query(
            r#"
            INSERT INTO post (did, rkey, uri, indexed_at, nsfw, confidence)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(did)
        .bind(rkey)
        .bind(uri)
        .bind(now_micros())
        .bind(nsfw)
        .bind(confidence)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(IndexError::Conflict {
                rkey: rkey.to_string(),
            }),
            Err(e) => Err(IndexError::Storage(e)),
        }
    }

    /// Delete by rkey alone. Returns whether a row existed.
    pub async fn delete_post(&self, rkey: &str) -> Result<bool, IndexError> {
        let result = sqlx::query("DELETE FROM post WHERE rkey = ?")
            .bind(rkey)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if !deleted {
            debug!(rkey = %rkey, "delete for unindexed post");
        }
        Ok(deleted)
    }

    pub async fn get_post(&self, rkey: &str) -> Result<Option<StoredPost>, IndexError> {
        let row = sqlx::query(
            r#"
            SELECT did, rkey, uri, indexed_at, nsfw, confidence
            FROM post WHERE rkey = ?
            "#,
        )
        .bind(rkey)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_post))
    }
}

fn row_to_post(row: sqlx::sqlite::SqliteRow) -> StoredPost {
    StoredPost {
        did: row.get("did"),
        rkey: row.get("rkey"),
        uri: row.get("uri"),
        indexed_at: row.get("indexed_at"),
        nsfw: row.get("nsfw"),
        confidence: row.get("confidence"),
    }
}
