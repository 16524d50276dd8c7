//! Likes and reposts. Both reference a post by rkey and share one code path.

use super::{FeedRepository, IndexError, now_micros};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Like,
    Repost,
}

impl Interaction {
    fn table(self) -> &'static str {
        match self {
            Interaction::Like => "post_like",
            Interaction::Repost => "post_repost",
        }
    }
}

impl std::fmt::Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interaction::Like => write!(f, "like"),
            Interaction::Repost => write!(f, "repost"),
        }
    }
}

impl FeedRepository {
    pub async fn insert_like(
        &self,
        did: &str,
        rkey: &str,
        target_rkey: &str,
    ) -> Result<bool, IndexError> {
        self.insert_interaction(Interaction::Like, did, rkey, target_rkey)
            .await
    }

    pub async fn insert_repost(
        &self,
        did: &str,
        rkey: &str,
        target_rkey: &str,
    ) -> Result<bool, IndexError> {
        self.insert_interaction(Interaction::Repost, did, rkey, target_rkey)
            .await
    }

    pub async fn delete_like(&self, rkey: &str) -> Result<bool, IndexError> {
        self.delete_interaction(Interaction::Like, rkey).await
    }

    pub async fn delete_repost(&self, rkey: &str) -> Result<bool, IndexError> {
        self.delete_interaction(Interaction::Repost, rkey).await
    }

    /// Record an interaction only if its target post is indexed. The existence
    /// check and the insert are one statement inside one transaction.
    /// Returns `false` when the target is missing or the rkey was already seen.
    pub async fn insert_interaction(
        &self,
        kind: Interaction,
        did: &str,
        rkey: &str,
        target_rkey: &str,
    ) -> Result<bool, IndexError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&format!(
            r#"
            INSERT OR IGNORE INTO {} (did, rkey, post_rkey, indexed_at)
            SELECT ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM post WHERE rkey = ?)
            "#,
            kind.table()
        ))
        .bind(did)
        .bind(rkey)
        .bind(target_rkey)
        .bind(now_micros())
        .bind(target_rkey)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_interaction(
        &self,
        kind: Interaction,
        rkey: &str,
    ) -> Result<bool, IndexError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE rkey = ?", kind.table()))
            .bind(rkey)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
