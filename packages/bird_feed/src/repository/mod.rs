// Feed index. Each record kind lives in its own file with `impl FeedRepository`.

use sqlx::sqlite::SqlitePool;

mod interactions;
mod posts;
mod ranking;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use interactions::Interaction;
pub use posts::StoredPost;
pub use ranking::{Engagement, IndexStats};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("post {rkey} is already indexed")]
    Conflict { rkey: String },

    #[error("feed index storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct FeedRepository {
    pub(crate) pool: SqlitePool,
}

impl FeedRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Index timestamps are Unix microseconds.
pub(crate) fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
