//! Ranked reads over the index.

use jetstream_records::AtUri;
use serde::Serialize;
use sqlx::Row;

use super::{FeedRepository, IndexError};
use crate::feed::RankedFeedSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Engagement {
    pub likes: u64,
    pub reposts: u64,
}

impl Engagement {
    pub fn score(&self) -> u64 {
        self.likes + self.reposts
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub posts: u64,
    pub likes: u64,
    pub reposts: u64,
}

impl FeedRepository {
    /// Newest first. Posts indexed in the same microsecond fall back to
    /// insertion order.
    pub async fn most_recent_page(&self, limit: u32, offset: u64) -> Result<Vec<String>, IndexError> {
        let rows = sqlx::query(
            r#"
            SELECT did, rkey FROM post
            ORDER BY indexed_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(sql_offset(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_at_uri).collect())
    }

    /// Highest likes + reposts first. Order among equal scores is not fixed.
    pub async fn most_popular_page(
        &self,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<String>, IndexError> {
        let rows = sqlx::query(
            r#"
            SELECT p.did, p.rkey,
                   (SELECT COUNT(*) FROM post_like l WHERE l.post_rkey = p.rkey)
                 + (SELECT COUNT(*) FROM post_repost r WHERE r.post_rkey = p.rkey) AS score
            FROM post p
            ORDER BY score DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(sql_offset(offset))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_at_uri).collect())
    }

    /// Like and repost counts recorded against `rkey`, whether or not the
    /// post itself is still indexed.
    pub async fn engagement(&self, rkey: &str) -> Result<Engagement, IndexError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM post_like WHERE post_rkey = ?) AS likes,
                (SELECT COUNT(*) FROM post_repost WHERE post_rkey = ?) AS reposts
            "#,
        )
        .bind(rkey)
        .bind(rkey)
        .fetch_one(&self.pool)
        .await?;

        Ok(Engagement {
            likes: row.try_get::<i64, _>("likes").unwrap_or(0) as u64,
            reposts: row.try_get::<i64, _>("reposts").unwrap_or(0) as u64,
        })
    }

    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM post) AS post_count,
                (SELECT COUNT(*) FROM post_like) AS like_count,
                (SELECT COUNT(*) FROM post_repost) AS repost_count
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexStats {
            posts: row.try_get::<i64, _>("post_count").unwrap_or(0) as u64,
            likes: row.try_get::<i64, _>("like_count").unwrap_or(0) as u64,
            reposts: row.try_get::<i64, _>("repost_count").unwrap_or(0) as u64,
        })
    }
}

/// Offsets past the `i64` range land beyond every row.
fn sql_offset(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

fn row_to_at_uri(row: sqlx::sqlite::SqliteRow) -> String {
    let did: String = row.get("did");
    let rkey: String = row.get("rkey");
    AtUri::post(&did, &rkey).to_string()
}

impl RankedFeedSource for FeedRepository {
    async fn most_recent_page(&self, limit: u32, offset: u64) -> Result<Vec<String>, IndexError> {
        FeedRepository::most_recent_page(self, limit, offset).await
    }

    async fn most_popular_page(&self, limit: u32, offset: u64) -> Result<Vec<String>, IndexError> {
        FeedRepository::most_popular_page(self, limit, offset).await
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::test_helpers::{seed_post, test_repository};

    #[tokio::test]
    async fn new_post_tops_recent_feed() {
        let repo = test_repository().await;
        seed_post(&repo, "did:plc:a", "old").await;
        seed_post(&repo, "did:plc:b", "new").await;

        let page = repo.most_recent_page(1, 0).await.unwrap();
        assert_eq!(page, vec!["at://did:plc:b/app.bsky.feed.post/new"]);

        let page = repo.most_recent_page(10, 1).await.unwrap();
        assert_eq!(page, vec!["at://did:plc:a/app.bsky.feed.post/old"]);
    }

    #[tokio::test]
    async fn recent_feed_paginates() {
        let repo = test_repository().await;
        for i in 0..5 {
            seed_post(&repo, "did:plc:a", &format!("r{i}")).await;
        }

        let first = repo.most_recent_page(3, 0).await.unwrap();
        let second = repo.most_recent_page(3, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert!(first[0].ends_with("/r4"));
        assert!(second[1].ends_with("/r0"));
    }

    #[tokio::test]
    async fn offsets_beyond_i64_do_not_wrap_to_first_page() {
        let repo = test_repository().await;
        seed_post(&repo, "did:plc:a", "p1").await;

        for offset in [i64::MAX as u64, i64::MAX as u64 + 1, u64::MAX] {
            assert!(repo.most_recent_page(10, offset).await.unwrap().is_empty());
            assert!(repo.most_popular_page(10, offset).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn liked_post_outranks_unliked() {
        let repo = test_repository().await;
        seed_post(&repo, "did:plc:a", "liked").await;
        seed_post(&repo, "did:plc:a", "plain").await;
        repo.insert_like("did:plc:b", "l1", "liked").await.unwrap();

        let page = repo.most_popular_page(10, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0], "at://did:plc:a/app.bsky.feed.post/liked");
    }

    #[tokio::test]
    async fn reposts_count_toward_popularity() {
        let repo = test_repository().await;
        seed_post(&repo, "did:plc:a", "one").await;
        seed_post(&repo, "did:plc:a", "two").await;
        repo.insert_like("did:plc:b", "l1", "one").await.unwrap();
        repo.insert_repost("did:plc:b", "rp1", "two").await.unwrap();
        repo.insert_repost("did:plc:c", "rp2", "two").await.unwrap();

        let page = repo.most_popular_page(1, 0).await.unwrap();
        assert_eq!(page, vec!["at://did:plc:a/app.bsky.feed.post/two"]);
        assert_eq!(repo.engagement("two").await.unwrap().score(), 2);
    }

    #[tokio::test]
    async fn stats_empty_index() {
        let repo = test_repository().await;
        let stats = repo.stats().await.unwrap();
        assert_eq!((stats.posts, stats.likes, stats.reposts), (0, 0, 0));
    }

    #[test]
    fn stats_serialization() {
        let stats = super::IndexStats {
            posts: 3,
            likes: 2,
            reposts: 1,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["posts"], 3);
        assert_eq!(json["reposts"], 1);
    }
}
