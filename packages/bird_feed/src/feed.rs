//! Cursor-paginated feed pages over the ranked index.
//!
//! Cursors are decimal offsets into the ranking. A page never exceeds
//! [`MAX_PAGE_SIZE`] posts, and no cursor is handed out once the next offset
//! would reach [`MAX_CURSOR_OFFSET`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::debug;

use crate::repository::IndexError;

pub const MAX_PAGE_SIZE: u32 = 30;
pub const MAX_CURSOR_OFFSET: u64 = 210;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedAlgorithm {
    #[serde(rename = "recent")]
    MostRecent,
    #[serde(rename = "popular")]
    MostPopular,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("cursor is not a non-negative integer: {0:?}")]
    InvalidCursor(String),

    #[error("unknown feed: {0}")]
    UnknownFeed(String),

    #[error(transparent)]
    Storage(#[from] IndexError),
}

/// Ranked post URIs, read by offset.
pub trait RankedFeedSource: Send + Sync {
    fn most_recent_page(
        &self,
        limit: u32,
        offset: u64,
    ) -> impl Future<Output = Result<Vec<String>, IndexError>> + Send;

    fn most_popular_page(
        &self,
        limit: u32,
        offset: u64,
    ) -> impl Future<Output = Result<Vec<String>, IndexError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    pub posts: Vec<String>,
    pub cursor: Option<String>,
}

/// Empty or absent cursors start at the top. Offsets must fit in an `i64`.
pub fn parse_cursor(cursor: Option<&str>) -> Result<u64, FeedError> {
    match cursor {
        None | Some("") => Ok(0),
        Some(c) => c
            .parse::<u64>()
            .ok()
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| FeedError::InvalidCursor(c.to_string())),
    }
}

pub struct FeedPageAssembler<R> {
    source: R,
    feeds: BTreeMap<String, FeedAlgorithm>,
}

impl<R: RankedFeedSource> FeedPageAssembler<R> {
    pub fn new(source: R, feeds: BTreeMap<String, FeedAlgorithm>) -> Self {
        Self { source, feeds }
    }

    pub fn feed_names(&self) -> impl Iterator<Item = &str> {
        self.feeds.keys().map(String::as_str)
    }

    pub fn algorithm(&self, feed_name: &str) -> Option<FeedAlgorithm> {
        self.feeds.get(feed_name).copied()
    }

    pub async fn get_page(
        &self,
        feed_name: &str,
        viewer_did: Option<&str>,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FeedError> {
        let algorithm = self
            .algorithm(feed_name)
            .ok_or_else(|| FeedError::UnknownFeed(feed_name.to_string()))?;
        let offset = parse_cursor(cursor)?;
        let limit = limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);

        let mut posts = match algorithm {
            FeedAlgorithm::MostRecent => self.source.most_recent_page(limit, offset).await?,
            FeedAlgorithm::MostPopular => self.source.most_popular_page(limit, offset).await?,
        };
        posts.truncate(limit as usize);

        let next = offset.saturating_add(posts.len() as u64);
        let cursor = (next < MAX_CURSOR_OFFSET).then(|| next.to_string());

        debug!(
            feed = %feed_name,
            viewer = viewer_did.unwrap_or("-"),
            offset,
            limit,
            returned = posts.len(),
            next_cursor = cursor.as_deref().unwrap_or("-"),
            "Assembled feed page"
        );

        Ok(FeedPage { posts, cursor })
    }
}
