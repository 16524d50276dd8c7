//! # Jetstream records
//!
//! Types for the JSON events emitted by a Bluesky Jetstream instance, plus the
//! handful of `app.bsky.feed.*` record shapes needed to decide what a feed
//! generator should index.
//!
//! Only the fields that drive indexing decisions are modelled. Everything else
//! in an upstream record is ignored during decoding.
//!
//! ```rust
//! use jetstream_records::{CommitRoute, JetstreamEvent};
//!
//! let raw = r#"{
//!     "did": "did:plc:abc",
//!     "time_us": 1725911162329308,
//!     "kind": "commit",
//!     "commit": {
//!         "rev": "3l3qo2vutsw2b",
//!         "operation": "delete",
//!         "collection": "app.bsky.feed.like",
//!         "rkey": "3l3qo2vuowo2b"
//!     }
//! }"#;
//!
//! let event: JetstreamEvent = serde_json::from_str(raw).unwrap();
//! assert_eq!(event.route(), Some(CommitRoute::DeleteLike));
//! ```

pub mod error;
pub mod event;
pub mod records;
pub mod uri;

pub use error::RecordError;
pub use event::{Commit, CommitRoute, JetstreamEvent, Operation};
pub use records::{BlobRef, Embed, EmbedImage, FeedLike, FeedPost, FeedRepost, StrongRef};
pub use uri::AtUri;

/// Collection NSIDs the feed generator subscribes to.
pub mod nsid {
    pub const FEED_POST: &str = "app.bsky.feed.post";
    pub const FEED_LIKE: &str = "app.bsky.feed.like";
    pub const FEED_REPOST: &str = "app.bsky.feed.repost";
    pub const FEED_GENERATOR: &str = "app.bsky.feed.generator";

    /// Collections requested from Jetstream via `wantedCollections`.
    pub const WANTED: [&str; 3] = [FEED_POST, FEED_LIKE, FEED_REPOST];
}
