//! Ingest metrics for observability
//!
//! Counters are bumped by the stream reader, the dispatcher and the enricher,
//! and exposed as a JSON snapshot on `/metrics`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use jetstream_records::CommitRoute;

#[derive(Debug, Default)]
pub struct IngestMetrics {
    // Stream
    /// Frames decoded from the firehose
    pub events_read: AtomicU64,
    /// Raw frame bytes received
    pub bytes_read: AtomicU64,
    /// Frames that failed to decode
    pub frames_dropped: AtomicU64,
    /// Connection attempts after the first
    pub reconnects: AtomicU64,

    // Dispatch
    pub events_routed: AtomicU64,
    pub events_ignored: AtomicU64,
    pub malformed_records: AtomicU64,
    pub handler_errors: AtomicU64,

    // Enrichment
    pub posts_ineligible: AtomicU64,
    pub posts_rejected: AtomicU64,
    pub posts_indexed: AtomicU64,
    pub classifier_errors: AtomicU64,

    // Index writes
    pub likes_indexed: AtomicU64,
    pub reposts_indexed: AtomicU64,
    /// Likes/reposts whose target post was not indexed
    pub orphan_interactions: AtomicU64,
    pub deletes: AtomicU64,

    start_time: Option<Instant>,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn frame_read(&self, bytes: usize) {
        self.events_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_routed(&self) {
        self.events_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_record(&self) {
        self.malformed_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn classifier_error(&self) {
        self.classifier_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn post_ineligible(&self) {
        self.posts_ineligible.fetch_add(1, Ordering::Relaxed);
    }

    pub fn post_rejected(&self) {
        self.posts_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn post_indexed(&self) {
        self.posts_indexed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a like/repost write.
    pub fn interaction(&self, route: CommitRoute, written: bool) {
        if !written {
            self.orphan_interactions.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match route {
            CommitRoute::CreateLike => {
                self.likes_indexed.fetch_add(1, Ordering::Relaxed);
            }
            CommitRoute::CreateRepost => {
                self.reposts_indexed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn deleted(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            stream: StreamMetrics {
                events_read: self.events_read.load(Ordering::Relaxed),
                bytes_read: self.bytes_read.load(Ordering::Relaxed),
                frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
                reconnects: self.reconnects.load(Ordering::Relaxed),
            },
            dispatch: DispatchMetrics {
                routed: self.events_routed.load(Ordering::Relaxed),
                ignored: self.events_ignored.load(Ordering::Relaxed),
                malformed: self.malformed_records.load(Ordering::Relaxed),
                handler_errors: self.handler_errors.load(Ordering::Relaxed),
            },
            enrichment: EnrichmentMetrics {
                ineligible: self.posts_ineligible.load(Ordering::Relaxed),
                rejected: self.posts_rejected.load(Ordering::Relaxed),
                indexed: self.posts_indexed.load(Ordering::Relaxed),
                classifier_errors: self.classifier_errors.load(Ordering::Relaxed),
            },
            index: IndexWriteMetrics {
                likes: self.likes_indexed.load(Ordering::Relaxed),
                reposts: self.reposts_indexed.load(Ordering::Relaxed),
                orphans: self.orphan_interactions.load(Ordering::Relaxed),
                deletes: self.deletes.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub stream: StreamMetrics,
    pub dispatch: DispatchMetrics,
    pub enrichment: EnrichmentMetrics,
    pub index: IndexWriteMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub events_read: u64,
    pub bytes_read: u64,
    pub frames_dropped: u64,
    pub reconnects: u64,
}

impl StreamMetrics {
    pub fn avg_event_bytes(&self) -> u64 {
        if self.events_read == 0 {
            0
        } else {
            self.bytes_read / self.events_read
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMetrics {
    pub routed: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub handler_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentMetrics {
    pub ineligible: u64,
    pub rejected: u64,
    pub indexed: u64,
    pub classifier_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexWriteMetrics {
    pub likes: u64,
    pub reposts: u64,
    pub orphans: u64,
    pub deletes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accounting() {
        let metrics = IngestMetrics::new();
        metrics.frame_read(100);
        metrics.frame_read(300);
        metrics.frame_dropped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stream.events_read, 2);
        assert_eq!(snapshot.stream.bytes_read, 400);
        assert_eq!(snapshot.stream.avg_event_bytes(), 200);
        assert_eq!(snapshot.stream.frames_dropped, 1);
    }

    #[test]
    fn test_avg_with_no_events() {
        let snapshot = IngestMetrics::new().snapshot();
        assert_eq!(snapshot.stream.avg_event_bytes(), 0);
    }

    #[test]
    fn test_interaction_outcomes() {
        let metrics = IngestMetrics::new();
        metrics.interaction(CommitRoute::CreateLike, true);
        metrics.interaction(CommitRoute::CreateRepost, true);
        metrics.interaction(CommitRoute::CreateLike, false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.index.likes, 1);
        assert_eq!(snapshot.index.reposts, 1);
        assert_eq!(snapshot.index.orphans, 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let metrics = IngestMetrics::new();
        metrics.post_indexed();
        metrics.post_rejected();
        metrics.event_ignored();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["enrichment"]["indexed"], 1);
        assert_eq!(json["enrichment"]["rejected"], 1);
        assert_eq!(json["dispatch"]["ignored"], 1);
    }
}
