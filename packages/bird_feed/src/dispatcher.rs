//! Routing of decoded firehose commits onto index operations, plus the
//! bounded worker pool that runs them.

use jetstream_records::{AtUri, CommitRoute, FeedLike, FeedPost, FeedRepost, JetstreamEvent, RecordError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classifier::Classifier;
use crate::enricher::{ContentEnricher, EnrichOutcome};
use crate::metrics::IngestMetrics;
use crate::repository::{FeedRepository, IndexError, Interaction};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{route} {did}/{rkey}: malformed record: {source}")]
    MalformedRecord {
        route: CommitRoute,
        did: String,
        rkey: String,
        #[source]
        source: RecordError,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// What a routed event did to the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Applied {
    Post(EnrichOutcome),
    /// Like or repost; `false` when the target post is not indexed.
    Interaction(bool),
    Deleted(bool),
}

/// Consumer of firehose events, run on the worker pool.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: JetstreamEvent) -> impl Future<Output = ()> + Send;
}

pub struct EventDispatcher<C> {
    enricher: ContentEnricher<C>,
    repo: FeedRepository,
    metrics: Arc<IngestMetrics>,
}

impl<C: Classifier> EventDispatcher<C> {
    pub fn new(
        enricher: ContentEnricher<C>,
        repo: FeedRepository,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            enricher,
            repo,
            metrics,
        }
    }

    /// Apply one event. `Ok(None)` means the event carried nothing to route.
    pub async fn dispatch(
        &self,
        event: &JetstreamEvent,
    ) -> Result<Option<(CommitRoute, Applied)>, DispatchError> {
        let (Some(commit), Some(route)) = (event.commit.as_ref(), event.route()) else {
            self.metrics.event_ignored();
            return Ok(None);
        };
        self.metrics.event_routed();

        let did = event.did.as_str();
        let rkey = commit.rkey.as_str();
        let malformed = |source: RecordError| DispatchError::MalformedRecord {
            route,
            did: did.to_string(),
            rkey: rkey.to_string(),
            source,
        };

        let applied = match route {
            CommitRoute::CreatePost => {
                let post: FeedPost = commit.decode_record().map_err(malformed)?;
                Applied::Post(self.enricher.enrich(did, rkey, &post).await?)
            }
            CommitRoute::CreateLike => {
                let like: FeedLike = commit.decode_record().map_err(malformed)?;
                let target = like.subject.uri.parse::<AtUri>().map_err(malformed)?;
                let target_rkey = target.require_rkey().map_err(malformed)?;
                self.interaction(route, Interaction::Like, did, rkey, target_rkey)
                    .await?
            }
            CommitRoute::CreateRepost => {
                let repost: FeedRepost = commit.decode_record().map_err(malformed)?;
                let target = repost.subject.uri.parse::<AtUri>().map_err(malformed)?;
                let target_rkey = target.require_rkey().map_err(malformed)?;
                self.interaction(route, Interaction::Repost, did, rkey, target_rkey)
                    .await?
            }
            CommitRoute::DeletePost => self.deleted(self.repo.delete_post(rkey).await?),
            CommitRoute::DeleteLike => self.deleted(self.repo.delete_like(rkey).await?),
            CommitRoute::DeleteRepost => self.deleted(self.repo.delete_repost(rkey).await?),
        };

        debug!(did = %did, rkey = %rkey, %route, ?applied, "Dispatched");
        Ok(Some((route, applied)))
    }

    async fn interaction(
        &self,
        route: CommitRoute,
        kind: Interaction,
        did: &str,
        rkey: &str,
        target_rkey: &str,
    ) -> Result<Applied, DispatchError> {
        let written = self
            .repo
            .insert_interaction(kind, did, rkey, target_rkey)
            .await?;
        self.metrics.interaction(route, written);
        Ok(Applied::Interaction(written))
    }

    fn deleted(&self, existed: bool) -> Applied {
        if existed {
            self.metrics.deleted();
        }
        Applied::Deleted(existed)
    }
}

impl<C: Classifier + 'static> EventHandler for EventDispatcher<C> {
    async fn handle(&self, event: JetstreamEvent) {
        if let Err(e) = self.dispatch(&event).await {
            match e {
                DispatchError::MalformedRecord { .. } => self.metrics.malformed_record(),
                DispatchError::Index(_) => self.metrics.handler_error(),
            }
            warn!(did = %event.did, error = %e, "Event handler failed");
        }
    }
}

/// Bounded set of in-flight handlers. `spawn` waits for a free worker, so a
/// slow pool back-pressures the stream reader.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    failed: u64,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: JoinSet::new(),
            cancel,
            failed: 0,
        }
    }

    /// Handlers that panicked, counted as they are reaped.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    fn reaped(&mut self, result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            self.failed += 1;
            warn!(error = %e, "Worker task failed");
        }
    }

    pub async fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        while let Some(result) = self.tasks.try_join_next() {
            self.reaped(result);
        }

        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return;
        };
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = work => {}
            }
        });
    }

    /// Wait for every spawned handler to finish.
    pub async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            self.reaped(result);
        }
    }
}
