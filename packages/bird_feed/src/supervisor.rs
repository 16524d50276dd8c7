//! Connection lifecycle around the event source.
//!
//! The supervisor connects, feeds every event to the worker pool and, when
//! the stream fails, waits out the backoff policy and connects again. Only
//! cancellation ends the loop.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatcher::{EventHandler, WorkerPool};
use crate::metrics::IngestMetrics;
use crate::source::{EventSource, SourceError};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
}

pub trait BackoffPolicy: Send + Sync {
    /// Delay before the next attempt, given consecutive failures so far (≥ 1).
    fn delay(&self, failures: u32) -> Duration;
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl BackoffPolicy for FixedDelay {
    fn delay(&self, _failures: u32) -> Duration {
        self.0
    }
}

pub struct ConnectionSupervisor<S, H, B> {
    source: S,
    handler: Arc<H>,
    backoff: B,
    workers: usize,
    metrics: Arc<IngestMetrics>,
    state: watch::Sender<ConnectionState>,
    stats_interval: Duration,
}

impl<S, H, B> ConnectionSupervisor<S, H, B>
where
    S: EventSource,
    H: EventHandler,
    B: BackoffPolicy,
{
    pub fn new(
        source: S,
        handler: Arc<H>,
        backoff: B,
        workers: usize,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            source,
            handler,
            backoff,
            workers,
            metrics,
            state,
            stats_interval: STATS_INTERVAL,
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until `cancel` fires, then wait for in-flight handlers to stop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut pool = WorkerPool::new(self.workers, cancel.clone());
        let mut failures = 0u32;

        while !cancel.is_cancelled() {
            self.state.send_replace(ConnectionState::Connecting);

            let err = tokio::select! {
                _ = cancel.cancelled() => break,
                err = self.stream_once(&mut pool, &mut failures) => err,
            };

            self.state.send_replace(ConnectionState::Disconnected);
            failures = failures.saturating_add(1);
            self.metrics.reconnected();

            let delay = self.backoff.delay(failures);
            warn!(error = %err, failures, delay_ms = delay.as_millis() as u64, "Jetstream connection lost, reconnecting");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        pool.drain().await;
        info!("Connection supervisor stopped");
    }

    /// Connect and pump events until the stream fails.
    async fn stream_once(&self, pool: &mut WorkerPool, failures: &mut u32) -> SourceError {
        let mut stream = match self.source.connect().await {
            Ok(stream) => stream,
            Err(e) => return e,
        };
        self.state.send_replace(ConnectionState::Streaming);
        *failures = 0;

        let mut stats = tokio::time::interval(self.stats_interval);
        stats.tick().await;
        let mut last = self.metrics.snapshot().stream;

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        let handler = self.handler.clone();
                        pool.spawn(async move { handler.handle(event).await }).await;
                    }
                    Some(Err(e)) => return e,
                    None => return SourceError::Closed,
                },
                _ = stats.tick() => {
                    let now = self.metrics.snapshot().stream;
                    let events = now.events_read - last.events_read;
                    let bytes = now.bytes_read - last.bytes_read;
                    info!(
                        events_read = events,
                        bytes_read = bytes,
                        avg_event_bytes = if events == 0 { 0 } else { bytes / events },
                        total_events = now.events_read,
                        "Stream stats"
                    );
                    last = now;
                }
            }
        }
    }
}
