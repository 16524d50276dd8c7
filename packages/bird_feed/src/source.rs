//! Jetstream websocket reader.

use futures::stream::{BoxStream, Stream, StreamExt};
use jetstream_records::{JetstreamEvent, nsid};
use std::future::Future;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use crate::metrics::IngestMetrics;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid jetstream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tungstenite::Error>,
    },

    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),

    #[error("stream closed by server")]
    Closed,
}

/// A connectable stream of firehose events. Every item after an `Err` is
/// unspecified; callers reconnect.
pub trait EventSource: Send + Sync {
    type Stream: Stream<Item = Result<JetstreamEvent, SourceError>> + Send + Unpin;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream, SourceError>> + Send;
}

pub struct JetstreamSource {
    url: String,
    metrics: Arc<IngestMetrics>,
}

impl JetstreamSource {
    /// `base_url` is the `/subscribe` endpoint; the wanted collections are appended.
    pub fn new(base_url: &str, metrics: Arc<IngestMetrics>) -> Result<Self, SourceError> {
        Ok(Self {
            url: subscribe_url(base_url)?,
            metrics,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub fn subscribe_url(base_url: &str) -> Result<String, SourceError> {
    let mut url = reqwest::Url::parse(base_url).map_err(|e| SourceError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(SourceError::InvalidUrl {
            url: base_url.to_string(),
            reason: "scheme must be ws or wss".to_string(),
        });
    }
    {
        let mut query = url.query_pairs_mut();
        for collection in nsid::WANTED {
            query.append_pair("wantedCollections", collection);
        }
    }
    Ok(url.to_string())
}

impl EventSource for JetstreamSource {
    type Stream = BoxStream<'static, Result<JetstreamEvent, SourceError>>;

    async fn connect(&self) -> Result<Self::Stream, SourceError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| SourceError::Connect {
                url: self.url.clone(),
                source: Box::new(e),
            })?;
        info!(url = %self.url, "Connected to Jetstream");
        Ok(decode_frames(ws, self.metrics.clone()).boxed())
    }
}

/// Turn websocket messages into events. Undecodable frames are counted and
/// skipped; a close frame, a transport error or end of stream ends the stream
/// with an error. Pings are answered by tungstenite on the next read.
pub fn decode_frames<S>(
    ws: S,
    metrics: Arc<IngestMetrics>,
) -> impl Stream<Item = Result<JetstreamEvent, SourceError>> + Send
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin,
{
    futures::stream::unfold(Some(ws), move |state| {
        let metrics = metrics.clone();
        async move {
            let mut ws = state?;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        metrics.frame_read(text.len());
                        match serde_json::from_str::<JetstreamEvent>(&text) {
                            Ok(event) => return Some((Ok(event), Some(ws))),
                            Err(e) => {
                                metrics.frame_dropped();
                                debug!(error = %e, "Dropping undecodable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        metrics.frame_read(bytes.len());
                        metrics.frame_dropped();
                        debug!(len = bytes.len(), "Dropping binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Jetstream sent close");
                        return Some((Err(SourceError::Closed), None));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Some((Err(SourceError::WebSocket(Box::new(e))), None));
                    }
                    None => return Some((Err(SourceError::Closed), None)),
                }
            }
        }
    })
}
