//! Feed generator HTTP surface.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use jetstream_records::{AtUri, nsid};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::feed::{FeedError, FeedPageAssembler};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::repository::{FeedRepository, IndexStats};
use crate::session::{SessionCell, decode_jwt_claims};
use crate::supervisor::ConnectionState;

#[derive(Clone)]
pub struct AppState {
    pub feeds: Arc<FeedPageAssembler<FeedRepository>>,
    pub repo: FeedRepository,
    pub metrics: Arc<IngestMetrics>,
    pub server: Arc<ServerConfig>,
    pub session: Option<SessionCell>,
    pub connection: Option<watch::Receiver<ConnectionState>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/xrpc/app.bsky.feed.getFeedSkeleton",
            get(get_feed_skeleton_handler),
        )
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(describe_feed_generator_handler),
        )
        .route("/.well-known/did.json", get(did_document_handler))
        .route("/health/live", get(health_live_handler))
        .route("/health/ready", get(health_ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// XRPC error body: `{"error": "...", "message": "..."}`.
pub struct XrpcErrorResponse {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl XrpcErrorResponse {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "InvalidRequest",
            message: message.into(),
        }
    }
}

impl IntoResponse for XrpcErrorResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.error, "message": self.message })),
        )
            .into_response()
    }
}

impl From<FeedError> for XrpcErrorResponse {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::InvalidCursor(_) => Self::invalid_request(err.to_string()),
            FeedError::UnknownFeed(_) => Self {
                status: StatusCode::BAD_REQUEST,
                error: "UnknownFeed",
                message: err.to_string(),
            },
            FeedError::Storage(e) => {
                error!(error = %e, "Feed query failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    error: "InternalServerError",
                    message: "Internal Server Error".to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedSkeletonParams {
    pub feed: String,
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SkeletonPost {
    pub post: String,
}

#[derive(Debug, Serialize)]
pub struct FeedSkeleton {
    pub feed: Vec<SkeletonPost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Unverified requester DID from the bearer token's `iss` claim.
fn viewer_did(headers: &HeaderMap) -> Option<String> {
    let token = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?;
    decode_jwt_claims(token)?.iss
}

pub async fn get_feed_skeleton_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedSkeletonParams>,
) -> Result<Json<FeedSkeleton>, XrpcErrorResponse> {
    let feed_uri: AtUri = params
        .feed
        .parse()
        .map_err(|_| XrpcErrorResponse::invalid_request("feed must be an at:// URI"))?;

    let feed_name = match (feed_uri.collection.as_deref(), feed_uri.rkey.as_deref()) {
        (Some(nsid::FEED_GENERATOR), Some(name))
            if feed_uri.authority == state.server.feed_actor_did =>
        {
            name
        }
        _ => return Err(FeedError::UnknownFeed(params.feed.clone()).into()),
    };

    let limit = match params.limit.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| XrpcErrorResponse::invalid_request("limit must be an integer"))?,
        ),
    };

    let viewer = viewer_did(&headers);
    let page = state
        .feeds
        .get_page(feed_name, viewer.as_deref(), limit, params.cursor.as_deref())
        .await?;

    info!(
        feed = %feed_name,
        viewer = viewer.as_deref().unwrap_or("anonymous"),
        returned = page.posts.len(),
        "Served feed skeleton"
    );

    Ok(Json(FeedSkeleton {
        feed: page
            .posts
            .into_iter()
            .map(|post| SkeletonPost { post })
            .collect(),
        cursor: page.cursor,
    }))
}

pub async fn describe_feed_generator_handler(State(state): State<AppState>) -> impl IntoResponse {
    let feeds: Vec<_> = state
        .feeds
        .feed_names()
        .map(|name| {
            serde_json::json!({
                "uri": AtUri::feed_generator(&state.server.feed_actor_did, name).to_string()
            })
        })
        .collect();

    Json(serde_json::json!({
        "did": state.server.service_did,
        "feeds": feeds,
    }))
}

pub async fn did_document_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.server.service_did,
        "service": [{
            "id": "#bsky_fg",
            "type": "BskyFeedGenerator",
            "serviceEndpoint": state.server.service_endpoint,
        }],
    }))
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - the index must be reachable; stream and session state
/// are reported but do not fail the probe.
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = state.repo.pool().acquire().await.is_ok();
    let stream = state
        .connection
        .as_ref()
        .map(|rx| format!("{:?}", *rx.borrow()).to_lowercase());
    let session = state.session.as_ref().map(|cell| {
        let current = cell.current();
        serde_json::json!({
            "did": current.did,
            "version": cell.version(),
            "expires_at": current.expiry.map(|e| e.to_rfc3339()),
        })
    });

    let body = serde_json::json!({
        "status": if db_ok { "ready" } else { "not_ready" },
        "database": if db_ok { "connected" } else { "disconnected" },
        "stream": stream,
        "session": session,
    });

    if db_ok {
        Json(body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub ingest: MetricsSnapshot,
    /// Row counts; absent when the index cannot be read.
    pub stored: Option<IndexStats>,
}

/// Metrics endpoint - ingest counters plus index row counts
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stored = match state.repo.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            error!(error = %e, "Failed to read index stats");
            None
        }
    };
    Json(MetricsResponse {
        ingest: state.metrics.snapshot(),
        stored,
    })
}
