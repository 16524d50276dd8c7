use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use bird_feed::classifier::HttpClassifier;
use bird_feed::config::{
    ClassifierConfig, FileConfig, JetstreamConfig, ServerConfig, UpstreamConfig, load_config,
};
use bird_feed::db::Database;
use bird_feed::dispatcher::EventDispatcher;
use bird_feed::enricher::ContentEnricher;
use bird_feed::feed::FeedPageAssembler;
use bird_feed::metrics::IngestMetrics;
use bird_feed::repository::FeedRepository;
use bird_feed::routes::{self, AppState};
use bird_feed::session::SessionManager;
use bird_feed::source::JetstreamSource;
use bird_feed::supervisor::{ConnectionSupervisor, FixedDelay};
use bird_feed::xrpc::XrpcClient;

const XRPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "birdfeed")]
#[command(about = "Bluesky feed generator for bird photos")]
struct Cli {
    /// Path to the TOML config file (missing file means defaults + env)
    #[arg(short, long, default_value = "./birdfeed.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "birdfeed=debug,bird_feed=debug,tower_http=debug,info"
    } else {
        "birdfeed=info,bird_feed=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting birdfeed");

    let file_config: FileConfig = load_config(&cli.config)
        .extract()
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    let upstream = UpstreamConfig::from_file(&file_config.upstream)?;
    let classifier_config = ClassifierConfig::from_file(&file_config.classifier);
    let jetstream = JetstreamConfig::from_file(&file_config.jetstream);
    let server = Arc::new(ServerConfig::from_file(&file_config.server)?);

    let db = Database::new(&file_config.database).await?;
    let repo = FeedRepository::new(db.pool.clone());
    let metrics = Arc::new(IngestMetrics::new());
    let cancel = CancellationToken::new();

    // Authenticate before anything else runs; there is no retry.
    let xrpc = XrpcClient::new(&upstream.api_base_url, XRPC_TIMEOUT)
        .context("Failed to build XRPC client")?;
    let sessions = Arc::new(
        SessionManager::authenticate(
            xrpc,
            &upstream.identifier,
            &upstream.app_password,
            upstream.refresh_interval,
        )
        .await
        .with_context(|| format!("Failed to authenticate as {}", upstream.identifier))?,
    );
    let refresh_task = tokio::spawn({
        let sessions = sessions.clone();
        let cancel = cancel.clone();
        async move { sessions.run_refresh_loop(cancel).await }
    });

    let (ingest_task, connection) = if jetstream.enabled {
        let classifier = HttpClassifier::new(&classifier_config)
            .context("Failed to build classifier client")?;
        let enricher =
            ContentEnricher::new(classifier, repo.clone(), metrics.clone(), &classifier_config);
        let dispatcher = Arc::new(EventDispatcher::new(enricher, repo.clone(), metrics.clone()));
        let source = JetstreamSource::new(&jetstream.url, metrics.clone())
            .context("Invalid jetstream.url")?;
        info!(url = %source.url(), workers = jetstream.workers, "Starting Jetstream ingest");

        let supervisor = ConnectionSupervisor::new(
            source,
            dispatcher,
            FixedDelay(jetstream.retry_delay),
            jetstream.workers,
            metrics.clone(),
        );
        let state = supervisor.state();
        let cancel = cancel.clone();
        (
            Some(tokio::spawn(async move { supervisor.run(cancel).await })),
            Some(state),
        )
    } else {
        info!("Jetstream ingest disabled");
        (None, None)
    };

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal, cleaning up..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            cancel.cancel();
        }
    });

    let server_result = if server.enabled {
        let state = AppState {
            feeds: Arc::new(FeedPageAssembler::new(repo.clone(), server.feeds.clone())),
            repo: repo.clone(),
            metrics: metrics.clone(),
            server: server.clone(),
            session: Some(sessions.cell().clone()),
            connection,
        };
        let app = routes::router(state)
            .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
            .layer(CorsLayer::permissive());

        let listener = tokio::net::TcpListener::bind(server.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", server.bind_addr))?;
        let actual_addr = listener.local_addr()?;

        info!("birdfeed listening on http://{}", actual_addr);
        info!("  service DID: {}", server.service_did);
        for name in server.feeds.keys() {
            info!("  feed: at://{}/app.bsky.feed.generator/{}", server.feed_actor_did, name);
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .await
            .context("Server error")
    } else {
        info!("HTTP server disabled");
        cancel.cancelled().await;
        Ok(())
    };

    // A server error also stops ingest.
    cancel.cancel();

    if let Some(task) = ingest_task {
        if let Err(e) = task.await {
            warn!("Ingest task ended abnormally: {}", e);
        }
    }
    if let Err(e) = refresh_task.await {
        warn!("Session refresh task ended abnormally: {}", e);
    }
    db.pool.close().await;

    info!("Shutdown complete");
    server_result
}
