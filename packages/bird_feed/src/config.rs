use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::feed::FeedAlgorithm;

// =============================================================================
// File config (figment-deserialized from defaults / birdfeed.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   birdfeed.toml:   [classifier]
//                    base_url = "http://10.0.0.5:12000"
//
//   env var:         BIRDFEED_CLASSIFIER__BASE_URL=http://10.0.0.5:12000
//
//   (double underscore = nesting, single underscore stays within field names)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub upstream: UpstreamFileConfig,
    #[serde(default)]
    pub classifier: ClassifierFileConfig,
    #[serde(default)]
    pub jetstream: JetstreamFileConfig,
    #[serde(default)]
    pub database: DatabaseFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Upstream PDS credentials (lives under `[upstream]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamFileConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Handle or DID of the feed's publishing account.
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub app_password: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for UpstreamFileConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            identifier: String::new(),
            app_password: String::new(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// Image classifier service (lives under `[classifier]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierFileConfig {
    #[serde(default = "default_classifier_url")]
    pub base_url: String,
    /// Route of the classify procedure on `base_url`.
    #[serde(default = "default_classifier_path")]
    pub path: String,
    #[serde(default = "default_target_label")]
    pub target_label: String,
    /// A classification must be strictly above this to be accepted.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_cdn_base_url")]
    pub cdn_base_url: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_url(),
            path: default_classifier_path(),
            target_label: default_target_label(),
            min_confidence: default_min_confidence(),
            cdn_base_url: default_cdn_base_url(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

/// Firehose subscription (lives under `[jetstream]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JetstreamFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_jetstream_url")]
    pub url: String,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for JetstreamFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_jetstream_url(),
            retry_delay_ms: default_retry_delay_ms(),
            workers: default_workers(),
        }
    }
}

/// Storage (lives under `[database]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseFileConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseFileConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Feed-generator HTTP surface (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL the feed generator is reachable at; its host becomes the did:web.
    #[serde(default)]
    pub service_endpoint: String,
    /// DID of the account that publishes the feed records.
    #[serde(default)]
    pub feed_actor_did: String,
    #[serde(default = "default_feeds")]
    pub feeds: BTreeMap<String, FeedAlgorithm>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            service_endpoint: String::new(),
            feed_actor_did: String::new(),
            feeds: default_feeds(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_api_base_url() -> String {
    "https://bsky.social".to_string()
}
fn default_refresh_interval_secs() -> u64 {
    600
}
fn default_classifier_url() -> String {
    "http://127.0.0.1:12000".to_string()
}
fn default_classifier_path() -> String {
    "/selfie".to_string()
}
fn default_target_label() -> String {
    "bird".to_string()
}
fn default_min_confidence() -> f64 {
    0.85
}
fn default_cdn_base_url() -> String {
    "https://cdn.bsky.app".to_string()
}
fn default_classifier_timeout_secs() -> u64 {
    10
}
fn default_jetstream_url() -> String {
    "wss://jetstream2.us-east.bsky.network/subscribe".to_string()
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_workers() -> usize {
    2
}
fn default_database_url() -> String {
    "sqlite://birdfeed.db?mode=rwc".to_string()
}
fn default_max_connections() -> u32 {
    5
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_feeds() -> BTreeMap<String, FeedAlgorithm> {
    BTreeMap::from([
        ("birds".to_string(), FeedAlgorithm::MostRecent),
        ("popular-birds".to_string(), FeedAlgorithm::MostPopular),
    ])
}

/// Build a figment that layers: defaults → config file → BIRDFEED_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `BIRDFEED_JETSTREAM__WORKERS=4`  →  `jetstream.workers = 4`
///   `BIRDFEED_SERVER__FEEDS__BIRDS=popular`  →  `server.feeds.birds = "popular"`
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("BIRDFEED_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the service)
// =============================================================================

#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub api_base_url: String,
    pub identifier: String,
    pub app_password: String,
    pub refresh_interval: Duration,
}

impl UpstreamConfig {
    pub fn from_file(fc: &UpstreamFileConfig) -> Result<Self> {
        if fc.identifier.is_empty() || fc.app_password.is_empty() {
            anyhow::bail!(
                "upstream.identifier and upstream.app_password must be set \
                 (BIRDFEED_UPSTREAM__IDENTIFIER / BIRDFEED_UPSTREAM__APP_PASSWORD)"
            );
        }
        Ok(Self {
            api_base_url: fc.api_base_url.trim_end_matches('/').to_string(),
            identifier: fc.identifier.clone(),
            app_password: fc.app_password.clone(),
            refresh_interval: Duration::from_secs(fc.refresh_interval_secs.max(1)),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    /// Full URL of the classify procedure.
    pub endpoint: String,
    pub target_label: String,
    pub min_confidence: f64,
    pub cdn_base_url: String,
    pub timeout: Duration,
}

impl ClassifierConfig {
    pub fn from_file(fc: &ClassifierFileConfig) -> Self {
        Self {
            endpoint: format!(
                "{}/{}",
                fc.base_url.trim_end_matches('/'),
                fc.path.trim_start_matches('/')
            ),
            target_label: fc.target_label.clone(),
            min_confidence: fc.min_confidence,
            cdn_base_url: fc.cdn_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(fc.timeout_secs),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JetstreamConfig {
    pub enabled: bool,
    pub url: String,
    pub retry_delay: Duration,
    pub workers: usize,
}

impl JetstreamConfig {
    pub fn from_file(fc: &JetstreamFileConfig) -> Self {
        Self {
            enabled: fc.enabled,
            url: fc.url.clone(),
            retry_delay: Duration::from_millis(fc.retry_delay_ms),
            workers: fc.workers.max(1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
    pub service_endpoint: String,
    /// `did:web:<host of service_endpoint>`
    pub service_did: String,
    pub feed_actor_did: String,
    pub feeds: BTreeMap<String, FeedAlgorithm>,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", fc.host, fc.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address {}:{}", fc.host, fc.port))?;

        let service_did = if fc.service_endpoint.is_empty() {
            String::new()
        } else {
            service_did_for(&fc.service_endpoint)?
        };

        if fc.enabled && (fc.feed_actor_did.is_empty() || service_did.is_empty()) {
            anyhow::bail!(
                "server.feed_actor_did and server.service_endpoint must be set when the HTTP server is enabled"
            );
        }

        Ok(Self {
            enabled: fc.enabled,
            bind_addr,
            service_endpoint: fc.service_endpoint.trim_end_matches('/').to_string(),
            service_did,
            feed_actor_did: fc.feed_actor_did.clone(),
            feeds: fc.feeds.clone(),
        })
    }
}

fn service_did_for(endpoint: &str) -> Result<String> {
    let url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("Invalid service endpoint: {}", endpoint))?;
    let host = url
        .host_str()
        .with_context(|| format!("Service endpoint has no host: {}", endpoint))?;
    Ok(format!("did:web:{}", host))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.upstream.api_base_url, "https://bsky.social");
        assert_eq!(fc.upstream.refresh_interval_secs, 600);
        assert_eq!(fc.classifier.target_label, "bird");
        assert_eq!(fc.classifier.min_confidence, 0.85);
        assert_eq!(fc.jetstream.workers, 2);
        assert_eq!(fc.jetstream.retry_delay_ms, 1000);
        assert_eq!(fc.server.port, 8080);
        assert_eq!(fc.server.feeds.len(), 2);
        assert_eq!(fc.server.feeds["birds"], FeedAlgorithm::MostRecent);
    }

    // ── runtime views ───────────────────────────────────────────────────

    #[test]
    fn test_upstream_requires_credentials() {
        let err = UpstreamConfig::from_file(&UpstreamFileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("upstream.identifier"));

        let fc = UpstreamFileConfig {
            identifier: "birds.bsky.social".to_string(),
            app_password: "xxxx-xxxx-xxxx-xxxx".to_string(),
            api_base_url: "https://bsky.social/".to_string(),
            ..Default::default()
        };
        let uc = UpstreamConfig::from_file(&fc).unwrap();
        assert_eq!(uc.api_base_url, "https://bsky.social");
        assert_eq!(uc.refresh_interval, Duration::from_secs(600));
    }

    #[test]
    fn test_classifier_endpoint_joins_path() {
        let cc = ClassifierConfig::from_file(&ClassifierFileConfig::default());
        assert_eq!(cc.endpoint, "http://127.0.0.1:12000/selfie");

        let fc = ClassifierFileConfig {
            base_url: "http://classifier:12000/".to_string(),
            path: "potentialBird".to_string(),
            ..Default::default()
        };
        assert_eq!(
            ClassifierConfig::from_file(&fc).endpoint,
            "http://classifier:12000/potentialBird"
        );
    }

    #[test]
    fn test_jetstream_workers_at_least_one() {
        let fc = JetstreamFileConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(JetstreamConfig::from_file(&fc).workers, 1);
    }

    #[test]
    fn test_server_config_derives_service_did() {
        let fc = ServerFileConfig {
            service_endpoint: "https://feeds.example.com/".to_string(),
            feed_actor_did: "did:plc:me".to_string(),
            ..Default::default()
        };
        let sc = ServerConfig::from_file(&fc).unwrap();
        assert_eq!(sc.service_did, "did:web:feeds.example.com");
        assert_eq!(sc.service_endpoint, "https://feeds.example.com");
        assert_eq!(sc.bind_addr.port(), 8080);
    }

    #[test]
    fn test_server_config_requires_identity_when_enabled() {
        assert!(ServerConfig::from_file(&ServerFileConfig::default()).is_err());

        let fc = ServerFileConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(ServerConfig::from_file(&fc).is_ok());
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join("birdfeed.toml"))
            .extract()
            .unwrap();
        assert_eq!(fc.classifier.base_url, "http://127.0.0.1:12000");
        assert!(fc.jetstream.enabled);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("birdfeed.toml");
        std::fs::write(
            &path,
            "[classifier]\ntarget_label = \"owl\"\nmin_confidence = 0.9\n\n\
             [jetstream]\nworkers = 8\n\n\
             [server.feeds]\nowls = \"popular\"\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.classifier.target_label, "owl");
        assert_eq!(fc.classifier.min_confidence, 0.9);
        assert_eq!(fc.jetstream.workers, 8);
        assert_eq!(fc.server.feeds["owls"], FeedAlgorithm::MostPopular);
    }
}
