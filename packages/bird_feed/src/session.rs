//! Upstream session lifecycle.
//!
//! The service logs in once at startup and then refreshes its tokens on a
//! fixed interval. The live [`Session`] sits in a [`SessionCell`]: readers get
//! a whole `Arc<Session>`, the refresh loop swaps it in one step. A failed
//! refresh keeps the previous session and tries again on the next tick.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::xrpc::{AuthApi, SessionTokens, XrpcError};

#[derive(Debug, Clone)]
pub struct Session {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub did: String,
    pub handle: String,
    /// `exp` claim of the access token, when it can be read.
    pub expiry: Option<DateTime<Utc>>,
}

impl From<SessionTokens> for Session {
    fn from(tokens: SessionTokens) -> Self {
        let expiry = jwt_expiry(&tokens.access_jwt);
        Self {
            access_jwt: tokens.access_jwt,
            refresh_jwt: tokens.refresh_jwt,
            did: tokens.did,
            handle: tokens.handle,
            expiry,
        }
    }
}

/// The JWT claims this service looks at.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct JwtClaims {
    pub iss: Option<String>,
    pub exp: Option<i64>,
}

/// Decode a JWT payload without verifying the signature.
pub fn decode_jwt_claims(jwt: &str) -> Option<JwtClaims> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = data_encoding::BASE64URL_NOPAD
        .decode(payload.trim_end_matches('=').as_bytes())
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Read the `exp` claim from a JWT without verifying it.
pub fn jwt_expiry(jwt: &str) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(decode_jwt_claims(jwt)?.exp?, 0)
}

#[derive(Debug, Clone)]
pub struct VersionedSession {
    pub version: u64,
    pub session: Arc<Session>,
}

/// Shared holder for the current session.
#[derive(Clone)]
pub struct SessionCell {
    tx: Arc<watch::Sender<VersionedSession>>,
}

impl SessionCell {
    pub fn new(session: Session) -> Self {
        let (tx, _rx) = watch::channel(VersionedSession {
            version: 1,
            session: Arc::new(session),
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<Session> {
        self.tx.borrow().session.clone()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Replace the session; returns the new version.
    pub fn replace(&self, session: Session) -> u64 {
        let mut version = 0;
        self.tx.send_modify(|current| {
            current.version += 1;
            current.session = Arc::new(session);
            version = current.version;
        });
        version
    }

    pub fn subscribe(&self) -> watch::Receiver<VersionedSession> {
        self.tx.subscribe()
    }
}

pub struct SessionManager<A> {
    api: A,
    cell: SessionCell,
    refresh_interval: Duration,
}

impl<A: AuthApi> SessionManager<A> {
    /// Exchange credentials for a first session.
    pub async fn authenticate(
        api: A,
        identifier: &str,
        password: &str,
        refresh_interval: Duration,
    ) -> Result<Self, XrpcError> {
        let tokens = api.create_session(identifier, password).await?;
        let session = Session::from(tokens);
        info!(did = %session.did, handle = %session.handle, "Authenticated with upstream");
        Ok(Self {
            api,
            cell: SessionCell::new(session),
            refresh_interval,
        })
    }

    pub fn cell(&self) -> &SessionCell {
        &self.cell
    }

    /// Refresh once. On failure the stored session is left untouched.
    pub async fn refresh(&self) -> Result<Arc<Session>, XrpcError> {
        let current = self.cell.current();
        let tokens = self.api.refresh_session(&current.refresh_jwt).await?;
        let version = self.cell.replace(Session::from(tokens));
        let session = self.cell.current();
        debug!(version, expiry = ?session.expiry, "Session refreshed");
        Ok(session)
    }

    /// Refresh every `refresh_interval` until cancelled.
    pub async fn run_refresh_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the session is fresh.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session refresh loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Session refresh failed, keeping previous session");
                    }
                }
            }
        }
    }
}
