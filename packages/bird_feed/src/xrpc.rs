//! Minimal XRPC client for the upstream PDS session procedures.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub const CREATE_SESSION: &str = "com.atproto.server.createSession";
pub const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";

#[derive(Debug, thiserror::Error)]
pub enum XrpcError {
    #[error("{method}: request failed: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method}: HTTP {status}: {error}{}", .message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    Status {
        method: &'static str,
        status: u16,
        error: String,
        message: Option<String>,
    },

    #[error("{method}: unexpected response body: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Tokens and identity returned by both session procedures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub did: String,
    #[serde(default)]
    pub handle: String,
}

/// The credential exchange the session manager depends on.
pub trait AuthApi: Send + Sync {
    fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> impl Future<Output = Result<SessionTokens, XrpcError>> + Send;

    fn refresh_session(
        &self,
        refresh_jwt: &str,
    ) -> impl Future<Output = Result<SessionTokens, XrpcError>> + Send;
}

#[derive(Debug, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: String,
    message: Option<String>,
}

#[derive(Clone)]
pub struct XrpcClient {
    http: reqwest::Client,
    base_url: String,
}

impl XrpcClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("birdfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn procedure<B: Serialize + ?Sized>(
        &self,
        method: &'static str,
        bearer: Option<&str>,
        body: Option<&B>,
    ) -> Result<SessionTokens, XrpcError> {
        let url = format!("{}/xrpc/{}", self.base_url, method);
        let mut req = self.http.post(&url);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|source| XrpcError::Transport { method, source })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.json::<XrpcErrorBody>().await.ok();
            let (error, message) = match body {
                Some(b) => (b.error, b.message),
                None => (String::new(), None),
            };
            return Err(XrpcError::Status {
                method,
                status: status.as_u16(),
                error: if error.is_empty() {
                    status.canonical_reason().unwrap_or("Error").to_string()
                } else {
                    error
                },
                message,
            });
        }

        resp.json::<SessionTokens>()
            .await
            .map_err(|source| XrpcError::Decode { method, source })
    }
}

impl AuthApi for XrpcClient {
    async fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<SessionTokens, XrpcError> {
        let body = serde_json::json!({ "identifier": identifier, "password": password });
        self.procedure(CREATE_SESSION, None, Some(&body)).await
    }

    async fn refresh_session(&self, refresh_jwt: &str) -> Result<SessionTokens, XrpcError> {
        self.procedure::<serde_json::Value>(REFRESH_SESSION, Some(refresh_jwt), None)
            .await
    }
}
