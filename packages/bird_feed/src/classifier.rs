//! Client for the external image classifier.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::config::ClassifierConfig;

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("classifier returned HTTP {0}")]
    Status(u16),

    #[error("classifier response could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("classifier confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

impl Classification {
    /// Accepted when the label matches and confidence is strictly above the threshold.
    pub fn accepts(&self, target_label: &str, min_confidence: f64) -> bool {
        self.label == target_label && self.confidence > min_confidence
    }
}

pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        image_url: &str,
    ) -> impl Future<Output = Result<Classification, ClassifierError>> + Send;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    image_url: &'a str,
}

#[derive(Clone)]
pub struct HttpClassifier {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClassifierError::Transport)?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }
}

impl Classifier for HttpClassifier {
    async fn classify(&self, image_url: &str) -> Result<Classification, ClassifierError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&ClassifyRequest { image_url })
            .send()
            .await
            .map_err(ClassifierError::Transport)?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(ClassifierError::Status(resp.status().as_u16()));
        }

        let result: Classification = resp.json().await.map_err(ClassifierError::Decode)?;
        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(ClassifierError::ConfidenceOutOfRange(result.confidence));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierFileConfig;
    use crate::test_support;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn classifier_at(router: Router) -> HttpClassifier {
        let base = test_support::serve(router).await;
        let config = ClassifierConfig::from_file(&ClassifierFileConfig {
            base_url: base,
            ..Default::default()
        });
        HttpClassifier::new(&config).unwrap()
    }

    #[test]
    fn accepts_is_strict() {
        let c = Classification {
            label: "bird".to_string(),
            confidence: 0.85,
        };
        assert!(!c.accepts("bird", 0.85));

        let c = Classification {
            label: "bird".to_string(),
            confidence: 0.86,
        };
        assert!(c.accepts("bird", 0.85));
        assert!(!c.accepts("owl", 0.85));
    }

    #[tokio::test]
    async fn posts_image_url_and_decodes_result() {
        let router = Router::new().route(
            "/selfie",
            post(|Json(body): Json<serde_json::Value>| async move {
                let url = body["image_url"].as_str().unwrap_or_default().to_string();
                let label = if url.contains("robin") { "bird" } else { "not_bird" };
                Json(serde_json::json!({ "label": label, "confidence": 0.97 }))
            }),
        );
        let classifier = classifier_at(router).await;

        let result = classifier.classify("https://cdn.test/robin@jpeg").await.unwrap();
        assert_eq!(result.label, "bird");
        assert_eq!(result.confidence, 0.97);

        let result = classifier.classify("https://cdn.test/cat@jpeg").await.unwrap();
        assert_eq!(result.label, "not_bird");
    }

    #[tokio::test]
    async fn non_200_is_an_error() {
        let router = Router::new().route(
            "/selfie",
            post(|| async { (StatusCode::BAD_REQUEST, "No URL provided") }),
        );
        let classifier = classifier_at(router).await;

        let err = classifier.classify("x").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Status(400)));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let router = Router::new().route("/selfie", post(|| async { "not json" }));
        let classifier = classifier_at(router).await;

        let err = classifier.classify("x").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Decode(_)));
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_rejected() {
        let router = Router::new().route(
            "/selfie",
            post(|| async { Json(serde_json::json!({ "label": "bird", "confidence": 1.5 })) }),
        );
        let classifier = classifier_at(router).await;

        let err = classifier.classify("x").await.unwrap_err();
        assert!(matches!(err, ClassifierError::ConfidenceOutOfRange(_)));
    }
}
