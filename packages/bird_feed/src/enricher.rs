//! Classification gate in front of the post index.
//!
//! A post is eligible when it is not a reply and carries at least one image.
//! Images are classified one at a time and the first accepted image admits the
//! post; classifier failures skip that image only.

use jetstream_records::FeedPost;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::ClassifierConfig;
use crate::metrics::IngestMetrics;
use crate::repository::{FeedRepository, IndexError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnrichOutcome {
    /// Reply, or no images to classify.
    Ineligible,
    /// No image was accepted by the classifier.
    Rejected,
    Indexed { confidence: f64 },
}

pub struct ContentEnricher<C> {
    classifier: C,
    repo: FeedRepository,
    metrics: Arc<IngestMetrics>,
    target_label: String,
    min_confidence: f64,
    cdn_base_url: String,
}

/// Public web link stored alongside an indexed post.
pub fn post_web_url(did: &str, rkey: &str) -> String {
    format!("https://bsky.app/profile/{}/post/{}", did, rkey)
}

impl<C: Classifier> ContentEnricher<C> {
    pub fn new(
        classifier: C,
        repo: FeedRepository,
        metrics: Arc<IngestMetrics>,
        config: &ClassifierConfig,
    ) -> Self {
        Self {
            classifier,
            repo,
            metrics,
            target_label: config.target_label.clone(),
            min_confidence: config.min_confidence,
            cdn_base_url: config.cdn_base_url.clone(),
        }
    }

    pub fn image_url(&self, did: &str, cid: &str) -> String {
        // `/img/`, the CDN's current layout; not the older `/image/` prefix.
        format!(
            "{}/img/feed_fullsize/plain/{}/{}@jpeg",
            self.cdn_base_url, did, cid
        )
    }

    pub async fn enrich(
        &self,
        did: &str,
        rkey: &str,
        post: &FeedPost,
    ) -> Result<EnrichOutcome, IndexError> {
        let images = post.images();
        if post.is_reply() || images.is_empty() {
            self.metrics.post_ineligible();
            return Ok(EnrichOutcome::Ineligible);
        }

        let mut accepted = None;
        for (idx, image) in images.iter().enumerate() {
            let Some(cid) = image.image.cid() else {
                warn!(did = %did, rkey = %rkey, image = idx, "Image has no blob cid, skipping");
                continue;
            };
            let url = self.image_url(did, cid);

            match self.classifier.classify(&url).await {
                Ok(result) if result.accepts(&self.target_label, self.min_confidence) => {
                    accepted = Some(result.confidence);
                    break;
                }
                Ok(result) => {
                    debug!(
                        did = %did,
                        rkey = %rkey,
                        label = %result.label,
                        confidence = result.confidence,
                        "Image not accepted"
                    );
                }
                Err(e) => {
                    self.metrics.classifier_error();
                    warn!(did = %did, rkey = %rkey, url = %url, error = %e, "Classifier call failed");
                }
            }
        }

        let Some(confidence) = accepted else {
            self.metrics.post_rejected();
            return Ok(EnrichOutcome::Rejected);
        };

        let uri = post_web_url(did, rkey);
        match self
            .repo
            .insert_post(did, rkey, &uri, post.has_nsfw_self_label(), confidence)
            .await
        {
            Ok(()) => {
                self.metrics.post_indexed();
                info!(did = %did, rkey = %rkey, confidence, "Indexed post");
            }
            Err(IndexError::Conflict { .. }) => {
                info!(did = %did, rkey = %rkey, "Post already indexed");
            }
            Err(e) => return Err(e),
        }

        Ok(EnrichOutcome::Indexed { confidence })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classifier::{Classification, ClassifierError};
    use crate::config::ClassifierFileConfig;
    use crate::repository::test_helpers::test_repository;
    use std::sync::Mutex;

    /// Classifier that answers by substring of the image URL and records calls.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedClassifier {
        pub answers: Arc<Vec<(&'static str, Result<f64, u16>)>>,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedClassifier {
        pub fn new(answers: Vec<(&'static str, Result<f64, u16>)>) -> Self {
            Self {
                answers: Arc::new(answers),
                calls: Arc::default(),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Classifier for ScriptedClassifier {
        async fn classify(&self, image_url: &str) -> Result<Classification, ClassifierError> {
            self.calls.lock().unwrap().push(image_url.to_string());
            let answer = self
                .answers
                .iter()
                .find(|(needle, _)| image_url.contains(needle))
                .map(|(_, a)| *a)
                .unwrap_or(Ok(0.0));
            match answer {
                Ok(confidence) => Ok(Classification {
                    label: if confidence > 0.0 { "bird" } else { "not_bird" }.to_string(),
                    confidence,
                }),
                Err(status) => Err(ClassifierError::Status(status)),
            }
        }
    }

    pub(crate) fn image_post(cids: &[&str]) -> FeedPost {
        let images: Vec<_> = cids
            .iter()
            .map(|cid| serde_json::json!({ "alt": "", "image": { "ref": { "$link": cid } } }))
            .collect();
        serde_json::from_value(serde_json::json!({
            "text": "look at this",
            "embed": { "$type": "app.bsky.embed.images", "images": images }
        }))
        .unwrap()
    }

    async fn enricher(classifier: ScriptedClassifier) -> ContentEnricher<ScriptedClassifier> {
        ContentEnricher::new(
            classifier,
            test_repository().await,
            Arc::new(IngestMetrics::new()),
            &ClassifierConfig::from_file(&ClassifierFileConfig::default()),
        )
    }

    #[tokio::test]
    async fn reply_never_reaches_classifier() {
        let classifier = ScriptedClassifier::new(vec![("bafybird", Ok(0.99))]);
        let enricher = enricher(classifier.clone()).await;

        let mut post = image_post(&["bafybird"]);
        post.reply = Some(
            serde_json::from_value(serde_json::json!({
                "root": { "uri": "at://did:plc:x/app.bsky.feed.post/1", "cid": "c" },
                "parent": { "uri": "at://did:plc:x/app.bsky.feed.post/1", "cid": "c" }
            }))
            .unwrap(),
        );

        let outcome = enricher.enrich("did:plc:a", "r1", &post).await.unwrap();
        assert_eq!(outcome, EnrichOutcome::Ineligible);
        assert!(classifier.calls().is_empty());
    }

    #[tokio::test]
    async fn text_post_is_ineligible() {
        let classifier = ScriptedClassifier::default();
        let enricher = enricher(classifier.clone()).await;

        let post = FeedPost {
            text: "no pictures".to_string(),
            ..Default::default()
        };
        let outcome = enricher.enrich("did:plc:a", "r1", &post).await.unwrap();
        assert_eq!(outcome, EnrichOutcome::Ineligible);
        assert!(classifier.calls().is_empty());
    }

    #[tokio::test]
    async fn first_accepted_image_indexes_post() {
        let classifier =
            ScriptedClassifier::new(vec![("bafycat", Ok(0.0)), ("bafybird", Ok(0.92))]);
        let enricher = enricher(classifier.clone()).await;

        let post = image_post(&["bafycat", "bafybird", "bafylater"]);
        let outcome = enricher.enrich("did:plc:a", "r1", &post).await.unwrap();

        assert_eq!(outcome, EnrichOutcome::Indexed { confidence: 0.92 });
        assert_eq!(
            classifier.calls(),
            vec![
                "https://cdn.bsky.app/img/feed_fullsize/plain/did:plc:a/bafycat@jpeg",
                "https://cdn.bsky.app/img/feed_fullsize/plain/did:plc:a/bafybird@jpeg",
            ]
        );

        let stored = enricher.repo.get_post("r1").await.unwrap().unwrap();
        assert_eq!(stored.uri, "https://bsky.app/profile/did:plc:a/post/r1");
        assert_eq!(stored.confidence, 0.92);
        assert!(!stored.nsfw);
    }

    #[tokio::test]
    async fn threshold_is_strict() {
        let classifier = ScriptedClassifier::new(vec![("bafyedge", Ok(0.85))]);
        let enricher = enricher(classifier).await;

        let outcome = enricher
            .enrich("did:plc:a", "r1", &image_post(&["bafyedge"]))
            .await
            .unwrap();
        assert_eq!(outcome, EnrichOutcome::Rejected);
        assert!(enricher.repo.get_post("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn classifier_error_moves_to_next_image() {
        let classifier =
            ScriptedClassifier::new(vec![("bafydown", Err(503)), ("bafybird", Ok(0.9))]);
        let enricher = enricher(classifier.clone()).await;

        let outcome = enricher
            .enrich("did:plc:a", "r1", &image_post(&["bafydown", "bafybird"]))
            .await
            .unwrap();
        assert_eq!(outcome, EnrichOutcome::Indexed { confidence: 0.9 });
        assert_eq!(classifier.calls().len(), 2);
        assert_eq!(enricher.metrics.snapshot().enrichment.classifier_errors, 1);
    }

    #[tokio::test]
    async fn total_outage_drops_post() {
        let classifier = ScriptedClassifier::new(vec![("bafy", Err(500))]);
        let enricher = enricher(classifier).await;

        let outcome = enricher
            .enrich("did:plc:a", "r1", &image_post(&["bafy1", "bafy2"]))
            .await
            .unwrap();
        assert_eq!(outcome, EnrichOutcome::Rejected);
    }

    #[tokio::test]
    async fn image_without_cid_is_skipped() {
        let classifier = ScriptedClassifier::new(vec![("bafybird", Ok(0.9))]);
        let enricher = enricher(classifier.clone()).await;

        let post: FeedPost = serde_json::from_value(serde_json::json!({
            "text": "",
            "embed": {
                "$type": "app.bsky.embed.images",
                "images": [ { "image": { "mimeType": "image/jpeg" } } ]
            }
        }))
        .unwrap();
        let outcome = enricher.enrich("did:plc:a", "r1", &post).await.unwrap();
        assert_eq!(outcome, EnrichOutcome::Rejected);
        assert!(classifier.calls().is_empty());
    }

    #[tokio::test]
    async fn nsfw_self_label_is_stored() {
        let classifier = ScriptedClassifier::new(vec![("bafybird", Ok(0.9))]);
        let enricher = enricher(classifier).await;

        let mut post = image_post(&["bafybird"]);
        post.labels = Some(
            serde_json::from_value(serde_json::json!({ "values": [ { "val": "porn" } ] }))
                .unwrap(),
        );
        enricher.enrich("did:plc:a", "r1", &post).await.unwrap();

        assert!(enricher.repo.get_post("r1").await.unwrap().unwrap().nsfw);
    }

    #[tokio::test]
    async fn duplicate_post_is_treated_as_done() {
        let classifier = ScriptedClassifier::new(vec![("bafybird", Ok(0.9))]);
        let enricher = enricher(classifier).await;
        let post = image_post(&["bafybird"]);

        enricher.enrich("did:plc:a", "r1", &post).await.unwrap();
        let outcome = enricher.enrich("did:plc:a", "r1", &post).await.unwrap();

        assert_eq!(outcome, EnrichOutcome::Indexed { confidence: 0.9 });
        assert_eq!(enricher.repo.stats().await.unwrap().posts, 1);
        assert_eq!(enricher.metrics.snapshot().enrichment.indexed, 1);
    }
}
