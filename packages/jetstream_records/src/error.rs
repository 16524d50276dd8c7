#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("commit for {collection} carries no record")]
    MissingRecord { collection: String },

    #[error("failed to decode {collection} record: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid at-uri: {0}")]
    InvalidAtUri(String),
}
