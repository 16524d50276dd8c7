use serde::{Deserialize, Serialize};

/// Self-label values that mark a post as adult content.
pub const NSFW_SELF_LABELS: [&str; 4] = ["porn", "sexual", "nudity", "graphic-media"];

/// `app.bsky.feed.post`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    #[serde(default)]
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<SelfLabels>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

/// `com.atproto.repo.strongRef`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
}

/// Post embeds, discriminated by `$type`. Only image-bearing kinds are modelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.images")]
    Images(ImagesEmbed),

    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia(RecordWithMediaEmbed),

    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesEmbed {
    #[serde(default)]
    pub images: Vec<EmbedImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordWithMediaEmbed {
    pub media: Box<Embed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedImage {
    pub image: BlobRef,
    #[serde(default)]
    pub alt: String,
}

/// A blob reference in either the current (`ref.$link`) or legacy (`cid`) shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub link: Option<CidLink>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

impl BlobRef {
    pub fn cid(&self) -> Option<&str> {
        self.link
            .as_ref()
            .map(|l| l.link.as_str())
            .or(self.cid.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// `com.atproto.label.defs#selfLabels`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfLabels {
    #[serde(default)]
    pub values: Vec<SelfLabel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfLabel {
    pub val: String,
}

/// `app.bsky.feed.like`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedLike {
    pub subject: StrongRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// `app.bsky.feed.repost`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRepost {
    pub subject: StrongRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl FeedPost {
    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Images attached directly or as the media half of a record-with-media embed.
    pub fn images(&self) -> &[EmbedImage] {
        match &self.embed {
            Some(embed) => embed.images(),
            None => &[],
        }
    }

    pub fn has_nsfw_self_label(&self) -> bool {
        self.labels.as_ref().is_some_and(|labels| {
            labels
                .values
                .iter()
                .any(|l| NSFW_SELF_LABELS.contains(&l.val.as_str()))
        })
    }
}

impl Embed {
    pub fn images(&self) -> &[EmbedImage] {
        match self {
            Embed::Images(embed) => &embed.images,
            Embed::RecordWithMedia(embed) => embed.media.images(),
            Embed::Other => &[],
        }
    }
}
