//! Core data types shared by the resolver, extractor, formatter and dispatcher.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::site;

/// Opaque destination channel identifier (group id, webhook key, ...).
pub type ChannelId = String;

/// One monitored account. Immutable for the lifetime of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Numeric Weibo account id.
    pub id: String,
    /// Operator-facing label, only used in logs.
    pub display_name: String,
    pub channels: BTreeSet<ChannelId>,
}

impl Source {
    pub fn new<I, S>(id: &str, display_name: &str, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ChannelId>,
    {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}({})", self.display_name, self.id)
    }
}

/// Stable identifier of one post. Also the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentLocator(String);

impl ContentLocator {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Resolve a (possibly relative) permalink against the page it was found
    /// on. Query and fragment are dropped so the same post always yields the
    /// same locator.
    pub fn from_href(base: &str, href: &str) -> Option<Self> {
        let base = Url::parse(base).ok()?;
        let mut url = base.join(href.trim()).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        url.set_query(None);
        url.set_fragment(None);
        Some(Self(url.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Downloaded media payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// A media reference found in a post. `asset` is filled when the media was
/// downloaded during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
    pub asset: Option<MediaAsset>,
}

impl MediaRef {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            url: url.into(),
            asset: None,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Video,
            url: url.into(),
            asset: None,
        }
    }

    pub fn with_asset(mut self, asset: MediaAsset) -> Self {
        self.asset = Some(asset);
        self
    }
}

/// Structured content of one post. Empty text and no media is a valid result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPost {
    pub locator: ContentLocator,
    pub author: String,
    pub text: String,
    /// Images first (document order), then at most one video.
    pub media: Vec<MediaRef>,
    /// PNG of the post container.
    pub snapshot: Option<Vec<u8>>,
}

impl ExtractedPost {
    pub fn image_count(&self) -> usize {
        self.media
            .iter()
            .filter(|m| m.kind == MediaKind::Image)
            .count()
    }

    pub fn video_count(&self) -> usize {
        self.media
            .iter()
            .filter(|m| m.kind == MediaKind::Video)
            .count()
    }
}

fn default_true() -> bool {
    true
}

/// Per-path formatting and delivery switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    #[serde(default)]
    pub show_link: bool,
    #[serde(default = "default_true")]
    pub show_snapshot: bool,
    #[serde(default = "default_true")]
    pub send_text: bool,
    #[serde(default = "default_true")]
    pub send_media: bool,
    #[serde(default, alias = "forward")]
    pub forward_mode: bool,
    #[serde(default, alias = "split")]
    pub split_mode: bool,
}

impl DeliveryPolicy {
    /// Defaults for links pasted into a chat: no link echo.
    pub fn manual() -> Self {
        Self {
            show_link: false,
            show_snapshot: true,
            send_text: true,
            send_media: true,
            forward_mode: false,
            split_mode: false,
        }
    }

    /// Defaults for subscription pushes: link on top.
    pub fn subscription() -> Self {
        Self {
            show_link: true,
            ..Self::manual()
        }
    }

    /// Nothing enabled; composes to an empty message.
    pub fn silent() -> Self {
        Self {
            show_link: false,
            show_snapshot: false,
            send_text: false,
            send_media: false,
            forward_mode: false,
            split_mode: false,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        DeliveryMode {
            forward: self.forward_mode,
            split: self.split_mode,
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::manual()
    }
}

/// How a composed message is handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryMode {
    pub forward: bool,
    pub split: bool,
}

impl DeliveryMode {
    pub fn forced_split(self) -> Self {
        Self {
            split: true,
            ..self
        }
    }
}

/// Where a media block's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Bytes {
        data: Vec<u8>,
        content_type: Option<String>,
    },
    Url(String),
}

impl MediaSource {
    pub fn png(data: Vec<u8>) -> Self {
        MediaSource::Bytes {
            data,
            content_type: Some("image/png".to_string()),
        }
    }
}

/// One renderable unit of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text(String),
    Image(MediaSource),
    Video(MediaSource),
}

impl Block {
    pub fn is_text(&self) -> bool {
        matches!(self, Block::Text(_))
    }
}

/// Output of the formatter; built once and reused for every channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComposedMessage {
    pub text: Option<Block>,
    pub media: Vec<Block>,
}

impl ComposedMessage {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.media.is_empty()
    }

    /// Text first, then media in order.
    pub fn blocks(&self) -> Vec<Block> {
        self.text
            .iter()
            .chain(self.media.iter())
            .cloned()
            .collect()
    }
}

/// Persisted dedup row: last dispatched locator per source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub source_id: String,
    pub last_content_id: ContentLocator,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Opaque login blob applied as cookies to every rendering session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    cookies: Vec<Cookie>,
}

impl Credential {
    /// Parse `a=1; b=2=3` style cookie strings. Values keep any `=` after the
    /// first one; entries without a name are skipped.
    pub fn parse(raw: &str) -> Self {
        let cookies = raw
            .split(';')
            .filter_map(|pair| {
                let pair = pair.trim();
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(Cookie {
                    name: name.to_string(),
                    value: value.to_string(),
                    domain: site::COOKIE_DOMAIN.to_string(),
                    path: "/".to_string(),
                })
            })
            .collect();
        Self { cookies }
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}
