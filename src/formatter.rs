//! Pure transform from an extracted post and a policy to a chat message.

use crate::extractor::UNKNOWN_AUTHOR;
use crate::model::{Block, ComposedMessage, DeliveryPolicy, ExtractedPost, MediaKind, MediaSource};

/// Prefix of the body line.
pub const BODY_MARKER: &str = "💡 ";

pub fn compose(post: &ExtractedPost, policy: &DeliveryPolicy) -> ComposedMessage {
    let mut text = String::new();
    if policy.show_link {
        text.push_str(post.locator.as_str());
        text.push_str("\n\n");
    }
    if policy.send_text {
        let author = post.author.trim();
        if !author.is_empty() && author != UNKNOWN_AUTHOR {
            text.push_str(&format!("author: {author}\n\n"));
        }
        if !post.text.is_empty() {
            text.push_str(BODY_MARKER);
            text.push_str(&post.text);
        }
    }

    let trimmed = text.trim();
    let text = (!trimmed.is_empty()).then(|| Block::Text(trimmed.to_string()));

    let mut media = Vec::new();
    if policy.show_snapshot {
        if let Some(png) = &post.snapshot {
            media.push(Block::Image(MediaSource::png(png.clone())));
        }
    }
    if policy.send_media {
        media.extend(post.media.iter().map(|m| {
            let source = match &m.asset {
                Some(asset) => MediaSource::Bytes {
                    data: asset.data.clone(),
                    content_type: asset.content_type.clone(),
                },
                None => MediaSource::Url(m.url.clone()),
            };
            match m.kind {
                MediaKind::Image => Block::Image(source),
                MediaKind::Video => Block::Video(source),
            }
        }));
    }

    ComposedMessage { text, media }
}
