use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::{DeliveryHandle, Outbound, Transport, TransportError};
use crate::model::{Block, MediaSource};

/// Discord rejects message content above this many characters.
const MAX_CONTENT_CHARS: usize = 2000;
/// Attachments allowed on one webhook message.
const MAX_FILES: usize = 10;
/// Upper bound on send attempts; keeps the backoff under about a minute.
pub const MAX_RETRIES: u8 = 8;

/// Delivers to Discord through incoming webhooks; each channel id maps to
/// one webhook URL.
#[derive(Clone)]
pub struct DiscordTransport {
    webhooks: HashMap<String, String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct WebhookPayload {
    content: String,
}

#[derive(Deserialize)]
struct WebhookMessage {
    id: String,
}

struct Attachment {
    data: Vec<u8>,
    content_type: Option<String>,
    file_name: String,
}

impl DiscordTransport {
    pub fn new(webhooks: HashMap<String, String>) -> Self {
        Self {
            webhooks,
            client: Client::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.clamp(1, MAX_RETRIES);
        self
    }

    fn webhook(&self, channel: &str) -> Result<&str, TransportError> {
        self.webhooks
            .get(channel)
            .map(String::as_str)
            .ok_or_else(|| TransportError::UnknownChannel(channel.to_string()))
    }

    /// Send with bounded retries and exponential backoff; `build` is called
    /// per attempt because multipart bodies cannot be replayed.
    async fn post_with_retry<F>(&self, build: F) -> Result<String, TransportError>
    where
        F: Fn() -> Result<RequestBuilder, TransportError> + Send + Sync,
    {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = build()?.timeout(self.timeout).send().await;

            let err = match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        let msg: WebhookMessage = rsp.json().await?;
                        return Ok(msg.id);
                    }
                    let message = rsp.text().await.unwrap_or_default();
                    // 4xx other than rate limiting will not get better on retry.
                    if status.is_client_error() && status.as_u16() != 429 {
                        return Err(TransportError::Rejected {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    TransportError::Rejected {
                        status: status.as_u16(),
                        message,
                    }
                }
                Err(e) => TransportError::from(e),
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            tracing::debug!(attempt, error = %err, "discord webhook send failed, retrying");
            tokio::time::sleep(backoff(attempt)).await;
        }
    }

    async fn post_text(&self, webhook: &str, content: String) -> Result<String, TransportError> {
        let url = format!("{webhook}?wait=true");
        let payload = WebhookPayload { content };
        self.post_with_retry(|| Ok(self.client.post(&url).json(&payload)))
            .await
    }

    async fn post_files(
        &self,
        webhook: &str,
        content: Option<String>,
        files: &[Attachment],
    ) -> Result<String, TransportError> {
        let url = format!("{webhook}?wait=true");
        let payload_json = serde_json::to_string(&WebhookPayload {
            content: content.unwrap_or_default(),
        })
        .map_err(|e| TransportError::Network(e.to_string()))?;

        self.post_with_retry(|| {
            let mut form = Form::new().text("payload_json", payload_json.clone());
            for (i, file) in files.iter().enumerate() {
                let mut part = Part::bytes(file.data.clone()).file_name(file.file_name.clone());
                if let Some(ct) = &file.content_type {
                    part = part.mime_str(ct)?;
                }
                form = form.part(format!("files[{i}]"), part);
            }
            Ok(self.client.post(&url).multipart(form))
        })
        .await
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn send(&self, channel: &str, message: Outbound) -> Result<DeliveryHandle, TransportError> {
        let webhook = self.webhook(channel)?;
        let (text, files) = split_blocks(message.blocks());

        let mut chunks = chunk_text(&text, MAX_CONTENT_CHARS);
        let mut ids = Vec::new();

        // All text chunks but the last go out alone; the last one rides
        // along with the first batch of attachments.
        let tail = if files.is_empty() { None } else { chunks.pop() };
        for chunk in chunks {
            ids.push(self.post_text(webhook, chunk).await?);
        }
        for (i, batch) in files.chunks(MAX_FILES).enumerate() {
            let content = if i == 0 { tail.clone() } else { None };
            ids.push(self.post_files(webhook, content, batch).await?);
        }

        if ids.is_empty() {
            return Err(TransportError::Rejected {
                status: 400,
                message: "empty message".to_string(),
            });
        }
        Ok(DeliveryHandle(ids.join(",")))
    }

    async fn delete(&self, channel: &str, handle: &DeliveryHandle) -> Result<(), TransportError> {
        let webhook = self.webhook(channel)?;
        for id in handle.0.split(',').filter(|id| !id.is_empty()) {
            let rsp = self
                .client
                .delete(format!("{webhook}/messages/{id}"))
                .timeout(self.timeout)
                .send()
                .await?;
            let status = rsp.status();
            if !status.is_success() && status.as_u16() != 404 {
                return Err(TransportError::Rejected {
                    status: status.as_u16(),
                    message: rsp.text().await.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

/// Text blocks (and media only known by URL) become message content; media
/// bytes become attachments.
fn split_blocks(blocks: &[Block]) -> (String, Vec<Attachment>) {
    let mut lines = Vec::new();
    let mut files = Vec::new();
    for block in blocks {
        match block {
            Block::Text(t) => lines.push(t.clone()),
            Block::Image(MediaSource::Url(u)) | Block::Video(MediaSource::Url(u)) => {
                lines.push(u.clone())
            }
            Block::Image(MediaSource::Bytes { data, content_type })
            | Block::Video(MediaSource::Bytes { data, content_type }) => {
                let is_video = matches!(block, Block::Video(_));
                let ext = extension(content_type.as_deref(), is_video);
                files.push(Attachment {
                    data: data.clone(),
                    content_type: content_type.clone(),
                    file_name: format!("media-{}.{ext}", files.len()),
                });
            }
        }
    }
    (lines.join("\n\n"), files)
}

fn extension(content_type: Option<&str>, is_video: bool) -> &'static str {
    match content_type.map(|c| c.split(';').next().unwrap_or(c).trim()) {
        Some("image/png") => "png",
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("video/mp4") => "mp4",
        Some("video/quicktime") => "mov",
        _ if is_video => "mp4",
        _ => "jpg",
    }
}

/// Split on character boundaries into pieces of at most `max` chars.
fn chunk_text(text: &str, max: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// Delay after failed attempt `n` (1-based): 500ms doubled per attempt.
fn backoff(attempt: u8) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_RETRIES - 1);
    Duration::from_millis(500u64 << shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_char_boundaries() {
        let s = "微".repeat(4500);
        let chunks = chunk_text(&s, MAX_CONTENT_CHARS);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 2000);
        assert_eq!(chunks[2].chars().count(), 500);
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn blocks_split_into_content_and_files() {
        let blocks = vec![
            Block::Text("hello".into()),
            Block::Image(MediaSource::png(vec![1])),
            Block::Video(MediaSource::Bytes {
                data: vec![2],
                content_type: Some("video/mp4; codecs=avc1".into()),
            }),
            Block::Image(MediaSource::Url("https://i/x.jpg".into())),
        ];
        let (text, files) = split_blocks(&blocks);
        assert_eq!(text, "hello\n\nhttps://i/x.jpg");
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["media-0.png", "media-1.mp4"]);
    }

    #[test]
    fn retries_and_backoff_are_bounded() {
        let t = DiscordTransport::new(HashMap::new()).with_retries(255);
        assert_eq!(t.max_retries, MAX_RETRIES);
        assert_eq!(DiscordTransport::new(HashMap::new()).with_retries(0).max_retries, 1);

        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(3), Duration::from_secs(2));
        assert_eq!(backoff(255), Duration::from_millis(500 << 7));
    }
}
