//! Ad-hoc parsing of post links pasted into a chat. Replies go to the
//! originating channel only and never touch dedup state.

use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::model::{ContentLocator, DeliveryPolicy};
use crate::pipeline::Pipeline;
use crate::site;
use crate::transport::Outbound;

pub const STATUS_PARSING: &str = "Parsing Weibo link, please wait...";
pub const NOTHING_FOUND: &str = "No content could be extracted from this post.";
pub const PARSE_FAILED: &str =
    "Could not parse this Weibo post. The link may be expired or a valid cookie may be required.";
pub const FETCH_FAILED: &str = "Could not reach Weibo right now, please try again later.";

/// Finds a post locator in free-form chat text.
pub trait LocatorMatcher: Send + Sync {
    fn find(&self, text: &str) -> Option<ContentLocator>;
}

pub struct RegexMatcher {
    pattern: Regex,
}

impl RegexMatcher {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl Default for RegexMatcher {
    fn default() -> Self {
        Self::new(site::POST_URL.clone())
    }
}

impl LocatorMatcher for RegexMatcher {
    fn find(&self, text: &str) -> Option<ContentLocator> {
        self.pattern
            .find(text)
            .map(|m| ContentLocator::new(m.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualOutcome {
    Delivered,
    /// Post parsed but nothing to show; the requester got [`NOTHING_FOUND`].
    NothingFound,
    /// The requester got a failure notice.
    Failed { reason: String },
}

pub struct ManualTrigger {
    pipeline: Arc<Pipeline>,
    matcher: Arc<dyn LocatorMatcher>,
    policy: DeliveryPolicy,
}

impl ManualTrigger {
    pub fn new(
        pipeline: Arc<Pipeline>,
        matcher: Arc<dyn LocatorMatcher>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            pipeline,
            matcher,
            policy,
        }
    }

    /// `None` when the text holds no post link (the message is not ours).
    pub async fn handle_inbound(&self, channel: &str, text: &str) -> Option<ManualOutcome> {
        let locator = self.matcher.find(text)?;
        Some(self.parse_and_reply(channel, &locator).await)
    }

    /// Parse one post and answer in `channel`. Always leaves the requester
    /// with either the content or a notice.
    pub async fn parse_and_reply(&self, channel: &str, locator: &ContentLocator) -> ManualOutcome {
        info!(channel, %locator, "manual parse requested");
        let transport = self.pipeline.dispatcher().transport().clone();

        let status = match transport.send(channel, Outbound::text(STATUS_PARSING)).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(channel, error = %e, "could not post status message");
                None
            }
        };

        let outcome = self.run(channel, locator).await;

        if let Some(handle) = status {
            if let Err(e) = transport.delete(channel, &handle).await {
                tracing::debug!(channel, error = %e, "status message cleanup failed");
            }
        }
        outcome
    }

    async fn run(&self, channel: &str, locator: &ContentLocator) -> ManualOutcome {
        let message = match self.pipeline.prepare(locator, &self.policy).await {
            Ok(m) => m,
            Err(e) => {
                warn!(channel, %locator, error = %e, kind = e.kind(), "manual parse failed");
                let notice = match e {
                    RelayError::Fetch { .. } => FETCH_FAILED,
                    _ => PARSE_FAILED,
                };
                self.notify(channel, notice).await;
                return ManualOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if message.is_empty() {
            self.notify(channel, NOTHING_FOUND).await;
            return ManualOutcome::NothingFound;
        }

        match self
            .pipeline
            .dispatcher()
            .deliver(&message, channel, self.policy.mode())
            .await
        {
            Ok(_) => ManualOutcome::Delivered,
            Err(e) => {
                warn!(channel, %locator, error = %e, "manual delivery failed");
                self.notify(channel, PARSE_FAILED).await;
                ManualOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn notify(&self, channel: &str, text: &str) {
        let transport = self.pipeline.dispatcher().transport();
        if let Err(e) = transport.send(channel, Outbound::text(text)).await {
            warn!(channel, error = %e, "could not send notice");
        }
    }
}
