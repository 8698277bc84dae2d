//! Steps shared by scheduled, forced and manual runs: resolve, extract +
//! format once, then fan out to channels.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::extractor::{ContentExtractor, ExtractOptions};
use crate::formatter;
use crate::model::{ChannelId, ComposedMessage, ContentLocator, DeliveryMode, DeliveryPolicy};
use crate::resolver::LatestResolver;

pub struct Pipeline {
    resolver: LatestResolver,
    extractor: ContentExtractor,
    dispatcher: Dispatcher,
}

/// Per-channel result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: Vec<ChannelId>,
    /// Channels where nothing was sent because the message was empty.
    pub empty: Vec<ChannelId>,
    pub failed: Vec<(ChannelId, String)>,
}

impl FanOutReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Pipeline {
    pub fn new(resolver: LatestResolver, extractor: ContentExtractor, dispatcher: Dispatcher) -> Self {
        Self {
            resolver,
            extractor,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn resolve_latest(&self, uid: &str) -> Result<Option<ContentLocator>> {
        self.resolver.resolve_latest(uid).await
    }

    /// Extract the post and compose it once for all destinations.
    pub async fn prepare(
        &self,
        locator: &ContentLocator,
        policy: &DeliveryPolicy,
    ) -> Result<ComposedMessage> {
        let options = ExtractOptions {
            want_snapshot: policy.show_snapshot,
            want_media: policy.send_media,
        };
        let post = self.extractor.extract(locator, options).await?;
        Ok(formatter::compose(&post, policy))
    }

    /// Deliver to every channel; a failing channel does not stop the rest.
    pub async fn fan_out(
        &self,
        message: &ComposedMessage,
        channels: &BTreeSet<ChannelId>,
        mode: DeliveryMode,
    ) -> FanOutReport {
        let mut report = FanOutReport::default();
        let pacing = self.dispatcher.pacing();

        for (i, channel) in channels.iter().enumerate() {
            if i > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
            match self.dispatcher.deliver(message, channel, mode).await {
                Ok(true) => report.delivered.push(channel.clone()),
                Ok(false) => report.empty.push(channel.clone()),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "delivery failed");
                    report.failed.push((channel.clone(), e.to_string()));
                }
            }
        }

        info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            empty = report.empty.len(),
            "fan-out finished"
        );
        report
    }
}
