//! Hands a composed message to the transport in forward, split or combined
//! mode.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::model::{ComposedMessage, DeliveryMode};
use crate::transport::{Outbound, Transport, TransportError};

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    pacing: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pacing: Duration::from_millis(500),
        }
    }

    /// Delay between consecutive sends to one channel in split mode.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Returns `Ok(false)` without touching the transport when the message is
    /// empty.
    pub async fn deliver(
        &self,
        message: &ComposedMessage,
        channel: &str,
        mode: DeliveryMode,
    ) -> Result<bool> {
        if message.is_empty() {
            return Ok(false);
        }

        let sent = if mode.forward && self.transport.supports_forwarding() {
            self.send(channel, Outbound::Forward(message.blocks())).await
        } else if mode.split {
            self.send_split(message, channel).await
        } else {
            self.send(channel, Outbound::Blocks(message.blocks())).await
        };

        sent.map_err(|source| {
            counter!("relay_delivery_failures_total").increment(1);
            RelayError::Delivery {
                channel: channel.to_string(),
                source,
            }
        })?;
        counter!("relay_deliveries_total").increment(1);
        Ok(true)
    }

    async fn send_split(
        &self,
        message: &ComposedMessage,
        channel: &str,
    ) -> std::result::Result<(), TransportError> {
        for (i, block) in message.blocks().into_iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            self.transport.send(channel, Outbound::Block(block)).await?;
        }
        Ok(())
    }

    async fn send(&self, channel: &str, outbound: Outbound) -> std::result::Result<(), TransportError> {
        debug!(channel, blocks = outbound.blocks().len(), transport = self.transport.name(), "sending");
        self.transport.send(channel, outbound).await.map(|_| ())
    }
}
