//! Message transport ("bot") collaborator.

pub mod discord;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Block;

pub use discord::DiscordTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown channel {0}")]
    UnknownChannel(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("transport rejected message (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// Transport-side id of a sent message, used to delete it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(pub String);

/// What a single transport call carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Block(Block),
    /// Several blocks rendered as one message.
    Blocks(Vec<Block>),
    /// One aggregated/forwarded envelope; only sent when
    /// [`Transport::supports_forwarding`] is true.
    Forward(Vec<Block>),
}

impl Outbound {
    pub fn text(s: impl Into<String>) -> Self {
        Outbound::Block(Block::Text(s.into()))
    }

    pub fn blocks(&self) -> &[Block] {
        match self {
            Outbound::Block(b) => std::slice::from_ref(b),
            Outbound::Blocks(v) | Outbound::Forward(v) => v,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, channel: &str, message: Outbound) -> Result<DeliveryHandle, TransportError>;

    async fn delete(&self, channel: &str, handle: &DeliveryHandle) -> Result<(), TransportError>;

    fn supports_forwarding(&self) -> bool {
        false
    }

    /// Whether the bot is connected and able to send.
    fn is_online(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}
