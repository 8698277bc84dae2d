use thiserror::Error;

use crate::model::ChannelId;
use crate::render::RenderError;
use crate::store::StoreError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Failures of one pipeline run (one source or one pasted link).
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network failure or timeout while reaching a page or asset.
    #[error("fetch failed for {target}: {reason}")]
    Fetch { target: String, reason: String },

    /// Page loaded but the expected structure never appeared (layout change,
    /// login wall, deleted post).
    #[error("expected content `{selector}` missing on {locator}")]
    ContentMissing { locator: String, selector: String },

    #[error("delivery to channel {channel} failed: {source}")]
    Delivery {
        channel: ChannelId,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelayError {
    pub fn fetch(target: impl Into<String>, reason: impl ToString) -> Self {
        RelayError::Fetch {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Map a rendering failure while waiting for `selector` on `locator`.
    pub(crate) fn from_render(locator: &str, selector: &str, err: RenderError) -> Self {
        match err {
            RenderError::Timeout { .. } | RenderError::NoMatch(_) => RelayError::ContentMissing {
                locator: locator.to_string(),
                selector: selector.to_string(),
            },
            other => RelayError::fetch(locator, other),
        }
    }

    /// Short machine-readable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Fetch { .. } => "fetch",
            RelayError::ContentMissing { .. } => "content_missing",
            RelayError::Delivery { .. } => "delivery",
            RelayError::Store(_) => "store",
        }
    }
}
