// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod error;
pub mod model;
pub mod site;
pub mod steps;

// Collaborators: page rendering, media download, chat transport, dedup state
pub mod media;
pub mod render;
pub mod store;
pub mod transport;

// Pipeline stages
pub mod dispatcher;
pub mod extractor;
pub mod formatter;
pub mod pipeline;
pub mod resolver;

// Entry paths
pub mod manual;
pub mod monitor;

pub mod api;
pub mod config;
pub mod metrics;
pub mod service;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{RelayError, Result};
pub use crate::manual::{ManualOutcome, ManualTrigger};
pub use crate::model::{ComposedMessage, ContentLocator, DeliveryPolicy, Source};
pub use crate::monitor::{CycleReport, ForcePushSummary, Monitor, SourceOutcome};
pub use crate::pipeline::Pipeline;
