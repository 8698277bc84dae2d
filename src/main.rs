//! Weibo relay service entrypoint.
//! Boots the axum HTTP server and the subscription monitor; both stop
//! gracefully on SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use weibo_relay::api::{self, AppState};
use weibo_relay::config::RelayConfig;
use weibo_relay::manual::{ManualTrigger, RegexMatcher};
use weibo_relay::metrics::Metrics;
use weibo_relay::monitor::Monitor;
use weibo_relay::service::RelayService;
use weibo_relay::store::JsonFileStore;

/// Compact tracing logs; `RUST_LOG` overrides the default filter.
fn init_tracing(log_details: bool) {
    let default = if log_details {
        "weibo_relay=debug,warn"
    } else {
        "weibo_relay=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // The hosting runtime may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn relay() -> Result<RelayService, shuttle_runtime::Error> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    let cfg = RelayConfig::load_default().context("loading relay config")?;
    init_tracing(cfg.log_details);

    let sources = cfg.sources();
    let metrics = Metrics::init(sources.len())?;

    let pipeline = Arc::new(cfg.build_pipeline());
    let manual = Arc::new(ManualTrigger::new(
        pipeline.clone(),
        Arc::new(RegexMatcher::default()),
        cfg.manual,
    ));

    let settings = cfg.monitor_settings();
    let store = Arc::new(JsonFileStore::new(&cfg.storage.state_path));
    let monitor = Monitor::new(pipeline, store, sources, settings.clone());

    let handle = if settings.enabled {
        Some(monitor.clone().spawn())
    } else {
        warn!("subscriptions disabled, monitor not started");
        None
    };

    let state = AppState {
        manual,
        monitor: Some(monitor),
        admin_token: cfg.admin.token.clone(),
    };
    let router = api::router(state).merge(metrics.router());

    info!(state_path = %cfg.storage.state_path.display(), "weibo relay ready");
    Ok(RelayService::new(router, handle))
}
