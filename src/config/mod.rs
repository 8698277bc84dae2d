// src/config/mod.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::extractor::ContentExtractor;
use crate::media::MediaResolver;
use crate::model::{Credential, DeliveryPolicy, Source};
use crate::monitor::MonitorSettings;
use crate::pipeline::Pipeline;
use crate::render::{BrowserlessRenderer, Timeouts};
use crate::resolver::LatestResolver;
use crate::transport::discord::{DiscordTransport, MAX_RETRIES};

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";

/// Secrets set to this value are read from the environment.
const FROM_ENV: &str = "ENV";

fn default_interval_minutes() -> u64 {
    30
}
fn default_concurrency() -> usize {
    1
}
fn default_source_pacing_secs() -> u64 {
    5
}
fn default_send_pacing_ms() -> u64 {
    500
}
fn default_navigation_secs() -> u64 {
    30
}
fn default_selector_secs() -> u64 {
    20
}
fn default_max_sessions() -> usize {
    2
}
fn default_browserless_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_media_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u8 {
    3
}
fn default_state_path() -> PathBuf {
    PathBuf::from("state/subscriptions.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Weibo cookie string; `"ENV"` reads `WEIBO_COOKIE`.
    #[serde(default)]
    pub cookie: String,
    /// Numbered step logs for every parse/check.
    #[serde(default)]
    pub log_details: bool,
    #[serde(default = "DeliveryPolicy::manual")]
    pub manual: DeliveryPolicy,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_source_pacing_secs")]
    pub source_pacing_secs: u64,
    #[serde(flatten)]
    pub policy: SubscriptionPolicy,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_interval_minutes(),
            concurrency: default_concurrency(),
            source_pacing_secs: default_source_pacing_secs(),
            policy: SubscriptionPolicy::default(),
            sources: Vec::new(),
        }
    }
}

/// Subscription policy fields live directly in `[subscription]`; only
/// `show_link` defaults differently from the manual policy.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SubscriptionPolicy {
    #[serde(default = "default_true")]
    pub show_link: bool,
    #[serde(default = "default_true")]
    pub show_snapshot: bool,
    #[serde(default = "default_true")]
    pub send_text: bool,
    #[serde(default = "default_true")]
    pub send_media: bool,
    #[serde(default)]
    pub forward: bool,
    #[serde(default)]
    pub split: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionPolicy {
    fn default() -> Self {
        let p = DeliveryPolicy::subscription();
        Self {
            show_link: p.show_link,
            show_snapshot: p.show_snapshot,
            send_text: p.send_text,
            send_media: p.send_media,
            forward: p.forward_mode,
            split: p.split_mode,
        }
    }
}

impl From<SubscriptionPolicy> for DeliveryPolicy {
    fn from(p: SubscriptionPolicy) -> Self {
        DeliveryPolicy {
            show_link: p.show_link,
            show_snapshot: p.show_snapshot,
            send_text: p.send_text,
            send_media: p.send_media,
            forward_mode: p.forward,
            split_mode: p.split,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "channel_ids")]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_send_pacing_ms")]
    pub send_pacing_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_pacing_ms: default_send_pacing_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_browserless_url")]
    pub browserless_url: String,
    /// `"ENV"` reads `BROWSERLESS_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_navigation_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_selector_secs")]
    pub selector_timeout_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            browserless_url: default_browserless_url(),
            token: None,
            navigation_timeout_secs: default_navigation_secs(),
            selector_timeout_secs: default_selector_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_media_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_media_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Channel id -> Discord webhook URL.
    #[serde(default)]
    pub webhooks: HashMap<String, String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            webhooks: HashMap::new(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for the force-push command; `"ENV"` reads
    /// `RELAY_ADMIN_TOKEN`. Without a token the command is refused.
    #[serde(default)]
    pub token: Option<String>,
}

impl RelayConfig {
    /// `$RELAY_CONFIG_PATH` if set (must exist), else `config/relay.toml`.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading relay config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: RelayConfig = toml::from_str(s)?;

        cfg.cookie = resolve_secret(&cfg.cookie, "WEIBO_COOKIE")?;
        cfg.render.token = cfg
            .render
            .token
            .map(|t| resolve_secret(&t, "BROWSERLESS_TOKEN"))
            .transpose()?
            .filter(|t| !t.is_empty());
        cfg.admin.token = cfg
            .admin
            .token
            .map(|t| resolve_secret(&t, "RELAY_ADMIN_TOKEN"))
            .transpose()?
            .filter(|t| !t.is_empty());

        // Sanitize
        let sub = &mut cfg.subscription;
        sub.interval_minutes = sub.interval_minutes.max(1);
        sub.concurrency = sub.concurrency.max(1);
        cfg.render.max_sessions = cfg.render.max_sessions.max(1);
        cfg.transport.max_retries = cfg.transport.max_retries.clamp(1, MAX_RETRIES);

        Ok(cfg)
    }

    pub fn credential(&self) -> Credential {
        Credential::parse(&self.cookie)
    }

    pub fn subscription_policy(&self) -> DeliveryPolicy {
        self.subscription.policy.into()
    }

    /// Configured sources with a uid and at least one channel.
    pub fn sources(&self) -> Vec<Source> {
        self.subscription
            .sources
            .iter()
            .filter_map(|e| {
                let uid = e.uid.trim();
                let channels: BTreeSet<String> = e
                    .channels
                    .iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if uid.is_empty() || channels.is_empty() {
                    return None;
                }
                let name = if e.name.trim().is_empty() { uid } else { e.name.trim() };
                Some(Source::new(uid, name, channels))
            })
            .collect()
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            navigation: Duration::from_secs(self.render.navigation_timeout_secs),
            selector: Duration::from_secs(self.render.selector_timeout_secs),
        }
    }

    pub fn send_pacing(&self) -> Duration {
        Duration::from_millis(self.delivery.send_pacing_ms)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            enabled: self.subscription.enabled,
            interval: Duration::from_secs(self.subscription.interval_minutes * 60),
            concurrency: self.subscription.concurrency,
            source_pacing: Duration::from_secs(self.subscription.source_pacing_secs),
            policy: self.subscription_policy(),
            verbose: self.log_details,
        }
    }

    /// Wire the Browserless renderer, media resolver and Discord transport
    /// into one pipeline.
    pub fn build_pipeline(&self) -> Pipeline {
        let renderer = Arc::new(BrowserlessRenderer::with_max_sessions(
            &self.render.browserless_url,
            self.render.token.as_deref(),
            self.render.max_sessions,
        ));
        let media = Arc::new(MediaResolver::new().with_timeout(self.media.timeout_secs));
        let transport = Arc::new(
            DiscordTransport::new(self.transport.webhooks.clone())
                .with_retries(self.transport.max_retries),
        );

        let credential = self.credential();
        let timeouts = self.timeouts();
        let resolver = LatestResolver::new(renderer.clone(), credential.clone(), timeouts)
            .verbose(self.log_details);
        let extractor = ContentExtractor::new(renderer, media, credential, timeouts)
            .verbose(self.log_details);
        let dispatcher = Dispatcher::new(transport).with_pacing(self.send_pacing());

        Pipeline::new(resolver, extractor, dispatcher)
    }
}

fn resolve_secret(raw: &str, var: &str) -> Result<String> {
    if raw.trim().eq_ignore_ascii_case(FROM_ENV) {
        return env::var(var).map_err(|_| anyhow!("Missing {var} env var"));
    }
    Ok(raw.trim().to_string())
}
