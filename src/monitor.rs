//! Subscription monitor: periodic check-and-push per source with dedup, and
//! the operator's forced push.
//!
//! Per source and cycle: `Resolving -> NoUpdate | Extracting -> Formatting
//! -> Dispatching -> Updated`, or `Failed`. One source failing never stops
//! the others; the dedup record moves forward once extraction succeeded,
//! even if some channels failed.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::model::{ContentLocator, DeliveryPolicy, Source};
use crate::pipeline::Pipeline;
use crate::steps::Steps;
use crate::store::DedupStore;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_cycles_total", "Scheduled check cycles run.");
        describe_counter!(
            "relay_source_outcomes_total",
            "Per-source cycle outcomes, labelled by outcome."
        );
        describe_counter!("relay_deliveries_total", "Successful channel deliveries.");
        describe_counter!("relay_delivery_failures_total", "Failed channel deliveries.");
        describe_counter!(
            "relay_media_failures_total",
            "Media assets dropped because the download failed."
        );
        describe_gauge!("relay_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub enabled: bool,
    pub interval: Duration,
    /// Sources processed at once within a cycle.
    pub concurrency: usize,
    /// Delay before starting the next source.
    pub source_pacing: Duration,
    pub policy: DeliveryPolicy,
    pub verbose: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30 * 60),
            concurrency: 1,
            source_pacing: Duration::from_secs(5),
            policy: DeliveryPolicy::subscription(),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    NoUpdate,
    Updated {
        locator: ContentLocator,
        delivered: usize,
        failed_channels: Vec<String>,
    },
    Failed {
        reason: String,
    },
    /// A previous check of this source was still running.
    Skipped,
}

impl SourceOutcome {
    fn label(&self) -> &'static str {
        match self {
            SourceOutcome::NoUpdate => "no_update",
            SourceOutcome::Updated { .. } => "updated",
            SourceOutcome::Failed { .. } => "failed",
            SourceOutcome::Skipped => "skipped",
        }
    }

    fn failed(err: &RelayError) -> Self {
        SourceOutcome::Failed {
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub outcomes: Vec<(String, SourceOutcome)>,
}

impl CycleReport {
    pub fn outcome(&self, source_id: &str) -> Option<&SourceOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == source_id)
            .map(|(_, o)| o)
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.label() == label)
            .count()
    }
}

/// Result of the operator's forced push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForcePushSummary {
    pub pushed: usize,
    pub failed: usize,
}

impl fmt::Display for ForcePushSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pushed {}, failed {}", self.pushed, self.failed)
    }
}

/// Why a forced push did not run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRefused {
    Disabled,
    TransportOffline(&'static str),
}

impl fmt::Display for PushRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushRefused::Disabled => f.write_str("subscriptions are disabled"),
            PushRefused::TransportOffline(name) => {
                write!(f, "transport [{name}] is offline, cannot push")
            }
        }
    }
}

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn DedupStore>,
    sources: Vec<Source>,
    settings: MonitorSettings,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a source as being checked; released on drop.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn enter(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        if !guard.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&self.id);
    }
}

impl Monitor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        store: Arc<dyn DedupStore>,
        sources: Vec<Source>,
        settings: MonitorSettings,
    ) -> Self {
        ensure_metrics_described();
        Self {
            inner: Arc::new(Inner {
                pipeline,
                store,
                sources,
                settings,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.inner.settings
    }

    pub fn sources(&self) -> &[Source] {
        &self.inner.sources
    }

    fn eligible(&self) -> impl Iterator<Item = &Source> {
        self.inner
            .sources
            .iter()
            .filter(|s| !s.id.is_empty() && !s.channels.is_empty())
    }

    /// One scheduled cycle over every source with at least one channel.
    pub async fn run_cycle(&self) -> CycleReport {
        let settings = &self.inner.settings;
        let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (i, source) in self.eligible().cloned().enumerate() {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            if i > 0 && !settings.source_pacing.is_zero() {
                tokio::time::sleep(settings.source_pacing).await;
            }
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = this.check_source(&source).await;
                (source.id, outcome)
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    counter!("relay_source_outcomes_total", "outcome" => outcome.label())
                        .increment(1);
                    report.outcomes.push((id, outcome));
                }
                Err(e) => warn!(error = %e, "source check task aborted"),
            }
        }

        counter!("relay_cycles_total").increment(1);
        gauge!("relay_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);
        info!(
            updated = report.count("updated"),
            no_update = report.count("no_update"),
            failed = report.count("failed"),
            skipped = report.count("skipped"),
            "check cycle finished"
        );
        report
    }

    /// Check one source and push its newest post if it was not sent before.
    pub async fn check_source(&self, source: &Source) -> SourceOutcome {
        let Some(_in_flight) = InFlight::enter(&self.inner.in_flight, &source.id) else {
            info!(source = %source.label(), "previous check still running, skipping");
            return SourceOutcome::Skipped;
        };
        let inner = &self.inner;
        let mut steps = Steps::new(format!("check:{}", source.label()), inner.settings.verbose);

        let latest = match inner.pipeline.resolve_latest(&source.id).await {
            Ok(Some(locator)) => locator,
            Ok(None) => {
                steps.info("no qualifying post on feed");
                return SourceOutcome::NoUpdate;
            }
            Err(e) => {
                warn!(source = %source.label(), error = %e, kind = e.kind(), "resolving latest post failed");
                return SourceOutcome::failed(&e);
            }
        };

        match inner.store.get(&source.id).await {
            Ok(Some(last)) if last == latest => {
                steps.info(format!("{latest} already pushed"));
                return SourceOutcome::NoUpdate;
            }
            Ok(previous) => {
                steps.info(format!(
                    "new post {latest} (last pushed: {})",
                    previous.map(|p| p.to_string()).unwrap_or_else(|| "none".into())
                ));
            }
            Err(e) => {
                warn!(source = %source.label(), error = %e, "reading dedup state failed");
                return SourceOutcome::failed(&RelayError::from(e));
            }
        }

        let message = match inner.pipeline.prepare(&latest, &inner.settings.policy).await {
            Ok(m) => m,
            Err(e) => {
                warn!(source = %source.label(), %latest, error = %e, kind = e.kind(), "extraction failed");
                return SourceOutcome::failed(&e);
            }
        };

        steps.info(format!("pushing to {} channels", source.channels.len()));
        let mode = inner.settings.policy.mode().forced_split();
        let report = inner
            .pipeline
            .fan_out(&message, &source.channels, mode)
            .await;

        if let Err(e) = inner.store.put(&source.id, &latest).await {
            warn!(source = %source.label(), %latest, error = %e, "saving dedup state failed");
            return SourceOutcome::failed(&RelayError::from(e));
        }

        SourceOutcome::Updated {
            locator: latest,
            delivered: report.delivered.len(),
            failed_channels: report.failed.into_iter().map(|(c, _)| c).collect(),
        }
    }

    /// Push every source's newest post regardless of dedup state. Does not
    /// touch the dedup records.
    pub async fn force_push_all(&self) -> Result<ForcePushSummary, PushRefused> {
        let inner = &self.inner;
        if !inner.settings.enabled {
            return Err(PushRefused::Disabled);
        }
        let transport = inner.pipeline.dispatcher().transport();
        if !transport.is_online() {
            return Err(PushRefused::TransportOffline(transport.name()));
        }

        let mut summary = ForcePushSummary::default();
        for (i, source) in self.eligible().enumerate() {
            if i > 0 && !inner.settings.source_pacing.is_zero() {
                tokio::time::sleep(inner.settings.source_pacing).await;
            }
            if self.force_push_one(source).await {
                summary.pushed += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(pushed = summary.pushed, failed = summary.failed, "forced push finished");
        Ok(summary)
    }

    async fn force_push_one(&self, source: &Source) -> bool {
        let inner = &self.inner;
        let mut steps = Steps::new(format!("force:{}", source.label()), inner.settings.verbose);
        steps.info("starting");

        let latest = match inner.pipeline.resolve_latest(&source.id).await {
            Ok(Some(locator)) => locator,
            Ok(None) => {
                steps.warn("no latest post found, skipping");
                return false;
            }
            Err(e) => {
                warn!(source = %source.label(), error = %e, "forced push: resolving failed");
                return false;
            }
        };

        let message = match inner.pipeline.prepare(&latest, &inner.settings.policy).await {
            Ok(m) => m,
            Err(e) => {
                warn!(source = %source.label(), %latest, error = %e, "forced push: extraction failed");
                return false;
            }
        };

        let mode = inner.settings.policy.mode().forced_split();
        let report = inner
            .pipeline
            .fan_out(&message, &source.channels, mode)
            .await;
        steps.info(format!("pushed to {} channels", report.delivered.len()));
        report.all_ok()
    }

    /// Run cycles on the configured interval until shut down. The first
    /// cycle starts one interval after spawning.
    pub fn spawn(self) -> MonitorHandle {
        let (tx, mut rx) = watch::channel(false);
        let period = self.inner.settings.interval.max(Duration::from_millis(1));

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(every = ?period, sources = self.inner.sources.len(), "subscription monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("subscription monitor stopped");
        });

        MonitorHandle { shutdown: tx, join }
    }
}

pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the timer; a cycle in progress runs to completion first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "monitor task ended abnormally");
        }
    }
}
