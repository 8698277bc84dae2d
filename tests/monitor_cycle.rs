mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{home, serve_account, source, MockMedia, MockRenderer, RecordingTransport};
use weibo_relay::model::{ContentLocator, DeliveryPolicy};
use weibo_relay::monitor::{ForcePushSummary, Monitor, MonitorSettings, PushRefused, SourceOutcome};
use weibo_relay::store::{DedupStore, MemoryStore};
use weibo_relay::transport::Outbound;

const LATEST: &str = "https://weibo.com/1001/Xyz";

/// Text only, so each channel gets exactly one send per push.
fn settings() -> MonitorSettings {
    MonitorSettings {
        enabled: true,
        interval: Duration::from_secs(60),
        concurrency: 1,
        source_pacing: Duration::ZERO,
        policy: DeliveryPolicy {
            show_snapshot: false,
            send_media: false,
            ..DeliveryPolicy::subscription()
        },
        verbose: true,
    }
}

struct Harness {
    renderer: Arc<MockRenderer>,
    transport: Arc<RecordingTransport>,
    store: Arc<MemoryStore>,
    monitor: Monitor,
}

fn harness(sources: Vec<weibo_relay::Source>, settings: MonitorSettings) -> Harness {
    harness_with(sources, settings, RecordingTransport::new())
}

fn harness_with(
    sources: Vec<weibo_relay::Source>,
    settings: MonitorSettings,
    transport: Arc<RecordingTransport>,
) -> Harness {
    let renderer = MockRenderer::new();
    let store = Arc::new(MemoryStore::new());
    let pipeline = common::pipeline(renderer.clone(), MockMedia::new(), transport.clone());
    let monitor = Monitor::new(pipeline, store.clone(), sources, settings);
    Harness {
        renderer,
        transport,
        store,
        monitor,
    }
}

#[tokio::test]
async fn first_seen_post_is_dispatched_once_and_recorded() {
    let h = harness(vec![source("1001", &["g1"])], settings());
    serve_account(&h.renderer, "1001", LATEST);

    let report = h.monitor.run_cycle().await;

    assert!(matches!(
        report.outcome("1001"),
        Some(SourceOutcome::Updated { delivered: 1, .. })
    ));
    let texts = h.transport.texts_to("g1");
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with(LATEST), "link shown first: {}", texts[0]);
    assert_eq!(
        h.store.get("1001").await.unwrap(),
        Some(ContentLocator::new(LATEST))
    );
}

#[tokio::test]
async fn unchanged_latest_is_not_pushed_again() {
    let h = harness(vec![source("1001", &["g1", "g2"])], settings());
    serve_account(&h.renderer, "1001", LATEST);

    h.monitor.run_cycle().await;
    let after_first = h.transport.sends().len();
    assert_eq!(after_first, 2);

    let report = h.monitor.run_cycle().await;
    assert_eq!(report.outcome("1001"), Some(&SourceOutcome::NoUpdate));
    assert_eq!(h.transport.sends().len(), after_first);
}

#[tokio::test]
async fn known_record_equal_to_latest_sends_nothing() {
    let h = harness(vec![source("1001", &["g1"])], settings());
    serve_account(&h.renderer, "1001", LATEST);
    h.store
        .put("1001", &ContentLocator::new(LATEST))
        .await
        .unwrap();

    let report = h.monitor.run_cycle().await;
    assert_eq!(report.count("no_update"), 1);
    assert!(h.transport.sends().is_empty());
}

#[tokio::test]
async fn failing_channel_does_not_block_others_and_record_moves() {
    let h = harness(vec![source("1001", &["g1", "g2", "g3"])], settings());
    serve_account(&h.renderer, "1001", LATEST);
    h.transport.fail_channel("g2");

    let report = h.monitor.run_cycle().await;

    match report.outcome("1001") {
        Some(SourceOutcome::Updated {
            delivered,
            failed_channels,
            ..
        }) => {
            assert_eq!(*delivered, 2);
            assert_eq!(failed_channels, &vec!["g2".to_string()]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.transport.texts_to("g1").len(), 1);
    assert_eq!(h.transport.texts_to("g3").len(), 1);
    assert_eq!(
        h.store.get("1001").await.unwrap(),
        Some(ContentLocator::new(LATEST))
    );
}

#[tokio::test]
async fn one_failing_source_does_not_stop_the_cycle() {
    let sources = vec![source("1001", &["g1"]), source("2002", &["g2"])];
    let h = harness(sources, settings());
    h.renderer.fail_on(&home("1001"));
    serve_account(&h.renderer, "2002", "https://weibo.com/2002/Def");

    let report = h.monitor.run_cycle().await;

    assert!(matches!(report.outcome("1001"), Some(SourceOutcome::Failed { .. })));
    assert!(matches!(report.outcome("2002"), Some(SourceOutcome::Updated { .. })));
    assert_eq!(h.store.get("1001").await.unwrap(), None);
}

#[tokio::test]
async fn extraction_failure_leaves_record_untouched() {
    let h = harness(vec![source("1001", &["g1"])], settings());
    h.renderer.set_page(
        &home("1001"),
        common::feed_page(&[common::feed_card(LATEST, false)]),
    );
    h.renderer.set_page(LATEST, "<html><body>gone</body></html>");

    let report = h.monitor.run_cycle().await;
    assert!(matches!(report.outcome("1001"), Some(SourceOutcome::Failed { .. })));
    assert_eq!(h.store.get("1001").await.unwrap(), None);
    assert!(h.transport.sends().is_empty());
}

#[tokio::test]
async fn subscription_pushes_are_split_per_block() {
    let mut s = settings();
    s.policy = DeliveryPolicy::subscription();
    let h = harness(vec![source("1001", &["g1"])], s);
    serve_account(&h.renderer, "1001", LATEST);

    h.monitor.run_cycle().await;

    // text, snapshot, one image
    let sends = h.transport.sends_to("g1");
    assert_eq!(sends.len(), 3);
    assert!(sends.iter().all(|m| matches!(m, Outbound::Block(_))));
}

#[tokio::test]
async fn sources_without_channels_are_skipped() {
    let h = harness(vec![source("1001", &[])], settings());
    serve_account(&h.renderer, "1001", LATEST);

    let report = h.monitor.run_cycle().await;
    assert!(report.outcomes.is_empty());
    assert_eq!(h.renderer.opened(), 0);
}

#[tokio::test]
async fn forced_push_ignores_and_keeps_dedup_state() {
    let sources = vec![source("1001", &["g1"]), source("2002", &["g2"])];
    let h = harness(sources, settings());
    serve_account(&h.renderer, "1001", LATEST);
    serve_account(&h.renderer, "2002", "https://weibo.com/2002/Def");
    h.store
        .put("1001", &ContentLocator::new(LATEST))
        .await
        .unwrap();
    let before = h.store.snapshot();

    let summary = h.monitor.force_push_all().await.unwrap();

    assert_eq!(summary, ForcePushSummary { pushed: 2, failed: 0 });
    assert_eq!(summary.to_string(), "pushed 2, failed 0");
    assert_eq!(h.transport.texts_to("g1").len(), 1);
    assert_eq!(h.transport.texts_to("g2").len(), 1);
    assert_eq!(h.store.snapshot(), before);
}

#[tokio::test]
async fn forced_push_counts_each_source_independently() {
    let sources = vec![
        source("1001", &["g1"]),
        source("2002", &["g2"]),
        source("3003", &["g3"]),
        source("4004", &["g4"]),
    ];
    let h = harness(sources, settings());
    serve_account(&h.renderer, "1001", LATEST);
    h.renderer.fail_on(&home("2002"));
    // 3003 has a feed with only a pinned card: nothing to resolve
    h.renderer.set_page(
        &home("3003"),
        common::feed_page(&[common::feed_card("https://weibo.com/3003/Pin", true)]),
    );
    serve_account(&h.renderer, "4004", "https://weibo.com/4004/Ok");

    let summary = h.monitor.force_push_all().await.unwrap();
    assert_eq!(summary, ForcePushSummary { pushed: 2, failed: 2 });
}

#[tokio::test]
async fn forced_push_refused_when_disabled_or_offline() {
    let mut s = settings();
    s.enabled = false;
    let h = harness(vec![source("1001", &["g1"])], s);
    assert_eq!(h.monitor.force_push_all().await, Err(PushRefused::Disabled));

    let h = harness_with(
        vec![source("1001", &["g1"])],
        settings(),
        RecordingTransport::offline(),
    );
    serve_account(&h.renderer, "1001", LATEST);
    let refused = h.monitor.force_push_all().await.unwrap_err();
    assert_eq!(refused, PushRefused::TransportOffline("recording"));
    assert_eq!(h.renderer.opened(), 0);
}

#[tokio::test]
async fn concurrent_cycles_skip_a_source_already_in_flight() {
    let h = harness(vec![source("1001", &["g1"])], settings());
    serve_account(&h.renderer, "1001", LATEST);
    let gate = h.renderer.hold(&home("1001"));

    let monitor = h.monitor.clone();
    let first = tokio::spawn(async move { monitor.run_cycle().await });
    gate.entered().await;

    let second = h.monitor.run_cycle().await;
    assert_eq!(second.outcome("1001"), Some(&SourceOutcome::Skipped));
    assert!(h.transport.sends().is_empty());
    assert_eq!(h.renderer.opened(), 1);

    gate.release();
    let first = first.await.unwrap();
    assert!(matches!(
        first.outcome("1001"),
        Some(SourceOutcome::Updated { delivered: 1, .. })
    ));
    assert_eq!(h.transport.texts_to("g1").len(), 1);

    // the guard is released once the first check finishes
    let third = h.monitor.run_cycle().await;
    assert_eq!(third.outcome("1001"), Some(&SourceOutcome::NoUpdate));
}

#[tokio::test(start_paused = true)]
async fn timer_runs_cycles_until_shutdown() {
    let h = harness(vec![source("1001", &["g1"])], settings());
    serve_account(&h.renderer, "1001", LATEST);

    let handle = h.monitor.clone().spawn();

    // nothing before the first interval elapses
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.renderer.opened(), 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(h.renderer.opened() >= 1);
    assert_eq!(h.transport.texts_to("g1").len(), 1);

    handle.shutdown().await;
    let opened = h.renderer.opened();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.renderer.opened(), opened);
}

#[tokio::test]
async fn shutdown_waits_for_the_cycle_in_progress() {
    let mut s = settings();
    s.interval = Duration::from_millis(20);
    let h = harness(vec![source("1001", &["g1"])], s);
    serve_account(&h.renderer, "1001", LATEST);
    let gate = h.renderer.hold(&home("1001"));

    let handle = h.monitor.clone().spawn();
    gate.entered().await;

    let stopping = tokio::spawn(handle.shutdown());
    tokio::task::yield_now().await;
    assert!(!stopping.is_finished());

    gate.release();
    stopping.await.unwrap();
    assert_eq!(h.transport.texts_to("g1").len(), 1);
    assert_eq!(
        h.store.get("1001").await.unwrap(),
        Some(ContentLocator::new(LATEST))
    );
}
