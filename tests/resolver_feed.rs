mod common;

use common::{feed_card, feed_page, home, MockRenderer};
use weibo_relay::model::{ContentLocator, Credential};
use weibo_relay::render::Timeouts;
use weibo_relay::resolver::LatestResolver;
use weibo_relay::RelayError;

fn resolver(renderer: std::sync::Arc<MockRenderer>) -> LatestResolver {
    LatestResolver::new(renderer, Credential::default(), Timeouts::default())
}

#[tokio::test]
async fn pinned_card_is_never_returned() {
    let renderer = MockRenderer::new();
    renderer.set_page(
        &home("1001"),
        feed_page(&[
            feed_card("https://weibo.com/1001/Pinned1", true),
            feed_card("https://weibo.com/1001/Newest2", false),
            feed_card("https://weibo.com/1001/Older3", false),
        ]),
    );

    let latest = resolver(renderer.clone()).resolve_latest("1001").await.unwrap();
    assert_eq!(latest, Some(ContentLocator::new("https://weibo.com/1001/Newest2")));
    assert_eq!(renderer.opened(), 1);
    assert_eq!(renderer.closed(), 1);
}

#[tokio::test]
async fn relative_permalink_is_resolved_and_query_dropped() {
    let renderer = MockRenderer::new();
    renderer.set_page(
        &home("7"),
        feed_page(&[feed_card("/7/Qx9?refer_flag=1001030103_", false)]),
    );

    let latest = resolver(renderer).resolve_latest("7").await.unwrap();
    assert_eq!(latest, Some(ContentLocator::new("https://weibo.com/7/Qx9")));
}

#[tokio::test]
async fn only_pinned_cards_means_no_update() {
    let renderer = MockRenderer::new();
    renderer.set_page(
        &home("1001"),
        feed_page(&[feed_card("https://weibo.com/1001/Pinned1", true)]),
    );

    let latest = resolver(renderer.clone()).resolve_latest("1001").await.unwrap();
    assert_eq!(latest, None);
    assert_eq!(renderer.closed(), 1);
}

#[tokio::test]
async fn missing_feed_is_content_missing_and_session_still_closed() {
    let renderer = MockRenderer::new();
    renderer.set_page(&home("1001"), "<html><body>Sina Visitor System</body></html>");

    let err = resolver(renderer.clone()).resolve_latest("1001").await.unwrap_err();
    assert!(matches!(err, RelayError::ContentMissing { .. }), "got {err:?}");
    assert_eq!(renderer.opened(), 1);
    assert_eq!(renderer.closed(), 1);
}

#[tokio::test]
async fn unreachable_renderer_is_fetch_error() {
    let renderer = MockRenderer::new();
    renderer.fail_on(&home("1001"));

    let err = resolver(renderer.clone()).resolve_latest("1001").await.unwrap_err();
    assert_eq!(err.kind(), "fetch");
    assert_eq!(renderer.opened(), 0);
}
