// Shared fakes for integration tests: a renderer serving canned pages, a
// media fetcher with failure injection and a transport that records sends.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use weibo_relay::dispatcher::Dispatcher;
use weibo_relay::extractor::ContentExtractor;
use weibo_relay::media::{MediaError, MediaFetcher};
use weibo_relay::model::{Block, Credential, MediaAsset, Source};
use weibo_relay::pipeline::Pipeline;
use weibo_relay::render::{Element, RenderError, Renderer, Session, Timeouts};
use weibo_relay::resolver::LatestResolver;
use weibo_relay::transport::{DeliveryHandle, Outbound, Transport, TransportError};

pub const SNAPSHOT_PNG: &[u8] = b"\x89PNG-snapshot";

// ---------- HTML fixtures ----------

pub fn feed_card(href: &str, pinned: bool) -> String {
    let banner = if pinned {
        r#"<div class="title_title_3kxy"><span>Pinned</span></div>"#
    } else {
        ""
    };
    format!(
        r#"<article class="Feed_wrap_3v9LH">{banner}<header><a class="head-info_time_6sFQg" href="{href}">5m ago</a></header></article>"#
    )
}

pub fn feed_page(cards: &[String]) -> String {
    format!("<html><body><main>{}</main></body></html>", cards.join(""))
}

pub fn post_page(author: &str, text: &str, images: &[&str], video: Option<&str>) -> String {
    let imgs: String = images
        .iter()
        .map(|src| format!(r#"<div class="picture_pic_2a"><img src="{src}"></div>"#))
        .collect();
    let video = video
        .map(|src| format!(r#"<div class="FeedPlayer_x1"><video src="{src}"></video></div>"#))
        .unwrap_or_default();
    let author = if author.is_empty() {
        String::new()
    } else {
        format!(r#"<a href="/u/1"><span>{author}</span></a>"#)
    };
    let body = if text.is_empty() {
        String::new()
    } else {
        format!(r#"<div class="detail_text_1U10O">{text}</div>"#)
    };
    format!(
        r#"<html><body><article class="Feed_wrap_3v9LH">{author}{body}{imgs}{video}</article></body></html>"#
    )
}

// ---------- Renderer ----------

/// Parks the next session opened on a URL inside `wait_for` until released.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Resolves once a session is parked on this gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
pub struct MockRenderer {
    pages: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub screenshots: Arc<AtomicUsize>,
}

impl MockRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_page(&self, url: &str, html: impl Into<String>) {
        self.pages.lock().insert(url.to_string(), html.into());
    }

    /// Opening `url` fails with a network error.
    pub fn fail_on(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    /// The next session opened on `url` waits on the returned gate.
    pub fn hold(&self, url: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().insert(url.to_string(), gate.clone());
        gate
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn open(
        &self,
        locator: &str,
        _credential: &Credential,
        _timeouts: Timeouts,
    ) -> Result<Box<dyn Session>, RenderError> {
        if self.failing.lock().contains(locator) {
            return Err(RenderError::Network(format!("connection refused: {locator}")));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let document = self.pages.lock().get(locator).cloned().unwrap_or_default();
        let gate = self.gates.lock().remove(locator);
        Ok(Box::new(MockSession {
            document,
            gate,
            closed: self.closed.clone(),
            screenshots: self.screenshots.clone(),
        }))
    }
}

struct MockSession {
    document: String,
    gate: Option<Arc<Gate>>,
    closed: Arc<AtomicUsize>,
    screenshots: Arc<AtomicUsize>,
}

#[async_trait]
impl Session for MockSession {
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), RenderError> {
        if let Some(gate) = self.gate.take() {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if Element::select_in_document(&self.document, selector).is_empty() {
            return Err(RenderError::Timeout {
                selector: selector.to_string(),
                timeout,
            });
        }
        Ok(())
    }

    async fn query(&mut self, selector: &str) -> Result<Option<Element>, RenderError> {
        Ok(Element::select_in_document(&self.document, selector)
            .into_iter()
            .next())
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<Element>, RenderError> {
        Ok(Element::select_in_document(&self.document, selector))
    }

    async fn screenshot(&mut self, _element: &Element) -> Result<Vec<u8>, RenderError> {
        self.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(SNAPSHOT_PNG.to_vec())
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------- Media ----------

#[derive(Default)]
pub struct MockMedia {
    failing: Mutex<HashSet<String>>,
    pub requested: Mutex<Vec<String>>,
}

impl MockMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }
}

#[async_trait]
impl MediaFetcher for MockMedia {
    async fn fetch(&self, url: &str, _referer: &str) -> Result<MediaAsset, MediaError> {
        self.requested.lock().push(url.to_string());
        if self.failing.lock().contains(url) {
            return Err(MediaError::Status { status: 403 });
        }
        Ok(MediaAsset {
            data: url.as_bytes().to_vec(),
            content_type: Some("image/jpeg".to_string()),
        })
    }
}

// ---------- Transport ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub channel: String,
    pub message: Outbound,
}

pub struct RecordingTransport {
    pub sent: Mutex<Vec<Sent>>,
    pub deleted: Mutex<Vec<(String, DeliveryHandle)>>,
    failing: Mutex<HashSet<String>>,
    forwarding: bool,
    online: bool,
    next_id: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false, true))
    }

    pub fn with_forwarding() -> Arc<Self> {
        Arc::new(Self::build(true, true))
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::build(false, false))
    }

    fn build(forwarding: bool, online: bool) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            forwarding,
            online,
            next_id: AtomicUsize::new(1),
        }
    }

    /// Every send to `channel` is rejected.
    pub fn fail_channel(&self, channel: &str) {
        self.failing.lock().insert(channel.to_string());
    }

    pub fn sends(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sends_to(&self, channel: &str) -> Vec<Outbound> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.channel == channel)
            .map(|s| s.message.clone())
            .collect()
    }

    /// Plain texts sent to `channel`, in order.
    pub fn texts_to(&self, channel: &str) -> Vec<String> {
        self.sends_to(channel)
            .iter()
            .flat_map(|m| m.blocks().to_vec())
            .filter_map(|b| match b {
                Block::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, channel: &str, message: Outbound) -> Result<DeliveryHandle, TransportError> {
        if self.failing.lock().contains(channel) {
            return Err(TransportError::Rejected {
                status: 403,
                message: "missing access".into(),
            });
        }
        self.sent.lock().push(Sent {
            channel: channel.to_string(),
            message,
        });
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryHandle(id.to_string()))
    }

    async fn delete(&self, channel: &str, handle: &DeliveryHandle) -> Result<(), TransportError> {
        self.deleted.lock().push((channel.to_string(), handle.clone()));
        Ok(())
    }

    fn supports_forwarding(&self) -> bool {
        self.forwarding
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ---------- Wiring ----------

pub fn pipeline(
    renderer: Arc<MockRenderer>,
    media: Arc<MockMedia>,
    transport: Arc<RecordingTransport>,
) -> Arc<Pipeline> {
    let timeouts = Timeouts::default();
    let resolver = LatestResolver::new(renderer.clone(), Credential::default(), timeouts);
    let extractor = ContentExtractor::new(renderer, media, Credential::default(), timeouts);
    let dispatcher = Dispatcher::new(transport).with_pacing(Duration::ZERO);
    Arc::new(Pipeline::new(resolver, extractor, dispatcher))
}

pub fn source(uid: &str, channels: &[&str]) -> Source {
    Source::new(uid, &format!("user{uid}"), channels.iter().copied())
}

pub fn channels(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn home(uid: &str) -> String {
    format!("https://weibo.com/u/{uid}")
}

/// Serve `uid`'s feed with `latest` as the newest post and give that post a
/// page with one image.
pub fn serve_account(renderer: &MockRenderer, uid: &str, latest: &str) {
    renderer.set_page(&home(uid), feed_page(&[feed_card(latest, false)]));
    renderer.set_page(
        latest,
        post_page(
            &format!("user{uid}"),
            "new post",
            &["https://wx1.sinaimg.cn/large/a.jpg"],
            None,
        ),
    );
}
