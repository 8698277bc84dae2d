//! Rendering collaborator: opens a page in a headless browser, waits for
//! selectors, hands back DOM fragments and rasterizes elements.

pub mod browserless;

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;

use crate::model::Credential;

pub use browserless::BrowserlessRenderer;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("renderer API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("timed out after {timeout:?} waiting for `{selector}`")]
    Timeout { selector: String, timeout: Duration },

    #[error("no element matches `{0}`")]
    NoMatch(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        RenderError::Network(err.to_string())
    }
}

/// Navigation and selector-wait bounds applied per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub navigation: Duration,
    pub selector: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            selector: Duration::from_secs(20),
        }
    }
}

impl Timeouts {
    /// Upper bound for one wait (navigation + selector) plus slack for the
    /// renderer round-trip.
    pub fn wait_budget(&self) -> Duration {
        self.navigation + self.selector + Duration::from_secs(5)
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a session for `locator` with the credential's cookies applied.
    async fn open(
        &self,
        locator: &str,
        credential: &Credential,
        timeouts: Timeouts,
    ) -> Result<Box<dyn Session>, RenderError>;
}

/// One page. Callers must `close` it on every exit path.
#[async_trait]
pub trait Session: Send {
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), RenderError>;

    async fn query(&mut self, selector: &str) -> Result<Option<Element>, RenderError>;

    async fn query_all(&mut self, selector: &str) -> Result<Vec<Element>, RenderError>;

    /// PNG of exactly this element.
    async fn screenshot(&mut self, element: &Element) -> Result<Vec<u8>, RenderError>;

    async fn close(&mut self) -> Result<(), RenderError>;
}

/// Owned snapshot of one DOM element (outer HTML) plus where it came from,
/// so the session can rasterize it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    selector: String,
    index: usize,
    html: String,
}

impl Element {
    pub fn new(selector: impl Into<String>, index: usize, html: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            index,
            html: html.into(),
        }
    }

    /// All matches of `selector` in a full document.
    pub fn select_in_document(document: &str, selector: &str) -> Vec<Element> {
        let Some(sel) = parse_selector(selector) else {
            return Vec::new();
        };
        Html::parse_document(document)
            .select(&sel)
            .enumerate()
            .map(|(i, el)| Element::new(selector, i, el.html()))
            .collect()
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Position among the matches of `selector` in the page.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    /// First descendant matching `selector`.
    pub fn find(&self, selector: &str) -> Option<Element> {
        self.find_all(selector).into_iter().next()
    }

    pub fn find_all(&self, selector: &str) -> Vec<Element> {
        let Some(sel) = parse_selector(selector) else {
            return Vec::new();
        };
        let fragment = Html::parse_fragment(&self.html);
        fragment
            .select(&sel)
            .enumerate()
            .map(|(i, el)| Element::new(selector, i, el.html()))
            .collect()
    }

    /// Attribute of the element itself.
    pub fn attr(&self, name: &str) -> Option<String> {
        let fragment = Html::parse_fragment(&self.html);
        let root = first_element(&fragment)?;
        root.value().attr(name).map(str::to_string)
    }

    /// Visible text, roughly what `innerText` gives: `<br>` becomes a line
    /// break, emoji images contribute their `alt`, runs of spaces collapse.
    pub fn text(&self) -> String {
        let fragment = Html::parse_fragment(&self.html);
        let Some(root) = first_element(&fragment) else {
            return String::new();
        };

        let mut raw = String::new();
        for node in root.descendants() {
            match node.value() {
                Node::Text(t) => {
                    let inside_script = node.ancestors().any(|a| {
                        a.value()
                            .as_element()
                            .is_some_and(|e| matches!(e.name(), "script" | "style"))
                    });
                    if !inside_script {
                        raw.push_str(t);
                    }
                }
                Node::Element(e) if e.name() == "br" => raw.push('\n'),
                Node::Element(e) if e.name() == "img" => {
                    if let Some(alt) = e.attr("alt") {
                        raw.push_str(alt);
                    }
                }
                _ => {}
            }
        }
        collapse_text(&raw)
    }
}

fn first_element(fragment: &Html) -> Option<ElementRef<'_>> {
    fragment
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .next()
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(sel) => Some(sel),
        Err(e) => {
            tracing::warn!(selector, error = ?e, "invalid css selector");
            None
        }
    }
}

/// Collapse horizontal whitespace per line, trim lines, keep at most one
/// blank line between paragraphs.
fn collapse_text(raw: &str) -> String {
    static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").expect("static ws regex"));
    static RE_BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static nl regex"));

    let spaced = RE_WS.replace_all(raw, " ");
    let lines: Vec<&str> = spaced.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    RE_BLANK.replace_all(joined.trim(), "\n\n").to_string()
}
