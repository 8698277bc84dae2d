//! Renderer backed by a Browserless instance (`/content` and `/screenshot`).
//!
//! A session is lazy: the page is rendered on the first `wait_for`/`query`
//! and the HTML is kept for later queries. Screenshots re-render the page
//! with the same cookies and wait conditions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use super::{Element, RenderError, Renderer, Session, Timeouts};
use crate::model::{Cookie, Credential};

const DEFAULT_MAX_SESSIONS: usize = 2;

/// Browserless REST renderer. Each session is rendered statelessly: the
/// HTML comes from `/content`, and `screenshot` issues a second render on
/// `/screenshot` with the same cookies and wait condition. The image is
/// therefore taken from a fresh load of the page, not the one that was
/// queried, and can differ if the page changed in between. Only the first
/// match of a selector can be captured.
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    sessions: Arc<Semaphore>,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self::with_max_sessions(base_url, token, DEFAULT_MAX_SESSIONS)
    }

    /// `max_sessions` bounds how many pages are rendered at once; `open`
    /// waits for a free slot.
    pub fn with_max_sessions(base_url: &str, token: Option<&str>, max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        info!(max_sessions, "browserless renderer initialized");
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()).map(String::from),
            sessions: Arc::new(Semaphore::new(max_sessions)),
        }
    }
}

#[async_trait]
impl Renderer for BrowserlessRenderer {
    async fn open(
        &self,
        locator: &str,
        credential: &Credential,
        timeouts: Timeouts,
    ) -> Result<Box<dyn Session>, RenderError> {
        let permit = self
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RenderError::Unsupported("renderer is shutting down".into()))?;

        Ok(Box::new(BrowserlessSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            locator: locator.to_string(),
            cookies: credential.cookies().to_vec(),
            timeouts,
            document: None,
            wait: None,
            permit: Some(permit),
        }))
    }
}

struct BrowserlessSession {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    locator: String,
    cookies: Vec<Cookie>,
    timeouts: Timeouts,
    document: Option<String>,
    wait: Option<WaitForSelector>,
    permit: Option<OwnedSemaphorePermit>,
}

#[derive(Debug, Clone, Serialize)]
struct WaitForSelector {
    selector: String,
    timeout: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    url: &'a str,
    cookies: &'a [Cookie],
    goto_options: GotoOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<&'a WaitForSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selector: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<serde_json::Value>,
}

impl BrowserlessSession {
    fn endpoint(&self, path: &str) -> String {
        match &self.token {
            Some(token) => format!("{}/{path}?token={token}", self.base_url),
            None => format!("{}/{path}", self.base_url),
        }
    }

    fn request<'a>(&'a self, selector: Option<&'a str>) -> RenderRequest<'a> {
        RenderRequest {
            url: &self.locator,
            cookies: &self.cookies,
            goto_options: GotoOptions {
                wait_until: "networkidle2",
                timeout: self.timeouts.navigation.as_millis() as u64,
            },
            wait_for_selector: self.wait.as_ref(),
            selector,
            options: selector.map(|_| serde_json::json!({ "type": "png" })),
        }
    }

    async fn post(&self, path: &str, body: &RenderRequest<'_>) -> Result<reqwest::Response, RenderError> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .timeout(self.timeouts.wait_budget())
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if status.as_u16() == 408 || message.contains("TimeoutError") {
                return Err(self.timeout_error());
            }
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> RenderError {
        if err.is_timeout() {
            self.timeout_error()
        } else {
            RenderError::from(err)
        }
    }

    fn timeout_error(&self) -> RenderError {
        match &self.wait {
            Some(w) => RenderError::Timeout {
                selector: w.selector.clone(),
                timeout: Duration::from_millis(w.timeout),
            },
            None => RenderError::Timeout {
                selector: String::new(),
                timeout: self.timeouts.navigation,
            },
        }
    }

    async fn load(&mut self) -> Result<&str, RenderError> {
        if self.document.is_none() {
            debug!(url = %self.locator, "rendering page");
            let body = self.request(None);
            let html = self.post("content", &body).await?.text().await?;
            self.document = Some(html);
        }
        Ok(self.document.as_deref().unwrap_or_default())
    }
}

#[async_trait]
impl Session for BrowserlessSession {
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), RenderError> {
        self.wait = Some(WaitForSelector {
            selector: selector.to_string(),
            timeout: timeout.as_millis() as u64,
        });
        self.document = None;
        let html = self.load().await?;
        if Element::select_in_document(html, selector).is_empty() {
            return Err(RenderError::NoMatch(selector.to_string()));
        }
        Ok(())
    }

    async fn query(&mut self, selector: &str) -> Result<Option<Element>, RenderError> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<Element>, RenderError> {
        let html = self.load().await?;
        Ok(Element::select_in_document(html, selector))
    }

    async fn screenshot(&mut self, element: &Element) -> Result<Vec<u8>, RenderError> {
        if element.index() != 0 {
            return Err(RenderError::Unsupported(format!(
                "screenshot of match #{} of `{}`",
                element.index(),
                element.selector()
            )));
        }
        let body = self.request(Some(element.selector()));
        let bytes = self.post("screenshot", &body).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.document = None;
        self.permit.take();
        Ok(())
    }
}
