//! Latest-item resolution: newest non-pinned post on an account's home feed.

use std::sync::Arc;

use tracing::warn;

use crate::error::{RelayError, Result};
use crate::model::{ContentLocator, Credential};
use crate::render::{Renderer, Session, Timeouts};
use crate::site;
use crate::steps::Steps;

pub struct LatestResolver {
    renderer: Arc<dyn Renderer>,
    credential: Credential,
    timeouts: Timeouts,
    verbose: bool,
}

impl LatestResolver {
    pub fn new(renderer: Arc<dyn Renderer>, credential: Credential, timeouts: Timeouts) -> Self {
        Self {
            renderer,
            credential,
            timeouts,
            verbose: false,
        }
    }

    pub fn verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    /// Permalink of the newest non-pinned post, `None` when the feed has no
    /// qualifying post. The rendering session is closed on every path.
    pub async fn resolve_latest(&self, uid: &str) -> Result<Option<ContentLocator>> {
        let home = site::home_url(uid);
        let mut steps = Steps::new(format!("latest:{uid}"), self.verbose);
        steps.info(format!("opening home feed {home}"));

        let mut session = self
            .renderer
            .open(&home, &self.credential, self.timeouts)
            .await
            .map_err(|e| RelayError::fetch(&home, e))?;

        let result = self.scan_feed(session.as_mut(), &home, &mut steps).await;

        if let Err(e) = session.close().await {
            warn!(uid, error = %e, "failed to close rendering session");
        }
        result
    }

    async fn scan_feed(
        &self,
        session: &mut dyn Session,
        home: &str,
        steps: &mut Steps,
    ) -> Result<Option<ContentLocator>> {
        let wait = tokio::time::timeout(
            self.timeouts.wait_budget(),
            session.wait_for(site::FEED_ITEM, self.timeouts.selector),
        )
        .await;
        match wait {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RelayError::from_render(home, site::FEED_ITEM, e)),
            Err(_) => {
                return Err(RelayError::ContentMissing {
                    locator: home.to_string(),
                    selector: site::FEED_ITEM.to_string(),
                })
            }
        }

        let items = session
            .query_all(site::FEED_ITEM)
            .await
            .map_err(|e| RelayError::fetch(home, e))?;
        steps.info(format!("feed has {} cards", items.len()));

        for item in &items {
            if item.find(site::PINNED_MARKER).is_some() {
                steps.info("skipping pinned card");
                continue;
            }
            let Some(href) = item
                .find(site::PERMALINK)
                .and_then(|link| link.attr("href"))
            else {
                continue;
            };
            if let Some(locator) = ContentLocator::from_href(home, &href) {
                steps.info(format!("latest post {locator}"));
                return Ok(Some(locator));
            }
        }

        warn!(home, "no non-pinned post with a permalink on feed");
        Ok(None)
    }
}
