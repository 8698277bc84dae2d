//! Content extraction: renders one post page and turns the post container
//! into an [`ExtractedPost`]. Snapshot and text come from one session;
//! media is downloaded afterwards.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use tracing::{info, warn};
use url::Url;

use crate::error::{RelayError, Result};
use crate::media::MediaFetcher;
use crate::model::{ContentLocator, Credential, ExtractedPost, MediaRef};
use crate::render::{Element, Renderer, Session, Timeouts};
use crate::site;
use crate::steps::Steps;

/// Author value when the post card has no author link.
pub const UNKNOWN_AUTHOR: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractOptions {
    pub want_snapshot: bool,
    pub want_media: bool,
}

pub struct ContentExtractor {
    renderer: Arc<dyn Renderer>,
    media: Arc<dyn MediaFetcher>,
    credential: Credential,
    timeouts: Timeouts,
    verbose: bool,
}

impl ContentExtractor {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        media: Arc<dyn MediaFetcher>,
        credential: Credential,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            renderer,
            media,
            credential,
            timeouts,
            verbose: false,
        }
    }

    pub fn verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    pub async fn extract(
        &self,
        locator: &ContentLocator,
        options: ExtractOptions,
    ) -> Result<ExtractedPost> {
        let mut steps = Steps::new(format!("parse:{locator}"), self.verbose);
        if self.credential.is_empty() {
            steps.warn("no cookie configured, visiting as guest");
        } else {
            steps.info(format!("applying {} cookies", self.credential.cookies().len()));
        }

        let mut session = self
            .renderer
            .open(locator.as_str(), &self.credential, self.timeouts)
            .await
            .map_err(|e| RelayError::fetch(locator.as_str(), e))?;

        let rendered = self.render_post(session.as_mut(), locator, options, &mut steps).await;

        if let Err(e) = session.close().await {
            warn!(%locator, error = %e, "failed to close rendering session");
        }
        let mut post = rendered?;

        if options.want_media && !post.media.is_empty() {
            post.media = self.download_media(post.media, &mut steps).await;
        }
        Ok(post)
    }

    async fn render_post(
        &self,
        session: &mut dyn Session,
        locator: &ContentLocator,
        options: ExtractOptions,
        steps: &mut Steps,
    ) -> Result<ExtractedPost> {
        let target = locator.as_str();
        let waited = tokio::time::timeout(
            self.timeouts.wait_budget(),
            session.wait_for(site::FEED_ITEM, self.timeouts.selector),
        )
        .await;
        match waited {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RelayError::from_render(target, site::FEED_ITEM, e)),
            Err(_) => {
                return Err(RelayError::ContentMissing {
                    locator: target.to_string(),
                    selector: site::FEED_ITEM.to_string(),
                })
            }
        }

        let container = session
            .query(site::FEED_ITEM)
            .await
            .map_err(|e| RelayError::fetch(target, e))?
            .ok_or_else(|| RelayError::ContentMissing {
                locator: target.to_string(),
                selector: site::FEED_ITEM.to_string(),
            })?;

        let snapshot = if options.want_snapshot {
            steps.info("capturing snapshot");
            let png = session
                .screenshot(&container)
                .await
                .map_err(|e| RelayError::fetch(target, e))?;
            Some(png)
        } else {
            None
        };

        let post = parse_post(locator, &container, snapshot);
        steps.info(format!(
            "author [{}]: {} chars of text, {} images, {} video",
            post.author,
            post.text.chars().count(),
            post.image_count(),
            post.video_count()
        ));
        Ok(post)
    }

    /// Download every asset concurrently; a failure drops only that asset
    /// and the survivors keep their order.
    async fn download_media(&self, refs: Vec<MediaRef>, steps: &mut Steps) -> Vec<MediaRef> {
        let fetches = refs
            .iter()
            .map(|media| self.media.fetch(&media.url, site::REFERER));
        let results = join_all(fetches).await;

        let mut resolved = Vec::with_capacity(refs.len());
        for (media, result) in refs.into_iter().zip(results) {
            match result {
                Ok(asset) => resolved.push(media.with_asset(asset)),
                Err(e) => {
                    counter!("relay_media_failures_total").increment(1);
                    steps.warn(format!("media download failed: {} ({e})", media.url));
                    info!(url = %media.url, error = %e, "dropping media that failed to download");
                }
            }
        }
        resolved
    }
}

/// Pull author, text and media URLs out of a rendered post container.
pub fn parse_post(
    locator: &ContentLocator,
    container: &Element,
    snapshot: Option<Vec<u8>>,
) -> ExtractedPost {
    let author = container
        .find(site::AUTHOR)
        .map(|el| el.text())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

    let text = container
        .find(site::BODY_TEXT)
        .map(|el| el.text())
        .unwrap_or_default();

    let mut media: Vec<MediaRef> = container
        .find_all(site::IMAGES)
        .iter()
        .filter_map(|img| img.attr("src"))
        .filter_map(|src| absolute_media_url(locator, &src))
        .map(MediaRef::image)
        .collect();

    if let Some(video) = container
        .find(site::VIDEO)
        .and_then(|v| v.attr("src"))
        .and_then(|src| absolute_media_url(locator, &src))
    {
        media.push(MediaRef::video(video));
    }

    ExtractedPost {
        locator: locator.clone(),
        author,
        text,
        media,
        snapshot,
    }
}

/// Resolve protocol-relative and relative asset URLs; `blob:`/`data:` sources
/// cannot be downloaded and are skipped.
fn absolute_media_url(locator: &ContentLocator, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() || src.starts_with("blob:") || src.starts_with("data:") {
        return None;
    }
    let base = Url::parse(locator.as_str()).ok()?;
    let url = base.join(src).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}
