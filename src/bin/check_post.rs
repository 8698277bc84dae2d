//! Resolve and extract one post from the command line, then print what would
//! be delivered. Nothing is sent and no dedup state is touched.
//!
//! Usage: `check-post <uid | post-url>`

use anyhow::{anyhow, Context};
use weibo_relay::config::RelayConfig;
use weibo_relay::manual::{LocatorMatcher, RegexMatcher};
use weibo_relay::model::{Block, MediaSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let arg = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: check-post <uid | post-url>"))?;

    let cfg = RelayConfig::load_default().context("loading relay config")?;
    let pipeline = cfg.build_pipeline();

    let locator = match RegexMatcher::default().find(&arg) {
        Some(locator) => locator,
        None => pipeline
            .resolve_latest(arg.trim())
            .await?
            .ok_or_else(|| anyhow!("no qualifying post on the feed of {arg}"))?,
    };
    println!("locator: {locator}");

    let message = pipeline.prepare(&locator, &cfg.manual).await?;
    if message.is_empty() {
        println!("(nothing to deliver)");
        return Ok(());
    }

    for block in message.blocks() {
        match block {
            Block::Text(text) => println!("--- text ---\n{text}"),
            Block::Image(src) => println!("--- image: {} ---", describe(&src)),
            Block::Video(src) => println!("--- video: {} ---", describe(&src)),
        }
    }
    Ok(())
}

fn describe(src: &MediaSource) -> String {
    match src {
        MediaSource::Bytes { data, content_type } => format!(
            "{} bytes ({})",
            data.len(),
            content_type.as_deref().unwrap_or("unknown type")
        ),
        MediaSource::Url(url) => url.clone(),
    }
}
