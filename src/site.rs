//! Weibo PC web layout: URLs and selectors the resolver/extractor rely on.
//! Class names on weibo.com are hashed per build, so every selector matches
//! on a stable class-name prefix.

use once_cell::sync::Lazy;
use regex::Regex;

/// Referer sent with media downloads (hotlink protection).
pub const REFERER: &str = "https://weibo.com/";

/// Domain applied to credential cookies.
pub const COOKIE_DOMAIN: &str = ".weibo.com";

/// One post card, both on the home feed and on a post page.
pub const FEED_ITEM: &str = r#"article[class*="Feed_wrap"]"#;

/// Present only on the "pinned" banner of a feed card.
pub const PINNED_MARKER: &str = r#"[class*="title_title"]"#;

/// Timestamp anchor holding the post permalink.
pub const PERMALINK: &str = r#"a[class*="head-info_time"]"#;

pub const AUTHOR: &str = r#"a[href^="/u/"] > span"#;
pub const BODY_TEXT: &str = r#"[class*="detail_text"]"#;
pub const IMAGES: &str = r#"[class*="picture_pic"] img"#;
pub const VIDEO: &str = r#"[class*="FeedPlayer"] video"#;

/// Post links pasted into chat, desktop and mobile hosts.
pub static POST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://((m\.)?weibo\.(cn|com))/(\d+)/(\w+)").expect("static post url regex")
});

pub fn home_url(uid: &str) -> String {
    format!("https://weibo.com/u/{uid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_url_matches_desktop_and_mobile() {
        let m = POST_URL
            .find("look https://weibo.com/1234567/MzAbCdEf now")
            .unwrap();
        assert_eq!(m.as_str(), "https://weibo.com/1234567/MzAbCdEf");
        assert!(POST_URL.is_match("http://m.weibo.cn/99/4951"));
        assert!(!POST_URL.is_match("https://weibo.com/u/1234567"));
    }

    #[test]
    fn home_url_uses_uid() {
        assert_eq!(home_url("42"), "https://weibo.com/u/42");
    }
}
