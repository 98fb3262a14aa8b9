//! RSS/Atom parsing and entry normalization.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feedpress_shared::{Article, ArticleId, FeedpressError, Result};
use regex::Regex;
use scraper::Html;
use tracing::debug;

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Parse a feed document into normalized articles.
///
/// Entries without a publication (or update) date are dropped here: their age
/// cannot be checked, and they would sort unpredictably.
pub fn parse_feed(feed_url: &str, bytes: &[u8]) -> Result<Vec<Article>> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| FeedpressError::fetch(format!("{feed_url}: malformed feed: {e}")))?;

    let source = feed
        .title
        .map(|t| collapse_whitespace(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| feed_url.to_string());

    let total = feed.entries.len();
    let articles: Vec<Article> = feed
        .entries
        .into_iter()
        .filter_map(|entry| normalize_entry(feed_url, &source, entry))
        .collect();

    debug!(feed = feed_url, total, kept = articles.len(), "normalized feed entries");
    Ok(articles)
}

fn normalize_entry(feed_url: &str, source: &str, entry: Entry) -> Option<Article> {
    let published_at: DateTime<Utc> = entry.published.or(entry.updated)?;

    let url = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))
        .unwrap_or_default();

    let guid = Some(entry.id.trim().to_string()).filter(|g| !g.is_empty());
    let locator = if url.is_empty() {
        guid.as_deref().unwrap_or_default()
    } else {
        url.as_str()
    };
    let id = ArticleId::derive(feed_url, locator);

    let title = entry
        .title
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let raw_summary = entry
        .summary
        .map(|s| s.content)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|html| strip_html(&html))
        .unwrap_or_default();

    Some(Article {
        id,
        title,
        source: source.to_string(),
        feed_url: feed_url.to_string(),
        url,
        guid,
        published_at,
        raw_summary,
        ai_generated: false,
        topic: None,
    })
}

/// Reduce an HTML fragment to its text, whitespace-collapsed.
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: Vec<&str> = fragment.root_element().text().collect();
    collapse_whitespace(&text.join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}
