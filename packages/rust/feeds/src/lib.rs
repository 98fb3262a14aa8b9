//! Feed fetching for feedpress.
//!
//! Pulls every configured RSS/Atom feed in turn, normalizes entries into
//! [`Article`]s and returns the newest ones. A feed that is unreachable,
//! returns a non-2xx status or does not parse is logged and skipped; the
//! remaining feeds still contribute.

mod parser;

use std::time::Duration;

use chrono::{DateTime, Utc};
use feedpress_shared::{Article, FeedpressError, FeedsConfig, Result};
use reqwest::Client;
use tracing::{info, instrument, warn};

pub use parser::{parse_feed, strip_html};

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("feedpress/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow per feed.
const MAX_REDIRECTS: usize = 5;

/// Default cap on a feed body (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Options / report
// ---------------------------------------------------------------------------

/// Configuration for a fetch pass.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout_secs: u64,
    pub max_age_days: u32,
    pub max_articles: usize,
    /// Bodies larger than this are rejected, whatever Content-Length says.
    pub max_response_bytes: u64,
}

impl From<&FeedsConfig> for FetchOptions {
    fn from(config: &FeedsConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
            max_age_days: config.max_age_days,
            max_articles: config.max_articles,
            max_response_bytes: MAX_RESPONSE_SIZE,
        }
    }
}

/// Outcome of fetching all feeds.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Newest first, capped at `max_articles`.
    pub articles: Vec<Article>,
    /// `(feed_url, error)` for every feed that was skipped.
    pub failed_feeds: Vec<(String, String)>,
    /// Entries dropped for being older than `max_age_days`.
    pub too_old: usize,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Sequential feed fetcher.
pub struct FeedFetcher {
    client: Client,
    opts: FetchOptions,
}

impl FeedFetcher {
    pub fn new(opts: FetchOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| FeedpressError::fetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, opts })
    }

    /// Fetch every feed in `urls`, one after another, and keep the
    /// `max_articles` newest entries published within `max_age_days` of `now`.
    #[instrument(skip_all, fields(feeds = urls.len()))]
    pub async fn fetch_all(&self, urls: &[String], now: DateTime<Utc>) -> FetchReport {
        let mut report = FetchReport::default();
        let cutoff = now - chrono::Duration::days(i64::from(self.opts.max_age_days));

        for url in urls {
            match self.fetch_feed(url).await {
                Ok(articles) => {
                    let total = articles.len();
                    for article in articles {
                        if article.published_at < cutoff {
                            report.too_old += 1;
                        } else {
                            report.articles.push(article);
                        }
                    }
                    info!(feed = %url, entries = total, "feed parsed");
                }
                Err(e) => {
                    warn!(feed = %url, error = %e, "skipping feed");
                    report.failed_feeds.push((url.clone(), e.to_string()));
                }
            }
        }

        report
            .articles
            .sort_by(|a, b| b.published_at.cmp(&a.published_at));
        report.articles.truncate(self.opts.max_articles);

        info!(
            articles = report.articles.len(),
            failed = report.failed_feeds.len(),
            too_old = report.too_old,
            "fetch complete"
        );
        report
    }

    /// Fetch and parse a single feed.
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<Article>> {
        let mut response = self.client.get(url).send().await.map_err(|e| {
            let err = FeedpressError::fetch(format!("{url}: {e}"));
            if e.is_timeout() || e.is_connect() {
                err.retryable()
            } else {
                err
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let err = FeedpressError::fetch(format!("{url}: HTTP {status}"));
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                err.retryable()
            } else {
                err
            });
        }

        let limit = self.opts.max_response_bytes;
        let too_large = |len: u64| {
            FeedpressError::fetch(format!(
                "{url}: response too large ({len} bytes, max {limit})"
            ))
        };
        if let Some(len) = response.content_length() {
            if len > limit {
                return Err(too_large(len));
            }
        }

        // Content-Length may be absent or wrong, so count what actually arrives.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FeedpressError::fetch(format!("{url}: failed to read body: {e}")))?
        {
            let len = (body.len() + chunk.len()) as u64;
            if len > limit {
                return Err(too_large(len));
            }
            body.extend_from_slice(&chunk);
        }

        parse_feed(url, &body)
    }
}
