//! Core domain types for the feedpress pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FeedpressError, Result};

/// Current schema version for the JSON history files.
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// ArticleId
// ---------------------------------------------------------------------------

/// Stable article identifier: derived from the feed it came from plus the
/// normalized article URL (or GUID when the entry has no link).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub String);

impl ArticleId {
    /// Derive the id for an entry of `feed_url` located at `locator`.
    pub fn derive(feed_url: &str, locator: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(feed_url.trim().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_url(locator).as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self(digest[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Normalize a URL so the same story is recognised across query strings,
/// fragments, letter case and trailing slashes.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let cut = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    trimmed[..cut].to_lowercase().trim_end_matches('/').to_string()
}

/// SHA-256 of whitespace-collapsed, lowercased text.
pub fn content_hash(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// A normalized feed entry, as written to the JSON article cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    /// Feed title, falling back to the feed URL.
    pub source: String,
    /// The configured feed this entry came from.
    pub feed_url: String,
    pub url: String,
    /// Entry GUID; identifies entries that carry no link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    pub published_at: DateTime<Utc>,
    /// HTML-stripped description or content.
    pub raw_summary: String,
    /// True for articles produced by top-up generation rather than a feed.
    #[serde(default)]
    pub ai_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Article {
    /// The URL, or the GUID for link-less entries. `None` when neither exists.
    pub fn locator(&self) -> Option<&str> {
        let url = self.url.trim();
        if !url.is_empty() {
            return Some(url);
        }
        self.guid.as_deref().map(str::trim).filter(|g| !g.is_empty())
    }
}

// ---------------------------------------------------------------------------
// EnhancedArticle
// ---------------------------------------------------------------------------

/// Where the AI fields of an [`EnhancedArticle`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentSource {
    Generated,
    Cached,
    /// Generation failed; only raw feed data is available.
    Skipped,
}

/// An article plus its AI-generated commentary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedArticle {
    #[serde(flatten)]
    pub article: Article,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    pub enrichment: EnrichmentSource,
}

impl EnhancedArticle {
    /// Keep the raw data of an article whose enrichment failed.
    pub fn raw(article: Article) -> Self {
        Self {
            article,
            ai_body: None,
            ai_summary: None,
            enrichment: EnrichmentSource::Skipped,
        }
    }

    /// Best available summary: the AI one when present, else the feed's.
    pub fn summary(&self) -> &str {
        self.ai_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.article.raw_summary)
    }

    /// Word count of the AI body, if one was generated.
    pub fn word_count(&self) -> Option<u32> {
        self.ai_body
            .as_deref()
            .map(|body| body.split_whitespace().count() as u32)
    }
}

// ---------------------------------------------------------------------------
// Platform / SocialPost
// ---------------------------------------------------------------------------

/// Social platform a post is written for. Each platform gets its own
/// spreadsheet tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    LinkedIn,
    Instagram,
    Twitter,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::LinkedIn, Platform::Instagram, Platform::Twitter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkedIn => "LinkedIn",
            Self::Instagram => "Instagram",
            Self::Twitter => "Twitter",
        }
    }

    /// Spreadsheet tab holding this platform's posts.
    pub fn tab_name(&self) -> String {
        format!("{}_Posts", self.as_str())
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = FeedpressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linkedin" => Ok(Self::LinkedIn),
            "instagram" => Ok(Self::Instagram),
            "twitter" | "x" => Ok(Self::Twitter),
            other => Err(FeedpressError::validation(format!(
                "unknown platform '{other}'"
            ))),
        }
    }
}

/// A short-form post derived from an enhanced article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub article_id: ArticleId,
    pub platform: Platform,
    pub text: String,
    pub title: String,
    pub link: String,
    pub source: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u32>,
}

// ---------------------------------------------------------------------------
// ExportRow
// ---------------------------------------------------------------------------

/// Header of the CSV export and of every spreadsheet tab. Downstream
/// automations map columns by position, so this order must never change;
/// new columns may only be appended.
pub const EXPORT_COLUMNS: [&str; 12] = [
    "ArticleId",
    "Date",
    "Platform",
    "Title",
    "Content",
    "Link",
    "Source",
    "ImagePath",
    "ImageAttribution",
    "DriveImageURL",
    "WordCount",
    "LastUpdated",
];

/// Placeholder tokens that stand in for a missing value in upstream tools.
const PLACEHOLDERS: [&str; 6] = ["nan", "none", "null", "undefined", "n/a", "<na>"];

/// Replace placeholder tokens (`NaN`, `None`, `null`, ...) with an empty string.
pub fn sanitize_cell(value: &str) -> String {
    let trimmed = value.trim();
    if PLACEHOLDERS
        .iter()
        .any(|p| trimmed.eq_ignore_ascii_case(p))
    {
        String::new()
    } else {
        value.to_string()
    }
}

/// One publishable unit: a social post joined with its article and image.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub article_id: ArticleId,
    pub date: String,
    pub platform: Platform,
    pub title: String,
    pub content: String,
    pub link: String,
    pub source: String,
    pub image_path: String,
    pub image_attribution: String,
    pub drive_image_url: String,
    pub word_count: Option<u32>,
    pub last_updated: String,
}

impl ExportRow {
    /// Build a row with empty image and publish columns.
    pub fn from_post(post: &SocialPost) -> Self {
        Self {
            article_id: post.article_id.clone(),
            date: post.date.format("%Y-%m-%d").to_string(),
            platform: post.platform,
            title: post.title.clone(),
            content: post.text.clone(),
            link: post.link.clone(),
            source: post.source.clone(),
            image_path: String::new(),
            image_attribution: String::new(),
            drive_image_url: String::new(),
            word_count: post.word_count,
            last_updated: String::new(),
        }
    }

    /// Cells in [`EXPORT_COLUMNS`] order, sanitized.
    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.article_id.to_string(),
            sanitize_cell(&self.date),
            self.platform.to_string(),
            sanitize_cell(&self.title),
            sanitize_cell(&self.content),
            sanitize_cell(&self.link),
            sanitize_cell(&self.source),
            sanitize_cell(&self.image_path),
            sanitize_cell(&self.image_attribution),
            sanitize_cell(&self.drive_image_url),
            self.word_count.map(|n| n.to_string()).unwrap_or_default(),
            sanitize_cell(&self.last_updated),
        ]
    }

    /// Parse cells in [`EXPORT_COLUMNS`] order. Placeholder or non-numeric
    /// `WordCount` values read back as missing.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let cells: Vec<String> = fields.into_iter().map(sanitize_cell).collect();
        if cells.len() != EXPORT_COLUMNS.len() {
            return Err(FeedpressError::parse(format!(
                "export row has {} cells, expected {}",
                cells.len(),
                EXPORT_COLUMNS.len()
            )));
        }
        if cells[0].is_empty() {
            return Err(FeedpressError::parse("export row without ArticleId"));
        }

        let mut cells = cells.into_iter();
        let mut next = || cells.next().unwrap_or_default();

        Ok(Self {
            article_id: ArticleId(next()),
            date: next(),
            platform: next().parse()?,
            title: next(),
            content: next(),
            link: next(),
            source: next(),
            image_path: next(),
            image_attribution: next(),
            drive_image_url: next(),
            word_count: next().trim().parse().ok(),
            last_updated: next(),
        })
    }
}

// ---------------------------------------------------------------------------
// History records
// ---------------------------------------------------------------------------

/// Entry of the processed-articles history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedArticleRecord {
    pub article_id: ArticleId,
    /// Normalized article URL.
    pub url: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Entry of the published-posts log: one successful spreadsheet write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPostRecord {
    pub article_id: ArticleId,
    pub platform: Platform,
    pub tab: String,
    /// 1-based spreadsheet row the post was written to.
    pub row: usize,
    pub content_hash: String,
    pub content: String,
    pub published_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ArticleState
// ---------------------------------------------------------------------------

/// Per-article progress through the pipeline, tracked in the run ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArticleState {
    Fetched,
    SkippedDuplicate,
    DedupedIn,
    Enhanced,
    Socialized,
    Exported,
    Published,
}

impl ArticleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::SkippedDuplicate => "skipped-duplicate",
            Self::DedupedIn => "deduped-in",
            Self::Enhanced => "enhanced",
            Self::Socialized => "socialized",
            Self::Exported => "exported",
            Self::Published => "published",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SkippedDuplicate | Self::Published)
    }
}

impl std::fmt::Display for ArticleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
