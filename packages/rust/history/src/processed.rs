//! Processed-articles history: the dedupe gate in front of enhancement.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use feedpress_shared::{Article, ArticleId, ProcessedArticleRecord, Result, normalize_url};
use tracing::{debug, info};

/// Persisted set of processed articles, looked up by id or normalized URL.
#[derive(Debug, Default)]
pub struct ProcessedHistory {
    records: Vec<ProcessedArticleRecord>,
    ids: HashSet<ArticleId>,
    urls: HashSet<String>,
}

/// Result of splitting a fetched batch against history.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    /// Articles never seen before, in input order.
    pub unseen: Vec<Article>,
    /// Articles already in history.
    pub seen: Vec<ArticleId>,
    /// Repeats within the batch or entries with neither URL nor GUID.
    pub dropped: usize,
}

impl ProcessedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; missing or corrupt files give an empty history.
    pub fn load(path: &Path) -> Result<Self> {
        let records: Vec<ProcessedArticleRecord> = super::load_records(path)?;
        let mut history = Self::new();
        for record in records {
            history.insert(record);
        }
        debug!(path = %path.display(), records = history.len(), "loaded processed history");
        Ok(history)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        super::save_records(path, &self.records)
    }

    fn insert(&mut self, record: ProcessedArticleRecord) -> bool {
        if self.ids.contains(&record.article_id) {
            return false;
        }
        self.ids.insert(record.article_id.clone());
        if !record.url.is_empty() {
            self.urls.insert(normalize_url(&record.url));
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ProcessedArticleRecord] {
        &self.records
    }

    pub fn contains(&self, id: &ArticleId) -> bool {
        self.ids.contains(id)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        !url.trim().is_empty() && self.urls.contains(&normalize_url(url))
    }

    /// Whether `article` was processed before, by id or by URL.
    pub fn has_seen(&self, article: &Article) -> bool {
        self.contains(&article.id) || self.contains_url(&article.url)
    }

    /// Split `articles` into unseen and seen. Duplicates inside the batch
    /// keep their first occurrence.
    pub fn filter_unseen(&self, articles: Vec<Article>) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut batch_ids = HashSet::new();

        for article in articles {
            if article.locator().is_none() {
                debug!(title = %article.title, "dropping entry without URL or GUID");
                outcome.dropped += 1;
                continue;
            }
            if !batch_ids.insert(article.id.clone()) {
                outcome.dropped += 1;
                continue;
            }
            if self.has_seen(&article) {
                outcome.seen.push(article.id);
            } else {
                outcome.unseen.push(article);
            }
        }

        outcome
    }

    /// Add an article. Returns `false` if it was already present, so repeated
    /// commits never grow the history.
    pub fn record(&mut self, article_id: ArticleId, url: &str, at: DateTime<Utc>) -> bool {
        self.insert(ProcessedArticleRecord {
            article_id,
            url: normalize_url(url),
            first_seen_at: at,
        })
    }

    /// Drop records older than `retention_days`. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: u32) -> usize {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let before = self.records.len();
        let kept: Vec<_> = self
            .records
            .drain(..)
            .filter(|r| r.first_seen_at >= cutoff)
            .collect();

        self.ids.clear();
        self.urls.clear();
        for record in kept {
            self.insert(record);
        }

        let removed = before - self.records.len();
        if removed > 0 {
            info!(removed, retention_days, "pruned processed history");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("feedpress_hist_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn article(url: &str) -> Article {
        Article {
            id: ArticleId::derive("https://feed.example/rss", url),
            title: format!("Story at {url}"),
            source: "Feed".into(),
            feed_url: "https://feed.example/rss".into(),
            url: url.into(),
            guid: None,
            published_at: Utc::now(),
            raw_summary: String::new(),
            ai_generated: false,
            topic: None,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let path = temp_path("processed.json");
        let history = ProcessedHistory::load(&path).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let path = temp_path("processed.json");
        std::fs::write(&path, "{\"schema_version\": 1, \"records\": [oops").unwrap();
        let history = ProcessedHistory::load(&path).unwrap();
        assert!(history.is_empty());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn record_is_idempotent() {
        let mut history = ProcessedHistory::new();
        let a = article("https://example.com/abc123");
        assert!(history.record(a.id.clone(), &a.url, Utc::now()));
        assert!(!history.record(a.id.clone(), &a.url, Utc::now()));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn filter_excludes_history_and_batch_repeats() {
        let mut history = ProcessedHistory::new();
        let old = article("https://example.com/old");
        history.record(old.id.clone(), &old.url, Utc::now());

        let fresh = article("https://example.com/new");
        let mut no_locator = article("https://example.com/x");
        no_locator.url = String::new();

        let outcome = history.filter_unseen(vec![
            old.clone(),
            fresh.clone(),
            fresh.clone(),
            no_locator,
        ]);
        assert_eq!(outcome.unseen.len(), 1);
        assert_eq!(outcome.unseen[0].id, fresh.id);
        assert_eq!(outcome.seen, vec![old.id]);
        assert_eq!(outcome.dropped, 2);
    }

    #[test]
    fn guid_only_entries_are_kept_and_deduped_by_id() {
        let mut guid_only = article("https://example.com/unused");
        guid_only.url = String::new();
        guid_only.guid = Some("pr-2000".into());
        guid_only.id = ArticleId::derive("https://feed.example/rss", "pr-2000");

        let mut history = ProcessedHistory::new();
        let outcome = history.filter_unseen(vec![guid_only.clone()]);
        assert_eq!(outcome.unseen.len(), 1);
        assert_eq!(outcome.dropped, 0);

        history.record(guid_only.id.clone(), &guid_only.url, Utc::now());
        let mut other = guid_only.clone();
        other.guid = Some("pr-2001".into());
        other.id = ArticleId::derive("https://feed.example/rss", "pr-2001");

        let outcome = history.filter_unseen(vec![guid_only.clone(), other.clone()]);
        assert_eq!(outcome.seen, vec![guid_only.id]);
        assert_eq!(outcome.unseen.len(), 1);
        assert_eq!(outcome.unseen[0].id, other.id);
    }

    #[test]
    fn url_match_catches_story_from_another_feed() {
        let mut history = ProcessedHistory::new();
        let a = article("https://example.com/story");
        history.record(a.id.clone(), &a.url, Utc::now());

        let mut syndicated = article("https://EXAMPLE.com/story/?utm_source=x");
        syndicated.id = ArticleId::derive("https://other.example/rss", &syndicated.url);
        assert_ne!(syndicated.id, a.id);
        assert!(history.has_seen(&syndicated));
    }

    #[test]
    fn save_then_load_keeps_records_and_dedupes_twice() {
        let path = temp_path("processed.json");
        let a = article("https://example.com/abc123");

        for _ in 0..2 {
            let mut history = ProcessedHistory::load(&path).unwrap();
            history.record(a.id.clone(), &a.url, Utc::now());
            history.save(&path).unwrap();
        }

        let history = ProcessedHistory::load(&path).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history.filter_unseen(vec![a]).unseen.is_empty());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn prune_drops_old_records() {
        let now = Utc::now();
        let mut history = ProcessedHistory::new();
        let old = article("https://example.com/old");
        let recent = article("https://example.com/recent");
        history.record(old.id.clone(), &old.url, now - Duration::days(45));
        history.record(recent.id.clone(), &recent.url, now - Duration::days(2));

        assert_eq!(history.prune(now, 30), 1);
        assert!(!history.contains(&old.id));
        assert!(!history.contains_url(&old.url));
        assert!(history.contains(&recent.id));
    }
}
