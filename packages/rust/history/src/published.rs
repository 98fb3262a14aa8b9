//! Published-posts log: what has already been written to the spreadsheet.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use feedpress_shared::{ArticleId, Platform, PublishedPostRecord, Result};
use tracing::debug;

/// Append-only log of successful spreadsheet writes.
#[derive(Debug, Default)]
pub struct PublishedLog {
    records: Vec<PublishedPostRecord>,
}

impl PublishedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; missing or corrupt files give an empty log.
    pub fn load(path: &Path) -> Result<Self> {
        let records = super::load_records(path)?;
        let log = Self { records };
        debug!(path = %path.display(), records = log.len(), "loaded published log");
        Ok(log)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        super::save_records(path, &self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PublishedPostRecord] {
        &self.records
    }

    pub fn append(&mut self, record: PublishedPostRecord) {
        self.records.push(record);
    }

    /// Whether this exact content was already written for this key.
    pub fn contains(&self, article_id: &ArticleId, platform: Platform, content_hash: &str) -> bool {
        self.records.iter().any(|r| {
            &r.article_id == article_id && r.platform == platform && r.content_hash == content_hash
        })
    }

    /// First published post (under a different key) whose word overlap with
    /// `text` reaches `threshold`. Posts for the same key are updates, not
    /// repeats, and are ignored.
    pub fn find_similar(
        &self,
        article_id: &ArticleId,
        platform: Platform,
        text: &str,
        threshold: f64,
    ) -> Option<&PublishedPostRecord> {
        self.records
            .iter()
            .filter(|r| !(&r.article_id == article_id && r.platform == platform))
            .find(|r| jaccard_similarity(&r.content, text) >= threshold)
    }

    /// Drop records older than `retention_days`. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: u32) -> usize {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let before = self.records.len();
        self.records.retain(|r| r.published_at >= cutoff);
        before - self.records.len()
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of the lowercase word sets of `a` and `b`.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedpress_shared::content_hash;

    fn record(id: &str, platform: Platform, content: &str) -> PublishedPostRecord {
        PublishedPostRecord {
            article_id: ArticleId::from(id),
            platform,
            tab: platform.tab_name(),
            row: 2,
            content_hash: content_hash(content),
            content: content.into(),
            published_at: Utc::now(),
        }
    }

    #[test]
    fn jaccard_basics() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert_eq!(jaccard_similarity("", ""), 0.0);
        assert!((jaccard_similarity("Rents rise, again!", "rents rise") - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn contains_matches_key_and_hash() {
        let mut log = PublishedLog::new();
        log.append(record("abc123", Platform::LinkedIn, "Rents rise again"));

        let id = ArticleId::from("abc123");
        assert!(log.contains(&id, Platform::LinkedIn, &content_hash("rents  rise again")));
        assert!(!log.contains(&id, Platform::Twitter, &content_hash("Rents rise again")));
        assert!(!log.contains(&id, Platform::LinkedIn, &content_hash("Rents fall")));
    }

    #[test]
    fn similar_post_under_other_key_is_found() {
        let mut log = PublishedLog::new();
        log.append(record(
            "old",
            Platform::Twitter,
            "Rents rise again across the UK this spring",
        ));

        let hit = log.find_similar(
            &ArticleId::from("new"),
            Platform::Twitter,
            "Rents rise again across the UK this spring!",
            0.8,
        );
        assert!(hit.is_some());

        let same_key = log.find_similar(
            &ArticleId::from("old"),
            Platform::Twitter,
            "Rents rise again across the UK this spring",
            0.8,
        );
        assert!(same_key.is_none());

        let unrelated = log.find_similar(
            &ArticleId::from("new"),
            Platform::Twitter,
            "Mortgage approvals fall to a two year low",
            0.8,
        );
        assert!(unrelated.is_none());
    }

    #[test]
    fn save_and_reload() {
        let dir = std::env::temp_dir().join(format!("feedpress_pub_{}", uuid::Uuid::now_v7()));
        let path = dir.join("published.json");
        let mut log = PublishedLog::load(&path).unwrap();
        log.append(record("abc123", Platform::Instagram, "Hello"));
        log.save(&path).unwrap();

        let reloaded = PublishedLog::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].row, 2);
        assert!(reloaded.contains(
            &ArticleId::from("abc123"),
            Platform::Instagram,
            &content_hash("Hello")
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn prune_by_age() {
        let mut log = PublishedLog::new();
        let mut old = record("old", Platform::LinkedIn, "x");
        old.published_at = Utc::now() - Duration::days(60);
        log.append(old);
        log.append(record("new", Platform::LinkedIn, "y"));
        assert_eq!(log.prune(Utc::now(), 30), 1);
        assert_eq!(log.len(), 1);
    }
}
