//! Workspace layout and the per-day run ledger.
//!
//! Stages never talk to each other directly: each one reads the artifacts
//! the previous stage wrote under the workspace root and writes its own.
//! The ledger records how far every article of the day has progressed so the
//! `commit` stage knows what may enter the processed history.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use feedpress_shared::{
    Article, ArticleId, ArticleState, FeedpressError, Result, read_json, write_json_atomic,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Paths of every artifact for one run date.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    date: NaiveDate,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            date,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// `YYYY-MM-DD`, as used in artifact names.
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Create the artifact directories. Failure here is fatal for a run.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in ["articles", "formatted", "exports", "images", "indexes"] {
            let path = self.root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| FeedpressError::io(&path, e))?;
        }
        Ok(())
    }

    pub fn latest_articles(&self) -> PathBuf {
        self.root.join("articles").join("latest_articles.json")
    }

    pub fn unseen_articles(&self) -> PathBuf {
        self.root.join("articles").join("unseen_articles.json")
    }

    pub fn enhanced_articles(&self) -> PathBuf {
        self.root.join("articles").join("enhanced_articles.json")
    }

    pub fn processed_history(&self) -> PathBuf {
        self.root
            .join("articles")
            .join("processed_articles_history.json")
    }

    pub fn published_history(&self) -> PathBuf {
        self.root
            .join("articles")
            .join("published_posts_history.json")
    }

    pub fn run_state(&self) -> PathBuf {
        self.root
            .join("articles")
            .join(format!("run_state_{}.json", self.date_str()))
    }

    pub fn social_posts(&self) -> PathBuf {
        self.root
            .join("formatted")
            .join(format!("social_posts_{}.json", self.date_str()))
    }

    pub fn export_csv(&self) -> PathBuf {
        self.root
            .join("exports")
            .join(format!("social_content_{}.csv", self.date_str()))
    }

    pub fn upload_marker(&self) -> PathBuf {
        self.root
            .join("exports")
            .join(format!("upload_complete_{}.txt", self.date_str()))
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Path of an article's image, relative to the workspace root. This is
    /// what goes into the `ImagePath` column.
    pub fn image_rel_path(id: &ArticleId) -> String {
        format!("images/{id}.jpg")
    }

    /// Resolve a workspace-relative path such as an `ImagePath` cell.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn database(&self) -> PathBuf {
        self.root.join("indexes").join("feedpress.db")
    }
}

/// Read the artifact a previous stage produced. A missing file is reported as
/// a validation error naming the stage to run first.
pub fn read_stage_input<T: DeserializeOwned>(path: &Path, producer: &str) -> Result<T> {
    match std::fs::metadata(path) {
        Ok(_) => read_json(path),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(FeedpressError::validation(format!(
            "{} not found; run `feedpress {producer}` first",
            path.display()
        ))),
        Err(e) => Err(FeedpressError::io(path, e)),
    }
}

// ---------------------------------------------------------------------------
// Run ledger
// ---------------------------------------------------------------------------

/// Ledger line for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub state: ArticleState,
    pub title: String,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

/// How far each article of the day got. States only move forward, and
/// terminal states never change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLedger {
    #[serde(default)]
    articles: BTreeMap<ArticleId, LedgerEntry>,
}

impl RunLedger {
    /// Load the ledger at `path`. Missing or corrupt files start a fresh one.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(ledger) => Ok(ledger),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "run ledger unreadable, starting fresh"
                    );
                    Ok(Self::default())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(FeedpressError::io(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&ArticleId, &LedgerEntry)> {
        self.articles.iter()
    }

    /// Move `article` to `state`, adding it if unknown. Returns whether the
    /// ledger changed.
    ///
    /// `skipped-duplicate` only applies to articles that have not been let
    /// through dedupe yet; every other state must be ahead of the current one.
    pub fn advance(&mut self, article: &Article, state: ArticleState, at: DateTime<Utc>) -> bool {
        if !self.articles.contains_key(&article.id) {
            self.articles.insert(
                article.id.clone(),
                LedgerEntry {
                    state,
                    title: article.title.clone(),
                    url: article.url.clone(),
                    updated_at: at,
                },
            );
            return true;
        }
        self.advance_id(&article.id, state, at)
    }

    /// Like [`advance`](Self::advance) for an article already in the ledger.
    /// Unknown ids are ignored.
    pub fn advance_id(&mut self, id: &ArticleId, state: ArticleState, at: DateTime<Utc>) -> bool {
        let Some(entry) = self.articles.get_mut(id) else {
            return false;
        };
        let allowed = if entry.state.is_terminal() {
            false
        } else if state == ArticleState::SkippedDuplicate {
            entry.state == ArticleState::Fetched
        } else {
            state > entry.state
        };
        if allowed {
            debug!(%id, from = %entry.state, to = %state, "ledger advance");
            entry.state = state;
            entry.updated_at = at;
        }
        allowed
    }

    /// Number of articles per state, in pipeline order.
    pub fn counts(&self) -> BTreeMap<ArticleState, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.articles.values() {
            *counts.entry(entry.state).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("feedpress_ws_{}", uuid::Uuid::now_v7()))
    }

    fn article(id: &str) -> Article {
        Article {
            id: ArticleId::from(id),
            title: format!("Title {id}"),
            source: "Property Reporter".into(),
            feed_url: "https://feeds.example/rss".into(),
            url: format!("https://news.example/{id}"),
            guid: None,
            published_at: Utc.with_ymd_and_hms(2025, 3, 14, 7, 0, 0).unwrap(),
            raw_summary: "summary".into(),
            ai_generated: false,
            topic: None,
        }
    }

    fn state_of(ledger: &RunLedger, id: &ArticleId) -> Option<ArticleState> {
        ledger.entries().find(|(k, _)| *k == id).map(|(_, e)| e.state)
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn paths_are_dated() {
        let ws = Workspace::new("/data", NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        assert_eq!(
            ws.export_csv(),
            PathBuf::from("/data/exports/social_content_2025-03-14.csv")
        );
        assert_eq!(
            ws.social_posts(),
            PathBuf::from("/data/formatted/social_posts_2025-03-14.json")
        );
        assert_eq!(
            ws.upload_marker(),
            PathBuf::from("/data/exports/upload_complete_2025-03-14.txt")
        );
        assert_eq!(
            Workspace::image_rel_path(&ArticleId::from("abc123")),
            "images/abc123.jpg"
        );
    }

    #[test]
    fn missing_stage_input_names_producer() {
        let root = temp_root();
        let ws = Workspace::new(&root, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        let err = read_stage_input::<Vec<Article>>(&ws.unseen_articles(), "dedupe").unwrap_err();
        assert!(matches!(err, FeedpressError::Validation { .. }));
        assert!(err.to_string().contains("feedpress dedupe"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn ledger_only_moves_forward() {
        let mut ledger = RunLedger::default();
        let a = article("a1");

        assert!(ledger.advance(&a, ArticleState::Fetched, at()));
        assert!(ledger.advance(&a, ArticleState::DedupedIn, at()));
        assert!(ledger.advance(&a, ArticleState::Exported, at()));
        assert!(!ledger.advance(&a, ArticleState::Enhanced, at()));
        assert!(!ledger.advance(&a, ArticleState::SkippedDuplicate, at()));
        assert_eq!(state_of(&ledger, &a.id), Some(ArticleState::Exported));

        assert!(ledger.advance(&a, ArticleState::Published, at()));
        assert!(!ledger.advance(&a, ArticleState::Fetched, at()));
        assert_eq!(state_of(&ledger, &a.id), Some(ArticleState::Published));
    }

    #[test]
    fn skipped_duplicate_is_terminal() {
        let mut ledger = RunLedger::default();
        let a = article("a1");
        ledger.advance(&a, ArticleState::Fetched, at());
        assert!(ledger.advance(&a, ArticleState::SkippedDuplicate, at()));
        assert!(!ledger.advance(&a, ArticleState::DedupedIn, at()));
        assert_eq!(state_of(&ledger, &a.id), Some(ArticleState::SkippedDuplicate));
    }

    #[test]
    fn ledger_roundtrips_and_tolerates_corruption() {
        let root = temp_root();
        let ws = Workspace::new(&root, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());

        let mut ledger = RunLedger::default();
        ledger.advance(&article("a1"), ArticleState::Enhanced, at());
        ledger.advance(&article("a2"), ArticleState::Fetched, at());
        ledger.save(&ws.run_state()).unwrap();

        let loaded = RunLedger::load(&ws.run_state()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.counts()[&ArticleState::Enhanced], 1);
        assert_eq!(loaded.counts()[&ArticleState::Fetched], 1);

        std::fs::write(ws.run_state(), b"{not json").unwrap();
        assert!(RunLedger::load(&ws.run_state()).unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }
}
