//! End-to-end run orchestration.
//!
//! `run_pipeline` drives every stage in order against one dated workspace:
//! fetch → dedupe → enhance → social → export → images → publish → commit.
//!
//! Stage failures are recorded in the [`RunReport`] and the run carries on
//! with whatever artifacts exist; only an unusable working directory aborts.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use feedpress_clients::{
    GoogleDriveClient, GoogleSheetsClient, ImageHost, ImageSearch, OpenAiGenerator,
    SpreadsheetApi, TextGenerator, UnsplashClient,
};
use feedpress_history::{ProcessedHistory, PublishedLog};
use feedpress_shared::{AppConfig, Result};
use feedpress_storage::{CacheStats, RunRecord, Storage};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::artifacts::{RunLedger, Workspace};
use crate::commit::CommitStats;
use crate::export::read_csv;
use crate::images::ImageStats;
use crate::stages::{
    self, DedupeSummary, EnhanceSummary, ExportSummary, FetchSummary, PublishSummary,
    SocialSummary, StageContext,
};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for pipeline operations.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn phase(&self, message: &str);

    /// Called after each article is processed by a per-article stage.
    fn article_done(&self, current: usize, total: usize, title: &str);

    /// Called once at the end with a one-line outcome.
    fn done(&self, message: &str);
}

/// A no-op progress reporter for non-interactive use.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _message: &str) {}
    fn article_done(&self, _current: usize, _total: usize, _title: &str) {}
    fn done(&self, _message: &str) {}
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// External collaborators. `None` means unavailable (disabled in config or
/// missing credentials); the stages that need them are skipped.
#[derive(Default)]
pub struct Services {
    pub generator: Option<Box<dyn TextGenerator>>,
    pub images: Option<Box<dyn ImageSearch>>,
    pub sheets: Option<Box<dyn SpreadsheetApi>>,
    pub host: Option<Box<dyn ImageHost>>,
}

impl Services {
    /// Build the real HTTP clients. Missing credentials are logged, not fatal.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut services = Self::default();

        match OpenAiGenerator::from_config(&config.openai) {
            Ok(client) => services.generator = Some(Box::new(client)),
            Err(e) => warn!(error = %e, "language generation unavailable"),
        }

        if config.images.enabled {
            match UnsplashClient::from_config(&config.images) {
                Ok(client) => services.images = Some(Box::new(client)),
                Err(e) => warn!(error = %e, "image search unavailable"),
            }
        }

        if config.sheets.enabled {
            match GoogleSheetsClient::from_config(&config.sheets) {
                Ok(client) => services.sheets = Some(Box::new(client)),
                Err(e) => warn!(error = %e, "spreadsheet unavailable"),
            }
            match GoogleDriveClient::from_config(&config.drive) {
                Ok(client) => services.host = Some(Box::new(client)),
                Err(e) => warn!(error = %e, "image host unavailable, rows will carry no image URL"),
            }
        }

        services
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Outcome of a full run. Stored as the run's stats in the journal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: Option<String>,
    pub date: String,
    pub fetch: Option<FetchSummary>,
    pub dedupe: Option<DedupeSummary>,
    pub enhance: Option<EnhanceSummary>,
    pub social: Option<SocialSummary>,
    pub export: Option<ExportSummary>,
    pub images: Option<ImageStats>,
    pub publish: Option<PublishSummary>,
    pub commit: Option<CommitStats>,
    /// One line per failed stage. Empty means the run succeeded.
    pub failures: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn status(&self) -> &'static str {
        if self.succeeded() { "succeeded" } else { "failed" }
    }

    /// Keep a stage's result, or record its failure. Fatal errors propagate.
    fn absorb<T>(&mut self, stage: &str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => {
                error!(stage, error = %e, "fatal stage failure");
                Err(e)
            }
            Err(e) => {
                warn!(stage, error = %e, "stage failed");
                self.failures.push(format!("{stage}: {e}"));
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Run every stage for `workspace`'s date.
#[instrument(skip_all, fields(date = %workspace.date()))]
pub async fn run_pipeline(
    config: &AppConfig,
    workspace: &Workspace,
    services: &Services,
    progress: &dyn ProgressReporter,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let start = Instant::now();
    let mut report = RunReport {
        date: workspace.date_str(),
        ..RunReport::default()
    };

    workspace.ensure_dirs()?;
    let ctx = StageContext {
        config,
        workspace,
        now,
    };

    let storage = match Storage::open(&workspace.database()).await {
        Ok(storage) => Some(storage),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "storage unavailable, running without cache or journal");
            None
        }
    };
    if let Some(storage) = &storage {
        match storage.insert_run(&report.date).await {
            Ok(id) => report.run_id = Some(id),
            Err(e) => warn!(error = %e, "failed to journal run start"),
        }
    }

    // --- Phase 1: Fetch ---
    progress.phase("Fetching feeds");
    report.fetch = report.absorb("fetch", stages::fetch(ctx).await)?;
    let mut content_ok = report.fetch.is_some();

    // --- Phase 2: Dedupe ---
    if content_ok {
        progress.phase("Filtering previously processed articles");
        report.dedupe = report.absorb("dedupe", stages::dedupe(ctx).await)?;
        content_ok = report.dedupe.is_some();
    }

    // --- Phase 3: Enhance (+ top-up) ---
    if content_ok {
        progress.phase("Enhancing articles");
        let result = stages::enhance(
            ctx,
            services.generator.as_deref(),
            storage.as_ref(),
            progress,
        )
        .await;
        report.enhance = report.absorb("enhance", result)?;
        content_ok = report.enhance.is_some();
    }

    // --- Phase 4: Social copy ---
    if content_ok {
        progress.phase("Writing social copy");
        report.social = report.absorb("social", stages::social(ctx).await)?;
        content_ok = report.social.is_some();
    }

    // --- Phase 5: Export ---
    if content_ok {
        progress.phase("Assembling export");
        report.export = report.absorb("export", stages::export(ctx).await)?;
        content_ok = report.export.is_some();
    }

    // --- Phase 6: Images ---
    if content_ok && config.images.enabled {
        match services.images.as_deref() {
            Some(search) => {
                progress.phase("Attaching images");
                report.images = report.absorb("images", stages::images(ctx, search).await)?;
            }
            None => warn!("image search unavailable, exporting without images"),
        }
    }

    // --- Phase 7: Publish ---
    if content_ok && config.sheets.enabled {
        match services.sheets.as_deref() {
            Some(sheets) => {
                progress.phase("Publishing to spreadsheet");
                let result = stages::publish(ctx, sheets, services.host.as_deref()).await;
                report.publish = report.absorb("publish", result)?;
                if let Some(publish) = &report.publish {
                    if publish.stats.failed > 0 {
                        report
                            .failures
                            .push(format!("publish: {} rows not written", publish.stats.failed));
                    }
                }
            }
            None => report
                .failures
                .push("publish: spreadsheet client unavailable".to_string()),
        }
    }

    // --- Phase 8: Commit ---
    progress.phase("Committing history");
    report.commit = report.absorb("commit", stages::commit(ctx).await)?;

    report.elapsed_ms = start.elapsed().as_millis() as u64;

    if let (Some(storage), Some(run_id)) = (&storage, &report.run_id) {
        let stats = serde_json::to_string(&report).unwrap_or_default();
        if let Err(e) = storage.finish_run(run_id, report.status(), &stats).await {
            warn!(error = %e, "failed to journal run end");
        }
    }

    info!(
        status = report.status(),
        failures = report.failures.len(),
        elapsed_ms = report.elapsed_ms,
        "run complete"
    );
    progress.done(&format!(
        "Run {} ({} failures)",
        report.status(),
        report.failures.len()
    ));
    Ok(report)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Snapshot of a workspace for `feedpress status`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStatus {
    pub date: String,
    /// Articles per ledger state for the date.
    pub ledger: BTreeMap<String, usize>,
    pub processed_history: usize,
    pub published_posts: usize,
    pub export_rows: Option<usize>,
    pub upload_complete: bool,
    pub generation_cache: Option<CacheStats>,
    pub recent_runs: Vec<RunRecord>,
}

/// Read-only summary of the workspace. A missing database just means no
/// runs have been journaled yet.
pub async fn workspace_status(workspace: &Workspace, run_limit: u32) -> Result<WorkspaceStatus> {
    let ledger = RunLedger::load(&workspace.run_state())?;
    let history = ProcessedHistory::load(&workspace.processed_history())?;
    let published = PublishedLog::load(&workspace.published_history())?;

    let export_csv = workspace.export_csv();
    let export_rows = if export_csv.exists() {
        read_csv(&export_csv).ok().map(|rows| rows.len())
    } else {
        None
    };

    let (generation_cache, recent_runs) = match Storage::open_readonly(&workspace.database()).await
    {
        Ok(storage) => (
            storage.generation_cache_stats().await.ok(),
            storage.recent_runs(run_limit).await.unwrap_or_default(),
        ),
        Err(_) => (None, Vec::new()),
    };

    Ok(WorkspaceStatus {
        date: workspace.date_str(),
        ledger: ledger
            .counts()
            .into_iter()
            .map(|(state, n)| (state.to_string(), n))
            .collect(),
        processed_history: history.len(),
        published_posts: published.len(),
        export_rows,
        upload_complete: workspace.upload_marker().exists(),
        generation_cache,
        recent_runs,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use feedpress_clients::{Generation, ImageHit, Prompt};
    use feedpress_shared::{ArticleState, EXPORT_COLUMNS, FeedpressError};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct FakeGenerator;

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        fn model(&self) -> &str {
            "fake"
        }

        async fn generate(&self, prompt: &Prompt) -> Result<Generation> {
            let text = if prompt.user.contains("topic: ") {
                r#"{"title": "Generated market briefing", "summary": "A short summary.",
                    "body": "Generated body for investors."}"#
            } else {
                r#"{"summary": "Rewritten summary of the news.",
                    "body": "A rewritten article body of several words."}"#
            };
            Ok(Generation {
                text: text.to_string(),
                tokens_in: 1,
                tokens_out: 1,
            })
        }
    }

    struct FakeSearch;

    #[async_trait]
    impl ImageSearch for FakeSearch {
        async fn search(&self, _query: &str) -> Result<Option<ImageHit>> {
            Ok(Some(ImageHit {
                id: "photo".into(),
                url: "https://images.example/photo.jpg".into(),
                photographer: "Jane Doe".into(),
                attribution: "Photo by Jane Doe on Unsplash".into(),
            }))
        }

        async fn download(&self, _hit: &ImageHit) -> Result<Vec<u8>> {
            Ok(vec![0xFF, 0xD8, 0xFF])
        }
    }

    #[derive(Default)]
    struct FakeSheets {
        tabs: Mutex<HashMap<String, Vec<Vec<String>>>>,
    }

    impl FakeSheets {
        fn keys(&self, tab: &str) -> Vec<String> {
            self.tabs
                .lock()
                .unwrap()
                .get(tab)
                .map(|rows| rows.iter().map(|r| r[0].clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl SpreadsheetApi for FakeSheets {
        async fn list_tabs(&self) -> Result<Vec<String>> {
            Ok(self.tabs.lock().unwrap().keys().cloned().collect())
        }

        async fn add_tab(&self, title: &str) -> Result<()> {
            self.tabs.lock().unwrap().insert(title.to_string(), Vec::new());
            Ok(())
        }

        async fn read_column(&self, tab: &str, _column: &str) -> Result<Vec<String>> {
            Ok(self.keys(tab))
        }

        async fn write_row(&self, tab: &str, row: usize, cells: &[String]) -> Result<()> {
            let mut tabs = self.tabs.lock().unwrap();
            let rows = tabs
                .get_mut(tab)
                .ok_or_else(|| FeedpressError::publish(format!("no tab {tab}")))?;
            if rows.len() < row {
                rows.resize(row, vec![String::new()]);
            }
            rows[row - 1] = cells.to_vec();
            Ok(())
        }
    }

    async fn feed_server() -> MockServer {
        let server = MockServer::start().await;
        for (route, fixture) in [
            ("/rss", "../../../fixtures/feeds/property-news.rss.xml"),
            ("/atom", "../../../fixtures/feeds/housing.atom.xml"),
        ] {
            let body = std::fs::read_to_string(fixture).unwrap();
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }
        server
    }

    fn config(server: &MockServer, min_articles: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.feeds.urls = vec![format!("{}/rss", server.uri()), format!("{}/atom", server.uri())];
        config.generation.min_articles = min_articles;
        config.social.posts_per_platform = 0;
        config.retry.generation.initial_backoff_ms = 1;
        config.retry.publish.initial_backoff_ms = 1;
        config
    }

    fn workspace() -> Workspace {
        let root = std::env::temp_dir().join(format!("feedpress_run_{}", uuid::Uuid::now_v7()));
        Workspace::new(root, NaiveDate::from_ymd_opt(2025, 3, 14).unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    fn services(sheets: FakeSheets) -> Services {
        Services {
            generator: Some(Box::new(FakeGenerator)),
            images: Some(Box::new(FakeSearch)),
            sheets: Some(Box::new(sheets)),
            host: None,
        }
    }

    #[tokio::test]
    async fn full_run_tops_up_publishes_and_commits() {
        let server = feed_server().await;
        let config = config(&server, 6);
        let ws = workspace();

        let services = services(FakeSheets::default());
        let report = run_pipeline(&config, &ws, &services, &SilentProgress, now())
            .await
            .unwrap();

        assert!(report.succeeded(), "failures: {:?}", report.failures);
        assert_eq!(report.fetch.as_ref().unwrap().fetched, 4);
        assert_eq!(report.enhance.as_ref().unwrap().topped_up, 2);
        assert_eq!(report.social.as_ref().unwrap().posts, 6);
        assert_eq!(report.export.as_ref().unwrap().rows, 6);
        assert_eq!(report.images.as_ref().unwrap().attached, 6);
        assert_eq!(report.publish.as_ref().unwrap().stats.appended, 6);
        assert_eq!(report.commit.as_ref().unwrap().committed, 6);

        let header = std::fs::read_to_string(ws.export_csv()).unwrap();
        assert!(header.starts_with(&EXPORT_COLUMNS.join(",")));
        assert!(ws.upload_marker().exists());

        let ledger = RunLedger::load(&ws.run_state()).unwrap();
        assert_eq!(ledger.counts()[&ArticleState::Published], 6);

        let status = workspace_status(&ws, 5).await.unwrap();
        assert_eq!(status.processed_history, 6);
        assert_eq!(status.recent_runs.len(), 1);
        assert_eq!(status.recent_runs[0].status, "succeeded");
        let cache = status.generation_cache.unwrap();
        assert!(cache.entries > 0);
        assert_eq!(cache.hits, 0);

        let _ = std::fs::remove_dir_all(ws.root());
    }

    #[tokio::test]
    async fn second_run_publishes_nothing_new() {
        let server = feed_server().await;
        let config = config(&server, 0);
        let ws = workspace();
        let services = services(FakeSheets::default());

        let first = run_pipeline(&config, &ws, &services, &SilentProgress, now()).await.unwrap();
        assert_eq!(first.export.as_ref().unwrap().rows, 4);
        let history_size = ProcessedHistory::load(&ws.processed_history()).unwrap().len();

        let second = run_pipeline(&config, &ws, &services, &SilentProgress, now()).await.unwrap();
        assert!(second.succeeded(), "failures: {:?}", second.failures);
        assert_eq!(second.dedupe.as_ref().unwrap().unseen, 0);
        assert_eq!(second.dedupe.as_ref().unwrap().seen, 4);
        assert_eq!(second.export.as_ref().unwrap().rows, 0);
        assert_eq!(second.export.as_ref().unwrap().kept, 4);
        assert_eq!(second.publish.as_ref().unwrap().stats.written(), 0);
        assert_eq!(second.publish.as_ref().unwrap().stats.unchanged, 4);

        // The re-run must not clobber the day's export or its marker.
        assert_eq!(read_csv(&ws.export_csv()).unwrap().len(), 4);
        let marker = std::fs::read_to_string(ws.upload_marker()).unwrap();
        assert!(marker.contains("rows=4\n"), "marker: {marker}");
        assert_eq!(
            ProcessedHistory::load(&ws.processed_history()).unwrap().len(),
            history_size
        );

        let _ = std::fs::remove_dir_all(ws.root());
    }

    #[tokio::test]
    async fn missing_spreadsheet_fails_run_but_keeps_artifacts() {
        let server = feed_server().await;
        let config = config(&server, 0);
        let ws = workspace();
        let services = Services {
            generator: None,
            ..Services::default()
        };

        let report = run_pipeline(&config, &ws, &services, &SilentProgress, now()).await.unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.enhance.as_ref().unwrap().stats.skipped, 4);
        assert!(ws.export_csv().exists());
        assert!(!ws.upload_marker().exists());
        // Nothing was published, so nothing may enter the history.
        assert_eq!(report.commit.as_ref().unwrap().committed, 0);
        assert_eq!(report.commit.as_ref().unwrap().pending, 4);

        let _ = std::fs::remove_dir_all(ws.root());
    }
}
