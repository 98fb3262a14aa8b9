//! Spreadsheet publishing.
//!
//! Each platform has its own tab (`LinkedIn_Posts`, ...). Rows are keyed by
//! `ArticleId` in column A: an existing key is overwritten in place, a new
//! key is appended below the last used row, so a tab never holds the same
//! key twice. Images are uploaded to the image host first so the row can
//! carry a public URL.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use feedpress_clients::{ImageHost, SpreadsheetApi, with_retry};
use feedpress_history::PublishedLog;
use feedpress_shared::{
    ArticleId, EXPORT_COLUMNS, ExportRow, Platform, PublishedPostRecord, Result, RetryPolicy,
    content_hash,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::Workspace;

/// Longest cell the spreadsheet accepts.
pub const MAX_CELL_CHARS: usize = 40_000;

/// Prepare a cell for the spreadsheet: line breaks become spaces and the
/// value is capped at [`MAX_CELL_CHARS`].
pub fn sheet_cell(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    if flat.chars().count() > MAX_CELL_CHARS {
        flat.chars().take(MAX_CELL_CHARS).collect()
    } else {
        flat
    }
}

fn sheet_row(row: &ExportRow) -> Vec<String> {
    row.to_record().iter().map(|c| sheet_cell(c)).collect()
}

/// Counters for one publish pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishStats {
    pub updated: usize,
    pub appended: usize,
    /// Rows whose exact content was already published.
    pub unchanged: usize,
    pub failed: usize,
    pub images_uploaded: usize,
    pub image_failures: usize,
}

impl PublishStats {
    pub fn written(&self) -> usize {
        self.updated + self.appended
    }
}

/// What happened to each row key.
#[derive(Debug, Default)]
pub struct PublishOutcome {
    pub stats: PublishStats,
    /// Articles with at least one row that failed to publish.
    pub failed_articles: HashSet<ArticleId>,
}

impl PublishOutcome {
    /// Whether every row of `id` is now in the spreadsheet.
    pub fn is_published(&self, id: &ArticleId) -> bool {
        !self.failed_articles.contains(id)
    }
}

/// Column A of a tab, indexed by key.
struct TabIndex {
    rows: HashMap<String, usize>,
    next_row: usize,
}

impl TabIndex {
    fn from_column(column: &[String]) -> Self {
        let mut rows = HashMap::new();
        // Row 1 is the header.
        for (i, key) in column.iter().enumerate().skip(1) {
            let key = key.trim();
            if !key.is_empty() {
                rows.entry(key.to_string()).or_insert(i + 1);
            }
        }
        Self {
            rows,
            next_row: column.len().max(1) + 1,
        }
    }
}

pub struct Publisher<'a> {
    sheets: &'a dyn SpreadsheetApi,
    host: Option<&'a dyn ImageHost>,
    policy: RetryPolicy,
}

impl<'a> Publisher<'a> {
    pub fn new(
        sheets: &'a dyn SpreadsheetApi,
        host: Option<&'a dyn ImageHost>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sheets,
            host,
            policy,
        }
    }

    /// Upload images and upsert `rows`. `rows` is updated in place with the
    /// image URLs and `LastUpdated` stamps so the caller can rewrite the CSV.
    ///
    /// Fails only when the spreadsheet cannot be reached at all; individual
    /// row failures are counted and logged.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub async fn publish(
        &self,
        rows: &mut [ExportRow],
        workspace: &Workspace,
        folder_prefix: &str,
        log: &mut PublishedLog,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome> {
        let mut outcome = PublishOutcome::default();

        // --- Phase 1: images ---
        if let Some(host) = self.host {
            let folder = format!("{folder_prefix}{}", workspace.date_str());
            self.upload_images(host, rows, workspace, &folder, &mut outcome.stats)
                .await;
        }

        // --- Phase 2: tabs ---
        let existing_tabs: HashSet<String> =
            with_retry(&self.policy, "list tabs", || self.sheets.list_tabs())
                .await?
                .into_iter()
                .collect();

        let platforms: BTreeSet<Platform> = rows.iter().map(|r| r.platform).collect();
        let mut indexes: HashMap<Platform, TabIndex> = HashMap::new();
        for platform in platforms {
            let tab = platform.tab_name();
            match self.prepare_tab(&tab, existing_tabs.contains(&tab)).await {
                Ok(index) => {
                    indexes.insert(platform, index);
                }
                Err(e) => warn!(%tab, error = %e, "tab unavailable, skipping its rows"),
            }
        }

        // --- Phase 3: upsert rows ---
        let stamp = now.to_rfc3339();
        for row in rows.iter_mut() {
            let hash = content_hash(&row.content);
            if log.contains(&row.article_id, row.platform, &hash) {
                debug!(id = %row.article_id, platform = %row.platform, "already published");
                outcome.stats.unchanged += 1;
                continue;
            }

            let Some(index) = indexes.get_mut(&row.platform) else {
                outcome.stats.failed += 1;
                outcome.failed_articles.insert(row.article_id.clone());
                continue;
            };

            let tab = row.platform.tab_name();
            let existing = index.rows.get(row.article_id.as_str()).copied();
            let target = existing.unwrap_or(index.next_row);

            row.last_updated = stamp.clone();
            let cells = sheet_row(row);
            let written = with_retry(&self.policy, "write row", || {
                self.sheets.write_row(&tab, target, &cells)
            })
            .await;

            match written {
                Ok(()) => {
                    if existing.is_some() {
                        outcome.stats.updated += 1;
                    } else {
                        outcome.stats.appended += 1;
                        index.rows.insert(row.article_id.to_string(), target);
                        index.next_row += 1;
                    }
                    log.append(PublishedPostRecord {
                        article_id: row.article_id.clone(),
                        platform: row.platform,
                        tab,
                        row: target,
                        content_hash: hash,
                        content: row.content.clone(),
                        published_at: now,
                    });
                }
                Err(e) => {
                    warn!(
                        id = %row.article_id,
                        %tab,
                        row = target,
                        error = %e,
                        "row not published"
                    );
                    row.last_updated.clear();
                    outcome.stats.failed += 1;
                    outcome.failed_articles.insert(row.article_id.clone());
                }
            }
        }

        info!(
            updated = outcome.stats.updated,
            appended = outcome.stats.appended,
            unchanged = outcome.stats.unchanged,
            failed = outcome.stats.failed,
            "publish complete"
        );
        Ok(outcome)
    }

    /// Create the tab with a header row if needed, then index column A.
    async fn prepare_tab(&self, tab: &str, exists: bool) -> Result<TabIndex> {
        if !exists {
            with_retry(&self.policy, "add tab", || self.sheets.add_tab(tab)).await?;
            let header: Vec<String> = EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect();
            with_retry(&self.policy, "write header", || {
                self.sheets.write_row(tab, 1, &header)
            })
            .await?;
            info!(tab, "created tab");
        }

        let column = with_retry(&self.policy, "read keys", || {
            self.sheets.read_column(tab, "A")
        })
        .await?;
        if column.is_empty() {
            let header: Vec<String> = EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect();
            with_retry(&self.policy, "write header", || {
                self.sheets.write_row(tab, 1, &header)
            })
            .await?;
        }
        Ok(TabIndex::from_column(&column))
    }

    async fn upload_images(
        &self,
        host: &dyn ImageHost,
        rows: &mut [ExportRow],
        workspace: &Workspace,
        folder: &str,
        stats: &mut PublishStats,
    ) {
        let pending: Vec<(ArticleId, String)> = {
            let mut seen = HashSet::new();
            rows.iter()
                .filter(|r| !r.image_path.is_empty() && r.drive_image_url.is_empty())
                .filter(|r| seen.insert(r.article_id.clone()))
                .map(|r| (r.article_id.clone(), r.image_path.clone()))
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        let ensured = with_retry(&self.policy, "image folder", || host.ensure_folder(folder)).await;
        let folder_id = match ensured {
            Ok(id) => id,
            Err(e) => {
                warn!(folder, error = %e, "image folder unavailable, publishing without images");
                stats.image_failures += pending.len();
                return;
            }
        };

        for (id, rel) in pending {
            let path = workspace.resolve(&rel);
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(%id, path = %path.display(), error = %e, "image file unreadable");
                    stats.image_failures += 1;
                    continue;
                }
            };
            let name = format!("{id}.jpg");
            let uploaded = with_retry(&self.policy, "upload image", || {
                host.upload_jpeg(&folder_id, &name, bytes.clone())
            })
            .await;

            match uploaded {
                Ok(url) => {
                    stats.images_uploaded += 1;
                    for row in rows.iter_mut().filter(|r| r.article_id == id) {
                        row.drive_image_url = url.clone();
                    }
                }
                Err(e) => {
                    warn!(%id, error = %e, "image upload failed");
                    stats.image_failures += 1;
                }
            }
        }
    }
}
