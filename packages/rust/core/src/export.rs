//! CSV export: one row per social post, in the fixed [`EXPORT_COLUMNS`]
//! order that the downstream automation reads.

use std::collections::HashSet;
use std::path::Path;

use feedpress_history::PublishedLog;
use feedpress_shared::{
    ArticleId, EXPORT_COLUMNS, ExportRow, FeedpressError, Platform, Result, SocialPost,
    write_atomic,
};
use tracing::{info, warn};

/// Rows to export plus the posts held back as near-duplicates.
#[derive(Debug, Default)]
pub struct ExportBatch {
    pub rows: Vec<ExportRow>,
    /// `(article_id, platform)` of posts too similar to something already
    /// published.
    pub excluded: Vec<(ArticleId, Platform)>,
}

/// Turn posts into rows, dropping any post whose copy overlaps a previously
/// published post (under another key) by `threshold` or more.
pub fn build_rows(posts: &[SocialPost], published: &PublishedLog, threshold: f64) -> ExportBatch {
    let mut batch = ExportBatch::default();

    for post in posts {
        let similar =
            published.find_similar(&post.article_id, post.platform, &post.text, threshold);
        if let Some(similar) = similar {
            warn!(
                id = %post.article_id,
                platform = %post.platform,
                similar_to = %similar.article_id,
                "post too similar to published copy, excluding"
            );
            batch.excluded.push((post.article_id.clone(), post.platform));
            continue;
        }
        batch.rows.push(ExportRow::from_post(post));
    }

    batch
}

/// Fold a fresh batch into the rows already exported today. Existing rows keep
/// their image and publish columns unless the batch carries the same
/// `(article_id, platform)`. Returns the merged rows and how many were kept.
pub fn merge_rows(existing: Vec<ExportRow>, fresh: &[ExportRow]) -> (Vec<ExportRow>, usize) {
    let replaced: HashSet<(&ArticleId, Platform)> =
        fresh.iter().map(|r| (&r.article_id, r.platform)).collect();
    let mut merged: Vec<ExportRow> = existing
        .into_iter()
        .filter(|r| !replaced.contains(&(&r.article_id, r.platform)))
        .collect();
    let kept = merged.len();
    merged.extend(fresh.iter().cloned());
    (merged, kept)
}

/// Serialize rows with the header line.
pub fn to_csv(rows: &[ExportRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(EXPORT_COLUMNS)
        .map_err(|e| FeedpressError::parse(format!("csv header: {e}")))?;
    for row in rows {
        writer
            .write_record(row.to_record())
            .map_err(|e| FeedpressError::parse(format!("csv row {}: {e}", row.article_id)))?;
    }
    writer
        .into_inner()
        .map_err(|e| FeedpressError::parse(format!("csv flush: {e}")))
}

/// Write the export atomically.
pub fn write_csv(path: &Path, rows: &[ExportRow]) -> Result<()> {
    let bytes = to_csv(rows)?;
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), rows = rows.len(), "export written");
    Ok(())
}

/// Parse an export. The header must match [`EXPORT_COLUMNS`] exactly.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<ExportRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| FeedpressError::parse(format!("csv header: {e}")))?;
    if !headers.iter().eq(EXPORT_COLUMNS.iter().copied()) {
        return Err(FeedpressError::parse(format!(
            "unexpected export columns: {}",
            headers.iter().collect::<Vec<_>>().join(",")
        )));
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| FeedpressError::parse(format!("csv line {}: {e}", i + 2)))?;
        rows.push(ExportRow::from_fields(record.iter())?);
    }
    Ok(rows)
}

pub fn read_csv(path: &Path) -> Result<Vec<ExportRow>> {
    let bytes = std::fs::read(path).map_err(|e| FeedpressError::io(path, e))?;
    parse_csv(&bytes)
}
