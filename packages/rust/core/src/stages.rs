//! The pipeline stages. Each reads the previous stage's artifact from the
//! workspace, writes its own, and advances the run ledger. Every stage can
//! be run on its own from the CLI.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use feedpress_clients::{ImageHost, ImageSearch, SpreadsheetApi, TextGenerator};
use feedpress_feeds::{FeedFetcher, FetchOptions};
use feedpress_history::{ProcessedHistory, PublishedLog};
use feedpress_shared::{
    AppConfig, Article, ArticleId, ArticleState, EnhancedArticle, FeedpressError, Result,
    SocialPost, write_atomic, write_json_atomic,
};
use feedpress_storage::Storage;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::artifacts::{RunLedger, Workspace, read_stage_input};
use crate::commit::{CommitStats, commit_history};
use crate::enhance::{EnhanceStats, Enhancer};
use crate::export::{build_rows, merge_rows, read_csv, write_csv};
use crate::images::{ImageStats, attach_images};
use crate::pipeline::ProgressReporter;
use crate::publish::{PublishStats, Publisher};
use crate::social::generate_posts;
use crate::topup::generate_topups;

/// What every stage needs: configuration, the dated workspace and the clock.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub config: &'a AppConfig,
    pub workspace: &'a Workspace,
    pub now: DateTime<Utc>,
}

impl StageContext<'_> {
    fn load_ledger(&self) -> Result<RunLedger> {
        RunLedger::load(&self.workspace.run_state())
    }

    fn save_ledger(&self, ledger: &RunLedger) -> Result<()> {
        ledger.save(&self.workspace.run_state())
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchSummary {
    pub fetched: usize,
    pub too_old: usize,
    pub failed_feeds: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupeSummary {
    pub unseen: usize,
    pub seen: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnhanceSummary {
    pub articles: usize,
    pub topped_up: usize,
    pub stats: EnhanceStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SocialSummary {
    pub articles: usize,
    pub posts: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    /// Rows built from this run's posts.
    pub rows: usize,
    /// Rows carried over from an earlier run on the same date.
    pub kept: usize,
    pub excluded_similar: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishSummary {
    pub rows: usize,
    pub stats: PublishStats,
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Fetch all feeds and write the article cache.
#[instrument(skip_all, fields(date = %ctx.workspace.date()))]
pub async fn fetch(ctx: StageContext<'_>) -> Result<FetchSummary> {
    let fetcher = FeedFetcher::new(FetchOptions::from(&ctx.config.feeds))?;
    let report = fetcher.fetch_all(&ctx.config.feeds.urls, ctx.now).await;

    write_json_atomic(&ctx.workspace.latest_articles(), &report.articles)?;

    let mut ledger = ctx.load_ledger()?;
    for article in &report.articles {
        ledger.advance(article, ArticleState::Fetched, ctx.now);
    }
    ctx.save_ledger(&ledger)?;

    let urls = &ctx.config.feeds.urls;
    if !urls.is_empty() && report.failed_feeds.len() == urls.len() {
        return Err(FeedpressError::fetch("every configured feed failed"));
    }

    Ok(FetchSummary {
        fetched: report.articles.len(),
        too_old: report.too_old,
        failed_feeds: report.failed_feeds.into_iter().map(|(url, _)| url).collect(),
    })
}

/// Drop articles already in the processed history.
#[instrument(skip_all)]
pub async fn dedupe(ctx: StageContext<'_>) -> Result<DedupeSummary> {
    let articles: Vec<Article> = read_stage_input(&ctx.workspace.latest_articles(), "fetch")?;
    let history = ProcessedHistory::load(&ctx.workspace.processed_history())?;
    let outcome = history.filter_unseen(articles);

    write_json_atomic(&ctx.workspace.unseen_articles(), &outcome.unseen)?;

    let mut ledger = ctx.load_ledger()?;
    for article in &outcome.unseen {
        ledger.advance(article, ArticleState::DedupedIn, ctx.now);
    }
    for id in &outcome.seen {
        ledger.advance_id(id, ArticleState::SkippedDuplicate, ctx.now);
    }
    ctx.save_ledger(&ledger)?;

    info!(
        unseen = outcome.unseen.len(),
        seen = outcome.seen.len(),
        history = history.len(),
        "dedupe complete"
    );
    Ok(DedupeSummary {
        unseen: outcome.unseen.len(),
        seen: outcome.seen.len(),
        dropped: outcome.dropped,
    })
}

/// Enhance unseen articles and top up to `generation.min_articles`.
/// Without a generator every article is kept raw.
#[instrument(skip_all)]
pub async fn enhance(
    ctx: StageContext<'_>,
    generator: Option<&dyn TextGenerator>,
    storage: Option<&Storage>,
    progress: &dyn ProgressReporter,
) -> Result<EnhanceSummary> {
    let unseen: Vec<Article> = read_stage_input(&ctx.workspace.unseen_articles(), "dedupe")?;
    let mut summary = EnhanceSummary::default();
    let total = unseen.len();
    let mut enhanced: Vec<EnhancedArticle> = Vec::with_capacity(total);

    match generator {
        Some(generator) => {
            let enhancer = Enhancer::new(generator, storage, ctx.config.retry.generation);
            for (i, article) in unseen.into_iter().enumerate() {
                progress.article_done(i + 1, total, &article.title);
                enhanced.push(enhancer.enhance(article, &mut summary.stats).await);
            }

            let min = ctx.config.generation.min_articles;
            if enhanced.len() < min {
                let history = ProcessedHistory::load(&ctx.workspace.processed_history())?;
                let topups = generate_topups(
                    &enhancer,
                    &ctx.config.generation,
                    &history,
                    ctx.workspace.date(),
                    ctx.now,
                    min - enhanced.len(),
                    &mut summary.stats,
                )
                .await;
                summary.topped_up = topups.len();
                enhanced.extend(topups);
            }
        }
        None => {
            warn!("no language-generation client, keeping raw articles");
            summary.stats.skipped = total;
            enhanced.extend(unseen.into_iter().map(EnhancedArticle::raw));
        }
    }

    write_json_atomic(&ctx.workspace.enhanced_articles(), &enhanced)?;

    let mut ledger = ctx.load_ledger()?;
    for article in &enhanced {
        ledger.advance(&article.article, ArticleState::Enhanced, ctx.now);
    }
    ctx.save_ledger(&ledger)?;

    summary.articles = enhanced.len();
    Ok(summary)
}

/// Write social copy for the enhanced articles.
#[instrument(skip_all)]
pub async fn social(ctx: StageContext<'_>) -> Result<SocialSummary> {
    let enhanced: Vec<EnhancedArticle> =
        read_stage_input(&ctx.workspace.enhanced_articles(), "enhance")?;
    let posts = generate_posts(&enhanced, &ctx.config.social, ctx.workspace.date());

    write_json_atomic(&ctx.workspace.social_posts(), &posts)?;

    let posted: HashSet<&ArticleId> = posts.iter().map(|p| &p.article_id).collect();
    let mut ledger = ctx.load_ledger()?;
    for id in &posted {
        ledger.advance_id(id, ArticleState::Socialized, ctx.now);
    }
    ctx.save_ledger(&ledger)?;

    info!(articles = posted.len(), posts = posts.len(), "social copy written");
    Ok(SocialSummary {
        articles: posted.len(),
        posts: posts.len(),
    })
}

/// Assemble the CSV export from the day's posts, merged into any export an
/// earlier run wrote for the same date.
#[instrument(skip_all)]
pub async fn export(ctx: StageContext<'_>) -> Result<ExportSummary> {
    let posts: Vec<SocialPost> = read_stage_input(&ctx.workspace.social_posts(), "social")?;
    let published = PublishedLog::load(&ctx.workspace.published_history())?;
    let batch = build_rows(&posts, &published, ctx.config.history.similarity_threshold);

    let path = ctx.workspace.export_csv();
    let existing = if path.exists() {
        read_csv(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "existing export unreadable, replacing it");
            Vec::new()
        })
    } else {
        Vec::new()
    };
    let (rows, kept) = merge_rows(existing, &batch.rows);

    if batch.rows.is_empty() && kept > 0 {
        info!(kept, "no new rows, keeping the existing export");
    } else {
        write_csv(&path, &rows)?;
    }

    let mut ledger = ctx.load_ledger()?;
    for row in &batch.rows {
        ledger.advance_id(&row.article_id, ArticleState::Exported, ctx.now);
    }
    ctx.save_ledger(&ledger)?;

    Ok(ExportSummary {
        rows: batch.rows.len(),
        kept,
        excluded_similar: batch.excluded.len(),
    })
}

fn read_export(workspace: &Workspace) -> Result<Vec<feedpress_shared::ExportRow>> {
    let path = workspace.export_csv();
    if !path.exists() {
        return Err(FeedpressError::validation(format!(
            "{} not found; run `feedpress export` first",
            path.display()
        )));
    }
    read_csv(&path)
}

/// Attach an image to every exported row and rewrite the CSV.
#[instrument(skip_all)]
pub async fn images(ctx: StageContext<'_>, search: &dyn ImageSearch) -> Result<ImageStats> {
    let mut rows = read_export(ctx.workspace)?;
    let stats = attach_images(
        &mut rows,
        search,
        ctx.workspace,
        &ctx.config.retry.generation,
    )
    .await?;
    write_csv(&ctx.workspace.export_csv(), &rows)?;
    Ok(stats)
}

/// Upload images, upsert the export into the spreadsheet, and write the
/// completion marker.
#[instrument(skip_all)]
pub async fn publish(
    ctx: StageContext<'_>,
    sheets: &dyn SpreadsheetApi,
    host: Option<&dyn ImageHost>,
) -> Result<PublishSummary> {
    let mut rows = read_export(ctx.workspace)?;
    let mut log = PublishedLog::load(&ctx.workspace.published_history())?;

    let publisher = Publisher::new(sheets, host, ctx.config.retry.publish);
    let outcome = publisher
        .publish(
            &mut rows,
            ctx.workspace,
            &ctx.config.drive.folder_prefix,
            &mut log,
            ctx.now,
        )
        .await?;

    write_csv(&ctx.workspace.export_csv(), &rows)?;
    log.save(&ctx.workspace.published_history())?;

    let mut ledger = ctx.load_ledger()?;
    let ids: HashSet<&ArticleId> = rows.iter().map(|r| &r.article_id).collect();
    for id in ids {
        if outcome.is_published(id) {
            ledger.advance_id(id, ArticleState::Published, ctx.now);
        }
    }
    ctx.save_ledger(&ledger)?;

    let stats = outcome.stats;
    let marker_path = ctx.workspace.upload_marker();
    if rows.is_empty() && marker_path.exists() {
        info!("nothing to publish, keeping the existing upload marker");
    } else {
        let marker = [
            format!("date={}", ctx.workspace.date_str()),
            format!("completed_at={}", ctx.now.to_rfc3339()),
            format!("rows={}", rows.len()),
            format!("updated={}", stats.updated),
            format!("appended={}", stats.appended),
            format!("unchanged={}", stats.unchanged),
            format!("failed={}", stats.failed),
            format!("images_uploaded={}", stats.images_uploaded),
        ];
        write_atomic(&marker_path, format!("{}\n", marker.join("\n")).as_bytes())?;
    }

    Ok(PublishSummary {
        rows: rows.len(),
        stats,
    })
}

/// Commit finished articles to the processed history.
#[instrument(skip_all)]
pub async fn commit(ctx: StageContext<'_>) -> Result<CommitStats> {
    let ledger = ctx.load_ledger()?;
    let mut history = ProcessedHistory::load(&ctx.workspace.processed_history())?;
    let mut published = PublishedLog::load(&ctx.workspace.published_history())?;

    let stats = commit_history(
        &ledger,
        &mut history,
        &mut published,
        ctx.config.sheets.enabled,
        ctx.config.history.retention_days,
        ctx.now,
    );

    history.save(&ctx.workspace.processed_history())?;
    published.save(&ctx.workspace.published_history())?;
    Ok(stats)
}
