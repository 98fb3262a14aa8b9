//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use feedpress_clients::{GoogleDriveClient, GoogleSheetsClient, ImageHost, UnsplashClient};
use feedpress_core::artifacts::Workspace;
use feedpress_core::enhance::ENHANCE_TASK;
use feedpress_core::pipeline::{
    ProgressReporter, RunReport, Services, run_pipeline, workspace_status,
};
use feedpress_core::stages::{self, StageContext};
use feedpress_core::topup::TOPUP_TASK;
use feedpress_history::{ProcessedHistory, PublishedLog};
use feedpress_shared::{AppConfig, init_config, load_config, load_config_from, validate_config};
use feedpress_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// feedpress: daily real-estate news, rewritten and ready to post.
#[derive(Parser)]
#[command(
    name = "feedpress",
    version,
    about = "Fetch property news, rewrite it, write social copy and publish it to a spreadsheet.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.feedpress/feedpress.toml).
    #[arg(long, global = true, env = "FEEDPRESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Working directory for artifacts; overrides `workspace.root`.
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Run date (YYYY-MM-DD); defaults to today in UTC.
    #[arg(long, global = true)]
    pub date: Option<NaiveDate>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch every configured feed into the day's article cache.
    Fetch,
    /// Drop articles already in the processed history.
    Dedupe,
    /// Rewrite unseen articles and top up to the daily minimum.
    Enhance,
    /// Write platform copy for the enhanced articles.
    Social,
    /// Assemble the day's CSV export.
    Export,
    /// Attach a photo to every exported article.
    Images,
    /// Upload images and upsert the export into the spreadsheet.
    Publish,
    /// Record finished articles in the processed history.
    Commit,
    /// Run every stage in order.
    Run,
    /// Show the state of the day's workspace.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,

        /// Number of journaled runs to show.
        #[arg(long, default_value = "5")]
        runs: u32,
    },
    /// Inspect or prune the history logs.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Manage the generation cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// History subcommands.
#[derive(Subcommand)]
pub(crate) enum HistoryAction {
    /// Print the most recent history records.
    Show {
        /// Number of records to print from each log.
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Drop records older than `history.retention_days`.
    Prune,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete cached generations so the next run asks the model again.
    Clear {
        /// Only clear one kind of generation.
        #[arg(long)]
        task: Option<CacheTask>,
    },
}

/// Cached generation kinds.
#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub(crate) enum CacheTask {
    /// Article rewrites.
    Enhance,
    /// Synthesized top-up articles.
    Topup,
}

impl CacheTask {
    fn task_name(self) -> &'static str {
        match self {
            Self::Enhance => ENHANCE_TASK,
            Self::Topup => TOPUP_TASK,
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "feedpress=info",
        1 => "feedpress=debug",
        _ => "feedpress=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Session: config + dated workspace
// ---------------------------------------------------------------------------

struct Session {
    config: AppConfig,
    workspace: Workspace,
    now: DateTime<Utc>,
}

impl Session {
    fn load(
        config_path: Option<&PathBuf>,
        root: Option<PathBuf>,
        date: Option<NaiveDate>,
    ) -> Result<Self> {
        let config = match config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        validate_config(&config)?;

        let now = Utc::now();
        let date = date
            .or(config.workspace.run_date)
            .unwrap_or_else(|| now.date_naive());
        let root = root.unwrap_or_else(|| config.workspace.root.clone());
        let workspace = Workspace::new(root, date);
        workspace.ensure_dirs()?;

        info!(root = %workspace.root().display(), date = %date, "workspace ready");
        Ok(Self {
            config,
            workspace,
            now,
        })
    }

    fn ctx(&self) -> StageContext<'_> {
        StageContext {
            config: &self.config,
            workspace: &self.workspace,
            now: self.now,
        }
    }

    async fn storage(&self) -> Option<Storage> {
        match Storage::open(&self.workspace.database()).await {
            Ok(storage) => Some(storage),
            Err(e) => {
                warn!(error = %e, "storage unavailable, generation cache disabled");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let Cli {
        config,
        workspace,
        date,
        command,
        ..
    } = cli;
    let session = || Session::load(config.as_ref(), workspace.clone(), date);

    match command {
        Command::Fetch => cmd_fetch(&session()?).await?,
        Command::Dedupe => cmd_dedupe(&session()?).await?,
        Command::Enhance => cmd_enhance(&session()?).await?,
        Command::Social => cmd_social(&session()?).await?,
        Command::Export => cmd_export(&session()?).await?,
        Command::Images => cmd_images(&session()?).await?,
        Command::Publish => cmd_publish(&session()?).await?,
        Command::Commit => cmd_commit(&session()?).await?,
        Command::Run => return cmd_run(&session()?).await,
        Command::Status { json, runs } => cmd_status(&session()?, json, runs).await?,
        Command::History { action } => match action {
            HistoryAction::Show { limit } => cmd_history_show(&session()?, limit)?,
            HistoryAction::Prune => cmd_history_prune(&session()?)?,
        },
        Command::Cache { action } => match action {
            CacheAction::Clear { task } => cmd_cache_clear(&session()?, task).await?,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config.as_ref())?,
            ConfigAction::Show => cmd_config_show(config.as_ref())?,
        },
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Stage commands
// ---------------------------------------------------------------------------

async fn cmd_fetch(session: &Session) -> Result<()> {
    let summary = stages::fetch(session.ctx()).await?;
    println!();
    println!("  Fetched:      {}", summary.fetched);
    println!("  Too old:      {}", summary.too_old);
    println!("  Failed feeds: {}", summary.failed_feeds.len());
    for url in &summary.failed_feeds {
        println!("    - {url}");
    }
    println!();
    Ok(())
}

async fn cmd_dedupe(session: &Session) -> Result<()> {
    let summary = stages::dedupe(session.ctx()).await?;
    println!();
    println!("  Unseen:  {}", summary.unseen);
    println!("  Seen:    {}", summary.seen);
    println!("  Dropped: {}", summary.dropped);
    println!();
    Ok(())
}

async fn cmd_enhance(session: &Session) -> Result<()> {
    let services = Services::from_config(&session.config);
    let storage = session.storage().await;
    let reporter = CliProgress::new();

    reporter.phase("Enhancing articles");
    let summary = stages::enhance(
        session.ctx(),
        services.generator.as_deref(),
        storage.as_ref(),
        &reporter,
    )
    .await;
    reporter.done("");
    let summary = summary?;

    println!();
    println!("  Articles:   {}", summary.articles);
    println!("  Generated:  {}", summary.stats.generated);
    println!("  Cached:     {}", summary.stats.cached);
    println!("  Kept raw:   {}", summary.stats.skipped);
    println!("  Topped up:  {}", summary.topped_up);
    println!(
        "  Tokens:     {} in / {} out",
        summary.stats.tokens_in, summary.stats.tokens_out
    );
    println!();
    Ok(())
}

async fn cmd_social(session: &Session) -> Result<()> {
    let summary = stages::social(session.ctx()).await?;
    println!();
    println!("  Articles: {}", summary.articles);
    println!("  Posts:    {}", summary.posts);
    println!();
    Ok(())
}

async fn cmd_export(session: &Session) -> Result<()> {
    let summary = stages::export(session.ctx()).await?;
    println!();
    println!("  Rows:             {}", summary.rows);
    println!("  Excluded similar: {}", summary.excluded_similar);
    println!("  File:             {}", session.workspace.export_csv().display());
    println!();
    Ok(())
}

async fn cmd_images(session: &Session) -> Result<()> {
    let search = UnsplashClient::from_config(&session.config.images)
        .wrap_err("image search is not configured")?;
    let stats = stages::images(session.ctx(), &search).await?;
    println!();
    println!("  Attached: {}", stats.attached);
    println!("  Reused:   {}", stats.reused);
    println!("  Missing:  {}", stats.missing);
    println!();
    Ok(())
}

async fn cmd_publish(session: &Session) -> Result<()> {
    let sheets = GoogleSheetsClient::from_config(&session.config.sheets)
        .wrap_err("spreadsheet is not configured")?;
    let host = match GoogleDriveClient::from_config(&session.config.drive) {
        Ok(host) => Some(host),
        Err(e) => {
            warn!(error = %e, "image host unavailable, rows will carry no image URL");
            None
        }
    };

    let summary = stages::publish(
        session.ctx(),
        &sheets,
        host.as_ref().map(|h| h as &dyn ImageHost),
    )
    .await?;

    let stats = &summary.stats;
    println!();
    println!("  Rows:            {}", summary.rows);
    println!("  Updated:         {}", stats.updated);
    println!("  Appended:        {}", stats.appended);
    println!("  Unchanged:       {}", stats.unchanged);
    println!("  Failed:          {}", stats.failed);
    println!("  Images uploaded: {}", stats.images_uploaded);
    println!();
    Ok(())
}

async fn cmd_commit(session: &Session) -> Result<()> {
    let stats = stages::commit(session.ctx()).await?;
    println!();
    println!("  Committed:     {}", stats.committed);
    println!("  Already known: {}", stats.already_known);
    println!("  Pending:       {}", stats.pending);
    println!(
        "  Pruned:        {} processed / {} published",
        stats.pruned_processed, stats.pruned_published
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

async fn cmd_run(session: &Session) -> Result<ExitCode> {
    let services = Services::from_config(&session.config);
    let reporter = CliProgress::new();

    let report = run_pipeline(
        &session.config,
        &session.workspace,
        &services,
        &reporter,
        session.now,
    )
    .await?;

    print_report(&report);
    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &RunReport) {
    println!();
    println!("  Run {} for {}", report.status(), report.date);
    if let Some(fetch) = &report.fetch {
        println!(
            "  Fetched:   {} ({} failed feeds)",
            fetch.fetched,
            fetch.failed_feeds.len()
        );
    }
    if let Some(dedupe) = &report.dedupe {
        println!("  Unseen:    {} ({} seen before)", dedupe.unseen, dedupe.seen);
    }
    if let Some(enhance) = &report.enhance {
        println!(
            "  Enhanced:  {} ({} topped up, {} kept raw)",
            enhance.articles, enhance.topped_up, enhance.stats.skipped
        );
    }
    if let Some(social) = &report.social {
        println!("  Posts:     {}", social.posts);
    }
    if let Some(export) = &report.export {
        println!("  Exported:  {} rows", export.rows);
    }
    if let Some(images) = &report.images {
        println!(
            "  Images:    {} attached, {} missing",
            images.attached + images.reused,
            images.missing
        );
    }
    if let Some(publish) = &report.publish {
        println!(
            "  Published: {} written, {} unchanged, {} failed",
            publish.stats.written(),
            publish.stats.unchanged,
            publish.stats.failed
        );
    }
    if let Some(commit) = &report.commit {
        println!("  Committed: {} ({} pending)", commit.committed, commit.pending);
    }
    for failure in &report.failures {
        println!("  Failure:   {failure}");
    }
    println!("  Time:      {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();
}

// ---------------------------------------------------------------------------
// Status / history
// ---------------------------------------------------------------------------

async fn cmd_status(session: &Session, json: bool, runs: u32) -> Result<()> {
    let status = workspace_status(&session.workspace, runs).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  Date:              {}", status.date);
    println!("  Processed history: {}", status.processed_history);
    println!("  Published posts:   {}", status.published_posts);
    match status.export_rows {
        Some(rows) => println!("  Export rows:       {rows}"),
        None => println!("  Export rows:       (no export yet)"),
    }
    println!("  Upload complete:   {}", status.upload_complete);
    if let Some(cache) = status.generation_cache {
        println!(
            "  Generation cache:  {} entries, {} hits",
            cache.entries, cache.hits
        );
    }
    if !status.ledger.is_empty() {
        println!("  Articles by state:");
        for (state, count) in &status.ledger {
            println!("    {state:<18} {count}");
        }
    }
    if !status.recent_runs.is_empty() {
        println!("  Recent runs:");
        for run in &status.recent_runs {
            println!(
                "    {} {} {}",
                run.started_at,
                run.run_date,
                run.status
            );
        }
    }
    println!();
    Ok(())
}

fn cmd_history_show(session: &Session, limit: usize) -> Result<()> {
    let history = ProcessedHistory::load(&session.workspace.processed_history())?;
    let published = PublishedLog::load(&session.workspace.published_history())?;

    println!();
    println!("  Processed articles: {}", history.len());
    for record in history.records().iter().rev().take(limit) {
        println!(
            "    {} {} {}",
            record.first_seen_at.format("%Y-%m-%d"),
            record.article_id,
            record.url
        );
    }
    println!("  Published posts: {}", published.len());
    for record in published.records().iter().rev().take(limit) {
        println!(
            "    {} {:<9} row {:<4} {}",
            record.published_at.format("%Y-%m-%d"),
            record.platform,
            record.row,
            record.article_id
        );
    }
    println!();
    Ok(())
}

fn cmd_history_prune(session: &Session) -> Result<()> {
    let retention = session.config.history.retention_days;
    let mut history = ProcessedHistory::load(&session.workspace.processed_history())?;
    let mut published = PublishedLog::load(&session.workspace.published_history())?;

    let pruned_processed = history.prune(session.now, retention);
    let pruned_published = published.prune(session.now, retention);
    history.save(&session.workspace.processed_history())?;
    published.save(&session.workspace.published_history())?;

    info!(pruned_processed, pruned_published, retention, "history pruned");
    println!(
        "Pruned {pruned_processed} processed and {pruned_published} published records \
         older than {retention} days."
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

async fn cmd_cache_clear(session: &Session, task: Option<CacheTask>) -> Result<()> {
    let storage = Storage::open(&session.workspace.database())
        .await
        .wrap_err("failed to open the workspace database")?;
    let task = task.map(CacheTask::task_name);
    let removed = storage.invalidate_generation_cache(task).await?;

    info!(removed, task = task.unwrap_or("all"), "generation cache cleared");
    println!("Removed {removed} cached generations.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&PathBuf>) -> Result<()> {
    let path = init_config(path.map(PathBuf::as_path))?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config: AppConfig = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    fn article_done(&self, current: usize, total: usize, title: &str) {
        self.spinner
            .set_message(format!("Enhancing [{current}/{total}] {title}"));
    }

    fn done(&self, _message: &str) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "feedpress",
            "run",
            "--date",
            "2025-03-14",
            "--workspace",
            "/tmp/feedpress",
            "-vv",
        ])
        .unwrap();

        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.date, NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/feedpress")));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn history_show_takes_a_limit() {
        let cli = Cli::try_parse_from(["feedpress", "history", "show", "--limit", "3"]).unwrap();
        match cli.command {
            Command::History {
                action: HistoryAction::Show { limit },
            } => assert_eq!(limit, 3),
            _ => panic!("expected history show"),
        }
    }

    #[test]
    fn cache_clear_maps_task_names() {
        let cli = Cli::try_parse_from(["feedpress", "cache", "clear", "--task", "topup"]).unwrap();
        match cli.command {
            Command::Cache {
                action: CacheAction::Clear { task },
            } => {
                assert_eq!(task, Some(CacheTask::Topup));
                assert_eq!(task.map(CacheTask::task_name), Some(TOPUP_TASK));
            }
            _ => panic!("expected cache clear"),
        }

        let cli = Cli::try_parse_from(["feedpress", "cache", "clear"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheAction::Clear { task: None }
            }
        ));
        assert_eq!(CacheTask::Enhance.task_name(), ENHANCE_TASK);
    }

    #[test]
    fn invalid_date_is_rejected() {
        assert!(Cli::try_parse_from(["feedpress", "status", "--date", "14/03/2025"]).is_err());
    }
}
