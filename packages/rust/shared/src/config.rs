//! Application configuration for feedpress.
//!
//! User config lives at `~/.feedpress/feedpress.toml`.
//! CLI flags override config file values, which override defaults.
//! Credentials never live in the file: each section names the environment
//! variable that holds them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{FeedpressError, Result};
use crate::types::Platform;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "feedpress.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".feedpress";

// ---------------------------------------------------------------------------
// Config structs (matching feedpress.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub social: SocialConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[workspace]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding all pipeline artifacts.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Fixed run date (`YYYY-MM-DD`). Defaults to today in local time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<NaiveDate>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            run_date: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

/// `[feeds]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    #[serde(default = "default_feed_urls")]
    pub urls: Vec<String>,

    /// Entries older than this are dropped at fetch time.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Newest-first cap on the fetched batch.
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            urls: default_feed_urls(),
            max_age_days: default_max_age_days(),
            max_articles: default_max_articles(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_feed_urls() -> Vec<String> {
    [
        "https://propertyindustryeye.com/feed/",
        "https://www.estateagenttoday.co.uk/rss",
        "https://www.propertyreporter.co.uk/rss/news",
        "https://www.landlordtoday.co.uk/rss",
        "https://www.property118.com/feed/",
        "https://www.insidehousing.co.uk/rss",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_max_age_days() -> u32 {
    7
}
fn default_max_articles() -> usize {
    10
}
fn default_timeout_secs() -> u64 {
    20
}

/// `[history]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Jaccard similarity at or above which a post counts as a repeat.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}
fn default_similarity_threshold() -> f64 {
    0.8
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            model: default_model(),
            base_url: default_openai_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    800
}

/// `[generation]` section: top-up articles written from a topic list when
/// the feeds do not yield enough new material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Minimum unseen articles per run; 0 disables top-up.
    #[serde(default = "default_min_articles")]
    pub min_articles: usize,

    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    #[serde(default = "default_synthetic_base_url")]
    pub synthetic_base_url: String,

    #[serde(default = "default_synthetic_source")]
    pub synthetic_source: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_articles: default_min_articles(),
            topics: default_topics(),
            synthetic_base_url: default_synthetic_base_url(),
            synthetic_source: default_synthetic_source(),
        }
    }
}

fn default_min_articles() -> usize {
    6
}
fn default_topics() -> Vec<String> {
    [
        "HMO investment strategies in the UK",
        "Rent-to-Rent (R2R) opportunities in today's market",
        "UK property investment trends",
        "Serviced Accommodation market analysis",
        "Buy, Refurbish, Refinance, Rent (BRRR) strategy tips",
        "Legal changes affecting UK landlords",
        "UK property market forecast",
        "Tax implications for property investors",
        "Property technology innovations",
        "Energy efficiency regulations for UK properties",
        "First-time buyer market trends",
        "Commercial to residential conversions",
        "Rental yield optimization strategies",
        "Property management best practices",
        "UK mortgage market updates",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_synthetic_base_url() -> String {
    "https://propertymarketanalysis.uk".into()
}
fn default_synthetic_source() -> String {
    "Property Market Analysis".into()
}

/// How articles are spread across platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialMode {
    /// Article `i` goes to platform `i % n`.
    #[default]
    Rotate,
    /// Every article gets a post on every platform.
    Every,
}

/// `[social]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialConfig {
    #[serde(default)]
    pub mode: SocialMode,

    /// Cap per platform per run; 0 = unlimited.
    #[serde(default = "default_posts_per_platform")]
    pub posts_per_platform: usize,

    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            mode: SocialMode::default(),
            posts_per_platform: default_posts_per_platform(),
            platforms: default_platforms(),
        }
    }
}

fn default_posts_per_platform() -> usize {
    2
}
fn default_platforms() -> Vec<Platform> {
    Platform::ALL.to_vec()
}

/// `[images]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_unsplash_key_env")]
    pub access_key_env: String,

    #[serde(default = "default_unsplash_base_url")]
    pub base_url: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            access_key_env: default_unsplash_key_env(),
            base_url: default_unsplash_base_url(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_unsplash_key_env() -> String {
    "UNSPLASH_ACCESS_KEY".into()
}
fn default_unsplash_base_url() -> String {
    "https://api.unsplash.com".into()
}

/// `[sheets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// When false, the pipeline stops after export and commits exported articles.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sheet_id_env")]
    pub sheet_id_env: String,

    /// Env var holding an OAuth bearer token for the Google APIs.
    #[serde(default = "default_google_token_env")]
    pub token_env: String,

    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sheet_id_env: default_sheet_id_env(),
            token_env: default_google_token_env(),
            base_url: default_sheets_base_url(),
        }
    }
}

fn default_sheet_id_env() -> String {
    "GOOGLE_SHEET_ID".into()
}
fn default_google_token_env() -> String {
    "GOOGLE_ACCESS_TOKEN".into()
}
fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com".into()
}

/// `[drive]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default = "default_google_token_env")]
    pub token_env: String,

    #[serde(default = "default_drive_base_url")]
    pub base_url: String,

    #[serde(default = "default_drive_upload_url")]
    pub upload_url: String,

    /// Images go to a folder named `{folder_prefix}{date}`.
    #[serde(default = "default_folder_prefix")]
    pub folder_prefix: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            token_env: default_google_token_env(),
            base_url: default_drive_base_url(),
            upload_url: default_drive_upload_url(),
            folder_prefix: default_folder_prefix(),
        }
    }
}

fn default_drive_base_url() -> String {
    "https://www.googleapis.com/drive/v3".into()
}
fn default_drive_upload_url() -> String {
    "https://www.googleapis.com/upload/drive/v3".into()
}
fn default_folder_prefix() -> String {
    "property_news_images_".into()
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Generation and image search: 3 attempts, 500 ms doubling to 4 s.
    pub fn generation() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
        }
    }

    /// Spreadsheet and image-host writes: one retry after 1 s.
    pub fn publish() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 1_000,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::generation")]
    pub generation: RetryPolicy,

    #[serde(default = "RetryPolicy::publish")]
    pub publish: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            generation: RetryPolicy::generation(),
            publish: RetryPolicy::publish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.feedpress/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeedpressError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.feedpress/feedpress.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| FeedpressError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| FeedpressError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file to `path`, or to the default location.
/// Returns the path to the created file.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| FeedpressError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| FeedpressError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FeedpressError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check the settings that would otherwise fail deep inside a run.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    for raw in &config.feeds.urls {
        let parsed = url::Url::parse(raw)
            .map_err(|e| FeedpressError::config(format!("invalid feed URL '{raw}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FeedpressError::config(format!(
                "feed URL '{raw}' must use http or https"
            )));
        }
    }

    if config.feeds.max_articles == 0 {
        return Err(FeedpressError::config("feeds.max_articles must be at least 1"));
    }

    if config.history.retention_days < config.feeds.max_age_days {
        return Err(FeedpressError::config(format!(
            "history.retention_days ({}) must be >= feeds.max_age_days ({}), \
             otherwise pruned articles can be fetched again",
            config.history.retention_days, config.feeds.max_age_days
        )));
    }

    let threshold = config.history.similarity_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(FeedpressError::config(format!(
            "history.similarity_threshold must be in (0, 1], got {threshold}"
        )));
    }

    if config.social.platforms.is_empty() {
        return Err(FeedpressError::config("social.platforms must not be empty"));
    }

    for (name, policy) in [
        ("generation", &config.retry.generation),
        ("publish", &config.retry.publish),
    ] {
        if policy.max_attempts == 0 {
            return Err(FeedpressError::config(format!(
                "retry.{name}.max_attempts must be at least 1"
            )));
        }
    }

    Ok(())
}

/// Read a credential from the environment variable named `var_name`.
pub fn read_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(FeedpressError::config(format!(
            "credential not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("propertyindustryeye.com"));
        assert!(!toml_str.contains("run_date"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.feeds.max_articles, 10);
        assert_eq!(parsed.history.retention_days, 30);
        assert_eq!(parsed.social.mode, SocialMode::Rotate);
        assert_eq!(parsed.social.platforms, Platform::ALL.to_vec());
        assert_eq!(parsed.retry.publish.max_attempts, 2);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let toml_str = r#"
[workspace]
root = "/tmp/feedpress"
run_date = "2025-03-14"

[feeds]
urls = ["https://example.com/rss"]

[social]
mode = "every"
platforms = ["LinkedIn", "Twitter"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.workspace.root, PathBuf::from("/tmp/feedpress"));
        assert_eq!(
            config.workspace.run_date,
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
        assert_eq!(config.feeds.urls.len(), 1);
        assert_eq!(config.feeds.timeout_secs, 20);
        assert_eq!(config.social.mode, SocialMode::Every);
        assert_eq!(config.social.platforms.len(), 2);
        assert_eq!(config.generation.min_articles, 6);
    }

    #[test]
    fn validation_accepts_defaults() {
        validate_config(&AppConfig::default()).expect("defaults are valid");
    }

    #[test]
    fn validation_rejects_short_retention() {
        let mut config = AppConfig::default();
        config.history.retention_days = 3;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("retention_days"));
    }

    #[test]
    fn validation_rejects_bad_urls_and_threshold() {
        let mut config = AppConfig::default();
        config.feeds.urls = vec!["ftp://example.com/feed".into()];
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.history.similarity_threshold = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::generation();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(4_000));
        assert_eq!(RetryPolicy::publish().backoff_for(5), Duration::from_millis(1_000));
    }

    #[test]
    fn init_config_writes_file() {
        let path = std::env::temp_dir()
            .join(format!("feedpress_cfg_{}", uuid::Uuid::now_v7()))
            .join("feedpress.toml");
        let written = init_config(Some(&path)).expect("init");
        let loaded = load_config_from(&written).expect("load");
        assert_eq!(loaded.openai.model, "gpt-4");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_secret_names_the_variable() {
        let err = read_secret("FEEDPRESS_TEST_NONEXISTENT_KEY_12345").unwrap_err();
        assert!(err.to_string().contains("FEEDPRESS_TEST_NONEXISTENT_KEY_12345"));
    }
}
