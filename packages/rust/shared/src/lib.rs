//! Shared types, error model, and configuration for feedpress.
//!
//! This crate is the foundation depended on by all other feedpress crates.
//! It provides:
//! - [`FeedpressError`]: the unified error type
//! - Domain types ([`Article`], [`EnhancedArticle`], [`SocialPost`], [`ExportRow`], ...)
//! - Configuration ([`AppConfig`], [`RetryPolicy`], config loading)
//! - Atomic artifact I/O ([`write_atomic`], [`read_json`])

pub mod config;
pub mod error;
pub mod fs;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DriveConfig, FeedsConfig, GenerationConfig, HistoryConfig, ImagesConfig,
    OpenAiConfig, RetryConfig, RetryPolicy, SheetsConfig, SocialConfig, SocialMode,
    WorkspaceConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    read_secret, validate_config,
};
pub use error::{FeedpressError, Result};
pub use fs::{read_json, write_atomic, write_json_atomic};
pub use types::{
    Article, ArticleId, ArticleState, EXPORT_COLUMNS, EnhancedArticle, EnrichmentSource,
    ExportRow, HISTORY_SCHEMA_VERSION, Platform, ProcessedArticleRecord, PublishedPostRecord,
    SocialPost, content_hash, normalize_url, sanitize_cell,
};
