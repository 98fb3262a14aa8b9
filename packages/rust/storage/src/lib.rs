//! libSQL storage layer (local file, offline mode).
//!
//! The [`Storage`] struct wraps the workspace database at
//! `indexes/feedpress.db`, which holds the language-generation cache and the
//! journal of pipeline runs.
//!
//! **Access rules:**
//! - pipeline stages: read-write via [`Storage::open`]
//! - `feedpress status`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use feedpress_shared::{FeedpressError, Result};
use libsql::{Connection, Database, params};
use serde::Serialize;
use uuid::Uuid;

/// One row of the run journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub run_date: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub stats_json: Option<String>,
}

/// Size and reuse of the generation cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    /// Lookups answered from the cache since entries were written.
    pub hits: u64,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> FeedpressError {
    FeedpressError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| FeedpressError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` without running migrations.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FeedpressError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        FeedpressError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(FeedpressError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Generation cache
    // -----------------------------------------------------------------------

    /// Look up a cached generation. A hit bumps the entry's hit counter.
    pub async fn get_cached_generation(
        &self,
        task: &str,
        prompt_hash: &str,
        model: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, result_text FROM generation_cache
                 WHERE task = ?1 AND prompt_hash = ?2 AND model = ?3",
                params![task, prompt_hash, model],
            )
            .await
            .map_err(storage_err)?;

        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(None);
        };
        let id: String = row.get(0).map_err(storage_err)?;
        let text: String = row.get(1).map_err(storage_err)?;

        if !self.readonly {
            self.conn
                .execute(
                    "UPDATE generation_cache SET hits = hits + 1 WHERE id = ?1",
                    params![id.as_str()],
                )
                .await
                .map_err(storage_err)?;
        }

        Ok(Some(text))
    }

    /// Store a generation result (upserts).
    pub async fn set_cached_generation(
        &self,
        task: &str,
        prompt_hash: &str,
        model: &str,
        result_text: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO generation_cache
                   (id, task, prompt_hash, model, result_text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task, prompt_hash, model) DO UPDATE SET
                   result_text = excluded.result_text,
                   created_at = excluded.created_at",
                params![id.as_str(), task, prompt_hash, model, result_text, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop cached generations for `task`, or all of them. Returns the count removed.
    pub async fn invalidate_generation_cache(&self, task: Option<&str>) -> Result<u64> {
        self.check_writable()?;
        let removed = match task {
            Some(task) => self
                .conn
                .execute("DELETE FROM generation_cache WHERE task = ?1", params![task])
                .await
                .map_err(storage_err)?,
            None => self
                .conn
                .execute("DELETE FROM generation_cache", params![])
                .await
                .map_err(storage_err)?,
        };
        Ok(removed)
    }

    /// Entry count and total hits of the generation cache.
    pub async fn generation_cache_stats(&self) -> Result<CacheStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(hits), 0) FROM generation_cache",
                params![],
            )
            .await
            .map_err(storage_err)?;
        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(CacheStats::default());
        };
        let entries: i64 = row.get(0).map_err(storage_err)?;
        let hits: i64 = row.get(1).map_err(storage_err)?;
        Ok(CacheStats {
            entries: entries.max(0) as u64,
            hits: hits.max(0) as u64,
        })
    }

    // -----------------------------------------------------------------------
    // Run journal
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns the generated run ID.
    pub async fn insert_run(&self, run_date: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, run_date, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), run_date, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Close a run with its final status and stats.
    pub async fn finish_run(&self, run_id: &str, status: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, status = ?2, stats_json = ?3 WHERE id = ?4",
                params![now.as_str(), status, stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, run_date, started_at, finished_at, status, stats_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            runs.push(RunRecord {
                id: row.get(0).map_err(storage_err)?,
                run_date: row.get(1).map_err(storage_err)?,
                started_at: row.get(2).map_err(storage_err)?,
                finished_at: row.get::<Option<String>>(3).map_err(storage_err)?,
                status: row.get(4).map_err(storage_err)?,
                stats_json: row.get::<Option<String>>(5).map_err(storage_err)?,
            });
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("feedpress_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_db()).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db();
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.schema_version().await, 2);
    }

    #[tokio::test]
    async fn generation_cache_roundtrip() {
        let storage = test_storage().await;

        let miss = storage
            .get_cached_generation("enhance", "hash1", "gpt-4")
            .await
            .expect("get cache miss");
        assert!(miss.is_none());

        storage
            .set_cached_generation("enhance", "hash1", "gpt-4", r#"{"summary":"s"}"#)
            .await
            .expect("set cache");
        storage
            .set_cached_generation("enhance", "hash1", "gpt-4", r#"{"summary":"t"}"#)
            .await
            .expect("upsert cache");

        let hit = storage
            .get_cached_generation("enhance", "hash1", "gpt-4")
            .await
            .expect("get cache hit");
        assert_eq!(hit.as_deref(), Some(r#"{"summary":"t"}"#));
        storage
            .get_cached_generation("enhance", "hash1", "gpt-4")
            .await
            .unwrap();
        assert_eq!(
            storage.generation_cache_stats().await.unwrap(),
            CacheStats {
                entries: 1,
                hits: 2
            }
        );

        let other_model = storage
            .get_cached_generation("enhance", "hash1", "gpt-4o")
            .await
            .unwrap();
        assert!(other_model.is_none());
    }

    #[tokio::test]
    async fn invalidate_by_task() {
        let storage = test_storage().await;
        storage
            .set_cached_generation("enhance", "h1", "m", "a")
            .await
            .unwrap();
        storage
            .set_cached_generation("topup", "h2", "m", "b")
            .await
            .unwrap();

        assert_eq!(
            storage.invalidate_generation_cache(Some("topup")).await.unwrap(),
            1
        );
        assert!(storage.get_cached_generation("enhance", "h1", "m").await.unwrap().is_some());
        assert_eq!(storage.invalidate_generation_cache(None).await.unwrap(), 1);
        assert_eq!(storage.generation_cache_stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn run_journal_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage.insert_run("2025-03-14").await.expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .finish_run(&run_id, "success", r#"{"fetched": 10}"#)
            .await
            .expect("finish run");

        let runs = storage.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "success");
        assert_eq!(runs[0].run_date, "2025-03-14");
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db();
        {
            let rw = Storage::open(&tmp).await.unwrap();
            rw.insert_run("2025-03-14").await.unwrap();
        }
        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.insert_run("2025-03-15").await.is_err());
        assert_eq!(ro.recent_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        assert!(Storage::open_readonly(&temp_db()).await.is_err());
    }
}
