//! SQL migration definitions for the feedpress database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements that ends by recording the
//! version in `schema_migrations`.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: generation_cache, runs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Language-generation cache, keyed by task + prompt + model
CREATE TABLE IF NOT EXISTS generation_cache (
    id          TEXT PRIMARY KEY,
    task        TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    model       TEXT NOT NULL,
    result_text TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(task, prompt_hash, model)
);

CREATE INDEX IF NOT EXISTS idx_generation_cache_task ON generation_cache(task);

-- Pipeline run journal
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    run_date    TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    status      TEXT NOT NULL DEFAULT 'running',
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_run_date ON runs(run_date);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Track hit counts on the generation cache",
            sql: r#"
ALTER TABLE generation_cache ADD COLUMN hits INTEGER NOT NULL DEFAULT 0;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
