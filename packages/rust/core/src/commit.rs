//! History commit: the last step of a run. Articles that made it all the
//! way through enter the processed history; everything else is left for
//! the next run to retry.

use chrono::{DateTime, Utc};
use feedpress_history::{ProcessedHistory, PublishedLog};
use feedpress_shared::ArticleState;
use serde::Serialize;
use tracing::info;

use crate::artifacts::RunLedger;

/// Counters for one commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitStats {
    pub committed: usize,
    pub already_known: usize,
    /// Articles that stopped short of the target state.
    pub pending: usize,
    pub pruned_processed: usize,
    pub pruned_published: usize,
}

/// State an article must reach before it is recorded: `published`, or
/// `exported` when spreadsheet publishing is turned off.
pub fn commit_target(publishing_enabled: bool) -> ArticleState {
    if publishing_enabled {
        ArticleState::Published
    } else {
        ArticleState::Exported
    }
}

/// Record finished ledger articles into `history`, then prune both logs to
/// `retention_days`.
pub fn commit_history(
    ledger: &RunLedger,
    history: &mut ProcessedHistory,
    published: &mut PublishedLog,
    publishing_enabled: bool,
    retention_days: u32,
    now: DateTime<Utc>,
) -> CommitStats {
    let target = commit_target(publishing_enabled);
    let mut stats = CommitStats::default();

    for (id, entry) in ledger.entries() {
        if entry.state == ArticleState::SkippedDuplicate {
            continue;
        }
        if entry.state < target {
            stats.pending += 1;
            continue;
        }
        if history.record(id.clone(), &entry.url, now) {
            stats.committed += 1;
        } else {
            stats.already_known += 1;
        }
    }

    stats.pruned_processed = history.prune(now, retention_days);
    stats.pruned_published = published.prune(now, retention_days);

    info!(
        committed = stats.committed,
        pending = stats.pending,
        target = %target,
        history = history.len(),
        "history committed"
    );
    stats
}
