//! Persisted history for feedpress.
//!
//! Two append-mostly JSON files live next to the article artifacts:
//! - [`ProcessedHistory`]: every article that made it through a run, so the
//!   next run never enhances or publishes it again.
//! - [`PublishedLog`]: every spreadsheet row written, used to skip repeat
//!   uploads and near-duplicate copy.
//!
//! Both degrade to empty when the file is missing or corrupt: losing history
//! means re-processing, which is preferable to a run that publishes nothing.

mod processed;
mod published;

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use feedpress_shared::{FeedpressError, HISTORY_SCHEMA_VERSION, Result, write_json_atomic};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use processed::{FilterOutcome, ProcessedHistory};
pub use published::{PublishedLog, jaccard_similarity};

/// On-disk envelope shared by both history files.
#[derive(Debug, Deserialize)]
struct HistoryFile<T> {
    schema_version: u32,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default = "Vec::new")]
    records: Vec<T>,
}

/// Read a history envelope. Missing or unparsable files yield an empty list;
/// any other I/O failure is returned since it means the workspace is unusable.
fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "history file not found, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(FeedpressError::io(path, e)),
    };

    match serde_json::from_slice::<HistoryFile<T>>(&bytes) {
        Ok(file) => {
            if file.schema_version != HISTORY_SCHEMA_VERSION {
                warn!(
                    path = %path.display(),
                    found = file.schema_version,
                    expected = HISTORY_SCHEMA_VERSION,
                    "history schema version mismatch, reading anyway"
                );
            }
            tracing::debug!(
                path = %path.display(),
                last_updated = ?file.last_updated,
                records = file.records.len(),
                "read history file"
            );
            Ok(file.records)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt history file, treating as empty");
            Ok(Vec::new())
        }
    }
}

#[derive(Serialize)]
struct HistoryFileRef<'a, T> {
    schema_version: u32,
    last_updated: Option<DateTime<Utc>>,
    records: &'a [T],
}

fn save_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file = HistoryFileRef {
        schema_version: HISTORY_SCHEMA_VERSION,
        last_updated: Some(Utc::now()),
        records,
    };
    write_json_atomic(path, &file)
}
