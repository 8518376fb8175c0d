//! Snapshot history kept in a single JSON file.
//!
//! The file holds at most one snapshot per day and the most recent
//! [`HISTORY_DAYS`] days. Writes go to a temporary file in the same
//! directory which is then renamed over the history file, so a crash mid-write
//! never leaves a truncated history behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::ExternalError;
use crate::pipeline::{Snapshot, SnapshotStore};

/// Snapshots retained in the history file.
pub const HISTORY_DAYS: usize = 30;

#[derive(Debug, Default, Serialize, Deserialize)]
struct History {
    #[serde(default)]
    snapshots: Vec<Snapshot>,
}

/// [`SnapshotStore`] over a JSON history file.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the history file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored snapshot, oldest first.
    pub async fn history(&self) -> Result<Vec<Snapshot>, ExternalError> {
        Ok(self.read().await?.snapshots)
    }

    /// Latest snapshot dated strictly before `today`.
    pub async fn prior_to(&self, today: NaiveDate) -> Result<Option<Snapshot>, ExternalError> {
        let history = self.read().await?;
        Ok(history.snapshots.into_iter().filter(|s| s.date < today).max_by_key(|s| s.date))
    }

    async fn read(&self) -> Result<History, ExternalError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| ExternalError::Parse(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(History::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn load_prior(&self) -> Result<Option<Snapshot>, ExternalError> {
        self.prior_to(Utc::now().date_naive()).await
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), ExternalError> {
        let mut history = match self.read().await {
            Ok(history) => history,
            Err(ExternalError::Parse(message)) => {
                warn!(error = %message, "History file unreadable, starting a new one");
                History::default()
            }
            Err(e) => return Err(e),
        };

        // Re-running on the same day replaces that day's snapshot.
        history.snapshots.retain(|s| s.date != snapshot.date);
        history.snapshots.push(snapshot.clone());
        history.snapshots.sort_by_key(|s| s.date);
        let excess = history.snapshots.len().saturating_sub(HISTORY_DAYS);
        history.snapshots.drain(..excess);

        let body = serde_json::to_vec_pretty(&history)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .map_err(|e| ExternalError::Other(format!("snapshot write task failed: {}", e)))??;

        debug!(path = %self.path.display(), kept = history.snapshots.len(), "History saved");
        Ok(())
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), ExternalError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ExternalError::from(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SnapshotEntry;
    use chrono::Duration;
    use tempfile::TempDir;

    fn snapshot(date: NaiveDate, name: &str) -> Snapshot {
        Snapshot {
            date,
            taken_at: Utc::now(),
            entries: vec![SnapshotEntry {
                name: name.to_string(),
                url: String::new(),
                language: None,
                stars: 1,
                growth_rate: 0.0,
                description: None,
                summary: String::new(),
            }],
        }
    }

    #[tokio::test]
    async fn test_missing_file_has_no_prior() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("data/history.json"));
        assert!(store.load_prior().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prior_is_latest_earlier_day() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("data/history.json"));
        let today = Utc::now().date_naive();

        store.save(&snapshot(today - Duration::days(3), "old")).await.unwrap();
        store.save(&snapshot(today - Duration::days(1), "yesterday")).await.unwrap();
        store.save(&snapshot(today, "today")).await.unwrap();

        let prior = store.prior_to(today).await.unwrap().unwrap();
        assert_eq!(prior.entries[0].name, "yesterday");
        assert_eq!(store.history().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_same_day_is_replaced() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("history.json"));
        let today = Utc::now().date_naive();

        store.save(&snapshot(today, "first")).await.unwrap();
        store.save(&snapshot(today, "second")).await.unwrap();

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entries[0].name, "second");
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("history.json"));
        let today = Utc::now().date_naive();

        for days_ago in (0..35).rev() {
            store
                .save(&snapshot(today - Duration::days(days_ago), "x"))
                .await
                .unwrap();
        }

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), HISTORY_DAYS);
        assert_eq!(history[0].date, today - Duration::days(29));
        assert_eq!(history[HISTORY_DAYS - 1].date, today);
    }

    #[tokio::test]
    async fn test_corrupt_history_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "garbage").unwrap();
        let store = JsonSnapshotStore::new(&path);

        assert!(matches!(store.load_prior().await, Err(ExternalError::Parse(_))));
        store.save(&snapshot(Utc::now().date_naive(), "fresh")).await.unwrap();
        assert_eq!(store.history().await.unwrap().len(), 1);
    }
}
