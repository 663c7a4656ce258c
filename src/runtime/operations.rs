//! Append-only log of every remote order id a run created, so a later
//! cleanup pass can find and terminate orders a crashed or interrupted run
//! left behind.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

pub const DEFAULT_OPERATIONS_DIR: &str = "logs";

#[derive(Debug)]
pub struct OperationsTracker {
    file: Mutex<File>,
    path: PathBuf,
    timestamp: String,
}

impl OperationsTracker {
    /// Opens `<root>/<YYYY-MM-DD>/operations_<HH-MM-SS>.txt` for appending.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self> {
        Self::create_at(root, Local::now()).await
    }

    pub async fn create_at(root: impl AsRef<Path>, now: DateTime<Local>) -> Result<Self> {
        let date_dir = root.as_ref().join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&date_dir)
            .await
            .with_context(|| format!("failed to create operations directory {}", date_dir.display()))?;

        let timestamp = now.format("%H-%M-%S").to_string();
        let path = date_dir.join(file_name(&timestamp));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open operations file {}", path.display()))?;

        tracing::info!(path = %path.display(), timestamp = %timestamp, "tracking created orders");
        Ok(Self {
            file: Mutex::new(file),
            path,
            timestamp,
        })
    }

    /// Appends one remote id and syncs it to disk before returning.
    pub async fn record(&self, remote_id: &str) -> Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(format!("{remote_id}\n").as_bytes())
            .await
            .context("failed to write order id")?;
        file.sync_data().await.context("failed to sync operations file")?;
        Ok(())
    }

    /// The `HH-MM-SS` stamp that identifies this run for cleanup.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn file_name(timestamp: &str) -> String {
    format!("operations_{timestamp}.txt")
}

/// Looks for `operations_<timestamp>.txt` under every date directory of
/// `root`.
pub async fn find_operations_file(root: impl AsRef<Path>, timestamp: &str) -> Result<PathBuf> {
    let root = root.as_ref();
    let mut entries = fs::read_dir(root)
        .await
        .with_context(|| format!("failed to read logs directory {}", root.display()))?;

    let name = file_name(timestamp);
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            let candidate = entry.path().join(&name);
            if fs::try_exists(&candidate).await.unwrap_or(false) {
                candidates.push(candidate);
            }
        }
    }

    // Most recent date directory first when the same stamp exists twice.
    candidates.sort();
    match candidates.pop() {
        Some(path) => Ok(path),
        None => bail!("operations file not found for timestamp {timestamp}"),
    }
}

/// Non-empty lines of an operations file, in write order.
pub async fn read_order_ids(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut ids = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            ids.push(line.to_string());
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn records_ids_and_finds_them_by_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let now = Local
            .with_ymd_and_hms(2024, 1, 15, 14, 30, 45)
            .single()
            .expect("time");
        let tracker = OperationsTracker::create_at(dir.path(), now)
            .await
            .expect("tracker");
        assert_eq!(tracker.timestamp(), "14-30-45");
        assert!(tracker.path().ends_with("2024-01-15/operations_14-30-45.txt"));

        tracker.record("order-1").await.expect("record");
        tracker.record("order-2").await.expect("record");

        let found = find_operations_file(dir.path(), "14-30-45")
            .await
            .expect("found");
        assert_eq!(found, tracker.path());
        assert_eq!(
            read_order_ids(&found).await.expect("ids"),
            vec!["order-1".to_string(), "order-2".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_timestamp_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("2024-01-15"))
            .await
            .expect("date dir");
        let err = find_operations_file(dir.path(), "00-00-00")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("00-00-00"));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ops.txt");
        fs::write(&path, "a\n\n  \nb\n").await.expect("write");
        assert_eq!(read_order_ids(&path).await.expect("ids"), vec!["a", "b"]);
    }
}
