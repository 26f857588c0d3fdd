//! Filesystem-backed record store.
//!
//! Layout: `<root>/<correlation dir>/<analysis_id>.json`, where the
//! correlation directory is a sanitized form of the correlation id plus a
//! short hash so distinct ids never collide.

use crate::error::{StoreError, StoreResult};
use crate::models::AnalysisResult;
use crate::storage::{sort_newest_first, RecordPage, RecordStore};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// JSON-file record store.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn correlation_dir(&self, correlation_id: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(correlation_id.as_bytes()));
        self.root
            .join(format!("{}-{}", sanitize(correlation_id), &digest[..8]))
    }

    fn record_path(&self, correlation_id: &str, analysis_id: &str) -> PathBuf {
        let name = if analysis_id.is_empty() {
            "record".to_string()
        } else {
            sanitize(analysis_id)
        };
        self.correlation_dir(correlation_id)
            .join(format!("{}.json", name))
    }

    /// Every record file, sorted by path for stable pagination.
    async fn all_record_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir in read_dir_sorted(&self.root).await? {
            if !dir.is_dir() {
                continue;
            }
            files.extend(
                read_dir_sorted(&dir)
                    .await?
                    .into_iter()
                    .filter(|p| p.extension().is_some_and(|ext| ext == "json")),
            );
        }
        Ok(files)
    }
}

fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    // Keep names short enough for any filesystem
    cleaned.chars().take(80).collect::<String>().trim_matches('.').to_string()
}

async fn read_dir_sorted(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Load a record, skipping files that are unreadable or expired.
async fn load_live(path: &Path) -> StoreResult<Option<AnalysisResult>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<AnalysisResult>(&bytes) {
        Ok(record) if record.is_expired(Utc::now()) => Ok(None),
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!("Skipping unreadable record {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn put(&self, record: &AnalysisResult) -> StoreResult<()> {
        let path = self.record_path(&record.correlation_id, &record.analysis_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn query(&self, correlation_id: &str, limit: usize) -> StoreResult<Vec<AnalysisResult>> {
        let mut records = Vec::new();
        for path in read_dir_sorted(&self.correlation_dir(correlation_id)).await? {
            if let Some(record) = load_live(&path).await? {
                records.push(record);
            }
        }

        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    async fn scan(&self, token: Option<&str>, page_size: usize) -> StoreResult<RecordPage> {
        let offset = match token {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| StoreError::InvalidToken(raw.to_string()))?,
            None => 0,
        };
        let page_size = page_size.max(1);

        let files = self.all_record_files().await?;
        let mut items = Vec::new();
        for path in files.iter().skip(offset).take(page_size) {
            if let Some(record) = load_live(path).await? {
                items.push(record);
            }
        }

        let next = offset + page_size;
        Ok(RecordPage {
            items,
            next_token: (next < files.len()).then(|| next.to_string()),
        })
    }

    async fn update_notification(
        &self,
        correlation_id: &str,
        analysis_id: &str,
        timestamp: &str,
    ) -> StoreResult<bool> {
        let path = self.record_path(correlation_id, analysis_id);
        let Some(mut record) = load_live(&path).await? else {
            return Ok(false);
        };

        record.notification_sent = true;
        record.notification_timestamp = Some(timestamp.to_string());
        tokio::fs::write(&path, serde_json::to_vec_pretty(&record)?).await?;
        Ok(true)
    }
}
