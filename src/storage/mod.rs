//! Storage capabilities.
//!
//! Stages never talk to a concrete backend; they hold an
//! `Arc<dyn ObjectStore>` for blobs and markers and an
//! `Arc<dyn RecordStore>` for analysis records.

pub mod fs;
#[cfg(test)]
pub mod memory;
pub mod records;

use crate::error::StoreResult;
use crate::models::AnalysisResult;
use async_trait::async_trait;

pub use fs::FsObjectStore;
pub use records::FsRecordStore;

/// Blob storage addressed by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object. Fails with `StoreError::NotFound` when absent.
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Write or overwrite an object.
    async fn put(&self, bucket: &str, key: &str, body: &[u8], content_type: &str)
        -> StoreResult<()>;

    /// Write only if no object exists at the key.
    ///
    /// Returns `false` when an object was already present.
    async fn put_if_absent(&self, bucket: &str, key: &str, body: &[u8]) -> StoreResult<bool>;

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>>;

    /// Version identifier of the stored object, when the backend has one.
    async fn version_id(&self, _bucket: &str, _key: &str) -> StoreResult<String> {
        Ok("null".to_string())
    }
}

/// One page of a record scan.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub items: Vec<AnalysisResult>,
    /// Opaque token for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Structured storage for analysis records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, record: &AnalysisResult) -> StoreResult<()>;

    /// Records for one correlation id, newest first.
    async fn query(&self, correlation_id: &str, limit: usize) -> StoreResult<Vec<AnalysisResult>>;

    /// Unordered scan over all live records.
    async fn scan(&self, token: Option<&str>, page_size: usize) -> StoreResult<RecordPage>;

    /// Mark a record as notified. Returns `false` if it no longer exists.
    async fn update_notification(
        &self,
        correlation_id: &str,
        analysis_id: &str,
        timestamp: &str,
    ) -> StoreResult<bool>;
}

/// Which records a report covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The newest `limit` records of one correlation id.
    Correlation { correlation_id: String, limit: usize },
    /// The newest `limit` records across all correlation ids.
    Recent { limit: usize },
}

impl Selection {
    /// Human description used in report metadata.
    pub fn describe(&self, found: usize) -> String {
        match self {
            Selection::Correlation { correlation_id, .. } => {
                format!("Current file only ({})", correlation_id)
            }
            Selection::Recent { .. } => format!("Last {} processed files", found),
        }
    }
}

/// Scan every page and keep the newest `limit` records.
pub async fn fetch_recent(
    store: &dyn RecordStore,
    limit: usize,
    page_size: usize,
) -> StoreResult<Vec<AnalysisResult>> {
    let mut all = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = store.scan(token.as_deref(), page_size).await?;
        all.extend(page.items);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    sort_newest_first(&mut all);
    all.truncate(limit);
    Ok(all)
}

/// Resolve a selection against the record store, newest first.
pub async fn select_records(
    store: &dyn RecordStore,
    selection: &Selection,
    page_size: usize,
) -> StoreResult<Vec<AnalysisResult>> {
    match selection {
        Selection::Correlation {
            correlation_id,
            limit,
        } => store.query(correlation_id, *limit).await,
        Selection::Recent { limit } => fetch_recent(store, *limit, page_size).await,
    }
}

/// Sort by `analysis_timestamp`, newest first. Ties keep their order.
pub fn sort_newest_first(records: &mut [AnalysisResult]) {
    records.sort_by(|a, b| b.analysis_timestamp.cmp(&a.analysis_timestamp));
}

/// Final path component of an object key.
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Basename without a trailing `.csv`.
pub fn stem(key: &str) -> &str {
    let name = basename(key);
    name.strip_suffix(".csv").unwrap_or(name)
}
