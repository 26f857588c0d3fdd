//! Write-once completion markers.
//!
//! A unit of work is identified either by its source object version or by
//! a hash of its content. Once the marker for a key exists every later
//! check reports the unit as done; there is no way to clear it.
//!
//! The marker is written only after the unit's side effects succeed, so a
//! crash in between leaves the unit retryable. Side effects are therefore
//! at-least-once, not exactly-once.

use crate::error::{StoreError, StoreResult};
use crate::storage::ObjectStore;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker body.
const MARKER_BODY: &[u8] = b"done";

/// Stage namespaces for markers.
pub const INGEST_STAGE: &str = "ingest";
pub const ANALYSIS_STAGE: &str = "analysis";

/// How a unit of work is identified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerKey {
    /// Source object version.
    Composite {
        bucket: String,
        key: String,
        version_id: String,
    },
    /// SHA-256 of the object content, lowercase hex.
    ContentHash(String),
}

impl MarkerKey {
    pub fn composite(bucket: &str, key: &str, version_id: &str) -> Self {
        Self::Composite {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version_id.to_string(),
        }
    }

    /// Object key of the marker under `prefix` for `stage`.
    pub fn object_key(&self, prefix: &str, stage: &str) -> String {
        match self {
            MarkerKey::Composite {
                bucket,
                key,
                version_id,
            } => format!(
                "{}{}/{}__{}__{}.done",
                prefix,
                stage,
                bucket,
                key.replace('/', "__"),
                version_id
            ),
            MarkerKey::ContentHash(hash) => format!("{}{}/sha256-{}.done", prefix, stage, hash),
        }
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Result of a marker check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    AlreadyDone,
    Proceed,
}

/// Result of writing a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Written,
    /// Another invocation wrote the marker first.
    AlreadyPresent,
}

/// Outcome of [`IdempotencyGate::check_and_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome<T> {
    AlreadyDone,
    Completed { value: T, activation: Activation },
}

/// Guards units of work of one stage against repeated execution.
#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    stage: String,
}

impl IdempotencyGate {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
            stage: stage.into(),
        }
    }

    /// Full object key of the marker for `key`.
    pub fn marker_key(&self, key: &MarkerKey) -> String {
        key.object_key(&self.prefix, &self.stage)
    }

    pub async fn check(&self, key: &MarkerKey) -> StoreResult<GateStatus> {
        let marker = self.marker_key(key);
        if self.store.exists(&self.bucket, &marker).await? {
            debug!(marker = %marker, "Marker present");
            Ok(GateStatus::AlreadyDone)
        } else {
            Ok(GateStatus::Proceed)
        }
    }

    /// Write the marker. Call only after every side effect succeeded.
    pub async fn activate(&self, key: &MarkerKey) -> StoreResult<Activation> {
        let marker = self.marker_key(key);
        if self
            .store
            .put_if_absent(&self.bucket, &marker, MARKER_BODY)
            .await?
        {
            debug!(marker = %marker, "Marker written");
            Ok(Activation::Written)
        } else {
            warn!(marker = %marker, stage = %self.stage, "marker_race: already written by a concurrent run");
            Ok(Activation::AlreadyPresent)
        }
    }

    /// Check the marker, run `work` if absent, and activate on success.
    ///
    /// A failed `work` leaves the marker absent.
    pub async fn check_and_run<T, E, F, Fut>(&self, key: &MarkerKey, work: F) -> Result<GateOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        if self.check(key).await? == GateStatus::AlreadyDone {
            return Ok(GateOutcome::AlreadyDone);
        }

        let value = work().await?;
        let activation = self.activate(key).await?;
        Ok(GateOutcome::Completed { value, activation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryObjectStore;
    use crate::storage::FsObjectStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_marker_key_formats() {
        let composite = MarkerKey::composite("health", "raw/2024/a.csv", "null");
        assert_eq!(
            composite.object_key("markers/", INGEST_STAGE),
            "markers/ingest/health__raw__2024__a.csv__null.done"
        );

        let hashed = MarkerKey::ContentHash(content_hash(b"abc"));
        assert_eq!(
            hashed.object_key("markers/", ANALYSIS_STAGE),
            "markers/analysis/sha256-ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.done"
        );
    }

    #[tokio::test]
    async fn test_second_run_is_skipped() {
        let store = Arc::new(MemoryObjectStore::new());
        let gate = IdempotencyGate::new(store.clone(), "health", "markers/", INGEST_STAGE);
        let key = MarkerKey::composite("health", "raw/a.csv", "null");
        let calls = AtomicUsize::new(0);

        let first: GateOutcome<u32> = gate
            .check_and_run(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>(7)
            })
            .await
            .unwrap();
        assert_eq!(
            first,
            GateOutcome::Completed {
                value: 7,
                activation: Activation::Written
            }
        );

        let second: GateOutcome<u32> = gate
            .check_and_run(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>(8)
            })
            .await
            .unwrap();
        assert_eq!(second, GateOutcome::AlreadyDone);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_work_leaves_marker_absent() {
        let store = Arc::new(MemoryObjectStore::new());
        let gate = IdempotencyGate::new(store, "health", "markers/", ANALYSIS_STAGE);
        let key = MarkerKey::ContentHash("deadbeef".to_string());

        let result: Result<GateOutcome<()>, StoreError> = gate
            .check_and_run(&key, || async {
                Err(StoreError::InvalidKey("boom".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(gate.check(&key).await.unwrap(), GateStatus::Proceed);
    }

    #[tokio::test]
    async fn test_concurrent_winner_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        let gate = IdempotencyGate::new(store, "health", "markers/", INGEST_STAGE);
        let key = MarkerKey::composite("health", "raw/a.csv", "null");

        assert_eq!(gate.activate(&key).await.unwrap(), Activation::Written);
        assert_eq!(gate.activate(&key).await.unwrap(), Activation::AlreadyPresent);
        assert_eq!(gate.check(&key).await.unwrap(), GateStatus::AlreadyDone);
    }

    #[test]
    fn test_stages_do_not_collide() {
        let key = MarkerKey::composite("b", "k", "v");
        assert_ne!(
            key.object_key("markers/", INGEST_STAGE),
            key.object_key("markers/", ANALYSIS_STAGE)
        );
    }
}
