//! Expiration sweeper.
//!
//! Deletes expired files, expired groups (with every blob under the group
//! prefix), and abandoned upload sessions. Blobs are deleted before rows, so
//! a failed blob delete leaves the row for the next run. Nothing is locked:
//! a concurrent or repeated run finds zero rows to delete and counts nothing.
//!
//! An expired session that entered `Completing` less than
//! [`COMPLETING_GRACE_SECS`] ago is left alone, since a request may still be
//! assembling it.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{SWEEP_DELETED, SWEEP_DURATION, SWEEP_ERRORS, SWEEP_RUNS};
use crate::uploads::now_secs;
use satchel_core::{GroupId, UploadState, key};
use satchel_metadata::MetadataStore;
use satchel_metadata::models::{FileRow, GroupRow, UploadSessionRow};
use satchel_storage::ObjectStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// How long a `Completing` session is shielded from reaping after its last transition.
pub const COMPLETING_GRACE_SECS: i64 = 15 * 60;

/// Counts reported by one sweeper run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub deleted_files: u64,
    pub deleted_groups: u64,
    pub reaped_sessions: u64,
    /// Candidates skipped because a step failed.
    pub errors: u64,
}

/// Delete a file's blob, then its row.
///
/// Returns `false` when the row was already gone.
pub(crate) async fn purge_file(
    storage: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    file: &FileRow,
) -> ApiResult<bool> {
    storage.delete(&file.storage_key).await?;
    Ok(metadata.delete_file(file.file_id).await? > 0)
}

/// Delete every blob of a group, then its item rows and the group row.
///
/// Returns `false` when the group row was already gone.
pub(crate) async fn purge_group(
    storage: &dyn ObjectStore,
    metadata: &dyn MetadataStore,
    group: &GroupRow,
) -> ApiResult<bool> {
    let items = metadata.list_group_items(group.group_id).await?;
    for item in &items {
        storage.delete(&item.storage_key).await?;
    }

    // Blobs from uploads that never got a row.
    let prefix = key::group_prefix(&GroupId::from_uuid(group.group_id));
    for leftover in storage.list(&prefix).await? {
        storage.delete(&leftover).await?;
    }

    metadata.delete_group_items(group.group_id).await?;
    Ok(metadata.delete_group(group.group_id).await? > 0)
}

/// Periodic garbage collector for expired records.
pub struct Sweeper {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl Sweeper {
    pub fn new(storage: Arc<dyn ObjectStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { storage, metadata }
    }

    /// Run one sweep against the current time.
    pub async fn run(&self) -> SweepStats {
        self.run_at(now_secs()).await
    }

    /// Run one sweep treating `now` (Unix seconds) as the current time.
    ///
    /// A failure on one candidate is logged and counted, never fatal to the run.
    pub async fn run_at(&self, now: i64) -> SweepStats {
        let start = Instant::now();
        let mut stats = SweepStats::default();

        self.sweep_files(now, &mut stats).await;
        self.sweep_groups(now, &mut stats).await;
        self.reap_sessions(now, &mut stats).await;

        SWEEP_RUNS.inc();
        SWEEP_DELETED
            .with_label_values(&["file"])
            .inc_by(stats.deleted_files);
        SWEEP_DELETED
            .with_label_values(&["group"])
            .inc_by(stats.deleted_groups);
        SWEEP_DELETED
            .with_label_values(&["upload_session"])
            .inc_by(stats.reaped_sessions);
        SWEEP_ERRORS.inc_by(stats.errors);
        SWEEP_DURATION.observe(start.elapsed().as_secs_f64());

        tracing::info!(
            deleted_files = stats.deleted_files,
            deleted_groups = stats.deleted_groups,
            reaped_sessions = stats.reaped_sessions,
            errors = stats.errors,
            duration_ms = start.elapsed().as_millis() as u64,
            "Sweep finished"
        );
        stats
    }

    async fn sweep_files(&self, now: i64, stats: &mut SweepStats) {
        let files = match self.metadata.get_expired_files(now).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to select expired files");
                stats.errors += 1;
                return;
            }
        };

        for file in &files {
            match purge_file(self.storage.as_ref(), self.metadata.as_ref(), file).await {
                Ok(true) => stats.deleted_files += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        file_id = %file.file_id,
                        storage_key = %file.storage_key,
                        error = %e,
                        "Failed to sweep expired file"
                    );
                    stats.errors += 1;
                }
            }
        }
    }

    async fn sweep_groups(&self, now: i64, stats: &mut SweepStats) {
        let groups = match self.metadata.get_expired_groups(now).await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to select expired groups");
                stats.errors += 1;
                return;
            }
        };

        for group in &groups {
            match purge_group(self.storage.as_ref(), self.metadata.as_ref(), group).await {
                Ok(true) => stats.deleted_groups += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        group_id = %group.group_id,
                        error = %e,
                        "Failed to sweep expired group"
                    );
                    stats.errors += 1;
                }
            }
        }
    }

    async fn reap_sessions(&self, now: i64, stats: &mut SweepStats) {
        let sessions = match self.metadata.get_expired_sessions(now).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to select expired upload sessions");
                stats.errors += 1;
                return;
            }
        };

        for session in &sessions {
            match self.reap_session(session, now).await {
                Ok(true) => stats.reaped_sessions += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        upload_id = %session.upload_id,
                        error = %e,
                        "Failed to reap upload session"
                    );
                    stats.errors += 1;
                }
            }
        }
    }

    /// Abort the backend session unless it was consumed by a completion, then drop the entry.
    async fn reap_session(&self, session: &UploadSessionRow, now: i64) -> ApiResult<bool> {
        let state = UploadState::parse(&session.state)
            .map_err(|e| ApiError::Internal(format!("upload {}: {e}", session.upload_id)))?;
        if state == UploadState::Completing && now - session.updated_at < COMPLETING_GRACE_SECS {
            tracing::debug!(
                upload_id = %session.upload_id,
                updated_at = session.updated_at,
                "Leaving in-flight completion for a later sweep"
            );
            return Ok(false);
        }
        if state != UploadState::Completed {
            self.storage
                .abort_session(&session.storage_key, &session.backend_session_id)
                .await?;
        }
        Ok(self.metadata.delete_session(session.upload_id).await? > 0)
    }
}

/// Spawn a task that sweeps every `interval`, starting one interval from now.
pub fn spawn_periodic(sweeper: Arc<Sweeper>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Sweeper scheduled");
        loop {
            tokio::time::sleep(interval).await;
            sweeper.run().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use satchel_metadata::SqliteStore;
    use satchel_storage::{FilesystemBackend, ObjectAttrs};
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn sweeper() -> (TempDir, Sweeper) {
        let temp = tempfile::tempdir().unwrap();
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(temp.path().join("blobs")).await.unwrap());
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(temp.path().join("metadata.db"), None)
                .await
                .unwrap(),
        );
        (temp, Sweeper::new(storage, metadata))
    }

    async fn seed_file(sweeper: &Sweeper, key: &str, expires_at: Option<i64>) -> FileRow {
        sweeper
            .storage
            .put(key, Bytes::from_static(b"data"), &ObjectAttrs::default())
            .await
            .unwrap();
        let file = FileRow {
            file_id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            name: "a.txt".to_string(),
            size: 4,
            content_type: None,
            storage_key: key.to_string(),
            created_at: 0,
            expires_at,
        };
        sweeper.metadata.create_file(&file).await.unwrap();
        file
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_files() {
        let (_temp, sweeper) = sweeper().await;
        let expired = seed_file(&sweeper, "files/alice/old", Some(100)).await;
        let fresh = seed_file(&sweeper, "files/alice/new", Some(1_000)).await;
        let permanent = seed_file(&sweeper, "files/alice/keep", None).await;

        let stats = sweeper.run_at(100).await;
        assert_eq!(stats.deleted_files, 1);
        assert_eq!(stats.errors, 0);

        assert!(sweeper.metadata.get_file(expired.file_id).await.unwrap().is_none());
        assert!(!sweeper.storage.exists(&expired.storage_key).await.unwrap());
        assert!(sweeper.metadata.get_file(fresh.file_id).await.unwrap().is_some());
        assert!(sweeper.metadata.get_file(permanent.file_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_sweep_reports_nothing() {
        let (_temp, sweeper) = sweeper().await;
        seed_file(&sweeper, "files/alice/old", Some(10)).await;

        let first = sweeper.run_at(20).await;
        assert_eq!(first.deleted_files, 1);
        let second = sweeper.run_at(20).await;
        assert_eq!(second, SweepStats::default());
    }

    #[tokio::test]
    async fn test_purge_file_tolerates_missing_blob() {
        let (_temp, sweeper) = sweeper().await;
        let file = seed_file(&sweeper, "files/alice/gone", Some(10)).await;
        sweeper.storage.delete(&file.storage_key).await.unwrap();

        let removed = purge_file(sweeper.storage.as_ref(), sweeper.metadata.as_ref(), &file)
            .await
            .unwrap();
        assert!(removed);
        let again = purge_file(sweeper.storage.as_ref(), sweeper.metadata.as_ref(), &file)
            .await
            .unwrap();
        assert!(!again);
    }

    fn session_row(
        storage_key: &str,
        backend_session_id: &str,
        state: UploadState,
        updated_at: i64,
        expires_at: i64,
    ) -> UploadSessionRow {
        UploadSessionRow {
            upload_id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            storage_key: storage_key.to_string(),
            backend_session_id: backend_session_id.to_string(),
            group_id: None,
            declared_name: "big".to_string(),
            declared_size: 1,
            total_chunks: 2,
            content_type: None,
            file_expires_at: None,
            state: state.as_str().to_string(),
            created_at: 0,
            updated_at,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_recent_completion_is_not_reaped() {
        let (_temp, sweeper) = sweeper().await;
        let storage_key = "files/alice/assembling";
        let backend_session_id = sweeper
            .storage
            .create_session(storage_key, &ObjectAttrs::default())
            .await
            .unwrap();
        let etag = sweeper
            .storage
            .upload_part(storage_key, &backend_session_id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap();

        let entered_completing = 1_000;
        let session = session_row(
            storage_key,
            &backend_session_id,
            UploadState::Completing,
            entered_completing,
            500,
        );
        sweeper.metadata.create_session(&session).await.unwrap();

        let stats = sweeper.run_at(entered_completing + 1).await;
        assert_eq!(stats.reaped_sessions, 0);
        assert_eq!(stats.errors, 0);
        assert!(sweeper.metadata.get_session(session.upload_id).await.unwrap().is_some());

        // The backend session is still intact for the request assembling it.
        let parts = [satchel_storage::CompletedPart {
            part_number: 1,
            etag,
        }];
        sweeper
            .storage
            .complete_session(storage_key, &backend_session_id, &parts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stalled_completion_is_reaped_after_grace() {
        let (_temp, sweeper) = sweeper().await;
        let storage_key = "files/alice/stalled";
        let backend_session_id = sweeper
            .storage
            .create_session(storage_key, &ObjectAttrs::default())
            .await
            .unwrap();
        let session = session_row(
            storage_key,
            &backend_session_id,
            UploadState::Completing,
            1_000,
            500,
        );
        sweeper.metadata.create_session(&session).await.unwrap();

        let early = sweeper.run_at(1_000 + COMPLETING_GRACE_SECS - 1).await;
        assert_eq!(early.reaped_sessions, 0);
        let late = sweeper.run_at(1_000 + COMPLETING_GRACE_SECS).await;
        assert_eq!(late.reaped_sessions, 1);
        assert!(sweeper.metadata.get_session(session.upload_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reaps_abandoned_session() {
        let (_temp, sweeper) = sweeper().await;
        let storage_key = "files/alice/big";
        let backend_session_id = sweeper
            .storage
            .create_session(storage_key, &ObjectAttrs::default())
            .await
            .unwrap();
        sweeper
            .storage
            .upload_part(storage_key, &backend_session_id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap();

        let session = session_row(
            storage_key,
            &backend_session_id,
            UploadState::PartsInProgress,
            0,
            50,
        );
        let upload_id = session.upload_id;
        sweeper.metadata.create_session(&session).await.unwrap();

        assert_eq!(sweeper.run_at(49).await.reaped_sessions, 0);
        let stats = sweeper.run_at(50).await;
        assert_eq!(stats.reaped_sessions, 1);
        assert!(sweeper.metadata.get_session(upload_id).await.unwrap().is_none());

        // The backend session is gone, so completing it now must fail.
        let parts = [satchel_storage::CompletedPart {
            part_number: 1,
            etag: "whatever".to_string(),
        }];
        assert!(
            sweeper
                .storage
                .complete_session(storage_key, &backend_session_id, &parts)
                .await
                .is_err()
        );
    }
}
