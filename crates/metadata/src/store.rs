//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{FileRepo, GroupRepo, UploadSessionRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: FileRepo + GroupRepo + UploadSessionRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout_secs: u64,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(30);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(query_timeout_secs.max(1)));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs.max(1)))
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout_secs,
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite metadata store ready"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Advisory query timeout, also used as the lock wait budget.
    pub fn query_timeout_secs(&self) -> u64 {
        self.query_timeout_secs
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use satchel_core::UploadState;
    use sqlx::Transaction;
    use uuid::Uuid;

    #[async_trait]
    impl FileRepo for SqliteStore {
        async fn create_file(&self, file: &FileRow) -> MetadataResult<()> {
            insert_file(&self.pool, file).await
        }

        async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE file_id = ?")
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_file_by_key(&self, storage_key: &str) -> MetadataResult<Option<FileRow>> {
            let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE storage_key = ?")
                .bind(storage_key)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn delete_file(&self, file_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM files WHERE file_id = ?")
                .bind(file_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn get_expired_files(&self, now: i64) -> MetadataResult<Vec<FileRow>> {
            let rows = sqlx::query_as::<_, FileRow>(
                "SELECT * FROM files WHERE expires_at IS NOT NULL AND expires_at <= ? ORDER BY expires_at",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl GroupRepo for SqliteStore {
        async fn create_group(&self, group: &GroupRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO file_groups (
                    group_id, owner_id, name, kind, declared_size, declared_count,
                    created_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(group.group_id)
            .bind(&group.owner_id)
            .bind(&group.name)
            .bind(&group.kind)
            .bind(group.declared_size)
            .bind(group.declared_count)
            .bind(group.created_at)
            .bind(group.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, format!("group {}", group.group_id)))?;
            Ok(())
        }

        async fn get_group(&self, group_id: Uuid) -> MetadataResult<Option<GroupRow>> {
            let row =
                sqlx::query_as::<_, GroupRow>("SELECT * FROM file_groups WHERE group_id = ?")
                    .bind(group_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn delete_group(&self, group_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM file_groups WHERE group_id = ?")
                .bind(group_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn create_group_item(&self, item: &GroupItemRow) -> MetadataResult<()> {
            insert_group_item(&self.pool, item).await
        }

        async fn get_group_item(&self, item_id: Uuid) -> MetadataResult<Option<OwnedGroupItemRow>> {
            let row = sqlx::query_as::<_, OwnedGroupItemRow>(
                r#"
                SELECT i.*, g.owner_id
                FROM file_group_items i
                JOIN file_groups g ON g.group_id = i.group_id
                WHERE i.item_id = ?
                "#,
            )
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_group_item_by_key(
            &self,
            storage_key: &str,
        ) -> MetadataResult<Option<GroupItemRow>> {
            let row = sqlx::query_as::<_, GroupItemRow>(
                "SELECT * FROM file_group_items WHERE storage_key = ?",
            )
            .bind(storage_key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_group_items(&self, group_id: Uuid) -> MetadataResult<Vec<GroupItemRow>> {
            let rows = sqlx::query_as::<_, GroupItemRow>(
                "SELECT * FROM file_group_items WHERE group_id = ? ORDER BY created_at, name",
            )
            .bind(group_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_group_items(&self, group_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM file_group_items WHERE group_id = ?")
                .bind(group_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn get_expired_groups(&self, now: i64) -> MetadataResult<Vec<GroupRow>> {
            let rows = sqlx::query_as::<_, GroupRow>(
                "SELECT * FROM file_groups WHERE expires_at IS NOT NULL AND expires_at <= ? ORDER BY expires_at",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UploadSessionRepo for SqliteStore {
        async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    upload_id, owner_id, storage_key, backend_session_id, group_id,
                    declared_name, declared_size, total_chunks, content_type,
                    file_expires_at, state, created_at, updated_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.upload_id)
            .bind(&session.owner_id)
            .bind(&session.storage_key)
            .bind(&session.backend_session_id)
            .bind(session.group_id)
            .bind(&session.declared_name)
            .bind(session.declared_size)
            .bind(session.total_chunks)
            .bind(&session.content_type)
            .bind(session.file_expires_at)
            .bind(&session.state)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, format!("upload session {}", session.upload_id))
            })?;
            Ok(())
        }

        async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn transition_state(
            &self,
            upload_id: Uuid,
            from: &[UploadState],
            to: UploadState,
            updated_at: i64,
        ) -> MetadataResult<bool> {
            if from.is_empty() {
                return Ok(false);
            }

            let placeholders = vec!["?"; from.len()].join(", ");
            let sql = format!(
                "UPDATE upload_sessions SET state = ?, updated_at = ? \
                 WHERE upload_id = ? AND state IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql)
                .bind(to.as_str())
                .bind(updated_at)
                .bind(upload_id);
            for state in from {
                query = query.bind(state.as_str());
            }

            let result = query.execute(&self.pool).await?;
            Ok(result.rows_affected() > 0)
        }

        async fn commit_file(
            &self,
            upload_id: Uuid,
            file: &FileRow,
            updated_at: i64,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            mark_completed(&mut tx, upload_id, updated_at).await?;
            insert_file(&mut *tx, file).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn commit_group_item(
            &self,
            upload_id: Uuid,
            item: &GroupItemRow,
            updated_at: i64,
        ) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;
            mark_completed(&mut tx, upload_id, updated_at).await?;
            insert_group_item(&mut *tx, item).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn get_expired_sessions(&self, now: i64) -> MetadataResult<Vec<UploadSessionRow>> {
            let rows = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE expires_at <= ? ORDER BY expires_at",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_session(&self, upload_id: Uuid) -> MetadataResult<u64> {
            let result = sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?")
                .bind(upload_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }
    }

    async fn insert_file<'e, E>(executor: E, file: &FileRow) -> MetadataResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO files (
                file_id, owner_id, name, size, content_type, storage_key,
                created_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.file_id)
        .bind(&file.owner_id)
        .bind(&file.name)
        .bind(file.size)
        .bind(&file.content_type)
        .bind(&file.storage_key)
        .bind(file.created_at)
        .bind(file.expires_at)
        .execute(executor)
        .await
        .map_err(|e| MetadataError::from_insert(e, format!("file {}", file.storage_key)))?;
        Ok(())
    }

    async fn insert_group_item<'e, E>(executor: E, item: &GroupItemRow) -> MetadataResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO file_group_items (
                item_id, group_id, name, size, content_type, storage_key, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.item_id)
        .bind(item.group_id)
        .bind(&item.name)
        .bind(item.size)
        .bind(&item.content_type)
        .bind(&item.storage_key)
        .bind(item.created_at)
        .execute(executor)
        .await
        .map_err(|e| MetadataError::from_insert(e, format!("group item {}", item.storage_key)))?;
        Ok(())
    }

    /// Flip a `completing` session to `completed` inside `tx`.
    async fn mark_completed(
        tx: &mut Transaction<'_, Sqlite>,
        upload_id: Uuid,
        updated_at: i64,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET state = ?, updated_at = ? WHERE upload_id = ? AND state = ?",
        )
        .bind(UploadState::Completed.as_str())
        .bind(updated_at)
        .bind(upload_id)
        .bind(UploadState::Completing.as_str())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT state FROM upload_sessions WHERE upload_id = ?")
                    .bind(upload_id)
                    .fetch_optional(&mut **tx)
                    .await?;
            return match current {
                None => Err(MetadataError::NotFound(format!("upload session {upload_id}"))),
                Some(from) => Err(MetadataError::InvalidStateTransition {
                    from,
                    to: UploadState::Completed.as_str().to_string(),
                }),
            };
        }
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
-- Standalone files
CREATE TABLE IF NOT EXISTS files (
    file_id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT,
    storage_key TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    -- NULL means permanent
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id);
CREATE INDEX IF NOT EXISTS idx_files_expires ON files(expires_at) WHERE expires_at IS NOT NULL;

-- File groups (declared_size and declared_count are advisory)
CREATE TABLE IF NOT EXISTS file_groups (
    group_id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    declared_size INTEGER NOT NULL DEFAULT 0,
    declared_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_file_groups_owner ON file_groups(owner_id);
CREATE INDEX IF NOT EXISTS idx_file_groups_expires ON file_groups(expires_at) WHERE expires_at IS NOT NULL;

-- Group items
CREATE TABLE IF NOT EXISTS file_group_items (
    item_id BLOB PRIMARY KEY,
    group_id BLOB NOT NULL REFERENCES file_groups(group_id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT,
    storage_key TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_file_group_items_group ON file_group_items(group_id);

-- Chunked upload registry. group_id is not a foreign key: an entry outlives
-- its group until the sweeper reaps it and aborts the backend session.
CREATE TABLE IF NOT EXISTS upload_sessions (
    upload_id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    backend_session_id TEXT NOT NULL,
    group_id BLOB,
    declared_name TEXT NOT NULL,
    declared_size INTEGER NOT NULL,
    total_chunks INTEGER NOT NULL,
    content_type TEXT,
    file_expires_at INTEGER,
    state TEXT NOT NULL DEFAULT 'created',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires ON upload_sessions(expires_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileRow, GroupItemRow, GroupRow, UploadSessionRow};
    use satchel_core::UploadState;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn test_store() -> (TempDir, SqliteStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("metadata.db"), None)
            .await
            .unwrap();
        (temp_dir, store)
    }

    fn file_row(key: &str, expires_at: Option<i64>) -> FileRow {
        FileRow {
            file_id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            name: "report.pdf".to_string(),
            size: 42,
            content_type: Some("application/pdf".to_string()),
            storage_key: key.to_string(),
            created_at: 1_000,
            expires_at,
        }
    }

    fn group_row(expires_at: Option<i64>) -> GroupRow {
        GroupRow {
            group_id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            name: "photos".to_string(),
            kind: "folder".to_string(),
            declared_size: 300,
            declared_count: 3,
            created_at: 1_000,
            expires_at,
        }
    }

    fn item_row(group_id: Uuid, name: &str) -> GroupItemRow {
        GroupItemRow {
            item_id: Uuid::new_v4(),
            group_id,
            name: name.to_string(),
            size: 100,
            content_type: None,
            storage_key: format!("groups/{group_id}/{name}"),
            created_at: 1_000,
        }
    }

    fn session_row(state: UploadState, expires_at: i64) -> UploadSessionRow {
        let upload_id = Uuid::new_v4();
        UploadSessionRow {
            upload_id,
            owner_id: "alice".to_string(),
            storage_key: format!("files/alice/{upload_id}"),
            backend_session_id: "backend-session".to_string(),
            group_id: None,
            declared_name: "movie.mkv".to_string(),
            declared_size: 3_000,
            total_chunks: 3,
            content_type: None,
            file_expires_at: None,
            state: state.as_str().to_string(),
            created_at: 1_000,
            updated_at: 1_000,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_health_check_and_remigrate() {
        let (_dir, store) = test_store().await;
        store.health_check().await.unwrap();
        // Schema creation is idempotent.
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_lookup_and_delete() {
        let (_dir, store) = test_store().await;
        let file = file_row("files/alice/1-a-report.pdf", None);
        store.create_file(&file).await.unwrap();

        let by_id = store.get_file(file.file_id).await.unwrap().unwrap();
        assert_eq!(by_id.storage_key, file.storage_key);
        let by_key = store
            .get_file_by_key(&file.storage_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.file_id, file.file_id);
        assert_eq!(by_key.content_type.as_deref(), Some("application/pdf"));

        assert_eq!(store.delete_file(file.file_id).await.unwrap(), 1);
        assert_eq!(store.delete_file(file.file_id).await.unwrap(), 0);
        assert!(store.get_file(file.file_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_key_is_unique() {
        let (_dir, store) = test_store().await;
        store.create_file(&file_row("files/a/x", None)).await.unwrap();

        let err = store
            .create_file(&file_row("files/a/x", None))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)), "{err}");
    }

    #[tokio::test]
    async fn test_expired_files_boundary() {
        let (_dir, store) = test_store().await;
        let past = file_row("files/a/past", Some(999));
        let boundary = file_row("files/a/boundary", Some(1_000));
        let future = file_row("files/a/future", Some(1_001));
        let permanent = file_row("files/a/permanent", None);
        for f in [&past, &boundary, &future, &permanent] {
            store.create_file(f).await.unwrap();
        }

        let expired: Vec<_> = store
            .get_expired_files(1_000)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.storage_key)
            .collect();
        assert_eq!(expired, vec!["files/a/past", "files/a/boundary"]);
    }

    #[tokio::test]
    async fn test_group_delete_cascades_items() {
        let (_dir, store) = test_store().await;
        let group = group_row(Some(500));
        store.create_group(&group).await.unwrap();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            store
                .create_group_item(&item_row(group.group_id, name))
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_group_items(group.group_id).await.unwrap().len(),
            3
        );

        assert_eq!(store.delete_group(group.group_id).await.unwrap(), 1);
        assert!(
            store
                .list_group_items(group.group_id)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(store.delete_group(group.group_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_group_item_requires_group() {
        let (_dir, store) = test_store().await;
        let err = store
            .create_group_item(&item_row(Uuid::new_v4(), "orphan.bin"))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Constraint(_)), "{err}");
    }

    #[tokio::test]
    async fn test_group_item_carries_owner() {
        let (_dir, store) = test_store().await;
        let group = group_row(None);
        store.create_group(&group).await.unwrap();
        let item = item_row(group.group_id, "notes.txt");
        store.create_group_item(&item).await.unwrap();

        let owned = store.get_group_item(item.item_id).await.unwrap().unwrap();
        assert_eq!(owned.owner_id, "alice");
        assert_eq!(owned.item.storage_key, item.storage_key);

        let by_key = store
            .get_group_item_by_key(&item.storage_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.item_id, item.item_id);
    }

    #[tokio::test]
    async fn test_expired_groups() {
        let (_dir, store) = test_store().await;
        let expired = group_row(Some(10));
        store.create_group(&expired).await.unwrap();
        store.create_group(&group_row(None)).await.unwrap();
        store.create_group(&group_row(Some(20))).await.unwrap();

        let rows = store.get_expired_groups(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group_id, expired.group_id);
    }

    #[tokio::test]
    async fn test_transition_state_is_exclusive() {
        let (_dir, store) = test_store().await;
        let session = session_row(UploadState::Created, 5_000);
        store.create_session(&session).await.unwrap();

        let active = [UploadState::Created, UploadState::PartsInProgress];
        assert!(
            store
                .transition_state(
                    session.upload_id,
                    &active,
                    UploadState::Completing,
                    1_001
                )
                .await
                .unwrap()
        );
        // A second completer loses.
        assert!(
            !store
                .transition_state(
                    session.upload_id,
                    &active,
                    UploadState::Completing,
                    1_002
                )
                .await
                .unwrap()
        );

        let row = store.get_session(session.upload_id).await.unwrap().unwrap();
        assert_eq!(row.state, "completing");
        assert_eq!(row.updated_at, 1_001);

        assert!(
            !store
                .transition_state(Uuid::new_v4(), &active, UploadState::Aborted, 1_003)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_commit_file_completes_session() {
        let (_dir, store) = test_store().await;
        let session = session_row(UploadState::Completing, 5_000);
        store.create_session(&session).await.unwrap();

        let file = file_row(&session.storage_key, None);
        store
            .commit_file(session.upload_id, &file, 2_000)
            .await
            .unwrap();

        let row = store.get_session(session.upload_id).await.unwrap().unwrap();
        assert_eq!(row.state, "completed");
        assert!(
            store
                .get_file_by_key(&session.storage_key)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_commit_requires_completing_state() {
        let (_dir, store) = test_store().await;
        let session = session_row(UploadState::PartsInProgress, 5_000);
        store.create_session(&session).await.unwrap();

        let file = file_row(&session.storage_key, None);
        let err = store
            .commit_file(session.upload_id, &file, 2_000)
            .await
            .unwrap_err();
        assert!(
            matches!(err, MetadataError::InvalidStateTransition { ref from, .. } if from == "parts_in_progress"),
            "{err}"
        );
        assert!(store.get_file(file.file_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_rolls_back_on_insert_failure() {
        let (_dir, store) = test_store().await;
        let session = session_row(UploadState::Completing, 5_000);
        store.create_session(&session).await.unwrap();
        store
            .create_file(&file_row(&session.storage_key, None))
            .await
            .unwrap();

        let err = store
            .commit_file(
                session.upload_id,
                &file_row(&session.storage_key, None),
                2_000,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)), "{err}");

        let row = store.get_session(session.upload_id).await.unwrap().unwrap();
        assert_eq!(row.state, "completing");
    }

    #[tokio::test]
    async fn test_commit_group_item() {
        let (_dir, store) = test_store().await;
        let group = group_row(None);
        store.create_group(&group).await.unwrap();
        let mut session = session_row(UploadState::Completing, 5_000);
        session.group_id = Some(group.group_id);
        store.create_session(&session).await.unwrap();

        let item = item_row(group.group_id, "part.bin");
        store
            .commit_group_item(session.upload_id, &item, 2_000)
            .await
            .unwrap();
        assert_eq!(
            store.list_group_items(group.group_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_expired_sessions_and_delete() {
        let (_dir, store) = test_store().await;
        let stale = session_row(UploadState::PartsInProgress, 100);
        let done = session_row(UploadState::Completed, 100);
        let live = session_row(UploadState::Created, 10_000);
        for s in [&stale, &done, &live] {
            store.create_session(s).await.unwrap();
        }

        let expired = store.get_expired_sessions(100).await.unwrap();
        let mut ids: Vec<_> = expired.iter().map(|s| s.upload_id).collect();
        ids.sort();
        let mut want = vec![stale.upload_id, done.upload_id];
        want.sort();
        assert_eq!(ids, want);

        assert_eq!(store.delete_session(stale.upload_id).await.unwrap(), 1);
        assert_eq!(store.delete_session(stale.upload_id).await.unwrap(), 0);
    }
}
