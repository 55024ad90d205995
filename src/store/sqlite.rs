//! SQLite-backed document store.
//!
//! Documents are rows keyed by their full path, with the parent collection path stored
//! alongside for listing. A batch is one SQLite transaction.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};

use super::{apply_updates, split_path, Document, DocumentStore, Fields, StoreError, WriteOp};
use crate::paths::{CollectionPath, DocPath};

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            path TEXT PRIMARY KEY,
            parent TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            fields TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent, doc_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Document store persisting to a SQLite database.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let pool = init_database(db_path).await.map_err(read_error)?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT doc_id, fields FROM documents WHERE path = ?")
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<Vec<Document>, StoreError> {
        let rows =
            sqlx::query("SELECT doc_id, fields FROM documents WHERE parent = ? ORDER BY doc_id")
                .bind(collection.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(read_error)?;

        rows.iter().map(document_from_row).collect()
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();

        // Rolled back on drop if any write fails
        let mut tx = self.pool.begin().await.map_err(commit_error)?;

        for op in &writes {
            apply(&mut tx, op, &now).await?;
        }

        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(commit_error)?;
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await
            .map_err(commit_error)?;
        let revision: i64 = row.get("revision_id");

        tx.commit().await.map_err(commit_error)?;
        Ok(revision as u64)
    }

    async fn revision(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(read_error)?;
        let revision: i64 = row.get("revision_id");
        Ok(revision as u64)
    }
}

async fn apply(
    tx: &mut Transaction<'_, Sqlite>,
    op: &WriteOp,
    now: &str,
) -> Result<(), StoreError> {
    match op {
        WriteOp::Set { path, fields } => upsert(tx, path, fields, now).await,
        WriteOp::Create { path, fields } => insert(tx, path, fields, now).await,
        WriteOp::Update { path, updates } => {
            let mut fields = load_fields(tx, path).await?.ok_or_else(|| {
                StoreError::CommitFailed(format!("document {path} does not exist"))
            })?;
            apply_updates(&mut fields, updates);
            upsert(tx, path, &fields, now).await
        }
        WriteOp::Delete { path } => {
            // '0' sorts right after '/', so [path/, path0) covers every nested path
            sqlx::query("DELETE FROM documents WHERE path = ? OR (path >= ? AND path < ?)")
                .bind(path.as_str())
                .bind(format!("{path}/"))
                .bind(format!("{path}0"))
                .execute(&mut **tx)
                .await
                .map_err(commit_error)?;
            Ok(())
        }
    }
}

async fn load_fields(
    tx: &mut Transaction<'_, Sqlite>,
    path: &DocPath,
) -> Result<Option<Fields>, StoreError> {
    let row = sqlx::query("SELECT fields FROM documents WHERE path = ?")
        .bind(path.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(commit_error)?;

    match row {
        Some(row) => {
            let raw: String = row.get("fields");
            parse_fields(&raw)
                .map(Some)
                .map_err(|e| StoreError::CommitFailed(e.to_string()))
        }
        None => Ok(None),
    }
}

/// Plain insert; the primary key rejects a path that already exists.
async fn insert(
    tx: &mut Transaction<'_, Sqlite>,
    path: &DocPath,
    fields: &Fields,
    now: &str,
) -> Result<(), StoreError> {
    let (parent, doc_id) = split_path(path.as_str());
    let json = serde_json::to_string(fields).map_err(|e| StoreError::CommitFailed(e.to_string()))?;

    sqlx::query(
        "INSERT INTO documents (path, parent, doc_id, fields, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(path.as_str())
    .bind(parent)
    .bind(doc_id)
    .bind(&json)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|err| match err.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            tracing::debug!(path = %path, "create rejected, document exists");
            StoreError::CommitFailed(format!("document {path} already exists"))
        }
        _ => commit_error(err),
    })?;
    Ok(())
}

async fn upsert(
    tx: &mut Transaction<'_, Sqlite>,
    path: &DocPath,
    fields: &Fields,
    now: &str,
) -> Result<(), StoreError> {
    let (parent, doc_id) = split_path(path.as_str());
    let json = serde_json::to_string(fields).map_err(|e| StoreError::CommitFailed(e.to_string()))?;

    sqlx::query(
        r#"INSERT INTO documents (path, parent, doc_id, fields, updated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(path) DO UPDATE SET fields = excluded.fields, updated_at = excluded.updated_at"#,
    )
    .bind(path.as_str())
    .bind(parent)
    .bind(doc_id)
    .bind(&json)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(commit_error)?;
    Ok(())
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document, StoreError> {
    let raw: String = row.get("fields");
    Ok(Document {
        id: row.get("doc_id"),
        fields: parse_fields(&raw).map_err(|e| StoreError::RetrievalFailed(e.to_string()))?,
    })
}

fn parse_fields(raw: &str) -> Result<Fields, serde_json::Error> {
    serde_json::from_str(raw)
}

fn read_error(err: sqlx::Error) -> StoreError {
    tracing::error!("Database read error: {:?}", err);
    StoreError::RetrievalFailed(format!("Database error: {}", err))
}

fn commit_error(err: sqlx::Error) -> StoreError {
    tracing::error!("Database commit error: {:?}", err);
    StoreError::CommitFailed(format!("Database error: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{resolve_collection, resolve_path, EntityKind};
    use crate::store::FieldUpdate;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_store() -> (SqliteDocumentStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SqliteDocumentStore::open(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to open store");
        (store, temp_dir)
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let (store, _dir) = open_store().await;
        let tag = resolve_path(EntityKind::GroupTag, &["pets"]).unwrap();

        store
            .create(&tag, fields(json!({ "entities": ["Dogs"] })))
            .await
            .unwrap();
        assert_eq!(store.revision().await.unwrap(), 1);

        let result = store
            .commit(vec![
                WriteOp::Update {
                    path: tag.clone(),
                    updates: vec![FieldUpdate::union_str("entities", "Cats")],
                },
                WriteOp::Create {
                    path: tag.clone(),
                    fields: Fields::new(),
                },
            ])
            .await;
        assert!(matches!(result, Err(StoreError::CommitFailed(_))));

        let doc = store.get(&tag).await.unwrap().unwrap();
        assert_eq!(doc.string_list("entities"), vec!["Dogs".to_string()]);
        assert_eq!(store.revision().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recursive_delete_and_listing() {
        let (store, _dir) = open_store().await;
        let group = resolve_path(EntityKind::Group, &["g1"]).unwrap();
        let sibling = resolve_path(EntityKind::Group, &["g1x"]).unwrap();
        let member = resolve_path(EntityKind::GroupMember, &["g1", "u1"]).unwrap();
        let message = resolve_path(EntityKind::Message, &["g1", "f1", "m1"]).unwrap();

        for path in [&group, &sibling, &member, &message] {
            store
                .set(path, fields(json!({ "name": path.to_string() })))
                .await
                .unwrap();
        }

        let members = store
            .list_collection(&resolve_collection(EntityKind::GroupMember, &["g1"]).unwrap())
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "u1");

        store.delete(&group).await.unwrap();
        assert!(store.get(&group).await.unwrap().is_none());
        assert!(store.get(&member).await.unwrap().is_none());
        assert!(store.get(&message).await.unwrap().is_none());
        assert!(store.get(&sibling).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_over_existing_document_fails() {
        let (store, _dir) = open_store().await;
        let name = resolve_path(EntityKind::GroupName, &["Dogs"]).unwrap();

        store
            .create(&name, fields(json!({ "id": "g1" })))
            .await
            .unwrap();
        let err = store
            .create(&name, fields(json!({ "id": "g2" })))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::CommitFailed(format!("document {name} already exists"))
        );

        let doc = store.get(&name).await.unwrap().unwrap();
        assert_eq!(doc.str_field("id"), Some("g1"));
        assert_eq!(store.revision().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_equals_query() {
        let (store, _dir) = open_store().await;
        let empty: [&str; 0] = [];
        let users = resolve_collection(EntityKind::User, &empty).unwrap();

        for (id, name) in [("u1", "Alice"), ("u2", "Bob"), ("u3", "Alice")] {
            store
                .set(
                    &resolve_path(EntityKind::User, &[id]).unwrap(),
                    fields(json!({ "displayName": name })),
                )
                .await
                .unwrap();
        }
        store
            .set(
                &resolve_path(EntityKind::Pet, &["u2", "p1"]).unwrap(),
                fields(json!({ "displayName": "Alice" })),
            )
            .await
            .unwrap();

        let found = store
            .query_equals(&users, "displayName", &json!("Alice"))
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u3"]);

        let none = store
            .query_equals(&users, "displayName", &json!("Carol"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_array_contains_query() {
        let (store, _dir) = open_store().await;
        let empty: [&str; 0] = [];
        let users = resolve_collection(EntityKind::User, &empty).unwrap();

        store
            .set(
                &resolve_path(EntityKind::User, &["u1"]).unwrap(),
                fields(json!({ "groups": ["Dogs", "Cats"] })),
            )
            .await
            .unwrap();
        store
            .set(
                &resolve_path(EntityKind::User, &["u2"]).unwrap(),
                fields(json!({ "groups": ["Cats"] })),
            )
            .await
            .unwrap();

        let found = store
            .query_array_contains(&users, "groups", &json!("Dogs"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "u1");
    }
}
