//! PostgreSQL repository.

use super::{decide, Decision, PushOutcome, Repository};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tideline_engine::{Change, Fields, Seq};

/// Advisory lock key serializing push batches.
const WRITE_LOCK_KEY: i64 = 0x7469_6465_6c69_6e65;

/// A stored document row.
#[derive(Debug)]
struct StoredDocument {
    id: String,
    doc_type: String,
    fields: Json<Fields>,
    created_at: i64,
    updated_at: i64,
    deleted: bool,
    seq: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredDocument {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            id: row.try_get("id")?,
            doc_type: row.try_get("doc_type")?,
            fields: row.try_get("fields")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted: row.try_get("deleted")?,
            seq: row.try_get("seq")?,
        })
    }
}

impl StoredDocument {
    fn into_change(self) -> Result<(Seq, Change)> {
        Ok((
            from_column(self.seq, "seq")?,
            Change {
                created_at: from_column(self.created_at, "created_at")?,
                updated_at: from_column(self.updated_at, "updated_at")?,
                id: self.id,
                doc_type: self.doc_type,
                fields: self.fields.0,
                deleted: self.deleted,
            },
        ))
    }
}

/// Unsigned value headed for a BIGINT column. Out of range is the caller's fault.
fn to_column(value: u64, name: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| AppError::BadRequest(format!("{name} {value} is out of range")))
}

/// BIGINT read back from a row. Negative values mean the table is corrupt.
fn from_column(value: i64, name: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| AppError::Internal(format!("stored {name} {value} is negative")))
}

/// Documents in a `documents` table, one row per id.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a connection pool.
    pub async fn connect(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn fetch(conn: &mut PgConnection, id: &str) -> Result<Option<Change>> {
        let row = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT id, doc_type, fields, created_at, updated_at, deleted, seq
            FROM documents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        row.map(|r| r.into_change().map(|(_, change)| change))
            .transpose()
    }

    async fn upsert(conn: &mut PgConnection, change: &Change) -> Result<Seq> {
        let created_at = to_column(change.created_at, "created_at")?;
        let updated_at = to_column(change.updated_at, "updated_at")?;
        let (seq,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO documents (id, doc_type, fields, created_at, updated_at, deleted, seq)
            VALUES ($1, $2, $3, $4, $5, $6, nextval('document_seq'))
            ON CONFLICT (id) DO UPDATE SET
                doc_type = EXCLUDED.doc_type,
                fields = EXCLUDED.fields,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at,
                deleted = EXCLUDED.deleted,
                seq = EXCLUDED.seq
            RETURNING seq
            "#,
        )
        .bind(&change.id)
        .bind(&change.doc_type)
        .bind(Json(&change.fields))
        .bind(created_at)
        .bind(updated_at)
        .bind(change.deleted)
        .fetch_one(conn)
        .await?;

        from_column(seq, "seq")
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn apply(&self, changes: &[Change]) -> Result<Vec<PushOutcome>> {
        let mut tx = self.pool.begin().await?;

        // Sequence values must commit in the order they were drawn
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(WRITE_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let mut outcomes = Vec::with_capacity(changes.len());
        for change in changes {
            let stored = Self::fetch(&mut *tx, &change.id).await?;
            let outcome = match decide(change, stored.as_ref()) {
                Decision::Store => PushOutcome::Stored(Self::upsert(&mut *tx, change).await?),
                Decision::Unchanged => PushOutcome::Unchanged,
                Decision::Keep(winning_updated_at) => PushOutcome::Rejected { winning_updated_at },
            };
            outcomes.push(outcome);
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn changes_since(&self, since: Seq, limit: usize) -> Result<Vec<(Seq, Change)>> {
        // Past the largest sequence there is nothing left to read
        let since = i64::try_from(since).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, StoredDocument>(
            r#"
            SELECT id, doc_type, fields, created_at, updated_at, deleted, seq
            FROM documents
            WHERE seq > $1
            ORDER BY seq ASC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredDocument::into_change).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Change>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch(&mut *conn, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(seq: i64, updated_at: i64) -> StoredDocument {
        StoredDocument {
            id: "a".into(),
            doc_type: "note".into(),
            fields: Json(Fields::new()),
            created_at: 1,
            updated_at,
            deleted: false,
            seq,
        }
    }

    #[test]
    fn timestamps_beyond_bigint_are_bad_requests() {
        assert_eq!(to_column(i64::MAX as u64, "updated_at").unwrap(), i64::MAX);
        let err = to_column(u64::MAX, "updated_at").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn rows_convert_without_wrapping() {
        let (seq, change) = row(7, 42).into_change().unwrap();
        assert_eq!(seq, 7);
        assert_eq!(change.updated_at, 42);

        assert!(matches!(row(-1, 42).into_change(), Err(AppError::Internal(_))));
        assert!(matches!(row(7, -42).into_change(), Err(AppError::Internal(_))));
    }
}
