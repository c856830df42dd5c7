use anyhow::Context;
use chrono::{DateTime, Utc};
use diagram_sync_common::edit::{self, TaggedEdit};
use diagram_sync_common::types::{Diagram, LogEntry, Snapshot};
use serde_json::Value;
use sqlx::{types::Json, PgPool};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{CommitOutcome, StoreError};

const DIAGRAM_COLUMNS: &str = "id, name, snapshot, version, updated_at";

#[derive(sqlx::FromRow)]
struct DiagramRow {
    id: Uuid,
    name: String,
    snapshot: Json<Snapshot>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl From<DiagramRow> for Diagram {
    fn from(row: DiagramRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            snapshot: row.snapshot.0,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    diagram_id: Uuid,
    seq: i64,
    user_id: Option<Uuid>,
    op_type: String,
    payload: Json<Value>,
    created_at: DateTime<Utc>,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        Self {
            diagram_id: row.diagram_id,
            seq: row.seq,
            user_id: row.user_id,
            op_type: row.op_type,
            payload: row.payload.0,
            created_at: row.created_at,
        }
    }
}

pub(super) async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Diagram>, StoreError> {
    let row = sqlx::query_as::<_, DiagramRow>(&format!(
        "SELECT {DIAGRAM_COLUMNS} FROM diagrams WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(Into::into))
}

pub(super) async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Diagram>, StoreError> {
    let row = sqlx::query_as::<_, DiagramRow>(&format!(
        "SELECT {DIAGRAM_COLUMNS} FROM diagrams WHERE name = $1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.map(Into::into))
}

pub(super) async fn get_or_create_by_name(pool: &PgPool, name: &str) -> Result<Diagram, StoreError> {
    // A concurrent creator may win the insert; both callers then read the
    // same row back.
    sqlx::query(
        r#"
        INSERT INTO diagrams (id, name, snapshot, version)
        VALUES ($1, $2, $3, 0)
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(Json(Snapshot::default()))
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    find_by_name(pool, name).await?.ok_or_else(|| {
        StoreError::Internal(anyhow::anyhow!("diagram `{name}` vanished after get-or-create"))
    })
}

pub(super) async fn create(pool: &PgPool, name: &str) -> Result<Diagram, StoreError> {
    let row = sqlx::query_as::<_, DiagramRow>(&format!(
        r#"
        INSERT INTO diagrams (id, name, snapshot, version)
        VALUES ($1, $2, $3, 0)
        RETURNING {DIAGRAM_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(Json(Snapshot::default()))
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.into())
}

pub(super) async fn list(pool: &PgPool) -> Result<Vec<Diagram>, StoreError> {
    let rows = sqlx::query_as::<_, DiagramRow>(&format!(
        "SELECT {DIAGRAM_COLUMNS} FROM diagrams ORDER BY updated_at DESC, id DESC"
    ))
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub(super) async fn rename(pool: &PgPool, id: Uuid, name: &str) -> Result<Diagram, StoreError> {
    let row = sqlx::query_as::<_, DiagramRow>(&format!(
        r#"
        UPDATE diagrams SET name = $2, updated_at = now()
        WHERE id = $1
        RETURNING {DIAGRAM_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?
    .ok_or(StoreError::NotFound)?;

    Ok(row.into())
}

pub(super) async fn delete(pool: &PgPool, id: Uuid) -> Result<(), StoreError> {
    // diagram_ops rows go with the diagram via ON DELETE CASCADE.
    let affected = sqlx::query("DELETE FROM diagrams WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

    if affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub(super) async fn commit_edit(
    pool: &PgPool,
    id: Uuid,
    expected_version: i64,
    edit: &TaggedEdit,
    actor: Option<Uuid>,
) -> Result<CommitOutcome, StoreError> {
    let span = info_span!(
        "relay.db.commit_edit",
        diagram_id = %id,
        expected_version,
        op_type = edit.kind().as_str(),
    );

    async move {
        let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

        let (snapshot, version) = sqlx::query_as::<_, (Json<Snapshot>, i64)>(
            "SELECT snapshot, version FROM diagrams WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(StoreError::NotFound)?;

        if version != expected_version {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(CommitOutcome::Conflict { current_version: version, snapshot: snapshot.0 });
        }

        // Dropping `tx` on a rejected edit rolls the transaction back.
        let next = edit::apply(&snapshot.0, &edit.edit)?;
        let next_version = version + 1;

        let updated_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            UPDATE diagrams SET snapshot = $2, version = $3, updated_at = now()
            WHERE id = $1
            RETURNING updated_at
            "#,
        )
        .bind(id)
        .bind(Json(&next))
        .bind(next_version)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO diagram_ops (diagram_id, seq, user_id, op_type, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(next_version)
        .bind(actor)
        .bind(edit.kind().as_str())
        .bind(Json(&edit.payload))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(CommitOutcome::Applied { version: next_version, updated_at })
    }
    .instrument(span)
    .await
}

pub(super) async fn list_ops(
    pool: &PgPool,
    id: Uuid,
    after_seq: i64,
    limit: usize,
) -> Result<Vec<LogEntry>, StoreError> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM diagrams WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    if !exists {
        return Err(StoreError::NotFound);
    }

    let limit = i64::try_from(limit).context("ops page limit out of range")?;
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT diagram_id, seq, user_id, op_type, payload, created_at
        FROM diagram_ops
        WHERE diagram_id = $1 AND seq > $2
        ORDER BY seq ASC
        LIMIT $3
        "#,
    )
    .bind(id)
    .bind(after_seq)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(Into::into).collect())
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.code().as_deref() == Some("23505") {
            return StoreError::NameConflict;
        }
    }
    StoreError::Internal(error.into())
}
