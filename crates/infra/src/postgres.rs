//! Postgres-backed checkpoint store.
//!
//! One row per checkpoint in `projection_checkpoints`, plus the emitted events
//! written with it in `projection_emitted_events`; both inserts share one
//! transaction. The store is synchronous (the projection core calls it from a
//! writer thread) and drives sqlx on a caller-supplied tokio runtime handle.
//!
//! ## Error Mapping
//!
//! | SQLx Error | CheckpointStoreError |
//! |------------|----------------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io` | `Unavailable` |
//! | row decode / JSON decode | `Codec` |
//! | anything else during a read | `Read` |
//! | anything else during a write | `Write` |

use std::sync::Arc;

use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use eventide_core::CheckpointTag;
use eventide_events::EmittedEvent;
use eventide_projections::{Checkpoint, CheckpointStore, CheckpointStoreError};

/// DDL for the tables this store uses.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projection_checkpoints (
    id BIGSERIAL PRIMARY KEY,
    projection_name TEXT NOT NULL,
    tag JSONB NOT NULL,
    prior_tag JSONB,
    state TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS projection_checkpoints_name_idx
    ON projection_checkpoints (projection_name, id DESC);

CREATE TABLE IF NOT EXISTS projection_emitted_events (
    event_id UUID PRIMARY KEY,
    checkpoint_id BIGINT NOT NULL REFERENCES projection_checkpoints (id),
    stream_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    data TEXT NOT NULL,
    caused_by JSONB NOT NULL
);
"#;

#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: Arc<PgPool>,
    handle: Handle,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), CheckpointStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e, CheckpointStoreError::Write))?;
        Ok(())
    }

    async fn read_last_async(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        let row = sqlx::query(
            r#"
            SELECT tag, prior_tag, state
            FROM projection_checkpoints
            WHERE projection_name = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(projection)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_last", e, CheckpointStoreError::Read))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let codec = |e: sqlx::Error| CheckpointStoreError::Codec(e.to_string());
        let Json(tag) = row.try_get::<Json<CheckpointTag>, _>("tag").map_err(codec)?;
        let prior_tag = row
            .try_get::<Option<Json<CheckpointTag>>, _>("prior_tag")
            .map_err(codec)?
            .map(|Json(t)| t);
        let state = row.try_get::<Option<String>, _>("state").map_err(codec)?;

        Ok(Some(Checkpoint { tag, prior_tag, state }))
    }

    async fn append_async(
        &self,
        projection: &str,
        checkpoint: &Checkpoint,
        emitted: &[EmittedEvent],
    ) -> Result<(), CheckpointStoreError> {
        let write_error = |e| map_sqlx_error("append", e, CheckpointStoreError::Write);
        let mut tx = self.pool.begin().await.map_err(write_error)?;

        let checkpoint_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO projection_checkpoints (projection_name, tag, prior_tag, state)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(projection)
        .bind(Json(&checkpoint.tag))
        .bind(checkpoint.prior_tag.as_ref().map(Json))
        .bind(checkpoint.state.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(write_error)?;

        for event in emitted {
            sqlx::query(
                r#"
                INSERT INTO projection_emitted_events
                    (event_id, checkpoint_id, stream_id, event_type, data, caused_by)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(*event.event_id.as_uuid())
            .bind(checkpoint_id)
            .bind(&event.stream_id)
            .bind(&event.event_type)
            .bind(&event.data)
            .bind(Json(&event.caused_by))
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
        }

        tx.commit().await.map_err(write_error)?;
        debug!(projection, checkpoint_id, emitted = emitted.len(), "checkpoint row committed");
        Ok(())
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    #[instrument(skip(self), err)]
    fn read_last(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        self.handle.block_on(self.read_last_async(projection))
    }

    #[instrument(skip(self, checkpoint, emitted), fields(tag = %checkpoint.tag), err)]
    fn append(
        &self,
        projection: &str,
        checkpoint: &Checkpoint,
        emitted: &[EmittedEvent],
    ) -> Result<(), CheckpointStoreError> {
        self.handle.block_on(self.append_async(projection, checkpoint, emitted))
    }
}

fn map_sqlx_error(
    operation: &str,
    err: sqlx::Error,
    otherwise: fn(String) -> CheckpointStoreError,
) -> CheckpointStoreError {
    match err {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            CheckpointStoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => CheckpointStoreError::Unavailable(format!("i/o error in {operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            CheckpointStoreError::Codec(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::Database(db_err) => {
            otherwise(format!("database error in {operation}: {}", db_err.message()))
        }
        _ => otherwise(format!("sqlx error in {operation}: {err}")),
    }
}
