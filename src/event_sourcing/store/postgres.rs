use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;
use std::collections::HashMap;

use crate::event_sourcing::core::{
    EsError, EventEnvelope, RawEvent, Result, CORRELATION_ID_HEADER, TIMESTAMP_HEADER,
};

use super::event_store::{ensure_stream_id, EventRepository, ReadDirection, ReadQuery, ReadSpec};

// ============================================================================
// PostgreSQL Event Repository
// ============================================================================
//
// Tables:
// - es_event_store    one row per event body (id is the global position)
// - es_event_streams  stream membership, UNIQUE (stream_id, stream_version)
// - es_stream_heads   last version per stream, locked FOR UPDATE on write
//
// Append and link run in one transaction: lock the head row, compare the
// expected version, insert, move the head, commit. A dropped future rolls
// the transaction back.
//
// ============================================================================

#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(classify)?;

        tracing::info!(max_connections, "Connected to PostgreSQL event store");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist yet. Safe to run on every start.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_event_store (
                id          BIGSERIAL PRIMARY KEY,
                event_id    UUID NOT NULL UNIQUE,
                event_name  VARCHAR(255) NOT NULL,
                event_data  TEXT NOT NULL,
                metadata    TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_stream_heads (
                stream_id     TEXT PRIMARY KEY,
                last_version  BIGINT NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_event_streams (
                position        BIGSERIAL PRIMARY KEY,
                stream_id       TEXT NOT NULL,
                stream_version  BIGINT NOT NULL,
                event_id        UUID NOT NULL REFERENCES es_event_store (event_id),
                UNIQUE (stream_id, stream_version)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        sqlx::query(
            r"CREATE INDEX IF NOT EXISTS es_event_streams_by_event ON es_event_streams (event_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        tracing::info!("Event store schema ready");
        Ok(())
    }

    /// Lock the stream head (creating it at 0) and check the expected version.
    async fn lock_head(
        tx: &mut Transaction<'_, Postgres>,
        stream_id: &str,
        expected_version: Option<i64>,
    ) -> Result<i64> {
        sqlx::query(
            r"
            INSERT INTO es_stream_heads (stream_id, last_version)
            VALUES ($1, 0)
            ON CONFLICT (stream_id) DO NOTHING
            ",
        )
        .bind(stream_id)
        .execute(&mut **tx)
        .await
        .map_err(classify)?;

        let current: i64 = sqlx::query_scalar(
            r"
            SELECT last_version
            FROM es_stream_heads
            WHERE stream_id = $1
            FOR UPDATE
            ",
        )
        .bind(stream_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(classify)?;

        match expected_version {
            Some(expected) if expected != current => Err(EsError::ConcurrencyViolation {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                actual: current,
            }),
            _ => Ok(current),
        }
    }

    /// Insert memberships for `event_ids` after `current` and move the head.
    /// Returns `(stream_version, position)` per event, in input order.
    async fn push_members(
        tx: &mut Transaction<'_, Postgres>,
        stream_id: &str,
        current: i64,
        event_ids: &[Uuid],
    ) -> Result<Vec<(i64, i64)>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO es_event_streams (stream_id, stream_version, event_id) ",
        );
        qb.push_values(event_ids.iter().enumerate(), |mut b, (offset, event_id)| {
            b.push_bind(stream_id.to_string());
            b.push_bind(current + offset as i64 + 1);
            b.push_bind(*event_id);
        });
        qb.push(" RETURNING stream_version, position");

        let mut members: Vec<(i64, i64)> = qb
            .build_query_as()
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EsError::ConcurrencyViolation {
                        stream_id: stream_id.to_string(),
                        expected: Some(current),
                        actual: current + 1,
                    }
                } else {
                    classify(e)
                }
            })?;
        // RETURNING order is not guaranteed
        members.sort_unstable_by_key(|(version, _)| *version);

        let new_version = current + event_ids.len() as i64;
        sqlx::query("UPDATE es_stream_heads SET last_version = $1 WHERE stream_id = $2")
            .bind(new_version)
            .bind(stream_id)
            .execute(&mut **tx)
            .await
            .map_err(classify)?;

        Ok(members)
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    async fn append(
        &self,
        stream_id: &str,
        events: Vec<EventEnvelope>,
        expected_version: Option<i64>,
    ) -> Result<Vec<EventEnvelope>> {
        ensure_stream_id(stream_id)?;

        let now = Utc::now();
        let mut staged = Vec::with_capacity(events.len());
        for mut envelope in events {
            if envelope.header(CORRELATION_ID_HEADER).is_none() {
                envelope.set_header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string());
            }
            envelope.set_header(TIMESTAMP_HEADER, now.to_rfc3339());
            let payload = envelope.event().marshal()?;
            let metadata = serde_json::to_string(envelope.headers())?;
            staged.push((Uuid::new_v4(), payload, metadata, envelope));
        }

        let mut tx = self.pool.begin().await.map_err(classify)?;
        let current = Self::lock_head(&mut tx, stream_id, expected_version).await?;

        if staged.is_empty() {
            tx.rollback().await.map_err(classify)?;
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO es_event_store (event_id, event_name, event_data, metadata, created_at) ",
        );
        qb.push_values(staged.iter(), |mut b, (event_id, payload, metadata, envelope)| {
            b.push_bind(*event_id);
            b.push_bind(envelope.event_name().to_string());
            b.push_bind(payload.clone());
            b.push_bind(metadata.clone());
            b.push_bind(now);
        });
        qb.build().execute(&mut *tx).await.map_err(classify)?;

        let ids: Vec<Uuid> = staged.iter().map(|(id, ..)| *id).collect();
        let members = Self::push_members(&mut tx, stream_id, current, &ids).await?;

        tx.commit().await.map_err(classify)?;

        let new_version = current + members.len() as i64;
        tracing::debug!(stream_id, new_version, "Appended events to PostgreSQL");

        Ok(staged
            .into_iter()
            .zip(members)
            .map(|((event_id, _, _, envelope), (version, position))| {
                envelope.into_persisted(event_id, version, position)
            })
            .collect())
    }

    #[tracing::instrument(skip(self, event_ids), fields(event_count = event_ids.len()))]
    async fn link(
        &self,
        stream_id: &str,
        event_ids: &[Uuid],
        expected_version: Option<i64>,
    ) -> Result<i64> {
        ensure_stream_id(stream_id)?;

        let mut tx = self.pool.begin().await.map_err(classify)?;

        let known: Vec<Uuid> =
            sqlx::query_scalar("SELECT event_id FROM es_event_store WHERE event_id = ANY($1)")
                .bind(event_ids)
                .fetch_all(&mut *tx)
                .await
                .map_err(classify)?;
        if let Some(missing) = event_ids.iter().find(|id| !known.contains(id)) {
            return Err(EsError::UnknownEvent(*missing));
        }

        let current = Self::lock_head(&mut tx, stream_id, expected_version).await?;
        if event_ids.is_empty() {
            tx.rollback().await.map_err(classify)?;
            return Ok(current);
        }

        let members = Self::push_members(&mut tx, stream_id, current, event_ids).await?;
        tx.commit().await.map_err(classify)?;
        Ok(current + members.len() as i64)
    }

    async fn delete_stream(&self, stream_id: &str) -> Result<()> {
        ensure_stream_id(stream_id)?;

        let mut tx = self.pool.begin().await.map_err(classify)?;
        sqlx::query("DELETE FROM es_event_streams WHERE stream_id = $1")
            .bind(stream_id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        sqlx::query("DELETE FROM es_stream_heads WHERE stream_id = $1")
            .bind(stream_id)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        tx.commit().await.map_err(classify)?;

        tracing::info!(stream_id, "Deleted stream");
        Ok(())
    }

    async fn has_event(&self, event_id: Uuid) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM es_event_store WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
    }

    async fn get_stream_id_of(&self, event_id: Uuid) -> Result<Option<String>> {
        sqlx::query_scalar(
            r"
            SELECT stream_id FROM es_event_streams
            WHERE event_id = $1
            ORDER BY position ASC
            LIMIT 1
            ",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn get_version_in_stream(
        &self,
        stream_id: &str,
        event_id: Uuid,
    ) -> Result<Option<i64>> {
        sqlx::query_scalar(
            r"
            SELECT stream_version FROM es_event_streams
            WHERE stream_id = $1 AND event_id = $2
            ORDER BY stream_version DESC
            LIMIT 1
            ",
        )
        .bind(stream_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)
    }

    async fn is_event_in_stream(&self, stream_id: &str, event_id: Uuid) -> Result<bool> {
        Ok(self
            .get_version_in_stream(stream_id, event_id)
            .await?
            .is_some())
    }

    async fn last_version(&self, stream_id: &str) -> Result<i64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT last_version FROM es_stream_heads WHERE stream_id = $1")
                .bind(stream_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)?;
        Ok(version.unwrap_or(0))
    }

    #[tracing::instrument(skip(self, spec), fields(stream_id = %spec.stream_id()))]
    async fn query(&self, spec: &ReadSpec) -> Result<Vec<EventEnvelope>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT s.stream_version, s.position, e.event_id, e.event_name, e.event_data, e.metadata ",
        );
        push_filtered(&mut qb, spec);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(classify)?;
        rows.iter().map(envelope_from_row).collect()
    }

    async fn count(&self, spec: &ReadSpec) -> Result<usize> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM (SELECT s.position ");
        push_filtered(&mut qb, spec);
        qb.push(") t");

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;
        usize::try_from(count).map_err(EsError::unexpected)
    }

    fn read(&self) -> ReadQuery<'_> {
        ReadQuery::new(self)
    }
}

/// `FROM ... WHERE ... ORDER BY ... LIMIT ...` for a validated read.
fn push_filtered(qb: &mut QueryBuilder<'_, Postgres>, spec: &ReadSpec) {
    qb.push(
        "FROM es_event_streams s JOIN es_event_store e ON e.event_id = s.event_id \
         WHERE s.stream_id = ",
    )
    .push_bind(spec.stream_id().to_string());

    if let Some(from) = spec.from_time() {
        qb.push(" AND e.created_at >= ").push_bind(from);
    }
    if let Some(to) = spec.to_time() {
        qb.push(" AND e.created_at <= ").push_bind(to);
    }
    if let Some(from) = spec.from_id() {
        qb.push(" AND s.position >= ").push_bind(from);
    }
    if let Some(to) = spec.to_id() {
        qb.push(" AND s.position <= ").push_bind(to);
    }
    if let Some(ids) = spec.event_ids() {
        qb.push(" AND s.event_id = ANY(").push_bind(ids.to_vec()).push(")");
    }

    match spec.direction() {
        ReadDirection::Forward => qb.push(" ORDER BY s.stream_version ASC"),
        ReadDirection::Backward => qb.push(" ORDER BY s.stream_version DESC"),
    };

    if let Some(limit) = spec.limit() {
        qb.push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
}

fn envelope_from_row(row: &PgRow) -> Result<EventEnvelope> {
    let version: i64 = row.try_get("stream_version").map_err(classify)?;
    let position: i64 = row.try_get("position").map_err(classify)?;
    let event_id: Uuid = row.try_get("event_id").map_err(classify)?;
    let event_name: String = row.try_get("event_name").map_err(classify)?;
    let event_data: String = row.try_get("event_data").map_err(classify)?;
    let metadata: String = row.try_get("metadata").map_err(classify)?;

    let headers: HashMap<String, String> = serde_json::from_str(&metadata)?;
    Ok(EventEnvelope::persisted(
        event_id,
        version,
        position,
        headers,
        Box::new(RawEvent::new(event_name, event_data)),
    ))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

enum Class {
    Unavailable,
    Unauthorized,
    Cancelled,
    Unexpected,
}

/// Map a driver error onto the store's error kinds.
pub(crate) fn classify(err: sqlx::Error) -> EsError {
    let class = match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => Class::Unavailable,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // connection exceptions, serialization failure, deadlock
            Some(code) if code.starts_with("08") => Class::Unavailable,
            Some("40001") | Some("40P01") => Class::Unavailable,
            Some(code) if code.starts_with("28") => Class::Unauthorized,
            Some("42501") => Class::Unauthorized,
            Some("57014") => Class::Cancelled,
            _ => Class::Unexpected,
        },
        _ => Class::Unexpected,
    };

    match class {
        Class::Unavailable => {
            tracing::warn!(error = %err, "Event store unavailable");
            EsError::Unavailable(err.into())
        }
        Class::Unauthorized => EsError::Unauthorized(err.into()),
        Class::Cancelled => EsError::Cancelled,
        Class::Unexpected => EsError::Unexpected(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_unavailable() {
        let err = classify(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, EsError::Unavailable(_)));
    }

    #[test]
    fn test_io_error_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = classify(sqlx::Error::Io(io));
        assert!(matches!(err, EsError::Unavailable(_)));
    }

    #[test]
    fn test_row_not_found_is_unexpected() {
        let err = classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, EsError::Unexpected(_)));
    }
}
