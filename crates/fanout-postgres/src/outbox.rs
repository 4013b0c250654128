use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fanout_core::outbox::{MutationOutcome, OutboxStore, OutboxWorkItem};
use fanout_core::{OwnerToken, Result};
use serde_json::Value;
use sqlx::{PgExecutor, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue inside a caller-supplied transaction, so a business-state update and the enqueue
    /// land atomically (spec §4.1: "Must be callable inside a caller-supplied transaction").
    pub async fn enqueue_with<'e, E>(
        &self,
        executor: E,
        topic: &str,
        payload: Value,
        due_at: Option<DateTime<Utc>>,
        join_id: Option<Uuid>,
    ) -> Result<Uuid>
    where
        E: PgExecutor<'e>,
    {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO outbox (id, topic, payload, status, due_at, join_id)
            VALUES ($1, $2, $3, 'ready', $4, $5)
            "#,
        )
        .bind(id)
        .bind(topic)
        .bind(payload)
        .bind(due_at)
        .bind(join_id)
        .execute(executor)
        .await?;

        Ok(id)
    }
}

fn duration_millis(d: Duration) -> i64 {
    let ms = d.as_millis();
    if ms > i64::MAX as u128 {
        i64::MAX
    } else {
        ms as i64
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(
        &self,
        topic: &str,
        payload: Value,
        due_at: Option<DateTime<Utc>>,
        join_id: Option<Uuid>,
    ) -> Result<Uuid> {
        self.enqueue_with(&self.pool, topic, payload, due_at, join_id).await
    }

    async fn claim_due(
        &self,
        batch_size: i64,
        owner: OwnerToken,
        lease_duration: Duration,
    ) -> Result<Vec<OutboxWorkItem>> {
        let lease_millis = duration_millis(lease_duration);
        let rows = sqlx::query(
            r#"
            WITH picked AS (
              SELECT id
              FROM outbox
              WHERE status = 'ready'
                AND (due_at IS NULL OR due_at <= now())
              ORDER BY due_at ASC NULLS FIRST, created_at ASC, id ASC
              LIMIT $1
              FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox AS o
            SET status = 'in_flight',
                lease_owner = $2,
                lease_expires_at = now() + ($3::text || ' milliseconds')::interval
            FROM picked
            WHERE o.id = picked.id
            RETURNING o.id, o.topic, o.payload, o.retry_count, o.join_id
            "#,
        )
        .bind(batch_size)
        .bind(owner.as_uuid())
        .bind(lease_millis)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(OutboxWorkItem {
                id: row.try_get("id")?,
                topic: row.try_get("topic")?,
                payload: row.try_get("payload")?,
                retry_count: row.try_get("retry_count")?,
                join_id: row.try_get("join_id")?,
            });
        }

        Ok(items)
    }

    async fn mark_dispatched(&self, id: Uuid, owner: OwnerToken) -> Result<MutationOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'done',
                is_processed = true,
                processed_at = now(),
                processed_by = $2
            WHERE id = $1
              AND status = 'in_flight'
              AND lease_owner = $3
            "#,
        )
        .bind(id)
        .bind(owner.to_string())
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::from_rows_affected(result.rows_affected()))
    }

    async fn reschedule(
        &self,
        id: Uuid,
        owner: OwnerToken,
        delay: Duration,
        error: &str,
        max_attempts: i32,
    ) -> Result<MutationOutcome> {
        let delay_millis = duration_millis(delay);
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= $5 THEN 'dead' ELSE 'ready' END,
                due_at = CASE
                    WHEN retry_count + 1 >= $5 THEN due_at
                    ELSE now() + ($4::text || ' milliseconds')::interval
                END,
                last_error = $3,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND status = 'in_flight'
              AND lease_owner = $2
            "#,
        )
        .bind(id)
        .bind(owner.as_uuid())
        .bind(error)
        .bind(delay_millis)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::from_rows_affected(result.rows_affected()))
    }

    async fn fail(&self, id: Uuid, owner: OwnerToken, error: &str) -> Result<MutationOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'failed',
                last_error = $3,
                processed_by = 'FAILED:' || $2,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND status = 'in_flight'
              AND lease_owner = $4
            "#,
        )
        .bind(id)
        .bind(owner.to_string())
        .bind(error)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::from_rows_affected(result.rows_affected()))
    }

    async fn reap_expired(&self, max_attempts: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            WITH expired AS (
              SELECT id
              FROM outbox
              WHERE status = 'in_flight'
                AND lease_expires_at < now()
              FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox AS o
            SET retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= $1 THEN 'dead' ELSE 'ready' END,
                last_error = 'lease expired',
                lease_owner = NULL,
                lease_expires_at = NULL
            FROM expired
            WHERE o.id = expired.id
            "#,
        )
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cleanup_processed(&self, retention: Duration) -> Result<u64> {
        let retention_millis = duration_millis(retention);
        let result = sqlx::query(
            r#"
            DELETE FROM outbox
            WHERE status IN ('done', 'failed', 'dead')
              AND COALESCE(processed_at, created_at) < now() - ($1::text || ' milliseconds')::interval
            "#,
        )
        .bind(retention_millis)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
