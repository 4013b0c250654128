use async_trait::async_trait;
use fanout_core::inbox::{InboxStore, InboxWorkItem};
use fanout_core::outbox::MutationOutcome;
use fanout_core::{OwnerToken, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgInboxStore {
    pool: PgPool,
}

impl PgInboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
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
impl InboxStore for PgInboxStore {
    async fn enqueue(&self, message_id: &str, source: &str, topic: &str, payload: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inbox (id, message_id, source, topic, payload, status)
            VALUES ($1, $2, $3, $4, $5, 'seen')
            ON CONFLICT (message_id, source)
            DO UPDATE SET last_seen_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message_id)
        .bind(source)
        .bind(topic)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim(
        &self,
        owner: OwnerToken,
        lease_duration: Duration,
        batch_size: i64,
    ) -> Result<Vec<InboxWorkItem>> {
        let lease_millis = duration_millis(lease_duration);
        let rows = sqlx::query(
            r#"
            WITH picked AS (
              SELECT id
              FROM inbox
              WHERE status = 'seen'
                AND (visible_at IS NULL OR visible_at <= now())
              ORDER BY visible_at ASC NULLS FIRST, first_seen_at ASC, id ASC
              LIMIT $1
              FOR UPDATE SKIP LOCKED
            )
            UPDATE inbox AS i
            SET status = 'in_flight',
                lease_owner = $2,
                lease_expires_at = now() + ($3::text || ' milliseconds')::interval,
                last_seen_at = now()
            FROM picked
            WHERE i.id = picked.id
            RETURNING i.id, i.message_id, i.source, i.topic, i.payload, i.attempts
            "#,
        )
        .bind(batch_size)
        .bind(owner.as_uuid())
        .bind(lease_millis)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(InboxWorkItem {
                id: row.try_get("id")?,
                message_id: row.try_get("message_id")?,
                source: row.try_get("source")?,
                topic: row.try_get("topic")?,
                payload: row.try_get("payload")?,
                attempts: row.try_get("attempts")?,
            });
        }

        Ok(items)
    }

    async fn ack(&self, owner: OwnerToken, ids: &[Uuid]) -> Result<MutationOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE inbox
            SET status = 'done',
                processed_at = now(),
                attempts = attempts + 1,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = ANY($1)
              AND status = 'in_flight'
              AND lease_owner = $2
            "#,
        )
        .bind(ids)
        .bind(owner.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::from_rows_affected(result.rows_affected()))
    }

    async fn abandon(
        &self,
        owner: OwnerToken,
        ids: &[Uuid],
        last_error: &str,
        delay: Option<Duration>,
    ) -> Result<MutationOutcome> {
        let delay_millis = delay.map(duration_millis);
        let result = sqlx::query(
            r#"
            UPDATE inbox
            SET status = 'seen',
                attempts = attempts + 1,
                last_error = $3,
                visible_at = CASE
                    WHEN $4::bigint IS NULL THEN NULL
                    ELSE now() + ($4::text || ' milliseconds')::interval
                END,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = ANY($1)
              AND status = 'in_flight'
              AND lease_owner = $2
            "#,
        )
        .bind(ids)
        .bind(owner.as_uuid())
        .bind(last_error)
        .bind(delay_millis)
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::from_rows_affected(result.rows_affected()))
    }

    async fn fail(&self, owner: OwnerToken, ids: &[Uuid], error: &str) -> Result<MutationOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE inbox
            SET status = 'dead',
                last_error = $3,
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE id = ANY($1)
              AND status = 'in_flight'
              AND lease_owner = $2
            "#,
        )
        .bind(ids)
        .bind(owner.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::from_rows_affected(result.rows_affected()))
    }

    async fn revive(&self, ids: &[Uuid], reason: &str, delay: Option<Duration>) -> Result<()> {
        let delay_millis = delay.map(duration_millis);
        sqlx::query(
            r#"
            UPDATE inbox
            SET status = 'seen',
                visible_at = CASE
                    WHEN $3::bigint IS NULL THEN NULL
                    ELSE now() + ($3::text || ' milliseconds')::interval
                END,
                last_error = COALESCE(last_error || ' | ' || $2, $2)
            WHERE id = ANY($1)
              AND status = 'dead'
            "#,
        )
        .bind(ids)
        .bind(reason)
        .bind(delay_millis)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reap_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE inbox
            SET status = 'seen',
                attempts = attempts + 1,
                last_error = 'lease expired',
                lease_owner = NULL,
                lease_expires_at = NULL
            WHERE status = 'in_flight'
              AND lease_expires_at < now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cleanup_processed(&self, retention: Duration) -> Result<u64> {
        let retention_millis = duration_millis(retention);
        let result = sqlx::query(
            r#"
            DELETE FROM inbox
            WHERE status IN ('done', 'dead')
              AND COALESCE(processed_at, first_seen_at) < now() - ($1::text || ' milliseconds')::interval
            "#,
        )
        .bind(retention_millis)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
