//! Fan-out/fan-in on top of the outbox (spec §4.3). Not part of the `OutboxStore` contract itself —
//! this is a second, narrower capability layered on the same table, grounded on the
//! read-under-lock/branch/write/commit shape of `trace_dispatcher::task_complete`.

use async_trait::async_trait;
use fanout_core::join::JoinCoordinator;
use fanout_core::{Error, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct JoinSpec {
    pub fail_if_any_step_failed: bool,
    pub on_complete_topic: Option<String>,
    pub on_complete_payload: Option<Value>,
    pub on_fail_topic: Option<String>,
    pub on_fail_payload: Option<Value>,
}

#[derive(Clone)]
pub struct PgJoinCoordinator {
    pool: PgPool,
}

impl PgJoinCoordinator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueues the held `join.wait` parent and its children in one transaction, so a crash between
    /// the two never leaves an orphaned parent with no children to decrement it.
    pub async fn enqueue_join(&self, spec: JoinSpec, children: Vec<(String, Value)>) -> Result<Uuid> {
        let parent_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO outbox (
                id, topic, payload, status, due_at, join_pending, fail_if_any_step_failed,
                on_complete_topic, on_complete_payload, on_fail_topic, on_fail_payload
            )
            VALUES ($1, 'join.wait', '{}'::jsonb, 'ready', 'infinity', $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(parent_id)
        .bind(children.len() as i32)
        .bind(spec.fail_if_any_step_failed)
        .bind(&spec.on_complete_topic)
        .bind(&spec.on_complete_payload)
        .bind(&spec.on_fail_topic)
        .bind(&spec.on_fail_payload)
        .execute(&mut *tx)
        .await?;

        for (topic, payload) in children {
            sqlx::query(
                r#"
                INSERT INTO outbox (id, topic, payload, status, join_id)
                VALUES ($1, $2, $3, 'ready', $4)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(topic)
            .bind(payload)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(parent_id)
    }

    /// Call once a child outbox row has reached a terminal status (`Done`/`Failed`/`Dead`). A no-op
    /// if the row has no `join_id`, or its parent has already gone terminal (the parent's decrement
    /// already happened, or a stray duplicate call — see DESIGN.md Open Question 3).
    pub async fn on_child_terminal(&self, child_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let child = sqlx::query("SELECT join_id, status FROM outbox WHERE id = $1 FOR UPDATE")
            .bind(child_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(child_row) = child else {
            return Ok(());
        };

        let join_id: Option<Uuid> = child_row.try_get("join_id")?;
        let status: String = child_row.try_get("status")?;
        let Some(join_id) = join_id else {
            return Ok(());
        };
        if !matches!(status.as_str(), "done" | "failed" | "dead") {
            return Ok(());
        }
        let child_failed = matches!(status.as_str(), "failed" | "dead");

        let parent_status: Option<String> =
            sqlx::query("SELECT status FROM outbox WHERE id = $1 FOR UPDATE")
                .bind(join_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.try_get("status"))
                .transpose()?;

        let Some(parent_status) = parent_status else {
            return Ok(());
        };
        // Already terminal: the decrement that finished this join already ran. Do not re-decrement
        // or re-fire the on_complete/on_fail side effect.
        if parent_status != "ready" {
            return Ok(());
        }

        let row = sqlx::query(
            r#"
            UPDATE outbox
            SET join_pending = join_pending - 1,
                join_any_failed = join_any_failed OR $2
            WHERE id = $1
            RETURNING join_pending, join_any_failed, fail_if_any_step_failed,
                      on_complete_topic, on_complete_payload, on_fail_topic, on_fail_payload
            "#,
        )
        .bind(join_id)
        .bind(child_failed)
        .fetch_one(&mut *tx)
        .await?;

        let remaining: i32 = row.try_get("join_pending")?;
        if remaining > 0 {
            tx.commit().await?;
            return Ok(());
        }

        let any_failed: bool = row.try_get("join_any_failed")?;
        let fail_if_any: bool = row.try_get("fail_if_any_step_failed")?;
        let (next_topic, next_payload): (Option<String>, Option<Value>) = if any_failed && fail_if_any {
            (row.try_get("on_fail_topic")?, row.try_get("on_fail_payload")?)
        } else {
            (row.try_get("on_complete_topic")?, row.try_get("on_complete_payload")?)
        };

        if let Some(topic) = next_topic {
            sqlx::query(
                r#"
                INSERT INTO outbox (id, topic, payload, status)
                VALUES ($1, $2, $3, 'ready')
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(topic)
            .bind(next_payload.unwrap_or(Value::Null))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'done', is_processed = true, processed_at = now(), processed_by = 'join-coordinator'
            WHERE id = $1
            "#,
        )
        .bind(join_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Administrative revival of a dead/failed child. Forbidden once the parent join has already
    /// gone terminal (DESIGN.md Open Question 1).
    pub async fn revive_child(&self, child_id: Uuid, reason: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let child = sqlx::query("SELECT join_id FROM outbox WHERE id = $1")
            .bind(child_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(child_row) = child else {
            return Err(Error::msg("no such outbox row"));
        };
        let join_id: Option<Uuid> = child_row.try_get("join_id")?;

        if let Some(join_id) = join_id {
            let parent_status: Option<String> = sqlx::query("SELECT status FROM outbox WHERE id = $1")
                .bind(join_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.try_get("status"))
                .transpose()?;

            if matches!(parent_status.as_deref(), Some("done") | Some("failed")) {
                return Err(Error::msg(
                    "cannot revive a join child whose parent has already completed",
                ));
            }
        }

        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'ready',
                due_at = NULL,
                last_error = COALESCE(last_error || ' | revived: ' || $2, 'revived: ' || $2)
            WHERE id = $1
            "#,
        )
        .bind(child_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Lets the dispatcher hold a join coordinator behind the database-agnostic `fanout_core` trait,
/// the same way it holds `OutboxStore`/`InboxStore` rather than concrete `fanout-postgres` types.
#[async_trait]
impl JoinCoordinator for PgJoinCoordinator {
    async fn on_child_terminal(&self, child_id: Uuid) -> Result<()> {
        PgJoinCoordinator::on_child_terminal(self, child_id).await
    }
}
