use async_trait::async_trait;
use fanout_core::lease::{Fencing, LeaseGrant, LeaseStore};
use fanout_core::Result;
use sqlx::{PgPool, Row};
use std::time::Duration;

#[derive(Clone)]
pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
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
impl LeaseStore for PgLeaseStore {
    async fn acquire(&self, name: &str, owner: &str, lease_duration: Duration) -> Result<Option<LeaseGrant>> {
        let lease_millis = duration_millis(lease_duration);

        // Either the row doesn't exist yet (plain insert, fencing starts at 1) or it does and its
        // previous holder's lease has expired (steal, fencing bumps by one). A live holder's row
        // satisfies neither arm of the WHERE and the upsert contributes no row, which reads back as
        // "nobody acquired it".
        let row = sqlx::query(
            r#"
            INSERT INTO leases (name, owner, expires_at, fencing)
            VALUES ($1, $2, now() + ($3::text || ' milliseconds')::interval, 1)
            ON CONFLICT (name) DO UPDATE
            SET owner = EXCLUDED.owner,
                expires_at = EXCLUDED.expires_at,
                fencing = leases.fencing + 1
            WHERE leases.expires_at < now()
            RETURNING fencing
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(lease_millis)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => {
                let fencing: Fencing = row.try_get("fencing")?;
                Some(LeaseGrant { fencing })
            }
            None => None,
        })
    }

    async fn renew(&self, name: &str, owner: &str, fencing: Fencing, lease_duration: Duration) -> Result<bool> {
        let lease_millis = duration_millis(lease_duration);
        let result = sqlx::query(
            r#"
            UPDATE leases
            SET expires_at = now() + ($4::text || ' milliseconds')::interval
            WHERE name = $1 AND owner = $2 AND fencing = $3
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(fencing)
        .bind(lease_millis)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, name: &str, owner: &str, fencing: Fencing) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM leases
            WHERE name = $1 AND owner = $2 AND fencing = $3
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(fencing)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
