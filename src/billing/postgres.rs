use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::error::StoreResult;

use super::models::{PlanTier, Projection, ProjectionSource, SubscriptionStatus};
use super::store::{ReconcileCandidate, SubscriptionStore, SubscriptionUpsert};

const PROJECTION_COLUMNS: &str = r#"
    organization_id,
    tier,
    status,
    period_start,
    period_end,
    external_subscription_id,
    external_customer_id,
    updated_at
"#;

/// key: billing-store-postgres -> organization_plans + organization_subscriptions
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Updates an existing legacy row without touching `updated_at` or the plan
    /// table.
    async fn correct_legacy_row(&self, record: &SubscriptionUpsert) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE organization_subscriptions
            SET
                external_customer_id = $3,
                tier = $4,
                status = $5,
                period_start = $6,
                period_end = $7
            WHERE organization_id = $1
              AND external_subscription_id = $2
              AND (external_customer_id, tier, status, period_start, period_end)
                  IS DISTINCT FROM ($3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.organization_id)
        .bind(&record.external_subscription_id)
        .bind(&record.external_customer_id)
        .bind(record.tier.as_str())
        .bind(record.status.as_str())
        .bind(record.period_start)
        .bind(record.period_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn current_plan(&self, organization_id: Uuid) -> StoreResult<Option<Projection>> {
        let row = sqlx::query(&format!(
            "SELECT {PROJECTION_COLUMNS} FROM organization_plans WHERE organization_id = $1"
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| map_row(&row, ProjectionSource::CurrentPlan))
            .transpose()
    }

    async fn legacy_subscription(&self, organization_id: Uuid) -> StoreResult<Option<Projection>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {PROJECTION_COLUMNS}
            FROM organization_subscriptions
            WHERE organization_id = $1
            ORDER BY updated_at DESC, external_subscription_id COLLATE "C" DESC NULLS LAST
            LIMIT 1
            "#
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| map_row(&row, ProjectionSource::LegacySubscription))
            .transpose()
    }

    async fn subscription_by_external_id(
        &self,
        organization_id: Uuid,
        external_subscription_id: &str,
    ) -> StoreResult<Option<Projection>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {PROJECTION_COLUMNS}
            FROM organization_subscriptions
            WHERE organization_id = $1 AND external_subscription_id = $2
            "#
        ))
        .bind(organization_id)
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| map_row(&row, ProjectionSource::LegacySubscription))
            .transpose()
    }

    async fn reconcile_candidates(&self) -> StoreResult<Vec<ReconcileCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT organization_id, external_subscription_id
            FROM (
                SELECT DISTINCT ON (s.organization_id)
                    s.organization_id,
                    s.external_subscription_id,
                    COALESCE(s.status, p.status) AS status
                FROM organization_subscriptions s
                LEFT JOIN organization_plans p ON p.organization_id = s.organization_id
                WHERE s.external_subscription_id IS NOT NULL
                ORDER BY s.organization_id, s.updated_at DESC, s.external_subscription_id COLLATE "C" DESC
            ) latest
            WHERE latest.status IN ('active', 'trialing', 'past_due')
            ORDER BY organization_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            candidates.push(ReconcileCandidate {
                organization_id: row.try_get("organization_id")?,
                external_subscription_id: row.try_get("external_subscription_id")?,
            });
        }
        Ok(candidates)
    }

    async fn upsert_subscription(&self, record: &SubscriptionUpsert) -> StoreResult<bool> {
        if !record.current {
            return self.correct_legacy_row(record).await;
        }

        let mut tx = self.pool.begin().await?;

        let legacy = sqlx::query(
            r#"
            INSERT INTO organization_subscriptions (
                id,
                organization_id,
                external_subscription_id,
                external_customer_id,
                tier,
                status,
                period_start,
                period_end
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (organization_id, external_subscription_id)
            DO UPDATE SET
                external_customer_id = EXCLUDED.external_customer_id,
                tier = EXCLUDED.tier,
                status = EXCLUDED.status,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                updated_at = NOW()
            WHERE (
                organization_subscriptions.external_customer_id,
                organization_subscriptions.tier,
                organization_subscriptions.status,
                organization_subscriptions.period_start,
                organization_subscriptions.period_end
            ) IS DISTINCT FROM (
                EXCLUDED.external_customer_id,
                EXCLUDED.tier,
                EXCLUDED.status,
                EXCLUDED.period_start,
                EXCLUDED.period_end
            )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.organization_id)
        .bind(&record.external_subscription_id)
        .bind(&record.external_customer_id)
        .bind(record.tier.as_str())
        .bind(record.status.as_str())
        .bind(record.period_start)
        .bind(record.period_end)
        .execute(&mut tx)
        .await?;

        let plan = sqlx::query(
            r#"
            INSERT INTO organization_plans (
                organization_id,
                tier,
                status,
                period_start,
                period_end,
                external_subscription_id,
                external_customer_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (organization_id)
            DO UPDATE SET
                tier = EXCLUDED.tier,
                status = EXCLUDED.status,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                external_subscription_id = EXCLUDED.external_subscription_id,
                external_customer_id = EXCLUDED.external_customer_id,
                updated_at = NOW()
            WHERE (
                organization_plans.tier,
                organization_plans.status,
                organization_plans.period_start,
                organization_plans.period_end,
                organization_plans.external_subscription_id,
                organization_plans.external_customer_id
            ) IS DISTINCT FROM (
                EXCLUDED.tier,
                EXCLUDED.status,
                EXCLUDED.period_start,
                EXCLUDED.period_end,
                EXCLUDED.external_subscription_id,
                EXCLUDED.external_customer_id
            )
            "#,
        )
        .bind(record.organization_id)
        .bind(record.tier.as_str())
        .bind(record.status.as_str())
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(&record.external_subscription_id)
        .bind(&record.external_customer_id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(legacy.rows_affected() + plan.rows_affected() > 0)
    }
}

fn map_row(row: &PgRow, source: ProjectionSource) -> StoreResult<Projection> {
    let organization_id: Uuid = row.try_get("organization_id")?;
    let tier: Option<String> = row.try_get("tier")?;
    let status: Option<String> = row.try_get("status")?;

    Ok(Projection {
        source,
        organization_id,
        tier: tier.and_then(|value| match value.parse::<PlanTier>() {
            Ok(tier) => Some(tier),
            Err(err) => {
                warn!(%err, %organization_id, ?source, "ignoring unreadable stored tier");
                None
            }
        }),
        status: status.and_then(|value| match value.parse::<SubscriptionStatus>() {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(%err, %organization_id, ?source, "ignoring unreadable stored status");
                None
            }
        }),
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        external_subscription_id: row.try_get("external_subscription_id")?,
        external_customer_id: row.try_get("external_customer_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}
