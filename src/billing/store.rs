use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreResult;

use super::models::{PlanTier, Projection, SubscriptionStatus};

/// key: billing-store -> local projections keyed by organization
///
/// "Not found" is `Ok(None)`; anything else is an error the caller decides
/// how to treat.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Row of the current plan table for the organization.
    async fn current_plan(&self, organization_id: Uuid) -> StoreResult<Option<Projection>>;

    /// Most recently updated row of the legacy subscription table.
    async fn legacy_subscription(&self, organization_id: Uuid) -> StoreResult<Option<Projection>>;

    /// Legacy row for one specific external subscription id.
    async fn subscription_by_external_id(
        &self,
        organization_id: Uuid,
        external_subscription_id: &str,
    ) -> StoreResult<Option<Projection>>;

    /// Organizations with a linked external subscription whose status is still
    /// active, trialing or past due.
    async fn reconcile_candidates(&self) -> StoreResult<Vec<ReconcileCandidate>>;

    /// Idempotent write of provider state. A `current` record is written into
    /// every table readers consult; otherwise only the legacy row for that
    /// external id is corrected in place. Returns `true` when any stored value
    /// changed.
    async fn upsert_subscription(&self, record: &SubscriptionUpsert) -> StoreResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileCandidate {
    pub organization_id: Uuid,
    pub external_subscription_id: String,
}

/// Keyed by (`organization_id`, `external_subscription_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionUpsert {
    pub organization_id: Uuid,
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
    pub tier: PlanTier,
    pub status: SubscriptionStatus,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    /// The subscription is, or becomes, the organization's current one. The
    /// plan row follows it and its legacy row becomes the most recent. A
    /// record that is not current never creates rows and never moves
    /// `updated_at`, so an older subscription cannot displace the live one.
    pub current: bool,
}
