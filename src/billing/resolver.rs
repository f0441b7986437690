use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreResult;

use super::models::{
    CanonicalSubscription, PlanTier, Projection, ProjectionSource, SubscriptionStatus,
};
use super::store::SubscriptionStore;

/// key: billing-resolver-precedence -> which table wins per field
pub const TIER_PRECEDENCE: [ProjectionSource; 2] =
    [ProjectionSource::CurrentPlan, ProjectionSource::LegacySubscription];
pub const STATUS_PRECEDENCE: [ProjectionSource; 2] =
    [ProjectionSource::LegacySubscription, ProjectionSource::CurrentPlan];
/// Period dates and external ids live on the legacy table first.
pub const BILLING_LINK_PRECEDENCE: [ProjectionSource; 2] =
    [ProjectionSource::LegacySubscription, ProjectionSource::CurrentPlan];
/// The plan row names the subscription it was last written from; only an
/// unlinked plan row defers to the latest legacy row.
pub const CURRENT_SUBSCRIPTION_PRECEDENCE: [ProjectionSource; 2] =
    [ProjectionSource::CurrentPlan, ProjectionSource::LegacySubscription];

/// key: billing-resolver -> canonical subscription for an organization
///
/// Read errors other than "not found" are logged and treated as absence, so an
/// unreadable store degrades to starter defaults instead of failing the request.
pub async fn resolve_subscription(
    store: &dyn SubscriptionStore,
    organization_id: Uuid,
) -> Option<CanonicalSubscription> {
    let (current, legacy) = tokio::join!(
        store.current_plan(organization_id),
        store.legacy_subscription(organization_id),
    );

    let current = read_or_absent(current, organization_id, ProjectionSource::CurrentPlan);
    let legacy = read_or_absent(legacy, organization_id, ProjectionSource::LegacySubscription);

    merge_projections(organization_id, current, legacy)
}

fn read_or_absent(
    result: StoreResult<Option<Projection>>,
    organization_id: Uuid,
    source: ProjectionSource,
) -> Option<Projection> {
    match result {
        Ok(projection) => projection,
        Err(err) => {
            warn!(
                ?err,
                %organization_id,
                ?source,
                "failed to read subscription projection; treating as absent"
            );
            None
        }
    }
}

/// Pure merge of the two projections using the precedence tables above.
pub fn merge_projections(
    organization_id: Uuid,
    current: Option<Projection>,
    legacy: Option<Projection>,
) -> Option<CanonicalSubscription> {
    if current.is_none() && legacy.is_none() {
        return None;
    }

    let sources = Sources {
        current: current.as_ref(),
        legacy: legacy.as_ref(),
    };

    let tier = sources
        .first(&TIER_PRECEDENCE, |row| row.tier)
        .unwrap_or(PlanTier::Starter);
    let mut status = sources
        .first(&STATUS_PRECEDENCE, |row| row.status)
        .unwrap_or(SubscriptionStatus::None);

    // A paid tier with no recorded status is read as active. This grants
    // access without a confirmed payment state and needs review.
    if tier != PlanTier::Starter && status == SubscriptionStatus::None {
        debug!(%organization_id, %tier, "paid tier without status; assuming active");
        status = SubscriptionStatus::Active;
    }

    Some(CanonicalSubscription {
        organization_id,
        tier,
        status,
        period_start: sources.first(&BILLING_LINK_PRECEDENCE, |row| row.period_start),
        period_end: sources.first(&BILLING_LINK_PRECEDENCE, |row| row.period_end),
        external_subscription_id: sources.first(&BILLING_LINK_PRECEDENCE, |row| {
            row.external_subscription_id.clone()
        }),
        external_customer_id: sources.first(&BILLING_LINK_PRECEDENCE, |row| {
            row.external_customer_id.clone()
        }),
    })
}

/// External id of the organization's current subscription. `current` is the
/// plan row, `latest_legacy` the most recently updated legacy row.
pub fn current_external_id<'a>(
    current: Option<&'a Projection>,
    latest_legacy: Option<&'a Projection>,
) -> Option<&'a str> {
    let sources = Sources {
        current,
        legacy: latest_legacy,
    };
    sources.first(&CURRENT_SUBSCRIPTION_PRECEDENCE, |row| {
        row.external_subscription_id.as_deref()
    })
}

struct Sources<'a> {
    current: Option<&'a Projection>,
    legacy: Option<&'a Projection>,
}

impl<'a> Sources<'a> {
    fn get(&self, source: ProjectionSource) -> Option<&'a Projection> {
        match source {
            ProjectionSource::CurrentPlan => self.current,
            ProjectionSource::LegacySubscription => self.legacy,
        }
    }

    fn first<T>(
        &self,
        ranking: &[ProjectionSource],
        field: impl Fn(&'a Projection) -> Option<T>,
    ) -> Option<T> {
        ranking
            .iter()
            .filter_map(|source| self.get(*source))
            .find_map(field)
    }
}
