use chrono::{DateTime, Utc};

use super::models::{CanonicalSubscription, Entitlements, Limit, PlanTier, SubscriptionStatus};

const STARTER_JOBS_MONTHLY: u32 = 10;
const STARTER_SEATS: u32 = 1;
const PRO_SEATS: u32 = 5;

/// key: billing-entitlements-derive -> (subscription, now) => decision
///
/// Total and side-effect free; safe to recompute on every request.
pub fn derive_entitlements(
    subscription: Option<&CanonicalSubscription>,
    now: DateTime<Utc>,
) -> Entitlements {
    let Some(subscription) = subscription else {
        return starter_defaults();
    };

    let tier = subscription.tier;
    let effective_status = effective_status(tier, subscription.status);

    let is_active = matches!(
        effective_status,
        SubscriptionStatus::Active | SubscriptionStatus::Trialing
    );
    let is_grace = effective_status == SubscriptionStatus::Canceled
        && subscription.period_end.map_or(false, |end| end > now);

    let mut has_access = is_active || is_grace;
    // Hard block: non-payment never keeps access, whatever else was computed.
    if effective_status == SubscriptionStatus::PastDue {
        has_access = false;
    }

    let business = has_access && tier == PlanTier::Business;
    let (jobs_monthly_limit, seats_limit) = if has_access {
        tier_limits(tier)
    } else {
        (Limit::Limited(0), Limit::Limited(0))
    };

    Entitlements {
        has_access,
        permit_packs: business,
        version_history: business,
        evidence_verification: true,
        job_assignment: true,
        jobs_monthly_limit,
        seats_limit,
        tier: subscription.tier,
        status: subscription.status,
        period_end: subscription.period_end,
    }
}

/// Entitlements of an organization with no billing relationship.
pub fn starter_defaults() -> Entitlements {
    let (jobs_monthly_limit, seats_limit) = tier_limits(PlanTier::Starter);
    Entitlements {
        has_access: true,
        permit_packs: false,
        version_history: false,
        evidence_verification: true,
        job_assignment: true,
        jobs_monthly_limit,
        seats_limit,
        tier: PlanTier::Starter,
        status: SubscriptionStatus::None,
        period_end: None,
    }
}

/// Same paid-tier-without-status rule the resolver applies, repeated here so a
/// raw record handed straight to the deriver is read the same way.
fn effective_status(tier: PlanTier, status: SubscriptionStatus) -> SubscriptionStatus {
    if status == SubscriptionStatus::None && tier != PlanTier::Starter {
        SubscriptionStatus::Active
    } else {
        status
    }
}

fn tier_limits(tier: PlanTier) -> (Limit, Limit) {
    match tier {
        PlanTier::Starter => (
            Limit::Limited(STARTER_JOBS_MONTHLY),
            Limit::Limited(STARTER_SEATS),
        ),
        PlanTier::Pro => (Limit::Unlimited, Limit::Limited(PRO_SEATS)),
        PlanTier::Business => (Limit::Unlimited, Limit::Unlimited),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn subscription(
        tier: PlanTier,
        status: SubscriptionStatus,
        period_end: Option<DateTime<Utc>>,
    ) -> CanonicalSubscription {
        CanonicalSubscription {
            organization_id: Uuid::new_v4(),
            tier,
            status,
            period_start: None,
            period_end,
            external_subscription_id: Some("sub_123".to_string()),
            external_customer_id: Some("cus_123".to_string()),
        }
    }

    #[test]
    fn missing_subscription_gets_starter_defaults() {
        let entitlements = derive_entitlements(None, Utc::now());
        assert_eq!(entitlements.jobs_monthly_limit, Limit::Limited(10));
        assert_eq!(entitlements.seats_limit, Limit::Limited(1));
        assert!(!entitlements.permit_packs);
        assert!(!entitlements.version_history);
        assert!(entitlements.evidence_verification);
        assert!(entitlements.job_assignment);
        assert_eq!(entitlements.tier, PlanTier::Starter);
        assert_eq!(entitlements.status, SubscriptionStatus::None);
    }

    #[test]
    fn active_business_unlocks_everything() {
        let record = subscription(PlanTier::Business, SubscriptionStatus::Active, None);
        let entitlements = derive_entitlements(Some(&record), Utc::now());
        assert!(entitlements.permit_packs);
        assert!(entitlements.version_history);
        assert_eq!(entitlements.jobs_monthly_limit, Limit::Unlimited);
        assert_eq!(entitlements.seats_limit, Limit::Unlimited);
    }

    #[test]
    fn past_due_is_locked_out_even_inside_the_period() {
        let now = Utc::now();
        let record = subscription(
            PlanTier::Business,
            SubscriptionStatus::PastDue,
            Some(now + Duration::days(20)),
        );
        let entitlements = derive_entitlements(Some(&record), now);
        assert!(!entitlements.has_access);
        assert!(!entitlements.permit_packs);
        assert_eq!(entitlements.jobs_monthly_limit, Limit::Limited(0));
        assert_eq!(entitlements.seats_limit, Limit::Limited(0));
    }

    #[test]
    fn canceled_keeps_access_until_period_end() {
        let now = Utc::now();
        let record = subscription(
            PlanTier::Pro,
            SubscriptionStatus::Canceled,
            Some(now + Duration::days(5)),
        );
        let entitlements = derive_entitlements(Some(&record), now);
        assert!(entitlements.has_access);
        assert_eq!(entitlements.seats_limit, Limit::Limited(5));
        assert_eq!(entitlements.jobs_monthly_limit, Limit::Unlimited);
    }

    #[test]
    fn canceled_past_period_end_is_revoked() {
        let now = Utc::now();
        let record = subscription(
            PlanTier::Pro,
            SubscriptionStatus::Canceled,
            Some(now - Duration::days(5)),
        );
        let entitlements = derive_entitlements(Some(&record), now);
        assert!(!entitlements.has_access);
        assert_eq!(entitlements.jobs_monthly_limit, Limit::Limited(0));
        assert_eq!(entitlements.seats_limit, Limit::Limited(0));
        // baseline features stay on regardless of plan
        assert!(entitlements.evidence_verification);
        assert!(entitlements.job_assignment);
    }

    #[test]
    fn canceled_without_period_end_has_no_grace() {
        let record = subscription(PlanTier::Business, SubscriptionStatus::Canceled, None);
        let entitlements = derive_entitlements(Some(&record), Utc::now());
        assert!(!entitlements.has_access);
        assert!(!entitlements.permit_packs);
    }

    #[test]
    fn raw_paid_tier_without_status_is_treated_as_active_but_reported_raw() {
        let record = subscription(PlanTier::Pro, SubscriptionStatus::None, None);
        let entitlements = derive_entitlements(Some(&record), Utc::now());
        assert!(entitlements.has_access);
        assert_eq!(entitlements.seats_limit, Limit::Limited(5));
        assert_eq!(entitlements.status, SubscriptionStatus::None);
    }

    #[test]
    fn starter_without_status_has_no_access() {
        let record = subscription(PlanTier::Starter, SubscriptionStatus::None, None);
        let entitlements = derive_entitlements(Some(&record), Utc::now());
        assert!(!entitlements.has_access);
        assert_eq!(entitlements.jobs_monthly_limit, Limit::Limited(0));
    }

    #[test]
    fn trialing_pro_gets_pro_limits_without_business_features() {
        let record = subscription(PlanTier::Pro, SubscriptionStatus::Trialing, None);
        let entitlements = derive_entitlements(Some(&record), Utc::now());
        assert!(entitlements.has_access);
        assert!(!entitlements.permit_packs);
        assert_eq!(entitlements.jobs_monthly_limit, Limit::Unlimited);
        assert_eq!(entitlements.seats_limit, Limit::Limited(5));
    }

    #[test]
    fn derivation_is_repeatable() {
        let now = Utc::now();
        let record = subscription(
            PlanTier::Business,
            SubscriptionStatus::Canceled,
            Some(now + Duration::hours(1)),
        );
        assert_eq!(
            derive_entitlements(Some(&record), now),
            derive_entitlements(Some(&record), now)
        );
    }
}
