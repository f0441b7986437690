use thiserror::Error;

use crate::billing::models::{Feature, Limit, LimitKind, PlanTier, SubscriptionStatus};

/// Raised at the enforcement boundary only, never while deriving entitlements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntitlementError {
    #[error("feature `{feature}` is not included (tier={tier}, status={status})")]
    FeatureNotEntitled {
        feature: Feature,
        tier: PlanTier,
        status: SubscriptionStatus,
    },
    #[error("{limit} limit reached: {used}/{max} (tier={tier}, status={status})")]
    LimitReached {
        limit: LimitKind,
        used: u32,
        max: Limit,
        tier: PlanTier,
        status: SubscriptionStatus,
    },
}

impl EntitlementError {
    /// Tier the organization has to move to for the denied call to succeed.
    /// `None` when the tier already covers it and access itself is the problem
    /// (past due, expired cancellation).
    pub fn required_tier(&self) -> Option<PlanTier> {
        let (needed, tier) = match self {
            EntitlementError::FeatureNotEntitled { feature, tier, .. } => {
                (feature.minimum_tier(), *tier)
            }
            EntitlementError::LimitReached {
                max: Limit::Limited(0),
                ..
            } => return None,
            EntitlementError::LimitReached { tier, .. } => match tier {
                PlanTier::Starter => (PlanTier::Pro, *tier),
                PlanTier::Pro => (PlanTier::Business, *tier),
                PlanTier::Business => return None,
            },
        };
        (needed > tier).then_some(needed)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
