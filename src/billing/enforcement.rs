use crate::error::EntitlementError;

use super::models::{Entitlements, Feature, Limit, LimitKind};

/// key: billing-enforcement -> call-site gates
pub fn has_entitlement(entitlements: &Entitlements, feature: Feature) -> bool {
    match feature {
        Feature::PermitPacks => entitlements.permit_packs,
        Feature::VersionHistory => entitlements.version_history,
        Feature::EvidenceVerification => entitlements.evidence_verification,
        Feature::JobAssignment => entitlements.job_assignment,
    }
}

/// Call right before the gated feature runs.
pub fn assert_entitled(
    entitlements: &Entitlements,
    feature: Feature,
) -> Result<(), EntitlementError> {
    if has_entitlement(entitlements, feature) {
        return Ok(());
    }
    Err(EntitlementError::FeatureNotEntitled {
        feature,
        tier: entitlements.tier,
        status: entitlements.status,
    })
}

/// Fails once `used` has reached the quota, so the next unit would exceed it.
pub fn assert_within_limit(
    entitlements: &Entitlements,
    kind: LimitKind,
    used: u32,
) -> Result<(), EntitlementError> {
    let limit = entitlements.limit(kind);
    if limit.allows(used) {
        return Ok(());
    }
    Err(EntitlementError::LimitReached {
        limit: kind,
        used,
        max: limit,
        tier: entitlements.tier,
        status: entitlements.status,
    })
}

/// Remaining headroom, `None` when unlimited.
pub fn remaining(entitlements: &Entitlements, kind: LimitKind, used: u32) -> Option<u32> {
    match entitlements.limit(kind) {
        Limit::Limited(max) => Some(max.saturating_sub(used)),
        Limit::Unlimited => None,
    }
}
