use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// key: billing-plan-tier -> ordered feature bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    Pro,
    Business,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Starter => "starter",
            PlanTier::Pro => "pro",
            PlanTier::Business => "business",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plan tier `{0}`")]
pub struct UnknownPlanTier(pub String);

impl FromStr for PlanTier {
    type Err = UnknownPlanTier;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "starter" => Ok(PlanTier::Starter),
            "pro" => Ok(PlanTier::Pro),
            "business" => Ok(PlanTier::Business),
            _ => Err(UnknownPlanTier(value.to_string())),
        }
    }
}

/// key: billing-subscription-status -> normalized lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    None,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::None => "none",
        }
    }

    /// Statuses that are still worth comparing against the provider.
    pub fn is_reconcilable(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing | SubscriptionStatus::PastDue
        )
    }

    /// Lifecycle for a single external subscription id. `canceled` is terminal;
    /// a new external id starts a fresh chain from `none`.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus as S;
        match (self, next) {
            (current, next) if *current == next => true,
            (S::None, S::Active | S::Trialing) => true,
            (S::Active | S::Trialing, S::Active | S::Trialing | S::PastDue | S::Canceled) => true,
            (S::PastDue, S::Active | S::Trialing | S::Canceled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown subscription status `{0}`")]
pub struct UnknownSubscriptionStatus(pub String);

/// Parses the locally stored status text. Provider statuses go through
/// [`crate::billing::adapters::normalize_provider_status`] instead.
impl FromStr for SubscriptionStatus {
    type Err = UnknownSubscriptionStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "none" | "" => Ok(SubscriptionStatus::None),
            _ => Err(UnknownSubscriptionStatus(value.to_string())),
        }
    }
}

/// Quota ceiling; `Unlimited` serializes as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Limit {
    Limited(u32),
    Unlimited,
}

impl Limit {
    pub fn allows(&self, used: u32) -> bool {
        match self {
            Limit::Limited(max) => used < *max,
            Limit::Unlimited => true,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Limited(max) => write!(f, "{max}"),
            Limit::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// key: billing-projection-source -> local tables mirroring provider state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionSource {
    /// `organization_plans`
    CurrentPlan,
    /// `organization_subscriptions`
    LegacySubscription,
}

/// One row read from a local projection table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub source: ProjectionSource,
    pub organization_id: Uuid,
    pub tier: Option<PlanTier>,
    pub status: Option<SubscriptionStatus>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Projection {
    pub fn empty(source: ProjectionSource, organization_id: Uuid) -> Self {
        Self {
            source,
            organization_id,
            tier: None,
            status: None,
            period_start: None,
            period_end: None,
            external_subscription_id: None,
            external_customer_id: None,
            updated_at: None,
        }
    }
}

/// key: billing-canonical-subscription -> merged view per organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSubscription {
    pub organization_id: Uuid,
    pub tier: PlanTier,
    pub status: SubscriptionStatus,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub external_subscription_id: Option<String>,
    pub external_customer_id: Option<String>,
}

/// Gated product features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    PermitPacks,
    VersionHistory,
    EvidenceVerification,
    JobAssignment,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::PermitPacks => "permit_packs",
            Feature::VersionHistory => "version_history",
            Feature::EvidenceVerification => "evidence_verification",
            Feature::JobAssignment => "job_assignment",
        }
    }

    /// Lowest tier that unlocks the feature, used for upgrade messaging.
    pub fn minimum_tier(&self) -> PlanTier {
        match self {
            Feature::PermitPacks | Feature::VersionHistory => PlanTier::Business,
            Feature::EvidenceVerification | Feature::JobAssignment => PlanTier::Starter,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    JobsMonthly,
    Seats,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::JobsMonthly => f.write_str("jobs_monthly"),
            LimitKind::Seats => f.write_str("seats"),
        }
    }
}

/// key: billing-entitlements -> derived decision, never persisted
///
/// `tier`, `status` and `period_end` are copied from the input record as-is,
/// even when the decision was taken on a normalized status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    pub has_access: bool,
    pub permit_packs: bool,
    pub version_history: bool,
    pub evidence_verification: bool,
    pub job_assignment: bool,
    pub jobs_monthly_limit: Limit,
    pub seats_limit: Limit,
    pub tier: PlanTier,
    pub status: SubscriptionStatus,
    pub period_end: Option<DateTime<Utc>>,
}

impl Entitlements {
    pub fn limit(&self, kind: LimitKind) -> Limit {
        match kind {
            LimitKind::JobsMonthly => self.jobs_monthly_limit,
            LimitKind::Seats => self.seats_limit,
        }
    }
}
