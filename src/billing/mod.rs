pub mod adapters;
pub mod enforcement;
pub mod entitlements;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod reconciliation;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod store;

pub use adapters::{
    normalize_provider_status, BillingProviderClient, ExternalSubscription, HttpBillingClient,
    UnknownPlanCode, UnrecognizedStatus,
};
pub use enforcement::{assert_entitled, assert_within_limit, has_entitlement, remaining};
pub use entitlements::{derive_entitlements, starter_defaults};
pub use memory::InMemorySubscriptionStore;
pub use models::{
    CanonicalSubscription, Entitlements, Feature, Limit, LimitKind, PlanTier, Projection,
    ProjectionSource, SubscriptionStatus,
};
pub use postgres::PgSubscriptionStore;
pub use reconciliation::{
    ReconcileDetails, ReconcileIssue, ReconcileOutcome, ReconcileSummary, Reconciler,
    ReconcilerConfig,
};
pub use resolver::{current_external_id, merge_projections, resolve_subscription};
pub use scheduler::{process_tick as run_reconciliation_tick, spawn as spawn_reconciliation_scheduler};
pub use service::EntitlementService;
pub use store::{ReconcileCandidate, SubscriptionStore, SubscriptionUpsert};
