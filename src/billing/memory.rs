use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreResult;

use super::models::{Projection, ProjectionSource};
use super::store::{ReconcileCandidate, SubscriptionStore, SubscriptionUpsert};

/// key: billing-store-memory -> process-local projections
///
/// Mirrors the Postgres tables: one current-plan row per organization and any
/// number of legacy rows, unique per external subscription id.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    plans: DashMap<Uuid, Projection>,
    subscriptions: DashMap<Uuid, Vec<Projection>>,
    writes: AtomicUsize,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_current_plan(&self, mut projection: Projection) {
        projection.source = ProjectionSource::CurrentPlan;
        projection.updated_at.get_or_insert_with(Utc::now);
        self.plans.insert(projection.organization_id, projection);
    }

    /// Replaces any legacy row with the same external subscription id.
    pub fn insert_legacy_subscription(&self, mut projection: Projection) {
        projection.source = ProjectionSource::LegacySubscription;
        projection.updated_at.get_or_insert_with(Utc::now);
        let mut rows = self.subscriptions.entry(projection.organization_id).or_default();
        rows.retain(|row| row.external_subscription_id != projection.external_subscription_id);
        rows.push(projection);
    }

    /// Number of upserts that changed stored state.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Ties on `updated_at` go to the greater external id, matching the
    /// `ORDER BY updated_at DESC, external_subscription_id DESC NULLS LAST`
    /// of the Postgres store.
    fn latest_legacy(rows: &[Projection], linked_only: bool) -> Option<&Projection> {
        rows.iter()
            .filter(|row| !linked_only || row.external_subscription_id.is_some())
            .max_by(|a, b| {
                (a.updated_at, a.external_subscription_id.as_deref())
                    .cmp(&(b.updated_at, b.external_subscription_id.as_deref()))
            })
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn current_plan(&self, organization_id: Uuid) -> StoreResult<Option<Projection>> {
        Ok(self.plans.get(&organization_id).map(|row| row.clone()))
    }

    async fn legacy_subscription(&self, organization_id: Uuid) -> StoreResult<Option<Projection>> {
        Ok(self
            .subscriptions
            .get(&organization_id)
            .and_then(|rows| Self::latest_legacy(&rows, false).cloned()))
    }

    async fn subscription_by_external_id(
        &self,
        organization_id: Uuid,
        external_subscription_id: &str,
    ) -> StoreResult<Option<Projection>> {
        Ok(self.subscriptions.get(&organization_id).and_then(|rows| {
            rows.iter()
                .find(|row| row.external_subscription_id.as_deref() == Some(external_subscription_id))
                .cloned()
        }))
    }

    async fn reconcile_candidates(&self) -> StoreResult<Vec<ReconcileCandidate>> {
        let mut candidates = Vec::new();
        for entry in self.subscriptions.iter() {
            let Some(row) = Self::latest_legacy(entry.value(), true) else {
                continue;
            };
            let status = row.status.or_else(|| {
                self.plans
                    .get(entry.key())
                    .and_then(|plan| plan.status)
            });
            if !status.map_or(false, |status| status.is_reconcilable()) {
                continue;
            }
            if let Some(external_subscription_id) = row.external_subscription_id.clone() {
                candidates.push(ReconcileCandidate {
                    organization_id: *entry.key(),
                    external_subscription_id,
                });
            }
        }
        candidates.sort_by_key(|candidate| candidate.organization_id);
        Ok(candidates)
    }

    async fn upsert_subscription(&self, record: &SubscriptionUpsert) -> StoreResult<bool> {
        let now = Utc::now();
        let mut changed = false;

        {
            let mut rows = self.subscriptions.entry(record.organization_id).or_default();
            let existing = rows.iter_mut().find(|row| {
                row.external_subscription_id.as_deref()
                    == Some(record.external_subscription_id.as_str())
            });
            match existing {
                Some(row) => changed |= apply(row, record, record.current.then_some(now)),
                None if record.current => {
                    let mut row = Projection::empty(
                        ProjectionSource::LegacySubscription,
                        record.organization_id,
                    );
                    apply(&mut row, record, Some(now));
                    rows.push(row);
                    changed = true;
                }
                None => {}
            }
        }

        if record.current {
            let mut plan = self.plans.entry(record.organization_id).or_insert_with(|| {
                Projection::empty(ProjectionSource::CurrentPlan, record.organization_id)
            });
            changed |= apply(&mut plan, record, Some(now));
        }

        if changed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(changed)
    }
}

/// Writes only when a value differs, like `IS DISTINCT FROM` in the SQL upsert.
/// `touched_at` of `None` keeps the row's `updated_at`.
fn apply(
    row: &mut Projection,
    record: &SubscriptionUpsert,
    touched_at: Option<chrono::DateTime<Utc>>,
) -> bool {
    let target = Projection {
        source: row.source,
        organization_id: record.organization_id,
        tier: Some(record.tier),
        status: Some(record.status),
        period_start: record.period_start,
        period_end: record.period_end,
        external_subscription_id: Some(record.external_subscription_id.clone()),
        external_customer_id: record.external_customer_id.clone(),
        updated_at: row.updated_at,
    };
    if *row == target {
        return false;
    }
    *row = Projection {
        updated_at: touched_at.or(target.updated_at),
        ..target
    };
    true
}
