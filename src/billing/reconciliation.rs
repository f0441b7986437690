use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config;

use super::adapters::{normalize_provider_status, BillingProviderClient, UnknownPlanCode};
use super::models::{PlanTier, SubscriptionStatus};
use super::resolver::current_external_id;
use super::store::{SubscriptionStore, SubscriptionUpsert};

/// key: billing-reconciliation-config -> batch limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Requested parallel provider calls.
    pub concurrency: usize,
    /// Provider rate-limit ceiling; `concurrency` never exceeds it.
    pub max_concurrency: usize,
    pub fetch_timeout: Duration,
    /// Overall budget for one batch; no new organizations start after it.
    pub batch_deadline: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_concurrency: 4,
            fetch_timeout: Duration::from_secs(10),
            batch_deadline: None,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        Self {
            concurrency: *config::RECONCILE_CONCURRENCY,
            max_concurrency: *config::BILLING_API_MAX_CONCURRENCY,
            fetch_timeout: Duration::from_secs(*config::BILLING_FETCH_TIMEOUT_SECS),
            batch_deadline: *config::RECONCILE_DEADLINE,
        }
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, self.max_concurrency.max(1))
    }
}

/// Why a subscription could not be brought in line with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ReconcileIssue {
    #[error("plan code {0:?} does not name a known tier")]
    UnknownPlanCode(Option<String>),
    #[error("provider status `{0}` is not recognized")]
    UnrecognizedStatus(String),
    /// No prior active/trialing record for this external id, and the provider
    /// reports a state that must not be created from nothing.
    #[error("no prior active subscription for this external id")]
    UnknownSubscription,
    #[error("subscription is canceled locally; canceled is terminal")]
    TerminalSubscription,
    #[error("reconciliation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileDetails {
    pub organization_id: Uuid,
    pub external_subscription_id: String,
    pub provider_status: Option<String>,
    pub external_tier: Option<PlanTier>,
    pub external_status: Option<SubscriptionStatus>,
    pub local_tier: Option<PlanTier>,
    pub local_status: Option<SubscriptionStatus>,
    pub plan_tier: Option<PlanTier>,
    pub plan_status: Option<SubscriptionStatus>,
    /// Whether this external id is the organization's current subscription;
    /// only then is the plan row compared and written.
    pub current: bool,
    pub issue: Option<ReconcileIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub matched: bool,
    pub repaired: bool,
    pub details: ReconcileDetails,
}

impl ReconcileOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self.details.issue, Some(ReconcileIssue::Failed(_)))
    }
}

/// Aggregate of one batch. `total` counts every selected organization, so
/// `matched + repaired + errors + unreconcilable + skipped == total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub total: usize,
    pub matched: usize,
    pub repaired: usize,
    pub errors: usize,
    pub unreconcilable: usize,
    /// Not started because the batch deadline passed.
    pub skipped: usize,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: Option<&ReconcileOutcome>) {
        match outcome {
            None => self.skipped += 1,
            Some(outcome) if outcome.matched => self.matched += 1,
            Some(outcome) if outcome.repaired => self.repaired += 1,
            Some(outcome) if outcome.is_error() => self.errors += 1,
            Some(_) => self.unreconcilable += 1,
        }
    }
}

enum Verdict {
    Matched,
    Repaired,
    Unreconcilable(ReconcileIssue),
}

/// key: billing-reconciliation -> provider vs local projection repair
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn SubscriptionStore>,
    client: Arc<dyn BillingProviderClient>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        client: Arc<dyn BillingProviderClient>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Compares one subscription with the provider and repairs drift. Never
    /// returns an error: failures come back as an outcome with
    /// [`ReconcileIssue::Failed`].
    pub async fn reconcile_one(
        &self,
        organization_id: Uuid,
        external_subscription_id: &str,
    ) -> ReconcileOutcome {
        let mut details = ReconcileDetails {
            organization_id,
            external_subscription_id: external_subscription_id.to_string(),
            ..ReconcileDetails::default()
        };

        let verdict = self
            .try_reconcile(organization_id, external_subscription_id, &mut details)
            .await
            .unwrap_or_else(|err| {
                error!(
                    ?err,
                    %organization_id,
                    external_subscription_id,
                    "failed to reconcile subscription with billing provider"
                );
                Verdict::Unreconcilable(ReconcileIssue::Failed(format!("{err:#}")))
            });

        match verdict {
            Verdict::Matched => ReconcileOutcome {
                matched: true,
                repaired: false,
                details,
            },
            Verdict::Repaired => ReconcileOutcome {
                matched: false,
                repaired: true,
                details,
            },
            Verdict::Unreconcilable(issue) => {
                if !matches!(issue, ReconcileIssue::Failed(_)) {
                    warn!(
                        %organization_id,
                        external_subscription_id,
                        %issue,
                        "subscription cannot be reconciled automatically"
                    );
                }
                details.issue = Some(issue);
                ReconcileOutcome {
                    matched: false,
                    repaired: false,
                    details,
                }
            }
        }
    }

    async fn try_reconcile(
        &self,
        organization_id: Uuid,
        external_subscription_id: &str,
        details: &mut ReconcileDetails,
    ) -> Result<Verdict> {
        let timeout = self.config.fetch_timeout;
        let external = time::timeout(
            timeout,
            self.client.fetch_subscription(external_subscription_id),
        )
        .await
        .map_err(|_| anyhow!("billing provider fetch timed out after {timeout:?}"))??;
        details.provider_status = Some(external.status.clone());

        let tier = match external.plan_tier() {
            Ok(tier) => tier,
            Err(UnknownPlanCode(code)) => {
                return Ok(Verdict::Unreconcilable(ReconcileIssue::UnknownPlanCode(code)))
            }
        };
        details.external_tier = Some(tier);

        let status = match normalize_provider_status(&external.status) {
            Ok(status) => status,
            Err(err) => {
                return Ok(Verdict::Unreconcilable(ReconcileIssue::UnrecognizedStatus(
                    err.0,
                )))
            }
        };
        details.external_status = Some(status);

        let (local, plan, latest) = tokio::try_join!(
            self.store
                .subscription_by_external_id(organization_id, external_subscription_id),
            self.store.current_plan(organization_id),
            self.store.legacy_subscription(organization_id),
        )
        .context("failed to read local subscription projections")?;

        details.local_tier = local.as_ref().and_then(|row| row.tier);
        details.local_status = local.as_ref().and_then(|row| row.status);
        details.plan_tier = plan.as_ref().and_then(|row| row.tier);
        details.plan_status = plan.as_ref().and_then(|row| row.status);

        // A new external id supersedes whatever is current; a known one is
        // current only when it is the subscription the organization runs on.
        let current = local.is_none()
            || current_external_id(plan.as_ref(), latest.as_ref())
                .map_or(true, |id| id == external_subscription_id);
        details.current = current;

        // Status the resolver would read for this subscription: its legacy
        // row, then the plan row unless that row tracks another subscription.
        let previous = match &local {
            Some(row) => row
                .status
                .or_else(|| {
                    plan.as_ref()
                        .filter(|plan| {
                            plan.external_subscription_id
                                .as_deref()
                                .map_or(true, |id| id == external_subscription_id)
                        })
                        .and_then(|plan| plan.status)
                })
                .unwrap_or(SubscriptionStatus::None),
            None => SubscriptionStatus::None,
        };
        if !previous.can_transition_to(status) {
            let issue = if previous == SubscriptionStatus::Canceled {
                ReconcileIssue::TerminalSubscription
            } else {
                ReconcileIssue::UnknownSubscription
            };
            return Ok(Verdict::Unreconcilable(issue));
        }

        let agrees = |row_tier: Option<PlanTier>, row_status: Option<SubscriptionStatus>| {
            row_tier == Some(tier) && row_status == Some(status)
        };
        if local.is_some()
            && agrees(details.local_tier, details.local_status)
            && (!current || agrees(details.plan_tier, details.plan_status))
        {
            debug!(
                %organization_id,
                external_subscription_id,
                %tier,
                %status,
                current,
                "subscription matches billing provider"
            );
            return Ok(Verdict::Matched);
        }

        let record = SubscriptionUpsert {
            organization_id,
            external_subscription_id: external_subscription_id.to_string(),
            external_customer_id: external.customer.clone(),
            tier,
            status,
            period_start: external.current_period_start,
            period_end: external.current_period_end,
            current,
        };
        let changed = self
            .store
            .upsert_subscription(&record)
            .await
            .context("failed to write repaired subscription")?;

        info!(
            %organization_id,
            external_subscription_id,
            local_tier = ?details.local_tier,
            local_status = ?details.local_status,
            %tier,
            %status,
            current,
            changed,
            "repaired subscription drift from billing provider"
        );
        Ok(Verdict::Repaired)
    }

    /// Runs one batch within the configured deadline.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary> {
        let deadline = self
            .config
            .batch_deadline
            .map(|budget| Instant::now() + budget);
        self.reconcile_all_until(deadline).await
    }

    /// Only listing the candidates can fail the batch; per-organization
    /// failures are counted in the summary.
    pub async fn reconcile_all_until(&self, deadline: Option<Instant>) -> Result<ReconcileSummary> {
        let candidates = self
            .store
            .reconcile_candidates()
            .await
            .context("failed to list subscriptions to reconcile")?;

        let mut summary = ReconcileSummary {
            total: candidates.len(),
            ..ReconcileSummary::default()
        };

        let mut outcomes = stream::iter(candidates)
            .map(|candidate| async move {
                if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                    return None;
                }
                Some(
                    self.reconcile_one(
                        candidate.organization_id,
                        &candidate.external_subscription_id,
                    )
                    .await,
                )
            })
            .buffer_unordered(self.config.effective_concurrency());

        while let Some(outcome) = outcomes.next().await {
            summary.record(outcome.as_ref());
        }

        if summary.skipped > 0 {
            warn!(
                skipped = summary.skipped,
                total = summary.total,
                "billing reconciliation deadline reached before all organizations were checked"
            );
        }
        info!(
            total = summary.total,
            matched = summary.matched,
            repaired = summary.repaired,
            errors = summary.errors,
            unreconcilable = summary.unreconcilable,
            skipped = summary.skipped,
            "billing reconciliation batch finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_is_capped_by_provider_ceiling() {
        let config = ReconcilerConfig {
            concurrency: 32,
            max_concurrency: 4,
            ..ReconcilerConfig::default()
        };
        assert_eq!(config.effective_concurrency(), 4);

        let config = ReconcilerConfig {
            concurrency: 0,
            ..ReconcilerConfig::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn summary_buckets_each_outcome_once() {
        let details = ReconcileDetails::default();
        let mut summary = ReconcileSummary::default();
        summary.record(None);
        summary.record(Some(&ReconcileOutcome {
            matched: true,
            repaired: false,
            details: details.clone(),
        }));
        summary.record(Some(&ReconcileOutcome {
            matched: false,
            repaired: false,
            details: ReconcileDetails {
                issue: Some(ReconcileIssue::Failed("timeout".into())),
                ..details.clone()
            },
        }));
        summary.record(Some(&ReconcileOutcome {
            matched: false,
            repaired: false,
            details: ReconcileDetails {
                issue: Some(ReconcileIssue::UnknownPlanCode(None)),
                ..details
            },
        }));
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.unreconcilable, 1);
    }
}
