use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::entitlements::derive_entitlements;
use super::models::{CanonicalSubscription, Entitlements};
use super::resolver::resolve_subscription;
use super::store::SubscriptionStore;

/// key: billing-service -> request-time entitlement lookups
#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn SubscriptionStore>,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn get_org_entitlements(&self, organization_id: Uuid) -> Entitlements {
        self.entitlements_at(organization_id, Utc::now()).await
    }

    pub async fn entitlements_at(&self, organization_id: Uuid, now: DateTime<Utc>) -> Entitlements {
        let subscription = self.subscription(organization_id).await;
        derive_entitlements(subscription.as_ref(), now)
    }

    pub async fn subscription(&self, organization_id: Uuid) -> Option<CanonicalSubscription> {
        resolve_subscription(self.store.as_ref(), organization_id).await
    }
}
