use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::models::{PlanTier, SubscriptionStatus};

/// key: billing-adapter -> provider source of truth
#[async_trait]
pub trait BillingProviderClient: Send + Sync {
    async fn fetch_subscription(&self, external_subscription_id: &str)
        -> Result<ExternalSubscription>;
}

/// Subscription as the provider reports it. `status` is provider-native text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSubscription {
    pub id: String,
    pub status: String,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExternalSubscription {
    pub fn plan_code(&self) -> Option<&str> {
        self.metadata
            .get("plan_code")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Tier named by the plan code; missing or unknown codes are an error,
    /// never a default.
    pub fn plan_tier(&self) -> Result<PlanTier, UnknownPlanCode> {
        let code = self
            .plan_code()
            .ok_or_else(|| UnknownPlanCode(None))?;
        code.parse()
            .map_err(|_| UnknownPlanCode(Some(code.to_string())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("plan code {0:?} does not name a known tier")]
pub struct UnknownPlanCode(pub Option<String>);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider status `{0}` has no normalized mapping")]
pub struct UnrecognizedStatus(pub String);

/// key: billing-status-normalize -> provider states into the closed lifecycle
///
/// Never yields `none`; anything not listed is rejected.
pub fn normalize_provider_status(raw: &str) -> Result<SubscriptionStatus, UnrecognizedStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "active" => Ok(SubscriptionStatus::Active),
        "trialing" => Ok(SubscriptionStatus::Trialing),
        "past_due" | "unpaid" | "incomplete" => Ok(SubscriptionStatus::PastDue),
        "canceled" | "cancelled" | "incomplete_expired" => Ok(SubscriptionStatus::Canceled),
        _ => Err(UnrecognizedStatus(raw.to_string())),
    }
}

/// key: billing-adapter-http -> REST provider client
#[derive(Clone)]
pub struct HttpBillingClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBillingClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build billing provider client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth_token {
            request.bearer_auth(token)
        } else {
            request
        }
    }
}

#[async_trait]
impl BillingProviderClient for HttpBillingClient {
    async fn fetch_subscription(
        &self,
        external_subscription_id: &str,
    ) -> Result<ExternalSubscription> {
        let response = self
            .auth(
                self.client
                    .get(self.endpoint(&format!("subscriptions/{external_subscription_id}"))),
            )
            .send()
            .await
            .context("failed to contact billing provider")?
            .error_for_status()
            .context("billing provider rejected subscription lookup")?;

        response
            .json()
            .await
            .context("failed to decode billing provider subscription")
    }
}
