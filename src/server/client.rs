//! HTTP client implementing [`Executor`] against a running service.

use crate::executor::*;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Long enough for a full convergence loop plus transport.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Executor that forwards every call to a remote service.
///
/// Transport and decode failures are logged and reported as code 0, the same
/// as a failure inside the service.
pub struct RemoteExecutor {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteExecutor {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call<P, R>(&self, route: &str, params: Option<&P>) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, route);
        debug!(%url, "Calling remote executor");

        let mut request = self.client.post(&url);
        if let Some(params) = params {
            request = request.json(params);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned HTTP {}: {}", route, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode reply of {}", route))
    }

    async fn forward<P, R>(&self, route: &str, params: &P) -> R
    where
        P: Serialize + Sync,
        R: DeserializeOwned + FailureReply,
    {
        self.call(route, Some(params)).await.unwrap_or_else(|e| {
            error!(%route, error = %format!("{:#}", e), "Remote call failed");
            R::failure()
        })
    }
}

#[async_trait]
impl Executor for RemoteExecutor {
    async fn order(&self, params: OrderParams) -> OrderResult {
        self.forward(routes::ORDER, &params).await
    }

    async fn target_amount(&self, params: TargetAmountParams) -> OrderResult {
        self.forward(routes::TARGET_AMOUNT, &params).await
    }

    async fn target_position(&self, params: TargetPositionParams) -> OrderResult {
        self.forward(routes::TARGET_POSITION, &params).await
    }

    async fn two_order(&self, params: TwoOrderParams) -> OrderResult {
        self.forward(routes::TWO_ORDER, &params).await
    }

    async fn order_basis(&self, params: OrderBasisParams) -> OrderResult {
        self.forward(routes::ORDER_BASIS, &params).await
    }

    async fn multiple_order(&self, params: MultipleOrderParams) -> OrderResult {
        self.forward(routes::MULTIPLE_ORDER, &params).await
    }

    async fn reconcile_two_order(&self, params: ReconcileTwoOrderParams) -> OrderResult {
        self.forward(routes::RECONCILE_TWO_ORDER, &params).await
    }

    async fn reconcile_basis(&self, params: ReconcileBasisParams) -> OrderResult {
        self.forward(routes::RECONCILE_BASIS, &params).await
    }

    async fn check_position(&self, params: LegRef) -> PositionReply {
        self.forward(routes::CHECK_POSITION, &params).await
    }

    async fn check_basis_position(&self, params: BasisQuery) -> PairPositionReply {
        self.forward(routes::CHECK_BASIS_POSITION, &params).await
    }

    async fn check_two_order_position(&self, params: TwoOrderQuery) -> PairPositionReply {
        self.forward(routes::CHECK_TWO_ORDER_POSITION, &params).await
    }

    async fn check_basis_position_equity(&self, params: BasisQuery) -> BasisEquityReply {
        self.forward(routes::CHECK_BASIS_POSITION_EQUITY, &params)
            .await
    }

    async fn check_equity(&self, params: LegRef) -> EquityReply {
        self.forward(routes::CHECK_EQUITY, &params).await
    }

    async fn reload_registry(&self) -> ReloadReply {
        self.call::<(), _>(routes::RELOAD_REGISTRY, None)
            .await
            .unwrap_or_else(|e| {
                error!(error = %format!("{:#}", e), "Remote registry reload failed");
                ReloadReply::failure()
            })
    }
}
