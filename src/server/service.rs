//! In-process executor behind the RPC front.
//!
//! Each call takes a worker permit, resolves its adapters from the current
//! registry snapshot and delegates to the engine. Errors stop here: they are
//! logged with their full chain, written to the audit table and turned into
//! result code 0.

use crate::cache::{basis_bps, TickerCache};
use crate::config::ExecutionConfig;
use crate::engine::{
    self, converge_all, place_pair, reconcile, target_amount, target_position, Leg, LegOrder,
    PercentOutcome,
};
use crate::error::ExecutionError;
use crate::exchange::{AdapterFactory, ExchangeAdapter, Position};
use crate::executor::*;
use crate::notify::{LogNotifier, Notifier, TradeSummary};
use crate::persistence::{ExecutionRecord, Store};
use crate::registry::{InstrumentRegistry, InstrumentSpec, RegistryHandle};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Adapter built for one (account, instrument) pair of the current call.
struct Bound {
    adapter: Box<dyn ExchangeAdapter>,
    instrument: InstrumentSpec,
}

impl Bound {
    fn leg(&self) -> Leg<'_> {
        Leg {
            adapter: self.adapter.as_ref(),
            instrument: &self.instrument,
        }
    }
}

/// Executor running the engine in this process.
pub struct ExecutionService {
    registry: Arc<RegistryHandle>,
    factory: Arc<dyn AdapterFactory>,
    cache: Arc<dyn TickerCache>,
    store: Option<Arc<dyn Store>>,
    notifier: Arc<dyn Notifier>,
    config: ExecutionConfig,
    permits: Arc<Semaphore>,
}

impl ExecutionService {
    pub fn new(
        registry: Arc<RegistryHandle>,
        factory: Arc<dyn AdapterFactory>,
        cache: Arc<dyn TickerCache>,
        config: ExecutionConfig,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            registry,
            factory,
            cache,
            store: None,
            notifier: Arc::new(LogNotifier),
            config,
            permits: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
        }
    }

    /// Audit every mutating call to `store` and reload the registry from it.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &Arc<RegistryHandle> {
        &self.registry
    }

    fn bind(
        &self,
        registry: &InstrumentRegistry,
        account: &str,
        instrument: &str,
    ) -> Result<Bound, ExecutionError> {
        let account = registry.account(account)?;
        let instrument = registry.instrument(instrument)?;
        let adapter = self.factory.create(account, instrument)?;
        Ok(Bound {
            adapter,
            instrument: instrument.clone(),
        })
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, ExecutionError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ExecutionError::InvalidRequest("service is shutting down".to_string()))
    }

    /// Run a mutating call and collapse its result into a wire code.
    async fn execute<R, F>(&self, method: &'static str, request: &R, call: F) -> OrderResult
    where
        R: Serialize + Sync,
        F: Future<Output = Result<ResultCode, ExecutionError>> + Send,
    {
        let request = serde_json::to_string(request).unwrap_or_default();
        let started = Instant::now();

        let result = match self.permit().await {
            Ok(_permit) => {
                debug!(method, %request, "RPC started");
                call.await
            }
            Err(e) => Err(e),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (code, error_text) = match result {
            Ok(code) => {
                info!(method, %code, duration_ms, "RPC completed");
                (code, None)
            }
            Err(e) => {
                error!(
                    method,
                    kind = e.kind(),
                    error = %e,
                    %request,
                    duration_ms,
                    "RPC failed"
                );
                (ResultCode::Failure, Some(e.to_string()))
            }
        };

        self.audit(method, &request, code, error_text.as_deref(), duration_ms);
        self.summarize(TradeSummary {
            method: method.to_string(),
            code,
            request,
            error: error_text,
            duration_ms,
            timestamp: Utc::now(),
        });

        OrderResult::new(code)
    }

    /// Run a read-only call; failures are logged and reported as `None`.
    async fn query<T, F>(&self, method: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, ExecutionError>> + Send,
    {
        let result = match self.permit().await {
            Ok(_permit) => call.await,
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(method, kind = e.kind(), error = %e, "Query failed");
                None
            }
        }
    }

    fn audit(
        &self,
        method: &str,
        request: &str,
        code: ResultCode,
        error_text: Option<&str>,
        duration_ms: u64,
    ) {
        let Some(store) = &self.store else {
            return;
        };
        let record = ExecutionRecord {
            method: method.to_string(),
            request: request.to_string(),
            code: code.into(),
            error: error_text.map(str::to_string),
            duration_ms,
            created_at: Utc::now(),
        };
        if let Err(e) = store.record_execution(&record) {
            warn!(method, error = %e, "Failed to write execution audit row");
        }
    }

    fn summarize(&self, summary: TradeSummary) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&summary).await {
                warn!(
                    notifier = notifier.name(),
                    method = %summary.method,
                    error = %e,
                    "Failed to deliver trade summary"
                );
            }
        });
    }

    // ==================== Mutating calls ====================

    async fn try_order(&self, params: &OrderParams) -> Result<ResultCode, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound = self.bind(&registry, &params.account, &params.instrument)?;
        engine::place_order(
            bound.adapter.as_ref(),
            &bound.instrument,
            params.direction,
            params.amount,
        )
        .await?;
        Ok(ResultCode::Success)
    }

    async fn try_target_amount(
        &self,
        params: &TargetAmountParams,
    ) -> Result<ResultCode, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound = self.bind(&registry, &params.account, &params.instrument)?;
        let outcome = target_amount(
            bound.adapter.as_ref(),
            &bound.instrument,
            params.target_amount,
            &self.config,
        )
        .await?;
        Ok(if outcome.is_converged() {
            ResultCode::Success
        } else {
            ResultCode::Failure
        })
    }

    async fn try_target_position(
        &self,
        params: &TargetPositionParams,
    ) -> Result<ResultCode, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound = self.bind(&registry, &params.account, &params.instrument)?;
        let outcome = target_position(
            bound.adapter.as_ref(),
            &bound.instrument,
            self.cache.as_ref(),
            params.direction,
            params.target_percent,
            &self.config,
        )
        .await?;
        Ok(match outcome {
            PercentOutcome::Finished { .. } => ResultCode::Success,
            PercentOutcome::Exhausted { .. } => ResultCode::TimedOut,
        })
    }

    async fn try_two_order(&self, params: &TwoOrderParams) -> Result<ResultCode, ExecutionError> {
        let registry = self.registry.snapshot();
        let (one, two) = (&params.leg_1, &params.leg_2);
        let bound_1 = self.bind(&registry, &one.account, &one.instrument)?;
        let bound_2 = self.bind(&registry, &two.account, &two.instrument)?;

        place_pair(
            LegOrder {
                leg: bound_1.leg(),
                direction: one.direction,
                amount: one.amount,
            },
            LegOrder {
                leg: bound_2.leg(),
                direction: two.direction,
                amount: two.amount,
            },
        )
        .await?;
        Ok(ResultCode::Success)
    }

    async fn try_order_basis(
        &self,
        params: &OrderBasisParams,
    ) -> Result<ResultCode, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound_1 = self.bind(&registry, &params.account, &params.instrument_1)?;
        let bound_2 = self.bind(&registry, &params.account, &params.instrument_2)?;

        place_pair(
            LegOrder {
                leg: bound_1.leg(),
                direction: params.direction_1,
                amount: params.amount_1,
            },
            LegOrder {
                leg: bound_2.leg(),
                direction: params.direction_2,
                amount: params.amount_2,
            },
        )
        .await?;
        Ok(ResultCode::Success)
    }

    async fn try_multiple_order(
        &self,
        params: &MultipleOrderParams,
    ) -> Result<ResultCode, ExecutionError> {
        if params.instruments.is_empty() {
            return Err(ExecutionError::InvalidRequest(
                "no instruments given".to_string(),
            ));
        }
        if params.instruments.len() != params.target_amounts.len() {
            return Err(ExecutionError::InvalidRequest(format!(
                "{} instruments but {} target amounts",
                params.instruments.len(),
                params.target_amounts.len()
            )));
        }

        let registry = self.registry.snapshot();
        let bound = params
            .instruments
            .iter()
            .map(|instrument| self.bind(&registry, &params.account, instrument))
            .collect::<Result<Vec<_>, _>>()?;
        let legs: Vec<_> = bound
            .iter()
            .zip(&params.target_amounts)
            .map(|(b, target)| (b.leg(), *target))
            .collect();

        let results = converge_all(&legs, &self.config).await;

        let mut converged = 0usize;
        for (instrument, result) in params.instruments.iter().zip(results) {
            match result {
                Ok(outcome) if outcome.is_converged() => converged += 1,
                Ok(outcome) => warn!(
                    %instrument,
                    orders_placed = outcome.orders_placed(),
                    "Leg did not converge"
                ),
                Err(e) => error!(%instrument, error = %e, "Leg failed"),
            }
        }

        Ok(if converged == params.instruments.len() {
            ResultCode::Success
        } else {
            ResultCode::Failure
        })
    }

    async fn try_reconcile(
        &self,
        leg_a: (&str, &str),
        leg_b: (&str, &str),
        ratio_factor: Decimal,
    ) -> Result<ResultCode, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound_a = self.bind(&registry, leg_a.0, leg_a.1)?;
        let bound_b = self.bind(&registry, leg_b.0, leg_b.1)?;

        let outcome = reconcile(
            bound_a.leg(),
            bound_b.leg(),
            ratio_factor,
            self.config.leg_tolerance,
        )
        .await?;
        if !outcome.was_balanced() {
            info!(corrections = outcome.placed.len(), "Pair corrected");
        }
        Ok(ResultCode::Success)
    }

    // ==================== Queries ====================

    async fn read_position(&self, leg: &LegRef) -> Result<Position, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound = self.bind(&registry, &leg.account, &leg.instrument)?;
        Ok(bound.adapter.get_position().await?)
    }

    async fn read_basis(
        &self,
        params: &BasisQuery,
    ) -> Result<PairPositionReply, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound_1 = self.bind(&registry, &params.account, &params.instrument_1)?;
        let bound_2 = self.bind(&registry, &params.account, &params.instrument_2)?;

        let (position_1, position_2) = tokio::try_join!(
            bound_1.adapter.get_position(),
            bound_2.adapter.get_position()
        )?;

        Ok(PairPositionReply {
            code: ResultCode::Success,
            leg_1: Some(position_1),
            leg_2: Some(position_2),
            basis_bps: self.basis(&bound_1.instrument, &bound_2.instrument),
        })
    }

    async fn read_two_positions(
        &self,
        params: &TwoOrderQuery,
    ) -> Result<PairPositionReply, ExecutionError> {
        let (position_1, position_2) = tokio::try_join!(
            self.read_position(&params.leg_1),
            self.read_position(&params.leg_2)
        )?;

        Ok(PairPositionReply {
            code: ResultCode::Success,
            leg_1: Some(position_1),
            leg_2: Some(position_2),
            basis_bps: None,
        })
    }

    async fn read_equity(&self, leg: &LegRef) -> Result<engine::PositionSnapshot, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound = self.bind(&registry, &leg.account, &leg.instrument)?;
        self.snapshot_of(&bound).await
    }

    async fn read_basis_equity(
        &self,
        params: &BasisQuery,
    ) -> Result<BasisEquityReply, ExecutionError> {
        let registry = self.registry.snapshot();
        let bound_1 = self.bind(&registry, &params.account, &params.instrument_1)?;
        let bound_2 = self.bind(&registry, &params.account, &params.instrument_2)?;

        let (snapshot_1, snapshot_2) =
            tokio::try_join!(self.snapshot_of(&bound_1), self.snapshot_of(&bound_2))?;

        Ok(BasisEquityReply {
            code: ResultCode::Success,
            leg_1: Some(snapshot_1),
            leg_2: Some(snapshot_2),
            basis_bps: self.basis(&bound_1.instrument, &bound_2.instrument),
        })
    }

    async fn snapshot_of(&self, bound: &Bound) -> Result<engine::PositionSnapshot, ExecutionError> {
        engine::snapshot(
            bound.adapter.as_ref(),
            &bound.instrument,
            self.cache.as_ref(),
            self.config.quote_max_age(),
            self.config.default_leverage,
        )
        .await
    }

    fn basis(
        &self,
        near: &InstrumentSpec,
        far: &InstrumentSpec,
    ) -> Option<Decimal> {
        basis_bps(
            self.cache.as_ref(),
            &near.symbol,
            &far.symbol,
            self.config.basis_staleness(),
            Utc::now(),
        )
    }

    fn try_reload(&self) -> Result<ReloadReply, ExecutionError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ExecutionError::InvalidRequest("no store configured".to_string()))?;
        let registry = store
            .load_registry()
            .map_err(|e| ExecutionError::Store(format!("{:#}", e)))?;

        let reply = ReloadReply {
            code: ResultCode::Success,
            accounts: registry.account_count(),
            instruments: registry.instrument_count(),
        };
        self.registry.swap(registry);
        Ok(reply)
    }
}

#[async_trait]
impl Executor for ExecutionService {
    async fn order(&self, params: OrderParams) -> OrderResult {
        self.execute("Order", &params, self.try_order(&params)).await
    }

    async fn target_amount(&self, params: TargetAmountParams) -> OrderResult {
        self.execute("TargetAmount", &params, self.try_target_amount(&params))
            .await
    }

    async fn target_position(&self, params: TargetPositionParams) -> OrderResult {
        self.execute("TargetPosition", &params, self.try_target_position(&params))
            .await
    }

    async fn two_order(&self, params: TwoOrderParams) -> OrderResult {
        self.execute("TwoOrder", &params, self.try_two_order(&params))
            .await
    }

    async fn order_basis(&self, params: OrderBasisParams) -> OrderResult {
        self.execute("OrderBasis", &params, self.try_order_basis(&params))
            .await
    }

    async fn multiple_order(&self, params: MultipleOrderParams) -> OrderResult {
        self.execute("MultipleOrder", &params, self.try_multiple_order(&params))
            .await
    }

    async fn reconcile_two_order(&self, params: ReconcileTwoOrderParams) -> OrderResult {
        let call = self.try_reconcile(
            (&params.leg_a.account, &params.leg_a.instrument),
            (&params.leg_b.account, &params.leg_b.instrument),
            params.ratio_factor,
        );
        self.execute("ReconcileTwoOrder", &params, call).await
    }

    async fn reconcile_basis(&self, params: ReconcileBasisParams) -> OrderResult {
        let call = self.try_reconcile(
            (&params.account, &params.instrument_1),
            (&params.account, &params.instrument_2),
            params.ratio_factor,
        );
        self.execute("ReconcileBasis", &params, call).await
    }

    async fn check_position(&self, params: LegRef) -> PositionReply {
        match self.query("CheckPosition", self.read_position(&params)).await {
            Some(position) => PositionReply {
                code: ResultCode::Success,
                position: Some(position),
            },
            None => PositionReply::failure(),
        }
    }

    async fn check_basis_position(&self, params: BasisQuery) -> PairPositionReply {
        self.query("CheckBasisPosition", self.read_basis(&params))
            .await
            .unwrap_or_else(PairPositionReply::failure)
    }

    async fn check_two_order_position(&self, params: TwoOrderQuery) -> PairPositionReply {
        self.query("CheckTwoOrderPosition", self.read_two_positions(&params))
            .await
            .unwrap_or_else(PairPositionReply::failure)
    }

    async fn check_basis_position_equity(&self, params: BasisQuery) -> BasisEquityReply {
        self.query("CheckBasisPositionEquity", self.read_basis_equity(&params))
            .await
            .unwrap_or_else(BasisEquityReply::failure)
    }

    async fn check_equity(&self, params: LegRef) -> EquityReply {
        match self.query("CheckEquity", self.read_equity(&params)).await {
            Some(snapshot) => EquityReply {
                code: ResultCode::Success,
                snapshot: Some(snapshot),
            },
            None => EquityReply::failure(),
        }
    }

    async fn reload_registry(&self) -> ReloadReply {
        match self.try_reload() {
            Ok(reply) => reply,
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Registry reload failed");
                let current = self.registry.snapshot();
                ReloadReply {
                    code: ResultCode::Failure,
                    accounts: current.account_count(),
                    instruments: current.instrument_count(),
                }
            }
        }
    }
}
