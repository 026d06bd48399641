//! Executor interface handed to strategies.
//!
//! Strategies receive an `Arc<dyn Executor>` at construction: either the
//! in-process [`ExecutionService`](crate::server::ExecutionService) or a
//! [`RemoteExecutor`](crate::server::RemoteExecutor) talking to a running
//! service. Every method is a failure boundary and reports through a result
//! code instead of an error.

pub mod messages;

pub use messages::*;

use async_trait::async_trait;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Single market order.
    async fn order(&self, params: OrderParams) -> OrderResult;

    /// Converge to a signed absolute amount (1 converged, 0 otherwise).
    async fn target_amount(&self, params: TargetAmountParams) -> OrderResult;

    /// Move one side to a fraction of capacity (1 finished, 2 budget exhausted, 0 failed).
    async fn target_position(&self, params: TargetPositionParams) -> OrderResult;

    /// Two legs on any accounts, placed concurrently.
    async fn two_order(&self, params: TwoOrderParams) -> OrderResult;

    /// Two instruments of one account, placed concurrently.
    async fn order_basis(&self, params: OrderBasisParams) -> OrderResult;

    /// Several absolute targets on one account; success only if all converge.
    async fn multiple_order(&self, params: MultipleOrderParams) -> OrderResult;

    async fn reconcile_two_order(&self, params: ReconcileTwoOrderParams) -> OrderResult;

    async fn reconcile_basis(&self, params: ReconcileBasisParams) -> OrderResult;

    async fn check_position(&self, params: LegRef) -> PositionReply;

    async fn check_basis_position(&self, params: BasisQuery) -> PairPositionReply;

    async fn check_two_order_position(&self, params: TwoOrderQuery) -> PairPositionReply;

    async fn check_basis_position_equity(&self, params: BasisQuery) -> BasisEquityReply;

    async fn check_equity(&self, params: LegRef) -> EquityReply;

    /// Rebuild the registry snapshot from the store.
    async fn reload_registry(&self) -> ReloadReply;
}
