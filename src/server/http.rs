//! HTTP/JSON front for the executor.
//!
//! One POST route per procedure; the body is the request message and the reply
//! is always HTTP 200 with a result code. Bodies that do not decode are answered
//! with code 0 and never reach the executor.

use crate::executor::*;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

type Shared = State<Arc<dyn Executor>>;
type Body<P> = Result<Json<P>, JsonRejection>;

/// Create the router with every RPC route.
pub fn create_router(executor: Arc<dyn Executor>) -> Router {
    Router::new()
        .route(routes::HEALTH, get(health_check))
        .route(routes::ORDER, post(order))
        .route(routes::TARGET_AMOUNT, post(target_amount))
        .route(routes::TARGET_POSITION, post(target_position))
        .route(routes::TWO_ORDER, post(two_order))
        .route(routes::ORDER_BASIS, post(order_basis))
        .route(routes::MULTIPLE_ORDER, post(multiple_order))
        .route(routes::RECONCILE_TWO_ORDER, post(reconcile_two_order))
        .route(routes::RECONCILE_BASIS, post(reconcile_basis))
        .route(routes::CHECK_POSITION, post(check_position))
        .route(routes::CHECK_BASIS_POSITION, post(check_basis_position))
        .route(routes::CHECK_TWO_ORDER_POSITION, post(check_two_order_position))
        .route(
            routes::CHECK_BASIS_POSITION_EQUITY,
            post(check_basis_position_equity),
        )
        .route(routes::CHECK_EQUITY, post(check_equity))
        .route(routes::RELOAD_REGISTRY, post(reload_registry))
        .with_state(executor)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Run `call` on a decoded body, or answer with the failure reply.
async fn dispatch<P, R, F, Fut>(route: &'static str, body: Body<P>, call: F) -> Json<R>
where
    R: FailureReply,
    F: FnOnce(P) -> Fut,
    Fut: Future<Output = R>,
{
    match body {
        Ok(Json(params)) => Json(call(params).await),
        Err(rejection) => {
            warn!(
                route,
                status = %rejection.status(),
                error = %rejection.body_text(),
                "Request body refused"
            );
            Json(R::failure())
        }
    }
}

async fn order(State(ex): Shared, body: Body<OrderParams>) -> Json<OrderResult> {
    dispatch(routes::ORDER, body, |p| async move { ex.order(p).await }).await
}

async fn target_amount(State(ex): Shared, body: Body<TargetAmountParams>) -> Json<OrderResult> {
    dispatch(routes::TARGET_AMOUNT, body, |p| async move {
        ex.target_amount(p).await
    })
    .await
}

async fn target_position(
    State(ex): Shared,
    body: Body<TargetPositionParams>,
) -> Json<OrderResult> {
    dispatch(routes::TARGET_POSITION, body, |p| async move {
        ex.target_position(p).await
    })
    .await
}

async fn two_order(State(ex): Shared, body: Body<TwoOrderParams>) -> Json<OrderResult> {
    dispatch(routes::TWO_ORDER, body, |p| async move { ex.two_order(p).await }).await
}

async fn order_basis(State(ex): Shared, body: Body<OrderBasisParams>) -> Json<OrderResult> {
    dispatch(routes::ORDER_BASIS, body, |p| async move {
        ex.order_basis(p).await
    })
    .await
}

async fn multiple_order(
    State(ex): Shared,
    body: Body<MultipleOrderParams>,
) -> Json<OrderResult> {
    dispatch(routes::MULTIPLE_ORDER, body, |p| async move {
        ex.multiple_order(p).await
    })
    .await
}

async fn reconcile_two_order(
    State(ex): Shared,
    body: Body<ReconcileTwoOrderParams>,
) -> Json<OrderResult> {
    dispatch(routes::RECONCILE_TWO_ORDER, body, |p| async move {
        ex.reconcile_two_order(p).await
    })
    .await
}

async fn reconcile_basis(
    State(ex): Shared,
    body: Body<ReconcileBasisParams>,
) -> Json<OrderResult> {
    dispatch(routes::RECONCILE_BASIS, body, |p| async move {
        ex.reconcile_basis(p).await
    })
    .await
}

async fn check_position(State(ex): Shared, body: Body<LegRef>) -> Json<PositionReply> {
    dispatch(routes::CHECK_POSITION, body, |p| async move {
        ex.check_position(p).await
    })
    .await
}

async fn check_basis_position(
    State(ex): Shared,
    body: Body<BasisQuery>,
) -> Json<PairPositionReply> {
    dispatch(routes::CHECK_BASIS_POSITION, body, |p| async move {
        ex.check_basis_position(p).await
    })
    .await
}

async fn check_two_order_position(
    State(ex): Shared,
    body: Body<TwoOrderQuery>,
) -> Json<PairPositionReply> {
    dispatch(routes::CHECK_TWO_ORDER_POSITION, body, |p| async move {
        ex.check_two_order_position(p).await
    })
    .await
}

async fn check_basis_position_equity(
    State(ex): Shared,
    body: Body<BasisQuery>,
) -> Json<BasisEquityReply> {
    dispatch(routes::CHECK_BASIS_POSITION_EQUITY, body, |p| async move {
        ex.check_basis_position_equity(p).await
    })
    .await
}

async fn check_equity(State(ex): Shared, body: Body<LegRef>) -> Json<EquityReply> {
    dispatch(routes::CHECK_EQUITY, body, |p| async move {
        ex.check_equity(p).await
    })
    .await
}

async fn reload_registry(State(ex): Shared) -> Json<ReloadReply> {
    Json(ex.reload_registry().await)
}

/// Bind `addr` and serve until Ctrl+C.
pub async fn serve(addr: &str, executor: Arc<dyn Executor>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind RPC server to {}", addr))?;
    serve_on(listener, executor, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve_on<S>(listener: TcpListener, executor: Arc<dyn Executor>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr().context("Listener has no local address")?;
    info!(addr = %local, "RPC server listening");

    axum::serve(listener, create_router(executor))
        .with_graceful_shutdown(shutdown)
        .await
        .context("RPC server failed")?;

    info!("RPC server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, draining in-flight calls"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
