//! Position-targeting execution engine.
//!
//! Every routine here works against an [`ExchangeAdapter`] bound to one
//! (account, instrument) pair and re-reads the exchange ledger instead of
//! trusting local state:
//! - `diff`: pure target diff and opposite-side correction
//! - `convergence`: absolute target loop
//! - `percent`: capacity-percentage loop guarded by `slippage`
//! - `multi_leg`: concurrent paired orders and leg reconciliation

pub mod convergence;
pub mod diff;
pub mod multi_leg;
pub mod percent;
pub mod slippage;

pub use convergence::{target_amount, ConvergenceOutcome};
pub use diff::{diff, fix_opposite_side, Diff, ExecutionState};
pub use multi_leg::{
    converge_all, corrections, place_pair, reconcile, Correction, Leg, LegId, LegOrder, LegPair,
    LegState, ReconcileOutcome,
};
pub use percent::{percent_target, target_position, PercentOutcome};
pub use slippage::SlippageGuard;

use crate::cache::{fresh_tick, TickerCache};
use crate::error::ExecutionError;
use crate::exchange::{Direction, ExchangeAdapter, OrderAck, OrderRequest, Tick};
use crate::registry::InstrumentSpec;
use crate::utils::decimal::round_down_to_lot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// `amount` rounded down to the instrument's lot.
///
/// Amounts too large to express in lots are rejected as invalid.
pub fn lot_quantity(amount: Decimal, instrument: &InstrumentSpec) -> Result<Decimal, ExecutionError> {
    round_down_to_lot(amount.abs(), instrument.lot_size).ok_or_else(|| {
        ExecutionError::InvalidRequest(format!(
            "amount {} overflows lot size {} for {}",
            amount, instrument.lot_size, instrument.id
        ))
    })
}

/// Sendable order size: at least one lot.
pub fn order_quantity(amount: Decimal, instrument: &InstrumentSpec) -> Result<Decimal, ExecutionError> {
    let quantity = lot_quantity(amount, instrument)?;
    if quantity <= Decimal::ZERO {
        return Err(ExecutionError::InvalidRequest(format!(
            "order amount {} below lot size {} for {}",
            amount, instrument.lot_size, instrument.id
        )));
    }
    Ok(quantity)
}

/// Submit a market order sized to the instrument's lot.
pub async fn place_order(
    adapter: &dyn ExchangeAdapter,
    instrument: &InstrumentSpec,
    direction: Direction,
    amount: Decimal,
) -> Result<OrderAck, ExecutionError> {
    let quantity = order_quantity(amount, instrument)?;
    let ack = adapter
        .create_order(&OrderRequest::market(direction, quantity))
        .await?;
    if ack.status.is_rejected() {
        return Err(ExecutionError::OrderRejected {
            direction: direction.to_string(),
            amount: quantity,
            reason: format!("status {:?}", ack.status),
        });
    }

    info!(
        instrument = %instrument.id,
        order_id = %ack.order_id,
        %direction,
        %quantity,
        "Order placed"
    );
    Ok(ack)
}

/// Top of book from the cache when fresh, otherwise from the adapter.
pub async fn quote(
    adapter: &dyn ExchangeAdapter,
    cache: &dyn TickerCache,
    symbol: &str,
    max_age: Duration,
) -> Result<Tick, ExecutionError> {
    if let Some(tick) = fresh_tick(cache, symbol, max_age, Utc::now()) {
        return Ok(tick);
    }

    debug!(%symbol, "No fresh cached tick, querying exchange");
    let tick = adapter.get_ticker().await?;
    if tick.bid_price <= Decimal::ZERO || tick.ask_price <= Decimal::ZERO {
        return Err(ExecutionError::MissingQuote(symbol.to_string()));
    }
    cache.update(tick.clone());
    Ok(tick)
}

/// Contracts openable with `available` margin at `price`.
///
/// Zero without margin or without a price.
pub fn contract_capacity(
    available: Decimal,
    leverage: u8,
    price: Decimal,
    contract_value: Decimal,
    lot_size: Decimal,
) -> Result<Decimal, ExecutionError> {
    if available <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let notional = price.checked_mul(contract_value).ok_or_else(|| {
        ExecutionError::InvalidRequest(format!(
            "contract notional overflows at price {} and contract value {}",
            price, contract_value
        ))
    })?;
    if notional == Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    available
        .checked_mul(Decimal::from(leverage))
        .and_then(|margin| margin.checked_div(notional))
        .and_then(|raw| round_down_to_lot(raw, lot_size))
        .ok_or_else(|| {
            ExecutionError::InvalidRequest(format!(
                "capacity overflows for {} available at {}x and notional {}",
                available, leverage, notional
            ))
        })
}

/// Read-only view of one (account, instrument) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub long_amount: Decimal,
    pub short_amount: Decimal,
    pub equity: Decimal,
    pub available: Decimal,
    pub capacity: Decimal,
    pub mid_price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Position, balance and capacity for one pair.
pub async fn snapshot(
    adapter: &dyn ExchangeAdapter,
    instrument: &InstrumentSpec,
    cache: &dyn TickerCache,
    max_age: Duration,
    default_leverage: u8,
) -> Result<PositionSnapshot, ExecutionError> {
    let (position, balance) = tokio::try_join!(adapter.get_position(), adapter.get_balance())?;
    let tick = quote(adapter, cache, &instrument.symbol, max_age).await?;
    let mid_price = tick.mid();

    Ok(PositionSnapshot {
        long_amount: position.long_amount,
        short_amount: position.short_amount,
        equity: balance.equity,
        available: balance.available,
        capacity: contract_capacity(
            balance.available,
            instrument.leverage_or(default_leverage),
            mid_price,
            instrument.contract_value,
            instrument.lot_size,
        )?,
        mid_price,
        observed_at: position.observed_at,
    })
}
