//! Absolute-target convergence loop.

use super::diff::{diff, fix_opposite_side, ExecutionState};
use super::{lot_quantity, place_order};
use crate::config::ExecutionConfig;
use crate::error::ExecutionError;
use crate::exchange::{ExchangeAdapter, Position};
use crate::registry::InstrumentSpec;
use rust_decimal::Decimal;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Terminal state of one `target_amount` run.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceOutcome {
    /// Position reached the target
    Converged { orders_placed: u32 },
    /// Budget ran out with `remaining` still to trade
    TimedOut { orders_placed: u32, remaining: Decimal },
}

impl ConvergenceOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceOutcome::Converged { .. })
    }

    pub fn orders_placed(&self) -> u32 {
        match self {
            ConvergenceOutcome::Converged { orders_placed }
            | ConvergenceOutcome::TimedOut { orders_placed, .. } => *orders_placed,
        }
    }
}

/// Drive the net position of one instrument to `target`.
///
/// Positive targets are net long, negative net short, zero flat. Elapsed time is
/// measured on the exchange clock from the first position read, bounded by the
/// local clock in case the exchange timestamp stalls. Adapter errors end the run.
pub async fn target_amount(
    adapter: &dyn ExchangeAdapter,
    instrument: &InstrumentSpec,
    target: Decimal,
    config: &ExecutionConfig,
) -> Result<ConvergenceOutcome, ExecutionError> {
    // Nothing is sent for a target that cannot be expressed in lots.
    lot_quantity(target, instrument)?;

    let budget = config.max_trading_duration();
    let clock = Instant::now();

    let mut position = adapter.get_position().await?;
    let mut state = ExecutionState::new(position.observed_at);
    let mut orders_placed = 0u32;

    info!(
        instrument = %instrument.id,
        %target,
        long = %position.long_amount,
        short = %position.short_amount,
        "Converging to target amount"
    );

    if fix_opposite_side(adapter, &position, target).await? {
        orders_placed += 1;
        position = requery(adapter, config, &mut state).await?;
    }

    loop {
        let d = diff(
            position.long_amount,
            position.short_amount,
            target,
            config.diff_epsilon_ratio,
        );
        state.record(&d);

        let Some(direction) = d.direction else {
            info!(
                instrument = %instrument.id,
                %target,
                orders_placed,
                elapsed_ms = state.elapsed.as_millis() as u64,
                "Target reached"
            );
            return Ok(ConvergenceOutcome::Converged { orders_placed });
        };

        if state.elapsed.max(clock.elapsed()) >= budget {
            warn!(
                instrument = %instrument.id,
                %target,
                remaining = %d.amount(),
                %direction,
                orders_placed,
                "Trading budget exhausted before reaching target"
            );
            return Ok(ConvergenceOutcome::TimedOut {
                orders_placed,
                remaining: d.amount(),
            });
        }

        if lot_quantity(d.amount(), instrument)? <= Decimal::ZERO {
            warn!(
                instrument = %instrument.id,
                remaining = %d.amount(),
                lot_size = %instrument.lot_size,
                "Remaining diff below lot size, treating as reached"
            );
            return Ok(ConvergenceOutcome::Converged { orders_placed });
        }

        place_order(adapter, instrument, direction, d.amount()).await?;
        orders_placed += 1;
        position = requery(adapter, config, &mut state).await?;
    }
}

async fn requery(
    adapter: &dyn ExchangeAdapter,
    config: &ExecutionConfig,
    state: &mut ExecutionState,
) -> Result<Position, ExecutionError> {
    sleep(config.requery_delay()).await;
    let position = adapter.get_position().await?;
    state.observe(position.observed_at);
    debug!(
        long = %position.long_amount,
        short = %position.short_amount,
        elapsed_ms = state.elapsed.as_millis() as u64,
        "Position re-read"
    );
    Ok(position)
}
