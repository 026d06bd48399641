//! Paired and multi-instrument execution.
//!
//! Legs are sent concurrently and joined; nothing here is atomic across legs.
//! Imbalance left behind by a partial failure is detected by [`reconcile`], which
//! the caller runs until the pair reports balanced.

use super::convergence::{target_amount, ConvergenceOutcome};
use super::{lot_quantity, order_quantity, place_order};
use crate::config::ExecutionConfig;
use crate::error::ExecutionError;
use crate::exchange::{Direction, ExchangeAdapter, OrderAck};
use crate::registry::InstrumentSpec;
use crate::utils::decimal::approx_eq;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

/// One side of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegId {
    A,
    B,
}

impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegId::A => write!(f, "A"),
            LegId::B => write!(f, "B"),
        }
    }
}

/// Adapter and instrument of one leg.
#[derive(Clone, Copy)]
pub struct Leg<'a> {
    pub adapter: &'a dyn ExchangeAdapter,
    pub instrument: &'a InstrumentSpec,
}

/// Order to send on one leg.
#[derive(Clone, Copy)]
pub struct LegOrder<'a> {
    pub leg: Leg<'a>,
    pub direction: Direction,
    pub amount: Decimal,
}

/// Place both legs concurrently and wait for both.
///
/// Both sizes are rounded and checked first, so a leg that would be refused
/// locally fails the pair with no order sent. When only one leg fails at the
/// exchange the other stays on the book; the error is returned and the pair is
/// left for reconciliation.
pub async fn place_pair(
    a: LegOrder<'_>,
    b: LegOrder<'_>,
) -> Result<(OrderAck, OrderAck), ExecutionError> {
    let quantity_a = order_quantity(a.amount, a.leg.instrument)?;
    let quantity_b = order_quantity(b.amount, b.leg.instrument)?;

    let (result_a, result_b) = tokio::join!(
        place_order(a.leg.adapter, a.leg.instrument, a.direction, quantity_a),
        place_order(b.leg.adapter, b.leg.instrument, b.direction, quantity_b),
    );

    match (result_a, result_b) {
        (Ok(ack_a), Ok(ack_b)) => Ok((ack_a, ack_b)),
        (Ok(ack), Err(e)) => {
            error!(
                filled_leg = %LegId::A,
                order_id = %ack.order_id,
                failed_instrument = %b.leg.instrument.id,
                error = %e,
                "Leg B failed, pair is unbalanced"
            );
            Err(e)
        }
        (Err(e), Ok(ack)) => {
            error!(
                filled_leg = %LegId::B,
                order_id = %ack.order_id,
                failed_instrument = %a.leg.instrument.id,
                error = %e,
                "Leg A failed, pair is unbalanced"
            );
            Err(e)
        }
        (Err(e), Err(other)) => {
            error!(error_a = %e, error_b = %other, "Both legs failed");
            Err(e)
        }
    }
}

/// Converge several instruments to their targets concurrently.
///
/// Results are returned in input order.
pub async fn converge_all(
    legs: &[(Leg<'_>, Decimal)],
    config: &ExecutionConfig,
) -> Vec<Result<ConvergenceOutcome, ExecutionError>> {
    join_all(
        legs.iter()
            .map(|(leg, target)| target_amount(leg.adapter, leg.instrument, *target, config)),
    )
    .await
}

/// Held amounts of one leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegState {
    pub long_amount: Decimal,
    pub short_amount: Decimal,
}

/// Positions of both legs and the size ratio between them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegPair {
    pub leg_a: LegState,
    pub leg_b: LegState,
    pub ratio_factor: Decimal,
}

/// Order restoring proportionality between the legs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub leg: LegId,
    pub direction: Direction,
    pub amount: Decimal,
}

/// Corrective orders for a pair, empty when both invariants hold.
///
/// The pair is balanced when `long_a ≈ short_b * factor` and
/// `long_b * factor ≈ short_a` within `tolerance`. Each side of each invariant is
/// corrected by opening on the lagging side.
pub fn corrections(pair: &LegPair, tolerance: Decimal) -> Vec<Correction> {
    let f = pair.ratio_factor;
    let mut out = Vec::new();

    let long_a = pair.leg_a.long_amount;
    let short_b = pair.leg_b.short_amount * f;
    if !approx_eq(long_a, short_b, tolerance) {
        out.push(if long_a > short_b {
            Correction {
                leg: LegId::B,
                direction: Direction::OpenShort,
                amount: long_a - short_b,
            }
        } else {
            Correction {
                leg: LegId::A,
                direction: Direction::OpenLong,
                amount: short_b - long_a,
            }
        });
    }

    let long_b = pair.leg_b.long_amount * f;
    let short_a = pair.leg_a.short_amount;
    if !approx_eq(long_b, short_a, tolerance) {
        out.push(if long_b > short_a {
            Correction {
                leg: LegId::A,
                direction: Direction::OpenShort,
                amount: long_b - short_a,
            }
        } else {
            Correction {
                leg: LegId::B,
                direction: Direction::OpenLong,
                amount: short_a - long_b,
            }
        });
    }

    out
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub pair: LegPair,
    /// Corrections actually sent, after lot rounding
    pub placed: Vec<Correction>,
}

impl ReconcileOutcome {
    pub fn was_balanced(&self) -> bool {
        self.placed.is_empty()
    }
}

/// Re-read both legs and send whatever corrections the pair needs.
pub async fn reconcile(
    a: Leg<'_>,
    b: Leg<'_>,
    ratio_factor: Decimal,
    tolerance: Decimal,
) -> Result<ReconcileOutcome, ExecutionError> {
    if ratio_factor <= Decimal::ZERO {
        return Err(ExecutionError::InvalidRequest(format!(
            "ratio factor must be positive, got {}",
            ratio_factor
        )));
    }

    let (position_a, position_b) = tokio::try_join!(a.adapter.get_position(), b.adapter.get_position())?;
    for held in [position_b.long_amount, position_b.short_amount] {
        if held.checked_mul(ratio_factor).is_none() {
            return Err(ExecutionError::InvalidRequest(format!(
                "ratio factor {} overflows leg B holding {}",
                ratio_factor, held
            )));
        }
    }
    let pair = LegPair {
        leg_a: LegState {
            long_amount: position_a.long_amount,
            short_amount: position_a.short_amount,
        },
        leg_b: LegState {
            long_amount: position_b.long_amount,
            short_amount: position_b.short_amount,
        },
        ratio_factor,
    };

    let leg_of = |id: LegId| match id {
        LegId::A => a,
        LegId::B => b,
    };

    let mut placed = Vec::new();
    for c in corrections(&pair, tolerance) {
        let amount = lot_quantity(c.amount, leg_of(c.leg).instrument)?;
        if amount <= Decimal::ZERO {
            warn!(leg = %c.leg, raw = %c.amount, "Correction below lot size, skipped");
            continue;
        }
        placed.push(Correction { amount, ..c });
    }

    if placed.is_empty() {
        info!(
            instrument_a = %a.instrument.id,
            instrument_b = %b.instrument.id,
            "Legs balanced"
        );
        return Ok(ReconcileOutcome { pair, placed });
    }

    warn!(
        instrument_a = %a.instrument.id,
        instrument_b = %b.instrument.id,
        long_a = %pair.leg_a.long_amount,
        short_a = %pair.leg_a.short_amount,
        long_b = %pair.leg_b.long_amount,
        short_b = %pair.leg_b.short_amount,
        %ratio_factor,
        corrections = placed.len(),
        "Legs out of proportion, correcting"
    );

    let results = join_all(placed.iter().map(|c| {
        let leg = leg_of(c.leg);
        place_order(leg.adapter, leg.instrument, c.direction, c.amount)
    }))
    .await;

    for result in results {
        result?;
    }
    Ok(ReconcileOutcome { pair, placed })
}
