//! Diff calculation between the held position and a signed target.

use crate::exchange::{Direction, ExchangeAdapter, OrderRequest, Position};
use crate::error::ExecutionError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{info, warn};

/// Remaining work for a target, as computed from one position read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diff {
    /// Signed distance to the target on the relevant side
    pub magnitude: Decimal,
    /// `None` when the position is within tolerance of the target
    pub direction: Option<Direction>,
}

impl Diff {
    fn done(magnitude: Decimal) -> Self {
        Self {
            magnitude,
            direction: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.direction.is_none()
    }

    /// Absolute order size needed to close the gap.
    pub fn amount(&self) -> Decimal {
        self.magnitude.abs()
    }
}

/// Map (long, short, target) to the next order.
///
/// A non-zero target is reached once the gap is within `epsilon_ratio` of the
/// largest of the three quantities. A flat target requires both sides to be zero.
pub fn diff(
    current_long: Decimal,
    current_short: Decimal,
    target: Decimal,
    epsilon_ratio: Decimal,
) -> Diff {
    if target > Decimal::ZERO {
        let magnitude = target - current_long;
        if within_epsilon(magnitude, current_long, current_short, target, epsilon_ratio) {
            return Diff::done(magnitude);
        }
        let direction = if magnitude > Decimal::ZERO {
            Direction::OpenLong
        } else {
            Direction::CloseLong
        };
        return Diff {
            magnitude,
            direction: Some(direction),
        };
    }

    if target < Decimal::ZERO {
        let wanted = target.abs();
        let magnitude = wanted - current_short;
        if within_epsilon(magnitude, current_long, current_short, wanted, epsilon_ratio) {
            return Diff::done(magnitude);
        }
        let direction = if magnitude > Decimal::ZERO {
            Direction::OpenShort
        } else {
            Direction::CloseShort
        };
        return Diff {
            magnitude,
            direction: Some(direction),
        };
    }

    let magnitude = current_long + current_short;
    let direction = if current_long > Decimal::ZERO {
        Some(Direction::CloseLong)
    } else if current_short > Decimal::ZERO {
        Some(Direction::CloseShort)
    } else {
        None
    };
    Diff {
        magnitude,
        direction,
    }
}

fn within_epsilon(
    magnitude: Decimal,
    long: Decimal,
    short: Decimal,
    target: Decimal,
    ratio: Decimal,
) -> bool {
    magnitude.abs() <= ratio * long.max(short).max(target)
}

/// Per-invocation bookkeeping for the convergence loop.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub diff: Decimal,
    pub direction: Option<Direction>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl ExecutionState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            diff: Decimal::ZERO,
            direction: None,
            started_at,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, diff: &Diff) {
        self.diff = diff.magnitude;
        self.direction = diff.direction;
    }

    /// Advance the clock from an exchange-stamped position read.
    pub fn observe(&mut self, observed_at: DateTime<Utc>) {
        self.elapsed = (observed_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
    }
}

/// Close a holding on the side opposite to the target.
///
/// Returns `true` when a closing order was placed. A flat target leaves both
/// sides to the diff calculator.
pub async fn fix_opposite_side(
    adapter: &dyn ExchangeAdapter,
    position: &Position,
    target: Decimal,
) -> Result<bool, ExecutionError> {
    let (direction, amount) = if target > Decimal::ZERO && position.short_amount > Decimal::ZERO {
        (Direction::CloseShort, position.short_amount)
    } else if target < Decimal::ZERO && position.long_amount > Decimal::ZERO {
        (Direction::CloseLong, position.long_amount)
    } else {
        return Ok(false);
    };

    warn!(
        %target,
        %direction,
        %amount,
        "Closing position held on the wrong side"
    );

    let ack = adapter
        .create_order(&OrderRequest::market(direction, amount))
        .await?;
    if ack.status.is_rejected() {
        return Err(ExecutionError::OrderRejected {
            direction: direction.to_string(),
            amount,
            reason: format!("status {:?}", ack.status),
        });
    }

    info!(order_id = %ack.order_id, %direction, %amount, "Opposite side closed");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockExchangeAdapter, OrderAck, OrderStatus};
    use rust_decimal_macros::dec;

    const EPS: Decimal = dec!(0.01);

    #[test]
    fn test_positive_target_opens_long() {
        let d = diff(dec!(2), dec!(0), dec!(5), EPS);
        assert_eq!(d.magnitude, dec!(3));
        assert_eq!(d.direction, Some(Direction::OpenLong));
        assert_eq!(d.amount(), dec!(3));
    }

    #[test]
    fn test_positive_target_closes_excess_long() {
        let d = diff(dec!(8), dec!(0), dec!(5), EPS);
        assert_eq!(d.magnitude, dec!(-3));
        assert_eq!(d.direction, Some(Direction::CloseLong));
    }

    #[test]
    fn test_epsilon_relative_to_largest_quantity() {
        // 0.01 * max(9.95, 0, 10) = 0.1 >= 0.05
        assert!(diff(dec!(9.95), dec!(0), dec!(10), EPS).is_done());
        // Boundary is inclusive
        assert!(diff(dec!(9.9), dec!(0), dec!(10), EPS).is_done());
        assert!(!diff(dec!(9.89), dec!(0), dec!(10), EPS).is_done());
        // A large opposite side widens the tolerance
        assert!(diff(dec!(9), dec!(100), dec!(10), EPS).is_done());
    }

    #[test]
    fn test_negative_target_mirrors_positive() {
        let cases = [
            (dec!(0), dec!(2), dec!(5)),
            (dec!(1), dec!(8), dec!(5)),
            (dec!(0), dec!(9.95), dec!(10)),
            (dec!(3), dec!(0), dec!(4)),
        ];
        for (long, short, target) in cases {
            let neg = diff(long, short, -target, EPS);
            let pos = diff(short, long, target, EPS);
            assert_eq!(neg.magnitude, pos.magnitude);
            assert_eq!(neg.is_done(), pos.is_done());
            let mirrored = pos.direction.map(|d| match d {
                Direction::OpenLong => Direction::OpenShort,
                Direction::CloseLong => Direction::CloseShort,
                other => other,
            });
            assert_eq!(neg.direction, mirrored);
        }
    }

    #[test]
    fn test_negative_target_ignores_long_for_magnitude() {
        let d = diff(dec!(2), dec!(0), dec!(-3), EPS);
        assert_eq!(d.magnitude, dec!(3));
        assert_eq!(d.direction, Some(Direction::OpenShort));
    }

    #[test]
    fn test_flat_target() {
        let d = diff(dec!(5), dec!(0), Decimal::ZERO, EPS);
        assert_eq!(d.magnitude, dec!(5));
        assert_eq!(d.direction, Some(Direction::CloseLong));

        let d = diff(dec!(0), dec!(2), Decimal::ZERO, EPS);
        assert_eq!(d.direction, Some(Direction::CloseShort));

        // Long is closed first when both sides are held
        let d = diff(dec!(1), dec!(2), Decimal::ZERO, EPS);
        assert_eq!(d.magnitude, dec!(3));
        assert_eq!(d.direction, Some(Direction::CloseLong));

        // No tolerance for a flat target
        assert!(!diff(dec!(0.0001), dec!(0), Decimal::ZERO, EPS).is_done());
        assert!(diff(dec!(0), dec!(0), Decimal::ZERO, EPS).is_done());
    }

    #[test]
    fn test_configurable_ratio() {
        assert!(!diff(dec!(9.5), dec!(0), dec!(10), EPS).is_done());
        assert!(diff(dec!(9.5), dec!(0), dec!(10), dec!(0.05)).is_done());
    }

    #[test]
    fn test_execution_state_elapsed() {
        let start = Utc::now();
        let mut state = ExecutionState::new(start);
        state.observe(start + chrono::Duration::seconds(7));
        assert_eq!(state.elapsed, Duration::from_secs(7));

        // Exchange clock going backwards never yields negative time
        state.observe(start - chrono::Duration::seconds(1));
        assert_eq!(state.elapsed, Duration::ZERO);

        state.record(&diff(dec!(0), dec!(0), dec!(1), EPS));
        assert_eq!(state.direction, Some(Direction::OpenLong));
        assert_eq!(state.diff, dec!(1));
    }

    fn filled(id: &str) -> OrderAck {
        OrderAck {
            order_id: id.to_string(),
            status: OrderStatus::Filled,
        }
    }

    #[tokio::test]
    async fn test_fix_closes_short_for_long_target() {
        let mut adapter = MockExchangeAdapter::new();
        adapter
            .expect_create_order()
            .withf(|o| o.direction == Direction::CloseShort && o.amount == dec!(4))
            .times(1)
            .returning(|_| Ok(filled("1")));

        let position = Position::new(dec!(0), dec!(4), Utc::now());
        assert!(fix_opposite_side(&adapter, &position, dec!(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fix_closes_long_for_short_target() {
        let mut adapter = MockExchangeAdapter::new();
        adapter
            .expect_create_order()
            .withf(|o| o.direction == Direction::CloseLong && o.amount == dec!(2))
            .times(1)
            .returning(|_| Ok(filled("1")));

        let position = Position::new(dec!(2), dec!(0), Utc::now());
        assert!(fix_opposite_side(&adapter, &position, dec!(-3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fix_noop_cases() {
        let mut adapter = MockExchangeAdapter::new();
        adapter.expect_create_order().never();

        let both = Position::new(dec!(1), dec!(1), Utc::now());
        assert!(!fix_opposite_side(&adapter, &both, Decimal::ZERO).await.unwrap());

        let same_side = Position::new(dec!(1), dec!(0), Utc::now());
        assert!(!fix_opposite_side(&adapter, &same_side, dec!(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fix_reports_rejection() {
        let mut adapter = MockExchangeAdapter::new();
        adapter.expect_create_order().returning(|_| {
            Ok(OrderAck {
                order_id: "9".to_string(),
                status: OrderStatus::Rejected,
            })
        });

        let position = Position::new(dec!(0), dec!(1), Utc::now());
        let err = fix_opposite_side(&adapter, &position, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::OrderRejected { .. }));
    }
}
