//! Adverse price drift detection for the percentage-target loop.

use crate::exchange::Direction;
use crate::utils::decimal::safe_div;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Tracks drift of execution prices away from the price seen at the start.
#[derive(Debug, Clone)]
pub struct SlippageGuard {
    direction: Direction,
    start_price: Decimal,
    max_slippage: Decimal,
    cooling_down: bool,
}

impl SlippageGuard {
    pub fn new(direction: Direction, start_price: Decimal, max_slippage: Decimal) -> Self {
        Self {
            direction,
            start_price,
            max_slippage,
            cooling_down: false,
        }
    }

    pub fn start_price(&self) -> Decimal {
        self.start_price
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooling_down
    }

    /// Signed adverse move of `price` relative to the start price.
    ///
    /// Positive when buying higher or selling lower than the start price.
    pub fn drift(&self, price: Decimal) -> Decimal {
        let change = safe_div(price - self.start_price, self.start_price);
        if self.direction.is_buy() {
            change
        } else {
            -change
        }
    }

    /// Update the cooldown flag from a fill or quote price; returns the new flag.
    pub fn check(&mut self, price: Decimal) -> bool {
        let drift = self.drift(price);
        let exceeded = drift > self.max_slippage;

        if exceeded && !self.cooling_down {
            warn!(
                direction = %self.direction,
                start_price = %self.start_price,
                %price,
                %drift,
                "Slippage limit exceeded, entering cooldown"
            );
        } else if !exceeded && self.cooling_down {
            debug!(%price, %drift, "Price back within slippage limit");
        }

        self.cooling_down = exceeded;
        exceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_side_adverse_move_triggers() {
        let mut guard = SlippageGuard::new(Direction::OpenLong, dec!(10000), dec!(0.0005));

        assert!(!guard.check(dec!(10005))); // exactly 0.05%
        assert!(guard.check(dec!(10006)));
        assert!(guard.is_cooling_down());
    }

    #[test]
    fn test_sell_side_adverse_move_triggers() {
        let mut guard = SlippageGuard::new(Direction::CloseLong, dec!(10000), dec!(0.0005));

        assert!(guard.check(dec!(9990)));
        assert!(!guard.check(dec!(9999)));
        assert!(!guard.is_cooling_down());
    }

    #[test]
    fn test_favorable_move_never_triggers() {
        let mut buy = SlippageGuard::new(Direction::CloseShort, dec!(100), dec!(0.0005));
        assert!(!buy.check(dec!(50)));

        let mut sell = SlippageGuard::new(Direction::OpenShort, dec!(100), dec!(0.0005));
        assert!(!sell.check(dec!(200)));
    }

    #[test]
    fn test_cooldown_clears_only_within_limit() {
        let mut guard = SlippageGuard::new(Direction::OpenLong, dec!(100), dec!(0.001));

        assert!(guard.check(dec!(100.5)));
        assert!(guard.check(dec!(100.2)));
        assert!(!guard.check(dec!(100.1)));
    }

    #[test]
    fn test_drift_sign() {
        let guard = SlippageGuard::new(Direction::OpenShort, dec!(100), dec!(0.01));
        assert_eq!(guard.drift(dec!(99)), dec!(0.01));
        assert_eq!(guard.drift(dec!(101)), dec!(-0.01));
        assert_eq!(guard.start_price(), dec!(100));
    }
}
