//! Capacity-percentage target loop with slippage cooldown.

use super::slippage::SlippageGuard;
use super::{contract_capacity, lot_quantity, place_order, quote};
use crate::cache::TickerCache;
use crate::config::ExecutionConfig;
use crate::error::ExecutionError;
use crate::exchange::{Direction, ExchangeAdapter};
use crate::registry::InstrumentSpec;
use crate::utils::decimal::round_up_to_lot;
use rust_decimal::Decimal;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Terminal state of one `target_position` run.
#[derive(Debug, Clone, PartialEq)]
pub enum PercentOutcome {
    Finished {
        orders_placed: u32,
        target: Decimal,
    },
    /// Budget ran out with the side holding `current`
    Exhausted {
        orders_placed: u32,
        target: Decimal,
        current: Decimal,
    },
}

impl PercentOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, PercentOutcome::Finished { .. })
    }

    pub fn orders_placed(&self) -> u32 {
        match self {
            PercentOutcome::Finished { orders_placed, .. }
            | PercentOutcome::Exhausted { orders_placed, .. } => *orders_placed,
        }
    }
}

/// Side holding to aim for.
///
/// Opens target `percent` of the total capacity (held plus openable). Closes
/// remove `percent` of the current holding.
pub fn percent_target(
    direction: Direction,
    held: Decimal,
    openable: Decimal,
    percent: Decimal,
    lot_size: Decimal,
) -> Result<Decimal, ExecutionError> {
    let target = if direction.is_open() {
        held.checked_add(openable)
            .and_then(|total| total.checked_mul(percent))
            .and_then(|raw| round_up_to_lot(raw, lot_size))
    } else {
        held.checked_mul(percent)
            .and_then(|raw| round_up_to_lot(raw, lot_size))
            .map(|closing| (held - closing).max(Decimal::ZERO))
    };
    target.ok_or_else(|| {
        ExecutionError::InvalidRequest(format!(
            "{} of {} held plus {} openable overflows lot size {}",
            percent, held, openable, lot_size
        ))
    })
}

fn is_finished(direction: Direction, current: Decimal, target: Decimal) -> bool {
    if direction.is_open() {
        current >= target
    } else {
        current <= target
    }
}

/// Move one side of the position to `percent` of capacity within the trading budget.
///
/// Each order is capped at the displayed top-of-book size. After a fill drifts
/// adversely from the start price by more than the slippage limit, no orders are
/// sent until the quoted price comes back within the limit.
pub async fn target_position(
    adapter: &dyn ExchangeAdapter,
    instrument: &InstrumentSpec,
    cache: &dyn TickerCache,
    direction: Direction,
    percent: Decimal,
    config: &ExecutionConfig,
) -> Result<PercentOutcome, ExecutionError> {
    if percent < Decimal::ZERO || percent > Decimal::ONE {
        return Err(ExecutionError::InvalidRequest(format!(
            "target percent {} outside [0, 1]",
            percent
        )));
    }

    let budget = config.max_trading_duration();
    let clock = Instant::now();
    let max_age = config.quote_max_age();
    let lot = instrument.lot_size;

    let (position, balance) = tokio::try_join!(adapter.get_position(), adapter.get_balance())?;
    let start = quote(adapter, cache, &instrument.symbol, max_age).await?;

    let held = position.side_amount(direction);
    let openable = contract_capacity(
        balance.available,
        instrument.leverage_or(config.default_leverage),
        start.mid(),
        instrument.contract_value,
        lot,
    )?;
    let target = percent_target(direction, held, openable, percent, lot)?;

    let mut guard = SlippageGuard::new(direction, start.price_for(direction), config.max_slippage);
    let mut current = held;
    let mut finished = is_finished(direction, current, target);
    let mut orders_placed = 0u32;

    info!(
        instrument = %instrument.id,
        %direction,
        %percent,
        %held,
        %openable,
        %target,
        start_price = %guard.start_price(),
        start_size = %start.size_for(direction),
        "Moving position to capacity percentage"
    );

    while !finished && clock.elapsed() < budget {
        let remaining_budget = budget.saturating_sub(clock.elapsed());

        if guard.is_cooling_down() {
            sleep(config.cooldown().min(remaining_budget)).await;
            let tick = quote(adapter, cache, &instrument.symbol, max_age).await?;
            guard.check(tick.price_for(direction));
            continue;
        }

        let remaining = (target - current).abs();
        if lot_quantity(remaining, instrument)? <= Decimal::ZERO {
            finished = true;
            break;
        }

        let tick = quote(adapter, cache, &instrument.symbol, max_age).await?;
        let order_amount = lot_quantity(remaining.min(tick.size_for(direction)), instrument)?;
        if order_amount <= Decimal::ZERO {
            debug!(instrument = %instrument.id, "No displayed liquidity, waiting");
            sleep(config.requery_delay().min(remaining_budget)).await;
            continue;
        }

        let ack = place_order(adapter, instrument, direction, order_amount).await?;
        orders_placed += 1;

        sleep(config.requery_delay().min(remaining_budget)).await;
        let fill = adapter.get_order(&ack.order_id).await?;
        let fill_price = if fill.avg_price > Decimal::ZERO {
            fill.avg_price
        } else {
            tick.price_for(direction)
        };

        let position = adapter.get_position().await?;
        current = position.side_amount(direction);
        finished = is_finished(direction, current, target);

        debug!(
            instrument = %instrument.id,
            %order_amount,
            filled = %fill.filled_amount,
            %fill_price,
            %current,
            finished,
            "Percentage step done"
        );

        if !finished {
            guard.check(fill_price);
        }
    }

    let elapsed_ms = clock.elapsed().as_millis() as u64;
    if finished {
        info!(
            instrument = %instrument.id,
            %target,
            %current,
            orders_placed,
            elapsed_ms,
            "Percentage target reached"
        );
        Ok(PercentOutcome::Finished {
            orders_placed,
            target,
        })
    } else {
        warn!(
            instrument = %instrument.id,
            %target,
            %current,
            orders_placed,
            elapsed_ms,
            cooling_down = guard.is_cooling_down(),
            "Trading budget exhausted before reaching percentage target"
        );
        Ok(PercentOutcome::Exhausted {
            orders_placed,
            target,
            current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryTickerCache;
    use crate::engine::testing::{instrument, tick};
    use crate::exchange::{
        Balance, MockExchangeAdapter, OrderAck, OrderFill, OrderStatus, Position, Tick,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_percent_target_open_and_close() {
        // (2 held + 8 openable) * 0.55 = 5.5
        assert_eq!(
            percent_target(Direction::OpenLong, dec!(2), dec!(8), dec!(0.55), dec!(1)).unwrap(),
            dec!(6)
        );
        assert_eq!(
            percent_target(Direction::OpenShort, dec!(0), dec!(10), dec!(0.5), dec!(0.001)).unwrap(),
            dec!(5)
        );
        // Close 30% of 10 -> hold 7
        assert_eq!(
            percent_target(Direction::CloseLong, dec!(10), dec!(99), dec!(0.3), dec!(1)).unwrap(),
            dec!(7)
        );
        assert_eq!(
            percent_target(Direction::CloseShort, dec!(4), dec!(0), dec!(1), dec!(0.001)).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_percent_target_overflow_is_invalid() {
        let err = percent_target(Direction::OpenLong, Decimal::MAX, Decimal::MAX, dec!(0.5), dec!(1))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidRequest(_)));
    }

    /// Adapter whose position follows the orders it receives.
    ///
    /// When `after_fill` is set, the cache is refreshed with that tick once an
    /// order has been placed.
    fn filling_adapter(
        fill_prices: Vec<Decimal>,
        after_fill: Option<(Arc<InMemoryTickerCache>, Tick)>,
    ) -> (MockExchangeAdapter, Arc<Mutex<Vec<Decimal>>>) {
        let held = Arc::new(Mutex::new(Decimal::ZERO));
        let orders = Arc::new(Mutex::new(Vec::new()));
        let prices = Arc::new(Mutex::new(fill_prices));

        let mut adapter = MockExchangeAdapter::new();
        let h = Arc::clone(&held);
        adapter
            .expect_get_position()
            .returning(move || Ok(Position::new(*h.lock().unwrap(), dec!(0), Utc::now())));
        adapter.expect_get_balance().returning(|| {
            Ok(Balance {
                equity: dec!(1000),
                available: dec!(1000),
                observed_at: Utc::now(),
            })
        });
        let h = Arc::clone(&held);
        let o = Arc::clone(&orders);
        adapter.expect_create_order().returning(move |order| {
            *h.lock().unwrap() += order.amount;
            o.lock().unwrap().push(order.amount);
            if let Some((cache, tick)) = &after_fill {
                cache.update(tick.clone());
            }
            Ok(OrderAck {
                order_id: o.lock().unwrap().len().to_string(),
                status: OrderStatus::Filled,
            })
        });
        adapter.expect_get_order().returning(move |id| {
            let mut prices = prices.lock().unwrap();
            let avg_price = if prices.is_empty() {
                Decimal::ZERO
            } else {
                prices.remove(0)
            };
            Ok(OrderFill {
                order_id: id.to_string(),
                status: OrderStatus::Filled,
                filled_amount: Decimal::ZERO,
                avg_price,
            })
        });
        (adapter, orders)
    }

    #[tokio::test(start_paused = true)]
    async fn test_orders_capped_at_top_of_book() {
        let cache = InMemoryTickerCache::new();
        // Mid 100, capacity 1000 * 5 / 100 = 50, half of it = 25, 10 shown per level
        cache.update(tick("BTCUSDT", dec!(99.99), dec!(100.01), dec!(10)));

        let (adapter, orders) = filling_adapter(vec![], None);
        let outcome = target_position(
            &adapter,
            &instrument("btc", "BTCUSDT"),
            &cache,
            Direction::OpenLong,
            dec!(0.5),
            &ExecutionConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PercentOutcome::Finished {
                orders_placed: 3,
                target: dec!(25),
            }
        );
        assert_eq!(*orders.lock().unwrap(), vec![dec!(10), dec!(10), dec!(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adverse_fill_blocks_until_budget_exhausted() {
        let cache = Arc::new(InMemoryTickerCache::new());
        cache.update(tick("BTCUSDT", dec!(99.99), dec!(100.01), dec!(10)));

        // First fill 1% above the start ask and the quoted ask stays there
        let moved = tick("BTCUSDT", dec!(101), dec!(101.02), dec!(10));
        let (adapter, orders) =
            filling_adapter(vec![dec!(101.02)], Some((Arc::clone(&cache), moved)));
        let config = ExecutionConfig::default();
        let started = Instant::now();

        let outcome = target_position(
            &adapter,
            &instrument("btc", "BTCUSDT"),
            cache.as_ref(),
            Direction::OpenLong,
            dec!(0.5),
            &config,
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PercentOutcome::Exhausted {
                orders_placed: 1,
                target: dec!(25),
                current: dec!(10),
            }
        );
        assert_eq!(orders.lock().unwrap().len(), 1);
        assert!(started.elapsed() <= config.max_trading_duration() + config.requery_delay());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_clears_when_price_returns() {
        let cache = Arc::new(InMemoryTickerCache::new());
        let start = tick("BTCUSDT", dec!(99.99), dec!(100.01), dec!(10));
        cache.update(start.clone());

        // Adverse first fill; the quote is already back at the start price
        let (adapter, orders) =
            filling_adapter(vec![dec!(101.02)], Some((Arc::clone(&cache), start)));

        let outcome = target_position(
            &adapter,
            &instrument("btc", "BTCUSDT"),
            cache.as_ref(),
            Direction::OpenLong,
            dec!(0.5),
            &ExecutionConfig::default(),
        )
        .await
        .unwrap();

        assert!(outcome.is_finished());
        assert_eq!(*orders.lock().unwrap(), vec![dec!(10), dec!(10), dec!(5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_finished_places_nothing() {
        let cache = InMemoryTickerCache::new();
        cache.update(tick("BTCUSDT", dec!(99.99), dec!(100.01), dec!(10)));

        let mut adapter = MockExchangeAdapter::new();
        adapter
            .expect_get_position()
            .returning(|| Ok(Position::new(dec!(0), dec!(0), Utc::now())));
        adapter.expect_get_balance().returning(|| {
            Ok(Balance {
                equity: dec!(0),
                available: dec!(0),
                observed_at: Utc::now(),
            })
        });
        adapter.expect_create_order().never();

        let outcome = target_position(
            &adapter,
            &instrument("btc", "BTCUSDT"),
            &cache,
            Direction::CloseLong,
            dec!(1),
            &ExecutionConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PercentOutcome::Finished {
                orders_placed: 0,
                target: Decimal::ZERO,
            }
        );
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_percent() {
        let cache = InMemoryTickerCache::new();
        let adapter = MockExchangeAdapter::new();

        let err = target_position(
            &adapter,
            &instrument("btc", "BTCUSDT"),
            &cache,
            Direction::OpenLong,
            dec!(1.5),
            &ExecutionConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidRequest(_)));
    }
}
