//! Latest-tick cache shared by all RPC calls.
//!
//! The engine only reads from the cache; ticks are written by the book ticker
//! stream (live and paper mode) or directly by tests.

use crate::exchange::Tick;
use crate::utils::decimal::to_basis_points;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Read/write access to the most recent top of book per symbol.
pub trait TickerCache: Send + Sync {
    fn latest(&self, symbol: &str) -> Option<Tick>;
    fn update(&self, tick: Tick);
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct InMemoryTickerCache {
    ticks: RwLock<HashMap<String, Tick>>,
}

impl InMemoryTickerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.ticks.read() {
            Ok(ticks) => ticks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TickerCache for InMemoryTickerCache {
    fn latest(&self, symbol: &str) -> Option<Tick> {
        match self.ticks.read() {
            Ok(ticks) => ticks.get(symbol).cloned(),
            Err(poisoned) => poisoned.into_inner().get(symbol).cloned(),
        }
    }

    fn update(&self, tick: Tick) {
        let mut ticks = match self.ticks.write() {
            Ok(ticks) => ticks,
            Err(poisoned) => poisoned.into_inner(),
        };
        ticks.insert(tick.symbol.clone(), tick);
    }
}

/// Age of a tick relative to `now`; ticks stamped in the future count as fresh.
pub fn tick_age(tick: &Tick, now: DateTime<Utc>) -> Duration {
    (now - tick.timestamp).to_std().unwrap_or(Duration::ZERO)
}

/// Cached tick for `symbol` if it is younger than `max_age`.
pub fn fresh_tick(
    cache: &dyn TickerCache,
    symbol: &str,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Option<Tick> {
    cache
        .latest(symbol)
        .filter(|tick| tick_age(tick, now) <= max_age)
}

/// Spread of `far` over `near` in basis points, using mid prices.
///
/// Returns `None` when either tick is missing, when the near mid is zero, or when
/// the two tick ages sum to more than `staleness`.
pub fn basis_bps(
    cache: &dyn TickerCache,
    near: &str,
    far: &str,
    staleness: Duration,
    now: DateTime<Utc>,
) -> Option<Decimal> {
    let near_tick = cache.latest(near)?;
    let far_tick = cache.latest(far)?;

    if tick_age(&near_tick, now) + tick_age(&far_tick, now) > staleness {
        return None;
    }

    let near_mid = near_tick.mid();
    if near_mid == Decimal::ZERO {
        return None;
    }

    Some(to_basis_points((far_tick.mid() - near_mid) / near_mid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, bid: Decimal, ask: Decimal, age_secs: i64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            bid_price: bid,
            bid_qty: dec!(1),
            ask_price: ask,
            ask_qty: dec!(1),
            timestamp: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_update_replaces_previous_tick() {
        let cache = InMemoryTickerCache::new();
        cache.update(tick("BTCUSDT", dec!(100), dec!(101), 0));
        cache.update(tick("BTCUSDT", dec!(102), dec!(103), 0));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.latest("BTCUSDT").unwrap().bid_price, dec!(102));
        assert!(cache.latest("ETHUSDT").is_none());
    }

    #[test]
    fn test_fresh_tick_filters_old_data() {
        let cache = InMemoryTickerCache::new();
        cache.update(tick("BTCUSDT", dec!(100), dec!(101), 30));

        let now = Utc::now();
        assert!(fresh_tick(&cache, "BTCUSDT", Duration::from_secs(10), now).is_none());
        assert!(fresh_tick(&cache, "BTCUSDT", Duration::from_secs(60), now).is_some());
    }

    #[test]
    fn test_basis_in_basis_points() {
        let cache = InMemoryTickerCache::new();
        cache.update(tick("BTCUSDT", dec!(99), dec!(101), 0)); // mid 100
        cache.update(tick("BTCUSDT_250328", dec!(100.9), dec!(101.1), 0)); // mid 101

        let basis = basis_bps(
            &cache,
            "BTCUSDT",
            "BTCUSDT_250328",
            Duration::from_secs(200),
            Utc::now(),
        );
        assert_eq!(basis, Some(dec!(100)));
    }

    #[test]
    fn test_basis_rejects_stale_pair() {
        let cache = InMemoryTickerCache::new();
        // Each tick alone is younger than the threshold, their sum is not
        cache.update(tick("A", dec!(99), dec!(101), 120));
        cache.update(tick("B", dec!(99), dec!(101), 120));

        let now = Utc::now();
        assert!(basis_bps(&cache, "A", "B", Duration::from_secs(200), now).is_none());
        assert!(basis_bps(&cache, "A", "B", Duration::from_secs(300), now).is_some());
    }
}
