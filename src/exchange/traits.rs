//! Venue-agnostic exchange adapter traits.
//!
//! The execution engine only talks to exchanges through [`ExchangeAdapter`], an
//! object bound to a single (account, instrument) pair. Adapters are built per
//! call by an [`AdapterFactory`] and are never shared between concurrent calls.

use super::types::{Balance, OrderAck, OrderFill, OrderRequest, Position, Tick};
use crate::registry::{AccountSpec, InstrumentSpec};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    /// Simulated exchange filling at cached top of book
    Paper,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Binance => write!(f, "Binance"),
            Venue::Paper => write!(f, "Paper"),
        }
    }
}

impl FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "paper" => Ok(Venue::Paper),
            other => Err(anyhow!("Unknown venue: {}", other)),
        }
    }
}

impl Venue {
    /// Lowercase identifier used in config and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Paper => "paper",
        }
    }

    /// Short code for display (2-3 chars).
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::Binance => "BN",
            Venue::Paper => "PPR",
        }
    }
}

/// Exchange capabilities for one (account, instrument) pair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// Current long/short holdings, stamped with exchange time.
    async fn get_position(&self) -> Result<Position>;

    /// Account equity and available margin.
    async fn get_balance(&self) -> Result<Balance>;

    /// Submit an order.
    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Cancel a resting order.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Fill state of a previously submitted order.
    async fn get_order(&self, order_id: &str) -> Result<OrderFill>;

    /// Top of book.
    async fn get_ticker(&self) -> Result<Tick>;
}

/// Builds adapters from registry entries.
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        account: &AccountSpec,
        instrument: &InstrumentSpec,
    ) -> Result<Box<dyn ExchangeAdapter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_display() {
        assert_eq!(Venue::Binance.to_string(), "Binance");
        assert_eq!(Venue::Paper.short_code(), "PPR");
    }

    #[test]
    fn test_venue_wire_format() {
        let venue: Venue = serde_json::from_str("\"binance\"").unwrap();
        assert_eq!(venue, Venue::Binance);
        assert_eq!("Paper".parse::<Venue>().unwrap(), Venue::Paper);
        assert_eq!(Venue::Paper.as_str(), "paper");
        assert!("kraken".parse::<Venue>().is_err());
    }
}
