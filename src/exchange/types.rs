//! Type definitions for positions, orders, quotes, and Binance API responses.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==================== Engine Types ====================

/// Trade direction on a hedge-mode instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl Direction {
    /// Order side sent to the exchange.
    pub fn side(&self) -> OrderSide {
        match self {
            Direction::OpenLong | Direction::CloseShort => OrderSide::Buy,
            Direction::OpenShort | Direction::CloseLong => OrderSide::Sell,
        }
    }

    /// Hedge-mode position side the order acts on.
    pub fn position_side(&self) -> PositionSide {
        match self {
            Direction::OpenLong | Direction::CloseLong => PositionSide::Long,
            Direction::OpenShort | Direction::CloseShort => PositionSide::Short,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Direction::OpenLong | Direction::OpenShort)
    }

    pub fn is_buy(&self) -> bool {
        self.side() == OrderSide::Buy
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::OpenLong => "OPEN_LONG",
            Direction::OpenShort => "OPEN_SHORT",
            Direction::CloseLong => "CLOSE_LONG",
            Direction::CloseShort => "CLOSE_SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Long and short holdings of one instrument as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub long_amount: Decimal,
    pub short_amount: Decimal,
    /// Exchange-reported time of the read
    pub observed_at: DateTime<Utc>,
}

impl Position {
    pub fn new(long_amount: Decimal, short_amount: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            long_amount,
            short_amount,
            observed_at,
        }
    }

    pub fn flat(observed_at: DateTime<Utc>) -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO, observed_at)
    }

    /// Amount held on the side a direction acts on.
    pub fn side_amount(&self, direction: Direction) -> Decimal {
        match direction.position_side() {
            PositionSide::Short => self.short_amount,
            _ => self.long_amount,
        }
    }
}

/// Account equity and free margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub equity: Decimal,
    pub available: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Top of book for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn mid(&self) -> Decimal {
        (self.bid_price + self.ask_price) / Decimal::TWO
    }

    /// Price a market order in this direction would trade against.
    pub fn price_for(&self, direction: Direction) -> Decimal {
        if direction.is_buy() {
            self.ask_price
        } else {
            self.bid_price
        }
    }

    /// Displayed size on the side a market order in this direction consumes.
    pub fn size_for(&self, direction: Direction) -> Decimal {
        if direction.is_buy() {
            self.ask_qty
        } else {
            self.bid_qty
        }
    }
}

/// Order submitted through an exchange adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub direction: Direction,
    pub amount: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(direction: Direction, amount: Decimal) -> Self {
        Self {
            direction,
            amount,
            order_type: OrderType::Market,
            price: None,
            client_order_id: None,
        }
    }
}

/// Acknowledgement returned when an order is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Execution state of a previously placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_amount: Decimal,
    pub avg_price: Decimal,
}

// ==================== Binance Types ====================

/// Account balance information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unrealized_profit: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub margin_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub available_balance: Decimal,
}

/// Futures position information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    pub position_side: PositionSide,
}

/// Best bid/ask prices and quantities.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicker {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask_qty: Decimal,
    #[serde(default)]
    pub time: Option<i64>,
}

/// Exchange clock.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// Position side (long, short, or both for one-way mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc, // Good Till Cancel
    Ioc, // Immediate or Cancel
    Fok, // Fill or Kill
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

impl OrderStatus {
    pub fn is_rejected(&self) -> bool {
        matches!(self, OrderStatus::Rejected | OrderStatus::Expired)
    }
}

/// New order request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: Option<PositionSide>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub new_client_order_id: Option<String>,
}

/// Order response from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub update_time: i64,
}
