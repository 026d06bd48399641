//! Exchange integrations.
//!
//! ## Binance
//! USDⓈ-M futures in hedge mode:
//! - Signed REST client for positions, balances and orders
//! - bookTicker WebSocket feed for the ticker cache
//!
//! ## Paper
//! Simulated ledger filling at cached top of book.

mod binance;
mod client;
mod paper;
mod traits;
mod types;
mod websocket;

pub use binance::{BinanceAdapterFactory, BinanceFuturesAdapter};
pub use client::BinanceClient;
pub use paper::{PaperAdapter, PaperExchange};
#[cfg(test)]
pub use traits::MockExchangeAdapter;
pub use traits::{AdapterFactory, ExchangeAdapter, Venue};
pub use types::*;
pub use websocket::{parse_book_ticker, BookTickerStream};
