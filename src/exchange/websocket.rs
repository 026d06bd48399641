//! Binance bookTicker WebSocket feed populating the ticker cache.

use super::types::Tick;
use crate::cache::TickerCache;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const FUTURES_WS_URL: &str = "wss://fstream.binance.com";
const FUTURES_TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
struct BookTickerUpdate {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b", with = "rust_decimal::serde::str")]
    bid_price: Decimal,
    #[serde(rename = "B", with = "rust_decimal::serde::str")]
    bid_qty: Decimal,
    #[serde(rename = "a", with = "rust_decimal::serde::str")]
    ask_price: Decimal,
    #[serde(rename = "A", with = "rust_decimal::serde::str")]
    ask_qty: Decimal,
    /// Transaction time
    #[serde(rename = "T", default)]
    transaction_time: Option<i64>,
}

#[derive(Deserialize)]
struct StreamWrapper {
    data: BookTickerUpdate,
}

/// Parse a combined-stream bookTicker message.
pub fn parse_book_ticker(text: &str) -> Option<Tick> {
    let update = serde_json::from_str::<StreamWrapper>(text).ok()?.data;
    let timestamp = update
        .transaction_time
        .and_then(|t| Utc.timestamp_millis_opt(t).single())
        .unwrap_or_else(Utc::now);

    Some(Tick {
        symbol: update.symbol,
        bid_price: update.bid_price,
        bid_qty: update.bid_qty,
        ask_price: update.ask_price,
        ask_qty: update.ask_qty,
        timestamp,
    })
}

/// Streams best bid/ask for a fixed symbol set into a [`TickerCache`].
pub struct BookTickerStream {
    base_url: String,
    symbols: Vec<String>,
}

impl BookTickerStream {
    pub fn new(testnet: bool, symbols: Vec<String>) -> Self {
        let base_url = if testnet {
            FUTURES_TESTNET_WS_URL
        } else {
            FUTURES_WS_URL
        };
        Self {
            base_url: base_url.to_string(),
            symbols,
        }
    }

    fn url(&self) -> String {
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@bookTicker", s.to_lowercase()))
            .collect();
        format!("{}/stream?streams={}", self.base_url, streams.join("/"))
    }

    /// Run the feed in the background, reconnecting with backoff.
    pub fn spawn(self, cache: Arc<dyn TickerCache>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.symbols.is_empty() {
                info!("No symbols to stream, book ticker feed idle");
                return;
            }

            let mut delay = RECONNECT_DELAY;
            loop {
                match self.run_once(cache.as_ref()).await {
                    Ok(()) => {
                        info!("Book ticker stream ended, reconnecting");
                        delay = RECONNECT_DELAY;
                    }
                    Err(e) => {
                        error!(error = %format!("{:#}", e), "Book ticker stream failed");
                        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                    }
                }
                tokio::time::sleep(delay).await;
            }
        })
    }

    async fn run_once(&self, cache: &dyn TickerCache) -> Result<()> {
        let url = self.url();
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("Failed to connect to WebSocket")?;
        let (_write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            match msg.context("WebSocket read failed")? {
                Message::Text(text) => match parse_book_ticker(&text) {
                    Some(tick) => cache.update(tick),
                    None => debug!("Ignoring unparsed message"),
                },
                Message::Ping(_) => {
                    debug!("Received ping");
                    // Pong is handled automatically by tungstenite
                }
                Message::Close(_) => {
                    warn!("WebSocket closed by server");
                    return Ok(());
                }
                _ => {}
            }
        }

        Ok(())
    }
}
