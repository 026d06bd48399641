//! Binance USDⓈ-M futures adapter (hedge mode).

use super::client::BinanceClient;
use super::traits::{AdapterFactory, ExchangeAdapter, Venue};
use super::types::*;
use crate::registry::{AccountSpec, InstrumentSpec};
use crate::utils::decimal::round_down_to_lot;
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

const MARGIN_ASSET: &str = "USDT";

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

/// Adapter bound to one Binance account and one futures symbol.
pub struct BinanceFuturesAdapter {
    client: BinanceClient,
    symbol: String,
    lot_size: Decimal,
}

impl BinanceFuturesAdapter {
    pub fn new(client: BinanceClient, instrument: &InstrumentSpec) -> Self {
        Self {
            client,
            symbol: instrument.symbol.clone(),
            lot_size: instrument.lot_size,
        }
    }

    fn parse_order_id(order_id: &str) -> Result<i64> {
        order_id
            .parse()
            .with_context(|| format!("Invalid Binance order id: {}", order_id))
    }
}

/// Split position risk rows into long and short holdings.
///
/// Hedge-mode rows carry LONG/SHORT sides; a one-way BOTH row is split by sign.
fn split_positions(risks: &[PositionRisk], symbol: &str) -> (Decimal, Decimal) {
    risks
        .iter()
        .filter(|r| r.symbol == symbol)
        .fold((Decimal::ZERO, Decimal::ZERO), |(long, short), r| {
            match r.position_side {
                PositionSide::Long => (long + r.position_amt.abs(), short),
                PositionSide::Short => (long, short + r.position_amt.abs()),
                PositionSide::Both if r.position_amt > Decimal::ZERO => {
                    (long + r.position_amt, short)
                }
                PositionSide::Both => (long, short + r.position_amt.abs()),
            }
        })
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn get_position(&self) -> Result<Position> {
        let (risks, time) = tokio::try_join!(
            self.client.get_position_risk(&self.symbol),
            self.client.get_server_time()
        )?;

        let (long_amount, short_amount) = split_positions(&risks, &self.symbol);
        debug!(symbol = %self.symbol, %long_amount, %short_amount, "Position read");

        Ok(Position::new(
            long_amount,
            short_amount,
            from_millis(time.server_time),
        ))
    }

    async fn get_balance(&self) -> Result<Balance> {
        let balances = self.client.get_account_balance().await?;
        let usdt = balances.iter().find(|b| b.asset == MARGIN_ASSET);

        Ok(Balance {
            equity: usdt.map(|b| b.margin_balance).unwrap_or(Decimal::ZERO),
            available: usdt.map(|b| b.available_balance).unwrap_or(Decimal::ZERO),
            observed_at: Utc::now(),
        })
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let quantity = round_down_to_lot(order.amount, self.lot_size)
            .with_context(|| format!("Order quantity {} overflows lot size {}", order.amount, self.lot_size))?;
        if quantity <= Decimal::ZERO {
            bail!(
                "Order quantity {} rounds to zero with lot size {}",
                order.amount,
                self.lot_size
            );
        }

        let new_order = NewOrder {
            symbol: self.symbol.clone(),
            side: order.direction.side(),
            position_side: Some(order.direction.position_side()),
            order_type: order.order_type,
            quantity: Some(quantity),
            price: order.price,
            time_in_force: match order.order_type {
                OrderType::Limit => Some(TimeInForce::Gtc),
                OrderType::Market => None,
            },
            new_client_order_id: order.client_order_id.clone(),
        };

        let response = self.client.place_futures_order(&new_order).await?;
        info!(
            symbol = %self.symbol,
            order_id = response.order_id,
            direction = %order.direction,
            %quantity,
            status = ?response.status,
            "Binance order accepted"
        );

        Ok(OrderAck {
            order_id: response.order_id.to_string(),
            status: response.status,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let id = Self::parse_order_id(order_id)?;
        self.client.cancel_futures_order(&self.symbol, id).await?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderFill> {
        let id = Self::parse_order_id(order_id)?;
        let response = self.client.get_futures_order(&self.symbol, id).await?;

        Ok(OrderFill {
            order_id: response.order_id.to_string(),
            status: response.status,
            filled_amount: response.executed_qty,
            avg_price: response.avg_price,
        })
    }

    async fn get_ticker(&self) -> Result<Tick> {
        let ticker = self.client.get_book_ticker(&self.symbol).await?;

        Ok(Tick {
            symbol: ticker.symbol,
            bid_price: ticker.bid_price,
            bid_qty: ticker.bid_qty,
            ask_price: ticker.ask_price,
            ask_qty: ticker.ask_qty,
            timestamp: ticker.time.map(from_millis).unwrap_or_else(Utc::now),
        })
    }
}

/// Builds Binance adapters from registry credentials.
#[derive(Debug, Clone)]
pub struct BinanceAdapterFactory {
    testnet: bool,
    base_url: Option<String>,
}

impl BinanceAdapterFactory {
    pub fn new(testnet: bool) -> Self {
        Self {
            testnet,
            base_url: None,
        }
    }

    /// Point every adapter at a custom REST endpoint.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            testnet: false,
            base_url: Some(base_url.to_string()),
        }
    }
}

impl AdapterFactory for BinanceAdapterFactory {
    fn create(
        &self,
        account: &AccountSpec,
        instrument: &InstrumentSpec,
    ) -> Result<Box<dyn ExchangeAdapter>> {
        ensure!(
            account.venue == Venue::Binance,
            "Account {} is on {}, not Binance",
            account.id,
            account.venue
        );
        ensure!(
            instrument.venue == Venue::Binance,
            "Instrument {} is on {}, not Binance",
            instrument.id,
            instrument.venue
        );

        let client = match &self.base_url {
            Some(url) => BinanceClient::with_base_url(&account.api_key, &account.secret_key, url)?,
            None => BinanceClient::new(&account.api_key, &account.secret_key, self.testnet)?,
        };
        Ok(Box::new(BinanceFuturesAdapter::new(client, instrument)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn account() -> AccountSpec {
        AccountSpec {
            id: "main".to_string(),
            venue: Venue::Binance,
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
        }
    }

    fn instrument() -> InstrumentSpec {
        InstrumentSpec {
            id: "btc-perp".to_string(),
            venue: Venue::Binance,
            symbol: "BTCUSDT".to_string(),
            contract_value: Decimal::ONE,
            lot_size: dec!(0.001),
            leverage: None,
        }
    }

    fn risk(amt: &str, side: &str) -> String {
        format!(
            r#"{{"symbol":"BTCUSDT","positionAmt":"{}","entryPrice":"0","markPrice":"0","positionSide":"{}"}}"#,
            amt, side
        )
    }

    #[test]
    fn test_split_positions_hedge_and_one_way() {
        let rows: Vec<PositionRisk> = serde_json::from_str(&format!(
            "[{},{}]",
            risk("1.5", "LONG"),
            risk("-0.7", "SHORT")
        ))
        .unwrap();
        assert_eq!(split_positions(&rows, "BTCUSDT"), (dec!(1.5), dec!(0.7)));

        let rows: Vec<PositionRisk> =
            serde_json::from_str(&format!("[{}]", risk("-2", "BOTH"))).unwrap();
        assert_eq!(split_positions(&rows, "BTCUSDT"), (dec!(0), dec!(2)));
        assert_eq!(split_positions(&rows, "ETHUSDT"), (dec!(0), dec!(0)));
    }

    #[test]
    fn test_factory_rejects_other_venues() {
        let factory = BinanceAdapterFactory::new(true);
        let mut paper = account();
        paper.venue = Venue::Paper;
        assert!(factory.create(&paper, &instrument()).is_err());
        assert!(factory.create(&account(), &instrument()).is_ok());
    }

    #[tokio::test]
    async fn test_position_stamped_with_server_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "[{},{}]",
                risk("3", "LONG"),
                risk("0", "SHORT")
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/time"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"serverTime":1700000000000}"#),
            )
            .mount(&server)
            .await;

        let adapter = BinanceAdapterFactory::with_base_url(&server.uri())
            .create(&account(), &instrument())
            .unwrap();
        let position = adapter.get_position().await.unwrap();

        assert_eq!(position.long_amount, dec!(3));
        assert_eq!(position.short_amount, dec!(0));
        assert_eq!(position.observed_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_close_short_maps_to_buy_short() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .and(query_param("side", "BUY"))
            .and(query_param("positionSide", "SHORT"))
            .and(query_param("type", "MARKET"))
            .and(query_param("quantity", "0.25"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"orderId":42,"symbol":"BTCUSDT","status":"FILLED","clientOrderId":"x",
                    "price":"0","avgPrice":"100.5","origQty":"0.25","executedQty":"0.25",
                    "side":"BUY","type":"MARKET","updateTime":1700000000000}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = BinanceAdapterFactory::with_base_url(&server.uri())
            .create(&account(), &instrument())
            .unwrap();
        let ack = adapter
            .create_order(&OrderRequest::market(Direction::CloseShort, dec!(0.2509)))
            .await
            .unwrap();

        assert_eq!(ack.order_id, "42");
        assert_eq!(ack.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_balance_uses_usdt_margin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"asset":"BNB","walletBalance":"1","unrealizedProfit":"0","marginBalance":"1","availableBalance":"1"},
                    {"asset":"USDT","walletBalance":"1000","unrealizedProfit":"20","marginBalance":"1020","availableBalance":"800"}]"#,
            ))
            .mount(&server)
            .await;

        let adapter = BinanceAdapterFactory::with_base_url(&server.uri())
            .create(&account(), &instrument())
            .unwrap();
        let balance = adapter.get_balance().await.unwrap();

        assert_eq!(balance.equity, dec!(1020));
        assert_eq!(balance.available, dec!(800));
    }
}
