//! Binance USDⓈ-M futures REST client.

use crate::exchange::types::*;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, instrument};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Binance futures API client for one set of credentials.
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

impl BinanceClient {
    /// Create a client against production or testnet.
    pub fn new(api_key: &str, secret_key: &str, testnet: bool) -> Result<Self> {
        let base_url = if testnet {
            FUTURES_TESTNET_URL
        } else {
            FUTURES_BASE_URL
        };
        Self::with_base_url(api_key, secret_key, base_url)
    }

    /// Create a client against an arbitrary REST endpoint.
    pub fn with_base_url(api_key: &str, secret_key: &str, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .context("Invalid HMAC key")?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Send a signed request with the given parameters.
    async fn signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Response> {
        params.push(("timestamp".to_string(), Self::timestamp().to_string()));

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&query_string)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );

        self.http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", path))
    }

    /// Decode a response, surfacing Binance error payloads.
    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} failed with HTTP {}: {}", what, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    // ==================== Market Data (Public) ====================

    /// Get exchange server time.
    #[instrument(skip(self))]
    pub async fn get_server_time(&self) -> Result<ServerTime> {
        let url = format!("{}/fapi/v1/time", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch server time")?;

        Self::decode(response, "server time").await
    }

    /// Get best bid/ask for one symbol.
    #[instrument(skip(self))]
    pub async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker> {
        let url = format!(
            "{}/fapi/v1/ticker/bookTicker?symbol={}",
            self.base_url, symbol
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch book ticker")?;

        Self::decode(response, "book ticker").await
    }

    // ==================== Account (Authenticated) ====================

    /// Get account balance information.
    #[instrument(skip(self))]
    pub async fn get_account_balance(&self) -> Result<Vec<AccountBalance>> {
        let response = self
            .signed(Method::GET, "/fapi/v2/balance", Vec::new())
            .await
            .context("Failed to fetch account balance")?;

        Self::decode(response, "account balance").await
    }

    /// Get position risk entries for one symbol (one per position side).
    #[instrument(skip(self))]
    pub async fn get_position_risk(&self, symbol: &str) -> Result<Vec<PositionRisk>> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let response = self
            .signed(Method::GET, "/fapi/v2/positionRisk", params)
            .await
            .context("Failed to fetch positions")?;

        Self::decode(response, "position risk").await
    }

    // ==================== Orders (Authenticated) ====================

    /// Place a new futures order.
    #[instrument(skip(self))]
    pub async fn place_futures_order(&self, order: &NewOrder) -> Result<OrderResponse> {
        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), format!("{:?}", order.side).to_uppercase()),
            ("type".to_string(), format!("{:?}", order.order_type).to_uppercase()),
            ("newOrderRespType".to_string(), "RESULT".to_string()),
        ];

        if let Some(position_side) = &order.position_side {
            params.push((
                "positionSide".to_string(),
                format!("{:?}", position_side).to_uppercase(),
            ));
        }

        if let Some(qty) = &order.quantity {
            params.push(("quantity".to_string(), qty.normalize().to_string()));
        }

        if let Some(price) = &order.price {
            params.push(("price".to_string(), price.normalize().to_string()));
        }

        if let Some(tif) = &order.time_in_force {
            params.push(("timeInForce".to_string(), format!("{:?}", tif).to_uppercase()));
        }

        if let Some(client_id) = &order.new_client_order_id {
            params.push(("newClientOrderId".to_string(), client_id.clone()));
        }

        debug!("Placing futures order: {:?}", order);

        let response = self
            .signed(Method::POST, "/fapi/v1/order", params)
            .await
            .context("Failed to place futures order")?;

        Self::decode(response, "order").await
    }

    /// Cancel a futures order.
    #[instrument(skip(self))]
    pub async fn cancel_futures_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let response = self
            .signed(Method::DELETE, "/fapi/v1/order", params)
            .await
            .context("Failed to cancel futures order")?;

        Self::decode(response, "cancel").await
    }

    /// Query a futures order.
    #[instrument(skip(self))]
    pub async fn get_futures_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let response = self
            .signed(Method::GET, "/fapi/v1/order", params)
            .await
            .context("Failed to query futures order")?;

        Self::decode(response, "order query").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_signature_is_hex_sha256() {
        let client = BinanceClient::with_base_url("key", "secret", "http://localhost").unwrap();
        let sig = client.sign("symbol=BTCUSDT&timestamp=1").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_signed_request_carries_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .and(query_param("symbol", "BTCUSDT"))
            .and(header("X-MBX-APIKEY", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"symbol":"BTCUSDT","positionAmt":"0.5","entryPrice":"100","markPrice":"101","positionSide":"LONG"}]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = BinanceClient::with_base_url("key", "secret", &server.uri()).unwrap();
        let risks = client.get_position_risk("BTCUSDT").await.unwrap();

        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].position_amt, dec!(0.5));
        assert_eq!(risks[0].position_side, PositionSide::Long);
    }

    #[tokio::test]
    async fn test_error_payload_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"code":-2019,"msg":"Margin is insufficient."}"#),
            )
            .mount(&server)
            .await;

        let client = BinanceClient::with_base_url("key", "secret", &server.uri()).unwrap();
        let order = NewOrder {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            position_side: Some(PositionSide::Long),
            order_type: OrderType::Market,
            quantity: Some(dec!(1)),
            price: None,
            time_in_force: None,
            new_client_order_id: None,
        };

        let err = client.place_futures_order(&order).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Margin is insufficient"));
    }
}
