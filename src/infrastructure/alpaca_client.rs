use crate::domain::entities::portfolio::{Account, OpenOrder, OrderSide, PortfolioSnapshot, Position};
use crate::domain::repositories::brokerage_client::{
    BrokerageClient, BrokerageError, BrokerageResult, OrderAck, OrderRequest,
};
use crate::secrets::BrokerCredentials;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Alpaca API endpoints
const ALPACA_LIVE_BASE: &str = "https://api.alpaca.markets";
const ALPACA_PAPER_BASE: &str = "https://paper-api.alpaca.markets";
const ALPACA_DATA_BASE: &str = "https://data.alpaca.markets";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Alpaca network configuration
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub trading_base: String,
    pub data_base: String,
}

impl AlpacaConfig {
    pub fn new(paper_trading: bool) -> Self {
        Self {
            trading_base: if paper_trading {
                ALPACA_PAPER_BASE.to_string()
            } else {
                ALPACA_LIVE_BASE.to_string()
            },
            data_base: ALPACA_DATA_BASE.to_string(),
        }
    }
}

/// Alpaca account information; numbers arrive as strings
#[derive(Debug, Serialize, Deserialize)]
pub struct AlpacaAccount {
    pub cash: String,
    pub portfolio_value: String,
    pub buying_power: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlpacaPosition {
    pub symbol: String,
    pub qty: String,
    pub avg_entry_price: String,
    pub current_price: String,
    pub market_value: String,
    pub unrealized_pl: String,
    /// Fraction, e.g. "0.0523" for 5.23%
    pub unrealized_plpc: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlpacaOrder {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub qty: Option<String>,
    pub notional: Option<String>,
    pub limit_price: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Order placement body
#[derive(Debug, Serialize)]
pub struct AlpacaOrderRequest {
    pub symbol: String,
    pub side: String,
    pub r#type: String,
    pub time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<String>,
    pub client_order_id: String,
}

#[derive(Debug, Deserialize)]
struct LatestTradeResponse {
    trade: Option<LatestTrade>,
}

#[derive(Debug, Deserialize)]
struct LatestTrade {
    #[serde(rename = "p")]
    price: f64,
}

fn parse_number(field: &str, raw: &str) -> BrokerageResult<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| BrokerageError::FetchFailed(format!("Invalid {}: '{}'", field, raw)))
}

fn parse_optional(field: &str, raw: &Option<String>) -> BrokerageResult<Option<f64>> {
    raw.as_deref().map(|v| parse_number(field, v)).transpose()
}

fn parse_side(raw: &str) -> BrokerageResult<OrderSide> {
    match raw {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(BrokerageError::FetchFailed(format!("Unknown order side: {}", other))),
    }
}

impl AlpacaPosition {
    pub fn into_position(self) -> BrokerageResult<Position> {
        Ok(Position {
            qty: parse_number("qty", &self.qty)?,
            avg_entry_price: parse_number("avg_entry_price", &self.avg_entry_price)?,
            current_price: parse_number("current_price", &self.current_price)?,
            market_value: parse_number("market_value", &self.market_value)?,
            unrealized_pl: parse_number("unrealized_pl", &self.unrealized_pl)?,
            unrealized_pl_percent: parse_number("unrealized_plpc", &self.unrealized_plpc)? * 100.0,
            symbol: self.symbol,
        })
    }
}

impl AlpacaOrder {
    pub fn into_open_order(self) -> BrokerageResult<OpenOrder> {
        Ok(OpenOrder {
            side: parse_side(&self.side)?,
            qty: parse_optional("qty", &self.qty)?,
            notional: parse_optional("notional", &self.notional)?,
            limit_price: parse_optional("limit_price", &self.limit_price)?,
            submitted_at: self.submitted_at,
            symbol: self.symbol,
        })
    }
}

impl AlpacaOrderRequest {
    pub fn from_request(order: &OrderRequest) -> BrokerageResult<Self> {
        if order.notional.is_none() && order.qty.is_none() {
            return Err(BrokerageError::OrderRejected(
                "Order needs either a notional amount or a share count".to_string(),
            ));
        }
        Ok(Self {
            symbol: order.symbol.to_ascii_uppercase(),
            side: order.side.to_string(),
            r#type: "market".to_string(),
            time_in_force: "day".to_string(),
            notional: order.notional.map(|n| format!("{:.2}", n)),
            qty: order.qty.map(|q| format!("{}", q)),
            client_order_id: order.client_order_id.clone(),
        })
    }
}

/// Map a non-success response onto the brokerage error taxonomy
async fn error_from_response(context: &str, response: Response) -> BrokerageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{} failed: {} - {}", context, status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerageError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => BrokerageError::RateLimited(message),
        StatusCode::UNPROCESSABLE_ENTITY => BrokerageError::OrderRejected(message),
        _ => BrokerageError::FetchFailed(message),
    }
}

/// Alpaca client for API interactions
pub struct AlpacaClient {
    client: Client,
    config: AlpacaConfig,
    credentials: BrokerCredentials,
}

impl AlpacaClient {
    pub fn new(credentials: BrokerCredentials) -> BrokerageResult<Self> {
        let config = AlpacaConfig::new(credentials.paper_trading);
        Self::with_config(credentials, config)
    }

    pub fn with_config(credentials: BrokerCredentials, config: AlpacaConfig) -> BrokerageResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tradepilot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BrokerageError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", self.credentials.api_key.as_str())
            .header("APCA-API-SECRET-KEY", self.credentials.secret_key.as_str())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, context: &str) -> BrokerageResult<T> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| BrokerageError::Network(format!("{} request failed: {}", context, e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(context, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| BrokerageError::FetchFailed(format!("Failed to parse {} response: {}", context, e)))
    }

    pub async fn get_account(&self) -> BrokerageResult<AlpacaAccount> {
        let url = format!("{}/v2/account", self.config.trading_base);
        self.get_json(&url, "Account").await
    }

    pub async fn get_positions(&self) -> BrokerageResult<Vec<AlpacaPosition>> {
        let url = format!("{}/v2/positions", self.config.trading_base);
        self.get_json(&url, "Positions").await
    }

    pub async fn get_open_orders(&self) -> BrokerageResult<Vec<AlpacaOrder>> {
        let url = format!("{}/v2/orders?status=open", self.config.trading_base);
        self.get_json(&url, "Open orders").await
    }
}

#[async_trait]
impl BrokerageClient for AlpacaClient {
    fn name(&self) -> &str {
        "alpaca"
    }

    async fn fetch_portfolio(&self) -> BrokerageResult<PortfolioSnapshot> {
        let account = self.get_account().await?;
        let positions = self
            .get_positions()
            .await?
            .into_iter()
            .map(AlpacaPosition::into_position)
            .collect::<BrokerageResult<Vec<_>>>()?;

        // Open orders only refine reserved cash; losing them must not fail the decision
        let open_orders = match self.get_open_orders().await {
            Ok(orders) => orders
                .into_iter()
                .filter_map(|o| match o.into_open_order() {
                    Ok(order) => Some(order),
                    Err(e) => {
                        warn!("Skipping unreadable open order: {}", e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                warn!("Open orders unavailable, assuming none: {}", e);
                Vec::new()
            }
        };

        let account = Account::with_reservations(
            parse_number("cash", &account.cash)?,
            parse_number("portfolio_value", &account.portfolio_value)?,
            parse_number("buying_power", &account.buying_power)?,
            &open_orders,
        );

        debug!(
            "Fetched portfolio: cash={:.2} value={:.2} positions={} open_orders={}",
            account.cash,
            account.portfolio_value,
            positions.len(),
            open_orders.len()
        );

        Ok(PortfolioSnapshot {
            account,
            positions,
            open_orders,
            fetched_at: Utc::now(),
        })
    }

    async fn latest_price(&self, symbol: &str) -> BrokerageResult<Option<f64>> {
        let url = format!(
            "{}/v2/stocks/{}/trades/latest",
            self.config.data_base,
            symbol.to_ascii_uppercase()
        );
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BrokerageError::Network(format!("Latest trade request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response("Latest trade", response).await);
        }

        let latest: LatestTradeResponse = response
            .json()
            .await
            .map_err(|e| BrokerageError::FetchFailed(format!("Failed to parse latest trade: {}", e)))?;
        Ok(latest.trade.map(|t| t.price).filter(|p| p.is_finite() && *p > 0.0))
    }

    async fn submit_order(&self, order: &OrderRequest) -> BrokerageResult<OrderAck> {
        let body = AlpacaOrderRequest::from_request(order)?;
        let url = format!("{}/v2/orders", self.config.trading_base);

        info!(
            "Submitting {} order for {} (client_order_id={})",
            body.side, body.symbol, body.client_order_id
        );

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerageError::Network(format!("Order request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response("Order placement", response).await);
        }

        let placed: AlpacaOrder = response
            .json()
            .await
            .map_err(|e| BrokerageError::FetchFailed(format!("Failed to parse order response: {}", e)))?;

        info!("✓ Order accepted by Alpaca: {}", placed.id);
        Ok(OrderAck {
            success: true,
            order_id: placed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_conversion_scales_percent() {
        let raw: AlpacaPosition = serde_json::from_value(serde_json::json!({
            "symbol": "AAPL",
            "qty": "10",
            "avg_entry_price": "150.00",
            "current_price": "165.00",
            "market_value": "1650.00",
            "unrealized_pl": "150.00",
            "unrealized_plpc": "0.1"
        }))
        .unwrap();

        let position = raw.into_position().unwrap();
        assert_eq!(position.qty, 10.0);
        assert!((position.unrealized_pl_percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_number_is_fetch_failure() {
        let err = parse_number("cash", "n/a").unwrap_err();
        assert!(matches!(err, BrokerageError::FetchFailed(_)));
    }

    #[test]
    fn test_open_order_conversion() {
        let raw: AlpacaOrder = serde_json::from_value(serde_json::json!({
            "id": "o-1",
            "symbol": "MSFT",
            "side": "buy",
            "qty": "2",
            "notional": null,
            "limit_price": "300",
            "submitted_at": "2024-05-01T14:30:00Z"
        }))
        .unwrap();

        let order = raw.into_open_order().unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.reserved_amount(), 600.0);
    }

    #[test]
    fn test_order_request_body() {
        let request = OrderRequest {
            symbol: "aapl".into(),
            side: OrderSide::Buy,
            notional: Some(3000.0),
            qty: None,
            client_order_id: "tp-abc".into(),
        };
        let body = serde_json::to_value(AlpacaOrderRequest::from_request(&request).unwrap()).unwrap();

        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["side"], "buy");
        assert_eq!(body["type"], "market");
        assert_eq!(body["notional"], "3000.00");
        assert!(body.get("qty").is_none());
    }

    #[test]
    fn test_order_request_needs_size() {
        let request = OrderRequest {
            symbol: "AAPL".into(),
            side: OrderSide::Sell,
            notional: None,
            qty: None,
            client_order_id: "tp-abc".into(),
        };
        assert!(AlpacaOrderRequest::from_request(&request).is_err());
    }

    #[test]
    fn test_paper_and_live_endpoints() {
        assert_eq!(AlpacaConfig::new(true).trading_base, ALPACA_PAPER_BASE);
        assert_eq!(AlpacaConfig::new(false).trading_base, ALPACA_LIVE_BASE);
    }
}
