// src/exchange/mexc.rs
use crate::config::ExchangeConfig;
use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::{BuyFill, Candlestick, PriceHistory, SellFill};
use crate::exchange::client::{with_timeout, ExchangeGateway};
use async_trait::async_trait;
use binance_spot_connector_rust::{
    http::{
        error::ClientError,
        request::{Request, RequestBuilder},
        Credentials, Method,
    },
    hyper::{BinanceHttpClient, Error as ConnectorError},
    trade::{self, order::Side},
};
use hyper::client::HttpConnector;
use hyper_tls::HttpsConnector;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// MEXC spot client. MEXC serves the Binance-compatible `/api/v3` routes,
/// so the Binance connector is pointed at the MEXC base URL.
pub struct MexcGateway {
    client: BinanceHttpClient<HttpsConnector<HttpConnector>>,
    has_credentials: bool,
    request_timeout_secs: u64,
}

impl MexcGateway {
    pub fn new(config: &ExchangeConfig) -> Self {
        let mut client = BinanceHttpClient::with_url(&config.base_url);
        let has_credentials = !config.api_key.is_empty() && !config.api_secret.is_empty();
        if has_credentials {
            client = client.credentials(Credentials::from_hmac(
                config.api_key.clone(),
                config.api_secret.clone(),
            ));
        }

        Self {
            client,
            has_credentials,
            request_timeout_secs: config.request_timeout_secs,
        }
    }

    async fn send_raw(&self, request: impl Into<Request>) -> ExchangeResult<String> {
        let request = request.into();
        with_timeout(self.request_timeout_secs, async {
            let response = self
                .client
                .send(request)
                .await
                .map_err(transport_error)?;
            response.into_body_str().await.map_err(transport_error)
        })
        .await
    }

    fn require_credentials(&self) -> ExchangeResult<()> {
        if self.has_credentials {
            Ok(())
        } else {
            Err(ExchangeError::Authentication(
                "API key and secret are required to place orders".to_string(),
            ))
        }
    }
}

/// Sort connector failures into network, credential and API errors.
fn transport_error(err: ConnectorError) -> ExchangeError {
    match err {
        ConnectorError::Send(e) => ExchangeError::Connection(e.to_string()),
        ConnectorError::Parse(e) => ExchangeError::Request(e.to_string()),
        ConnectorError::InvalidApiSecret => {
            ExchangeError::Authentication("API secret has an invalid format".to_string())
        }
        ConnectorError::Client(ClientError::Structured(e)) => {
            let message = format!("HTTP {}: {} (code {})", e.status_code, e.data.message, e.data.code);
            if is_auth_status(e.status_code) {
                ExchangeError::Authentication(message)
            } else {
                ExchangeError::Api(message)
            }
        }
        ConnectorError::Client(ClientError::Raw(e)) => {
            let message = format!("HTTP {}: {}", e.status_code, e.data);
            if is_auth_status(e.status_code) {
                ExchangeError::Authentication(message)
            } else {
                ExchangeError::Api(message)
            }
        }
        ConnectorError::Server(e) => ExchangeError::Api(format!("HTTP {}: {}", e.status_code, e.data)),
    }
}

fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

/// Order rejections keep their kind, only API errors are reworded as order failures.
fn order_error(side: &str, symbol: &str, err: ExchangeError) -> ExchangeError {
    match err {
        ExchangeError::Api(message) => ExchangeError::Order(format!("{} {} failed: {}", side, symbol, message)),
        other => other,
    }
}

#[async_trait]
impl ExchangeGateway for MexcGateway {
    async fn place_market_buy(&self, symbol: &str, usdt_amount: Decimal) -> ExchangeResult<BuyFill> {
        self.require_credentials()?;
        log::info!("Placing market BUY for {}: {} USDT", symbol, usdt_amount);

        let request =
            trade::new_order(symbol, Side::Buy, "MARKET").quote_order_qty(usdt_amount.round_dp(2));
        let body = self
            .send_raw(request)
            .await
            .map_err(|e| order_error("BUY", symbol, e))?;

        let ack = OrderAck::parse(&body)?;
        log::info!("Buy order accepted for {}: {}", symbol, ack.order_id());

        Ok(BuyFill {
            order_id: ack.order_id(),
            executed_qty: ack.executed_qty(),
            fill_price: ack.first_fill_price(),
        })
    }

    async fn place_market_sell(&self, symbol: &str, quantity: Decimal) -> ExchangeResult<SellFill> {
        self.require_credentials()?;
        log::info!("Placing market SELL for {}: {}", symbol, quantity);

        let request = trade::new_order(symbol, Side::Sell, "MARKET").quantity(quantity.normalize());
        let body = self
            .send_raw(request)
            .await
            .map_err(|e| order_error("SELL", symbol, e))?;

        let ack = OrderAck::parse(&body)?;
        log::info!("Sell order accepted for {}: {}", symbol, ack.order_id());

        Ok(SellFill {
            order_id: ack.order_id(),
            executed_qty: ack.executed_qty(),
        })
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> ExchangeResult<PriceHistory> {
        let limit = limit.to_string();
        let request = RequestBuilder::new(Method::Get, "/api/v3/klines").params(vec![
            ("symbol", symbol),
            ("interval", mexc_interval(interval)?),
            ("limit", limit.as_str()),
        ]);
        let body = self.send_raw(request).await?;

        let raw_klines: Vec<Vec<Value>> = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Parse(format!("klines for {}: {}", symbol, e)))?;

        let mut history = PriceHistory::new(symbol, interval);
        for row in &raw_klines {
            let kline = KlineRow::from_raw_data(row)?;
            history.add_candle(kline.into_candle(symbol, interval));
        }

        log::debug!("Fetched {} klines for {}/{}", history.len(), symbol, interval);
        Ok(history)
    }
}

/// MEXC spot kline interval for a configured one. `1h` and `1w` are accepted
/// as the Binance-style spellings of `60m` and `1W`.
pub fn mexc_interval(interval: &str) -> ExchangeResult<&'static str> {
    let mapped = match interval {
        "1m" => "1m",
        "5m" => "5m",
        "15m" => "15m",
        "30m" => "30m",
        "60m" | "1h" => "60m",
        "4h" => "4h",
        "1d" => "1d",
        "1W" | "1w" => "1W",
        "1M" => "1M",
        _ => {
            return Err(ExchangeError::Request(format!(
                "Unsupported MEXC kline interval: {} (expected 1m, 5m, 15m, 30m, 60m, 4h, 1d, 1W or 1M)",
                interval
            )))
        }
    };
    Ok(mapped)
}

/// One `/api/v3/klines` row.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineRow {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_asset_volume: Decimal,
}

impl KlineRow {
    /// MEXC rows carry eight fields; Binance appends three more that are ignored here.
    pub fn from_raw_data(data: &[Value]) -> ExchangeResult<Self> {
        if data.len() < 8 {
            return Err(ExchangeError::Parse(format!(
                "Invalid kline length: expected at least 8 elements, got {}",
                data.len()
            )));
        }

        let parse_time = |value: &Value, field: &str| -> ExchangeResult<i64> {
            value
                .as_i64()
                .ok_or_else(|| ExchangeError::Parse(format!("Invalid {} format", field)))
        };

        let parse_decimal = |value: &Value, field: &str| -> ExchangeResult<Decimal> {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(ExchangeError::Parse(format!("Invalid {} format", field))),
            };
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|e| ExchangeError::Parse(format!("{} '{}': {}", field, text, e)))
        };

        Ok(Self {
            open_time: parse_time(&data[0], "open_time")?,
            open: parse_decimal(&data[1], "open")?,
            high: parse_decimal(&data[2], "high")?,
            low: parse_decimal(&data[3], "low")?,
            close: parse_decimal(&data[4], "close")?,
            volume: parse_decimal(&data[5], "volume")?,
            close_time: parse_time(&data[6], "close_time")?,
            quote_asset_volume: parse_decimal(&data[7], "quote_asset_volume")?,
        })
    }

    pub fn into_candle(self, symbol: &str, interval: &str) -> Candlestick {
        Candlestick {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            open_time: self.open_time,
            close_time: self.close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: Value,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    fills: Vec<OrderAckFill>,
}

#[derive(Debug, Deserialize)]
struct OrderAckFill {
    price: String,
}

impl OrderAck {
    fn parse(body: &str) -> ExchangeResult<Self> {
        serde_json::from_str(body)
            .map_err(|e| ExchangeError::Parse(format!("order response: {} ({})", e, body)))
    }

    fn order_id(&self) -> String {
        match &self.order_id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }

    /// Zero or unparsable quantities count as missing.
    fn executed_qty(&self) -> Option<Decimal> {
        self.executed_qty
            .as_deref()
            .and_then(|qty| Decimal::from_str(qty).ok())
            .filter(|qty| *qty > Decimal::ZERO)
    }

    fn first_fill_price(&self) -> Option<Decimal> {
        self.fills
            .first()
            .and_then(|fill| Decimal::from_str(&fill.price).ok())
            .filter(|price| *price > Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binance_spot_connector_rust::http::error::{BinanceApiError, HttpError};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn parses_mexc_kline_row() {
        let row = json!([
            1700000000000i64,
            "101.5",
            "103.0",
            "100.25",
            "102.75",
            "1500.5",
            1700000059999i64,
            "153000.1"
        ]);
        let kline = KlineRow::from_raw_data(row.as_array().unwrap()).unwrap();
        assert_eq!(kline.open, dec!(101.5));
        assert_eq!(kline.high, dec!(103.0));
        assert_eq!(kline.low, dec!(100.25));
        assert_eq!(kline.close, dec!(102.75));
        assert_eq!(kline.close_time, 1700000059999);

        let candle = kline.into_candle("BTCUSDT", "1m");
        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.close, dec!(102.75));
    }

    #[test]
    fn rejects_short_or_malformed_rows() {
        let short = json!([1700000000000i64, "1", "2"]);
        assert!(matches!(
            KlineRow::from_raw_data(short.as_array().unwrap()),
            Err(ExchangeError::Parse(_))
        ));

        let bad_price = json!([1, "x", "2", "1", "2", "5", 2, "10"]);
        assert!(KlineRow::from_raw_data(bad_price.as_array().unwrap()).is_err());
    }

    #[test]
    fn order_ack_extracts_fill_details() {
        let ack = OrderAck::parse(
            r#"{"symbol":"BTCUSDT","orderId":"C02__1234","executedQty":"0.015","fills":[{"price":"99.5","qty":"0.015"}]}"#,
        )
        .unwrap();
        assert_eq!(ack.order_id(), "C02__1234");
        assert_eq!(ack.executed_qty(), Some(dec!(0.015)));
        assert_eq!(ack.first_fill_price(), Some(dec!(99.5)));

        let bare = OrderAck::parse(r#"{"orderId":42,"executedQty":"0"}"#).unwrap();
        assert_eq!(bare.order_id(), "42");
        assert_eq!(bare.executed_qty(), None);
        assert_eq!(bare.first_fill_price(), None);
    }

    #[test]
    fn maps_intervals_to_mexc_names() {
        assert_eq!(mexc_interval("1m").unwrap(), "1m");
        assert_eq!(mexc_interval("4h").unwrap(), "4h");
        assert_eq!(mexc_interval("1h").unwrap(), "60m");
        assert_eq!(mexc_interval("1w").unwrap(), "1W");
        for unsupported in ["3m", "2h", "6h", "8h", "12h", "3d", "7m"] {
            assert!(
                matches!(mexc_interval(unsupported), Err(ExchangeError::Request(_))),
                "{} should be rejected",
                unsupported
            );
        }
    }

    #[test]
    fn classifies_connector_failures() {
        let denied = ConnectorError::Client(ClientError::Raw(HttpError::new(
            401,
            "signature invalid".to_string(),
            HashMap::new(),
        )));
        assert!(matches!(transport_error(denied), ExchangeError::Authentication(_)));

        let rejected = ConnectorError::Client(ClientError::Structured(HttpError::new(
            400,
            BinanceApiError {
                code: 30004,
                message: "Insufficient position".to_string(),
            },
            HashMap::new(),
        )));
        match transport_error(rejected) {
            ExchangeError::Api(message) => assert!(message.contains("Insufficient position")),
            other => panic!("expected an API error, got {:?}", other),
        }

        let outage = ConnectorError::Server(HttpError::new(503, "busy".to_string(), HashMap::new()));
        assert!(matches!(transport_error(outage), ExchangeError::Api(_)));
        assert!(matches!(
            transport_error(ConnectorError::InvalidApiSecret),
            ExchangeError::Authentication(_)
        ));

        assert!(matches!(
            order_error("SELL", "BTCUSDT", ExchangeError::Api("HTTP 400".to_string())),
            ExchangeError::Order(_)
        ));
        assert!(matches!(
            order_error("SELL", "BTCUSDT", ExchangeError::Connection("reset".to_string())),
            ExchangeError::Connection(_)
        ));
    }

    #[tokio::test]
    async fn orders_need_credentials() {
        let gateway = MexcGateway::new(&ExchangeConfig {
            name: "mexc".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.mexc.com".to_string(),
            request_timeout_secs: 1,
        });
        let result = gateway.place_market_sell("BTCUSDT", dec!(1)).await;
        assert!(matches!(result, Err(ExchangeError::Authentication(_))));
    }
}
