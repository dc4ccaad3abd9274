use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::time::Duration;

use crate::command::{
    AggregatedData, AppSettings, ConversationRecord, MarketQuote, ModelInfo, PortfolioSnapshot,
    RawSeries, SingleModelData, TimePoint, TradeRecord, TradeSignal, UpdateInfo,
};
use crate::config::CliParams;

/// Fetch surface the poller depends on. `BackendClient` is the HTTP
/// implementation; tests drive the poller through a stub instead.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_models(&self) -> Result<Vec<ModelInfo>>;
    async fn fetch_model_data(&self, model_id: i64) -> Result<SingleModelData>;
    async fn fetch_aggregated(&self) -> Result<AggregatedData>;
    async fn fetch_market_prices(&self) -> Result<Vec<(String, MarketQuote)>>;
    async fn delete_model(&self, model_id: i64) -> Result<()>;
    async fn fetch_settings(&self) -> Result<AppSettings>;
    async fn save_settings(&self, settings: &AppSettings) -> Result<()>;
    async fn check_update(&self) -> Result<UpdateInfo>;
}

pub struct BackendClient {
    client: Client,
    base_url: String,
    trades_limit: usize,
    conversations_limit: usize,
}

impl BackendClient {
    pub fn new(params: &CliParams) -> Result<BackendClient> {
        Ok(BackendClient {
            client: build_http_client()?,
            base_url: params.base_url(),
            trades_limit: params.trades_limit,
            conversations_limit: params.conversations_limit,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .with_context(|| format!("requesting {path}"))?
            .error_for_status()
            .with_context(|| format!("response status for {path}"))?
            .json::<T>()
            .await
            .with_context(|| format!("decoding {path}"))
    }
}

#[async_trait]
impl Backend for BackendClient {
    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        self.get_json("/api/models").await
    }

    async fn fetch_model_data(&self, model_id: i64) -> Result<SingleModelData> {
        let portfolio_path = format!("/api/models/{model_id}/portfolio");
        let trades_path = format!("/api/models/{model_id}/trades?limit={}", self.trades_limit);
        let conversations_path = format!(
            "/api/models/{model_id}/conversations?limit={}",
            self.conversations_limit
        );
        let (envelope, trades, conversations) = tokio::try_join!(
            self.get_json::<PortfolioEnvelope>(&portfolio_path),
            self.get_json::<Vec<TradeRow>>(&trades_path),
            self.get_json::<Vec<ConversationRow>>(&conversations_path),
        )?;
        let history = convert_history(&envelope.account_value_history)?;
        let trades = trades
            .into_iter()
            .map(TradeRow::into_record)
            .collect::<Result<Vec<_>>>()?;
        let conversations = conversations
            .into_iter()
            .map(ConversationRow::into_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(SingleModelData {
            model_id,
            portfolio: envelope.portfolio,
            history,
            trades,
            conversations,
        })
    }

    async fn fetch_aggregated(&self) -> Result<AggregatedData> {
        let envelope: AggregatedEnvelope = self.get_json("/api/aggregated/portfolio").await?;
        let chart = envelope
            .chart_data
            .into_iter()
            .map(SeriesRow::into_series)
            .collect::<Result<Vec<_>>>()?;
        Ok(AggregatedData {
            portfolio: envelope.portfolio,
            chart,
        })
    }

    async fn fetch_market_prices(&self) -> Result<Vec<(String, MarketQuote)>> {
        let prices: BTreeMap<String, MarketQuote> = self.get_json("/api/market/prices").await?;
        Ok(prices.into_iter().collect())
    }

    async fn delete_model(&self, model_id: i64) -> Result<()> {
        let path = format!("/api/models/{model_id}");
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .send()
            .await
            .with_context(|| format!("deleting model {model_id}"))?
            .error_for_status()
            .with_context(|| format!("delete status for model {model_id}"))?;
        Ok(())
    }

    async fn fetch_settings(&self) -> Result<AppSettings> {
        self.get_json("/api/settings").await
    }

    async fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        self.client
            .put(format!("{}/api/settings", self.base_url))
            .json(settings)
            .send()
            .await
            .context("saving settings")?
            .error_for_status()
            .context("settings save status")?;
        Ok(())
    }

    async fn check_update(&self) -> Result<UpdateInfo> {
        self.get_json("/api/check-update").await
    }
}

#[derive(Debug, Deserialize)]
struct PortfolioEnvelope {
    portfolio: PortfolioSnapshot,
    #[serde(default)]
    account_value_history: Vec<HistoryRow>,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    timestamp: String,
    total_value: f64,
}

#[derive(Debug, Deserialize)]
struct AggregatedEnvelope {
    portfolio: PortfolioSnapshot,
    #[serde(default)]
    chart_data: Vec<SeriesRow>,
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    model_name: String,
    #[serde(default)]
    data: Vec<SeriesPoint>,
}

impl SeriesRow {
    fn into_series(self) -> Result<RawSeries> {
        let points = self
            .data
            .iter()
            .map(|point| {
                Ok(TimePoint {
                    ts: parse_wire_timestamp(&point.timestamp)?,
                    value: point.value,
                })
            })
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("chart series for {}", self.model_name))?;
        Ok(RawSeries {
            label: self.model_name,
            points,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SeriesPoint {
    timestamp: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct TradeRow {
    timestamp: String,
    coin: String,
    signal: String,
    quantity: f64,
    price: f64,
    #[serde(default)]
    pnl: f64,
    #[serde(default)]
    fee: f64,
}

impl TradeRow {
    fn into_record(self) -> Result<TradeRecord> {
        Ok(TradeRecord {
            ts: parse_wire_timestamp(&self.timestamp)?,
            coin: self.coin,
            signal: TradeSignal::from_wire(&self.signal),
            quantity: self.quantity,
            price: self.price,
            pnl: self.pnl,
            fee: self.fee,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    timestamp: String,
    ai_response: String,
}

impl ConversationRow {
    fn into_record(self) -> Result<ConversationRecord> {
        Ok(ConversationRecord {
            ts: parse_wire_timestamp(&self.timestamp)?,
            ai_response: self.ai_response,
        })
    }
}

fn convert_history(rows: &[HistoryRow]) -> Result<Vec<TimePoint>> {
    rows.iter()
        .map(|row| {
            Ok(TimePoint {
                ts: parse_wire_timestamp(&row.timestamp)?,
                value: row.total_value,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("account value history")
}

/// Wire timestamps come without a timezone designator and are UTC by
/// contract; interpreting them in any local zone skews every chart.
pub fn parse_wire_timestamp(raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    Err(anyhow!("unrecognized wire timestamp `{raw}`"))
}

fn build_http_client() -> Result<Client> {
    Ok(ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(20))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_timestamp_is_utc() {
        // 2024-01-02 04:30:00 UTC
        assert_eq!(
            parse_wire_timestamp("2024-01-02 04:30:00").unwrap(),
            1_704_169_800_000
        );
        assert_eq!(
            parse_wire_timestamp("2024-01-02T04:30:00").unwrap(),
            1_704_169_800_000
        );
        assert_eq!(
            parse_wire_timestamp("2024-01-02 04:30:00.250").unwrap(),
            1_704_169_800_250
        );
        assert!(parse_wire_timestamp("01/02/2024").is_err());
    }

    #[test]
    fn test_portfolio_envelope_decodes_with_optional_fields() {
        let raw = r#"{
            "portfolio": {
                "total_value": 101000.5,
                "cash": 20000,
                "realized_pnl": 500,
                "unrealized_pnl": -120.25,
                "positions": [
                    {"coin": "BTC", "side": "long", "quantity": 0.5,
                     "avg_price": 60000, "current_price": 61000,
                     "leverage": 3, "pnl": 500},
                    {"coin": "ETH", "side": "short", "quantity": 2,
                     "avg_price": 3000, "leverage": 1}
                ]
            },
            "account_value_history": [
                {"timestamp": "2024-01-02 04:30:00", "total_value": 101000.5}
            ]
        }"#;
        let envelope: PortfolioEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.portfolio.positions.len(), 2);
        let eth = &envelope.portfolio.positions[1];
        assert_eq!(eth.side, crate::command::PositionSide::Short);
        assert!(eth.current_price.is_none());
        assert!(eth.pnl.is_none());
        let history = convert_history(&envelope.account_value_history).unwrap();
        assert_eq!(history[0].ts, 1_704_169_800_000);
    }

    #[test]
    fn test_aggregated_envelope_decodes_chart_series() {
        let raw = r#"{
            "portfolio": {"total_value": 5000},
            "chart_data": [
                {"model_name": "alpha", "data": [
                    {"timestamp": "2024-01-02 04:30:00", "value": 100.0},
                    {"timestamp": "2024-01-02 04:40:00", "value": 110.0}
                ]},
                {"model_name": "beta", "data": []}
            ]
        }"#;
        let envelope: AggregatedEnvelope = serde_json::from_str(raw).unwrap();
        let series = envelope
            .chart_data
            .into_iter()
            .map(SeriesRow::into_series)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(series[0].label, "alpha");
        assert_eq!(series[0].points.len(), 2);
        assert!(series[1].points.is_empty());
    }

    #[test]
    fn test_trade_row_maps_signals() {
        let raw = r#"[{"timestamp": "2024-01-02 04:30:00", "coin": "BTC",
                       "signal": "buy_to_enter", "quantity": 0.5,
                       "price": 60000, "pnl": 0, "fee": 12.5},
                      {"timestamp": "2024-01-02 05:00:00", "coin": "BTC",
                       "signal": "rebalance", "quantity": 0.1, "price": 60500}]"#;
        let rows: Vec<TradeRow> = serde_json::from_str(raw).unwrap();
        let records = rows
            .into_iter()
            .map(TradeRow::into_record)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records[0].signal, TradeSignal::BuyToEnter);
        assert_eq!(
            records[1].signal,
            TradeSignal::Other("rebalance".to_string())
        );
        assert_eq!(records[1].fee, 0.0);
    }

    #[test]
    fn test_malformed_timestamp_fails_the_whole_decode() {
        let rows = vec![HistoryRow {
            timestamp: "not a time".to_string(),
            total_value: 1.0,
        }];
        assert!(convert_history(&rows).is_err());
    }
}
