use serde::{Deserialize, Serialize};

use crate::view::ViewMode;

/// Messages broadcast from the poller to the rendering loop.
#[derive(Debug, Clone)]
pub enum Command {
    Models(Vec<ModelInfo>),
    ViewChanged(ViewMode),
    SingleModel(Box<SingleModelData>),
    Aggregated(AggregatedData),
    MarketPrices(Vec<(String, MarketQuote)>),
    Settings(AppSettings),
    SettingsSaved,
    Update(UpdateInfo),
    Error(String),
    Exit,
}

/// Requests sent from the UI to the poller over its control channel.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    SelectModel(i64),
    SelectAggregated,
    Refresh,
    DeleteModel(i64),
    LoadSettings,
    SaveSettings(AppSettings),
    CheckUpdate,
    Shutdown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: i64,
    pub name: String,
    pub model_name: String,
}

/// Replaced wholesale on every successful fetch, never patched in place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortfolioSnapshot {
    #[serde(default)]
    pub total_value: f64,
    #[serde(default)]
    pub cash: f64,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Position {
    pub coin: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub avg_price: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub leverage: f64,
    #[serde(default)]
    pub pnl: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn label(&self) -> &'static str {
        match self {
            PositionSide::Long => "做多",
            PositionSide::Short => "做空",
        }
    }
}

/// One sample of one account-value series; `ts` is a UTC instant in millis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePoint {
    pub ts: i64,
    pub value: f64,
}

/// Raw per-model history as fetched; point order is whatever the wire gave us.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub label: String,
    pub points: Vec<TimePoint>,
}

#[derive(Debug, Clone)]
pub struct SingleModelData {
    pub model_id: i64,
    pub portfolio: PortfolioSnapshot,
    pub history: Vec<TimePoint>,
    pub trades: Vec<TradeRecord>,
    pub conversations: Vec<ConversationRecord>,
}

#[derive(Debug, Clone)]
pub struct AggregatedData {
    pub portfolio: PortfolioSnapshot,
    pub chart: Vec<RawSeries>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct MarketQuote {
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub change_24h: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeSignal {
    BuyToEnter,
    SellToEnter,
    ClosePosition,
    Other(String),
}

impl TradeSignal {
    pub fn from_wire(raw: &str) -> TradeSignal {
        match raw {
            "buy_to_enter" => TradeSignal::BuyToEnter,
            "sell_to_enter" => TradeSignal::SellToEnter,
            "close_position" => TradeSignal::ClosePosition,
            other => TradeSignal::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TradeSignal::BuyToEnter => "开多",
            TradeSignal::SellToEnter => "开空",
            TradeSignal::ClosePosition => "平仓",
            TradeSignal::Other(raw) => raw.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub ts: i64,
    pub coin: String,
    pub signal: TradeSignal,
    pub quantity: f64,
    pub price: f64,
    pub pnl: f64,
    pub fee: f64,
}

#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub ts: i64,
    pub ai_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub trading_frequency_minutes: u32,
    pub trading_fee_rate: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInfo {
    #[serde(default)]
    pub update_available: bool,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub latest_version: String,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub release_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
