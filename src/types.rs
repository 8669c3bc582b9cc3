// =============================================================================
// Shared types used across the quote bridge
// =============================================================================

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Bar period supported by the bridge.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl Period {
    /// Period length in seconds (60 / 3600 / 86400).
    pub fn length_secs(self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::H1 => 3_600,
            Self::D1 => 86_400,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::H1 => "1h",
            Self::D1 => "1d",
        }
    }

    /// All periods the bridge understands, in ascending length order.
    pub const ALL: [Period; 3] = [Period::M1, Period::H1, Period::D1];
}

impl FromStr for Period {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::M1),
            "1h" => Ok(Self::H1),
            "1d" => Ok(Self::D1),
            other => Err(BridgeError::Config(format!("unsupported period: {other}"))),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether only closed bars are pushed, or forming bars as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushMode {
    #[serde(rename = "close_only")]
    CloseOnly,
    #[serde(rename = "forming_and_close")]
    FormingAndClose,
}

impl Default for PushMode {
    fn default() -> Self {
        Self::CloseOnly
    }
}

impl PushMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CloseOnly => "close_only",
            Self::FormingAndClose => "forming_and_close",
        }
    }
}

impl FromStr for PushMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "close_only" => Ok(Self::CloseOnly),
            "forming_and_close" => Ok(Self::FormingAndClose),
            other => Err(BridgeError::Config(format!("unsupported mode: {other}"))),
        }
    }
}

impl std::fmt::Display for PushMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Composite key identifying a single bar stream.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub code: String,
    pub period: Period,
}

impl SubscriptionKey {
    pub fn new(code: impl Into<String>, period: Period) -> Self {
        Self {
            code: code.into(),
            period,
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.code, self.period)
    }
}

/// Dividend adjustment applied to a bar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DividendType {
    None,
    Front,
    Back,
    Ratio,
}

/// The canonical wide-record published on the fanout topic.
///
/// Timestamps are ISO-8601 strings in Asia/Shanghai with an explicit `+08:00`
/// offset. OHLC fields serialize as JSON null when the vendor row was sparse;
/// the optional extras are omitted entirely when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalBar {
    pub code: String,
    pub period: Period,
    pub bar_open_ts: String,
    pub bar_end_ts: String,
    pub is_closed: bool,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_close: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend_flag: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividend_type: Option<DividendType>,

    pub source: String,
    pub recv_ts: String,
}

/// A raw vendor row: a loose field map, shape varies by site and product.
pub type RawRow = HashMap<String, serde_json::Value>;

/// A raw vendor callback batch: rows grouped per symbol for one period.
pub type RawBatch = HashMap<String, Vec<RawRow>>;

/// One vendor delivery as it enters the engine dispatch channel.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub period: Period,
    pub batch: RawBatch,
}

// ---------------------------------------------------------------------------
// Raw-row alias resolution
// ---------------------------------------------------------------------------
// The vendor spells the same field several ways depending on site/product.
// Resolution happens once here; nothing downstream looks at aliases.

const TIME_ALIASES: &[&str] = &["time", "Time", "datetime", "bar_time"];
const CLOSED_ALIASES: &[&str] = &["isClose", "isClosed", "closed"];

fn first_present<'a>(row: &'a RawRow, names: &[&str]) -> Option<&'a serde_json::Value> {
    names.iter().find_map(|n| row.get(*n))
}

/// The raw time field, whichever alias carried it.
pub fn raw_time(row: &RawRow) -> Option<&serde_json::Value> {
    first_present(row, TIME_ALIASES)
}

/// The vendor close flag. Accepted for completeness but never trusted:
/// closure is derived from timestamp advancement.
pub fn raw_closed_flag(row: &RawRow) -> Option<bool> {
    first_present(row, CLOSED_ALIASES).and_then(|v| v.as_bool())
}

/// A numeric field, tolerating JSON numbers and numeric strings.
pub fn raw_f64(row: &RawRow, name: &str) -> Option<f64> {
    match row.get(name)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Like [`raw_f64`] but across a list of aliases.
pub fn raw_f64_alias(row: &RawRow, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|n| raw_f64(row, n))
}

/// Settlement price, tolerating the vendor's historical misspelling.
pub fn raw_settlement_price(row: &RawRow) -> Option<f64> {
    raw_f64_alias(row, &["settlementPrice", "settelementPrice", "settlement_price"])
}

pub fn raw_pre_close(row: &RawRow) -> Option<f64> {
    raw_f64_alias(row, &["preClose", "pre_close"])
}

pub fn raw_open_interest(row: &RawRow) -> Option<f64> {
    raw_f64_alias(row, &["openInterest", "open_interest", "openInt"])
}

pub fn raw_suspend_flag(row: &RawRow) -> Option<i64> {
    first_present(row, &["suspendFlag", "suspend_flag"]).and_then(|v| v.as_i64())
}

pub fn raw_source(row: &RawRow) -> Option<String> {
    row.get("source")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
