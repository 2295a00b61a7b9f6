//! Core data model: transaction records, aggregate keys and the aggregate value
//! shared by the hot and cold tiers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Calendar-day format used in keys, documents and request parameters
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Naive timestamp layouts accepted in the CSV log (interpreted as UTC)
const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    MissingField(&'static str),
    InvalidTimestamp(String),
    InvalidType(String),
    InvalidAmount(String),
    InvalidDelay(String),
    InvalidDay(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingField(field) => write!(f, "Missing field: {}", field),
            ParseError::InvalidTimestamp(v) => write!(f, "Invalid timestamp: {}", v),
            ParseError::InvalidType(v) => write!(f, "Invalid transaction type: {}", v),
            ParseError::InvalidAmount(v) => write!(f, "Invalid amount: {}", v),
            ParseError::InvalidDelay(v) => write!(f, "Invalid replay delay: {}", v),
            ParseError::InvalidDay(v) => write!(f, "Invalid day (expected YYYY-MM-DD): {}", v),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "deposits", alias = "deposit")]
    Deposit,
    #[serde(rename = "withdrawals", alias = "withdrawal")]
    Withdrawal,
}

impl TransactionType {
    /// Canonical plural form used in keys and documents
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposits",
            TransactionType::Withdrawal => "withdrawals",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deposit" | "deposits" => Ok(TransactionType::Deposit),
            "withdrawal" | "withdrawals" => Ok(TransactionType::Withdrawal),
            _ => Err(ParseError::InvalidType(s.trim().to_string())),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a strict `YYYY-MM-DD` day string
pub fn parse_day(s: &str) -> Result<NaiveDate, ParseError> {
    let s = s.trim();
    if s.len() != 10 {
        return Err(ParseError::InvalidDay(s.to_string()));
    }
    NaiveDate::parse_from_str(s, DAY_FORMAT).map_err(|_| ParseError::InvalidDay(s.to_string()))
}

pub fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(ParseError::InvalidTimestamp(s.to_string()))
}

/// One transaction event as replayed from the log
///
/// Only the first four fields cross the queue; `replay_delay_ms` is pacing
/// information for the producer and is not serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub payment_method: String,
    pub amount: f64,
    #[serde(skip)]
    pub replay_delay_ms: u64,
}

impl TransactionRecord {
    /// Parse one CSV line: `timestamp, type, payment_method, amount, replay_delay_ms`
    ///
    /// Fields are trimmed; columns past the fifth are ignored.
    pub fn from_csv_line(line: &str) -> Result<Self, ParseError> {
        let mut fields = line.split(',').map(str::trim);

        let timestamp = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or(ParseError::MissingField("timestamp"))?;
        let tx_type = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or(ParseError::MissingField("type"))?;
        let payment_method = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or(ParseError::MissingField("payment_method"))?;
        let amount = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or(ParseError::MissingField("amount"))?;
        let delay = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or(ParseError::MissingField("replay_delay_ms"))?;

        let amount_value: f64 = amount
            .parse()
            .map_err(|_| ParseError::InvalidAmount(amount.to_string()))?;
        // Hot counters only ever grow
        if !amount_value.is_finite() || amount_value < 0.0 {
            return Err(ParseError::InvalidAmount(amount.to_string()));
        }

        Ok(Self {
            timestamp: parse_timestamp(timestamp)?,
            tx_type: tx_type.parse()?,
            payment_method: payment_method.to_string(),
            amount: amount_value,
            replay_delay_ms: delay
                .parse()
                .map_err(|_| ParseError::InvalidDelay(delay.to_string()))?,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn aggregate_key(&self) -> AggregateKey {
        AggregateKey::new(self.day(), self.tx_type)
    }
}

/// (day, type) identifies one aggregate row in both tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub day: NaiveDate,
    pub tx_type: TransactionType,
}

impl AggregateKey {
    pub fn new(day: NaiveDate, tx_type: TransactionType) -> Self {
        Self { day, tx_type }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", format_day(self.day), self.tx_type)
    }
}

/// Per-day, per-type totals by payment method
///
/// Hot reads leave `last_updated` empty; cold documents carry the time of the
/// flush that last changed `total_amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub day: NaiveDate,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub total_amount: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DailyAggregate {
    pub fn from_hot(key: AggregateKey, total_amount: BTreeMap<String, f64>) -> Self {
        Self {
            day: key.day,
            tx_type: key.tx_type,
            total_amount,
            last_updated: None,
        }
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey::new(self.day, self.tx_type)
    }

    pub fn total(&self) -> f64 {
        self.total_amount.values().sum()
    }
}
