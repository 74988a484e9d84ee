/// Core type definitions for the fundamentals sync engine
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Exchange-qualified security code, e.g. `sz.000001`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exchange prefix (`sz` for `sz.000001`), if qualified
    pub fn exchange(&self) -> Option<&str> {
        self.0.split_once('.').map(|(exchange, _)| exchange)
    }

    /// Bare security code without the exchange prefix
    pub fn code(&self) -> &str {
        self.0.split_once('.').map(|(_, code)| code).unwrap_or(&self.0)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(code: &str) -> Self {
        InstrumentId(code.to_string())
    }
}

impl From<String> for InstrumentId {
    fn from(code: String) -> Self {
        InstrumentId(code)
    }
}

/// Fiscal reporting quarter, rendered as `2024Q3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportPeriod {
    pub year: i32,
    pub quarter: u8,
}

impl ReportPeriod {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(ReportPeriod { year, quarter })
    }

    /// Quarter containing the given date
    pub fn containing(date: NaiveDate) -> Self {
        ReportPeriod {
            year: date.year(),
            quarter: ((date.month() - 1) / 3 + 1) as u8,
        }
    }

    pub fn previous(&self) -> Self {
        if self.quarter > 1 {
            ReportPeriod { year: self.year, quarter: self.quarter - 1 }
        } else {
            ReportPeriod { year: self.year - 1, quarter: 4 }
        }
    }

    /// Most recent completed quarter first, then the one before it.
    /// Providers publish with a lag, so the latest quarter is often still empty.
    pub fn recent_candidates(today: NaiveDate) -> [ReportPeriod; 2] {
        let last = Self::containing(today).previous();
        [last, last.previous()]
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (year, quarter) = s
            .trim()
            .split_once(['Q', 'q'])
            .ok_or_else(|| format!("invalid report period: {}", s))?;
        let year: i32 = year.parse().map_err(|_| format!("invalid report year: {}", s))?;
        let quarter: u8 = quarter.parse().map_err(|_| format!("invalid report quarter: {}", s))?;
        ReportPeriod::new(year, quarter).ok_or_else(|| format!("quarter out of range: {}", s))
    }
}

impl Serialize for ReportPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReportPeriod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One instrument's fundamentals snapshot. Absent values stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalRecord {
    pub ts_code: InstrumentId,
    pub stock_name: Option<String>,
    pub disclosure_date: Option<NaiveDate>,
    pub report_period: Option<ReportPeriod>,
    pub total_share: Option<f64>,
    pub float_share: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl FundamentalRecord {
    pub fn new(ts_code: InstrumentId) -> Self {
        FundamentalRecord {
            ts_code,
            stock_name: None,
            disclosure_date: None,
            report_period: None,
            total_share: None,
            float_share: None,
            fetched_at: Utc::now(),
        }
    }
}

/// Pending fetch for one instrument; `attempts` counts fetches already made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: InstrumentId,
    pub attempts: u32,
}

impl WorkItem {
    pub fn new(id: InstrumentId) -> Self {
        WorkItem { id, attempts: 0 }
    }
}

/// Terminal classification of one work item
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(FundamentalRecord),
    Empty(InstrumentId),
    Failed {
        id: InstrumentId,
        attempts: u32,
        cause: String,
    },
    /// Never attempted: the run deadline stopped admission first
    Skipped(InstrumentId),
}

impl Outcome {
    pub fn id(&self) -> &InstrumentId {
        match self {
            Outcome::Success(record) => &record.ts_code,
            Outcome::Empty(id) | Outcome::Skipped(id) => id,
            Outcome::Failed { id, .. } => id,
        }
    }
}

/// Listing status used to filter the universe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListStatus {
    #[serde(rename = "L", alias = "listed", alias = "active")]
    Listed,
    #[serde(rename = "D", alias = "delisted")]
    Delisted,
    #[serde(rename = "P", alias = "suspended")]
    Suspended,
}

impl ListStatus {
    pub fn as_code(&self) -> &str {
        match self {
            ListStatus::Listed => "L",
            ListStatus::Delisted => "D",
            ListStatus::Suspended => "P",
        }
    }
}

impl Default for ListStatus {
    fn default() -> Self {
        ListStatus::Listed
    }
}

impl FromStr for ListStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "L" | "LISTED" | "ACTIVE" => Ok(ListStatus::Listed),
            "D" | "DELISTED" => Ok(ListStatus::Delisted),
            "P" | "SUSPENDED" => Ok(ListStatus::Suspended),
            other => Err(format!("unknown list status: {}", other)),
        }
    }
}

impl fmt::Display for ListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Persistence target kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Csv,
    Database,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Csv => "csv",
            SinkKind::Database => "database",
        }
    }
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &str {
        match self {
            RunState::Idle => "IDLE",
            RunState::Running => "RUNNING",
            RunState::Draining => "DRAINING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_id_parts() {
        let id = InstrumentId::from("sz.000001");
        assert_eq!(id.exchange(), Some("sz"));
        assert_eq!(id.code(), "000001");

        let bare = InstrumentId::from("600000");
        assert_eq!(bare.exchange(), None);
        assert_eq!(bare.code(), "600000");
    }

    #[test]
    fn test_report_period_candidates() {
        let feb = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        let [first, second] = ReportPeriod::recent_candidates(feb);
        assert_eq!(first.to_string(), "2024Q4");
        assert_eq!(second.to_string(), "2024Q3");

        let may = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let [first, second] = ReportPeriod::recent_candidates(may);
        assert_eq!(first.to_string(), "2025Q1");
        assert_eq!(second.to_string(), "2024Q4");
    }

    #[test]
    fn test_report_period_parse() {
        assert_eq!("2024Q3".parse::<ReportPeriod>(), Ok(ReportPeriod { year: 2024, quarter: 3 }));
        assert!("2024Q5".parse::<ReportPeriod>().is_err());
        assert!("2024".parse::<ReportPeriod>().is_err());
    }

    #[test]
    fn test_list_status_codes() {
        assert_eq!("l".parse::<ListStatus>(), Ok(ListStatus::Listed));
        assert_eq!("suspended".parse::<ListStatus>(), Ok(ListStatus::Suspended));
        assert_eq!(ListStatus::Delisted.as_code(), "D");
        assert!("X".parse::<ListStatus>().is_err());
    }
}
