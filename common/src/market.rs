//! Market data records returned by data sources

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One OHLCV observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Price history ordered by date, oldest first
pub type TimeSeries = Vec<PriceBar>;

/// Daily returns keyed by the date they were realised on
pub type ReturnSeries = BTreeMap<NaiveDate, f64>;

/// Market info for a symbol
///
/// Every field except the ticker may be absent upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub ticker: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub avg_volume: Option<f64>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
}

/// Financial statement type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Income,
    Balance,
    CashFlow,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::Income,
        StatementKind::Balance,
        StatementKind::CashFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Income => "income statement",
            StatementKind::Balance => "balance sheet",
            StatementKind::CashFlow => "cash flow statement",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line items (rows) by reporting period (columns)
///
/// Each row holds one cell per entry in `periods`; a missing cell is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementTable {
    pub periods: Vec<NaiveDate>,
    pub rows: BTreeMap<String, Vec<Option<f64>>>,
}

impl StatementTable {
    pub fn new(periods: Vec<NaiveDate>) -> Self {
        Self {
            periods,
            rows: BTreeMap::new(),
        }
    }

    /// Builder-style row insertion; short rows are padded with missing cells
    pub fn with_row(mut self, name: &str, mut values: Vec<Option<f64>>) -> Self {
        values.resize(self.periods.len(), None);
        self.rows.insert(name.to_string(), values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty() || self.rows.is_empty()
    }

    /// Number of reporting periods (columns)
    pub fn year_count(&self) -> usize {
        self.periods.len()
    }

    /// Column index of the most recent reporting period
    pub fn latest_column(&self) -> Option<usize> {
        self.periods
            .iter()
            .enumerate()
            .max_by_key(|(_, date)| **date)
            .map(|(idx, _)| idx)
    }

    /// First row matching any of the aliases
    pub fn row(&self, aliases: &[&str]) -> Option<(&str, &[Option<f64>])> {
        aliases.iter().find_map(|alias| {
            self.rows
                .get_key_value(*alias)
                .map(|(name, values)| (name.as_str(), values.as_slice()))
        })
    }

    /// Calendar year of each period column
    pub fn years(&self) -> Vec<i32> {
        self.periods.iter().map(|d| d.year()).collect()
    }
}

/// The three statement tables for one ticker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatements {
    pub income: StatementTable,
    pub balance: StatementTable,
    pub cashflow: StatementTable,
}

/// News headline with a vendor tone score in [-100, 100]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub id: String,
    #[serde(default)]
    pub url: String,
    pub title: String,
    /// Semicolon separated theme tags
    #[serde(default)]
    pub themes: String,
    pub tone: f64,
    pub published: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_latest_column_ignores_order() {
        let table = StatementTable::new(vec![date(2022, 12, 31), date(2024, 12, 31), date(2023, 12, 31)]);
        assert_eq!(table.latest_column(), Some(1));
        assert_eq!(table.years(), vec![2022, 2024, 2023]);
    }

    #[test]
    fn test_row_aliases_and_padding() {
        let table = StatementTable::new(vec![date(2024, 12, 31), date(2023, 12, 31)])
            .with_row("EBIT", vec![Some(100.0)]);

        let (name, values) = table.row(&["Ebit", "EBIT"]).unwrap();
        assert_eq!(name, "EBIT");
        assert_eq!(values, &[Some(100.0), None]);
        assert!(table.row(&["Total Assets"]).is_none());
    }

    #[test]
    fn test_empty_table() {
        assert!(StatementTable::default().is_empty());
        let no_rows = StatementTable::new(vec![date(2024, 12, 31)]);
        assert!(no_rows.is_empty());
        assert_eq!(no_rows.year_count(), 1);
    }
}
