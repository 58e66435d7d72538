//! Fixture connector backed by in-memory or JSON data
//!
//! Serves canned symbol info, statements, prices and news per ticker, and can
//! be scripted to fail specific calls. Used by the `screener` binary for
//! offline runs and by tests as the collaborator double.
//!
//! JSON layout:
//! ```json
//! { "CAT": { "info": {...}, "income": {...}, "balance": {...},
//!            "cashflow": {...}, "prices": [...], "news": [...] } }
//! ```

use crate::period::{Interval, LookbackPeriod};
use crate::source::MarketDataSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Datelike;
use common::{
    NewsArticle, PriceBar, ServiceError, StatementKind, StatementTable, SymbolInfo, TimeSeries,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tracing::{debug, info};

/// Canned data for one ticker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerFixture {
    #[serde(default)]
    pub info: Option<SymbolInfo>,
    #[serde(default)]
    pub income: Option<StatementTable>,
    #[serde(default)]
    pub balance: Option<StatementTable>,
    #[serde(default)]
    pub cashflow: Option<StatementTable>,
    #[serde(default)]
    pub prices: Vec<PriceBar>,
    #[serde(default)]
    pub news: Vec<NewsArticle>,
}

/// Call target used to script failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    SymbolInfo,
    Statement(StatementKind),
    Prices,
    News,
}

type CallKey = (String, Endpoint);

/// In-memory market data source
#[derive(Default)]
pub struct FixtureSource {
    tickers: DashMap<String, TickerFixture>,
    // One-shot failures consumed in order before the canned answer is served
    scripted: DashMap<CallKey, VecDeque<ServiceError>>,
    // Failures returned on every call
    broken: DashMap<CallKey, ServiceError>,
    calls: DashMap<CallKey, u32>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let tickers: HashMap<String, TickerFixture> =
            serde_json::from_str(raw).context("Failed to parse fixture JSON")?;
        let source = Self::new();
        for (ticker, fixture) in tickers {
            source.insert(&ticker, fixture);
        }
        Ok(source)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures from {}", path.display()))?;
        let source = Self::from_json_str(&raw)?;
        info!(path = %path.display(), tickers = source.tickers.len(), "Loaded fixtures");
        Ok(source)
    }

    pub fn insert(&self, ticker: &str, fixture: TickerFixture) {
        self.tickers.insert(ticker.to_string(), fixture);
    }

    /// Fail the next call to `endpoint` for `ticker`; repeated calls queue up
    pub fn fail_next(&self, ticker: &str, endpoint: Endpoint, error: ServiceError) {
        self.scripted
            .entry((ticker.to_string(), endpoint))
            .or_default()
            .push_back(error);
    }

    /// Fail every call to `endpoint` for `ticker`
    pub fn fail_always(&self, ticker: &str, endpoint: Endpoint, error: ServiceError) {
        self.broken.insert((ticker.to_string(), endpoint), error);
    }

    pub fn call_count(&self, ticker: &str, endpoint: Endpoint) -> u32 {
        self.calls
            .get(&(ticker.to_string(), endpoint))
            .map_or(0, |count| *count)
    }

    fn record_call(&self, ticker: &str, endpoint: Endpoint) -> Result<(), ServiceError> {
        let key = (ticker.to_string(), endpoint);
        *self.calls.entry(key.clone()).or_insert(0) += 1;

        if let Some(mut queue) = self.scripted.get_mut(&key) {
            if let Some(err) = queue.pop_front() {
                debug!(ticker, ?endpoint, error = %err, "Serving scripted failure");
                return Err(err);
            }
        }
        if let Some(err) = self.broken.get(&key) {
            return Err(err.value().clone());
        }
        Ok(())
    }

    fn fixture(&self, ticker: &str, what: &str) -> Result<TickerFixture, ServiceError> {
        self.tickers
            .get(ticker)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::NotFound {
                symbol: ticker.to_string(),
                what: what.to_string(),
            })
    }
}

#[async_trait]
impl MarketDataSource for FixtureSource {
    fn name(&self) -> &str {
        "fixtures"
    }

    async fn fetch_symbol_info(&self, ticker: &str) -> Result<SymbolInfo, ServiceError> {
        self.record_call(ticker, Endpoint::SymbolInfo)?;
        self.fixture(ticker, "symbol info")?
            .info
            .ok_or_else(|| ServiceError::NotFound {
                symbol: ticker.to_string(),
                what: "symbol info".to_string(),
            })
    }

    async fn fetch_statement(
        &self,
        ticker: &str,
        kind: StatementKind,
    ) -> Result<StatementTable, ServiceError> {
        self.record_call(ticker, Endpoint::Statement(kind))?;
        let fixture = self.fixture(ticker, kind.as_str())?;
        let table = match kind {
            StatementKind::Income => fixture.income,
            StatementKind::Balance => fixture.balance,
            StatementKind::CashFlow => fixture.cashflow,
        };
        Ok(table.unwrap_or_default())
    }

    async fn fetch_prices(
        &self,
        ticker: &str,
        period: LookbackPeriod,
        interval: Interval,
    ) -> Result<TimeSeries, ServiceError> {
        self.record_call(ticker, Endpoint::Prices)?;
        let mut bars = self.fixture(ticker, "price history")?.prices;
        bars.sort_by_key(|bar| bar.date);

        if let Some(last) = bars.last().map(|bar| bar.date) {
            if let Some(start) = period.start_date(last) {
                bars.retain(|bar| bar.date >= start);
            }
        }

        Ok(resample(bars, interval))
    }

    async fn fetch_news(&self, ticker: &str) -> Result<Vec<NewsArticle>, ServiceError> {
        self.record_call(ticker, Endpoint::News)?;
        Ok(self.fixture(ticker, "news")?.news)
    }
}

/// Aggregate daily bars into weekly or monthly bars
fn resample(bars: Vec<PriceBar>, interval: Interval) -> TimeSeries {
    if interval == Interval::Daily {
        return bars;
    }

    let bucket = |bar: &PriceBar| -> (i32, u32) {
        match interval {
            Interval::Weekly => {
                let week = bar.date.iso_week();
                (week.year(), week.week())
            }
            _ => (bar.date.year(), bar.date.month()),
        }
    };

    let mut out: Vec<PriceBar> = Vec::new();
    let mut current: Option<(i32, u32)> = None;

    for bar in bars {
        let key = bucket(&bar);
        match out.last_mut() {
            Some(agg) if current == Some(key) => {
                agg.date = bar.date;
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => {
                current = Some(key);
                out.push(bar);
            }
        }
    }

    out
}
