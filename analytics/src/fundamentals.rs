//! Fundamental metrics engine
//!
//! Retrieval is all-or-nothing across the three statements. Once all three
//! are present each ratio is computed independently, so a missing line item
//! for one ratio leaves the others intact.

use chrono::{Datelike, NaiveDate};
use common::{
    outcome, ErrorInfo, FinancialStatements, MetricValue, ServiceError, StatementKind,
    StatementTable,
};
use data_ingestion::MarketDataSource;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Years whose filings are excluded from normalized tables
pub const STALE_YEARS: [i32; 2] = [2020, 2021];

const EBIT: &[&str] = &["Ebit", "EBIT"];
const TOTAL_ASSETS: &[&str] = &["Total Assets"];
const CURRENT_LIABILITIES: &[&str] = &["Total Current Liabilities", "Current Liabilities"];
const OPERATING_CASH_FLOW: &[&str] = &["Total Cash From Operating Activities", "Operating Cash Flow"];
const CAPEX: &[&str] = &["Capital Expenditures", "Capital Expenditure"];
const TOTAL_DEBT: &[&str] = &["Total Debt"];
const EQUITY: &[&str] = &["Total Stockholder Equity", "Stockholders Equity"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalOptions {
    #[serde(default = "default_stale_years")]
    pub stale_years: Vec<i32>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_stale_years() -> Vec<i32> {
    STALE_YEARS.to_vec()
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for FundamentalOptions {
    fn default() -> Self {
        Self {
            stale_years: default_stale_years(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Statement keyed by calendar year, then line item
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedTable(pub BTreeMap<i32, BTreeMap<String, f64>>);

impl NormalizedTable {
    /// Calendar-year columns, stale years dropped, incomplete rows dropped
    ///
    /// Two filings in the same calendar year collapse to the later one.
    pub fn from_table(table: &StatementTable, stale_years: &[i32]) -> Self {
        let mut columns: Vec<(usize, NaiveDate)> = table
            .periods
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, date)| !stale_years.contains(&date.year()))
            .collect();
        columns.sort_by_key(|(_, date)| *date);

        let mut by_year: BTreeMap<i32, usize> = BTreeMap::new();
        for (idx, date) in columns {
            by_year.insert(date.year(), idx);
        }

        let mut years: BTreeMap<i32, BTreeMap<String, f64>> =
            by_year.keys().map(|year| (*year, BTreeMap::new())).collect();

        for (name, values) in &table.rows {
            let complete: Option<Vec<(i32, f64)>> = by_year
                .iter()
                .map(|(year, idx)| values.get(*idx).copied().flatten().map(|v| (*year, v)))
                .collect();
            let Some(cells) = complete else {
                continue;
            };
            for (year, value) in cells {
                if let Some(column) = years.get_mut(&year) {
                    column.insert(name.clone(), value);
                }
            }
        }

        Self(years)
    }

    pub fn years(&self) -> Vec<i32> {
        self.0.keys().copied().collect()
    }

    pub fn get(&self, year: i32, item: &str) -> Option<f64> {
        self.0.get(&year).and_then(|column| column.get(item)).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Roic {
    pub roic: MetricValue,
    pub invested_capital: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FcfYield {
    pub fcf_yield: MetricValue,
    pub fcf: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebtToEquity {
    pub debt_to_equity: MetricValue,
}

/// Most recent value of the first matching line item
fn latest(table: &StatementTable, aliases: &[&str]) -> Result<f64, ErrorInfo> {
    let missing = || ErrorInfo::computation(format!("missing line item '{}'", aliases[0]));
    let (_, values) = table.row(aliases).ok_or_else(missing)?;
    let column = table.latest_column().ok_or_else(missing)?;
    values
        .get(column)
        .copied()
        .flatten()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            ErrorInfo::computation(format!("no recent value for line item '{}'", aliases[0]))
        })
}

/// EBIT over invested capital; undefined when invested capital is zero
pub fn compute_roic(income: &StatementTable, balance: &StatementTable) -> Result<Roic, ErrorInfo> {
    let ebit = latest(income, EBIT)?;
    let total_assets = latest(balance, TOTAL_ASSETS)?;
    let current_liabilities = latest(balance, CURRENT_LIABILITIES)?;

    let invested_capital = total_assets - current_liabilities;
    let roic = if invested_capital == 0.0 {
        MetricValue::Undefined
    } else {
        MetricValue::from_f64(ebit / invested_capital)
    };

    Ok(Roic {
        roic,
        invested_capital,
    })
}

/// Free cash flow over market cap; capex is already signed negative
pub fn compute_fcf_yield(
    cashflow: &StatementTable,
    market_cap: Option<f64>,
) -> Result<FcfYield, ErrorInfo> {
    let market_cap = match market_cap {
        Some(cap) if cap > 0.0 => cap,
        Some(cap) => {
            return Err(ErrorInfo::computation(format!(
                "market cap must be positive, got {}",
                cap
            )))
        }
        None => return Err(ErrorInfo::computation("market cap unavailable")),
    };

    let fcf = latest(cashflow, OPERATING_CASH_FLOW)? + latest(cashflow, CAPEX)?;

    Ok(FcfYield {
        fcf_yield: MetricValue::from_f64(fcf / market_cap),
        fcf,
    })
}

pub fn compute_debt_to_equity(balance: &StatementTable) -> Result<DebtToEquity, ErrorInfo> {
    let debt = latest(balance, TOTAL_DEBT)?;
    let equity = latest(balance, EQUITY)?;

    if equity == 0.0 {
        return Err(ErrorInfo::computation("Equity is zero, cannot compute D/E"));
    }

    Ok(DebtToEquity {
        debt_to_equity: MetricValue::from_f64(debt / equity),
    })
}

/// Normalized statements plus three independently computed ratios
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundamentalReport {
    pub ticker: String,
    pub market_cap: Option<f64>,
    pub income_statement: NormalizedTable,
    pub balance_sheet: NormalizedTable,
    pub cash_flow: NormalizedTable,
    #[serde(serialize_with = "outcome::serialize")]
    pub roic: Result<Roic, ErrorInfo>,
    #[serde(serialize_with = "outcome::serialize")]
    pub fcf_yield: Result<FcfYield, ErrorInfo>,
    #[serde(serialize_with = "outcome::serialize")]
    pub debt_to_equity: Result<DebtToEquity, ErrorInfo>,
}

/// Pure part of the engine: ratios from raw tables, then normalization
pub fn analyze_statements(
    ticker: &str,
    market_cap: Option<f64>,
    statements: &FinancialStatements,
    stale_years: &[i32],
) -> FundamentalReport {
    FundamentalReport {
        ticker: ticker.to_string(),
        market_cap,
        roic: compute_roic(&statements.income, &statements.balance),
        fcf_yield: compute_fcf_yield(&statements.cashflow, market_cap),
        debt_to_equity: compute_debt_to_equity(&statements.balance),
        income_statement: NormalizedTable::from_table(&statements.income, stale_years),
        balance_sheet: NormalizedTable::from_table(&statements.balance, stale_years),
        cash_flow: NormalizedTable::from_table(&statements.cashflow, stale_years),
    }
}

/// Fetch all three statements for `ticker` and compute its ratios
pub async fn compute_fundamentals(
    source: &dyn MarketDataSource,
    ticker: &str,
    market_cap: Option<f64>,
    options: &FundamentalOptions,
) -> Result<FundamentalReport, ErrorInfo> {
    let (income, balance, cashflow) = tokio::join!(
        source.fetch_statement(ticker, StatementKind::Income),
        source.fetch_statement(ticker, StatementKind::Balance),
        source.fetch_statement(ticker, StatementKind::CashFlow),
    );

    let mut problems = BTreeMap::new();
    let mut usable = |kind: StatementKind, fetched: Result<StatementTable, ServiceError>| {
        match fetched {
            Ok(table) if !table.is_empty() => Some(table),
            Ok(_) => {
                problems.insert(kind.as_str(), "empty".to_string());
                None
            }
            Err(err) => {
                problems.insert(kind.as_str(), err.to_string());
                None
            }
        }
    };

    let income = usable(StatementKind::Income, income);
    let balance = usable(StatementKind::Balance, balance);
    let cashflow = usable(StatementKind::CashFlow, cashflow);

    let statements = match (income, balance, cashflow) {
        (Some(income), Some(balance), Some(cashflow)) => FinancialStatements {
            income,
            balance,
            cashflow,
        },
        _ => {
            warn!(ticker, ?problems, "Statements unavailable, skipping ratios");
            return Err(ErrorInfo::data_unavailable(format!(
                "One or more statements unavailable for {}",
                ticker
            ))
            .with_details(serde_json::json!(problems)));
        }
    };

    let report = analyze_statements(ticker, market_cap, &statements, &options.stale_years);
    debug!(
        ticker,
        roic_ok = report.roic.is_ok(),
        fcf_ok = report.fcf_yield.is_ok(),
        de_ok = report.debt_to_equity.is_ok(),
        "Computed fundamentals"
    );
    Ok(report)
}

/// Per-ticker fundamentals record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundamentalRecord {
    pub ticker: String,
    #[serde(serialize_with = "outcome::serialize")]
    pub result: Result<FundamentalReport, ErrorInfo>,
}

/// Fundamentals for every `(ticker, market_cap)` pair, in input order
pub async fn compute_fundamentals_batch(
    source: &dyn MarketDataSource,
    universe: &[(String, Option<f64>)],
    options: &FundamentalOptions,
) -> Vec<FundamentalRecord> {
    info!(tickers = universe.len(), "Computing fundamentals");

    let futures: Vec<_> = universe
        .iter()
        .map(|(ticker, market_cap)| async move {
            FundamentalRecord {
                ticker: ticker.clone(),
                result: compute_fundamentals(source, ticker, *market_cap, options).await,
            }
        })
        .collect();
    stream::iter(futures)
        .buffered(options.max_concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;
    use data_ingestion::{Endpoint, FixtureSource, TickerFixture};

    fn periods(years: &[i32]) -> Vec<NaiveDate> {
        years
            .iter()
            .map(|y| NaiveDate::from_ymd_opt(*y, 12, 31).unwrap())
            .collect()
    }

    fn statements() -> FinancialStatements {
        let cols = periods(&[2023, 2022, 2021]);
        FinancialStatements {
            income: StatementTable::new(cols.clone())
                .with_row("Ebit", vec![Some(100.0), Some(90.0), Some(80.0)]),
            balance: StatementTable::new(cols.clone())
                .with_row("Total Assets", vec![Some(1000.0), Some(950.0), Some(900.0)])
                .with_row("Total Current Liabilities", vec![Some(200.0), Some(190.0), Some(180.0)])
                .with_row("Total Debt", vec![Some(300.0), Some(320.0), None])
                .with_row("Total Stockholder Equity", vec![Some(600.0), Some(580.0), Some(560.0)]),
            cashflow: StatementTable::new(cols)
                .with_row("Operating Cash Flow", vec![Some(150.0), Some(140.0), Some(130.0)])
                .with_row("Capital Expenditure", vec![Some(-50.0), Some(-45.0), Some(-40.0)]),
        }
    }

    #[test]
    fn test_roic_from_fabricated_tables() {
        let s = statements();
        let roic = compute_roic(&s.income, &s.balance).unwrap();
        assert_eq!(roic.invested_capital, 800.0);
        assert_eq!(roic.roic, MetricValue::Value(0.125));
    }

    #[test]
    fn test_roic_undefined_when_invested_capital_zero() {
        let s = statements();
        let balance = StatementTable::new(periods(&[2023]))
            .with_row("Total Assets", vec![Some(500.0)])
            .with_row("Total Current Liabilities", vec![Some(500.0)]);
        let roic = compute_roic(&s.income, &balance).unwrap();
        assert_eq!(roic.roic, MetricValue::Undefined);
    }

    #[test]
    fn test_fcf_yield_adds_signed_capex() {
        let s = statements();
        let fcf = compute_fcf_yield(&s.cashflow, Some(1000.0)).unwrap();
        assert_eq!(fcf.fcf, 100.0);
        assert_eq!(fcf.fcf_yield, MetricValue::Value(0.1));

        assert!(compute_fcf_yield(&s.cashflow, Some(0.0)).is_err());
        assert!(compute_fcf_yield(&s.cashflow, Some(-5.0)).is_err());
        assert!(compute_fcf_yield(&s.cashflow, None).is_err());
    }

    #[test]
    fn test_debt_to_equity_zero_equity_is_error() {
        let balance = StatementTable::new(periods(&[2023]))
            .with_row("Total Debt", vec![Some(300.0)])
            .with_row("Stockholders Equity", vec![Some(0.0)]);
        let err = compute_debt_to_equity(&balance).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Computation);
        assert_eq!(err.message, "Equity is zero, cannot compute D/E");
    }

    #[test]
    fn test_ratio_failures_are_independent() {
        let mut s = statements();
        s.balance.rows.remove("Total Debt");
        let report = analyze_statements("CAT", Some(1000.0), &s, &STALE_YEARS);
        assert!(report.debt_to_equity.is_err());
        assert!(report.roic.is_ok());
        assert!(report.fcf_yield.is_ok());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["debt_to_equity"]["error"].is_string());
        assert_eq!(json["roic"]["roic"], 0.125);
    }

    #[test]
    fn test_normalize_drops_stale_years_and_incomplete_rows() {
        let s = statements();
        let table = NormalizedTable::from_table(&s.balance, &STALE_YEARS);
        assert_eq!(table.years(), vec![2022, 2023]);
        assert_eq!(table.get(2023, "Total Debt"), Some(300.0));

        let all_years = NormalizedTable::from_table(&s.balance, &[]);
        assert_eq!(all_years.years(), vec![2021, 2022, 2023]);
        assert_eq!(all_years.get(2023, "Total Debt"), None);
        assert_eq!(all_years.get(2021, "Total Assets"), Some(900.0));
    }

    fn source_with(ticker: &str, s: FinancialStatements) -> FixtureSource {
        let source = FixtureSource::new();
        source.insert(
            ticker,
            TickerFixture {
                income: Some(s.income),
                balance: Some(s.balance),
                cashflow: Some(s.cashflow),
                ..Default::default()
            },
        );
        source
    }

    #[tokio::test]
    async fn test_empty_cashflow_yields_single_error() {
        let mut s = statements();
        s.cashflow = StatementTable::default();
        let source = source_with("GS", s);

        let err = compute_fundamentals(&source, "GS", Some(1e9), &FundamentalOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DataUnavailable);
        assert_eq!(err.details.unwrap()["cash flow statement"], "empty");
    }

    #[tokio::test]
    async fn test_fetch_error_yields_single_error() {
        let source = source_with("NEE", statements());
        source.fail_always(
            "NEE",
            Endpoint::Statement(StatementKind::Income),
            ServiceError::Transport("timeout".to_string()),
        );

        let result =
            compute_fundamentals(&source, "NEE", Some(1e9), &FundamentalOptions::default()).await;
        let json = serde_json::to_value(FundamentalRecord {
            ticker: "NEE".to_string(),
            result,
        })
        .unwrap();
        assert!(json["result"]["error"].is_string());
        assert!(json["result"].get("roic").is_none());
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_isolates_tickers() {
        let source = source_with("CAT", statements());
        let universe = vec![
            ("MISSING".to_string(), Some(1e9)),
            ("CAT".to_string(), Some(1000.0)),
        ];
        let records =
            compute_fundamentals_batch(&source, &universe, &FundamentalOptions::default()).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ticker, "MISSING");
        assert!(records[0].result.is_err());
        let cat = records[1].result.as_ref().unwrap();
        assert_eq!(cat.roic.as_ref().unwrap().roic, MetricValue::Value(0.125));
    }
}
