//! Validation gate
//!
//! Splits raw symbols into validated and excluded sets. Two independent
//! checks run per ticker and both must pass; missing data always fails the
//! check rather than passing it.

use common::{ServiceError, StatementKind, SymbolInfo};
use data_ingestion::MarketDataSource;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Gate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseCriteria {
    pub min_avg_volume: f64,
    pub min_financial_years: usize,
    /// Tickers checked at the same time
    pub max_concurrency: usize,
}

impl Default for UniverseCriteria {
    fn default() -> Self {
        Self {
            min_avg_volume: 200_000.0,
            min_financial_years: 5,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Liquidity,
    StatementCoverage,
}

/// Outcome of one named check with the numbers behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: CheckKind,
    pub passed: bool,
    pub evidence: BTreeMap<String, f64>,
    pub reason: String,
}

impl CheckResult {
    fn pass(check: CheckKind, evidence: BTreeMap<String, f64>) -> Self {
        Self {
            check,
            passed: true,
            evidence,
            reason: "OK".to_string(),
        }
    }

    fn fail(check: CheckKind, evidence: BTreeMap<String, f64>, reason: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            evidence,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedTicker {
    pub ticker: String,
    pub market_cap: Option<f64>,
    pub avg_volume: f64,
    pub years_financials: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

/// Excluded ticker with both checks kept in full
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedTicker {
    pub ticker: String,
    pub liquidity_check: CheckResult,
    pub financials_check: CheckResult,
}

impl ExcludedTicker {
    /// Failing checks, liquidity first
    pub fn failures(&self) -> Vec<&CheckResult> {
        [&self.liquidity_check, &self.financials_check]
            .into_iter()
            .filter(|check| !check.passed)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Validated(ValidatedTicker),
    Excluded(ExcludedTicker),
}

impl ValidationOutcome {
    pub fn ticker(&self) -> &str {
        match self {
            ValidationOutcome::Validated(v) => &v.ticker,
            ValidationOutcome::Excluded(e) => &e.ticker,
        }
    }

    pub fn is_validated(&self) -> bool {
        matches!(self, ValidationOutcome::Validated(_))
    }
}

/// Validated and excluded tickers for one gate run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniverseReport {
    pub validated: Vec<ValidatedTicker>,
    pub excluded: Vec<ExcludedTicker>,
}

impl UniverseReport {
    pub fn from_outcomes(outcomes: Vec<ValidationOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                ValidationOutcome::Validated(v) => report.validated.push(v),
                ValidationOutcome::Excluded(e) => report.excluded.push(e),
            }
        }
        report
    }

    pub fn tickers(&self) -> Vec<String> {
        self.validated.iter().map(|v| v.ticker.clone()).collect()
    }

    pub fn market_cap(&self, ticker: &str) -> Option<f64> {
        self.validated
            .iter()
            .find(|v| v.ticker == ticker)
            .and_then(|v| v.market_cap)
    }
}

/// Average volume check; also hands back the symbol info it fetched
pub async fn check_liquidity(
    source: &dyn MarketDataSource,
    ticker: &str,
    min_avg_volume: f64,
) -> (CheckResult, Option<SymbolInfo>) {
    let mut evidence = BTreeMap::from([("min_avg_volume".to_string(), min_avg_volume)]);

    let info = match source.fetch_symbol_info(ticker).await {
        Ok(info) => info,
        Err(err) => {
            debug!(ticker, error = %err, "Symbol info unavailable");
            let reason = format!("missing volume data ({})", err);
            return (CheckResult::fail(CheckKind::Liquidity, evidence, reason), None);
        }
    };

    let result = match info.avg_volume.filter(|v| v.is_finite()) {
        None => CheckResult::fail(CheckKind::Liquidity, evidence, "missing volume data"),
        Some(volume) => {
            evidence.insert("avg_volume".to_string(), volume);
            if volume >= min_avg_volume {
                CheckResult::pass(CheckKind::Liquidity, evidence)
            } else {
                let reason = format!("Avg volume too low: {}", volume);
                CheckResult::fail(CheckKind::Liquidity, evidence, reason)
            }
        }
    };

    (result, Some(info))
}

/// Statement history check over all three tables
pub async fn check_statement_coverage(
    source: &dyn MarketDataSource,
    ticker: &str,
    min_years: usize,
) -> CheckResult {
    let mut evidence = BTreeMap::from([("min_years".to_string(), min_years as f64)]);

    let fetched = futures::future::try_join_all(StatementKind::ALL.iter().map(|kind| async move {
        let table = source.fetch_statement(ticker, *kind).await?;
        Ok::<_, ServiceError>((*kind, table))
    }))
    .await;

    let tables = match fetched {
        Ok(tables) => tables,
        Err(err) => {
            let reason = format!("API error: {}", err);
            return CheckResult::fail(CheckKind::StatementCoverage, evidence, reason);
        }
    };

    let mut years_available = usize::MAX;
    for (kind, table) in &tables {
        let years = table.year_count();
        evidence.insert(format!("{}_years", kind.as_str().replace(' ', "_")), years as f64);
        years_available = years_available.min(years);
    }
    evidence.insert("years_available".to_string(), years_available as f64);

    if years_available >= min_years {
        CheckResult::pass(CheckKind::StatementCoverage, evidence)
    } else {
        let reason = format!("Only {} years of data.", years_available);
        CheckResult::fail(CheckKind::StatementCoverage, evidence, reason)
    }
}

async fn validate_ticker(
    source: &dyn MarketDataSource,
    ticker: String,
    criteria: &UniverseCriteria,
) -> ValidationOutcome {
    let ((liquidity, info), coverage) = tokio::join!(
        check_liquidity(source, &ticker, criteria.min_avg_volume),
        check_statement_coverage(source, &ticker, criteria.min_financial_years),
    );

    if !(liquidity.passed && coverage.passed) {
        warn!(
            ticker = %ticker,
            liquidity = %liquidity.reason,
            coverage = %coverage.reason,
            "Ticker excluded"
        );
        return ValidationOutcome::Excluded(ExcludedTicker {
            ticker,
            liquidity_check: liquidity,
            financials_check: coverage,
        });
    }

    let avg_volume = liquidity.evidence.get("avg_volume").copied().unwrap_or_default();
    let years_financials = coverage
        .evidence
        .get("years_available")
        .map_or(0, |years| *years as usize);
    let (market_cap, sector) = info.map_or((None, None), |i| (i.market_cap, i.sector));

    ValidationOutcome::Validated(ValidatedTicker {
        ticker,
        market_cap,
        avg_volume,
        years_financials,
        sector,
    })
}

/// Excluded outcome for a symbol that cannot be looked up at all
fn blank_ticker(ticker: String) -> ValidationOutcome {
    let reason = "empty ticker symbol";
    warn!(ticker = %ticker, "Ticker excluded: {}", reason);
    ValidationOutcome::Excluded(ExcludedTicker {
        ticker,
        liquidity_check: CheckResult::fail(CheckKind::Liquidity, BTreeMap::new(), reason),
        financials_check: CheckResult::fail(CheckKind::StatementCoverage, BTreeMap::new(), reason),
    })
}

/// Gate every distinct input symbol; output follows first-seen input order
///
/// Symbols are reported exactly as given, so each distinct input lands in
/// exactly one of validated or excluded. Blank symbols are excluded without
/// touching the source.
pub async fn validate_universe(
    source: &dyn MarketDataSource,
    tickers: &[String],
    criteria: &UniverseCriteria,
) -> Vec<ValidationOutcome> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = tickers
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect();

    info!(tickers = unique.len(), "Validating universe");

    let outcomes: Vec<ValidationOutcome> = stream::iter(unique)
        .map(|ticker| async move {
            if ticker.trim().is_empty() {
                blank_ticker(ticker)
            } else {
                validate_ticker(source, ticker, criteria).await
            }
        })
        .buffered(criteria.max_concurrency.max(1))
        .collect()
        .await;

    let validated = outcomes.iter().filter(|o| o.is_validated()).count();
    info!(
        validated,
        excluded = outcomes.len() - validated,
        "Universe validation complete"
    );
    outcomes
}
