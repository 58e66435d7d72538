//! Technical metrics engine
//!
//! Return, risk and liquidity statistics over one price history per ticker.
//! Every field is always present: a metric that has no finite answer is
//! `Undefined`, and beta/R² are `NotRequested` when no market series exists.

use crate::stats;
use common::{outcome, ErrorInfo, MetricValue, PriceBar, ReturnSeries};
use data_ingestion::{Interval, LookbackPeriod, MarketDataSource};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
pub const MA_WINDOW: usize = 50;
pub const MA_SLOPE_LAG: usize = 10;
/// Overlapping observations required for beta and R²
pub const MIN_MARKET_OVERLAP: usize = 10;
const VAR_QUANTILE: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalOptions {
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_period() -> String {
    "1y".to_string()
}

fn default_interval() -> String {
    "1d".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for TechnicalOptions {
    fn default() -> Self {
        Self {
            period: default_period(),
            interval: default_interval(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalMetrics {
    pub observations: usize,
    pub annual_return: MetricValue,
    pub annual_volatility: MetricValue,
    pub sharpe_ratio: MetricValue,
    pub max_drawdown: MetricValue,
    #[serde(rename = "var_95")]
    pub value_at_risk_95: MetricValue,
    #[serde(rename = "es_95")]
    pub expected_shortfall_95: MetricValue,
    pub momentum_1m: MetricValue,
    pub momentum_3m: MetricValue,
    pub momentum_6m: MetricValue,
    pub slope_ma50: MetricValue,
    pub avg_dollar_volume: MetricValue,
    pub amihud_illiquidity: MetricValue,
    pub beta: MetricValue,
    pub r_squared: MetricValue,
}

/// Per-ticker technicals record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalRecord {
    pub ticker: String,
    #[serde(serialize_with = "outcome::serialize")]
    pub result: Result<TechnicalMetrics, ErrorInfo>,
}

/// Close-to-close returns keyed by the later bar's date
pub fn daily_returns(bars: &[PriceBar]) -> ReturnSeries {
    bars.windows(2)
        .map(|w| (w[1].date, w[1].close / w[0].close - 1.0))
        .collect()
}

/// Beta and R² against `market`, aligned on return dates
fn market_fit(bars: &[PriceBar], market: Option<&ReturnSeries>) -> (MetricValue, MetricValue) {
    let Some(market) = market else {
        return (MetricValue::NotRequested, MetricValue::NotRequested);
    };

    let (stock, index): (Vec<f64>, Vec<f64>) = daily_returns(bars)
        .into_iter()
        .filter_map(|(date, r)| market.get(&date).map(|m| (r, *m)))
        .filter(|(r, m)| r.is_finite() && m.is_finite())
        .unzip();

    if stock.len() < MIN_MARKET_OVERLAP {
        return (MetricValue::Undefined, MetricValue::Undefined);
    }

    let beta = match (stats::covariance(&stock, &index), stats::variance(&index)) {
        (Some(cov), Some(var)) if var != 0.0 => MetricValue::from_f64(cov / var),
        _ => MetricValue::Undefined,
    };
    let r_squared = MetricValue::from_option(stats::correlation(&stock, &index).map(|c| c * c));

    (beta, r_squared)
}

/// Compute every technical metric for one ordered price history
pub fn compute_stock_metrics(
    bars: &[PriceBar],
    market: Option<&ReturnSeries>,
) -> Result<TechnicalMetrics, ErrorInfo> {
    if bars.is_empty() {
        return Err(ErrorInfo::data_unavailable("empty price history"));
    }
    if bars.len() < 2 {
        return Err(ErrorInfo::computation(
            "insufficient data: need at least 2 price observations",
        ));
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let returns = stats::pct_returns(&closes);

    let first = closes[0];
    let last = closes[closes.len() - 1];
    let annual_return = last / first - 1.0;

    let volatility = stats::std_dev(&returns).map(|sd| sd * TRADING_DAYS_PER_YEAR.sqrt());
    let sharpe = match volatility {
        Some(vol) if vol != 0.0 => MetricValue::from_f64(annual_return / vol),
        _ => MetricValue::Undefined,
    };

    let var_95 = stats::quantile(&returns, VAR_QUANTILE);
    let es_95 = var_95.and_then(|var| {
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
        stats::mean(&tail)
    });

    let ma = stats::rolling_mean(&closes, MA_WINDOW);
    let slope_ma50 = ma
        .len()
        .checked_sub(1 + MA_SLOPE_LAG)
        .and_then(|lagged| Some(ma[ma.len() - 1]? - ma[lagged]?));

    let dollar_volume: Vec<f64> = bars.iter().map(|b| b.close * b.volume).collect();
    let amihud_terms: Vec<f64> = returns
        .iter()
        .zip(&dollar_volume[1..])
        .filter(|(r, dv)| **dv > 0.0 && r.is_finite())
        .map(|(r, dv)| r.abs() / dv)
        .collect();

    let (beta, r_squared) = market_fit(bars, market);

    Ok(TechnicalMetrics {
        observations: bars.len(),
        annual_return: MetricValue::from_f64(annual_return),
        annual_volatility: MetricValue::from_option(volatility),
        sharpe_ratio: sharpe,
        max_drawdown: MetricValue::from_option(stats::max_drawdown(&closes)),
        value_at_risk_95: MetricValue::from_option(var_95),
        expected_shortfall_95: MetricValue::from_option(es_95),
        momentum_1m: MetricValue::from_option(stats::pct_change_over(&closes, 21)),
        momentum_3m: MetricValue::from_option(stats::pct_change_over(&closes, 63)),
        momentum_6m: MetricValue::from_option(stats::pct_change_over(&closes, 126)),
        slope_ma50: MetricValue::from_option(slope_ma50),
        avg_dollar_volume: MetricValue::from_option(stats::mean(&dollar_volume)),
        amihud_illiquidity: MetricValue::from_option(stats::mean(&amihud_terms)),
        beta,
        r_squared,
    })
}

/// Technicals for every ticker, in input order
///
/// Fails as a whole only when the batch parameters are unusable.
pub async fn compute_technicals(
    source: &dyn MarketDataSource,
    tickers: &[String],
    options: &TechnicalOptions,
    market: Option<&ReturnSeries>,
) -> Result<Vec<TechnicalRecord>, ErrorInfo> {
    let period: LookbackPeriod = options
        .period
        .parse()
        .map_err(|e| ErrorInfo::computation(format!("technical batch setup failed: {}", e)))?;
    let interval: Interval = options
        .interval
        .parse()
        .map_err(|e| ErrorInfo::computation(format!("technical batch setup failed: {}", e)))?;
    if options.max_concurrency == 0 {
        return Err(ErrorInfo::computation(
            "technical batch setup failed: max_concurrency must be positive",
        ));
    }

    info!(
        tickers = tickers.len(),
        %period,
        %interval,
        with_market = market.is_some(),
        "Computing technicals"
    );

    let futures: Vec<_> = tickers
        .iter()
        .map(|ticker| async move {
            let result = match source.fetch_prices(ticker, period, interval).await {
                Ok(bars) => compute_stock_metrics(&bars, market),
                Err(err) => Err(ErrorInfo::from_service(
                    format!("price history for {}", ticker),
                    &err,
                )),
            };
            if let Err(err) = &result {
                warn!(ticker = %ticker, error = %err, "Technicals unavailable");
            }
            TechnicalRecord {
                ticker: ticker.clone(),
                result,
            }
        })
        .collect();
    let records = stream::iter(futures)
        .buffered(options.max_concurrency)
        .collect()
        .await;

    Ok(records)
}
