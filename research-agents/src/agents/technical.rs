//! Technical analysis stage

use crate::session::{SessionKey, SessionState, StagePayload};
use crate::stage::{Stage, StageOutput};
use analytics::{compute_technicals, daily_returns, TechnicalOptions};
use async_trait::async_trait;
use common::ReturnSeries;
use data_ingestion::{Interval, LookbackPeriod, MarketDataSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Technical stage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSettings {
    #[serde(flatten)]
    pub options: TechnicalOptions,

    /// Symbol whose returns serve as the market series for beta and R²
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<String>,
}

pub struct TechnicalAgent {
    source: Arc<dyn MarketDataSource>,
    settings: TechnicalSettings,
}

impl TechnicalAgent {
    pub fn new(source: Arc<dyn MarketDataSource>, settings: TechnicalSettings) -> Self {
        Self { source, settings }
    }

    /// Benchmark returns; a failed fetch yields an empty series
    async fn market_returns(&self) -> Option<ReturnSeries> {
        let benchmark = self.settings.benchmark.as_deref()?;
        let period: LookbackPeriod = self.settings.options.period.parse().ok()?;
        let interval: Interval = self.settings.options.interval.parse().ok()?;

        match self.source.fetch_prices(benchmark, period, interval).await {
            Ok(bars) => Some(daily_returns(&bars)),
            Err(err) => {
                warn!(benchmark, error = %err, "Benchmark unavailable, beta will be undefined");
                Some(ReturnSeries::new())
            }
        }
    }
}

#[async_trait]
impl Stage for TechnicalAgent {
    fn name(&self) -> &str {
        "technical"
    }

    fn output_keys(&self) -> &[SessionKey] {
        &[SessionKey::TechnicalAnalysis]
    }

    async fn execute(&self, state: &SessionState) -> anyhow::Result<StageOutput> {
        let universe = match state.universe() {
            Ok(universe) => universe,
            Err(err) => {
                warn!(error = %err, "Skipping technicals, universe unavailable");
                return Ok(StageOutput::single(SessionKey::TechnicalAnalysis, err.into()));
            }
        };

        let market = self.market_returns().await;
        let payload = match compute_technicals(
            self.source.as_ref(),
            &universe.tickers(),
            &self.settings.options,
            market.as_ref(),
        )
        .await
        {
            Ok(records) => {
                let failed = records.iter().filter(|r| r.result.is_err()).count();
                info!(tickers = records.len(), failed, "Technical analysis complete");
                StagePayload::Technicals(records)
            }
            Err(err) => {
                warn!(error = %err, "Technical batch failed");
                err.into()
            }
        };

        Ok(StageOutput::single(SessionKey::TechnicalAnalysis, payload))
    }
}
