//! Fundamental analysis stage

use crate::session::{SessionKey, SessionState, StagePayload};
use crate::stage::{Stage, StageOutput};
use analytics::{compute_fundamentals_batch, FundamentalOptions};
use async_trait::async_trait;
use data_ingestion::MarketDataSource;
use std::sync::Arc;
use tracing::{info, warn};

pub struct FundamentalsAgent {
    source: Arc<dyn MarketDataSource>,
    options: FundamentalOptions,
}

impl FundamentalsAgent {
    pub fn new(source: Arc<dyn MarketDataSource>, options: FundamentalOptions) -> Self {
        Self { source, options }
    }
}

#[async_trait]
impl Stage for FundamentalsAgent {
    fn name(&self) -> &str {
        "fundamentals"
    }

    fn output_keys(&self) -> &[SessionKey] {
        &[SessionKey::FundamentalAnalysis]
    }

    async fn execute(&self, state: &SessionState) -> anyhow::Result<StageOutput> {
        let universe = match state.universe() {
            Ok(universe) => universe,
            Err(err) => {
                warn!(error = %err, "Skipping fundamentals, universe unavailable");
                return Ok(StageOutput::single(SessionKey::FundamentalAnalysis, err.into()));
            }
        };

        let tickers: Vec<(String, Option<f64>)> = universe
            .validated
            .iter()
            .map(|v| (v.ticker.clone(), v.market_cap))
            .collect();
        let records = compute_fundamentals_batch(self.source.as_ref(), &tickers, &self.options).await;

        let failed = records.iter().filter(|r| r.result.is_err()).count();
        info!(tickers = records.len(), failed, "Fundamental analysis complete");
        Ok(StageOutput::single(
            SessionKey::FundamentalAnalysis,
            StagePayload::Fundamentals(records),
        ))
    }
}
