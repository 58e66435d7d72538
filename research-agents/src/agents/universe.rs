//! Universe definition stage

use crate::session::{SessionKey, SessionState, StagePayload};
use crate::stage::{Stage, StageOutput};
use analytics::{validate_universe, UniverseCriteria, UniverseReport};
use async_trait::async_trait;
use data_ingestion::MarketDataSource;
use std::sync::Arc;
use tracing::info;

/// Gates the run's raw tickers into validated and excluded sets
pub struct UniverseAgent {
    source: Arc<dyn MarketDataSource>,
    criteria: UniverseCriteria,
}

impl UniverseAgent {
    pub fn new(source: Arc<dyn MarketDataSource>, criteria: UniverseCriteria) -> Self {
        Self { source, criteria }
    }
}

#[async_trait]
impl Stage for UniverseAgent {
    fn name(&self) -> &str {
        "universe"
    }

    fn output_keys(&self) -> &[SessionKey] {
        &[SessionKey::UniverseDefinition]
    }

    async fn execute(&self, state: &SessionState) -> anyhow::Result<StageOutput> {
        let outcomes = validate_universe(self.source.as_ref(), &state.tickers, &self.criteria).await;
        let report = UniverseReport::from_outcomes(outcomes);

        info!(
            source = self.source.name(),
            validated = report.validated.len(),
            excluded = report.excluded.len(),
            "Universe defined"
        );
        Ok(StageOutput::single(
            SessionKey::UniverseDefinition,
            StagePayload::Universe(report),
        ))
    }
}
