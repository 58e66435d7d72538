//! Portfolio allocation stage

use crate::collaborators::{external_error, Synthesizer};
use crate::session::{SessionKey, SessionState, StagePayload};
use crate::stage::{Stage, StageOutput};
use async_trait::async_trait;
use data_ingestion::{with_retry, RetryPolicy};
use std::sync::Arc;
use tracing::{info, warn};

/// Hands the merged session to the synthesis collaborator
///
/// Error payloads on analysis keys are passed through for the synthesizer to
/// interpret; only a failed universe short-circuits the call.
pub struct PortfolioAgent {
    synthesizer: Arc<dyn Synthesizer>,
    retry: RetryPolicy,
}

impl PortfolioAgent {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, retry: RetryPolicy) -> Self {
        Self { synthesizer, retry }
    }
}

#[async_trait]
impl Stage for PortfolioAgent {
    fn name(&self) -> &str {
        "portfolio"
    }

    fn output_keys(&self) -> &[SessionKey] {
        &[SessionKey::PortfolioAllocation]
    }

    async fn execute(&self, state: &SessionState) -> anyhow::Result<StageOutput> {
        if let Err(err) = state.universe() {
            warn!(error = %err, "Skipping allocation, universe unavailable");
            return Ok(StageOutput::single(SessionKey::PortfolioAllocation, err.into()));
        }

        let failed = state.failed_keys();
        if !failed.is_empty() {
            warn!(?failed, "Synthesizing with failed upstream keys");
        }

        let name = self.synthesizer.name();
        let result = with_retry(&self.retry, name, || self.synthesizer.synthesize(state)).await;

        let payload = match result {
            Ok(document) => {
                info!(synthesizer = name, "Allocation synthesized");
                StagePayload::External(document)
            }
            Err(err) => {
                warn!(synthesizer = name, error = %err, "Synthesizer failed");
                external_error(name, &err).into()
            }
        };

        Ok(StageOutput::single(SessionKey::PortfolioAllocation, payload))
    }
}
