//! Market sentiment stage

use crate::collaborators::{external_error, SentimentProvider};
use crate::session::{SessionKey, SessionState, StagePayload};
use crate::stage::{Stage, StageOutput};
use async_trait::async_trait;
use data_ingestion::{with_retry, RetryPolicy};
use std::sync::Arc;
use tracing::{info, warn};

/// Delegates sentiment to an external provider under the retry policy
pub struct SentimentAgent {
    provider: Arc<dyn SentimentProvider>,
    retry: RetryPolicy,
}

impl SentimentAgent {
    pub fn new(provider: Arc<dyn SentimentProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }
}

#[async_trait]
impl Stage for SentimentAgent {
    fn name(&self) -> &str {
        "sentiment"
    }

    fn output_keys(&self) -> &[SessionKey] {
        &[SessionKey::MarketSentimentAnalysis]
    }

    async fn execute(&self, state: &SessionState) -> anyhow::Result<StageOutput> {
        let tickers = match state.universe() {
            Ok(universe) => universe.tickers(),
            Err(err) => {
                warn!(error = %err, "Skipping sentiment, universe unavailable");
                return Ok(StageOutput::single(SessionKey::MarketSentimentAnalysis, err.into()));
            }
        };

        let name = self.provider.name();
        let result = with_retry(&self.retry, name, || self.provider.analyze(&tickers)).await;

        let payload = match result {
            Ok(document) => {
                info!(provider = name, tickers = tickers.len(), "Sentiment analysis complete");
                StagePayload::External(document)
            }
            Err(err) => {
                warn!(provider = name, error = %err, "Sentiment provider failed");
                external_error(name, &err).into()
            }
        };

        Ok(StageOutput::single(SessionKey::MarketSentimentAnalysis, payload))
    }
}
