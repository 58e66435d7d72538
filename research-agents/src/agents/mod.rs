//! Pipeline stages for a screening run
//!
//! The standard run gates the universe first, analyzes fundamentals,
//! sentiment and technicals in one parallel group, then hands everything to
//! the allocation synthesizer.

pub mod fundamentals;
pub mod portfolio;
pub mod sentiment;
pub mod technical;
pub mod universe;

pub use fundamentals::FundamentalsAgent;
pub use portfolio::PortfolioAgent;
pub use sentiment::SentimentAgent;
pub use technical::{TechnicalAgent, TechnicalSettings};
pub use universe::UniverseAgent;

use crate::collaborators::{SentimentProvider, Synthesizer};
use crate::config::ScreenerConfig;
use crate::orchestrator::Pipeline;
use crate::stage::{PipelineStep, Stage};
use data_ingestion::MarketDataSource;
use std::sync::Arc;

/// Name of the concurrent analysis group
pub const ANALYSIS_GROUP: &str = "analysis";

/// Universe, then {fundamentals, sentiment, technical}, then allocation
pub fn standard_pipeline(
    source: Arc<dyn MarketDataSource>,
    sentiment: Arc<dyn SentimentProvider>,
    synthesizer: Arc<dyn Synthesizer>,
    config: &ScreenerConfig,
) -> Pipeline {
    let analysis: Vec<Arc<dyn Stage>> = vec![
        Arc::new(FundamentalsAgent::new(source.clone(), config.fundamentals.clone())),
        Arc::new(SentimentAgent::new(sentiment, config.retry.clone())),
        Arc::new(TechnicalAgent::new(source.clone(), config.technicals.clone())),
    ];

    Pipeline::new(
        vec![
            PipelineStep::serial(UniverseAgent::new(source, config.universe.clone())),
            PipelineStep::parallel(ANALYSIS_GROUP, analysis),
            PipelineStep::serial(PortfolioAgent::new(synthesizer, config.retry.clone())),
        ],
        config.pipeline.clone(),
    )
}
