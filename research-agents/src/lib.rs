//! Screening Pipeline - Layer 2
//!
//! This crate runs the equity screening workflow:
//! - `SessionState`, the keyed store each run accumulates
//! - `Stage` and `Pipeline`, serial steps and parallel groups over one snapshot
//! - Stages for universe gating, fundamentals, technicals, sentiment and allocation
//! - Collaborator ports for sentiment scoring and synthesis
//! - `ScreenerConfig`, TOML plus environment configuration

pub mod agents;
pub mod collaborators;
pub mod config;
pub mod orchestrator;
pub mod sentiment;
pub mod session;
pub mod stage;
pub mod synthesis;

// Re-export commonly used types
pub use agents::{standard_pipeline, TechnicalSettings};
pub use collaborators::{SentimentProvider, Synthesizer};
pub use crate::config::{load_config, ConfigError, ScreenerConfig};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineError, RunOutcome};
pub use sentiment::{HeadlineSentimentProvider, SentimentConfig, Verdict};
pub use session::{SessionKey, SessionState, StagePayload};
pub use stage::{PipelineStep, Stage, StageOutput};
pub use synthesis::DigestSynthesizer;
