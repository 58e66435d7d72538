//! Stage trait and pipeline step definitions
//!
//! A stage reads the session state it is handed and returns payloads for
//! its declared keys. It never writes the state itself.

use crate::session::{SessionKey, SessionState, StagePayload};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Payloads produced by one stage execution
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub writes: Vec<(SessionKey, StagePayload)>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: SessionKey, payload: StagePayload) -> Self {
        Self::new().with(key, payload)
    }

    pub fn with(mut self, key: SessionKey, payload: StagePayload) -> Self {
        self.writes.push((key, payload));
        self
    }
}

/// One unit of pipeline work
///
/// Expected data failures belong in the returned payloads. Returning `Err`
/// (or panicking) is treated as a stage failure and recorded against every
/// declared key.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Keys this stage owns; it may write no others
    fn output_keys(&self) -> &[SessionKey];

    async fn execute(&self, state: &SessionState) -> anyhow::Result<StageOutput>;
}

/// Element of a stage sequence
#[derive(Clone)]
pub enum PipelineStep {
    /// Runs alone against the current state
    Serial(Arc<dyn Stage>),
    /// Members run concurrently against one snapshot and merge together
    Parallel {
        name: String,
        stages: Vec<Arc<dyn Stage>>,
    },
}

impl PipelineStep {
    pub fn serial(stage: impl Stage + 'static) -> Self {
        PipelineStep::Serial(Arc::new(stage))
    }

    pub fn parallel(name: impl Into<String>, stages: Vec<Arc<dyn Stage>>) -> Self {
        PipelineStep::Parallel {
            name: name.into(),
            stages,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PipelineStep::Serial(stage) => stage.name(),
            PipelineStep::Parallel { name, .. } => name,
        }
    }

    pub fn stages(&self) -> Vec<Arc<dyn Stage>> {
        match self {
            PipelineStep::Serial(stage) => vec![stage.clone()],
            PipelineStep::Parallel { stages, .. } => stages.clone(),
        }
    }
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.stages().iter().map(|s| s.name().to_string()).collect();
        match self {
            PipelineStep::Serial(_) => write!(f, "Serial({})", members.join(", ")),
            PipelineStep::Parallel { name, .. } => {
                write!(f, "Parallel {}[{}]", name, members.join(", "))
            }
        }
    }
}
