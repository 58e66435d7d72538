//! Pipeline controller
//!
//! Executes a stage sequence against one session state:
//! - Serial steps run alone and observe every earlier output
//! - Parallel groups run concurrently on a shared snapshot taken at group
//!   entry; their outputs are merged together once every member finishes
//! - A failing or panicking stage becomes error payloads on its own keys
//!
//! Only controller-level conflicts (a key written twice, an undeclared key,
//! a lost task) abort the run.

use crate::session::{SessionKey, SessionState, StagePayload};
use crate::stage::{PipelineStep, Stage, StageOutput};
use common::ErrorInfo;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the pipeline controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of parallel-group members running at once
    pub max_concurrent_stages: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_stages: 8,
        }
    }
}

/// Fatal controller fault, carrying the run context
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage '{stage}' wrote key '{key}' which already has a value (run {run_id}, state version {version})")]
    DuplicateKey {
        stage: String,
        key: SessionKey,
        run_id: Uuid,
        version: u64,
    },

    #[error("stage '{stage}' wrote undeclared key '{key}' (run {run_id}, state version {version})")]
    UndeclaredKey {
        stage: String,
        key: SessionKey,
        run_id: Uuid,
        version: u64,
    },

    #[error("controller failure in step '{step}' (run {run_id}, state version {version}): {message}")]
    Crash {
        step: String,
        run_id: Uuid,
        version: u64,
        message: String,
    },
}

impl PipelineError {
    /// Stage or step the fault is attributed to
    pub fn stage(&self) -> &str {
        match self {
            PipelineError::DuplicateKey { stage, .. } | PipelineError::UndeclaredKey { stage, .. } => {
                stage
            }
            PipelineError::Crash { step, .. } => step,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            PipelineError::DuplicateKey { version, .. }
            | PipelineError::UndeclaredKey { version, .. }
            | PipelineError::Crash { version, .. } => *version,
        }
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed(SessionState),
    /// Cancelled between or during steps; holds everything merged before that
    Cancelled(SessionState),
}

impl RunOutcome {
    pub fn state(&self) -> &SessionState {
        match self {
            RunOutcome::Completed(state) | RunOutcome::Cancelled(state) => state,
        }
    }

    pub fn into_state(self) -> SessionState {
        match self {
            RunOutcome::Completed(state) | RunOutcome::Cancelled(state) => state,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled(_))
    }
}

type StageResult = Result<anyhow::Result<StageOutput>, Box<dyn Any + Send>>;

/// A payload on its way into the session state
struct KeyWrite {
    stage: String,
    key: SessionKey,
    payload: StagePayload,
}

/// Pipeline controller
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(steps: Vec<PipelineStep>, config: PipelineConfig) -> Self {
        Self { steps, config }
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Run every step to completion
    pub async fn run(&self, tickers: Vec<String>) -> Result<SessionState, PipelineError> {
        self.run_until(tickers, std::future::pending::<()>())
            .await
            .map(RunOutcome::into_state)
    }

    /// Run until every step finishes or `cancel` resolves
    ///
    /// Cancelling drops in-flight stage work; outputs merged before that
    /// point are kept as-is.
    pub async fn run_until<C>(
        &self,
        tickers: Vec<String>,
        cancel: C,
    ) -> Result<RunOutcome, PipelineError>
    where
        C: Future<Output = ()>,
    {
        let mut state = SessionState::new(tickers);
        tokio::pin!(cancel);

        info!(
            run_id = %state.run_id,
            steps = self.steps.len(),
            tickers = state.tickers.len(),
            "Pipeline run started"
        );

        for step in &self.steps {
            let step_result = tokio::select! {
                biased;
                _ = &mut cancel => None,
                writes = self.run_step(step, &state) => Some(writes),
            };

            let Some(writes) = step_result else {
                warn!(
                    run_id = %state.run_id,
                    step = step.name(),
                    version = state.version,
                    "Run cancelled, keeping merged state"
                );
                return Ok(RunOutcome::Cancelled(state));
            };

            merge(&mut state, writes?)?;
            debug!(
                run_id = %state.run_id,
                step = step.name(),
                version = state.version,
                "Step merged"
            );
        }

        let failed = state.failed_keys();
        info!(
            run_id = %state.run_id,
            version = state.version,
            failed_keys = failed.len(),
            "Pipeline run completed"
        );
        Ok(RunOutcome::Completed(state))
    }

    async fn run_step(
        &self,
        step: &PipelineStep,
        state: &SessionState,
    ) -> Result<Vec<KeyWrite>, PipelineError> {
        match step {
            PipelineStep::Serial(stage) => {
                info!(stage = stage.name(), "Running stage");
                let result = AssertUnwindSafe(stage.execute(state)).catch_unwind().await;
                settle(stage.as_ref(), result, state)
            }
            PipelineStep::Parallel { name, stages } => {
                self.run_group(name, stages, state).await
            }
        }
    }

    async fn run_group(
        &self,
        name: &str,
        stages: &[Arc<dyn Stage>],
        state: &SessionState,
    ) -> Result<Vec<KeyWrite>, PipelineError> {
        info!(group = name, members = stages.len(), "Running parallel group");

        let crash = |message: String| PipelineError::Crash {
            step: name.to_string(),
            run_id: state.run_id,
            version: state.version,
            message,
        };

        let snapshot = Arc::new(state.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_stages.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, stage) in stages.iter().enumerate() {
            let stage = stage.clone();
            let snapshot = snapshot.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                debug!(stage = stage.name(), "Group member started");
                let result = AssertUnwindSafe(stage.execute(&snapshot)).catch_unwind().await;
                (idx, result)
            });
        }

        // Merge only after every member has finished
        let mut results: Vec<Option<StageResult>> = stages.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (idx, result) = joined.map_err(|e| crash(format!("group member lost: {}", e)))?;
            results[idx] = Some(result);
        }

        let mut writes = Vec::new();
        for (stage, result) in stages.iter().zip(results) {
            let result = result
                .ok_or_else(|| crash(format!("no result from stage '{}'", stage.name())))?;
            writes.extend(settle(stage.as_ref(), result, state)?);
        }
        Ok(writes)
    }
}

/// Turn one stage's result into key writes, isolating stage failures
fn settle(
    stage: &dyn Stage,
    result: StageResult,
    state: &SessionState,
) -> Result<Vec<KeyWrite>, PipelineError> {
    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            warn!(stage = stage.name(), error = %format!("{:#}", err), "Stage failed");
            let message = format!("stage '{}' failed: {:#}", stage.name(), err);
            return Ok(failure_writes(stage, &message));
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(stage = stage.name(), panic = %reason, "Stage panicked");
            let message = format!("stage '{}' panicked: {}", stage.name(), reason);
            return Ok(failure_writes(stage, &message));
        }
    };

    let declared = stage.output_keys();
    let mut seen = HashSet::new();
    let mut writes = Vec::with_capacity(declared.len());

    for (key, payload) in output.writes {
        if !declared.contains(&key) {
            return Err(PipelineError::UndeclaredKey {
                stage: stage.name().to_string(),
                key,
                run_id: state.run_id,
                version: state.version,
            });
        }
        if !seen.insert(key) {
            return Err(PipelineError::DuplicateKey {
                stage: stage.name().to_string(),
                key,
                run_id: state.run_id,
                version: state.version,
            });
        }
        writes.push(KeyWrite {
            stage: stage.name().to_string(),
            key,
            payload,
        });
    }

    for key in declared.iter().filter(|key| !seen.contains(*key)) {
        warn!(stage = stage.name(), key = %key, "Stage left a declared key empty");
        writes.push(KeyWrite {
            stage: stage.name().to_string(),
            key: *key,
            payload: ErrorInfo::stage_failure(format!(
                "stage '{}' produced no output for '{}'",
                stage.name(),
                key
            ))
            .into(),
        });
    }

    Ok(writes)
}

fn failure_writes(stage: &dyn Stage, message: &str) -> Vec<KeyWrite> {
    stage
        .output_keys()
        .iter()
        .map(|key| KeyWrite {
            stage: stage.name().to_string(),
            key: *key,
            payload: ErrorInfo::stage_failure(message).into(),
        })
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Apply all writes of one step, or none of them
fn merge(state: &mut SessionState, writes: Vec<KeyWrite>) -> Result<(), PipelineError> {
    let mut pending = HashSet::new();
    for write in &writes {
        if state.contains(write.key) || !pending.insert(write.key) {
            return Err(PipelineError::DuplicateKey {
                stage: write.stage.clone(),
                key: write.key,
                run_id: state.run_id,
                version: state.version,
            });
        }
    }

    for write in writes {
        state.entries.insert(write.key, write.payload);
    }
    state.version += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::ErrorKind;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writes a fixed payload after an optional delay and records what it saw
    struct ProbeStage {
        name: String,
        keys: Vec<SessionKey>,
        delay: Duration,
        observed: Arc<Mutex<Vec<(Vec<SessionKey>, u64)>>>,
    }

    impl ProbeStage {
        fn new(name: &str, keys: &[SessionKey]) -> Self {
            Self {
                name: name.to_string(),
                keys: keys.to_vec(),
                delay: Duration::ZERO,
                observed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Stage for ProbeStage {
        fn name(&self) -> &str {
            &self.name
        }

        fn output_keys(&self) -> &[SessionKey] {
            &self.keys
        }

        async fn execute(&self, state: &SessionState) -> anyhow::Result<StageOutput> {
            let seen: Vec<SessionKey> = state.entries.keys().copied().collect();
            self.observed.lock().unwrap().push((seen, state.version));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut output = StageOutput::new();
            for key in &self.keys {
                output = output.with(*key, StagePayload::External(serde_json::json!({ "by": self.name })));
            }
            Ok(output)
        }
    }

    enum Misbehaviour {
        Fail,
        Panic,
        WriteUndeclared,
        WriteTwice,
        WriteNothing,
    }

    struct BrokenStage {
        keys: Vec<SessionKey>,
        mode: Misbehaviour,
    }

    #[async_trait]
    impl Stage for BrokenStage {
        fn name(&self) -> &str {
            "broken"
        }

        fn output_keys(&self) -> &[SessionKey] {
            &self.keys
        }

        async fn execute(&self, _state: &SessionState) -> anyhow::Result<StageOutput> {
            let payload = || StagePayload::External(serde_json::json!({}));
            match self.mode {
                Misbehaviour::Fail => Err(anyhow::anyhow!("price feed offline")),
                Misbehaviour::Panic => panic!("index out of range"),
                Misbehaviour::WriteUndeclared => {
                    Ok(StageOutput::single(SessionKey::PortfolioAllocation, payload()))
                }
                Misbehaviour::WriteTwice => Ok(StageOutput::single(self.keys[0], payload())
                    .with(self.keys[0], payload())),
                Misbehaviour::WriteNothing => Ok(StageOutput::new()),
            }
        }
    }

    fn broken(key: SessionKey, mode: Misbehaviour) -> Arc<dyn Stage> {
        Arc::new(BrokenStage {
            keys: vec![key],
            mode,
        })
    }

    fn tickers() -> Vec<String> {
        vec!["CAT".to_string(), "NEE".to_string()]
    }

    #[tokio::test]
    async fn test_serial_then_parallel_ordering() {
        let universe = ProbeStage::new("universe", &[SessionKey::UniverseDefinition]);
        let fundamentals = ProbeStage::new("fundamentals", &[SessionKey::FundamentalAnalysis]);
        let technicals = ProbeStage::new("technicals", &[SessionKey::TechnicalAnalysis]);
        let portfolio = ProbeStage::new("portfolio", &[SessionKey::PortfolioAllocation]);
        let fundamentals_seen = fundamentals.observed.clone();
        let technicals_seen = technicals.observed.clone();
        let portfolio_seen = portfolio.observed.clone();

        let pipeline = Pipeline::new(
            vec![
                PipelineStep::serial(universe),
                PipelineStep::parallel(
                    "analysis",
                    vec![Arc::new(fundamentals), Arc::new(technicals)],
                ),
                PipelineStep::serial(portfolio),
            ],
            PipelineConfig::default(),
        );

        let state = pipeline.run(tickers()).await.unwrap();
        assert_eq!(state.version, 3);
        assert_eq!(state.entries.len(), 4);

        // Both members saw only the universe, at the same version
        for seen in [&fundamentals_seen, &technicals_seen] {
            let seen = seen.lock().unwrap();
            assert_eq!(seen[0], (vec![SessionKey::UniverseDefinition], 1));
        }
        let seen = portfolio_seen.lock().unwrap();
        assert_eq!(seen[0].0.len(), 3);
        assert_eq!(seen[0].1, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_members_run_concurrently() {
        let slow_a = ProbeStage::new("a", &[SessionKey::FundamentalAnalysis])
            .delayed(Duration::from_secs(10));
        let slow_b = ProbeStage::new("b", &[SessionKey::TechnicalAnalysis])
            .delayed(Duration::from_secs(10));
        let pipeline = Pipeline::new(
            vec![PipelineStep::parallel("analysis", vec![Arc::new(slow_a), Arc::new(slow_b)])],
            PipelineConfig::default(),
        );

        let start = tokio::time::Instant::now();
        pipeline.run(tickers()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_failing_member_does_not_affect_sibling() {
        for mode in [Misbehaviour::Fail, Misbehaviour::Panic] {
            let pipeline = Pipeline::new(
                vec![PipelineStep::parallel(
                    "analysis",
                    vec![
                        Arc::new(ProbeStage::new("fundamentals", &[SessionKey::FundamentalAnalysis])),
                        broken(SessionKey::TechnicalAnalysis, mode),
                    ],
                )],
                PipelineConfig::default(),
            );

            let state = pipeline.run(tickers()).await.unwrap();
            let fundamentals = state.get(SessionKey::FundamentalAnalysis).unwrap();
            assert!(!fundamentals.is_error());

            let err = state.get(SessionKey::TechnicalAnalysis).unwrap().error().unwrap();
            assert_eq!(err.kind, ErrorKind::StageFailure);
            assert!(err.message.contains("broken"));
        }
    }

    #[tokio::test]
    async fn test_missing_declared_key_is_filled() {
        let pipeline = Pipeline::new(
            vec![PipelineStep::Serial(broken(
                SessionKey::MarketSentimentAnalysis,
                Misbehaviour::WriteNothing,
            ))],
            PipelineConfig::default(),
        );
        let state = pipeline.run(tickers()).await.unwrap();
        assert!(state.get(SessionKey::MarketSentimentAnalysis).unwrap().is_error());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_fatal() {
        let pipeline = Pipeline::new(
            vec![
                PipelineStep::serial(ProbeStage::new("first", &[SessionKey::UniverseDefinition])),
                PipelineStep::serial(ProbeStage::new("second", &[SessionKey::UniverseDefinition])),
            ],
            PipelineConfig::default(),
        );

        let err = pipeline.run(tickers()).await.unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { .. }));
        assert_eq!(err.stage(), "second");
        assert_eq!(err.version(), 1);

        let pipeline = Pipeline::new(
            vec![PipelineStep::Serial(broken(
                SessionKey::TechnicalAnalysis,
                Misbehaviour::WriteTwice,
            ))],
            PipelineConfig::default(),
        );
        assert!(matches!(
            pipeline.run(tickers()).await,
            Err(PipelineError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_group_merge_is_atomic() {
        let pipeline = Pipeline::new(
            vec![PipelineStep::parallel(
                "clash",
                vec![
                    Arc::new(ProbeStage::new("left", &[SessionKey::TechnicalAnalysis])),
                    Arc::new(ProbeStage::new("right", &[SessionKey::TechnicalAnalysis])),
                ],
            )],
            PipelineConfig::default(),
        );
        let err = pipeline.run(tickers()).await.unwrap_err();
        assert_eq!(err.stage(), "right");
        assert_eq!(err.version(), 0);
    }

    #[tokio::test]
    async fn test_undeclared_key_is_fatal() {
        let pipeline = Pipeline::new(
            vec![PipelineStep::Serial(broken(
                SessionKey::TechnicalAnalysis,
                Misbehaviour::WriteUndeclared,
            ))],
            PipelineConfig::default(),
        );
        let err = pipeline.run(tickers()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UndeclaredKey { key: SessionKey::PortfolioAllocation, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_keeps_merged_state() {
        let pipeline = Pipeline::new(
            vec![
                PipelineStep::serial(ProbeStage::new("universe", &[SessionKey::UniverseDefinition])),
                PipelineStep::serial(
                    ProbeStage::new("slow", &[SessionKey::TechnicalAnalysis])
                        .delayed(Duration::from_secs(60)),
                ),
            ],
            PipelineConfig::default(),
        );

        let outcome = pipeline
            .run_until(tickers(), tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap();

        assert!(outcome.is_cancelled());
        let state = outcome.into_state();
        assert!(state.contains(SessionKey::UniverseDefinition));
        assert!(!state.contains(SessionKey::TechnicalAnalysis));
        assert_eq!(state.version, 1);
    }
}
