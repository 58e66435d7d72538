//! Session state shared by the stages of one pipeline run
//!
//! A fixed key namespace maps to stage payloads. Each key is written at most
//! once per run, and only the controller writes.

use analytics::{FundamentalRecord, TechnicalRecord, UniverseReport};
use common::ErrorInfo;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Output key of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKey {
    UniverseDefinition,
    FundamentalAnalysis,
    MarketSentimentAnalysis,
    TechnicalAnalysis,
    PortfolioAllocation,
}

impl SessionKey {
    pub const ALL: [SessionKey; 5] = [
        SessionKey::UniverseDefinition,
        SessionKey::FundamentalAnalysis,
        SessionKey::MarketSentimentAnalysis,
        SessionKey::TechnicalAnalysis,
        SessionKey::PortfolioAllocation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKey::UniverseDefinition => "universe_definition",
            SessionKey::FundamentalAnalysis => "fundamental_analysis",
            SessionKey::MarketSentimentAnalysis => "market_sentiment_analysis",
            SessionKey::TechnicalAnalysis => "technical_analysis",
            SessionKey::PortfolioAllocation => "portfolio_allocation",
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored under a session key
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StagePayload {
    Universe(UniverseReport),
    Fundamentals(Vec<FundamentalRecord>),
    Technicals(Vec<TechnicalRecord>),
    /// Opaque document produced by an external collaborator
    External(serde_json::Value),
    Error(ErrorInfo),
}

impl StagePayload {
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            StagePayload::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }
}

impl From<ErrorInfo> for StagePayload {
    fn from(err: ErrorInfo) -> Self {
        StagePayload::Error(err)
    }
}

/// Run-scoped mapping from output key to payload
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub run_id: Uuid,
    /// Raw symbols the run was started with
    pub tickers: Vec<String>,
    /// Number of merges applied so far
    pub version: u64,
    pub entries: BTreeMap<SessionKey, StagePayload>,
}

impl SessionState {
    pub fn new(tickers: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tickers,
            version: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: SessionKey) -> Option<&StagePayload> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Payload under `key`, or an upstream error when it is missing or failed
    pub fn require(&self, key: SessionKey) -> Result<&StagePayload, ErrorInfo> {
        match self.entries.get(&key) {
            None => Err(ErrorInfo::upstream(
                key.as_str(),
                &ErrorInfo::data_unavailable("no output recorded"),
            )),
            Some(StagePayload::Error(cause)) => Err(ErrorInfo::upstream(key.as_str(), cause)),
            Some(payload) => Ok(payload),
        }
    }

    /// Validated universe, for stages that depend on the gate
    pub fn universe(&self) -> Result<&UniverseReport, ErrorInfo> {
        match self.require(SessionKey::UniverseDefinition)? {
            StagePayload::Universe(report) => Ok(report),
            _ => Err(ErrorInfo::upstream(
                SessionKey::UniverseDefinition.as_str(),
                &ErrorInfo::data_unavailable("unexpected payload type"),
            )),
        }
    }

    /// Keys whose payload is an error marker
    pub fn failed_keys(&self) -> Vec<SessionKey> {
        self.entries
            .iter()
            .filter(|(_, payload)| payload.is_error())
            .map(|(key, _)| *key)
            .collect()
    }
}
