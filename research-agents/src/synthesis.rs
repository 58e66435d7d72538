//! Session digest synthesizer
//!
//! Summarizes a finished session without any text generation: which keys
//! hold data, which hold errors, and the validated tickers whose fundamentals
//! and technicals both came through, ranked by ROIC.

use crate::collaborators::Synthesizer;
use crate::session::{SessionKey, SessionState, StagePayload};
use async_trait::async_trait;
use common::{MetricValue, ServiceError};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub ticker: String,
    pub roic: MetricValue,
    pub fcf_yield: MetricValue,
    pub debt_to_equity: MetricValue,
    pub sharpe_ratio: MetricValue,
    pub max_drawdown: MetricValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDigest {
    pub run_id: String,
    pub validated: Vec<String>,
    pub excluded: Vec<String>,
    /// `"ok"` or the error message per key
    pub stages: BTreeMap<SessionKey, String>,
    pub candidates: Vec<Candidate>,
}

pub struct DigestSynthesizer;

impl DigestSynthesizer {
    pub fn digest(state: &SessionState) -> SessionDigest {
        let stages = SessionKey::ALL
            .iter()
            .filter_map(|key| {
                let status = match state.get(*key)? {
                    StagePayload::Error(err) => err.to_string(),
                    _ => "ok".to_string(),
                };
                Some((*key, status))
            })
            .collect();

        let (validated, excluded) = match state.universe() {
            Ok(report) => (
                report.tickers(),
                report.excluded.iter().map(|e| e.ticker.clone()).collect(),
            ),
            Err(_) => (Vec::new(), Vec::new()),
        };

        let mut candidates: Vec<Candidate> = validated
            .iter()
            .filter_map(|ticker| candidate(state, ticker))
            .collect();
        candidates.sort_by(|a, b| {
            let a = a.roic.value().unwrap_or(f64::NEG_INFINITY);
            let b = b.roic.value().unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        });

        SessionDigest {
            run_id: state.run_id.to_string(),
            validated,
            excluded,
            stages,
            candidates,
        }
    }
}

fn candidate(state: &SessionState, ticker: &str) -> Option<Candidate> {
    let fundamentals = match state.get(SessionKey::FundamentalAnalysis)? {
        StagePayload::Fundamentals(records) => records.iter().find(|r| r.ticker == ticker)?,
        _ => return None,
    };
    let technicals = match state.get(SessionKey::TechnicalAnalysis)? {
        StagePayload::Technicals(records) => records.iter().find(|r| r.ticker == ticker)?,
        _ => return None,
    };

    let report = fundamentals.result.as_ref().ok()?;
    let metrics = technicals.result.as_ref().ok()?;
    let ratio = |value: Option<MetricValue>| value.unwrap_or(MetricValue::Undefined);

    Some(Candidate {
        ticker: ticker.to_string(),
        roic: ratio(report.roic.as_ref().ok().map(|r| r.roic)),
        fcf_yield: ratio(report.fcf_yield.as_ref().ok().map(|r| r.fcf_yield)),
        debt_to_equity: ratio(report.debt_to_equity.as_ref().ok().map(|r| r.debt_to_equity)),
        sharpe_ratio: metrics.sharpe_ratio,
        max_drawdown: metrics.max_drawdown,
    })
}

#[async_trait]
impl Synthesizer for DigestSynthesizer {
    fn name(&self) -> &str {
        "session-digest"
    }

    async fn synthesize(&self, state: &SessionState) -> Result<serde_json::Value, ServiceError> {
        serde_json::to_value(Self::digest(state)).map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}
