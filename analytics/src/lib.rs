//! Deterministic screening engines (Layer 1)
//!
//! This crate turns fetched market data into verifiable numbers:
//! - Validation gate: liquidity and statement-coverage checks per ticker
//! - Fundamental engine: ROIC, FCF yield and debt-to-equity from statements
//! - Technical engine: return, risk and liquidity statistics from prices
//!
//! Every engine returns `Result<_, ErrorInfo>` per ticker so one bad symbol
//! never affects its siblings.

pub mod fundamentals;
pub mod stats;
pub mod technicals;
pub mod universe;

pub use fundamentals::{
    analyze_statements, compute_fundamentals, compute_fundamentals_batch, DebtToEquity,
    FcfYield, FundamentalOptions, FundamentalRecord, FundamentalReport, NormalizedTable, Roic,
};
pub use technicals::{
    compute_stock_metrics, compute_technicals, daily_returns, TechnicalMetrics, TechnicalOptions,
    TechnicalRecord,
};
pub use universe::{
    check_liquidity, check_statement_coverage, validate_universe, CheckKind, CheckResult,
    ExcludedTicker, UniverseCriteria, UniverseReport, ValidatedTicker, ValidationOutcome,
};
