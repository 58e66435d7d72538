//! Market data ingestion - Layer 0
//!
//! This crate provides the data side of the screening pipeline:
//! - `MarketDataSource`, the fetch-by-symbol port every engine reads through
//! - `RetryPolicy` and `with_retry`, bounded exponential backoff for any external call
//! - `RetryingSource`, a decorator applying the policy to every fetch
//! - Connectors (currently the JSON fixture connector)

pub mod connectors;
pub mod period;
pub mod retry;
pub mod source;

pub use connectors::{Endpoint, FixtureSource, TickerFixture};
pub use period::{Interval, LookbackPeriod, PeriodError};
pub use retry::{with_retry, RetryPolicy, RetryPolicyError, Retryable};
pub use source::{MarketDataSource, RetryingSource};
