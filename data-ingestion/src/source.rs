//! Market data source port
//!
//! Engines never talk to a vendor directly; they read through this trait so
//! connectors, fixtures and decorators are interchangeable.

use crate::period::{Interval, LookbackPeriod};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use common::{
    FinancialStatements, NewsArticle, ServiceError, StatementKind, StatementTable, SymbolInfo,
    TimeSeries,
};
use std::sync::Arc;

/// Fetch-by-symbol operations; any call may fail with a structured error
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Connector name for logs
    fn name(&self) -> &str;

    async fn fetch_symbol_info(&self, ticker: &str) -> Result<SymbolInfo, ServiceError>;

    /// One statement table; an empty table is a valid answer
    async fn fetch_statement(
        &self,
        ticker: &str,
        kind: StatementKind,
    ) -> Result<StatementTable, ServiceError>;

    /// All three statements, failing on the first failed fetch
    async fn fetch_statements(&self, ticker: &str) -> Result<FinancialStatements, ServiceError> {
        Ok(FinancialStatements {
            income: self.fetch_statement(ticker, StatementKind::Income).await?,
            balance: self.fetch_statement(ticker, StatementKind::Balance).await?,
            cashflow: self.fetch_statement(ticker, StatementKind::CashFlow).await?,
        })
    }

    /// Price history ordered oldest first
    async fn fetch_prices(
        &self,
        ticker: &str,
        period: LookbackPeriod,
        interval: Interval,
    ) -> Result<TimeSeries, ServiceError>;

    /// Recent headlines; sources without news return none
    async fn fetch_news(&self, _ticker: &str) -> Result<Vec<NewsArticle>, ServiceError> {
        Ok(Vec::new())
    }
}

/// Decorator applying a `RetryPolicy` to every call of the inner source
pub struct RetryingSource {
    inner: Arc<dyn MarketDataSource>,
    policy: RetryPolicy,
}

impl RetryingSource {
    pub fn new(inner: Arc<dyn MarketDataSource>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl MarketDataSource for RetryingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_symbol_info(&self, ticker: &str) -> Result<SymbolInfo, ServiceError> {
        let label = format!("symbol_info:{}", ticker);
        with_retry(&self.policy, &label, || self.inner.fetch_symbol_info(ticker)).await
    }

    async fn fetch_statement(
        &self,
        ticker: &str,
        kind: StatementKind,
    ) -> Result<StatementTable, ServiceError> {
        let label = format!("{:?}:{}", kind, ticker);
        with_retry(&self.policy, &label, || self.inner.fetch_statement(ticker, kind)).await
    }

    async fn fetch_prices(
        &self,
        ticker: &str,
        period: LookbackPeriod,
        interval: Interval,
    ) -> Result<TimeSeries, ServiceError> {
        let label = format!("prices:{}", ticker);
        with_retry(&self.policy, &label, || {
            self.inner.fetch_prices(ticker, period, interval)
        })
        .await
    }

    async fn fetch_news(&self, ticker: &str) -> Result<Vec<NewsArticle>, ServiceError> {
        let label = format!("news:{}", ticker);
        with_retry(&self.policy, &label, || self.inner.fetch_news(ticker)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::{Endpoint, FixtureSource, TickerFixture};
    use common::SymbolInfo;

    fn source_with_cat() -> FixtureSource {
        let source = FixtureSource::new();
        source.insert(
            "CAT",
            TickerFixture {
                info: Some(SymbolInfo {
                    ticker: "CAT".to_string(),
                    avg_volume: Some(3_000_000.0),
                    market_cap: Some(1.5e11),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        source
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_source_recovers_from_transient_failures() {
        let fixtures = Arc::new(source_with_cat());
        for _ in 0..2 {
            fixtures.fail_next(
                "CAT",
                Endpoint::SymbolInfo,
                ServiceError::Status {
                    status: 429,
                    message: "rate limited".to_string(),
                },
            );
        }

        let source = RetryingSource::new(fixtures.clone(), RetryPolicy::default());
        let info = source.fetch_symbol_info("CAT").await.unwrap();
        assert_eq!(info.avg_volume, Some(3_000_000.0));
        assert_eq!(fixtures.call_count("CAT", Endpoint::SymbolInfo), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_source_does_not_retry_not_found() {
        let fixtures = Arc::new(source_with_cat());
        let source = RetryingSource::new(fixtures.clone(), RetryPolicy::default());

        let err = source.fetch_symbol_info("ZZZZ").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
        assert_eq!(fixtures.call_count("ZZZZ", Endpoint::SymbolInfo), 1);
    }
}
