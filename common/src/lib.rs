//! Shared types for the equity screening workspace
//!
//! Everything that crosses a crate boundary lives here:
//! - Market data records returned by data sources (prices, statements, symbol info, news)
//! - `ServiceError` for failed external calls
//! - `ErrorInfo`, the error payload carried as data through the pipeline
//! - `MetricValue`, a number or an explicit undefined marker

pub mod error;
pub mod market;
pub mod metric;

pub use error::{outcome, ErrorInfo, ErrorKind, ServiceError};
pub use market::{
    FinancialStatements, NewsArticle, PriceBar, ReturnSeries, StatementKind, StatementTable,
    SymbolInfo, TimeSeries,
};
pub use metric::{round4, MetricValue};

// Re-exported so downstream crates agree on the date type
pub use chrono::NaiveDate;
