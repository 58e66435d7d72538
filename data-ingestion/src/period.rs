//! Lookback period and bar interval parsing (`"1y"`, `"6mo"`, `"1d"`, ...)

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("invalid lookback period: {0}")]
    InvalidPeriod(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),
}

/// How far back to fetch price history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LookbackPeriod {
    Days(u32),
    Months(u32),
    Years(u32),
    YearToDate,
    Max,
}

impl LookbackPeriod {
    /// First date included when the history ends on `end`; `None` means unbounded
    pub fn start_date(&self, end: NaiveDate) -> Option<NaiveDate> {
        match self {
            LookbackPeriod::Days(n) => end.checked_sub_days(chrono::Days::new(u64::from(*n))),
            LookbackPeriod::Months(n) => end.checked_sub_months(Months::new(*n)),
            LookbackPeriod::Years(n) => end.checked_sub_months(Months::new(n.saturating_mul(12))),
            LookbackPeriod::YearToDate => NaiveDate::from_ymd_opt(end.year(), 1, 1),
            LookbackPeriod::Max => None,
        }
    }
}

impl Default for LookbackPeriod {
    fn default() -> Self {
        LookbackPeriod::Years(1)
    }
}

impl FromStr for LookbackPeriod {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_lowercase();
        match raw.as_str() {
            "ytd" => return Ok(LookbackPeriod::YearToDate),
            "max" => return Ok(LookbackPeriod::Max),
            _ => {}
        }

        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| PeriodError::InvalidPeriod(s.to_string()))?;
        let (count, unit) = raw.split_at(split);
        let count: u32 = count
            .parse()
            .map_err(|_| PeriodError::InvalidPeriod(s.to_string()))?;
        if count == 0 {
            return Err(PeriodError::InvalidPeriod(s.to_string()));
        }

        match unit {
            "d" => Ok(LookbackPeriod::Days(count)),
            "mo" => Ok(LookbackPeriod::Months(count)),
            "y" => Ok(LookbackPeriod::Years(count)),
            _ => Err(PeriodError::InvalidPeriod(s.to_string())),
        }
    }
}

impl TryFrom<String> for LookbackPeriod {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LookbackPeriod> for String {
    fn from(value: LookbackPeriod) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LookbackPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookbackPeriod::Days(n) => write!(f, "{}d", n),
            LookbackPeriod::Months(n) => write!(f, "{}mo", n),
            LookbackPeriod::Years(n) => write!(f, "{}y", n),
            LookbackPeriod::YearToDate => f.write_str("ytd"),
            LookbackPeriod::Max => f.write_str("max"),
        }
    }
}

/// Bar size of a price history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Interval {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" => Ok(Interval::Daily),
            "1wk" => Ok(Interval::Weekly),
            "1mo" => Ok(Interval::Monthly),
            _ => Err(PeriodError::InvalidInterval(s.to_string())),
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = PeriodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Daily => f.write_str("1d"),
            Interval::Weekly => f.write_str("1wk"),
            Interval::Monthly => f.write_str("1mo"),
        }
    }
}
