//! Metric values with an explicit undefined marker

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Round to 4 decimal places for external consumption
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A computed metric
///
/// Full precision is kept in memory; serialization rounds to 4 decimals.
/// A metric is never dropped from a record, it becomes `Undefined` instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Value(f64),
    /// Computation was attempted but has no finite answer (zero volatility, too few points)
    Undefined,
    /// The caller did not ask for this metric (no market series supplied)
    NotRequested,
}

impl MetricValue {
    /// Finite numbers become `Value`, NaN and infinities become `Undefined`
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            MetricValue::Value(value)
        } else {
            MetricValue::Undefined
        }
    }

    pub fn from_option(value: Option<f64>) -> Self {
        value.map_or(MetricValue::Undefined, MetricValue::from_f64)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, MetricValue::Undefined)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::from_f64(value)
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Value(v) => serializer.serialize_f64(round4(*v)),
            MetricValue::Undefined => serializer.serialize_str("undefined"),
            MetricValue::NotRequested => serializer.serialize_none(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMetric {
    Number(f64),
    Marker(String),
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<RawMetric>::deserialize(deserializer)? {
            None => Ok(MetricValue::NotRequested),
            Some(RawMetric::Number(v)) => Ok(MetricValue::from_f64(v)),
            Some(RawMetric::Marker(m)) if m == "undefined" => Ok(MetricValue::Undefined),
            Some(RawMetric::Marker(m)) => Err(serde::de::Error::custom(format!(
                "unknown metric marker: {}",
                m
            ))),
        }
    }
}
