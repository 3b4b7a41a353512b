// EVTC - Event counter collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Counter payload parsing.
//!
//! Publishers hand over a loosely-typed key/value map. This module turns it
//! into a [`CounterPayload`] with named optional fields and then into a single
//! [`Observation`]. Parsing fails closed: anything that is not a map, or a
//! known field with the wrong type, is rejected.
//!
//! ## Counting policy
//!
//! | Payload | sum | count |
//! |---------|-----|-------|
//! | `CounterType = "Sum"` | `Increment` (else `Sum`) | 1 |
//! | `Mean` present | `Mean * Count` | `Count` (default 1) |
//! | `Sum` only | `Sum` | `Count` (default 1) |

use serde_json::{Map, Value};
use thiserror::Error;

/// Why a payload was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    /// Payload is a scalar, array or null
    #[error("payload is not a key/value map")]
    NotAMap,

    /// Neither `Name` nor `DisplayName` is present
    #[error("payload has no counter name")]
    MissingName,

    /// No `Mean`, `Sum` or `Increment`
    #[error("payload for counter '{0}' has no value field")]
    MissingValue(String),

    /// A known field holds the wrong type
    #[error("field '{field}' has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// How a counter reports its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Averaged over the publisher's interval
    Mean,
    /// Increment over the publisher's interval
    Sum,
}

impl CounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::Mean => "mean",
            CounterKind::Sum => "sum",
        }
    }
}

/// Recognized fields of a published counter payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterPayload {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub mean: Option<f64>,
    pub count: Option<u64>,
    pub sum: Option<f64>,
    pub increment: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub interval_sec: Option<f64>,
    pub counter_type: Option<String>,
}

/// One accepted contribution to a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub kind: CounterKind,
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

impl Observation {
    /// A single scalar sample
    pub fn single(value: f64) -> Self {
        Self {
            kind: CounterKind::Mean,
            sum: value,
            count: 1,
            min: value,
            max: value,
        }
    }
}

impl CounterPayload {
    /// Parse a raw payload. Unknown keys are ignored; known keys must have
    /// the expected type.
    pub fn parse(value: &Value) -> Result<Self, PayloadError> {
        let map = value.as_object().ok_or(PayloadError::NotAMap)?;

        Ok(Self {
            name: string_field(map, "Name")?,
            display_name: string_field(map, "DisplayName")?,
            mean: number_field(map, "Mean")?,
            count: count_field(map, "Count")?,
            sum: number_field(map, "Sum")?,
            increment: number_field(map, "Increment")?,
            min: number_field(map, "Min")?,
            max: number_field(map, "Max")?,
            interval_sec: number_field(map, "IntervalSec")?,
            counter_type: string_field(map, "CounterType")?,
        })
    }

    /// Name used to match against the registry
    pub fn counter_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.display_name.as_deref().filter(|n| !n.is_empty()))
    }

    pub fn kind(&self) -> CounterKind {
        match self.counter_type.as_deref() {
            Some("Sum") => CounterKind::Sum,
            Some(_) => CounterKind::Mean,
            None if self.mean.is_none() && self.increment.is_some() => CounterKind::Sum,
            None => CounterKind::Mean,
        }
    }

    /// Publisher declared a zero or negative interval
    pub fn declares_invalid_interval(&self) -> bool {
        self.interval_sec.map_or(false, |i| i <= 0.0)
    }

    /// Convert into the contribution this payload makes to its window.
    pub fn observation(&self) -> Result<Observation, PayloadError> {
        let name = self.counter_name().unwrap_or_default();

        let (kind, sum, count, value) = match self.kind() {
            CounterKind::Sum => {
                let value = self
                    .increment
                    .or(self.sum)
                    .ok_or_else(|| PayloadError::MissingValue(name.to_string()))?;
                (CounterKind::Sum, value, 1, value)
            }
            CounterKind::Mean => match (self.mean, self.sum) {
                (Some(mean), _) => {
                    let count = self.count.unwrap_or(1);
                    (CounterKind::Mean, mean * count as f64, count, mean)
                }
                (None, Some(sum)) => {
                    let count = self.count.unwrap_or(1);
                    let mean = if count > 0 { sum / count as f64 } else { 0.0 };
                    (CounterKind::Mean, sum, count, mean)
                }
                (None, None) => return Err(PayloadError::MissingValue(name.to_string())),
            },
        };

        Ok(Observation {
            kind,
            sum,
            count,
            min: self.min.unwrap_or(value),
            max: self.max.unwrap_or(value),
        })
    }
}

fn string_field(map: &Map<String, Value>, field: &'static str) -> Result<Option<String>, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(PayloadError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

fn number_field(map: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(PayloadError::InvalidField {
                field,
                value: v.to_string(),
            }),
        },
    }
}

fn count_field(map: &Map<String, Value>, field: &'static str) -> Result<Option<u64>, PayloadError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            if let Some(n) = v.as_u64() {
                return Ok(Some(n));
            }
            match v.as_f64() {
                Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => {
                    Ok(Some(n as u64))
                }
                _ => Err(PayloadError::InvalidField {
                    field,
                    value: v.to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_parse_rejects_non_map() {
        for value in [json!(42.0), json!("cpu"), json!([1, 2]), Value::Null] {
            assert_eq!(CounterPayload::parse(&value), Err(PayloadError::NotAMap));
        }
    }

    #[test]
    fn test_parse_mean_payload() {
        let payload = CounterPayload::parse(&json!({
            "Name": "cpu-usage",
            "DisplayName": "CPU Usage",
            "Mean": 12.5,
            "Count": 3,
            "Min": 10.0,
            "Max": 15.0,
            "IntervalSec": 1.0,
            "CounterType": "Mean",
            "Series": "Interval=1000"
        }))
        .unwrap();

        assert_eq!(payload.counter_name(), Some("cpu-usage"));
        assert_eq!(payload.kind(), CounterKind::Mean);

        let obs = payload.observation().unwrap();
        assert_relative_eq!(obs.sum, 37.5);
        assert_eq!(obs.count, 3);
        assert_relative_eq!(obs.min, 10.0);
        assert_relative_eq!(obs.max, 15.0);
    }

    #[test]
    fn test_mean_without_count_is_one_sample() {
        let payload = CounterPayload::parse(&json!({ "Name": "c", "Mean": 4.0 })).unwrap();
        assert_eq!(payload.observation().unwrap(), Observation::single(4.0));
    }

    #[test]
    fn test_zero_count_contributes_nothing() {
        let payload =
            CounterPayload::parse(&json!({ "Name": "c", "Mean": 0.0, "Count": 0 })).unwrap();
        let obs = payload.observation().unwrap();
        assert_eq!(obs.count, 0);
        assert_relative_eq!(obs.sum, 0.0);
    }

    #[test]
    fn test_sum_counter_uses_increment() {
        let payload = CounterPayload::parse(&json!({
            "Name": "requests",
            "Increment": 42.0,
            "CounterType": "Sum"
        }))
        .unwrap();
        assert_eq!(payload.kind(), CounterKind::Sum);

        let obs = payload.observation().unwrap();
        assert_eq!(obs.kind, CounterKind::Sum);
        assert_relative_eq!(obs.sum, 42.0);
        assert_eq!(obs.count, 1);
    }

    #[test]
    fn test_increment_without_type_is_sum() {
        let payload = CounterPayload::parse(&json!({ "Name": "c", "Increment": 2.0 })).unwrap();
        assert_eq!(payload.kind(), CounterKind::Sum);
    }

    #[test]
    fn test_pre_aggregated_sum() {
        let payload =
            CounterPayload::parse(&json!({ "Name": "c", "Sum": 10.0, "Count": 4 })).unwrap();
        let obs = payload.observation().unwrap();
        assert_eq!(obs.kind, CounterKind::Mean);
        assert_relative_eq!(obs.sum, 10.0);
        assert_eq!(obs.count, 4);
        assert_relative_eq!(obs.min, 2.5);
    }

    #[test]
    fn test_display_name_fallback() {
        let payload =
            CounterPayload::parse(&json!({ "DisplayName": "Working Set", "Mean": 1.0 })).unwrap();
        assert_eq!(payload.counter_name(), Some("Working Set"));

        let payload = CounterPayload::parse(&json!({ "Mean": 1.0 })).unwrap();
        assert_eq!(payload.counter_name(), None);
    }

    #[test]
    fn test_missing_value() {
        let payload = CounterPayload::parse(&json!({ "Name": "c" })).unwrap();
        assert_eq!(
            payload.observation(),
            Err(PayloadError::MissingValue("c".to_string()))
        );
    }

    #[test]
    fn test_invalid_field_types() {
        let result = CounterPayload::parse(&json!({ "Name": "c", "Mean": "fast" }));
        assert!(matches!(
            result,
            Err(PayloadError::InvalidField { field: "Mean", .. })
        ));

        let result = CounterPayload::parse(&json!({ "Name": 7, "Mean": 1.0 }));
        assert!(matches!(
            result,
            Err(PayloadError::InvalidField { field: "Name", .. })
        ));

        let result = CounterPayload::parse(&json!({ "Name": "c", "Mean": 1.0, "Count": -1 }));
        assert!(matches!(
            result,
            Err(PayloadError::InvalidField { field: "Count", .. })
        ));

        let result = CounterPayload::parse(&json!({ "Name": "c", "Mean": 1.0, "Count": 1.5 }));
        assert!(matches!(
            result,
            Err(PayloadError::InvalidField { field: "Count", .. })
        ));
    }

    #[test]
    fn test_float_count_accepted_when_integral() {
        let payload =
            CounterPayload::parse(&json!({ "Name": "c", "Mean": 2.0, "Count": 4.0 })).unwrap();
        assert_eq!(payload.count, Some(4));
    }

    #[test]
    fn test_declares_invalid_interval() {
        let payload =
            CounterPayload::parse(&json!({ "Name": "c", "Mean": 1.0, "IntervalSec": 0 })).unwrap();
        assert!(payload.declares_invalid_interval());

        let payload =
            CounterPayload::parse(&json!({ "Name": "c", "Mean": 1.0, "IntervalSec": 5 })).unwrap();
        assert!(!payload.declares_invalid_interval());
    }
}
