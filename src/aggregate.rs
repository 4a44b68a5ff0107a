//! Aggregation functions and the `<integer><unit>` duration grammar used by
//! bucket sizes and retention settings.

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{series::PointValue, Error, Result, Time};

/// Parses `<integer><unit>` where unit is one of `s`, `m`, `h`, `d`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |reason| Error::InvalidDuration {
        input: input.to_string(),
        reason,
    };
    let trimmed = input.trim();
    let Some(unit) = trimmed.chars().last() else {
        return Err(invalid("empty"));
    };
    let digits = &trimmed[..trimmed.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected `<integer><unit>`"));
    }
    let amount: u64 = digits.parse().map_err(|_| invalid("amount out of range"))?;
    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(invalid("unit must be one of s, m, h, d")),
    };
    let secs = amount
        .checked_mul(scale)
        .ok_or_else(|| invalid("amount out of range"))?;
    Ok(Duration::from_secs(secs))
}

/// Width of a bucket in seconds; always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSize(Time);
impl BucketSize {
    pub fn from_secs(secs: Time) -> Option<Self> {
        (secs > 0).then_some(Self(secs))
    }

    pub fn secs(&self) -> Time {
        self.0
    }
    pub fn floor(&self, time: Time) -> Time {
        time - time.rem_euclid(self.0)
    }
}
impl FromStr for BucketSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let duration = parse_duration(s)?;
        let secs = Time::try_from(duration.as_secs()).ok();
        secs.and_then(Self::from_secs).ok_or(Error::InvalidDuration {
            input: s.to_string(),
            reason: "bucket size must be positive",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Min,
    Max,
    Sum,
    Count,
    First,
    Last,
}
impl Aggregation {
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
            Self::First => *values.first()?,
            Self::Last => *values.last()?,
        })
    }

    /// Collapses points into one, keeping the unit of the first. A count
    /// has no unit.
    pub fn reduce(&self, points: &[PointValue]) -> Option<PointValue> {
        let first = points.first()?;
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let value = self.apply(&values)?;
        let unit = match self {
            Self::Count => String::new(),
            _ => first.unit.clone(),
        };
        Some(PointValue { value, unit })
    }
}
impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "mean" | "avg" => Self::Mean,
            "min" => Self::Min,
            "max" => Self::Max,
            "sum" => Self::Sum,
            "count" => Self::Count,
            "first" => Self::First,
            "last" => Self::Last,
            _ => {
                return Err(Error::config(
                    "aggregation",
                    format!("unknown aggregation function `{s}`"),
                ))
            }
        })
    }
}
