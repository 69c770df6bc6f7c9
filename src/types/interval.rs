// ABOUTME: Compact interval grammar parsing (`<n>d<n>h<n>m`).
// ABOUTME: IntervalSpec can only be built by parsing, so it is always valid.

use chrono::TimeDelta;
use serde::de::{self, Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIntervalError {
    #[error("invalid interval format {input:?}: expected a number before '{unit}'")]
    MissingNumber { input: String, unit: char },

    #[error("invalid interval format {input:?}: number without a unit")]
    MissingUnit { input: String },

    #[error("invalid interval format {input:?}: unknown unit '{unit}'")]
    UnknownUnit { input: String, unit: char },

    #[error("invalid interval format {input:?}: '{unit}' is repeated or out of d/h/m order")]
    OutOfOrder { input: String, unit: char },

    #[error("invalid interval format {input:?}: value too large")]
    Overflow { input: String },
}

/// Parse an interval string into its total duration.
///
/// Segments are optional but must appear in the order days, hours, minutes:
/// `"2d12h"`, `"90m"`, `"1d30m"`. The empty string is a zero interval.
pub fn parse_interval(input: &str) -> Result<TimeDelta, ParseIntervalError> {
    let mut rest = input;
    let mut total_minutes: u64 = 0;
    let mut last_rank: Option<u8> = None;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ParseIntervalError::MissingUnit {
                input: input.to_string(),
            })?;

        // Safe to index: `find` returned a char boundary inside `rest`.
        let unit = rest[digits..].chars().next().unwrap_or_default();

        if digits == 0 {
            return Err(ParseIntervalError::MissingNumber {
                input: input.to_string(),
                unit,
            });
        }

        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| ParseIntervalError::Overflow {
                input: input.to_string(),
            })?;

        let (rank, minutes_per_unit) = match unit {
            'd' => (0, MINUTES_PER_DAY),
            'h' => (1, MINUTES_PER_HOUR),
            'm' => (2, 1),
            other => {
                return Err(ParseIntervalError::UnknownUnit {
                    input: input.to_string(),
                    unit: other,
                });
            }
        };

        if last_rank.is_some_and(|prev| rank <= prev) {
            return Err(ParseIntervalError::OutOfOrder {
                input: input.to_string(),
                unit,
            });
        }
        last_rank = Some(rank);

        total_minutes = value
            .checked_mul(minutes_per_unit)
            .and_then(|m| total_minutes.checked_add(m))
            .ok_or_else(|| ParseIntervalError::Overflow {
                input: input.to_string(),
            })?;

        rest = &rest[digits + unit.len_utf8()..];
    }

    i64::try_from(total_minutes)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .ok_or_else(|| ParseIntervalError::Overflow {
            input: input.to_string(),
        })
}

/// A validated interval specification, e.g. `"2d12h"`.
///
/// Keeps the text the user wrote so it can be persisted and displayed
/// verbatim, together with the duration it denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSpec {
    raw: String,
    duration: TimeDelta,
}

impl IntervalSpec {
    pub fn parse(input: &str) -> Result<Self, ParseIntervalError> {
        let duration = parse_interval(input)?;
        Ok(Self {
            raw: input.to_string(),
            duration,
        })
    }

    pub fn hourly() -> Self {
        Self {
            raw: "1h".to_string(),
            duration: TimeDelta::hours(1),
        }
    }

    pub fn daily() -> Self {
        Self {
            raw: "1d".to_string(),
            duration: TimeDelta::days(1),
        }
    }

    pub fn weekly() -> Self {
        Self {
            raw: "7d".to_string(),
            duration: TimeDelta::days(7),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn duration(&self) -> TimeDelta {
        self.duration
    }
}

impl FromStr for IntervalSpec {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl<'de> Deserialize<'de> for IntervalSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_match_their_parsed_forms() {
        assert_eq!(IntervalSpec::hourly(), IntervalSpec::parse("1h").unwrap());
        assert_eq!(IntervalSpec::daily(), IntervalSpec::parse("1d").unwrap());
        assert_eq!(IntervalSpec::weekly(), IntervalSpec::parse("7d").unwrap());
    }

    #[test]
    fn trailing_garbage_after_unit_is_rejected() {
        assert!(matches!(
            parse_interval("1d-"),
            Err(ParseIntervalError::MissingNumber { unit: '-', .. })
        ));
    }
}
