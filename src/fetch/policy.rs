// ABOUTME: Image pull policy parsing and rendering.
// ABOUTME: Supports always, never, if-not-present, hourly/daily/weekly and interval=<spec>.

use crate::types::{IntervalSpec, ParseIntervalError};
use serde::de::{self, Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const INTERVAL_PREFIX: &str = "interval=";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsePullPolicyError {
    #[error("invalid pull policy {0:?}")]
    Unknown(String),

    #[error(transparent)]
    InvalidInterval(#[from] ParseIntervalError),
}

/// When to pull an image before using it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Pull every time, even if the image is present.
    #[default]
    Always,
    /// Never pull; only use images already on the daemon.
    Never,
    /// Pull only when the daemon does not have the image.
    IfNotPresent,
    /// Pull at most once an hour.
    Hourly,
    /// Pull at most once a day.
    Daily,
    /// Pull at most once a week.
    Weekly,
    /// Pull at most once per custom interval.
    Interval(IntervalSpec),
}

impl PullPolicy {
    /// The interval gating pulls, for the interval-style policies.
    pub fn interval(&self) -> Option<IntervalSpec> {
        match self {
            PullPolicy::Hourly => Some(IntervalSpec::hourly()),
            PullPolicy::Daily => Some(IntervalSpec::daily()),
            PullPolicy::Weekly => Some(IntervalSpec::weekly()),
            PullPolicy::Interval(spec) => Some(spec.clone()),
            PullPolicy::Always | PullPolicy::Never | PullPolicy::IfNotPresent => None,
        }
    }

    pub fn is_interval_gated(&self) -> bool {
        self.interval().is_some()
    }
}

impl FromStr for PullPolicy {
    type Err = ParsePullPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            "if-not-present" => Ok(PullPolicy::IfNotPresent),
            "hourly" => Ok(PullPolicy::Hourly),
            "daily" => Ok(PullPolicy::Daily),
            "weekly" => Ok(PullPolicy::Weekly),
            s if s.starts_with(INTERVAL_PREFIX) => {
                let spec = IntervalSpec::parse(&s[INTERVAL_PREFIX.len()..])?;
                Ok(PullPolicy::Interval(spec))
            }
            _ => Err(ParsePullPolicyError::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullPolicy::Always => write!(f, "always"),
            PullPolicy::Never => write!(f, "never"),
            PullPolicy::IfNotPresent => write!(f, "if-not-present"),
            PullPolicy::Hourly => write!(f, "hourly"),
            PullPolicy::Daily => write!(f, "daily"),
            PullPolicy::Weekly => write!(f, "weekly"),
            PullPolicy::Interval(spec) => write!(f, "{}{}", INTERVAL_PREFIX, spec),
        }
    }
}

impl<'de> Deserialize<'de> for PullPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
