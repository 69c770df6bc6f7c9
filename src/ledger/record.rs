// ABOUTME: On-disk schema of the pull ledger and timestamp helpers.
// ABOUTME: Keeps the original image.json layout so existing files load unchanged.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::LedgerError;
use crate::types::IntervalSpec;

/// Pruning interval written into a freshly created ledger.
pub const DEFAULT_PRUNING_INTERVAL: &str = "7d";

/// The persisted ledger document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(default)]
    pub interval: IntervalSettings,
    #[serde(default)]
    pub image: ImagePulls,
}

/// Interval and pruning metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSettings {
    /// Interval spec of the last interval-style policy applied.
    #[serde(default)]
    pub pulling_interval: String,
    /// Entries older than this are dropped by pruning.
    #[serde(default = "default_pruning_interval")]
    pub pruning_interval: String,
    /// When pruning last ran; empty if never.
    #[serde(default)]
    pub last_prune: String,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            pulling_interval: String::new(),
            pruning_interval: default_pruning_interval(),
            last_prune: String::new(),
        }
    }
}

fn default_pruning_interval() -> String {
    DEFAULT_PRUNING_INTERVAL.to_string()
}

/// Last successful pull per image key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImagePulls {
    #[serde(
        rename = "ImageIDtoTIME",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub pulls: BTreeMap<String, String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl LedgerRecord {
    pub fn pulling_interval(&self) -> Result<IntervalSpec, LedgerError> {
        IntervalSpec::parse(&self.interval.pulling_interval).map_err(|source| {
            LedgerError::InvalidInterval {
                field: "pulling_interval",
                source,
            }
        })
    }

    pub fn pruning_interval(&self) -> Result<IntervalSpec, LedgerError> {
        IntervalSpec::parse(&self.interval.pruning_interval).map_err(|source| {
            LedgerError::InvalidInterval {
                field: "pruning_interval",
                source,
            }
        })
    }

    pub fn last_prune(&self) -> Result<Option<DateTime<Utc>>, LedgerError> {
        if self.interval.last_prune.is_empty() {
            return Ok(None);
        }
        parse_timestamp(&self.interval.last_prune).map(Some)
    }

    pub fn last_pull(&self, key: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
        self.image
            .pulls
            .get(key)
            .map(String::as_str)
            .map(parse_timestamp)
            .transpose()
    }

    pub fn images(&self) -> impl Iterator<Item = (&str, &str)> {
        self.image
            .pulls
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Render a timestamp the way the ledger stores it (RFC 3339, seconds, `Z`).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|source| LedgerError::InvalidTimestamp {
            value: value.to_string(),
            source,
        })
}
