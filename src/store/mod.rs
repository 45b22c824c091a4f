//! Durable storage of finished reports.
//!
//! A report id is assigned before generation starts, so re-running a scope
//! writes to the same key and replaces the earlier attempt.

mod fs;

pub use fs::FsReportStore;

use crate::core::window::TimeWindow;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Directory reports are stored under.
pub const REPORTS_PREFIX: &str = "reports/";

const REPORT_ID_PREFIX: &str = "r-";
const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
/// Base62 digits needed for 128 random bits.
const REPORT_ID_DIGITS: usize = 22;

/// Identifier of a stored report: `r-` followed by 22 base62 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReportId(String);

/// A string that is not a valid [`ReportId`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid report id {0:?}")]
pub struct InvalidReportId(String);

impl ReportId {
    /// A fresh random id.
    pub fn generate() -> Self {
        Self::from_bits(rand::thread_rng().gen())
    }

    fn from_bits(mut bits: u128) -> Self {
        let mut digits = [b'0'; REPORT_ID_DIGITS];
        for digit in digits.iter_mut().rev() {
            *digit = BASE62[(bits % 62) as usize];
            bits /= 62;
        }
        let encoded: String = digits.iter().map(|&digit| char::from(digit)).collect();
        Self(format!("{REPORT_ID_PREFIX}{encoded}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReportId {
    type Err = InvalidReportId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let valid = value
            .strip_prefix(REPORT_ID_PREFIX)
            .is_some_and(|digits| {
                digits.len() == REPORT_ID_DIGITS
                    && digits.bytes().all(|byte| byte.is_ascii_alphanumeric())
            });
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidReportId(value.to_string()))
        }
    }
}

impl TryFrom<String> for ReportId {
    type Error = InvalidReportId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReportId> for String {
    fn from(id: ReportId) -> Self {
        id.0
    }
}

/// How long a stored report is kept after its window closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Retention {
    #[default]
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "2w")]
    TwoWeeks,
}

/// A string that is not a retention class.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown retention {0:?}, expected \"1w\" or \"2w\"")]
pub struct InvalidRetention(String);

impl Retention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Retention::OneWeek => "1w",
            Retention::TwoWeeks => "2w",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Retention::OneWeek => Duration::days(7),
            Retention::TwoWeeks => Duration::days(14),
        }
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Retention {
    type Err = InvalidRetention;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "1w" => Ok(Retention::OneWeek),
            "2w" => Ok(Retention::TwoWeeks),
            other => Err(InvalidRetention(other.to_string())),
        }
    }
}

/// The (account, region, window) a report covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportScope {
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub account_id: String,
    pub region: String,
}

/// Metadata kept next to a stored report body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReport {
    pub id: ReportId,
    pub creation_time: DateTime<Utc>,
    /// End of the covered window plus the retention period.
    pub expiration_time: DateTime<Utc>,
    pub team_id: String,
    pub scope: ReportScope,
    /// Object key of the body, see [`storage_key`].
    pub key: String,
    /// Lifecycle tags in `k=v&k=v` form.
    pub tags: String,
    pub retention: Retention,
    /// Serialized body size in bytes.
    pub size: u64,
    pub source_bytes: u64,
    pub is_incomplete: bool,
    pub generation_millis: u64,
}

/// `reports/<id>.json`
pub fn storage_key(id: &ReportId) -> String {
    format!("{REPORTS_PREFIX}{id}.json")
}

/// Tags used by lifecycle rules to expire reports per retention class.
pub fn lifecycle_tags(team_id: &str, retention: Retention) -> String {
    format!("team_id={team_id}&retention={retention}")
}

/// When a report for `scope` expires under `retention`. Saturates at the
/// latest representable time.
pub fn expiration_time(scope: &ReportScope, retention: Retention) -> DateTime<Utc> {
    TimeWindow::new(scope.start_time, scope.duration_seconds)
        .end()
        .checked_add_signed(retention.duration())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
