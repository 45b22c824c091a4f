//! Fields read from delivered CloudTrail log batches.
//!
//! Everything is optional: CloudTrail omits fields freely depending on the
//! event type, and a record that still fails to decode is kept as
//! [`RecordEntry::Malformed`] instead of failing the whole batch.

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

/// Event category of control-plane activity.
pub const MANAGEMENT_CATEGORY: &str = "Management";

/// One delivered log object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudTrailLog {
    #[serde(rename = "Records", default)]
    pub records: Vec<RecordEntry>,
}

impl CloudTrailLog {
    /// Records that decoded, in delivery order.
    pub fn parsed_records(&self) -> impl Iterator<Item = &CloudTrailRecord> {
        self.records.iter().filter_map(|entry| match entry {
            RecordEntry::Record(record) => Some(&**record),
            RecordEntry::Malformed(_) => None,
        })
    }
}

/// A record slot in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordEntry {
    Record(Box<CloudTrailRecord>),
    #[serde(skip_serializing)]
    Malformed(IgnoredAny),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudTrailRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_identity: Option<UserIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(
        rename = "sourceIPAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CloudTrailRecord {
    pub fn is_management(&self) -> bool {
        self.event_category.as_deref() == Some(MANAGEMENT_CATEGORY)
    }

    /// Parsed `eventTime`, or `None` when absent or not RFC 3339.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.event_time.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }

    pub fn event_source(&self) -> &str {
        self.event_source.as_deref().unwrap_or_default()
    }

    pub fn event_name(&self) -> &str {
        self.event_name.as_deref().unwrap_or_default()
    }
}

/// The `userIdentity` block of a record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub identity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_context: Option<SessionContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_issuer: Option<SessionIssuer>,
}

/// The long-lived identity behind a temporary session.
///
/// Same fields as [`UserIdentity`] minus the session context: an issuer is
/// never itself a session, so chains stop after one level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIssuer {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub identity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,
}
