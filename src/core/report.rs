//! Aggregated activity report for one scope.
//!
//! A [`Report`] only ever grows: counters increase, maps gain entries and
//! nothing is removed. A partially filled report is therefore still valid and
//! can be serialized at any point.

use crate::core::traits::GeoIndex;
use crate::core::window::{seconds_to_duration, TimeWindow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

/// Activity summary for one (account, region, time window) scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_seconds: u64,

    #[serde(default, skip_serializing_if = "is_zero")]
    source_bytes: u64,

    /// Set when a byte budget stopped ingestion early.
    #[serde(default, skip_serializing_if = "is_false")]
    is_incomplete: bool,

    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        serialize_with = "ordered"
    )]
    network_locations: HashMap<String, Location>,
    /// `None` records an address the geolocation index had no match for.
    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        serialize_with = "ordered"
    )]
    ip_address_networks: HashMap<String, Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        serialize_with = "ordered"
    )]
    principals: HashMap<String, Principal>,
}

impl Report {
    /// Creates an empty report that only accepts records inside `window`.
    pub fn new(window: TimeWindow) -> Self {
        Self {
            start_time: Some(window.start),
            duration_seconds: window.duration_seconds,
            ..Self::default()
        }
    }

    /// Creates an empty report without a time filter.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn window(&self) -> Option<TimeWindow> {
        self.start_time
            .map(|start| TimeWindow::new(start, self.duration_seconds))
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn duration(&self) -> Duration {
        seconds_to_duration(self.duration_seconds)
    }

    pub fn source_bytes(&self) -> u64 {
        self.source_bytes
    }

    pub fn is_incomplete(&self) -> bool {
        self.is_incomplete
    }

    pub fn network_locations(&self) -> &HashMap<String, Location> {
        &self.network_locations
    }

    pub fn ip_address_networks(&self) -> &HashMap<String, Option<String>> {
        &self.ip_address_networks
    }

    pub fn principals(&self) -> &HashMap<String, Principal> {
        &self.principals
    }

    pub fn principal(&self, key: &str) -> Option<&Principal> {
        self.principals.get(key)
    }

    /// True when nothing was ever recorded. Callers skip persisting these.
    pub fn is_empty(&self) -> bool {
        self.network_locations.is_empty()
            && self.ip_address_networks.is_empty()
            && self.principals.is_empty()
    }

    pub(crate) fn add_source_bytes(&mut self, bytes: u64) {
        self.source_bytes = self.source_bytes.saturating_add(bytes);
    }

    pub(crate) fn mark_incomplete(&mut self) {
        self.is_incomplete = true;
    }

    /// Whether consuming `size` more bytes would go past `budget`.
    pub(crate) fn would_exceed(&self, size: u64, budget: u64) -> bool {
        self.source_bytes.saturating_add(size) > budget
    }

    pub(crate) fn principal_entry(
        &mut self,
        key: String,
        create: impl FnOnce() -> Principal,
    ) -> &mut Principal {
        self.principals.entry(key).or_insert_with(create)
    }

    /// Records which network `ip` belongs to, consulting `geo` only the first
    /// time the address is seen.
    pub(crate) fn locate_ip(&mut self, ip: IpAddr, geo: &dyn GeoIndex) {
        let address = ip.to_string();
        if self.ip_address_networks.contains_key(&address) {
            return;
        }
        match geo.lookup(ip) {
            Some(found) => {
                self.network_locations
                    .entry(found.network.clone())
                    .or_insert(found.location);
                self.ip_address_networks
                    .insert(address, Some(found.network));
            }
            None => {
                self.ip_address_networks.insert(address, None);
            }
        }
    }
}

/// Approximate location of a network block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: String,
    pub country_name: String,
    pub city_name: String,
    /// States or provinces, largest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subdivision_names: Vec<String>,
}

/// Kind of actor a principal was resolved to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalType {
    #[serde(rename = "AWSAssumedRole")]
    AssumedRole,
    #[serde(rename = "AWSRole")]
    Role,
    #[serde(rename = "AWSIAMUser")]
    IamUser,
    #[serde(rename = "AWSService")]
    Service,
    #[serde(rename = "AWSAccount")]
    Account,
    #[serde(rename = "WebIdentityUser")]
    WebIdentityUser,
    #[default]
    #[serde(rename = "", other)]
    Unknown,
}

impl PrincipalType {
    pub fn is_unknown(&self) -> bool {
        matches!(self, PrincipalType::Unknown)
    }
}

/// One actor seen in the window, with everything it did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "PrincipalType::is_unknown"
    )]
    pub principal_type: PrincipalType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arn: String,

    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        serialize_with = "ordered"
    )]
    pub user_agents: HashMap<String, u64>,
    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        serialize_with = "ordered"
    )]
    pub ip_addresses: HashMap<String, u64>,
    /// Keyed by `eventSource:eventName`.
    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        serialize_with = "ordered"
    )]
    pub events: HashMap<String, EventSummary>,
}

impl Principal {
    pub fn new(name: String, principal_type: PrincipalType, arn: String) -> Self {
        Self {
            name,
            principal_type,
            arn,
            ..Self::default()
        }
    }

    /// Last path segment of the name, e.g. the role name of a role ARN.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    pub(crate) fn count_user_agent(&mut self, agent: &str) {
        *self.user_agents.entry(agent.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn count_ip_address(&mut self, address: String) {
        *self.ip_addresses.entry(address).or_insert(0) += 1;
    }

    pub(crate) fn event_entry(&mut self, source: &str, name: &str) -> &mut EventSummary {
        self.events
            .entry(event_summary_key(source, name))
            .or_insert_with(|| EventSummary {
                name: name.to_string(),
                source: source.to_string(),
                count: 0,
                error_codes: HashMap::new(),
            })
    }
}

/// Key used for [`Principal::events`].
pub fn event_summary_key(source: &str, name: &str) -> String {
    format!("{source}:{name}")
}

/// Count of one API call made by a principal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub name: String,
    pub source: String,
    pub count: u64,
    #[serde(
        default,
        skip_serializing_if = "HashMap::is_empty",
        serialize_with = "ordered"
    )]
    pub error_codes: HashMap<String, u64>,
}

impl EventSummary {
    pub(crate) fn record(&mut self, error_code: Option<&str>) {
        self.count += 1;
        if let Some(code) = error_code.filter(|code| !code.is_empty()) {
            *self.error_codes.entry(code.to_string()).or_insert(0) += 1;
        }
    }
}

fn ordered<S, V>(map: &HashMap<String, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let sorted: BTreeMap<&String, &V> = map.iter().collect();
    sorted.serialize(serializer)
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}
