//! Fixtures shared by the integration tests: trail batches laid out the way
//! CloudTrail delivers them, and a geolocation index that counts lookups.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use trailscope::geoip::GeoMatch;
use trailscope::traits::GeoIndex;
use trailscope::Location;

pub const BUCKET: &str = "aws-cloudtrail-logs";
pub const ACCOUNT: &str = "222222222222";
pub const REGION: &str = "us-east-1";

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// Delivery key for a batch of `account`/`region` delivered at `delivered`.
pub fn object_key(
    accounts_prefix: &str,
    account_id: &str,
    region: &str,
    delivered: DateTime<Utc>,
) -> String {
    format!(
        "{accounts_prefix}{account_id}/CloudTrail/{region}/{}/{account_id}_CloudTrail_{region}_{}_{}.json.gz",
        delivered.format("%Y/%m/%d"),
        delivered.format("%Y%m%dT%H%MZ"),
        unique_id(),
    )
}

fn unique_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Gzip-compressed `{"Records":[...]}` body.
pub fn encode_batch(records: &[Value]) -> Vec<u8> {
    let mut buffer = b"{\"Records\":[".to_vec();
    for (index, record) in records.iter().enumerate() {
        if index > 0 {
            buffer.push(b',');
        }
        buffer.extend_from_slice(&serde_json::to_vec(record).unwrap());
    }
    buffer.extend_from_slice(b"]}");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&buffer).unwrap();
    encoder.finish().unwrap()
}

/// Writes an object into a local blob root as `<root>/<bucket>/<key>`.
pub fn write_local(root: &Path, bucket: &str, key: &str, body: &[u8]) {
    let path = root.join(bucket).join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// A management API call.
pub fn management_event(
    time: &str,
    source: &str,
    name: &str,
    ip: &str,
    user_identity: Value,
) -> Value {
    json!({
        "eventVersion": "1.08",
        "userIdentity": user_identity,
        "eventTime": time,
        "eventSource": source,
        "eventName": name,
        "awsRegion": REGION,
        "sourceIPAddress": ip,
        "userAgent": "aws-cli/2.15.0 Python/3.11.6",
        "eventType": "AwsApiCall",
        "managementEvent": true,
        "recipientAccountId": ACCOUNT,
        "eventCategory": "Management"
    })
}

pub fn role_session(role: &str) -> Value {
    json!({
        "type": "AssumedRole",
        "principalId": format!("AROAIXNNZA45TGR7PBZQ2:{role}-session"),
        "arn": format!("arn:aws:sts::{ACCOUNT}:assumed-role/{role}/{role}-session"),
        "accountId": ACCOUNT,
        "sessionContext": {
            "sessionIssuer": {
                "type": "Role",
                "principalId": "AROAIXNNZA45TGR7PBZQ2",
                "arn": format!("arn:aws:iam::{ACCOUNT}:role/{role}"),
                "accountId": ACCOUNT,
                "userName": role
            }
        }
    })
}

pub fn role_arn(role: &str) -> String {
    format!("arn:aws:iam::{ACCOUNT}:role/{role}")
}

/// Locates every address in `203.0.113.0/24` and nothing else, counting
/// how often it is asked.
#[derive(Debug, Default)]
pub struct CountingGeo {
    lookups: AtomicUsize,
}

impl CountingGeo {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl GeoIndex for CountingGeo {
    fn lookup(&self, ip: IpAddr) -> Option<GeoMatch> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let IpAddr::V4(v4) = ip else {
            return None;
        };
        let [a, b, c, _] = v4.octets();
        if (a, b, c) != (203, 0, 113) {
            return None;
        }
        Some(GeoMatch {
            network: "203.0.113.0/24".to_string(),
            location: Location {
                latitude: -33.8688,
                longitude: 151.2093,
                country_code: "AU".to_string(),
                country_name: "Australia".to_string(),
                city_name: "Sydney".to_string(),
                subdivision_names: vec!["New South Wales".to_string()],
            },
        })
    }
}
