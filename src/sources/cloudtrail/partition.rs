//! Discovers the (account, region) partitions of a trail bucket.
//!
//! Single-account trails deliver to `AWSLogs/<account>/CloudTrail/<region>/`,
//! organization trails to `AWSLogs/o-<org>/<account>/CloudTrail/<region>/`.
//! The two are told apart only by the `o-` prefix on the first directory.

use crate::blob::subdirectories;
use crate::core::error::IngestError;
use crate::core::traits::BlobStore;
use serde::{Deserialize, Serialize};

/// Prefix of organization ids.
pub const ORGANIZATION_ID_PREFIX: &str = "o-";

/// Directory under the trail's key prefix that CloudTrail delivers into.
pub const AWS_LOGS_DIR: &str = "AWSLogs/";

/// One (account, region) pair of a trail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    /// Key prefix the account directory lives under, e.g. `AWSLogs/` or
    /// `logs/AWSLogs/o-abc123/`.
    pub accounts_prefix: String,
    pub account_id: String,
    pub region: String,
}

impl Partition {
    pub fn new(
        accounts_prefix: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            accounts_prefix: accounts_prefix.into(),
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    /// `<accounts_prefix><account>/CloudTrail/`
    pub fn trail_prefix(&self) -> String {
        trail_prefix(&self.accounts_prefix, &self.account_id)
    }

    /// `<accounts_prefix><account>/CloudTrail/<region>/`
    pub fn region_prefix(&self) -> String {
        format!("{}{}/", self.trail_prefix(), self.region)
    }
}

fn trail_prefix(accounts_prefix: &str, account_id: &str) -> String {
    format!("{accounts_prefix}{account_id}/CloudTrail/")
}

/// Lists every partition of the trail stored in `bucket` under `key_prefix`.
///
/// Only listing calls are made. Partitions come back grouped by account, in
/// listing order.
pub fn scan<S: BlobStore + ?Sized>(
    store: &S,
    bucket: &str,
    key_prefix: &str,
) -> Result<Vec<Partition>, IngestError> {
    let list = |prefix: &str| {
        subdirectories(store, bucket, prefix).map_err(|source| IngestError::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            source,
        })
    };

    let logs_prefix = format!("{key_prefix}{AWS_LOGS_DIR}");
    let mut accounts = Vec::new();
    for name in list(&logs_prefix)? {
        if name.starts_with(ORGANIZATION_ID_PREFIX) {
            let org_prefix = format!("{logs_prefix}{name}/");
            for account_id in list(&org_prefix)? {
                accounts.push((org_prefix.clone(), account_id));
            }
        } else {
            accounts.push((logs_prefix.clone(), name));
        }
    }

    let mut partitions = Vec::new();
    for (accounts_prefix, account_id) in accounts {
        for region in list(&trail_prefix(&accounts_prefix, &account_id))? {
            partitions.push(Partition::new(accounts_prefix.clone(), account_id.clone(), region));
        }
    }
    Ok(partitions)
}
