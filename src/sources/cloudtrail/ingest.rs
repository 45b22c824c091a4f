//! Folds decoded CloudTrail records into a [`Report`].

use super::identity::resolve_principal;
use super::model::{CloudTrailLog, CloudTrailRecord};
use super::partition::{scan, Partition};
use super::selection::select_objects;
use crate::core::error::{IngestError, LogDecodeError};
use crate::core::report::{Principal, Report};
use crate::core::traits::{BlobStore, GeoIndex};
use flate2::read::MultiGzDecoder;
use std::io::{BufReader, Read};
use std::net::IpAddr;

impl Report {
    /// Adds one record. Records outside the management category or outside
    /// the report window are ignored.
    pub fn import_record(&mut self, record: &CloudTrailRecord, geo: &dyn GeoIndex) {
        if !record.is_management() {
            return;
        }
        if let Some(window) = self.window() {
            match record.event_time() {
                Some(time) if window.contains(time) => {}
                _ => return,
            }
        }

        let resolved = resolve_principal(record.user_identity.as_ref());
        let ip = record
            .source_ip_address
            .as_deref()
            .and_then(|raw| raw.parse::<IpAddr>().ok())
            .map(|ip| ip.to_canonical());
        if let Some(ip) = ip {
            self.locate_ip(ip, geo);
        }

        let principal = self.principal_entry(resolved.key, || {
            Principal::new(resolved.name, resolved.principal_type, resolved.arn)
        });
        if let Some(ip) = ip {
            principal.count_ip_address(ip.to_string());
        }
        if let Some(agent) = record.user_agent.as_deref().map(str::trim) {
            if !agent.is_empty() {
                principal.count_user_agent(agent);
            }
        }
        principal
            .event_entry(record.event_source(), record.event_name())
            .record(record.error_code.as_deref());
    }

    pub fn import_records<'r>(
        &mut self,
        records: impl IntoIterator<Item = &'r CloudTrailRecord>,
        geo: &dyn GeoIndex,
    ) {
        for record in records {
            self.import_record(record, geo);
        }
    }

    /// Decodes an uncompressed `{"Records": [...]}` batch and adds its records.
    pub fn import_log_json<R: Read>(
        &mut self,
        reader: R,
        geo: &dyn GeoIndex,
    ) -> Result<(), LogDecodeError> {
        let log: CloudTrailLog = serde_json::from_reader(BufReader::new(reader))?;
        self.import_records(log.parsed_records(), geo);
        Ok(())
    }

    /// Like [`Report::import_log_json`] for a gzip-compressed batch.
    pub fn import_compressed_log<R: Read>(
        &mut self,
        reader: R,
        geo: &dyn GeoIndex,
    ) -> Result<(), LogDecodeError> {
        self.import_log_json(MultiGzDecoder::new(reader), geo)
    }
}

/// What one partition import did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionOutcome {
    /// Objects fetched and imported.
    pub objects: usize,
    /// True when the byte budget stopped the partition early.
    pub truncated: bool,
}

/// Imports trail objects from one bucket.
pub struct CloudTrailImporter<'a, S: ?Sized> {
    store: &'a S,
    geo: &'a dyn GeoIndex,
    bucket: String,
}

impl<'a, S: BlobStore + ?Sized> CloudTrailImporter<'a, S> {
    pub fn new(store: &'a S, geo: &'a dyn GeoIndex, bucket: impl Into<String>) -> Self {
        Self {
            store,
            geo,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Fetches one compressed batch and adds it to `report`.
    ///
    /// The object's content length counts toward the report's source bytes
    /// even if decoding then fails.
    pub fn import_object(&self, report: &mut Report, key: &str) -> Result<(), IngestError> {
        let object = self
            .store
            .get_object(&self.bucket, key)
            .map_err(|source| IngestError::Fetch {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source,
            })?;
        report.add_source_bytes(object.content_length.unwrap_or_default());
        report
            .import_compressed_log(object.body, self.geo)
            .map_err(|source| IngestError::Decode {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source,
            })
    }

    /// Imports every selected object of `partition` in listing order.
    ///
    /// With a `budget`, an object whose size would take the report's source
    /// bytes past it is not fetched: the report is marked incomplete and the
    /// rest of the partition is skipped. The budget is compared against the
    /// report's running total, so callers sharing a report across partitions
    /// share the total too.
    pub fn import_partition(
        &self,
        report: &mut Report,
        partition: &Partition,
        budget: Option<u64>,
    ) -> Result<PartitionOutcome, IngestError> {
        let mut outcome = PartitionOutcome::default();
        for selected in select_objects(self.store, &self.bucket, partition, report.window()) {
            let selected = selected?;
            if let (Some(budget), Some(size)) = (budget, selected.size) {
                if report.would_exceed(size, budget) {
                    report.mark_incomplete();
                    outcome.truncated = true;
                    break;
                }
            }
            self.import_object(report, &selected.key)?;
            outcome.objects += 1;
        }
        Ok(outcome)
    }

    /// Discovers every partition under `key_prefix` and imports each one
    /// into `report`.
    pub fn import_bucket(
        &self,
        report: &mut Report,
        key_prefix: &str,
        budget: Option<u64>,
    ) -> Result<Vec<(Partition, PartitionOutcome)>, IngestError> {
        let partitions = scan(self.store, &self.bucket, key_prefix)?;
        let mut outcomes = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let outcome = self.import_partition(report, &partition, budget)?;
            outcomes.push((partition, outcome));
        }
        Ok(outcomes)
    }
}
