//! Caller-side orchestration: generate one scope's report and persist it.

use crate::core::error::{IngestError, StoreError};
use crate::core::report::Report;
use crate::core::traits::{BlobStore, GeoIndex, ReportStore};
use crate::core::window::TimeWindow;
use crate::sources::cloudtrail::{CloudTrailImporter, Partition};
use crate::store::{
    expiration_time, lifecycle_tags, storage_key, ReportId, ReportScope, Retention, StoredReport,
};
use chrono::Utc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure generating or persisting a report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to serialize report: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// One scope to generate.
#[derive(Debug, Clone)]
pub struct GenerateReportInput {
    /// Assigned before generation so retries overwrite the same report.
    pub report_id: ReportId,
    pub team_id: String,
    pub bucket: String,
    pub partition: Partition,
    pub window: TimeWindow,
    pub retention: Retention,
    pub max_source_bytes: Option<u64>,
}

/// Generates the report for one partition and window and stores it.
///
/// Returns `Ok(None)` without storing anything when no record matched.
pub fn generate_report<S: BlobStore + ?Sized>(
    blobs: &S,
    geo: &dyn GeoIndex,
    reports: &dyn ReportStore,
    input: &GenerateReportInput,
) -> Result<Option<StoredReport>, PipelineError> {
    let started = Instant::now();
    let partition = &input.partition;
    info!(
        report_id = %input.report_id,
        bucket = %input.bucket,
        account = %partition.account_id,
        region = %partition.region,
        start = %input.window.start,
        duration_seconds = input.window.duration_seconds,
        "generating report"
    );

    let importer = CloudTrailImporter::new(blobs, geo, input.bucket.as_str());
    let mut report = Report::new(input.window);
    let outcome = importer.import_partition(&mut report, partition, input.max_source_bytes)?;
    debug!(
        report_id = %input.report_id,
        objects = outcome.objects,
        source_bytes = report.source_bytes(),
        "partition imported"
    );
    if outcome.truncated {
        warn!(
            report_id = %input.report_id,
            source_bytes = report.source_bytes(),
            "byte budget reached, report is incomplete"
        );
    }

    if report.is_empty() {
        info!(report_id = %input.report_id, "no matching activity, nothing stored");
        return Ok(None);
    }

    let body = serde_json::to_vec(&report).map_err(PipelineError::Serialize)?;
    let scope = ReportScope {
        start_time: input.window.start,
        duration_seconds: input.window.duration_seconds,
        account_id: partition.account_id.clone(),
        region: partition.region.clone(),
    };
    let stored = StoredReport {
        id: input.report_id.clone(),
        creation_time: Utc::now(),
        expiration_time: expiration_time(&scope, input.retention),
        team_id: input.team_id.clone(),
        scope,
        key: storage_key(&input.report_id),
        tags: lifecycle_tags(&input.team_id, input.retention),
        retention: input.retention,
        size: body.len() as u64,
        source_bytes: report.source_bytes(),
        is_incomplete: report.is_incomplete(),
        generation_millis: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    reports.put_report(&stored, &body)?;

    info!(
        report_id = %stored.id,
        key = %stored.key,
        size = stored.size,
        incomplete = stored.is_incomplete,
        "report stored"
    );
    Ok(Some(stored))
}

/// Fills one report from every partition under `key_prefix`. The budget is
/// checked per partition against the shared running total.
pub fn bucket_report<S: BlobStore + ?Sized>(
    blobs: &S,
    geo: &dyn GeoIndex,
    bucket: &str,
    key_prefix: &str,
    window: Option<TimeWindow>,
    max_source_bytes: Option<u64>,
) -> Result<Report, PipelineError> {
    let importer = CloudTrailImporter::new(blobs, geo, bucket);
    let mut report = window.map(Report::new).unwrap_or_else(Report::unbounded);
    let outcomes = importer.import_bucket(&mut report, key_prefix, max_source_bytes)?;
    for (partition, outcome) in &outcomes {
        debug!(
            account = %partition.account_id,
            region = %partition.region,
            objects = outcome.objects,
            truncated = outcome.truncated,
            "partition imported"
        );
    }
    info!(
        bucket,
        partitions = outcomes.len(),
        source_bytes = report.source_bytes(),
        incomplete = report.is_incomplete(),
        "bucket imported"
    );
    Ok(report)
}
