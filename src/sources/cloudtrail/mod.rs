//! CloudTrail trail ingestion.
//!
//! Discovers the partitions of a trail bucket, selects the objects that can
//! hold records from a time window, and folds their records into a report.

pub mod identity;
pub mod ingest;
pub mod model;
pub mod partition;
pub mod selection;

pub use identity::{principal_type, resolve_principal, ResolvedPrincipal};
pub use ingest::{CloudTrailImporter, PartitionOutcome};
pub use model::{CloudTrailLog, CloudTrailRecord, RecordEntry, SessionIssuer, UserIdentity};
pub use partition::{scan, Partition};
pub use selection::{parse_delivery_time, select_objects, SelectedObject, SelectedObjects};
