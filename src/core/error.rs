//! Error types shared across the crate.
//!
//! Transport and decode failures abort the current call and carry the bucket
//! and key they happened on. Malformed individual records are never errors;
//! they are skipped during aggregation.

use std::io;
use thiserror::Error;

/// Failure talking to the blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("no such object: {key}")]
    NotFound { key: String },

    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid continuation token {token:?}")]
    InvalidContinuationToken { token: String },

    #[error("blob store io error: {0}")]
    Io(#[from] io::Error),

    #[error("blob store error: {0}")]
    Backend(String),
}

/// Failure decoding one compressed log batch.
#[derive(Debug, Error)]
pub enum LogDecodeError {
    #[error("failed to decompress log: {0}")]
    Gzip(#[source] io::Error),

    #[error("failed to decode log: {0}")]
    Json(#[source] serde_json::Error),
}

impl From<serde_json::Error> for LogDecodeError {
    fn from(err: serde_json::Error) -> Self {
        // Read failures surface through serde_json when it pulls from the
        // gzip stream.
        if err.is_io() {
            LogDecodeError::Gzip(err.into())
        } else {
            LogDecodeError::Json(err)
        }
    }
}

/// Failure while discovering, listing or ingesting trail objects.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to list s3://{bucket}/{prefix}: {source}")]
    List {
        bucket: String,
        prefix: String,
        #[source]
        source: BlobError,
    },

    #[error("failed to get s3://{bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: BlobError,
    },

    #[error("failed to import s3://{bucket}/{key}: {source}")]
    Decode {
        bucket: String,
        key: String,
        #[source]
        source: LogDecodeError,
    },
}

/// Failure opening the geolocation database.
///
/// Holds rendered messages so the outcome of the one-time open can be shared
/// with every caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeoIpError {
    #[error("failed to read geoip database {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to decompress geoip database: {0}")]
    Decompress(String),

    #[error("failed to open geoip database: {0}")]
    Open(String),
}

/// Failure persisting a report.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report store io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode report metadata: {0}")]
    Encode(#[from] serde_json::Error),
}
