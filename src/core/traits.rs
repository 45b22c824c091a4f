use crate::blob::{BlobObject, ListPage, ListRequest};
use crate::core::error::{BlobError, StoreError};
use crate::geoip::GeoMatch;
use crate::store::StoredReport;
use std::net::IpAddr;

/// Object storage holding the trail's log batches.
pub trait BlobStore {
    /// Lists one page of keys (or common prefixes, when a delimiter is set)
    /// under `request.prefix`, in ascending key order.
    fn list_objects(&self, request: &ListRequest) -> Result<ListPage, BlobError>;
    /// Opens an object body for reading.
    fn get_object(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobError>;
}

/// Maps an address to the network block containing it and that block's
/// approximate location.
pub trait GeoIndex: Send + Sync {
    /// Returns `None` when the address is outside the index's coverage.
    fn lookup(&self, ip: IpAddr) -> Option<GeoMatch>;
}

/// Durable storage for finished reports.
pub trait ReportStore {
    /// Stores `body` under the metadata's key, replacing any earlier write
    /// for the same report id.
    fn put_report(&self, metadata: &StoredReport, body: &[u8]) -> Result<(), StoreError>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn list_objects(&self, request: &ListRequest) -> Result<ListPage, BlobError> {
        (**self).list_objects(request)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobError> {
        (**self).get_object(bucket, key)
    }
}

impl<T: GeoIndex + ?Sized> GeoIndex for &T {
    fn lookup(&self, ip: IpAddr) -> Option<GeoMatch> {
        (**self).lookup(ip)
    }
}
