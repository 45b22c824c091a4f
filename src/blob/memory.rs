//! In-memory blob store that records every call made against it.

use super::{build_page, BlobObject, ListPage, ListRequest, DEFAULT_PAGE_SIZE};
use crate::core::error::BlobError;
use crate::core::traits::BlobStore;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Calls {
    lists: Vec<ListRequest>,
    gets: Vec<String>,
}

/// Holds objects in memory. Useful for tests and dry runs.
#[derive(Debug)]
pub struct MemoryBlobStore {
    buckets: HashMap<String, BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    calls: Mutex<Calls>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn put(&mut self, bucket: &str, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.into(), body.into());
    }

    /// Keys passed to `get_object`, in call order.
    pub fn fetched_keys(&self) -> Vec<String> {
        self.calls().gets.clone()
    }

    /// Requests passed to `list_objects`, in call order.
    pub fn list_requests(&self) -> Vec<ListRequest> {
        self.calls().lists.clone()
    }

    fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        // The guarded data is append-only, so a poisoned lock is still usable.
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BlobStore for MemoryBlobStore {
    fn list_objects(&self, request: &ListRequest) -> Result<ListPage, BlobError> {
        self.calls().lists.push(request.clone());
        let entries = self
            .buckets
            .get(&request.bucket)
            .into_iter()
            .flat_map(|objects| objects.iter())
            .map(|(key, body)| (key.clone(), Some(body.len() as u64)));
        build_page(entries, request, self.page_size)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobError> {
        self.calls().gets.push(key.to_string());
        let body = self
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })?;
        Ok(BlobObject {
            content_length: Some(body.len() as u64),
            body: Box::new(Cursor::new(body.clone())),
        })
    }
}
