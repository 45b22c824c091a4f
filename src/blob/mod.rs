//! Blob-store request types, paging, and the bundled store implementations.
//!
//! Listings follow S3 `ListObjectsV2` semantics: keys come back in ascending
//! order, a delimiter folds everything past it into common prefixes, and a
//! continuation token resumes after the last entry of the previous page.

pub mod local;
pub mod memory;

use crate::core::error::BlobError;
use crate::core::traits::BlobStore;
use std::collections::BTreeMap;
use std::io::Read;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

/// Default number of entries per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
}

impl ListRequest {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            delimiter: None,
            continuation_token: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }
}

/// One page of listing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Prefixes ending in the delimiter, e.g. `AWSLogs/123456789012/`.
    pub common_prefixes: Vec<String>,
    pub objects: Vec<ObjectSummary>,
    /// Present when more results follow.
    pub next_continuation_token: Option<String>,
}

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    /// Stored size in bytes, when the store reports one.
    pub size: Option<u64>,
}

/// An opened object body.
pub struct BlobObject {
    pub body: Box<dyn Read>,
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for BlobObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobObject")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Iterator over every page of a listing.
pub struct Pages<'a, S: ?Sized> {
    store: &'a S,
    request: ListRequest,
    done: bool,
}

/// Pages through `request` lazily; a new page is fetched only when the
/// previous one has been consumed.
pub fn pages<S: BlobStore + ?Sized>(store: &S, request: ListRequest) -> Pages<'_, S> {
    Pages {
        store,
        request,
        done: false,
    }
}

impl<S: BlobStore + ?Sized> Iterator for Pages<'_, S> {
    type Item = Result<ListPage, BlobError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let page = match self.store.list_objects(&self.request) {
            Ok(page) => page,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        match &page.next_continuation_token {
            Some(token) if self.request.continuation_token.as_ref() == Some(token) => {
                self.done = true;
                return Some(Err(BlobError::InvalidContinuationToken {
                    token: token.clone(),
                }));
            }
            Some(token) => self.request.continuation_token = Some(token.clone()),
            None => self.done = true,
        }
        Some(Ok(page))
    }
}

/// Names of the "directories" directly under `prefix`, which should end in
/// `/`. `AWSLogs/` containing `AWSLogs/o-abc/` yields `o-abc`.
pub fn subdirectories<S: BlobStore + ?Sized>(
    store: &S,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>, BlobError> {
    let mut names = Vec::new();
    for page in pages(store, ListRequest::new(bucket, prefix).with_delimiter("/")) {
        for common_prefix in page?.common_prefixes {
            if let Some(name) = common_prefix.trim_end_matches('/').rsplit('/').next() {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
    }
    Ok(names)
}

/// Builds a listing page from every stored `(key, size)` under the bucket.
///
/// Shared by the bundled stores so they agree on delimiter folding, ordering
/// and continuation.
pub(crate) fn build_page(
    entries: impl IntoIterator<Item = (String, Option<u64>)>,
    request: &ListRequest,
    page_size: usize,
) -> Result<ListPage, BlobError> {
    if let Some(token) = &request.continuation_token {
        if !token.starts_with(&request.prefix) {
            return Err(BlobError::InvalidContinuationToken {
                token: token.clone(),
            });
        }
    }

    enum Entry {
        Prefix,
        Object(Option<u64>),
    }

    let mut listing: BTreeMap<String, Entry> = BTreeMap::new();
    for (key, size) in entries {
        let Some(rest) = key.strip_prefix(&request.prefix) else {
            continue;
        };
        let folded = request
            .delimiter
            .as_deref()
            .filter(|delimiter| !delimiter.is_empty())
            .and_then(|delimiter| {
                rest.find(delimiter)
                    .map(|idx| format!("{}{}", request.prefix, &rest[..idx + delimiter.len()]))
            });
        match folded {
            Some(common_prefix) => {
                listing.insert(common_prefix, Entry::Prefix);
            }
            None => {
                listing.insert(key, Entry::Object(size));
            }
        }
    }

    let page_size = page_size.max(1);
    let mut page = ListPage::default();
    let mut remaining = listing
        .into_iter()
        .filter(|(key, _)| match &request.continuation_token {
            Some(token) => key > token,
            None => true,
        })
        .peekable();

    let mut last_key = None;
    for (key, entry) in remaining.by_ref().take(page_size) {
        match entry {
            Entry::Prefix => page.common_prefixes.push(key.clone()),
            Entry::Object(size) => page.objects.push(ObjectSummary {
                key: key.clone(),
                size,
            }),
        }
        last_key = Some(key);
    }
    if remaining.peek().is_some() {
        page.next_continuation_token = last_key;
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[&str]) -> Vec<(String, Option<u64>)> {
        keys.iter().map(|key| (key.to_string(), Some(1))).collect()
    }

    #[test]
    fn delimiter_folds_into_common_prefixes() {
        let request = ListRequest::new("bucket", "AWSLogs/").with_delimiter("/");
        let page = build_page(
            entries(&[
                "AWSLogs/111111111111/CloudTrail/us-east-1/a.json.gz",
                "AWSLogs/111111111111/CloudTrail/us-west-2/b.json.gz",
                "AWSLogs/o-abc123/222222222222/CloudTrail/us-east-1/c.json.gz",
                "AWSLogs/readme.txt",
                "Other/ignored",
            ]),
            &request,
            DEFAULT_PAGE_SIZE,
        )
        .expect("page");

        assert_eq!(
            page.common_prefixes,
            vec!["AWSLogs/111111111111/", "AWSLogs/o-abc123/"]
        );
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "AWSLogs/readme.txt");
        assert!(page.next_continuation_token.is_none());
    }

    #[test]
    fn continuation_resumes_after_last_key() {
        let all = entries(&["p/a", "p/b", "p/c"]);
        let mut request = ListRequest::new("bucket", "p/");

        let first = build_page(all.clone(), &request, 2).expect("page");
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.next_continuation_token.as_deref(), Some("p/b"));

        request.continuation_token = first.next_continuation_token;
        let second = build_page(all, &request, 2).expect("page");
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "p/c");
        assert!(second.next_continuation_token.is_none());
    }

    #[test]
    fn foreign_token_is_rejected() {
        let mut request = ListRequest::new("bucket", "p/");
        request.continuation_token = Some("q/zzz".to_string());
        let err = build_page(entries(&["p/a"]), &request, 10).unwrap_err();
        assert!(matches!(err, BlobError::InvalidContinuationToken { .. }));
    }
}
