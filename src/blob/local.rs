//! Blob store backed by a local directory tree.
//!
//! `<root>/<bucket>/<key>` holds each object, so a trail synced down with
//! `aws s3 sync` can be read in place.

use super::{build_page, BlobObject, ListPage, ListRequest, DEFAULT_PAGE_SIZE};
use crate::core::error::BlobError;
use crate::core::traits::BlobStore;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

/// Reads buckets from subdirectories of `root`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, BlobError> {
        validate_relative(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobError> {
        validate_relative(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }
}

impl BlobStore for LocalBlobStore {
    fn list_objects(&self, request: &ListRequest) -> Result<ListPage, BlobError> {
        let bucket_dir = self.bucket_dir(&request.bucket)?;
        // Only the directory holding the prefix and below can match.
        let start = match request.prefix.rfind('/') {
            Some(idx) => &request.prefix[..idx],
            None => "",
        };
        if !start.is_empty() {
            validate_relative(start)?;
        }

        let mut entries = Vec::new();
        walk(&bucket_dir, &bucket_dir.join(start), request, &mut entries)?;
        build_page(entries, request, self.page_size)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<BlobObject, BlobError> {
        let path = self.object_path(bucket, key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        let content_length = file.metadata()?.len();
        Ok(BlobObject {
            body: Box::new(BufReader::new(file)),
            content_length: Some(content_length),
        })
    }
}

/// Collects the `(key, size)` entries under `dir` that can appear in the
/// listing. Directories that cannot hold a matching key are skipped, and with
/// a `/` delimiter a directory past the prefix is reported as one folded
/// entry instead of being descended into.
fn walk(
    bucket_dir: &Path,
    dir: &Path,
    request: &ListRequest,
    out: &mut Vec<(String, Option<u64>)>,
) -> Result<(), BlobError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        // A missing prefix is an empty listing, not an error.
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    let folds_directories = request.delimiter.as_deref() == Some("/");
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let Some(key) = object_key(bucket_dir, &path) else {
            continue;
        };
        if file_type.is_dir() {
            let dir_key = format!("{key}/");
            if dir_key.starts_with(&request.prefix) {
                if folds_directories {
                    if contains_file(&path)? {
                        out.push((dir_key, None));
                    }
                    continue;
                }
            } else if !request.prefix.starts_with(&dir_key) {
                continue;
            }
            walk(bucket_dir, &path, request, out)?;
        } else if file_type.is_file() {
            out.push((key, Some(entry.metadata()?.len())));
        }
    }
    Ok(())
}

fn object_key(bucket_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_dir).ok()?;
    Some(
        relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Whether any regular file lives somewhere under `dir`.
fn contains_file(dir: &Path) -> Result<bool, BlobError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() || (file_type.is_dir() && contains_file(&entry.path())?) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn validate_relative(key: &str) -> Result<(), BlobError> {
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if key.is_empty() || escapes {
        return Err(BlobError::InvalidKey {
            key: key.to_string(),
            reason: "must be a relative path without `.` or `..` segments".to_string(),
        });
    }
    Ok(())
}
