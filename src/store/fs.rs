use super::{ReportId, StoredReport};
use crate::core::error::StoreError;
use crate::core::traits::ReportStore;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const METADATA_SUFFIX: &str = ".meta.json";

/// Stores report bodies under a root directory using their object keys as
/// relative paths, with a `<key>.meta.json` metadata file beside each body.
///
/// Files are written to a temporary name and renamed into place, so readers
/// never see a partial write and a repeated put replaces the earlier one.
#[derive(Debug, Clone)]
pub struct FsReportStore {
    root: PathBuf,
}

impl FsReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the body stored for `id`.
    pub fn report_path(&self, id: &ReportId) -> PathBuf {
        self.root.join(super::storage_key(id))
    }

    fn metadata_path(&self, id: &ReportId) -> PathBuf {
        let mut path = self.report_path(id).into_os_string();
        path.push(METADATA_SUFFIX);
        PathBuf::from(path)
    }

    /// Reads back the stored body, or `None` if nothing was stored for `id`.
    pub fn get_report(&self, id: &ReportId) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.report_path(id))
    }

    pub fn get_metadata(&self, id: &ReportId) -> Result<Option<StoredReport>, StoreError> {
        match read_optional(&self.metadata_path(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl ReportStore for FsReportStore {
    fn put_report(&self, metadata: &StoredReport, body: &[u8]) -> Result<(), StoreError> {
        let metadata_bytes = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&self.report_path(&metadata.id), body)?;
        write_atomic(&self.metadata_path(&metadata.id), &metadata_bytes)?;
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp, path)
}
