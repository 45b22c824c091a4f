//! IP geolocation backed by a MaxMind-format city database.
//!
//! The database ships gzip-compressed. [`LazyGeoIndex`] decompresses and
//! opens it on the first lookup, exactly once per index even when several
//! threads race on that first lookup, and shares the open reader afterwards.

use crate::core::error::GeoIpError;
use crate::core::report::Location;
use crate::core::traits::GeoIndex;
use flate2::read::MultiGzDecoder;
use ipnetwork::IpNetwork;
use maxminddb::Reader;
use serde::Deserialize;
use std::fs;
use std::io::Read;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::OnceLock;

/// A resolved network block and its location.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    /// CIDR notation, e.g. `142.251.96.0/19`.
    pub network: String,
    pub location: Location,
}

#[derive(Debug, Default, Deserialize)]
struct CityRecord {
    #[serde(default)]
    city: Option<Named>,
    #[serde(default)]
    country: Option<Country>,
    #[serde(default)]
    location: Option<Coordinates>,
    #[serde(default)]
    subdivisions: Option<Vec<Named>>,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    names: Option<Names>,
}

#[derive(Debug, Default, Deserialize)]
struct Country {
    #[serde(default)]
    iso_code: Option<String>,
    #[serde(default)]
    names: Option<Names>,
}

#[derive(Debug, Default, Deserialize)]
struct Names {
    #[serde(default)]
    en: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Coordinates {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

fn english(names: Option<Names>) -> String {
    names.and_then(|names| names.en).unwrap_or_default()
}

impl From<CityRecord> for Location {
    fn from(record: CityRecord) -> Self {
        let coordinates = record.location.unwrap_or_default();
        let country = record.country.unwrap_or_default();
        Location {
            latitude: coordinates.latitude.unwrap_or_default(),
            longitude: coordinates.longitude.unwrap_or_default(),
            country_code: country.iso_code.unwrap_or_default(),
            country_name: english(country.names),
            city_name: english(record.city.and_then(|city| city.names)),
            subdivision_names: record
                .subdivisions
                .unwrap_or_default()
                .into_iter()
                .map(|subdivision| english(subdivision.names))
                .collect(),
        }
    }
}

/// An opened city database.
pub struct MmdbGeoIndex {
    reader: Reader<Vec<u8>>,
}

impl std::fmt::Debug for MmdbGeoIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmdbGeoIndex")
            .field("database_type", &self.reader.metadata.database_type)
            .finish()
    }
}

impl MmdbGeoIndex {
    /// Opens a database image, decompressing it first if it is gzip data.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, GeoIpError> {
        let bytes = if is_gzip(&bytes) {
            let mut decompressed = Vec::new();
            MultiGzDecoder::new(bytes.as_slice())
                .read_to_end(&mut decompressed)
                .map_err(|err| GeoIpError::Decompress(err.to_string()))?;
            decompressed
        } else {
            bytes
        };
        let reader =
            Reader::from_source(bytes).map_err(|err| GeoIpError::Open(err.to_string()))?;
        Ok(Self { reader })
    }
}

impl GeoIndex for MmdbGeoIndex {
    fn lookup(&self, ip: IpAddr) -> Option<GeoMatch> {
        let (record, prefix_len) = self.reader.lookup_prefix::<CityRecord>(ip).ok()?;
        let network = network_string(ip, prefix_len)?;
        Some(GeoMatch {
            network,
            location: record.into(),
        })
    }
}

/// Formats the block of `prefix_len` leading bits containing `ip`.
fn network_string(ip: IpAddr, prefix_len: usize) -> Option<String> {
    // IPv4 lookups in an IPv6 tree report the length within the mapped range.
    let prefix_len = match ip {
        IpAddr::V4(_) if prefix_len > 32 => prefix_len.checked_sub(96)?,
        _ => prefix_len,
    };
    let prefix = u8::try_from(prefix_len).ok()?;
    let block = IpNetwork::new(ip, prefix).ok()?;
    let network = IpNetwork::new(block.network(), prefix).ok()?;
    Some(network.to_string())
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x1f, 0x8b])
}

/// Where a lazily opened database comes from.
#[derive(Debug, Clone)]
pub enum GeoSource {
    Path(PathBuf),
    Static(&'static [u8]),
}

impl GeoSource {
    fn load(&self) -> Result<MmdbGeoIndex, GeoIpError> {
        let bytes = match self {
            GeoSource::Path(path) => fs::read(path).map_err(|err| GeoIpError::Read {
                path: path.display().to_string(),
                message: err.to_string(),
            })?,
            GeoSource::Static(bytes) => bytes.to_vec(),
        };
        MmdbGeoIndex::from_bytes(bytes)
    }
}

/// Opens its database on first use and keeps it for the life of the index.
#[derive(Debug)]
pub struct LazyGeoIndex {
    source: GeoSource,
    opened: OnceLock<Result<MmdbGeoIndex, GeoIpError>>,
    #[cfg(test)]
    loads: std::sync::atomic::AtomicUsize,
}

impl LazyGeoIndex {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: GeoSource::Path(path.into()),
            opened: OnceLock::new(),
            #[cfg(test)]
            loads: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self {
            source: GeoSource::Static(bytes),
            opened: OnceLock::new(),
            #[cfg(test)]
            loads: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Opens the database if that has not happened yet.
    ///
    /// Binaries call this at startup so a broken database stops the process
    /// before any ingestion starts. The outcome is cached either way.
    pub fn ensure_open(&self) -> Result<&MmdbGeoIndex, GeoIpError> {
        self.opened
            .get_or_init(|| {
                #[cfg(test)]
                self.loads
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                self.source.load()
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

impl GeoIndex for LazyGeoIndex {
    /// # Panics
    ///
    /// Panics if the database cannot be opened. The database is part of the
    /// deployment, so this is a broken install rather than a lookup failure;
    /// call [`LazyGeoIndex::ensure_open`] first to report it gracefully.
    fn lookup(&self, ip: IpAddr) -> Option<GeoMatch> {
        match self.ensure_open() {
            Ok(index) => index.lookup(ip),
            Err(err) => panic!("geoip database unavailable: {err}"),
        }
    }
}

/// Index that never matches. Used when no database is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoIndex;

impl GeoIndex for NoGeoIndex {
    fn lookup(&self, _ip: IpAddr) -> Option<GeoMatch> {
        None
    }
}

/// The database embedded at build time from `TRAILSCOPE_GEOIP_DB`.
#[cfg(feature = "bundled-geoip")]
pub fn bundled() -> &'static LazyGeoIndex {
    static BUNDLED: LazyGeoIndex =
        LazyGeoIndex::from_static(include_bytes!(env!("TRAILSCOPE_GEOIP_DB")));
    &BUNDLED
}
