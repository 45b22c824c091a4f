//! Picks the log objects of one partition that can hold records from a
//! time window.
//!
//! Objects are named
//! `<account>_CloudTrail_<region>_<yyyymmddThhmmZ>_<suffix>.json.gz`, where the
//! timestamp is the delivery time. Each day touched by the padded window is
//! listed with a prefix narrowed to that day's file names, and objects whose
//! delivery time falls outside the padded window are skipped.

use super::partition::Partition;
use crate::blob::{pages, ListRequest, ObjectSummary, Pages};
use crate::core::error::IngestError;
use crate::core::traits::BlobStore;
use crate::core::window::{Days, PaddedWindow, TimeWindow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::VecDeque;

/// Suffix of delivered log batches.
pub const LOG_OBJECT_SUFFIX: &str = ".json.gz";

const DELIVERY_TIME_FORMAT: &str = "%Y%m%dT%H%MZ";

/// Position of the delivery timestamp among the `_`-separated name fields.
const DELIVERY_TIME_FIELD: usize = 3;
const MIN_NAME_FIELDS: usize = 5;

/// A log object chosen for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedObject {
    pub key: String,
    pub size: Option<u64>,
    pub delivered_at: DateTime<Utc>,
}

/// Listing prefix for one partition and day, e.g.
/// `AWSLogs/111111111111/CloudTrail/us-east-1/2025/03/06/111111111111_CloudTrail_us-east-1_20250306`.
pub fn day_listing_prefix(partition: &Partition, day: NaiveDate) -> String {
    format!(
        "{}{}/{}_CloudTrail_{}_{}",
        partition.region_prefix(),
        day.format("%Y/%m/%d"),
        partition.account_id,
        partition.region,
        day.format("%Y%m%d"),
    )
}

/// Parses the delivery time out of an object key. `None` when the name does
/// not follow the delivery naming convention.
pub fn parse_delivery_time(key: &str) -> Option<DateTime<Utc>> {
    let filename = key.rsplit('/').next()?;
    let fields: Vec<&str> = filename.split('_').collect();
    if fields.len() < MIN_NAME_FIELDS {
        return None;
    }
    NaiveDateTime::parse_from_str(fields[DELIVERY_TIME_FIELD], DELIVERY_TIME_FORMAT)
        .ok()
        .map(|time| time.and_utc())
}

fn select(object: ObjectSummary, window: Option<&PaddedWindow>) -> Option<SelectedObject> {
    if !object.key.ends_with(LOG_OBJECT_SUFFIX) {
        return None;
    }
    let delivered_at = parse_delivery_time(&object.key)?;
    if let Some(window) = window {
        if !window.contains(delivered_at) {
            return None;
        }
    }
    Some(SelectedObject {
        key: object.key,
        size: object.size,
        delivered_at,
    })
}

/// Listing prefixes, built one at a time.
enum Prefixes {
    Days { partition: Partition, days: Days },
    Region(Option<String>),
}

impl Iterator for Prefixes {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match self {
            Prefixes::Days { partition, days } => {
                days.next().map(|day| day_listing_prefix(partition, day))
            }
            Prefixes::Region(prefix) => prefix.take(),
        }
    }
}

/// Lazily lists the objects of a partition that may hold in-window records.
///
/// Listing happens page by page as the iterator is advanced, so a caller that
/// stops early makes no further calls. Iteration ends after the first error.
pub struct SelectedObjects<'a, S: ?Sized> {
    store: &'a S,
    bucket: String,
    window: Option<PaddedWindow>,
    prefixes: Prefixes,
    listing: Option<(String, Pages<'a, S>)>,
    ready: VecDeque<SelectedObject>,
    failed: bool,
}

/// Selects the objects of `partition` for `window`. Without a window every
/// log object under the region prefix is selected.
pub fn select_objects<'a, S: BlobStore + ?Sized>(
    store: &'a S,
    bucket: &str,
    partition: &Partition,
    window: Option<TimeWindow>,
) -> SelectedObjects<'a, S> {
    let padded = window.map(|window| window.padded());
    let prefixes = match &padded {
        Some(padded) => Prefixes::Days {
            partition: partition.clone(),
            days: padded.days(),
        },
        None => Prefixes::Region(Some(partition.region_prefix())),
    };
    SelectedObjects {
        store,
        bucket: bucket.to_string(),
        window: padded,
        prefixes,
        listing: None,
        ready: VecDeque::new(),
        failed: false,
    }
}

impl<S: BlobStore + ?Sized> Iterator for SelectedObjects<'_, S> {
    type Item = Result<SelectedObject, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(object) = self.ready.pop_front() {
                return Some(Ok(object));
            }
            if self.failed {
                return None;
            }
            if let Some((prefix, listing)) = &mut self.listing {
                match listing.next() {
                    Some(Ok(page)) => {
                        let window = self.window.as_ref();
                        self.ready.extend(
                            page.objects
                                .into_iter()
                                .filter_map(|object| select(object, window)),
                        );
                        continue;
                    }
                    Some(Err(source)) => {
                        self.failed = true;
                        return Some(Err(IngestError::List {
                            bucket: self.bucket.clone(),
                            prefix: prefix.clone(),
                            source,
                        }));
                    }
                    None => self.listing = None,
                }
            }
            let prefix = self.prefixes.next()?;
            let listing = pages(self.store, ListRequest::new(self.bucket.clone(), prefix.clone()));
            self.listing = Some((prefix, listing));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use chrono::TimeZone;

    fn partition() -> Partition {
        Partition::new("AWSLogs/", "111111111111", "us-east-1")
    }

    fn key(stamp: &str) -> String {
        let day = &stamp[..8];
        format!(
            "AWSLogs/111111111111/CloudTrail/us-east-1/{}/{}/{}/111111111111_CloudTrail_us-east-1_{stamp}_AbCdEf0123456789.json.gz",
            &day[..4],
            &day[4..6],
            &day[6..8],
        )
    }

    #[test]
    fn day_prefix_narrows_to_file_names() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 6).unwrap();
        assert_eq!(
            day_listing_prefix(&partition(), day),
            "AWSLogs/111111111111/CloudTrail/us-east-1/2025/03/06/111111111111_CloudTrail_us-east-1_20250306"
        );
    }

    #[test]
    fn parses_delivery_time() {
        let time = parse_delivery_time(&key("20250306T0230Z")).expect("time");
        assert_eq!(time, Utc.with_ymd_and_hms(2025, 3, 6, 2, 30, 0).unwrap());

        let bad_stamp = "a/b/111111111111_CloudTrail_us-east-1_bad_x.json.gz";
        assert!(parse_delivery_time(bad_stamp).is_none());
        assert!(parse_delivery_time("a/b/short_name.json.gz").is_none());
    }

    #[test]
    fn selects_within_padded_window() {
        let mut store = MemoryBlobStore::new();
        for stamp in [
            "20250306T0215Z", // before padding
            "20250306T0220Z", // first padded minute
            "20250306T0300Z",
            "20250306T0325Z", // padded end, exclusive
            "20250306T0329Z",
        ] {
            store.put("trail", key(stamp), "x");
        }
        store.put(
            "trail",
            "AWSLogs/111111111111/CloudTrail/us-east-1/2025/03/06/111111111111_CloudTrail_us-east-1_20250306T0300Z_digest.json",
            "x",
        );
        store.put(
            "trail",
            "AWSLogs/111111111111/CloudTrail/us-east-1/2025/03/06/111111111111_CloudTrail_us-east-1_20250306Tgarbage_x.json.gz",
            "x",
        );

        let start = Utc.with_ymd_and_hms(2025, 3, 6, 2, 25, 0).unwrap();
        let window = TimeWindow::new(start, 55 * 60);
        let selected: Vec<String> = select_objects(&store, "trail", &partition(), Some(window))
            .map(|object| object.expect("object").key)
            .collect();

        assert_eq!(selected, vec![key("20250306T0220Z"), key("20250306T0300Z")]);
        let prefixes: Vec<String> = store
            .list_requests()
            .into_iter()
            .map(|request| request.prefix)
            .collect();
        assert_eq!(
            prefixes,
            vec!["AWSLogs/111111111111/CloudTrail/us-east-1/2025/03/06/111111111111_CloudTrail_us-east-1_20250306"]
        );
    }

    #[test]
    fn lists_each_day_across_midnight() {
        let mut store = MemoryBlobStore::new();
        store.put("trail", key("20250305T2358Z"), "x");
        store.put("trail", key("20250306T0004Z"), "x");

        let start = Utc.with_ymd_and_hms(2025, 3, 6, 0, 0, 0).unwrap();
        let window = TimeWindow::new(start, 600);
        let selected: Vec<String> = select_objects(&store, "trail", &partition(), Some(window))
            .map(|object| object.expect("object").key)
            .collect();

        assert_eq!(selected, vec![key("20250305T2358Z"), key("20250306T0004Z")]);
        assert_eq!(store.list_requests().len(), 2);
    }

    #[test]
    fn without_window_selects_every_log_object() {
        let mut store = MemoryBlobStore::new();
        store.put("trail", key("20240101T0000Z"), "x");
        store.put("trail", key("20250306T0004Z"), "x");

        let count = select_objects(&store, "trail", &partition(), None).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn longest_window_lists_only_as_far_as_consumed() {
        let mut store = MemoryBlobStore::new();
        store.put("trail", key("20250306T0230Z"), "x");

        let start = Utc.with_ymd_and_hms(2025, 3, 6, 2, 25, 0).unwrap();
        let window = TimeWindow::new(start, u64::MAX);
        let first = select_objects(&store, "trail", &partition(), Some(window))
            .next()
            .expect("first object")
            .expect("object");

        assert_eq!(first.key, key("20250306T0230Z"));
        assert_eq!(store.list_requests().len(), 1);
    }
}
