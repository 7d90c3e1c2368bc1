//! Per-day CSV record of published variant keys.
//!
//! The manifest is updated by read, merge, overwrite. There is no lock and no
//! conditional write: two invocations that read the same day's file before
//! either writes will race, and the later write drops the earlier rows.

use crate::config::ManifestTimezone;
use crate::constants::{MANIFEST_CONTENT_TYPE, MANIFEST_FILE_SUFFIX};
use crate::error::{PipelineError, Result};
use crate::store::{HeadResult, ObjectStore};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const HEADER: [&str; 2] = ["name", "date"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub date: String,
}

impl ManifestEntry {
    pub fn new(name: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            date: date.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyManifest {
    entries: Vec<ManifestEntry>,
}

impl DailyManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    /// Parses a manifest. Any malformed row fails the whole decode, with
    /// `row` counted from 1 after the header.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);

        let mut entries = Vec::new();
        for (idx, record) in reader.deserialize::<ManifestEntry>().enumerate() {
            let entry = record.map_err(|e| PipelineError::ManifestDecode {
                row: idx + 1,
                reason: e.to_string(),
            })?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Canonical form: every field quoted, `\n` line endings, header first.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encode_err = |e: csv::Error| PipelineError::ManifestEncode(e.to_string());

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Always)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(HEADER).map_err(encode_err)?;
        for entry in &self.entries {
            writer.serialize(entry).map_err(encode_err)?;
        }
        writer
            .into_inner()
            .map_err(|e| PipelineError::ManifestEncode(e.to_string()))
    }
}

/// Manifest key for the calendar day of `now` in `timezone`.
pub fn manifest_key(folder: &str, now: DateTime<Utc>, timezone: ManifestTimezone) -> String {
    let local = now.with_timezone(&timezone.offset());
    format!("{}{}{}", folder, local.format("%Y_%m_%d"), MANIFEST_FILE_SUFFIX)
}

/// UTC timestamp with millisecond precision, e.g. `2026-10-18T09:30:00.000Z`.
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A manifest read from the store and not yet written back.
#[derive(Debug, Clone)]
pub struct PendingManifest {
    key: String,
    existed: bool,
    stamp: String,
    manifest: DailyManifest,
}

impl PendingManifest {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn manifest(&self) -> &DailyManifest {
        &self.manifest
    }

    /// Adds one row per name, all with the invocation's timestamp.
    pub fn append<I, N>(&mut self, names: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        for name in names {
            self.manifest
                .push(ManifestEntry::new(name, self.stamp.clone()));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedManifest {
    pub key: String,
    pub rows: usize,
}

pub struct ManifestConsolidator<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    bucket: &'a str,
    folder: &'a str,
    cache_control: &'a str,
    timezone: ManifestTimezone,
}

impl<'a, S: ObjectStore + ?Sized> ManifestConsolidator<'a, S> {
    pub fn new(
        store: &'a S,
        bucket: &'a str,
        folder: &'a str,
        cache_control: &'a str,
        timezone: ManifestTimezone,
    ) -> Self {
        Self {
            store,
            bucket,
            folder,
            cache_control,
            timezone,
        }
    }

    /// Reads today's manifest, or starts an empty one if none exists.
    pub fn begin(&self, now: DateTime<Utc>) -> Result<PendingManifest> {
        let key = manifest_key(self.folder, now, self.timezone);
        debug!(bucket = self.bucket, key = %key, "Looking for daily manifest");

        let existed = self.store.head(self.bucket, &key)? == HeadResult::Exists;
        let manifest = if existed {
            let object = self.store.get(self.bucket, &key)?;
            DailyManifest::decode(&object.bytes)?
        } else {
            DailyManifest::new()
        };
        info!(
            key = %key,
            existed,
            rows = manifest.len(),
            "Loaded daily manifest"
        );

        Ok(PendingManifest {
            key,
            existed,
            stamp: iso_timestamp(now),
            manifest,
        })
    }

    /// Overwrites the stored manifest with `pending`.
    pub fn commit(&self, pending: PendingManifest) -> Result<CommittedManifest> {
        let bytes = pending.manifest.encode()?;
        self.store.put(
            self.bucket,
            &pending.key,
            bytes,
            MANIFEST_CONTENT_TYPE,
            self.cache_control,
        )?;

        let rows = pending.manifest.len();
        info!(key = %pending.key, rows, "Wrote daily manifest");
        Ok(CommittedManifest {
            key: pending.key,
            rows,
        })
    }

    pub fn consolidate<I, N>(&self, names: I, now: DateTime<Utc>) -> Result<CommittedManifest>
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let mut pending = self.begin(now)?;
        pending.append(names);
        self.commit(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn consolidator(store: &MemoryObjectStore) -> ManifestConsolidator<'_, MemoryObjectStore> {
        ManifestConsolidator::new(
            store,
            "media",
            "csv_log/",
            "public, max-age=86400",
            ManifestTimezone::utc(),
        )
    }

    #[test]
    fn test_manifest_key_uses_timezone() {
        let now = at(2026, 10, 17, 23, 30);
        assert_eq!(
            manifest_key("csv_log/", now, ManifestTimezone::utc()),
            "csv_log/2026_10_17_processed_images.csv"
        );
        let plus_two: ManifestTimezone = "+02:00".parse().unwrap();
        assert_eq!(
            manifest_key("csv_log/", now, plus_two),
            "csv_log/2026_10_18_processed_images.csv"
        );
    }

    #[test]
    fn test_iso_timestamp_millis() {
        let now = Utc.timestamp_millis_opt(1_792_315_800_123).unwrap();
        let stamp = iso_timestamp(now);
        assert!(stamp.ends_with(".123Z"), "{}", stamp);
        assert_eq!(stamp.len(), "2026-10-18T09:30:00.000Z".len());
    }

    #[test]
    fn test_encode_canonical_form() {
        let mut manifest = DailyManifest::new();
        manifest.push(ManifestEntry::new("processed/a, b.jpg", "2026-10-18T09:30:00.000Z"));

        let encoded = String::from_utf8(manifest.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            "\"name\",\"date\"\n\"processed/a, b.jpg\",\"2026-10-18T09:30:00.000Z\"\n"
        );
    }

    #[test]
    fn test_empty_manifest_still_has_header() {
        let encoded = DailyManifest::new().encode().unwrap();
        assert_eq!(encoded, b"\"name\",\"date\"\n");
        assert!(DailyManifest::decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let mut manifest = DailyManifest::new();
        for i in 0..5 {
            manifest.push(ManifestEntry::new(
                format!("processed/{}x{}/\"q\".jpg", i + 1, i + 1),
                "2026-10-18T00:00:00.000Z",
            ));
        }
        let encoded = manifest.encode().unwrap();
        let decoded = DailyManifest::decode(&encoded).unwrap();

        assert_eq!(decoded, manifest);
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn test_decode_accepts_unquoted_input() {
        let raw = b"name,date\nprocessed/1x1/a.jpg,2026-10-18T00:00:00.000Z\n";
        let decoded = DailyManifest::decode(raw).unwrap();
        assert_eq!(decoded.entries()[0].name, "processed/1x1/a.jpg");
    }

    #[test]
    fn test_decode_reports_bad_row() {
        let raw = b"name,date\na,b\nonly-one-column\n";
        let err = DailyManifest::decode(raw).unwrap_err();
        assert!(matches!(err, PipelineError::ManifestDecode { row: 2, .. }));
    }

    #[test]
    fn test_consolidate_creates_then_appends() {
        let store = MemoryObjectStore::new();
        let manifests = consolidator(&store);

        let first = manifests
            .consolidate(["processed/1x1/a.jpg"], at(2026, 10, 18, 8, 0))
            .unwrap();
        assert_eq!(first.key, "csv_log/2026_10_18_processed_images.csv");
        assert_eq!(first.rows, 1);

        let second = manifests
            .consolidate(["processed/2x2/b.jpg", "processed/3x3/b.jpg"], at(2026, 10, 18, 9, 0))
            .unwrap();
        assert_eq!(second.rows, 3);

        let object = store.object("media", &second.key).unwrap();
        assert_eq!(object.content_type.as_deref(), Some("text/csv"));
        assert_eq!(object.cache_control.as_deref(), Some("public, max-age=86400"));

        let stored = DailyManifest::decode(&object.bytes).unwrap();
        let names: Vec<&str> = stored.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["processed/1x1/a.jpg", "processed/2x2/b.jpg", "processed/3x3/b.jpg"]
        );
        assert_eq!(stored.entries()[1].date, stored.entries()[2].date);
    }

    #[test]
    fn test_corrupt_existing_manifest_is_fatal() {
        let store = MemoryObjectStore::new();
        store.insert(
            "media",
            "csv_log/2026_10_18_processed_images.csv",
            b"name,date\n\"unterminated,x\n".to_vec(),
            Some("text/csv"),
        );
        let result = consolidator(&store).consolidate(["k"], at(2026, 10, 18, 1, 0));
        assert!(matches!(result, Err(PipelineError::ManifestDecode { .. })));
    }

    #[test]
    fn test_interleaved_consolidations_lose_rows() {
        let store = MemoryObjectStore::new();
        let manifests = consolidator(&store);
        let now = at(2026, 10, 18, 12, 0);

        let mut first = manifests.begin(now).unwrap();
        let mut second = manifests.begin(now).unwrap();
        first.append(["processed/1x1/first.jpg"]);
        second.append(["processed/1x1/second.jpg"]);
        manifests.commit(first).unwrap();
        let last = manifests.commit(second).unwrap();

        let bytes = store.object("media", &last.key).unwrap().bytes;
        let stored = DailyManifest::decode(&bytes).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored.entries()[0].name, "processed/1x1/second.jpg");
    }
}
