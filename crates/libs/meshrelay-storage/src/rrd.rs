//! Round-robin time-series store for the dashboard graphs.
//!
//! Fixed 60-second step, five archives (1-min/5-min/1-hour averages plus
//! 1-min max and min), 25 data sources. Counter sources carry monotonic
//! cumulative totals; the graph endpoints derive per-bucket deltas. The whole
//! structure snapshots to `metrics.rrd` as msgpack.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const TS_STEP_SECS: u64 = 60;
pub const DS_COUNT: usize = 25;

/// Data source names, in column order.
pub const DATA_SOURCES: [&str; DS_COUNT] = [
    "rx_count",
    "tx_count",
    "drop_count",
    "avg_rssi",
    "avg_snr",
    "avg_length",
    "avg_score",
    "neighbor_count",
    "type_0",
    "type_1",
    "type_2",
    "type_3",
    "type_4",
    "type_5",
    "type_6",
    "type_7",
    "type_8",
    "type_9",
    "type_10",
    "type_11",
    "type_12",
    "type_13",
    "type_14",
    "type_15",
    "type_other",
];

/// The three counter sources; everything else is a gauge.
pub const COUNTER_SOURCES: [&str; 3] = ["rx_count", "tx_count", "drop_count"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consolidation {
    Average,
    Max,
    Min,
}

impl Consolidation {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "average" => Some(Consolidation::Average),
            "max" => Some(Consolidation::Max),
            "min" => Some(Consolidation::Min),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("snapshot decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Slot {
    bucket: u64,
    sums: Vec<f64>,
    counts: Vec<u32>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            bucket: 0,
            sums: vec![0.0; DS_COUNT],
            counts: vec![0; DS_COUNT],
        }
    }

    fn reset(&mut self, bucket: u64) {
        self.bucket = bucket;
        self.sums.iter_mut().for_each(|value| *value = 0.0);
        self.counts.iter_mut().for_each(|count| *count = 0);
    }

    fn merge(&mut self, kind: Consolidation, values: &[f64; DS_COUNT]) {
        for (index, value) in values.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            match kind {
                Consolidation::Average => {
                    self.sums[index] += value;
                    self.counts[index] += 1;
                }
                Consolidation::Max => {
                    if self.counts[index] == 0 || *value > self.sums[index] {
                        self.sums[index] = *value;
                    }
                    self.counts[index] = 1;
                }
                Consolidation::Min => {
                    if self.counts[index] == 0 || *value < self.sums[index] {
                        self.sums[index] = *value;
                    }
                    self.counts[index] = 1;
                }
            }
        }
    }

    fn value(&self, kind: Consolidation, index: usize) -> Option<f64> {
        if self.counts[index] == 0 {
            return None;
        }
        match kind {
            Consolidation::Average => Some(self.sums[index] / f64::from(self.counts[index])),
            Consolidation::Max | Consolidation::Min => Some(self.sums[index]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Archive {
    kind: Consolidation,
    step_secs: u64,
    rows: usize,
    slots: Vec<Slot>,
}

impl Archive {
    fn new(kind: Consolidation, steps_per_row: u64, rows: usize) -> Self {
        Self {
            kind,
            step_secs: TS_STEP_SECS * steps_per_row,
            rows,
            slots: vec![Slot::empty(); rows],
        }
    }

    fn span_secs(&self) -> u64 {
        self.step_secs * self.rows as u64
    }

    fn update(&mut self, timestamp: u64, values: &[f64; DS_COUNT]) {
        let bucket = timestamp / self.step_secs;
        let index = (bucket % self.rows as u64) as usize;
        let slot = &mut self.slots[index];
        if slot.bucket != bucket {
            slot.reset(bucket);
        }
        slot.merge(self.kind, values);
    }

    fn slot_for_bucket(&self, bucket: u64) -> Option<&Slot> {
        let slot = &self.slots[(bucket % self.rows as u64) as usize];
        (slot.bucket == bucket).then_some(slot)
    }
}

/// Result of a fetch over one archive: time-major rows, `None` = unknown.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub start_time: u64,
    pub end_time: u64,
    pub step: u64,
    pub data_sources: Vec<String>,
    pub timestamps: Vec<u64>,
    pub rows: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeSeriesStore {
    archives: Vec<Archive>,
    last_update: u64,
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeriesStore {
    pub fn new() -> Self {
        Self {
            archives: vec![
                Archive::new(Consolidation::Average, 1, 10080),
                Archive::new(Consolidation::Average, 5, 8640),
                Archive::new(Consolidation::Average, 60, 8760),
                Archive::new(Consolidation::Max, 1, 10080),
                Archive::new(Consolidation::Min, 1, 10080),
            ],
            last_update: 0,
        }
    }

    /// Load a snapshot, or start fresh when the file is absent or unreadable.
    pub fn open(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match rmp_serde::from_slice(&bytes) {
                Ok(store) => store,
                Err(err) => {
                    log::warn!("discarding unreadable time-series snapshot: {err}");
                    Self::new()
                }
            },
            Err(_) => Self::new(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SeriesError> {
        let bytes = rmp_serde::to_vec(self)?;
        let tmp_path = path.with_extension("rrd.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Feed one sample row. Updates at or before the previous update time
    /// are skipped, mirroring the write-once bucket discipline.
    pub fn update(&mut self, timestamp: u64, values: &[f64; DS_COUNT]) {
        if timestamp <= self.last_update {
            log::debug!(
                "skipping time-series update: timestamp {timestamp} <= last_update {}",
                self.last_update
            );
            return;
        }
        for archive in &mut self.archives {
            archive.update(timestamp, values);
        }
        self.last_update = timestamp;
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Fetch a bucketed window from the finest archive of the requested kind
    /// that spans it.
    pub fn fetch(&self, start: u64, end: u64, kind: Consolidation) -> Option<FetchResult> {
        if end <= start {
            return None;
        }
        let reference = self.last_update.max(end);
        let archive = self
            .archives
            .iter()
            .filter(|archive| archive.kind == kind)
            .find(|archive| reference.saturating_sub(start) <= archive.span_secs())
            .or_else(|| self.archives.iter().rev().find(|archive| archive.kind == kind))?;

        let step = archive.step_secs;
        let first_bucket = start / step;
        let last_bucket = end.div_ceil(step);
        let mut timestamps = Vec::new();
        let mut rows = Vec::new();
        for bucket in first_bucket..last_bucket {
            timestamps.push(bucket * step);
            match archive.slot_for_bucket(bucket) {
                Some(slot) => rows.push(
                    (0..DS_COUNT)
                        .map(|index| slot.value(archive.kind, index))
                        .collect(),
                ),
                None => rows.push(vec![None; DS_COUNT]),
            }
        }
        Some(FetchResult {
            start_time: first_bucket * step,
            end_time: last_bucket * step,
            step,
            data_sources: DATA_SOURCES.iter().map(|name| name.to_string()).collect(),
            timestamps,
            rows,
        })
    }
}

/// Assemble the 25-column sample row for one packet record.
pub fn packet_sample(
    cumulative: &crate::records::CumulativeCounts,
    rssi: f64,
    snr: f64,
    length: f64,
    score: f64,
) -> [f64; DS_COUNT] {
    let mut values = [f64::NAN; DS_COUNT];
    values[0] = cumulative.rx_total as f64;
    values[1] = cumulative.tx_total as f64;
    values[2] = cumulative.drop_total as f64;
    values[3] = rssi;
    values[4] = snr;
    values[5] = length;
    values[6] = score;
    // neighbor_count (index 7) stays unknown; the sqlite view is authoritative
    for (offset, count) in cumulative.type_counts.iter().enumerate() {
        values[8 + offset] = *count as f64;
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::CumulativeCounts;

    fn sample(rx: u64) -> [f64; DS_COUNT] {
        let counts = CumulativeCounts {
            rx_total: rx,
            tx_total: rx / 2,
            drop_total: rx - rx / 2,
            type_counts: [0; 17],
        };
        packet_sample(&counts, -90.0, 7.5, 32.0, 0.5)
    }

    #[test]
    fn counters_read_back_as_cumulative_totals() {
        let mut store = TimeSeriesStore::new();
        let base = 1_700_000_000u64;
        store.update(base, &sample(10));
        store.update(base + 60, &sample(20));
        store.update(base + 120, &sample(35));

        let result = store
            .fetch(base, base + 180, Consolidation::Average)
            .expect("fetch");
        assert_eq!(result.step, TS_STEP_SECS);
        let rx: Vec<Option<f64>> = result.rows.iter().map(|row| row[0]).collect();
        assert_eq!(rx, vec![Some(10.0), Some(20.0), Some(35.0)]);
        // deltas over the interval equal the inserts in that interval
        assert_eq!(35.0 - 10.0, 25.0);
    }

    #[test]
    fn same_bucket_samples_are_averaged() {
        let mut store = TimeSeriesStore::new();
        let base = 1_700_000_000u64 - (1_700_000_000u64 % TS_STEP_SECS);
        store.update(base + 1, &sample(10));
        store.update(base + 2, &sample(20));

        let result = store
            .fetch(base, base + 60, Consolidation::Average)
            .expect("fetch");
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], Some(15.0));
    }

    #[test]
    fn max_and_min_archives_consolidate() {
        let mut store = TimeSeriesStore::new();
        let base = 1_700_000_000u64 - (1_700_000_000u64 % TS_STEP_SECS);
        store.update(base + 1, &sample(10));
        store.update(base + 2, &sample(30));

        let max = store.fetch(base, base + 60, Consolidation::Max).expect("max");
        assert_eq!(max.rows[0][0], Some(30.0));
        let min = store.fetch(base, base + 60, Consolidation::Min).expect("min");
        assert_eq!(min.rows[0][0], Some(10.0));
    }

    #[test]
    fn stale_updates_are_skipped() {
        let mut store = TimeSeriesStore::new();
        let base = 1_700_000_000u64;
        store.update(base, &sample(10));
        store.update(base - 60, &sample(99));
        assert_eq!(store.last_update(), base);
    }

    #[test]
    fn empty_buckets_read_as_unknown() {
        let mut store = TimeSeriesStore::new();
        let base = 1_700_000_000u64 - (1_700_000_000u64 % TS_STEP_SECS);
        store.update(base + 1, &sample(10));

        let result = store
            .fetch(base, base + 180, Consolidation::Average)
            .expect("fetch");
        assert_eq!(result.rows.len(), 3);
        assert!(result.rows[1].iter().all(Option::is_none));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metrics.rrd");

        let mut store = TimeSeriesStore::new();
        store.update(1_700_000_000, &sample(42));
        store.save(&path).expect("save");

        let loaded = TimeSeriesStore::open(&path);
        assert_eq!(loaded.last_update(), 1_700_000_000);
        let result = loaded
            .fetch(1_700_000_000 - 60, 1_700_000_000 + 60, Consolidation::Average)
            .expect("fetch");
        assert!(result.rows.iter().any(|row| row[0] == Some(42.0)));
    }
}
