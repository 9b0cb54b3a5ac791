//! Shared types for auditscan
//!
//! This crate contains data structures used across multiple auditscan crates.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

// ============================================================================
// Record Types
// ============================================================================

/// A matched log line together with the timestamp parsed out of it
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchedRecord {
    /// 1-based line number within the scanned object
    #[serde(skip)]
    pub line_number: u64,

    /// Original raw log line, without its line separator
    #[serde(rename = "entry")]
    pub raw: String,

    /// Timestamp parsed from `raw`
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: DateTime<Utc>,
}

impl MatchedRecord {
    pub fn new(line_number: u64, raw: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            line_number,
            raw,
            timestamp,
        }
    }
}

fn serialize_rfc3339<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Why a matched line could not be turned into a record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum LineErrorReason {
    #[error("timestamp start marker not found")]
    NoStartMarker,

    #[error("timestamp end marker not found")]
    NoEndMarker,

    #[error("timestamp could not be parsed")]
    TimestampUnparsable,
}

/// A matched line that was dropped because its timestamp could not be extracted
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("line {line_number}: {reason}")]
pub struct LineError {
    pub line_number: u64,
    pub raw: String,
    pub reason: LineErrorReason,
}

impl LineError {
    pub fn new(line_number: u64, raw: String, reason: LineErrorReason) -> Self {
        Self {
            line_number,
            raw,
            reason,
        }
    }
}

/// An ordered group of records handed to a sink in one delivery call
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Zero-based position of this batch within its scan
    #[serde(rename = "batch")]
    pub sequence: u64,

    pub records: Vec<MatchedRecord>,
}

impl Batch {
    pub fn new(sequence: u64, records: Vec<MatchedRecord>) -> Self {
        Self { sequence, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Pipeline Types
// ============================================================================

/// The unit of transfer between the scan producer and its consumer.
///
/// Exactly one terminal item (`EndOfStream` or `Fatal`) is sent per scan,
/// and nothing follows it.
#[derive(Debug)]
pub enum PipelineItem {
    Record(MatchedRecord),
    LineError(LineError),
    EndOfStream,
    Fatal(ScanError),
}

impl PipelineItem {
    /// Whether this item ends the queue's content
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::Fatal(_))
    }
}

/// Errors that end a scan without reaching end-of-stream
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to read input stream: {0}")]
    Read(#[from] std::io::Error),

    #[error("scan cancelled")]
    Cancelled,

    #[error("receiver disconnected")]
    Disconnected,

    #[error("producer stopped without a terminal item")]
    ProducerLost,
}

/// Errors a sink can report for a single batch
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The batch was not delivered; later batches may still succeed
    #[error("batch delivery failed: {0}")]
    Delivery(String),

    /// Nobody is receiving anymore
    #[error("sink disconnected")]
    Disconnected,
}

/// Outcome of a scan that reached end-of-stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    /// Records in batches the sink accepted
    pub delivered: u64,

    /// Matched lines dropped because their timestamp could not be extracted
    #[serde(rename = "skippedCount")]
    pub skipped: u64,

    /// Batches the sink rejected
    pub failed_batches: u64,

    /// Batches handed to the sink
    pub batches: u64,
}

impl ScanSummary {
    /// Whether the scan found nothing at all
    pub fn is_empty(&self) -> bool {
        self.batches == 0 && self.skipped == 0
    }
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no lines found");
        }
        write!(
            f,
            "{} lines delivered in {} batches, {} skipped",
            self.delivered, self.batches, self.skipped
        )?;
        if self.failed_batches > 0 {
            write!(f, ", {} batches failed", self.failed_batches)?;
        }
        Ok(())
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Accumulated elapsed time per named phase (`download`, `decompress`, `parsing`, ...).
///
/// Diagnostic only: nothing reads it to make decisions.
#[derive(Debug, Default)]
pub struct DurationMap {
    phases: Mutex<BTreeMap<String, Duration>>,
}

impl DurationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `elapsed` to the running total of `phase`
    pub fn increase(&self, phase: &str, elapsed: Duration) {
        let mut phases = self.phases.lock();
        match phases.get_mut(phase) {
            Some(total) => *total += elapsed,
            None => {
                phases.insert(phase.to_string(), elapsed);
            }
        }
    }

    /// Start timing `phase`; the elapsed time is added when the timer drops
    pub fn track<'a>(&'a self, phase: &'a str) -> PhaseTimer<'a> {
        PhaseTimer {
            map: self,
            phase,
            start: Instant::now(),
        }
    }

    pub fn get(&self, phase: &str) -> Option<Duration> {
        self.phases.lock().get(phase).copied()
    }

    /// Copy of all totals, ordered by phase name
    pub fn snapshot(&self) -> Vec<(String, Duration)> {
        self.phases
            .lock()
            .iter()
            .map(|(name, elapsed)| (name.clone(), *elapsed))
            .collect()
    }

    /// Totals in milliseconds, for JSON reports
    pub fn to_millis(&self) -> BTreeMap<String, f64> {
        self.snapshot()
            .into_iter()
            .map(|(name, elapsed)| (name, elapsed.as_secs_f64() * 1000.0))
            .collect()
    }

    /// Log every phase total at info level
    pub fn log_all(&self) {
        for (name, elapsed) in self.snapshot() {
            tracing::info!("{} took {:?}", name, elapsed);
        }
    }
}

/// Drop guard returned by [`DurationMap::track`]
pub struct PhaseTimer<'a> {
    map: &'a DurationMap,
    phase: &'a str,
    start: Instant,
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        self.map.increase(self.phase, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_duration_map_accumulates() {
        let map = DurationMap::new();
        map.increase("download", Duration::from_millis(5));
        map.increase("download", Duration::from_millis(7));
        map.increase("parsing", Duration::from_millis(1));

        assert_eq!(map.get("download"), Some(Duration::from_millis(12)));
        assert_eq!(map.get("parsing"), Some(Duration::from_millis(1)));
        assert_eq!(map.get("decompress"), None);

        let names: Vec<_> = map.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["download", "parsing"]);
    }

    #[test]
    fn test_phase_timer_records_on_drop() {
        let map = DurationMap::new();
        {
            let _timer = map.track("parsing");
        }
        assert!(map.get("parsing").is_some());
    }

    #[test]
    fn test_record_serializes_entry_and_timestamp() {
        let ts = Utc.timestamp_opt(1546441276, 105964000).unwrap();
        let record = MatchedRecord::new(3, "line".to_string(), ts);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entry"], "line");
        assert_eq!(json["timestamp"], "2019-01-02T15:01:16.105964Z");
        assert!(json.get("line_number").is_none());
    }

    #[test]
    fn test_summary_display_no_lines_found() {
        assert_eq!(ScanSummary::default().to_string(), "no lines found");

        let summary = ScanSummary {
            delivered: 3,
            skipped: 1,
            failed_batches: 0,
            batches: 1,
        };
        assert_eq!(summary.to_string(), "3 lines delivered in 1 batches, 1 skipped");
    }

    #[test]
    fn test_terminal_items() {
        assert!(PipelineItem::EndOfStream.is_terminal());
        assert!(PipelineItem::Fatal(ScanError::Cancelled).is_terminal());
        let err = LineError::new(1, String::new(), LineErrorReason::NoStartMarker);
        assert!(!PipelineItem::LineError(err).is_terminal());
    }
}
