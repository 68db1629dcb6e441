// THEORY:
// The `activity_log` is the durable narrative of one locked session. Every
// discrete event the evaluators fire becomes one immutable CSV row, and the
// session can be summarized at any point into a JSON snapshot.
//
// Key architectural principles:
// 1.  **Append Only**: Rows are written once and flushed. Nothing is ever
//     rewritten or deleted.
// 2.  **Counters In Memory**: Per-kind counts are kept alongside the file so a
//     summary never has to re-read the timeline.
// 3.  **Scoped Failure**: A failed write is returned to the caller and not
//     retried. Each row is encoded on its own and handed to the file in one
//     write, so a lost row never lingers in a buffer to resurface later. It is
//     not counted either: the counters only ever describe rows on disk.
// 4.  **Unique Sessions**: Every session gets a file stem nobody else holds.
//     The timeline is created with `create_new`, and a stem already taken
//     within the same second gets a `_N` suffix.

use crate::core_modules::debouncer::EventKind;
use crate::core_modules::geometry::Point;
use crate::error::Result;
use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const MAX_STEM_ATTEMPTS: u32 = 1000;

pub const CSV_HEADER: [&str; 6] = [
    "timestamp",
    "frame_number",
    "activity_type",
    "face_center_x",
    "face_center_y",
    "details",
];

/// Per-kind event counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCounts {
    counts: [u64; EventKind::COUNT],
}

impl EventCounts {
    pub fn increment(&mut self, kind: EventKind) {
        self.counts[kind.index()] += 1;
    }

    pub fn get(&self, kind: EventKind) -> u64 {
        self.counts[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Counts keyed by event name, every kind present.
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        EventKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str().to_string(), self.get(kind)))
            .collect()
    }
}

/// Live statistics for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityStats {
    pub person: String,
    pub counts: EventCounts,
    pub total: u64,
}

/// The persisted end-of-session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub person_name: String,
    pub session_start: DateTime<Local>,
    pub session_end: DateTime<Local>,
    pub session_duration_seconds: f64,
    pub activity_counts: BTreeMap<String, u64>,
    pub total_activities: u64,
    pub csv_log: PathBuf,
}

pub struct ActivityLog {
    person: String,
    log_dir: PathBuf,
    file_stem: String,
    csv_path: PathBuf,
    file: File,
    counts: EventCounts,
    session_start: DateTime<Local>,
    summaries_written: u32,
}

/// Encodes one CSV row on its own, ready for a single write.
fn encode_row<'a>(fields: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>> {
    let mut row = csv::Writer::from_writer(Vec::new());
    row.write_record(fields)?;
    row.into_inner().map_err(|e| e.into_error().into())
}

impl ActivityLog {
    /// Creates the log directory if needed and starts a fresh timeline file.
    /// An existing timeline is never reopened or truncated.
    pub fn open(person: &str, log_dir: impl AsRef<Path>) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;

        let session_start = Local::now();
        let base = format!("{}_{}", person, session_start.format("%Y%m%d_%H%M%S"));
        let mut attempt = 1;
        let (file_stem, csv_path, mut file) = loop {
            let file_stem = match attempt {
                1 => base.clone(),
                n => format!("{base}_{n}"),
            };
            let csv_path = log_dir.join(format!("{file_stem}_activities.csv"));
            match OpenOptions::new().write(true).create_new(true).open(&csv_path) {
                Ok(file) => break (file_stem, csv_path, file),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_STEM_ATTEMPTS => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };
        file.write_all(&encode_row(CSV_HEADER)?)?;
        file.flush()?;

        tracing::info!(person, csv = %csv_path.display(), "activity logging started");
        let mut log = Self::from_parts(person, log_dir, file_stem, csv_path, file);
        log.session_start = session_start;
        Ok(log)
    }

    /// Wraps an already-open timeline sink. The header is the caller's concern.
    pub(crate) fn from_parts(
        person: &str,
        log_dir: impl AsRef<Path>,
        file_stem: String,
        csv_path: PathBuf,
        file: File,
    ) -> Self {
        Self {
            person: person.to_string(),
            log_dir: log_dir.as_ref().to_path_buf(),
            file_stem,
            csv_path,
            file,
            counts: EventCounts::default(),
            session_start: Local::now(),
            summaries_written: 0,
        }
    }

    pub fn person(&self) -> &str {
        &self.person
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Appends one row to the timeline and counts the event once it is written.
    pub fn record(&mut self, kind: EventKind, frame_index: u64, position: Option<Point>, detail: &str) -> Result<()> {
        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        let (x, y) = match position {
            Some(p) => (format!("{:.1}", p.x), format!("{:.1}", p.y)),
            None => (String::new(), String::new()),
        };
        let frame = frame_index.to_string();
        let row = encode_row([timestamp.as_str(), frame.as_str(), kind.as_str(), x.as_str(), y.as_str(), detail])?;
        self.file.write_all(&row)?;
        self.file.flush()?;

        self.counts.increment(kind);
        Ok(())
    }

    pub fn summarize(&self) -> ActivityStats {
        ActivityStats {
            person: self.person.clone(),
            counts: self.counts.clone(),
            total: self.counts.total(),
        }
    }

    /// Writes a summary snapshot and returns its path. Each call writes a new file.
    pub fn finalize(&mut self) -> Result<PathBuf> {
        let session_end = Local::now();
        let duration = (session_end - self.session_start).num_milliseconds() as f64 / 1000.0;
        let summary = SessionSummary {
            person_name: self.person.clone(),
            session_start: self.session_start,
            session_end,
            session_duration_seconds: (duration * 100.0).round() / 100.0,
            activity_counts: self.counts.to_map(),
            total_activities: self.counts.total(),
            csv_log: self.csv_path.clone(),
        };

        self.summaries_written += 1;
        let name = match self.summaries_written {
            1 => format!("{}_summary.json", self.file_stem),
            n => format!("{}_summary_{}.json", self.file_stem, n),
        };
        let path = self.log_dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(&summary)?)?;

        tracing::info!(
            person = %self.person,
            duration_s = summary.session_duration_seconds,
            total = summary.total_activities,
            summary = %path.display(),
            "activity summary saved"
        );
        Ok(path)
    }
}
