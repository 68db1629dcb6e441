//! Reads persisted activity sessions back for review.
//!
//! This is the read side of `activity_log`: it lists summary snapshots in a
//! log directory, loads the timeline a summary points at, and derives simple
//! patterns (how often each kind occurred and how far apart).

use crate::core_modules::activity_log::SessionSummary;
use crate::core_modules::debouncer::EventKind;
use crate::error::{Result, TrackerError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One row of a persisted timeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: String,
    pub frame_number: u64,
    pub activity_type: EventKind,
    pub face_center_x: Option<f64>,
    pub face_center_y: Option<f64>,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub path: PathBuf,
    pub summary: SessionSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KindPattern {
    pub count: usize,
    /// Mean frame gap between consecutive occurrences, when there are at least two.
    pub mean_interval_frames: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatternReport {
    pub by_kind: BTreeMap<EventKind, KindPattern>,
    pub horizontal_moves: (usize, usize),
    pub vertical_moves: (usize, usize),
}

impl PatternReport {
    pub fn total_movements(&self) -> usize {
        self.horizontal_moves.0 + self.horizontal_moves.1 + self.vertical_moves.0 + self.vertical_moves.1
    }
}

fn is_summary_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
        && path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem.contains("_summary"))
}

/// Every summary snapshot in `dir`, ordered by file name. A missing directory
/// is an empty history.
pub fn list_sessions(dir: impl AsRef<Path>) -> Result<Vec<StoredSession>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_summary_file(path))
        .collect();
    paths.sort();

    let mut sessions = Vec::with_capacity(paths.len());
    for path in paths {
        match fs::read_to_string(&path).map_err(TrackerError::from).and_then(|raw| {
            serde_json::from_str::<SessionSummary>(&raw).map_err(TrackerError::from)
        }) {
            Ok(summary) => sessions.push(StoredSession { path, summary }),
            Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable summary: {}", e),
        }
    }
    Ok(sessions)
}

pub fn read_timeline(summary: &SessionSummary) -> Result<Vec<TimelineEntry>> {
    let mut reader = csv::Reader::from_path(&summary.csv_log)?;
    let mut entries = Vec::new();
    for row in reader.deserialize() {
        entries.push(row?);
    }
    Ok(entries)
}

pub fn analyze(timeline: &[TimelineEntry]) -> PatternReport {
    let mut frames: BTreeMap<EventKind, Vec<u64>> = BTreeMap::new();
    for entry in timeline {
        frames.entry(entry.activity_type).or_default().push(entry.frame_number);
    }

    let by_kind = frames
        .iter()
        .map(|(kind, frames)| {
            let mean_interval_frames = (frames.len() > 1).then(|| {
                let gaps: u64 = frames.windows(2).map(|w| w[1].saturating_sub(w[0])).sum();
                gaps as f64 / (frames.len() - 1) as f64
            });
            (*kind, KindPattern { count: frames.len(), mean_interval_frames })
        })
        .collect();

    let count = |kind: EventKind| frames.get(&kind).map_or(0, Vec::len);
    PatternReport {
        by_kind,
        horizontal_moves: (count(EventKind::MoveLeft), count(EventKind::MoveRight)),
        vertical_moves: (count(EventKind::MoveUp), count(EventKind::MoveDown)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::activity_log::ActivityLog;
    use crate::core_modules::geometry::Point;

    #[test]
    fn missing_directory_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_sessions(dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn lists_and_reads_back_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ActivityLog::open("dana", dir.path()).unwrap();
        log.record(EventKind::MoveLeft, 3, Some(Point::new(80.0, 90.0)), "dx=-25.0px").unwrap();
        log.record(EventKind::Blink, 5, None, "").unwrap();
        log.finalize().unwrap();
        fs::write(dir.path().join("junk_summary.json"), "{").unwrap();

        let sessions = list_sessions(dir.path()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].summary.person_name, "dana");

        let timeline = read_timeline(&sessions[0].summary).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].activity_type, EventKind::MoveLeft);
        assert_eq!(timeline[0].face_center_x, Some(80.0));
        assert_eq!(timeline[1].face_center_x, None);
    }

    #[test]
    fn analysis_reports_counts_and_intervals() {
        let entry = |kind, frame| TimelineEntry {
            timestamp: String::new(),
            frame_number: frame,
            activity_type: kind,
            face_center_x: None,
            face_center_y: None,
            details: String::new(),
        };
        let timeline = vec![
            entry(EventKind::Blink, 10),
            entry(EventKind::MoveRight, 12),
            entry(EventKind::Blink, 30),
            entry(EventKind::Blink, 60),
            entry(EventKind::MoveUp, 61),
        ];
        let report = analyze(&timeline);
        let blink = &report.by_kind[&EventKind::Blink];
        assert_eq!(blink.count, 3);
        assert_eq!(blink.mean_interval_frames, Some(25.0));
        assert_eq!(report.by_kind[&EventKind::MoveRight].mean_interval_frames, None);
        assert_eq!(report.horizontal_moves, (0, 1));
        assert_eq!(report.vertical_moves, (1, 0));
        assert_eq!(report.total_movements(), 2);
    }
}
