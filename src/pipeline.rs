// THEORY:
// The `pipeline` module is the top-level API for the tracking loop. It takes
// the detection collaborator's output for one frame and runs it through every
// stage in a fixed order, strictly one frame at a time.
//
// Stage order per frame:
// 1.  **Bookkeeping**: advance the frame counter, update throughput, and absorb
//     any newer servo status into the controller's angle estimate.
// 2.  **Gestures**: if any face is present, evaluate blink/smile on the mesh.
// 3.  **Locked Identity**: find the locked identity's accepted face. If present,
//     measure movement, append gesture and movement events to the activity log,
//     and drive the actuator (nudges and/or continuous tracking, per config).
// 4.  **Recovery**: while a lock exists, advance the lost-target state machine.
//
// Nothing in a frame is fatal. Actuator and storage failures are logged and
// counted in the `FrameReport`, and the loop moves on.

use crate::config::TrackerConfig;
use crate::core_modules::activity_log::{ActivityLog, ActivityStats};
use crate::core_modules::actuator::{ActuatorLink, PanCommand};
use crate::core_modules::debouncer::EventKind;
use crate::core_modules::geometry::{FaceMesh, FaceObservation, FrameSize, Point};
use crate::core_modules::gesture::{GestureEvaluator, GestureState};
use crate::core_modules::identity::IdentityRegistry;
use crate::core_modules::movement::{MovementEvaluator, MovementEvent, MovementState};
use crate::core_modules::tracking_controller::{TrackingController, TrackingMode};
use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

/// Everything the detection collaborator produced for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInput {
    pub frame_size: FrameSize,
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
    /// Dense landmarks for the primary face, when the mesh resolved.
    #[serde(default)]
    pub mesh: Option<FaceMesh>,
}

/// Operator controls, each mapping to one state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "arg", rename_all = "snake_case")]
pub enum OperatorCommand {
    /// Lock onto an identity by index or name. Unknown input means no lock.
    Lock(String),
    ClearLock,
    Center,
    ToggleSearch,
    RaiseThreshold,
    LowerThreshold,
    ReloadIdentities(Vec<String>),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// What happened during one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub gestures: Vec<EventKind>,
    pub movements: Vec<MovementEvent>,
    /// Center of the locked identity's face, if it was seen this frame.
    pub locked_center: Option<Point>,
    pub mode: TrackingMode,
    /// The controller's angle estimate after this frame.
    pub angle: i32,
    /// Angle commanded by continuous tracking this frame.
    pub commanded_angle: Option<i32>,
    pub nudges: Vec<PanCommand>,
    /// Angle commanded by the search sweep this frame.
    pub sweep_angle: Option<i32>,
    pub fps: f64,
    pub actuator_failures: u32,
    pub storage_failures: u32,
}

/// Frames per second over rolling one-second windows.
#[derive(Debug, Default)]
struct ThroughputMeter {
    window_start: Option<Instant>,
    frames_in_window: u32,
    fps: f64,
}

impl ThroughputMeter {
    fn tick(&mut self, now: Instant) -> f64 {
        let start = *self.window_start.get_or_insert(now);
        self.frames_in_window += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= THROUGHPUT_WINDOW {
            self.fps = self.frames_in_window as f64 / elapsed.as_secs_f64();
            self.frames_in_window = 0;
            self.window_start = Some(now);
        }
        self.fps
    }
}

/// The main, top-level struct for the tracking loop.
pub struct TrackingPipeline<A: ActuatorLink> {
    config: TrackerConfig,
    frame_index: u64,
    throughput: ThroughputMeter,
    gesture: GestureEvaluator,
    gesture_state: GestureState,
    movement: MovementEvaluator,
    movement_state: MovementState,
    controller: TrackingController<A>,
    identities: IdentityRegistry,
    activity_log: Option<ActivityLog>,
}

impl<A: ActuatorLink> TrackingPipeline<A> {
    pub fn new(config: TrackerConfig, link: A, identities: Vec<String>) -> Self {
        Self {
            frame_index: 0,
            throughput: ThroughputMeter::default(),
            gesture: GestureEvaluator::new(config.gesture.clone()),
            gesture_state: GestureState::new(),
            movement: MovementEvaluator::new(config.movement.clone()),
            movement_state: MovementState::new(),
            controller: TrackingController::new(config.tracking.clone(), config.actuator.clone(), link),
            identities: IdentityRegistry::new(identities, &config.recognition),
            activity_log: None,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn controller(&self) -> &TrackingController<A> {
        &self.controller
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    pub fn gesture_state(&self) -> &GestureState {
        &self.gesture_state
    }

    pub fn movement_state(&self) -> &MovementState {
        &self.movement_state
    }

    pub fn activity_stats(&self) -> Option<ActivityStats> {
        self.activity_log.as_ref().map(ActivityLog::summarize)
    }

    pub fn process_frame(&mut self, frame: &FrameInput) -> FrameReport {
        self.process_frame_at(frame, Instant::now())
    }

    /// Runs one frame with an explicit clock reading.
    pub fn process_frame_at(&mut self, frame: &FrameInput, now: Instant) -> FrameReport {
        // --- 1. Bookkeeping ---
        self.frame_index += 1;
        let frame_index = self.frame_index;
        let fps = self.throughput.tick(now);
        self.controller.absorb_status();

        let mut report = FrameReport {
            frame_index,
            gestures: Vec::new(),
            movements: Vec::new(),
            locked_center: None,
            mode: self.controller.mode(),
            angle: self.controller.current_angle(),
            commanded_angle: None,
            nudges: Vec::new(),
            sweep_angle: None,
            fps,
            actuator_failures: 0,
            storage_failures: 0,
        };

        // --- 2. Gestures ---
        if !frame.faces.is_empty() {
            report.gestures =
                self.gesture
                    .evaluate(frame.mesh.as_ref(), frame.frame_size, frame_index, &mut self.gesture_state);
        }

        // --- 3. Locked Identity ---
        report.locked_center = self.identities.find_locked(&frame.faces).map(|face| face.bbox.center());
        if let Some(center) = report.locked_center {
            report.movements = self.movement.evaluate(center, frame_index, &mut self.movement_state);
            self.log_events(&mut report, center);
            self.actuate(&mut report, center, frame.frame_size.width);
        }

        // --- 4. Recovery ---
        if self.identities.locked().is_some() {
            match self.controller.observe_target(report.locked_center.is_some(), now) {
                Ok(angle) => report.sweep_angle = angle,
                Err(e) => {
                    report.sweep_angle = Some(self.controller.current_angle());
                    note_actuator_failure(&mut report, e);
                }
            }
        }

        report.mode = self.controller.mode();
        report.angle = self.controller.current_angle();
        report
    }

    fn log_events(&mut self, report: &mut FrameReport, center: Point) {
        let Some(log) = self.activity_log.as_mut() else {
            return;
        };
        let entries = report
            .gestures
            .iter()
            .map(|kind| (*kind, String::new()))
            .chain(report.movements.iter().map(|m| (m.kind, m.detail())));
        for (kind, detail) in entries {
            if let Err(e) = log.record(kind, report.frame_index, Some(center), &detail) {
                tracing::warn!(%kind, frame = report.frame_index, "activity entry lost: {}", e);
                report.storage_failures += 1;
            }
        }
    }

    fn actuate(&mut self, report: &mut FrameReport, center: Point, frame_width: u32) {
        let mode = self.config.tracking.mode;
        if mode.nudges() {
            let kinds: Vec<EventKind> = report.movements.iter().map(|m| m.kind).collect();
            for kind in kinds {
                match self.controller.nudge(kind) {
                    Ok(Some(command)) => report.nudges.push(command),
                    Ok(None) => {}
                    Err(e) => note_actuator_failure(report, e),
                }
            }
        }
        if mode.continuous() {
            match self.controller.track_position(center.x, frame_width) {
                Ok(angle) => report.commanded_angle = angle,
                Err(e) => note_actuator_failure(report, e),
            }
        }
    }

    /// Applies an operator control.
    pub fn apply(&mut self, command: OperatorCommand, now: Instant) -> Result<Flow> {
        match command {
            OperatorCommand::Lock(input) => {
                self.lock(&input);
            }
            OperatorCommand::ClearLock => {
                self.clear_lock()?;
            }
            OperatorCommand::Center => {
                self.controller.recenter()?;
                tracing::info!("camera centered");
            }
            OperatorCommand::ToggleSearch => {
                let mode = self.controller.toggle_search(now)?;
                tracing::info!(?mode, "search toggled");
            }
            OperatorCommand::RaiseThreshold => {
                let threshold = self.identities.raise_threshold();
                tracing::info!(threshold, "distance threshold raised");
            }
            OperatorCommand::LowerThreshold => {
                let threshold = self.identities.lower_threshold();
                tracing::info!(threshold, "distance threshold lowered");
            }
            OperatorCommand::ReloadIdentities(names) => {
                let dropped = self.identities.rebuild(names);
                tracing::info!(count = self.identities.names().len(), "identities reloaded");
                if let Some(name) = dropped {
                    tracing::warn!(name = %name, "locked identity no longer enrolled, lock cleared");
                    self.end_session()?;
                }
            }
            OperatorCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Locks onto an identity and starts its activity log. Any previous session
    /// is finalized first. Returns the resolved name, or `None` for no lock.
    pub fn lock(&mut self, input: &str) -> Option<String> {
        if let Err(e) = self.finish_log() {
            tracing::warn!("previous session did not close cleanly: {}", e);
        }
        self.movement_state = MovementState::new();
        let name = self.identities.lock(input).map(str::to_string);
        if let Some(name) = &name {
            tracing::info!(name = %name, "locked identity for tracking");
            match ActivityLog::open(name, &self.config.activity.log_dir) {
                Ok(log) => self.activity_log = Some(log),
                Err(e) => tracing::warn!(name = %name, "activity logging disabled for this session: {}", e),
            }
        }
        // Locked or not, any search for the previous target ends here.
        if let Err(e) = self.controller.recenter() {
            tracing::warn!("could not center camera on lock change: {}", e);
        }
        name
    }

    /// Clears the lock, saving the session summary. Returns the summary path.
    pub fn clear_lock(&mut self) -> Result<Option<PathBuf>> {
        self.identities.clear_lock();
        let summary = self.end_session()?;
        tracing::info!("lock cleared");
        Ok(summary)
    }

    /// Flushes the session summary and centers the camera on the way out.
    pub fn shutdown(mut self) -> Result<Option<PathBuf>> {
        self.identities.clear_lock();
        self.end_session()
    }

    fn finish_log(&mut self) -> Result<Option<PathBuf>> {
        match self.activity_log.take() {
            Some(mut log) => log.finalize().map(Some),
            None => Ok(None),
        }
    }

    fn end_session(&mut self) -> Result<Option<PathBuf>> {
        let summary = self.finish_log()?;
        match self.controller.recenter() {
            Ok(()) | Err(TrackerError::ActuatorUnavailable) => {}
            Err(e) => return Err(e),
        }
        Ok(summary)
    }
}

fn note_actuator_failure(report: &mut FrameReport, error: TrackerError) {
    match error {
        TrackerError::ActuatorUnavailable => {
            tracing::debug!(frame = report.frame_index, "actuator unavailable, command dropped");
        }
        other => tracing::warn!(frame = report.frame_index, "actuator command failed: {}", other),
    }
    report.actuator_failures += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActuationMode;
    use crate::core_modules::actuator::{MemoryActuator, Published};
    use crate::core_modules::geometry::BoundingBox;

    const FRAME: FrameSize = FrameSize { width: 1000, height: 1000 };

    fn pipeline(dir: &std::path::Path, mode: ActuationMode) -> TrackingPipeline<MemoryActuator> {
        let mut config = TrackerConfig::default();
        config.activity.log_dir = dir.to_path_buf();
        config.tracking.mode = mode;
        TrackingPipeline::new(config, MemoryActuator::new(true), vec!["alice".into(), "bob".into()])
    }

    fn face(name: &str, cx: f64, cy: f64) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox { x1: cx - 50.0, y1: cy - 50.0, x2: cx + 50.0, y2: cy + 50.0 },
            landmarks: Vec::new(),
            name: name.to_string(),
            distance: 0.2,
        }
    }

    fn frame(faces: Vec<FaceObservation>) -> FrameInput {
        FrameInput { frame_size: FRAME, faces, mesh: None }
    }

    #[test]
    fn without_lock_no_tracking_or_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        let now = Instant::now();
        for _ in 0..40 {
            let report = p.process_frame_at(&frame(vec![face("alice", 500.0, 500.0)]), now);
            assert_eq!(report.locked_center, None);
            assert_eq!(report.mode, TrackingMode::Tracking);
        }
        assert!(p.controller().link().published().is_empty());
        assert_eq!(p.frame_index(), 40);
    }

    #[test]
    fn locked_movement_is_logged_nudged_and_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        assert_eq!(p.lock("ALICE").as_deref(), Some("alice"));
        let now = Instant::now();

        let first = p.process_frame_at(&frame(vec![face("alice", 500.0, 500.0)]), now);
        assert!(first.movements.is_empty());
        assert_eq!(first.commanded_angle, Some(90));

        let second = p.process_frame_at(&frame(vec![face("bob", 100.0, 100.0), face("alice", 600.0, 500.0)]), now);
        assert_eq!(second.movements.len(), 1);
        assert_eq!(second.movements[0].kind, EventKind::MoveRight);
        assert_eq!(second.nudges, vec![PanCommand::Left]);
        // window [500, 600] -> 550, shift 50 is not above 5% of 1000
        assert_eq!(second.commanded_angle, None);

        let stats = p.activity_stats().unwrap();
        assert_eq!(stats.counts.get(EventKind::MoveRight), 1);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn nudge_mode_never_sends_absolute_angles() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Nudge);
        p.lock("alice");
        let now = Instant::now();
        for x in [300.0, 400.0, 500.0] {
            p.process_frame_at(&frame(vec![face("alice", x, 500.0)]), now);
        }
        assert!(p.controller().link().angles().is_empty());
        assert_eq!(p.controller().link().commands(), vec![PanCommand::Center, PanCommand::Left]);
    }

    #[test]
    fn continuous_mode_never_nudges() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Continuous);
        p.lock("alice");
        let now = Instant::now();
        for x in [300.0, 400.0, 500.0] {
            let report = p.process_frame_at(&frame(vec![face("alice", x, 500.0)]), now);
            assert!(report.nudges.is_empty());
        }
        assert_eq!(p.controller().link().commands(), vec![PanCommand::Center]);
    }

    #[test]
    fn rejected_match_does_not_count_as_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        p.lock("alice");
        let mut far = face("alice", 500.0, 500.0);
        far.distance = 0.9;
        let report = p.process_frame_at(&frame(vec![far]), Instant::now());
        assert_eq!(report.locked_center, None);
        assert_eq!(p.controller().frames_without_target(), 1);
    }

    #[test]
    fn search_begins_on_thirtieth_missing_frame_and_ends_on_return() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        p.lock("alice");
        let now = Instant::now();
        for index in 1..=30 {
            let report = p.process_frame_at(&frame(Vec::new()), now);
            let expected = if index < 30 { TrackingMode::Tracking } else { TrackingMode::Searching };
            assert_eq!(report.mode, expected, "frame {index}");
        }
        let report = p.process_frame_at(&frame(vec![face("alice", 500.0, 500.0)]), now);
        assert_eq!(report.mode, TrackingMode::Tracking);
        assert_eq!(p.controller().frames_without_target(), 0);
    }

    #[test]
    fn absence_keeps_previous_center() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        p.lock("alice");
        let now = Instant::now();
        p.process_frame_at(&frame(vec![face("alice", 200.0, 300.0)]), now);
        p.process_frame_at(&frame(Vec::new()), now);
        assert_eq!(p.movement_state().previous_center, Some(Point::new(200.0, 300.0)));
    }

    #[test]
    fn disconnected_actuator_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Continuous);
        p.lock("alice");
        p.controller().link().set_connected(false);
        let report = p.process_frame_at(&frame(vec![face("alice", 900.0, 500.0)]), Instant::now());
        assert_eq!(report.actuator_failures, 1);
        assert_eq!(report.angle, 162);
    }

    #[test]
    fn clear_lock_saves_summary_and_recenters() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        p.lock("bob");
        let now = Instant::now();
        p.process_frame_at(&frame(vec![face("bob", 100.0, 500.0)]), now);
        p.process_frame_at(&frame(vec![face("bob", 300.0, 500.0)]), now);

        assert_eq!(p.apply(OperatorCommand::ClearLock, now).unwrap(), Flow::Continue);
        assert_eq!(p.identities().locked(), None);
        assert!(p.activity_stats().is_none());
        assert_eq!(p.controller().link().published().last(), Some(&Published::Command(PanCommand::Center)));

        let sessions = crate::core_modules::history::list_sessions(dir.path()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].summary.activity_counts["move_right"], 1);
    }

    #[test]
    fn unknown_lock_stops_search_and_recenters() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        p.lock("alice");
        let now = Instant::now();
        for _ in 0..30 {
            p.process_frame_at(&frame(Vec::new()), now);
        }
        assert_eq!(p.controller().mode(), TrackingMode::Searching);

        assert_eq!(p.lock("mallory"), None);
        assert_eq!(p.identities().locked(), None);
        assert_eq!(p.controller().mode(), TrackingMode::Tracking);
        assert_eq!(p.controller().frames_without_target(), 0);
        assert_eq!(p.controller().current_angle(), 90);
        assert_eq!(p.controller().link().published().last(), Some(&Published::Command(PanCommand::Center)));
        assert!(p.activity_stats().is_none());
        assert_eq!(crate::core_modules::history::list_sessions(dir.path()).unwrap().len(), 1);

        let report = p.process_frame_at(&frame(Vec::new()), now + Duration::from_secs(5));
        assert_eq!(report.mode, TrackingMode::Tracking);
        assert_eq!(report.sweep_angle, None);
    }

    #[test]
    fn relocking_within_a_second_keeps_both_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        let now = Instant::now();

        p.lock("alice");
        p.process_frame_at(&frame(vec![face("alice", 500.0, 500.0)]), now);
        p.process_frame_at(&frame(vec![face("alice", 600.0, 500.0)]), now);
        let first = p.clear_lock().unwrap().unwrap();
        p.lock("alice");
        let second = p.clear_lock().unwrap().unwrap();
        assert_ne!(first, second);

        let sessions = crate::core_modules::history::list_sessions(dir.path()).unwrap();
        let mut totals: Vec<u64> = sessions.iter().map(|s| s.summary.total_activities).collect();
        totals.sort();
        assert_eq!(totals, vec![0, 1]);
        let csv_logs: std::collections::HashSet<_> = sessions.iter().map(|s| s.summary.csv_log.clone()).collect();
        assert_eq!(csv_logs.len(), 2);
    }

    #[test]
    fn failed_activity_writes_are_counted_and_the_loop_continues() {
        let full = std::path::Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        p.lock("alice");
        let sink = std::fs::OpenOptions::new().write(true).open(full).unwrap();
        p.activity_log = Some(ActivityLog::from_parts("alice", dir.path(), "alice_full".into(), full.into(), sink));

        let now = Instant::now();
        p.process_frame_at(&frame(vec![face("alice", 500.0, 500.0)]), now);
        let report = p.process_frame_at(&frame(vec![face("alice", 600.0, 500.0)]), now);
        assert_eq!(report.movements.len(), 1);
        assert_eq!(report.storage_failures, 1);
        assert_eq!(report.nudges, vec![PanCommand::Left]);

        let report = p.process_frame_at(&frame(vec![face("alice", 600.0, 530.0)]), now);
        assert_eq!(report.frame_index, 3);
        assert_eq!(report.movements[0].kind, EventKind::MoveDown);
        assert_eq!(report.storage_failures, 1);
        assert_eq!(p.activity_stats().unwrap().total, 0);
    }

    #[test]
    fn reload_without_locked_identity_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        p.lock("bob");
        p.apply(OperatorCommand::ReloadIdentities(vec!["alice".into()]), Instant::now()).unwrap();
        assert_eq!(p.identities().locked(), None);
        assert!(p.activity_stats().is_none());
    }

    #[test]
    fn quit_is_reported_to_caller() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = pipeline(dir.path(), ActuationMode::Layered);
        assert_eq!(p.apply(OperatorCommand::Quit, Instant::now()).unwrap(), Flow::Quit);
    }

    #[test]
    fn operator_commands_parse_from_json() {
        let lock: OperatorCommand = serde_json::from_str(r#"{"command": "lock", "arg": "alice"}"#).unwrap();
        assert_eq!(lock, OperatorCommand::Lock("alice".into()));
        let toggle: OperatorCommand = serde_json::from_str(r#"{"command": "toggle_search"}"#).unwrap();
        assert_eq!(toggle, OperatorCommand::ToggleSearch);
    }

    #[test]
    fn throughput_counts_frames_per_window() {
        let mut meter = ThroughputMeter::default();
        let t0 = Instant::now();
        for i in 0..10 {
            meter.tick(t0 + Duration::from_millis(i * 100));
        }
        let fps = meter.tick(t0 + Duration::from_millis(1000));
        assert!((fps - 11.0).abs() < 1e-9);
    }
}
