// THEORY:
// The `TrackingController` is the actuator-facing half of the loop. It owns the
// servo's angle estimate and decides, every frame, whether the servo should
// move and where to.
//
// Key architectural principles:
// 1.  **Smoothing With Hysteresis**: The locked face's horizontal center goes
//     into a short FIFO, and the mean of that FIFO is the position we steer to.
//     A new angle is only commanded when the smoothed position has drifted more
//     than a fraction of the frame width from the last commanded one, so
//     sub-pixel detector noise never reaches the servo.
// 2.  **Linear Angle Map**: The normalized position across the frame maps
//     linearly onto the actuator range, clamped before anything is published.
// 3.  **Lost-Target Recovery**: When the target has been absent for enough
//     consecutive frames the controller switches to `Searching` and walks a
//     fixed sweep of angles on a wall-clock cadence, starting from the sweep
//     position nearest the current angle. The first frame the target is seen
//     again cancels the search.
// 4.  **State First, Publish Second**: Every command updates the internal state
//     before it is handed to the link. If the link is down the caller gets
//     `ActuatorUnavailable`, but the controller is already where it would have
//     been, so behavior resumes consistently on reconnection.

use crate::config::{ActuatorConfig, TrackingConfig};
use crate::core_modules::actuator::{ActuatorLink, PanCommand};
use crate::core_modules::debouncer::EventKind;
use crate::error::{Result, TrackerError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    Tracking,
    Searching,
}

pub struct TrackingController<A: ActuatorLink> {
    tracking: TrackingConfig,
    actuator: ActuatorConfig,
    link: A,

    // --- Angle ---
    current_angle: i32,
    last_status_sequence: u64,

    // --- Smoothing ---
    smoothing: VecDeque<f64>,
    last_commanded_x: Option<f64>,

    // --- Recovery ---
    search_mode: bool,
    frames_without_target: u32,
    last_sweep: Option<Instant>,
    sweep_cursor: usize,
}

impl<A: ActuatorLink> TrackingController<A> {
    pub fn new(tracking: TrackingConfig, actuator: ActuatorConfig, link: A) -> Self {
        let current_angle = actuator.clamp(actuator.center_angle);
        let smoothing = VecDeque::with_capacity(tracking.smoothing_window);
        Self {
            tracking,
            actuator,
            link,
            current_angle,
            last_status_sequence: 0,
            smoothing,
            last_commanded_x: None,
            search_mode: false,
            frames_without_target: 0,
            last_sweep: None,
            sweep_cursor: 0,
        }
    }

    pub fn link(&self) -> &A {
        &self.link
    }

    pub fn current_angle(&self) -> i32 {
        self.current_angle
    }

    pub fn mode(&self) -> TrackingMode {
        if self.search_mode {
            TrackingMode::Searching
        } else {
            TrackingMode::Tracking
        }
    }

    pub fn frames_without_target(&self) -> u32 {
        self.frames_without_target
    }

    pub fn sweep_cursor(&self) -> usize {
        self.sweep_cursor
    }

    pub fn last_commanded_x(&self) -> Option<f64> {
        self.last_commanded_x
    }

    pub fn smoothed_x(&self) -> Option<f64> {
        if self.smoothing.is_empty() {
            return None;
        }
        Some(self.smoothing.iter().sum::<f64>() / self.smoothing.len() as f64)
    }

    /// Adopts the servo's reported angle once per status message. Reports are not
    /// matched to commands, so a late one replaces a newer estimate. Returns true
    /// when the estimate changed.
    pub fn absorb_status(&mut self) -> bool {
        let snapshot = self.link.status();
        if snapshot.sequence <= self.last_status_sequence {
            return false;
        }
        self.last_status_sequence = snapshot.sequence;
        match snapshot.angle {
            Some(angle) => {
                let angle = self.actuator.clamp(angle);
                let changed = angle != self.current_angle;
                self.current_angle = angle;
                changed
            }
            None => false,
        }
    }

    /// Clamps, stores and publishes an absolute angle. Returns the clamped angle.
    pub fn move_to_angle(&mut self, angle: i32) -> Result<i32> {
        let angle = self.actuator.clamp(angle);
        self.current_angle = angle;
        self.link.publish_angle(angle)?;
        Ok(angle)
    }

    /// Maps a horizontal pixel position to an actuator angle.
    pub fn angle_for_position(&self, x: f64, frame_width: u32) -> i32 {
        let normalized = x / frame_width as f64;
        let span = (self.actuator.max_angle - self.actuator.min_angle) as f64;
        self.actuator.clamp((normalized * span + self.actuator.min_angle as f64) as i32)
    }

    /// Feeds the locked face's horizontal center. Returns the commanded angle,
    /// or `None` when the move was suppressed by hysteresis.
    pub fn track_position(&mut self, x: f64, frame_width: u32) -> Result<Option<i32>> {
        if frame_width == 0 {
            return Err(TrackerError::InvalidInput("frame width is zero".to_string()));
        }

        self.smoothing.push_back(x);
        while self.smoothing.len() > self.tracking.smoothing_window {
            self.smoothing.pop_front();
        }
        let Some(smoothed) = self.smoothed_x() else {
            return Ok(None);
        };

        let min_shift = frame_width as f64 * self.tracking.hysteresis_fraction;
        let significant = match self.last_commanded_x {
            None => true,
            Some(last) => (smoothed - last).abs() > min_shift,
        };
        if !significant {
            return Ok(None);
        }

        self.last_commanded_x = Some(smoothed);
        let angle = self.angle_for_position(smoothed, frame_width);
        self.move_to_angle(angle).map(Some)
    }

    /// Turns a horizontal movement event into a discrete nudge opposite to the
    /// face's motion. Vertical events are ignored.
    pub fn nudge(&mut self, movement: EventKind) -> Result<Option<PanCommand>> {
        let (command, step) = match movement {
            EventKind::MoveLeft => (PanCommand::Right, self.actuator.nudge_step),
            EventKind::MoveRight => (PanCommand::Left, -self.actuator.nudge_step),
            _ => return Ok(None),
        };
        self.current_angle = self.actuator.clamp(self.current_angle + step);
        self.link.publish_command(command)?;
        Ok(Some(command))
    }

    /// Advances the lost-target state machine by one frame. Returns the sweep
    /// angle when this frame stepped the sweep.
    pub fn observe_target(&mut self, found: bool, now: Instant) -> Result<Option<i32>> {
        if found {
            if self.search_mode {
                tracing::info!(frames = self.frames_without_target, "target reacquired, search stopped");
            }
            self.search_mode = false;
            self.frames_without_target = 0;
            return Ok(None);
        }

        self.frames_without_target = self.frames_without_target.saturating_add(1);
        if !self.search_mode {
            if self.frames_without_target < self.tracking.frames_before_search {
                return Ok(None);
            }
            tracing::info!(frames = self.frames_without_target, "target lost, starting search sweep");
            self.enter_search(now);
        }

        let interval = Duration::from_millis(self.tracking.sweep_interval_ms);
        let due = self.last_sweep.is_none_or(|last| now.saturating_duration_since(last) >= interval);
        if !due {
            return Ok(None);
        }
        self.step_sweep(now)
    }

    /// Operator override of the search mode. Leaving search recenters the servo.
    pub fn set_search(&mut self, enabled: bool, now: Instant) -> Result<()> {
        if enabled {
            tracing::info!("search mode forced on");
            self.frames_without_target = self.tracking.frames_before_search;
            self.enter_search(now);
            Ok(())
        } else {
            tracing::info!("search mode forced off");
            self.recenter()
        }
    }

    pub fn toggle_search(&mut self, now: Instant) -> Result<TrackingMode> {
        self.set_search(!self.search_mode, now)?;
        Ok(self.mode())
    }

    /// Sends the servo to center and forgets the smoothing history.
    pub fn recenter(&mut self) -> Result<()> {
        self.search_mode = false;
        self.frames_without_target = 0;
        self.smoothing.clear();
        self.last_commanded_x = None;
        self.current_angle = self.actuator.clamp(self.actuator.center_angle);
        self.link.publish_command(PanCommand::Center)
    }

    fn enter_search(&mut self, now: Instant) {
        self.search_mode = true;
        self.last_sweep = Some(now);
        self.sweep_cursor = self.nearest_sweep_index(self.current_angle);
    }

    /// Advances to the next sweep position. An empty sweep holds the servo still.
    fn step_sweep(&mut self, now: Instant) -> Result<Option<i32>> {
        self.last_sweep = Some(now);
        let len = self.tracking.sweep_angles.len();
        if len == 0 {
            return Ok(None);
        }
        self.sweep_cursor = (self.sweep_cursor + 1) % len;
        let angle = self.tracking.sweep_angles[self.sweep_cursor];
        tracing::debug!(angle, cursor = self.sweep_cursor, "search sweep step");
        self.move_to_angle(angle).map(Some)
    }

    fn nearest_sweep_index(&self, angle: i32) -> usize {
        let mut best = 0;
        let mut best_diff = i32::MAX;
        for (i, candidate) in self.tracking.sweep_angles.iter().enumerate() {
            let diff = (candidate - angle).abs();
            if diff < best_diff {
                best = i;
                best_diff = diff;
            }
        }
        best
    }
}
