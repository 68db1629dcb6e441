// THEORY:
// All tunable behavior of the tracking loop lives in one immutable value that is
// handed to each engine at construction. There are no module-level knobs: a test
// that wants a tighter threshold builds its own `TrackerConfig` and nothing else
// in the process is affected.
//
// Every section implements `Default` with the values the loop was tuned with,
// and every section is `#[serde(default)]` so a JSON file only needs to name
// the fields it overrides.

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration for the tracking loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub gesture: GestureConfig,
    pub movement: MovementConfig,
    pub tracking: TrackingConfig,
    pub actuator: ActuatorConfig,
    pub recognition: RecognitionConfig,
    pub activity: ActivityConfig,
}

/// Blink and smile detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Eye-aperture ratio below which the eyes count as closed.
    pub ear_blink_threshold: f64,
    /// Mouth width relative to the latched baseline at which a smile fires.
    pub smile_mouth_ratio: f64,
    pub cooldown_frames: u64,
    /// Capacity of the mouth-width sliding window.
    pub mouth_window: usize,
    /// Samples required before the smile baseline is latched.
    pub baseline_min_samples: usize,
    /// Face-mesh indices p1..p6 around the left eye.
    pub left_eye_indices: [usize; 6],
    /// Face-mesh indices p1..p6 around the right eye.
    pub right_eye_indices: [usize; 6],
    pub mouth_left_index: usize,
    pub mouth_right_index: usize,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            ear_blink_threshold: 0.21,
            smile_mouth_ratio: 1.15,
            cooldown_frames: 10,
            mouth_window: 30,
            baseline_min_samples: 15,
            left_eye_indices: [33, 160, 158, 133, 153, 144],
            right_eye_indices: [362, 385, 387, 263, 373, 380],
            mouth_left_index: 61,
            mouth_right_index: 291,
        }
    }
}

/// Directional movement detection, in pixels and frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub threshold_x: f64,
    pub threshold_y: f64,
    pub cooldown_frames: u64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            threshold_x: 20.0,
            threshold_y: 20.0,
            cooldown_frames: 8,
        }
    }
}

/// Which actuator paths a locked face drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuationMode {
    /// Smoothed absolute angle commands only.
    Continuous,
    /// Discrete left/right nudges on movement events only.
    Nudge,
    /// Both paths; they may fire in the same frame.
    Layered,
}

impl ActuationMode {
    pub fn continuous(self) -> bool {
        matches!(self, ActuationMode::Continuous | ActuationMode::Layered)
    }

    pub fn nudges(self) -> bool {
        matches!(self, ActuationMode::Nudge | ActuationMode::Layered)
    }
}

/// Position smoothing and lost-target recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub smoothing_window: usize,
    /// Minimum change of the smoothed position, as a fraction of frame width,
    /// before a new angle is commanded.
    pub hysteresis_fraction: f64,
    pub frames_before_search: u32,
    pub sweep_interval_ms: u64,
    pub sweep_angles: Vec<i32>,
    pub mode: ActuationMode,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            hysteresis_fraction: 0.05,
            frames_before_search: 30,
            sweep_interval_ms: 2000,
            sweep_angles: vec![0, 30, 60, 90, 120, 150, 180, 150, 120, 90, 60, 30],
            mode: ActuationMode::Layered,
        }
    }
}

/// Pan actuator range and bus topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub min_angle: i32,
    pub max_angle: i32,
    pub center_angle: i32,
    /// Degrees the angle estimate moves on a discrete left/right command.
    pub nudge_step: i32,
    pub angle_topic: String,
    pub command_topic: String,
    pub status_topic: String,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            min_angle: 0,
            max_angle: 180,
            center_angle: 90,
            nudge_step: 10,
            angle_topic: "camera/track/horizontal".to_string(),
            command_topic: "camera/track/command".to_string(),
            status_topic: "camera/status".to_string(),
        }
    }
}

impl ActuatorConfig {
    pub fn clamp(&self, angle: i32) -> i32 {
        angle.clamp(self.min_angle, self.max_angle)
    }
}

/// Identity acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Faces whose match distance is at or below this are accepted.
    pub distance_threshold: f64,
    pub threshold_step: f64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.34,
            threshold_step: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Directory that receives activity timelines and session summaries.
    pub log_dir: PathBuf,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("history"),
        }
    }
}

impl TrackerConfig {
    /// Loads a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.actuator;
        if a.min_angle >= a.max_angle {
            return Err(TrackerError::Config(format!(
                "min_angle {} must be below max_angle {}",
                a.min_angle, a.max_angle
            )));
        }
        if !(a.min_angle..=a.max_angle).contains(&a.center_angle) {
            return Err(TrackerError::Config(format!(
                "center_angle {} outside [{}, {}]",
                a.center_angle, a.min_angle, a.max_angle
            )));
        }
        if self.gesture.smile_mouth_ratio <= 1.0 {
            return Err(TrackerError::Config("smile_mouth_ratio must exceed 1.0".to_string()));
        }
        if self.gesture.mouth_window == 0 || self.tracking.smoothing_window == 0 {
            return Err(TrackerError::Config("window capacities must be non-zero".to_string()));
        }
        if self.gesture.baseline_min_samples == 0
            || self.gesture.baseline_min_samples > self.gesture.mouth_window
        {
            return Err(TrackerError::Config(
                "baseline_min_samples must be within the mouth window".to_string(),
            ));
        }
        if self.tracking.sweep_angles.is_empty() {
            return Err(TrackerError::Config("sweep_angles must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.recognition.distance_threshold) {
            return Err(TrackerError::Config("distance_threshold must be within [0, 1]".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{ "movement": { "threshold_x": 30.0 }, "tracking": { "mode": "nudge" } }"#)
                .unwrap();
        assert_eq!(config.movement.threshold_x, 30.0);
        assert_eq!(config.movement.threshold_y, 20.0);
        assert_eq!(config.tracking.mode, ActuationMode::Nudge);
        assert_eq!(config.tracking.frames_before_search, 30);
    }

    #[test]
    fn inverted_angle_range_is_rejected() {
        let mut config = TrackerConfig::default();
        config.actuator.min_angle = 180;
        config.actuator.max_angle = 0;
        assert!(matches!(config.validate(), Err(TrackerError::Config(_))));
    }

    #[test]
    fn smile_ratio_must_exceed_one() {
        let mut config = TrackerConfig::default();
        config.gesture.smile_mouth_ratio = 1.0;
        assert!(config.validate().is_err());
    }
}
