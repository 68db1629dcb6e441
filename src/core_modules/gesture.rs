// THEORY:
// The `gesture` module turns a dense face mesh into blink and smile events. It
// measures two scalars per frame and compares them against thresholds, with
// the `Debouncer` rate-limiting the result.
//
// Key architectural principles:
// 1.  **Eye Aperture**: The eye-aspect ratio (EAR) relates the two vertical
//     lid distances of an eye to its horizontal span. It drops sharply when the
//     eye closes, independent of how far the face is from the camera.
// 2.  **Adaptive Smile Baseline**: Mouth width varies per person and per
//     distance, so a smile is judged against a baseline learned from the first
//     samples of the session. The baseline is latched once, to the median of the
//     window, and never recomputed, so a long smile cannot drag it upward.
// 3.  **Threaded State**: The evaluator holds only configuration. Everything
//     that survives between frames lives in `GestureState`, which the caller
//     owns and passes back in each frame.
// 4.  **Graceful Gaps**: A frame with no resolved mesh is a no-op. State carries
//     forward untouched.

use crate::config::GestureConfig;
use crate::core_modules::debouncer::{Debouncer, EventKind, EventLedger};
use crate::core_modules::geometry::{FaceMesh, FrameSize, Point};
use std::collections::VecDeque;

const MIN_EYE_SPAN: f64 = 1e-6;
const NEUTRAL_EAR: f64 = 0.5;
/// A latched baseline at or below this many pixels is treated as unusable.
const MIN_BASELINE_WIDTH: f64 = 1.0;

/// Per-session gesture memory.
#[derive(Debug, Clone, Default)]
pub struct GestureState {
    /// Latched median mouth width, once enough samples exist.
    pub smile_baseline: Option<f64>,
    /// The most recent mouth widths, oldest first.
    mouth_widths: VecDeque<f64>,
    ledger: EventLedger,
}

impl GestureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mouth_widths(&self) -> &VecDeque<f64> {
        &self.mouth_widths
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }
}

/// The raw measurements for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureReading {
    pub ear: f64,
    pub mouth_width: f64,
}

pub struct GestureEvaluator {
    config: GestureConfig,
    debouncer: Debouncer,
}

impl GestureEvaluator {
    pub fn new(config: GestureConfig) -> Self {
        let debouncer = Debouncer::new(config.cooldown_frames);
        Self { config, debouncer }
    }

    /// Measures EAR and mouth width, or `None` if the mesh lacks a landmark.
    pub fn measure(&self, mesh: &FaceMesh, frame: FrameSize) -> Option<GestureReading> {
        let left = Self::eye_points(mesh, &self.config.left_eye_indices, frame)?;
        let right = Self::eye_points(mesh, &self.config.right_eye_indices, frame)?;
        let mouth_left = mesh.pixel(self.config.mouth_left_index, frame)?;
        let mouth_right = mesh.pixel(self.config.mouth_right_index, frame)?;

        Some(GestureReading {
            ear: (eye_aspect_ratio(&left) + eye_aspect_ratio(&right)) / 2.0,
            mouth_width: mouth_left.distance(&mouth_right),
        })
    }

    /// Runs one frame of blink and smile detection, returning the kinds fired.
    pub fn evaluate(
        &self,
        mesh: Option<&FaceMesh>,
        frame: FrameSize,
        frame_index: u64,
        state: &mut GestureState,
    ) -> Vec<EventKind> {
        let mut fired = Vec::new();
        let Some(reading) = mesh.and_then(|m| self.measure(m, frame)) else {
            return fired;
        };

        // --- 1. Blink ---
        let eyes_closed = reading.ear < self.config.ear_blink_threshold;
        if self.debouncer.fire(eyes_closed, EventKind::Blink, frame_index, &mut state.ledger) {
            fired.push(EventKind::Blink);
        }

        // --- 2. Baseline ---
        state.mouth_widths.push_back(reading.mouth_width);
        while state.mouth_widths.len() > self.config.mouth_window {
            state.mouth_widths.pop_front();
        }
        if state.smile_baseline.is_none() && state.mouth_widths.len() >= self.config.baseline_min_samples {
            let baseline = median(&state.mouth_widths);
            tracing::debug!(baseline, "smile baseline latched");
            state.smile_baseline = Some(baseline);
        }

        // --- 3. Smile ---
        if let Some(baseline) = state.smile_baseline.filter(|b| *b > MIN_BASELINE_WIDTH) {
            let smiling = reading.mouth_width >= baseline * self.config.smile_mouth_ratio;
            if self.debouncer.fire(smiling, EventKind::Smile, frame_index, &mut state.ledger) {
                fired.push(EventKind::Smile);
            }
        }

        fired
    }

    fn eye_points(mesh: &FaceMesh, indices: &[usize; 6], frame: FrameSize) -> Option<[Point; 6]> {
        let mut points = [Point::default(); 6];
        for (slot, index) in points.iter_mut().zip(indices) {
            *slot = mesh.pixel(*index, frame)?;
        }
        Some(points)
    }
}

/// Eye-aspect ratio for landmarks p1..p6 ordered around one eye.
pub fn eye_aspect_ratio(p: &[Point; 6]) -> f64 {
    let span = p[0].distance(&p[3]);
    if span < MIN_EYE_SPAN {
        return NEUTRAL_EAR;
    }
    (p[1].distance(&p[5]) + p[2].distance(&p[4])) / (2.0 * span)
}

fn median(values: &VecDeque<f64>) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: FrameSize = FrameSize { width: 1000, height: 1000 };

    fn small_config() -> GestureConfig {
        GestureConfig {
            left_eye_indices: [0, 1, 2, 3, 4, 5],
            right_eye_indices: [6, 7, 8, 9, 10, 11],
            mouth_left_index: 12,
            mouth_right_index: 13,
            ..GestureConfig::default()
        }
    }

    /// Builds a normalized mesh with both eyes at the given lid opening and the
    /// mouth at the given pixel width (for a 1000x1000 frame).
    fn mesh(lid_open_px: f64, mouth_px: f64) -> FaceMesh {
        let eye = |cx: f64| {
            let h = lid_open_px / 2.0;
            [
                Point::new(cx - 30.0, 400.0),
                Point::new(cx - 10.0, 400.0 - h),
                Point::new(cx + 10.0, 400.0 - h),
                Point::new(cx + 30.0, 400.0),
                Point::new(cx + 10.0, 400.0 + h),
                Point::new(cx - 10.0, 400.0 + h),
            ]
        };
        let mut points: Vec<Point> = eye(400.0).into_iter().chain(eye(600.0)).collect();
        points.push(Point::new(500.0 - mouth_px / 2.0, 700.0));
        points.push(Point::new(500.0 + mouth_px / 2.0, 700.0));
        FaceMesh {
            points: points.into_iter().map(|p| Point::new(p.x / 1000.0, p.y / 1000.0)).collect(),
        }
    }

    #[test]
    fn ear_of_coincident_corners_is_neutral() {
        let p = Point::new(10.0, 10.0);
        let points = [p, Point::new(10.0, 5.0), Point::new(10.0, 5.0), p, Point::new(10.0, 15.0), Point::new(10.0, 15.0)];
        let ear = eye_aspect_ratio(&points);
        assert_eq!(ear, 0.5);
        assert!(ear.is_finite());
    }

    #[test]
    fn ear_matches_formula() {
        let reading = GestureEvaluator::new(small_config()).measure(&mesh(18.0, 100.0), FRAME).unwrap();
        // (18 + 18) / (2 * 60)
        assert!((reading.ear - 0.3).abs() < 1e-9);
        assert!((reading.mouth_width - 100.0).abs() < 1e-9);
    }

    #[test]
    fn closed_eyes_blink_once_per_cooldown() {
        let evaluator = GestureEvaluator::new(small_config());
        let mut state = GestureState::new();
        let closed = mesh(3.0, 100.0);
        let blinks: Vec<u64> = (1..=25)
            .filter(|f| evaluator.evaluate(Some(&closed), FRAME, *f, &mut state).contains(&EventKind::Blink))
            .collect();
        assert_eq!(blinks, vec![1, 11, 21]);
    }

    #[test]
    fn missing_mesh_leaves_state_untouched() {
        let evaluator = GestureEvaluator::new(small_config());
        let mut state = GestureState::new();
        evaluator.evaluate(Some(&mesh(18.0, 100.0)), FRAME, 1, &mut state);
        let before = state.clone();

        assert!(evaluator.evaluate(None, FRAME, 2, &mut state).is_empty());
        let truncated = FaceMesh { points: vec![Point::new(0.1, 0.1)] };
        assert!(evaluator.evaluate(Some(&truncated), FRAME, 3, &mut state).is_empty());

        assert_eq!(state.mouth_widths(), before.mouth_widths());
        assert_eq!(state.smile_baseline, before.smile_baseline);
    }

    #[test]
    fn baseline_latches_once_and_ignores_later_samples() {
        let evaluator = GestureEvaluator::new(small_config());
        let mut state = GestureState::new();
        for frame in 1..=14 {
            evaluator.evaluate(Some(&mesh(18.0, 100.0 + frame as f64)), FRAME, frame, &mut state);
            assert_eq!(state.smile_baseline, None);
        }
        evaluator.evaluate(Some(&mesh(18.0, 115.0)), FRAME, 15, &mut state);
        // widths 101..=115, median 108
        let latched = state.smile_baseline.unwrap();
        assert!((latched - 108.0).abs() < 1e-9);

        for frame in 16..=80 {
            evaluator.evaluate(Some(&mesh(18.0, 900.0)), FRAME, frame, &mut state);
        }
        assert_eq!(state.smile_baseline, Some(latched));
        assert_eq!(state.mouth_widths().len(), 30);
    }

    #[test]
    fn smile_fires_above_ratio_after_baseline() {
        let evaluator = GestureEvaluator::new(small_config());
        let mut state = GestureState::new();
        for frame in 1..=15 {
            let fired = evaluator.evaluate(Some(&mesh(18.0, 100.0)), FRAME, frame, &mut state);
            assert!(!fired.contains(&EventKind::Smile));
        }
        assert!(evaluator.evaluate(Some(&mesh(18.0, 110.0)), FRAME, 16, &mut state).is_empty());
        assert_eq!(evaluator.evaluate(Some(&mesh(18.0, 120.0)), FRAME, 17, &mut state), vec![EventKind::Smile]);
        assert!(evaluator.evaluate(Some(&mesh(18.0, 120.0)), FRAME, 18, &mut state).is_empty());
    }

    #[test]
    fn median_of_even_window_averages_middle_pair() {
        let values: VecDeque<f64> = [4.0, 1.0, 3.0, 2.0].into_iter().collect();
        assert_eq!(median(&values), 2.5);
    }
}
