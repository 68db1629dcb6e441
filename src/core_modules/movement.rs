// THEORY:
// The `movement` module classifies frame-to-frame displacement of the locked
// face into the four directional events. It is the same velocity idea the
// object tracker uses (difference of the last two positions), reduced to a
// single tracked identity and quantized against pixel thresholds.
//
// Key architectural principles:
// 1.  **Relative To Last Sighting**: Displacement is always measured against the
//     last position the face was *seen* at, however stale. Frames without the
//     face never touch `previous_center`.
// 2.  **Independent Axes**: Horizontal and vertical movement are classified and
//     debounced separately, so a diagonal move can fire two events at once.
// 3.  **Loose Thresholds**: Detector jitter easily moves a box center by a few
//     pixels, so thresholds are deliberately coarse and the cooldown keeps a
//     sustained walk from flooding the log.

use crate::config::MovementConfig;
use crate::core_modules::debouncer::{Debouncer, EventKind, EventLedger};
use crate::core_modules::geometry::Point;

/// Per-session movement memory.
#[derive(Debug, Clone, Default)]
pub struct MovementState {
    pub previous_center: Option<Point>,
    ledger: EventLedger,
}

impl MovementState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }
}

/// A fired directional event with the displacement that caused it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementEvent {
    pub kind: EventKind,
    /// Signed displacement along the event's axis, in pixels.
    pub delta: f64,
}

impl MovementEvent {
    /// Human-readable detail for the activity log, e.g. `dx=25.0px`.
    pub fn detail(&self) -> String {
        let axis = match self.kind {
            EventKind::MoveUp | EventKind::MoveDown => "dy",
            _ => "dx",
        };
        format!("{axis}={:.1}px", self.delta)
    }
}

pub struct MovementEvaluator {
    config: MovementConfig,
    debouncer: Debouncer,
}

impl MovementEvaluator {
    pub fn new(config: MovementConfig) -> Self {
        let debouncer = Debouncer::new(config.cooldown_frames);
        Self { config, debouncer }
    }

    /// Feeds the locked face's current center for this frame.
    pub fn evaluate(&self, center: Point, frame_index: u64, state: &mut MovementState) -> Vec<MovementEvent> {
        let mut fired = Vec::new();
        let Some(previous) = state.previous_center.replace(center) else {
            return fired;
        };

        let dx = center.x - previous.x;
        let dy = center.y - previous.y;

        if dx.abs() > self.config.threshold_x {
            let kind = if dx > 0.0 { EventKind::MoveRight } else { EventKind::MoveLeft };
            if self.debouncer.fire(true, kind, frame_index, &mut state.ledger) {
                fired.push(MovementEvent { kind, delta: dx });
            }
        }

        if dy.abs() > self.config.threshold_y {
            let kind = if dy > 0.0 { EventKind::MoveDown } else { EventKind::MoveUp };
            if self.debouncer.fire(true, kind, frame_index, &mut state.ledger) {
                fired.push(MovementEvent { kind, delta: dy });
            }
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(threshold: f64) -> MovementEvaluator {
        MovementEvaluator::new(MovementConfig {
            threshold_x: threshold,
            threshold_y: threshold,
            cooldown_frames: 8,
        })
    }

    #[test]
    fn first_observation_only_records_position() {
        let mut state = MovementState::new();
        assert!(evaluator(20.0).evaluate(Point::new(100.0, 100.0), 1, &mut state).is_empty());
        assert_eq!(state.previous_center, Some(Point::new(100.0, 100.0)));
    }

    #[test]
    fn move_right_past_threshold() {
        let mut state = MovementState::new();
        let eval = evaluator(20.0);
        eval.evaluate(Point::new(100.0, 100.0), 1, &mut state);
        let events = eval.evaluate(Point::new(125.0, 100.0), 2, &mut state);
        assert_eq!(events, vec![MovementEvent { kind: EventKind::MoveRight, delta: 25.0 }]);
        assert_eq!(events[0].detail(), "dx=25.0px");
    }

    #[test]
    fn below_threshold_emits_nothing_but_still_advances() {
        let mut state = MovementState::new();
        let eval = evaluator(30.0);
        eval.evaluate(Point::new(100.0, 100.0), 1, &mut state);
        assert!(eval.evaluate(Point::new(125.0, 100.0), 2, &mut state).is_empty());
        assert_eq!(state.previous_center, Some(Point::new(125.0, 100.0)));
    }

    #[test]
    fn diagonal_fires_both_axes() {
        let mut state = MovementState::new();
        let eval = evaluator(20.0);
        eval.evaluate(Point::new(200.0, 200.0), 1, &mut state);
        let kinds: Vec<EventKind> =
            eval.evaluate(Point::new(170.0, 160.0), 2, &mut state).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::MoveLeft, EventKind::MoveUp]);
    }

    #[test]
    fn sustained_motion_is_rate_limited() {
        let mut state = MovementState::new();
        let eval = evaluator(20.0);
        let fired: Vec<u64> = (0..20u64)
            .filter(|f| !eval.evaluate(Point::new(*f as f64 * 30.0, 0.0), *f, &mut state).is_empty())
            .collect();
        assert_eq!(fired, vec![1, 9, 17]);
    }
}
