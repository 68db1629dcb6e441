// THEORY:
// The `debouncer` turns a noisy per-frame condition ("EAR is below threshold",
// "the face moved 25px right") into a discrete, rate-limited event. A sustained
// condition would otherwise fire on every frame it holds.
//
// Key architectural principles:
// 1.  **Explicit State**: The debouncer itself only knows its cooldown. The
//     per-kind "last fired" frames live in a `EventLedger` owned by the caller,
//     so one debouncer policy can gate several independent ledgers.
// 2.  **Closed Key Set**: Event kinds are a fixed enum, so the ledger is a plain
//     array indexed by kind. `None` stands for "never fired" (minus infinity),
//     which means the very first qualifying frame always fires.
// 3.  **No Side Effects**: Firing does not log or count anything. Callers decide
//     what a fired event means.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every discrete behavioral event the loop can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Blink,
    Smile,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
}

impl EventKind {
    pub const COUNT: usize = 6;

    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::Blink,
        EventKind::Smile,
        EventKind::MoveLeft,
        EventKind::MoveRight,
        EventKind::MoveUp,
        EventKind::MoveDown,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Blink => "blink",
            EventKind::Smile => "smile",
            EventKind::MoveLeft => "move_left",
            EventKind::MoveRight => "move_right",
            EventKind::MoveUp => "move_up",
            EventKind::MoveDown => "move_down",
        }
    }

    pub fn is_movement(self) -> bool {
        !matches!(self, EventKind::Blink | EventKind::Smile)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind '{s}'"))
    }
}

/// The frame each event kind last fired on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLedger {
    last_fired: [Option<u64>; EventKind::COUNT],
}

impl EventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_fired(&self, kind: EventKind) -> Option<u64> {
        self.last_fired[kind.index()]
    }
}

/// A cooldown policy shared by every kind it gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    cooldown_frames: u64,
}

impl Debouncer {
    pub fn new(cooldown_frames: u64) -> Self {
        Self { cooldown_frames }
    }

    pub fn cooldown_frames(&self) -> u64 {
        self.cooldown_frames
    }

    /// Returns true and stamps the ledger when `condition` holds and the kind is
    /// out of its cooldown window.
    pub fn fire(&self, condition: bool, kind: EventKind, frame_index: u64, ledger: &mut EventLedger) -> bool {
        if !condition {
            return false;
        }
        let cooled_down = match ledger.last_fired[kind.index()] {
            None => true,
            Some(last) => frame_index.saturating_sub(last) >= self.cooldown_frames,
        };
        if cooled_down {
            ledger.last_fired[kind.index()] = Some(frame_index);
        }
        cooled_down
    }
}
