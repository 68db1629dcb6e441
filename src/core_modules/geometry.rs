// THEORY:
// The `geometry` module holds the "dumb" data containers that arrive from the
// detection collaborator every frame. None of them carry memory: a
// `FaceObservation` is produced for one frame, consumed by the evaluators, and
// dropped. The only logic here is the arithmetic every consumer needs (centers,
// distances, scaling normalized mesh coordinates to pixels).

use serde::{Deserialize, Serialize};

/// A 2-D point. Pixel space unless a container says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Dimensions of the video frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Axis-aligned face box, top-left `(x1, y1)` to bottom-right `(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// One detected face as reported by the detection and matching collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    /// Sparse alignment landmarks in pixel space.
    #[serde(default)]
    pub landmarks: Vec<Point>,
    /// Best-matching enrolled identity.
    pub name: String,
    /// Embedding distance to `name`; lower is a closer match.
    pub distance: f64,
}

/// Dense face-mesh landmarks in normalized image coordinates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceMesh {
    pub points: Vec<Point>,
}

impl FaceMesh {
    /// The landmark at `index` scaled to pixel space, if the mesh has it.
    pub fn pixel(&self, index: usize, frame: FrameSize) -> Option<Point> {
        self.points
            .get(index)
            .map(|p| Point::new(p.x * frame.width as f64, p.y * frame.height as f64))
    }
}
