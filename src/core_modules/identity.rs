// THEORY:
// The `identity` module is the loop's view of the recognition collaborator. The
// embeddings and nearest-neighbor search stay outside; what lands here is the
// set of enrolled names, the one name locked for tracking, and the distance
// threshold that decides whether a per-face match is accepted.
//
// The enrolled set is rebuilt wholesale on reload, and every rebuild bumps a
// generation counter so consumers can tell the set changed. A rebuild that no
// longer contains the locked name drops the lock.

use crate::config::RecognitionConfig;
use crate::core_modules::geometry::FaceObservation;

pub struct IdentityRegistry {
    names: Vec<String>,
    generation: u64,
    locked: Option<String>,
    threshold: f64,
    threshold_step: f64,
}

impl IdentityRegistry {
    pub fn new(names: Vec<String>, config: &RecognitionConfig) -> Self {
        let mut registry = Self {
            names: Vec::new(),
            generation: 0,
            locked: None,
            threshold: config.distance_threshold.clamp(0.0, 1.0),
            threshold_step: config.threshold_step,
        };
        registry.rebuild(names);
        registry
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn locked(&self) -> Option<&str> {
        self.locked.as_deref()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Replaces the enrolled set. Returns the lock it dropped, if any.
    pub fn rebuild(&mut self, mut names: Vec<String>) -> Option<String> {
        names.sort();
        names.dedup();
        self.names = names;
        self.generation += 1;

        let still_enrolled = self
            .locked
            .as_ref()
            .is_some_and(|locked| self.names.contains(locked));
        if still_enrolled {
            None
        } else {
            self.locked.take()
        }
    }

    /// Resolves operator input to an enrolled name: a 1-based index into the
    /// sorted names, the exact name, or a case-insensitive match.
    pub fn resolve(&self, input: &str) -> Option<String> {
        let raw = input.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            let index: usize = raw.parse().ok()?;
            return index.checked_sub(1).and_then(|i| self.names.get(i)).cloned();
        }
        if let Some(exact) = self.names.iter().find(|n| n.as_str() == raw) {
            return Some(exact.clone());
        }
        let lower = raw.to_lowercase();
        self.names.iter().find(|n| n.to_lowercase() == lower).cloned()
    }

    /// Locks onto whatever `input` resolves to. Unknown input clears the lock.
    pub fn lock(&mut self, input: &str) -> Option<&str> {
        self.locked = self.resolve(input);
        if self.locked.is_none() {
            tracing::warn!(input, "unknown identity, proceeding without a lock");
        }
        self.locked.as_deref()
    }

    pub fn clear_lock(&mut self) -> Option<String> {
        self.locked.take()
    }

    pub fn accepts(&self, face: &FaceObservation) -> bool {
        face.distance <= self.threshold
    }

    /// The first accepted face matching the locked identity.
    pub fn find_locked<'a>(&self, faces: &'a [FaceObservation]) -> Option<&'a FaceObservation> {
        let locked = self.locked.as_deref()?;
        faces.iter().find(|face| face.name == locked && self.accepts(face))
    }

    pub fn raise_threshold(&mut self) -> f64 {
        self.threshold = (self.threshold + self.threshold_step).min(1.0);
        self.threshold
    }

    pub fn lower_threshold(&mut self) -> f64 {
        self.threshold = (self.threshold - self.threshold_step).max(0.0);
        self.threshold
    }
}
