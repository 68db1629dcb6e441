// THEORY:
// This file is the main entry point for the `pan_tracker` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (like the `track_replay` driver).
//
// The primary goal is to export the `TrackingPipeline` and its associated data
// structures (`TrackerConfig`, `FrameInput`, `FrameReport`, etc.) as the clean,
// high-level interface for the whole tracking loop. The per-concern engines
// (`core_modules`) stay public so they can be driven and tested in isolation,
// but a consumer only needs the pipeline, a config and an actuator link.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use pipeline::{Flow, FrameInput, FrameReport, OperatorCommand, TrackingPipeline};
