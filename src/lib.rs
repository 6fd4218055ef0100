//! Synheart Gaze - Gaze calibration and fixation detection engine
//!
//! Gaze turns a noisy stream of normalized eye positions into a calibrated
//! screen-space gaze point and detects dwell-time fixations on displayed
//! targets:
//! landmark source → smoothing / calibration sampling → affine fit →
//! mapped gaze → fixation detection → export.
//!
//! ## Modules
//!
//! - **Calibration**: 3×3 target grid, per-target sample windows, affine fit
//!   over orientation variants
//! - **Tracking**: per-frame mapping and exponential smoothing
//! - **Fixation**: dwell-time detection and trial sequencing

pub mod calibration;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod fixation;
pub mod presenter;
pub mod solver;
pub mod source;
pub mod tracker;
pub mod trials;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use calibration::{
    calibration_grid, fit_variants, CalibrationRun, CalibrationSampler, CalibrationSession,
};
pub use clock::{CancelToken, Clock, ManualClock, SystemClock};
pub use config::GazeConfig;
pub use engine::{CalibrationProgress, GazeEngine};
pub use error::GazeError;
pub use fixation::{FixationDetector, FixationRun, RunEvent, RunSummary};
pub use presenter::{HeadlessPresenter, Presenter};
pub use solver::AffineSolver;
pub use source::{GazeFeedMessage, LandmarkSource, SampleSlot};
pub use tracker::{GazeSmoother, GazeTracker};
pub use trials::build_trials;

/// Gaze library version
pub const GAZE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name stamped on exported artifacts
pub const PRODUCER_NAME: &str = "synheart-gaze";
