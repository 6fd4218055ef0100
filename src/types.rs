//! Core types for the Synheart Gaze engine
//!
//! This module defines the data structures that flow between the engine's
//! components: normalized source samples, calibration pairs, the fitted affine
//! mapping, trials and the fixation records they produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in screen (page) coordinates, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned rectangle in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Rectangle of the given size centred on `center`
    pub fn centered_at(center: Point, width: f64, height: f64) -> Self {
        Self::new(
            center.x - width / 2.0,
            center.y - height / 2.0,
            width,
            height,
        )
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    /// A rect with positive area; zero-sized layout boxes are treated as absent
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Grow the rect by `margin` on every side
    pub fn expand(&self, margin: f64) -> Self {
        Self::new(
            self.left - margin,
            self.top - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Inclusive containment test
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left
            && point.x <= self.right()
            && point.y >= self.top
            && point.y <= self.bottom()
    }

    /// Map a normalized coordinate into this rect, optionally mirrored horizontally
    pub fn project(&self, nx: f64, ny: f64, mirrored: bool) -> Point {
        let nx = if mirrored { 1.0 - nx } else { nx };
        Point::new(self.left + nx * self.width, self.top + ny * self.height)
    }
}

/// Normalized eye position as reported by the landmark source (both axes in [0, 1])
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceSample {
    pub x: f64,
    pub y: f64,
}

impl SourceSample {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One aggregated calibration observation: normalized source coordinate and the
/// screen coordinate of the target the user was looking at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    pub nx: f64,
    pub ny: f64,
    pub tx: f64,
    pub ty: f64,
}

impl CalibrationPair {
    pub fn new(nx: f64, ny: f64, tx: f64, ty: f64) -> Self {
        Self { nx, ny, tx, ty }
    }

    pub fn target(&self) -> Point {
        Point::new(self.tx, self.ty)
    }

    /// Same pair with the normalized x axis flipped (`nx' = 1 - nx`)
    pub fn flipped_x(&self) -> Self {
        Self {
            nx: 1.0 - self.nx,
            ..*self
        }
    }
}

/// 2D affine map `(x, y) -> (ax[0]·x + ax[1]·y + ax[2], ay[0]·x + ay[1]·y + ay[2])`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub ax: [f64; 3],
    pub ay: [f64; 3],
}

impl AffineTransform {
    pub fn new(ax: [f64; 3], ay: [f64; 3]) -> Self {
        Self { ax, ay }
    }

    pub fn apply(&self, x: f64, y: f64) -> Point {
        Point::new(
            self.ax[0] * x + self.ax[1] * y + self.ax[2],
            self.ay[0] * x + self.ay[1] * y + self.ay[2],
        )
    }

    pub fn is_finite(&self) -> bool {
        self.ax.iter().chain(self.ay.iter()).all(|c| c.is_finite())
    }
}

/// Hypothesis about the horizontal orientation of the source coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariantLabel {
    /// Pairs used as collected
    Identity,
    /// Normalized x flipped before fitting
    FlipX,
}

impl VariantLabel {
    pub const ALL: [VariantLabel; 2] = [VariantLabel::Identity, VariantLabel::FlipX];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantLabel::Identity => "identity",
            VariantLabel::FlipX => "flipX",
        }
    }

    /// Transform a pair into this variant's fitting space
    pub fn apply_to_pair(&self, pair: &CalibrationPair) -> CalibrationPair {
        match self {
            VariantLabel::Identity => *pair,
            VariantLabel::FlipX => pair.flipped_x(),
        }
    }

    /// Transform a normalized x coordinate into this variant's fitting space
    pub fn apply_to_x(&self, nx: f64) -> f64 {
        match self {
            VariantLabel::Identity => nx,
            VariantLabel::FlipX => 1.0 - nx,
        }
    }
}

/// Fit outcome for one candidate variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantScore {
    pub variant: VariantLabel,
    /// Reprojection RMSE in pixels; `None` when the fit failed
    pub rmse: Option<f64>,
    /// Fitted horizontal gain (`ax[0]`), used to break RMSE ties
    pub x_gain: Option<f64>,
}

/// The winning calibration fit, installed as the active gaze mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub transform: AffineTransform,
    pub variant: VariantLabel,
    /// Root-mean-squared reprojection residual over the fitted pairs (pixels)
    pub rmse: f64,
    /// Number of calibration pairs used for the fit
    pub pair_count: usize,
    /// Whether the preview was mirrored while the pairs were collected
    #[serde(default)]
    pub mirrored: bool,
    /// Scores of every evaluated variant, winner included
    #[serde(default)]
    pub candidates: Vec<VariantScore>,
    pub calibrated_at: DateTime<Utc>,
}

impl CalibrationResult {
    /// Map a raw source sample to screen coordinates.
    ///
    /// The sample is brought into the same space the pairs were fitted in:
    /// preview mirroring first, then the variant's flip.
    pub fn map(&self, sample: SourceSample) -> Point {
        let nx = if self.mirrored { 1.0 - sample.x } else { sample.x };
        let nx = self.variant.apply_to_x(nx);
        self.transform.apply(nx, sample.y)
    }
}

/// One fixation-test target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: u32,
    pub bounding_box: Rect,
}

/// A confirmed fixation on a trial target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixationRecord {
    pub trial_id: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Dwell duration measured on the monotonic clock
    pub duration_ms: u64,
}

/// Calibration status as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CalibrationStatus {
    Pending,
    Running,
    Calibrated { variant: VariantLabel, rmse: f64 },
    Failed { reason: String },
}

impl CalibrationStatus {
    pub fn status_text(&self) -> String {
        match self {
            CalibrationStatus::Pending => "Status: not calibrated".to_string(),
            CalibrationStatus::Running => "Calibration: follow dots".to_string(),
            CalibrationStatus::Calibrated { variant, rmse } => format!(
                "Status: calibrated ({}, rmse {})",
                variant.as_str(),
                rmse.round()
            ),
            CalibrationStatus::Failed { .. } => "Status: calibration failed".to_string(),
        }
    }
}
