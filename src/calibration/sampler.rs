//! Per-target sample collection
//!
//! While a calibration target is highlighted, polled source samples are
//! offered to a [`CollectionWindow`] until its deadline passes. The window
//! is cleaned of outliers around the per-axis median and averaged into one
//! representative coordinate, which is paired with the target's screen centre.

use crate::config::GazeConfig;
use crate::error::GazeError;
use crate::types::{CalibrationPair, Rect, SourceSample};
use std::time::{Duration, Instant};

/// Fewer survivors than this and the outlier filter is ignored
pub const MIN_FILTERED_SAMPLES: usize = 3;

/// Samples observed during one target's collection window
#[derive(Debug, Clone)]
pub struct CollectionWindow {
    deadline: Instant,
    samples: Vec<SourceSample>,
}

impl CollectionWindow {
    /// Open a window that expires `duration` after `now`
    pub fn open(now: Instant, duration: Duration) -> Self {
        Self {
            deadline: now + duration,
            samples: Vec::new(),
        }
    }

    /// Record one poll result. Returns whether a sample was kept.
    pub fn offer(&mut self, sample: Option<SourceSample>) -> bool {
        match sample {
            Some(s) if s.is_finite() => {
                self.samples.push(s);
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn samples(&self) -> &[SourceSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Outlier-filtered mean of the window
    pub fn aggregate(&self, outlier_radius: f64) -> Result<SourceSample, GazeError> {
        if self.samples.is_empty() {
            return Err(GazeError::NoSamples);
        }
        let kept = reject_outliers(&self.samples, outlier_radius);
        let used: &[SourceSample] = if kept.len() >= MIN_FILTERED_SAMPLES {
            &kept
        } else {
            &self.samples
        };
        Ok(mean(used))
    }
}

/// Upper median (`sorted[n / 2]`). Returns NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[sorted.len() / 2]
}

/// Keep samples strictly within `radius` of the per-axis medians
pub fn reject_outliers(samples: &[SourceSample], radius: f64) -> Vec<SourceSample> {
    let xs: Vec<f64> = samples.iter().map(|s| s.x).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.y).collect();
    let median_x = median(&xs);
    let median_y = median(&ys);

    samples
        .iter()
        .copied()
        .filter(|s| (s.x - median_x).abs() < radius && (s.y - median_y).abs() < radius)
        .collect()
}

fn mean(samples: &[SourceSample]) -> SourceSample {
    let n = samples.len() as f64;
    let (sx, sy) = samples
        .iter()
        .fold((0.0, 0.0), |(sx, sy), s| (sx + s.x, sy + s.y));
    SourceSample::new(sx / n, sy / n)
}

/// Pair a representative sample with a target's centre.
///
/// With a mirrored preview the normalized x is stored in preview space
/// (`1 - x`), matching what the user saw while looking at the target.
pub fn pair_for_target(
    representative: SourceSample,
    target: &Rect,
    mirrored: bool,
) -> CalibrationPair {
    let nx = if mirrored {
        1.0 - representative.x
    } else {
        representative.x
    };
    let center = target.center();
    CalibrationPair::new(nx, representative.y, center.x, center.y)
}

/// Window length, poll cadence and outlier radius for per-target collection
#[derive(Debug, Clone)]
pub struct CalibrationSampler {
    window: Duration,
    poll_interval: Duration,
    outlier_radius: f64,
}

impl Default for CalibrationSampler {
    fn default() -> Self {
        Self::from_config(&GazeConfig::default())
    }
}

impl CalibrationSampler {
    pub fn new(window: Duration, poll_interval: Duration, outlier_radius: f64) -> Self {
        Self {
            window,
            poll_interval,
            outlier_radius,
        }
    }

    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(
            config.calibration_window(),
            config.calibration_poll(),
            config.outlier_radius,
        )
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn outlier_radius(&self) -> f64 {
        self.outlier_radius
    }
}
