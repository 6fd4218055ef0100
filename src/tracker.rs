//! Per-frame gaze mapping and smoothing
//!
//! Each rendering tick maps the latest source sample to screen space and
//! feeds it through an exponential moving average. Frames without a usable
//! sample leave the smoothed point untouched and hide the cursor.

use crate::config::GazeConfig;
use crate::presenter::Presenter;
use crate::types::{CalibrationResult, Point, SourceSample};
use serde::{Deserialize, Serialize};

/// Which mapping produced the latest raw point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    /// Active calibration transform
    Calibrated,
    /// Direct projection onto the camera preview rectangle
    Preview,
    /// Projection onto the full viewport
    Viewport,
}

/// Latest mapped and smoothed gaze positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeState {
    /// Mapped point for the current frame only
    pub raw_mapped: Option<Point>,
    /// EMA accumulator, persists across frames
    pub smoothed: Option<Point>,
}

/// Exponential moving average over screen points
#[derive(Debug, Clone)]
pub struct GazeSmoother {
    alpha: f64,
    last: Option<Point>,
}

impl GazeSmoother {
    /// `alpha` is clamped into (0, 1]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: clamp_alpha(alpha),
            last: None,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = clamp_alpha(alpha);
    }

    /// Fold `point` into the average; the first point seeds it
    pub fn update(&mut self, point: Point) -> Point {
        let next = match self.last {
            Some(last) => Point::new(
                last.x + self.alpha * (point.x - last.x),
                last.y + self.alpha * (point.y - last.y),
            ),
            None => point,
        };
        self.last = Some(next);
        next
    }

    pub fn current(&self) -> Option<Point> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

fn clamp_alpha(alpha: f64) -> f64 {
    if alpha.is_nan() {
        return crate::config::DEFAULT_SMOOTHING_ALPHA;
    }
    alpha.clamp(f64::MIN_POSITIVE, 1.0)
}

/// Frame-driven gaze tracker
#[derive(Debug, Clone)]
pub struct GazeTracker {
    smoother: GazeSmoother,
    state: GazeState,
    last_source: Option<MappingSource>,
}

impl Default for GazeTracker {
    fn default() -> Self {
        Self::from_config(&GazeConfig::default())
    }
}

impl GazeTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            smoother: GazeSmoother::new(alpha),
            state: GazeState::default(),
            last_source: None,
        }
    }

    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(config.smoothing_alpha)
    }

    /// Map a sample using the best mapping available
    pub fn map_sample<P>(
        sample: SourceSample,
        calibration: Option<&CalibrationResult>,
        presenter: &P,
    ) -> (Point, MappingSource)
    where
        P: Presenter + ?Sized,
    {
        if let Some(calibration) = calibration {
            return (calibration.map(sample), MappingSource::Calibrated);
        }
        match presenter.preview_rect().filter(|r| r.has_area()) {
            Some(preview) => (
                preview.project(sample.x, sample.y, presenter.is_mirrored()),
                MappingSource::Preview,
            ),
            None => (
                presenter.viewport().project(sample.x, sample.y, false),
                MappingSource::Viewport,
            ),
        }
    }

    /// Process one rendering frame.
    ///
    /// Returns the smoothed point to draw, or `None` when the cursor should
    /// be hidden this frame.
    pub fn tick<P>(
        &mut self,
        sample: Option<SourceSample>,
        calibration: Option<&CalibrationResult>,
        presenter: &P,
    ) -> Option<Point>
    where
        P: Presenter + ?Sized,
    {
        self.state.raw_mapped = None;

        let sample = sample.filter(|s| s.is_finite())?;
        let (mapped, source) = Self::map_sample(sample, calibration, presenter);
        if !mapped.is_finite() {
            return None;
        }

        self.last_source = Some(source);
        self.state.raw_mapped = Some(mapped);
        let smoothed = self.smoother.update(mapped);
        self.state.smoothed = Some(smoothed);
        Some(smoothed)
    }

    pub fn state(&self) -> GazeState {
        self.state
    }

    pub fn smoothed(&self) -> Option<Point> {
        self.state.smoothed
    }

    pub fn last_source(&self) -> Option<MappingSource> {
        self.last_source
    }

    pub fn alpha(&self) -> f64 {
        self.smoother.alpha()
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.smoother.set_alpha(alpha);
    }

    /// Forget the smoothed position (e.g. after recalibration)
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.state = GazeState::default();
        self.last_source = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::HeadlessPresenter;
    use crate::types::{AffineTransform, Rect, VariantLabel};
    use chrono::Utc;

    fn presenter() -> HeadlessPresenter {
        HeadlessPresenter::new(Rect::new(0.0, 0.0, 1000.0, 800.0))
    }

    #[test]
    fn test_first_sample_seeds_smoother() {
        let mut smoother = GazeSmoother::new(0.18);
        let p = smoother.update(Point::new(100.0, 50.0));
        assert_eq!(p, Point::new(100.0, 50.0));
    }

    #[test]
    fn test_smoothing_converges_monotonically_without_overshoot() {
        let mut smoother = GazeSmoother::new(0.18);
        smoother.update(Point::new(0.0, 0.0));

        let target = Point::new(500.0, -200.0);
        let mut prev = Point::new(0.0, 0.0);
        for _ in 0..200 {
            let p = smoother.update(target);
            assert!(p.x >= prev.x && p.x <= target.x);
            assert!(p.y <= prev.y && p.y >= target.y);
            prev = p;
        }
        assert!(prev.distance_to(target) < 1e-6);
    }

    #[test]
    fn test_alpha_one_follows_input() {
        let mut smoother = GazeSmoother::new(1.0);
        smoother.update(Point::new(0.0, 0.0));
        assert_eq!(smoother.update(Point::new(7.0, 9.0)), Point::new(7.0, 9.0));
    }

    #[test]
    fn test_alpha_is_clamped() {
        assert_eq!(GazeSmoother::new(3.0).alpha(), 1.0);
        assert!(GazeSmoother::new(0.0).alpha() > 0.0);
    }

    #[test]
    fn test_missing_sample_keeps_smoothed_state() {
        let presenter = presenter();
        let mut tracker = GazeTracker::new(0.5);

        let first = tracker.tick(Some(SourceSample::new(0.5, 0.5)), None, &presenter);
        assert_eq!(first, Some(Point::new(500.0, 400.0)));

        assert_eq!(tracker.tick(None, None, &presenter), None);
        assert_eq!(tracker.state().raw_mapped, None);
        assert_eq!(tracker.smoothed(), Some(Point::new(500.0, 400.0)));
    }

    #[test]
    fn test_non_finite_mapping_is_rejected() {
        let presenter = presenter();
        let mut tracker = GazeTracker::new(0.5);
        tracker.tick(Some(SourceSample::new(0.5, 0.5)), None, &presenter);

        let broken = CalibrationResult {
            transform: AffineTransform::new([f64::INFINITY, 0.0, 0.0], [0.0, 1.0, 0.0]),
            variant: VariantLabel::Identity,
            rmse: 0.0,
            pair_count: 9,
            mirrored: false,
            candidates: vec![],
            calibrated_at: Utc::now(),
        };
        assert_eq!(
            tracker.tick(Some(SourceSample::new(0.3, 0.3)), Some(&broken), &presenter),
            None
        );
        assert_eq!(tracker.smoothed(), Some(Point::new(500.0, 400.0)));
    }

    #[test]
    fn test_mapping_priority() {
        let sample = SourceSample::new(0.25, 0.5);

        let viewport_only = presenter();
        let (p, source) = GazeTracker::map_sample(sample, None, &viewport_only);
        assert_eq!(source, MappingSource::Viewport);
        assert_eq!(p, Point::new(250.0, 400.0));

        let with_preview = presenter()
            .with_preview(Rect::new(100.0, 100.0, 400.0, 300.0))
            .with_mirrored(true);
        let (p, source) = GazeTracker::map_sample(sample, None, &with_preview);
        assert_eq!(source, MappingSource::Preview);
        assert_eq!(p, Point::new(400.0, 250.0));

        let calibration = CalibrationResult {
            transform: AffineTransform::new([2.0, 0.0, 1.0], [0.0, 2.0, 1.0]),
            variant: VariantLabel::Identity,
            rmse: 0.0,
            pair_count: 3,
            mirrored: false,
            candidates: vec![],
            calibrated_at: Utc::now(),
        };
        let (p, source) = GazeTracker::map_sample(sample, Some(&calibration), &with_preview);
        assert_eq!(source, MappingSource::Calibrated);
        assert_eq!(p, Point::new(1.5, 2.0));
    }

    #[test]
    fn test_zero_sized_preview_falls_back_to_viewport() {
        let presenter = presenter().with_preview(Rect::new(0.0, 0.0, 0.0, 0.0));
        let (_, source) = GazeTracker::map_sample(SourceSample::new(0.1, 0.1), None, &presenter);
        assert_eq!(source, MappingSource::Viewport);
    }
}
