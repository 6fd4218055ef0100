//! Calibration: per-target sampling and variant fitting
//!
//! Pipeline: highlight target → CollectionWindow → CalibrationPair
//! → settle → (all targets) → variant fits → CalibrationResult

pub mod run;
pub mod sampler;
pub mod session;

pub use run::{CalibrationPhase, CalibrationRun};
pub use sampler::{CalibrationSampler, CollectionWindow};
pub use session::{fit_variants, CalibrationSession};

use crate::types::{Point, Rect};

/// Normalized grid positions used on both axes
pub const GRID_POSITIONS: [f64; 3] = [0.1, 0.5, 0.9];

/// The 3×3 calibration grid over `area`, row by row from the top left.
/// Each target is a `dot_size` square centred on its grid position.
pub fn calibration_grid(area: &Rect, dot_size: f64) -> Vec<Rect> {
    let mut targets = Vec::with_capacity(GRID_POSITIONS.len() * GRID_POSITIONS.len());
    for &ny in &GRID_POSITIONS {
        for &nx in &GRID_POSITIONS {
            let center = Point::new(area.left + nx * area.width, area.top + ny * area.height);
            targets.push(Rect::centered_at(center, dot_size, dot_size));
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_layout() {
        let area = Rect::new(100.0, 50.0, 1000.0, 500.0);
        let grid = calibration_grid(&area, 20.0);

        assert_eq!(grid.len(), 9);
        assert_eq!(grid[0].center(), Point::new(200.0, 100.0));
        assert_eq!(grid[4].center(), Point::new(600.0, 300.0));
        assert_eq!(grid[8].center(), Point::new(1000.0, 500.0));
        assert_eq!(grid[2].width, 20.0);
    }
}
