//! Affine least-squares solver
//!
//! Fits `(nx, ny) -> (tx, ty)` by ordinary least squares. Both output axes
//! share the 3×3 normal matrix `MᵀM` built from design rows `[nx, ny, 1]`,
//! so one closed-form inverse solves both.

use crate::error::GazeError;
use crate::types::{AffineTransform, CalibrationPair};

/// Below this determinant magnitude the normal matrix is treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-9;

/// Minimum number of pairs for a determined fit
pub const MIN_PAIRS: usize = 3;

/// Stateless affine fitter
pub struct AffineSolver;

impl AffineSolver {
    /// Fit an affine transform to the given pairs
    pub fn fit(pairs: &[CalibrationPair]) -> Result<AffineTransform, GazeError> {
        if pairs.len() < MIN_PAIRS {
            return Err(GazeError::InsufficientData { got: pairs.len() });
        }

        let mut mtm = [0.0f64; 9];
        let mut mtbx = [0.0f64; 3];
        let mut mtby = [0.0f64; 3];

        for pair in pairs {
            let row = [pair.nx, pair.ny, 1.0];
            for i in 0..3 {
                for j in 0..3 {
                    mtm[i * 3 + j] += row[i] * row[j];
                }
                mtbx[i] += row[i] * pair.tx;
                mtby[i] += row[i] * pair.ty;
            }
        }

        let inv = invert3x3(&mtm)?;

        Ok(AffineTransform::new(
            mul_mat_vec(&inv, &mtbx),
            mul_mat_vec(&inv, &mtby),
        ))
    }
}

/// Invert a row-major 3×3 matrix by cofactor expansion
pub fn invert3x3(m: &[f64; 9]) -> Result<[f64; 9], GazeError> {
    let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6]);

    // NaN determinants land here too
    if !(det.abs() >= SINGULAR_EPSILON) {
        return Err(GazeError::SingularSystem { det });
    }

    let inv_det = 1.0 / det;
    Ok([
        (m[4] * m[8] - m[5] * m[7]) * inv_det,
        (m[2] * m[7] - m[1] * m[8]) * inv_det,
        (m[1] * m[5] - m[2] * m[4]) * inv_det,
        (m[5] * m[6] - m[3] * m[8]) * inv_det,
        (m[0] * m[8] - m[2] * m[6]) * inv_det,
        (m[2] * m[3] - m[0] * m[5]) * inv_det,
        (m[3] * m[7] - m[4] * m[6]) * inv_det,
        (m[1] * m[6] - m[0] * m[7]) * inv_det,
        (m[0] * m[4] - m[1] * m[3]) * inv_det,
    ])
}

fn mul_mat_vec(m: &[f64; 9], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0] * v[0] + m[1] * v[1] + m[2] * v[2],
        m[3] * v[0] + m[4] * v[1] + m[5] * v[2],
        m[6] * v[0] + m[7] * v[1] + m[8] * v[2],
    ]
}

/// Root-mean-squared Euclidean reprojection error of `pairs` under `transform`.
///
/// Pairs whose projection is non-finite are skipped; `None` if none remain.
pub fn reprojection_rmse(transform: &AffineTransform, pairs: &[CalibrationPair]) -> Option<f64> {
    let mut sum_sq = 0.0;
    let mut n = 0usize;

    for pair in pairs {
        let p = transform.apply(pair.nx, pair.ny);
        if !p.is_finite() {
            continue;
        }
        let dx = p.x - pair.tx;
        let dy = p.y - pair.ty;
        sum_sq += dx * dx + dy * dy;
        n += 1;
    }

    if n == 0 {
        return None;
    }
    Some((sum_sq / n as f64).sqrt()).filter(|r| r.is_finite())
}
