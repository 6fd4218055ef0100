//! Blocking calibration and variant fitting
//!
//! [`CalibrationSession`] drives a [`CalibrationRun`] to completion on one
//! thread, sleeping on the supplied clock between ticks. Every variant is
//! fitted over the collected pairs and the one with the lowest reprojection
//! error is kept. Nothing is returned until the whole sequence succeeded, so
//! callers can install the result atomically or keep their previous mapping.

use crate::calibration::run::CalibrationRun;
use crate::calibration::sampler::CalibrationSampler;
use crate::clock::{CancelToken, Clock};
use crate::config::GazeConfig;
use crate::error::GazeError;
use crate::presenter::Presenter;
use crate::solver::{reprojection_rmse, AffineSolver};
use crate::source::LandmarkSource;
use crate::types::{
    AffineTransform, CalibrationPair, CalibrationResult, Rect, VariantLabel, VariantScore,
};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// RMSE difference (px) below which two variants are considered tied
pub const RMSE_TIE_TOLERANCE: f64 = 1e-6;

/// Runs a full calibration on the calling thread
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    sampler: CalibrationSampler,
    settle: Duration,
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::from_config(&GazeConfig::default())
    }
}

impl CalibrationSession {
    pub fn new(sampler: CalibrationSampler, settle: Duration) -> Self {
        Self { sampler, settle }
    }

    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(
            CalibrationSampler::from_config(config),
            config.calibration_settle(),
        )
    }

    /// Start a non-blocking run over `targets`
    pub fn start<P>(&self, targets: &[Rect], presenter: &P, now: Instant) -> CalibrationRun
    where
        P: Presenter + ?Sized,
    {
        CalibrationRun::start(
            targets.to_vec(),
            self.sampler.clone(),
            self.settle,
            presenter,
            now,
        )
    }

    /// Collect one pair per target and fit the best variant, blocking until
    /// the run ends.
    ///
    /// Targets that yield no samples are skipped. `cancel` is checked before
    /// every step, including the fit after the last settle delay; the
    /// presenter's highlight is cleared in every case.
    pub fn run_calibration<S, P, C>(
        &self,
        targets: &[Rect],
        source: &S,
        presenter: &P,
        clock: &C,
        cancel: &CancelToken,
    ) -> Result<CalibrationResult, GazeError>
    where
        S: LandmarkSource + ?Sized,
        P: Presenter + ?Sized,
        C: Clock + ?Sized,
    {
        let mut run = self.start(targets, presenter, clock.now());
        loop {
            if cancel.is_cancelled() {
                run.abort(presenter);
                return Err(GazeError::Cancelled);
            }
            if let Some(outcome) = run.tick(clock.now(), clock.wall_now(), source, presenter) {
                return outcome;
            }
            match run.next_wake() {
                Some(wake) => clock.sleep(wake.saturating_duration_since(clock.now())),
                // A run only finishes by returning its outcome
                None => return Err(GazeError::Cancelled),
            }
        }
    }
}

/// Fit every variant and return the best one as a calibration result
pub fn fit_variants(
    pairs: &[CalibrationPair],
    mirrored: bool,
    calibrated_at: DateTime<Utc>,
) -> Result<CalibrationResult, GazeError> {
    let mut candidates = Vec::with_capacity(VariantLabel::ALL.len());
    let mut best: Option<(VariantScore, AffineTransform)> = None;

    for variant in VariantLabel::ALL {
        let (score, transform) = score_variant(variant, pairs);
        candidates.push(score.clone());

        if let Some(transform) = transform {
            let replace = match &best {
                None => true,
                Some((current, _)) => beats(&score, current),
            };
            if replace {
                best = Some((score, transform));
            }
        }
    }

    let (winner, transform) = best.ok_or(GazeError::NoViableVariant)?;
    let rmse = winner.rmse.ok_or(GazeError::NoViableVariant)?;

    info!(
        "Chosen mapping variant: {} (rmse {:.2} px over {} pairs)",
        winner.variant.as_str(),
        rmse,
        pairs.len()
    );

    Ok(CalibrationResult {
        transform,
        variant: winner.variant,
        rmse,
        pair_count: pairs.len(),
        mirrored,
        candidates,
        calibrated_at,
    })
}

/// Fit one variant; the transform is `None` when the fit failed or did not
/// reproject to finite values
pub fn score_variant(
    variant: VariantLabel,
    pairs: &[CalibrationPair],
) -> (VariantScore, Option<AffineTransform>) {
    let variant_pairs: Vec<CalibrationPair> =
        pairs.iter().map(|p| variant.apply_to_pair(p)).collect();

    let fitted = AffineSolver::fit(&variant_pairs).and_then(|transform| {
        if transform.is_finite() {
            Ok(transform)
        } else {
            Err(GazeError::NoViableVariant)
        }
    });

    match fitted {
        Ok(transform) => match reprojection_rmse(&transform, &variant_pairs) {
            Some(rmse) => {
                debug!("variant {} rmse={:.4}", variant.as_str(), rmse);
                (
                    VariantScore {
                        variant,
                        rmse: Some(rmse),
                        x_gain: Some(transform.ax[0]),
                    },
                    Some(transform),
                )
            }
            None => {
                warn!("Variant {} produced no finite projections", variant.as_str());
                (failed_score(variant), None)
            }
        },
        Err(e) => {
            warn!("Affine fit failed for variant {}: {}", variant.as_str(), e);
            (failed_score(variant), None)
        }
    }
}

fn failed_score(variant: VariantLabel) -> VariantScore {
    VariantScore {
        variant,
        rmse: None,
        x_gain: None,
    }
}

/// Lower RMSE wins. Ties go to the variant whose horizontal gain is positive,
/// i.e. screen x grows with source x; remaining ties keep the earlier variant.
fn beats(challenger: &VariantScore, current: &VariantScore) -> bool {
    let (Some(a), Some(b)) = (challenger.rmse, current.rmse) else {
        return challenger.rmse.is_some();
    };

    let tolerance = RMSE_TIE_TOLERANCE.max(b * 1e-9);
    if a < b - tolerance {
        return true;
    }
    if (a - b).abs() <= tolerance {
        let positive = |s: &VariantScore| s.x_gain.map_or(false, |g| g > 0.0);
        return positive(challenger) && !positive(current);
    }
    false
}
