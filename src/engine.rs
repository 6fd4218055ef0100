//! Engine orchestration
//!
//! [`GazeEngine`] is the single owner of the mutable gaze state: the active
//! calibration, the smoothed gaze point, the calibration status and the
//! fixation run. Callers drive it from independent ticks (every rendering
//! frame, the calibration schedule and the fixed fixation interval); each
//! call runs to completion, so no locking is involved.

use crate::calibration::{calibration_grid, CalibrationRun};
use crate::clock::{CancelToken, Clock};
use crate::config::GazeConfig;
use crate::error::GazeError;
use crate::export;
use crate::fixation::{FixationRun, RunEvent, RunSummary};
use crate::presenter::Presenter;
use crate::source::LandmarkSource;
use crate::tracker::{GazeState, GazeTracker};
use crate::trials::build_trials_from_config;
use crate::types::{
    CalibrationResult, CalibrationStatus, FixationRecord, Point, Rect, SourceSample, Trial,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// What a calibration tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationProgress {
    /// No calibration in flight
    Idle,
    /// Still collecting or settling
    Running,
    /// Finished and installed as the active mapping
    Installed,
}

#[derive(Debug)]
struct ActiveCalibration {
    run: CalibrationRun,
    previous_status: CalibrationStatus,
}

/// Stateful gaze engine
#[derive(Debug)]
pub struct GazeEngine {
    config: GazeConfig,
    calibration: Option<CalibrationResult>,
    calibrating: Option<ActiveCalibration>,
    tracker: GazeTracker,
    status: CalibrationStatus,
    run: Option<FixationRun>,
    last_summary: Option<RunSummary>,
}

impl GazeEngine {
    /// Create an engine with validated configuration
    pub fn new(config: GazeConfig) -> Result<Self, GazeError> {
        config.validate()?;
        Ok(Self {
            tracker: GazeTracker::from_config(&config),
            config,
            calibration: None,
            calibrating: None,
            status: CalibrationStatus::Pending,
            run: None,
            last_summary: None,
        })
    }

    pub fn config(&self) -> &GazeConfig {
        &self.config
    }

    /// Calibration targets for the current layout: the grid over the camera
    /// preview, or over the viewport when no preview is laid out.
    pub fn calibration_targets<P>(&self, presenter: &P) -> Vec<Rect>
    where
        P: Presenter + ?Sized,
    {
        let area = presenter
            .preview_rect()
            .filter(|r| r.has_area())
            .unwrap_or_else(|| presenter.viewport());
        calibration_grid(&area, self.config.calibration_target_size_px)
    }

    /// Begin a calibration at `now` without blocking.
    ///
    /// Drive it with [`calibration_tick`](Self::calibration_tick) while the
    /// frame tick keeps running. An in-flight calibration is abandoned first.
    pub fn start_calibration<P>(&mut self, presenter: &P, now: Instant)
    where
        P: Presenter + ?Sized,
    {
        if self.calibrating.is_some() {
            warn!("Restarting calibration in progress");
            self.cancel_calibration(presenter);
        }
        let targets = self.calibration_targets(presenter);
        let previous_status = std::mem::replace(&mut self.status, CalibrationStatus::Running);
        presenter.signal_status(&self.status);

        let run = CalibrationRun::from_config(&self.config, targets, presenter, now);
        self.calibrating = Some(ActiveCalibration {
            run,
            previous_status,
        });
    }

    /// Advance the in-flight calibration.
    ///
    /// The result is installed only when the whole run succeeded. Any error
    /// marks the calibration as failed while keeping the previous mapping.
    pub fn calibration_tick<S, P>(
        &mut self,
        now: Instant,
        wall_now: DateTime<Utc>,
        source: &S,
        presenter: &P,
    ) -> Result<CalibrationProgress, GazeError>
    where
        S: LandmarkSource + ?Sized,
        P: Presenter + ?Sized,
    {
        let Some(active) = self.calibrating.as_mut() else {
            return Ok(CalibrationProgress::Idle);
        };
        let Some(outcome) = active.run.tick(now, wall_now, source, presenter) else {
            return Ok(CalibrationProgress::Running);
        };
        self.calibrating = None;

        match outcome {
            Ok(result) => {
                self.status = CalibrationStatus::Calibrated {
                    variant: result.variant,
                    rmse: result.rmse,
                };
                presenter.signal_status(&self.status);
                self.calibration = Some(result);
                Ok(CalibrationProgress::Installed)
            }
            Err(e) => {
                warn!("Calibration failed: {}", e);
                self.status = CalibrationStatus::Failed {
                    reason: e.to_string(),
                };
                presenter.signal_status(&self.status);
                Err(e)
            }
        }
    }

    /// Abandon the in-flight calibration and restore the previous status.
    /// Returns whether a calibration was running.
    pub fn cancel_calibration<P>(&mut self, presenter: &P) -> bool
    where
        P: Presenter + ?Sized,
    {
        let Some(mut active) = self.calibrating.take() else {
            return false;
        };
        active.run.abort(presenter);
        info!("Calibration cancelled, keeping previous mapping");
        self.status = active.previous_status;
        presenter.signal_status(&self.status);
        true
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating.is_some()
    }

    pub fn calibration_run(&self) -> Option<&CalibrationRun> {
        self.calibrating.as_ref().map(|active| &active.run)
    }

    /// Run a full calibration on the calling thread and install the result.
    ///
    /// Built on [`start_calibration`](Self::start_calibration) and
    /// [`calibration_tick`](Self::calibration_tick), sleeping on `clock`
    /// between steps. `cancel` is checked before every step; a cancelled run
    /// restores the previous status.
    pub fn calibrate<S, P, C>(
        &mut self,
        source: &S,
        presenter: &P,
        clock: &C,
        cancel: &CancelToken,
    ) -> Result<&CalibrationResult, GazeError>
    where
        S: LandmarkSource + ?Sized,
        P: Presenter + ?Sized,
        C: Clock + ?Sized,
    {
        self.start_calibration(presenter, clock.now());
        loop {
            if cancel.is_cancelled() {
                self.cancel_calibration(presenter);
                return Err(GazeError::Cancelled);
            }
            match self.calibration_tick(clock.now(), clock.wall_now(), source, presenter)? {
                CalibrationProgress::Installed => break,
                CalibrationProgress::Idle => return Err(GazeError::Cancelled),
                CalibrationProgress::Running => {}
            }
            if let Some(wake) = self.calibration_run().and_then(|run| run.next_wake()) {
                clock.sleep(wake.saturating_duration_since(clock.now()));
            }
        }
        self.calibration.as_ref().ok_or(GazeError::NoViableVariant)
    }

    /// Install a calibration computed elsewhere, e.g. by another tool in the
    /// same session. Abandons any in-flight run without touching the presenter.
    pub fn set_calibration(&mut self, result: CalibrationResult) {
        self.calibrating = None;
        self.status = CalibrationStatus::Calibrated {
            variant: result.variant,
            rmse: result.rmse,
        };
        self.calibration = Some(result);
    }

    /// Install a calibration from its JSON hand-off form.
    ///
    /// The engine never reads or writes calibration files itself; callers
    /// pass the JSON between tools that share one session.
    pub fn load_calibration(&mut self, json: &str) -> Result<(), GazeError> {
        let result: CalibrationResult = serde_json::from_str(json)?;
        if !result.transform.is_finite() {
            return Err(GazeError::ParseError(
                "calibration transform has non-finite coefficients".to_string(),
            ));
        }
        self.set_calibration(result);
        Ok(())
    }

    /// JSON hand-off form of the active calibration, if any
    pub fn save_calibration(&self) -> Result<Option<String>, GazeError> {
        self.calibration
            .as_ref()
            .map(|c| serde_json::to_string_pretty(c).map_err(GazeError::from))
            .transpose()
    }

    /// Drop the active mapping and fall back to direct projection
    pub fn clear_calibration(&mut self) {
        self.calibrating = None;
        self.calibration = None;
        self.status = CalibrationStatus::Pending;
    }

    pub fn calibration(&self) -> Option<&CalibrationResult> {
        self.calibration.as_ref()
    }

    pub fn status(&self) -> &CalibrationStatus {
        &self.status
    }

    pub fn status_text(&self) -> String {
        self.status.status_text()
    }

    /// Per-frame update. Returns the cursor position, or `None` to hide it.
    ///
    /// Independent of calibration: while a run is in flight the previous
    /// mapping, or the direct projection, keeps driving the cursor.
    pub fn frame_tick<P>(
        &mut self,
        sample: Option<SourceSample>,
        presenter: &P,
    ) -> Option<Point>
    where
        P: Presenter + ?Sized,
    {
        self.tracker
            .tick(sample, self.calibration.as_ref(), presenter)
    }

    pub fn smoothed(&self) -> Option<Point> {
        self.tracker.smoothed()
    }

    pub fn gaze_state(&self) -> GazeState {
        self.tracker.state()
    }

    pub fn tracker(&self) -> &GazeTracker {
        &self.tracker
    }

    /// Start a fixation run over `trials`.
    ///
    /// An active run is stopped at `wall_now` first, so its records stay
    /// available through [`last_summary`](Self::last_summary).
    pub fn start_trials(&mut self, trials: Vec<Trial>, wall_now: DateTime<Utc>) -> Uuid {
        if let Some(run) = &self.run {
            if !run.is_finished() {
                warn!("Replacing unfinished fixation run {}", run.run_id());
            }
            self.stop_trials(wall_now);
        }
        let run = FixationRun::new(trials, &self.config);
        let run_id = run.run_id();
        self.run = Some(run);
        run_id
    }

    /// Start a run with randomly placed targets inside `arena`
    pub fn start_random_trials<R: Rng>(
        &mut self,
        arena: &Rect,
        rng: &mut R,
        wall_now: DateTime<Utc>,
    ) -> Uuid {
        let trials = build_trials_from_config(&self.config, arena, rng);
        self.start_trials(trials, wall_now)
    }

    /// Fixed-interval fixation evaluation against the current smoothed point
    pub fn fixation_tick(&mut self, now: Instant, wall_now: DateTime<Utc>) -> RunEvent {
        let gaze = self.tracker.smoothed();
        match self.run.as_mut() {
            Some(run) => run.tick(gaze, now, wall_now),
            None => RunEvent::Idle,
        }
    }

    /// Stop the active run, keeping whatever was recorded
    pub fn stop_trials(&mut self, wall_now: DateTime<Utc>) -> Option<RunSummary> {
        let summary = self.run.take()?.stop(wall_now);
        self.last_summary = Some(summary.clone());
        Some(summary)
    }

    pub fn active_run(&self) -> Option<&FixationRun> {
        self.run.as_ref()
    }

    pub fn last_summary(&self) -> Option<&RunSummary> {
        self.last_summary.as_ref()
    }

    /// Records of the active run, or of the last stopped one
    pub fn records(&self) -> &[FixationRecord] {
        match (&self.run, &self.last_summary) {
            (Some(run), _) => run.records(),
            (None, Some(summary)) => &summary.records,
            (None, None) => &[],
        }
    }

    /// CSV export of [`records`](Self::records)
    pub fn export_csv(&self) -> String {
        export::to_csv(self.records())
    }
}
