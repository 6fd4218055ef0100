//! Tick-driven calibration run
//!
//! A [`CalibrationRun`] walks the target sequence one step per call to
//! [`tick`](CalibrationRun::tick): highlight a target, poll the source into
//! its collection window until the deadline, clear the highlight, wait out
//! the settle delay, and fit once every target has been visited. Nothing
//! blocks, so the owner keeps running its frame tick between calls.

use crate::calibration::sampler::{pair_for_target, CalibrationSampler, CollectionWindow};
use crate::calibration::session::fit_variants;
use crate::config::GazeConfig;
use crate::error::GazeError;
use crate::presenter::Presenter;
use crate::solver::MIN_PAIRS;
use crate::source::LandmarkSource;
use crate::types::{CalibrationPair, CalibrationResult, Rect};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a calibration run currently is
#[derive(Debug, Clone)]
pub enum CalibrationPhase {
    /// Target `index` is highlighted and its window is open
    Collecting {
        index: usize,
        window: CollectionWindow,
        next_poll: Instant,
    },
    /// Highlight cleared, waiting before `next_index` (or the fit)
    Settling { next_index: usize, until: Instant },
    /// Fitted or aborted
    Finished,
}

/// One in-flight calibration
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    targets: Vec<Rect>,
    mirrored: bool,
    sampler: CalibrationSampler,
    settle: Duration,
    phase: CalibrationPhase,
    pairs: Vec<CalibrationPair>,
}

impl CalibrationRun {
    /// Start a run at `now`, highlighting the first target.
    ///
    /// The preview's mirroring is captured here and used for every pair.
    pub fn start<P>(
        targets: Vec<Rect>,
        sampler: CalibrationSampler,
        settle: Duration,
        presenter: &P,
        now: Instant,
    ) -> Self
    where
        P: Presenter + ?Sized,
    {
        let mirrored = presenter.is_mirrored();
        info!(
            "Calibration started ({} targets, mirrored preview: {})",
            targets.len(),
            mirrored
        );

        let mut run = Self {
            pairs: Vec::with_capacity(targets.len()),
            targets,
            mirrored,
            sampler,
            settle,
            phase: CalibrationPhase::Settling {
                next_index: 0,
                until: now,
            },
        };
        if !run.targets.is_empty() {
            run.open(0, now, presenter);
        }
        run
    }

    pub fn from_config<P>(
        config: &GazeConfig,
        targets: Vec<Rect>,
        presenter: &P,
        now: Instant,
    ) -> Self
    where
        P: Presenter + ?Sized,
    {
        Self::start(
            targets,
            CalibrationSampler::from_config(config),
            config.calibration_settle(),
            presenter,
            now,
        )
    }

    /// Advance the run to `now`.
    ///
    /// Returns `None` while the run is in progress and the outcome once the
    /// last settle delay has passed. A finished run keeps returning `None`.
    pub fn tick<S, P>(
        &mut self,
        now: Instant,
        wall_now: DateTime<Utc>,
        source: &S,
        presenter: &P,
    ) -> Option<Result<CalibrationResult, GazeError>>
    where
        S: LandmarkSource + ?Sized,
        P: Presenter + ?Sized,
    {
        match &mut self.phase {
            CalibrationPhase::Finished => None,
            CalibrationPhase::Settling { next_index, until } => {
                if now < *until {
                    return None;
                }
                let next_index = *next_index;
                if next_index < self.targets.len() {
                    self.open(next_index, now, presenter);
                    return None;
                }
                self.phase = CalibrationPhase::Finished;
                Some(self.fit(wall_now))
            }
            CalibrationPhase::Collecting {
                index,
                window,
                next_poll,
            } => {
                if !window.is_expired(now) {
                    if now >= *next_poll {
                        window.offer(source.current_sample());
                        *next_poll += self.sampler.poll_interval();
                    }
                    return None;
                }

                let index = *index;
                let aggregated = window.aggregate(self.sampler.outlier_radius());
                presenter.highlight_calibration_target(index, false);
                match aggregated {
                    Ok(representative) => {
                        let pair =
                            pair_for_target(representative, &self.targets[index], self.mirrored);
                        self.pairs.push(pair);
                    }
                    Err(_) => warn!("No source samples for calibration target {}", index),
                }
                self.phase = CalibrationPhase::Settling {
                    next_index: index + 1,
                    until: now + self.settle,
                };
                None
            }
        }
    }

    /// Abandon the run, clearing any highlight. No result is produced.
    pub fn abort<P>(&mut self, presenter: &P)
    where
        P: Presenter + ?Sized,
    {
        if let CalibrationPhase::Collecting { index, .. } = self.phase {
            presenter.highlight_calibration_target(index, false);
            info!("Calibration aborted at target {}", index);
        } else if !self.is_finished() {
            info!("Calibration aborted while settling");
        }
        self.phase = CalibrationPhase::Finished;
    }

    /// Earliest instant at which the next tick has work to do
    pub fn next_wake(&self) -> Option<Instant> {
        match &self.phase {
            CalibrationPhase::Collecting {
                window, next_poll, ..
            } => Some((*next_poll).min(window.deadline())),
            CalibrationPhase::Settling { until, .. } => Some(*until),
            CalibrationPhase::Finished => None,
        }
    }

    pub fn phase(&self) -> &CalibrationPhase {
        &self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, CalibrationPhase::Finished)
    }

    /// Index of the highlighted target, if a window is open
    pub fn active_target(&self) -> Option<usize> {
        match self.phase {
            CalibrationPhase::Collecting { index, .. } => Some(index),
            _ => None,
        }
    }

    pub fn targets(&self) -> &[Rect] {
        &self.targets
    }

    /// Pairs collected so far
    pub fn pairs(&self) -> &[CalibrationPair] {
        &self.pairs
    }

    fn open<P>(&mut self, index: usize, now: Instant, presenter: &P)
    where
        P: Presenter + ?Sized,
    {
        debug!("Collecting calibration target {}", index);
        presenter.highlight_calibration_target(index, true);
        self.phase = CalibrationPhase::Collecting {
            index,
            window: CollectionWindow::open(now, self.sampler.window()),
            next_poll: now,
        };
    }

    fn fit(&self, wall_now: DateTime<Utc>) -> Result<CalibrationResult, GazeError> {
        if self.pairs.len() < MIN_PAIRS {
            return Err(GazeError::InsufficientSamples {
                got: self.pairs.len(),
            });
        }
        debug!("Calibration pairs: {:?}", self.pairs);
        fit_variants(&self.pairs, self.mirrored, wall_now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::calibration_grid;
    use crate::clock::{Clock, ManualClock};
    use crate::presenter::HeadlessPresenter;
    use crate::types::{SourceSample, VariantLabel};
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn viewport() -> Rect {
        Rect::new(0.0, 0.0, 1280.0, 720.0)
    }

    fn eye_for(target: &Rect) -> SourceSample {
        let c = target.center();
        SourceSample::new(0.35 + 0.3 * c.x / 1280.0, 0.40 + 0.2 * c.y / 720.0)
    }

    fn drive<S>(
        run: &mut CalibrationRun,
        clock: &ManualClock,
        source: &S,
        presenter: &HeadlessPresenter,
    ) -> Result<CalibrationResult, GazeError>
    where
        S: LandmarkSource,
    {
        loop {
            if let Some(outcome) = run.tick(clock.now(), clock.wall_now(), source, presenter) {
                return outcome;
            }
            let wake = run.next_wake().unwrap();
            clock.sleep(wake.saturating_duration_since(clock.now()));
        }
    }

    #[test]
    fn test_start_highlights_first_target() {
        let presenter = HeadlessPresenter::new(viewport());
        let clock = ManualClock::new();
        let run = CalibrationRun::from_config(
            &GazeConfig::default(),
            calibration_grid(&viewport(), 20.0),
            &presenter,
            clock.now(),
        );

        assert_eq!(run.active_target(), Some(0));
        assert_eq!(presenter.active_target(), Some(0));
        assert_eq!(run.next_wake(), Some(clock.now()));
    }

    #[test]
    fn test_window_polls_until_deadline() {
        let presenter = HeadlessPresenter::new(viewport());
        let clock = ManualClock::new();
        let target = Rect::new(90.0, 40.0, 20.0, 20.0);
        let polls = Cell::new(0usize);
        let source = || {
            polls.set(polls.get() + 1);
            Some(SourceSample::new(0.4, 0.6))
        };
        let mut run = CalibrationRun::from_config(
            &GazeConfig::default(),
            vec![target],
            &presenter,
            clock.now(),
        );

        while run.active_target().is_some() {
            assert!(run.tick(clock.now(), clock.wall_now(), &source, &presenter).is_none());
            clock.advance_ms(10);
        }

        // 0, 40, ..., 680 ms
        assert_eq!(polls.get(), 18);
        assert_eq!(run.pairs().len(), 1);
        assert!((run.pairs()[0].nx - 0.4).abs() < 1e-12);
        assert!((run.pairs()[0].ny - 0.6).abs() < 1e-12);
        assert_eq!(run.pairs()[0].target(), target.center());
        assert_eq!(presenter.active_target(), None);
    }

    #[test]
    fn test_ticks_between_polls_do_not_sample() {
        let presenter = HeadlessPresenter::new(viewport());
        let clock = ManualClock::new();
        let polls = Cell::new(0usize);
        let source = || {
            polls.set(polls.get() + 1);
            Some(SourceSample::new(0.5, 0.5))
        };
        let mut run = CalibrationRun::from_config(
            &GazeConfig::default(),
            calibration_grid(&viewport(), 20.0),
            &presenter,
            clock.now(),
        );

        for _ in 0..4 {
            run.tick(clock.now(), clock.wall_now(), &source, &presenter);
        }
        clock.advance_ms(39);
        run.tick(clock.now(), clock.wall_now(), &source, &presenter);
        assert_eq!(polls.get(), 1);

        clock.advance_ms(1);
        run.tick(clock.now(), clock.wall_now(), &source, &presenter);
        assert_eq!(polls.get(), 2);
    }

    #[test]
    fn test_full_run_fits_identity() {
        let presenter = HeadlessPresenter::new(viewport());
        let clock = ManualClock::new();
        let targets = calibration_grid(&viewport(), 20.0);
        let source = || presenter.active_target().map(|i| eye_for(&targets[i]));
        let mut run = CalibrationRun::from_config(
            &GazeConfig::default(),
            targets.clone(),
            &presenter,
            clock.now(),
        );

        let result = drive(&mut run, &clock, &source, &presenter).unwrap();

        assert_eq!(result.variant, VariantLabel::Identity);
        assert_eq!(result.pair_count, 9);
        assert!(run.is_finished());
        assert_eq!(presenter.highlight_count(), 9);
        assert!(run
            .tick(clock.now(), clock.wall_now(), &source, &presenter)
            .is_none());
    }

    #[test]
    fn test_fit_waits_for_last_settle() {
        let presenter = HeadlessPresenter::new(viewport());
        let clock = ManualClock::new();
        let targets = calibration_grid(&viewport(), 20.0);
        let source = || presenter.active_target().map(|i| eye_for(&targets[i]));
        let mut run = CalibrationRun::from_config(
            &GazeConfig::default(),
            targets.clone(),
            &presenter,
            clock.now(),
        );

        // Run until the last window closes
        while !matches!(run.phase(), CalibrationPhase::Settling { next_index: 9, .. }) {
            run.tick(clock.now(), clock.wall_now(), &source, &presenter);
            clock.advance_ms(10);
        }
        assert_eq!(run.pairs().len(), 9);

        clock.advance_ms(150);
        assert!(run
            .tick(clock.now(), clock.wall_now(), &source, &presenter)
            .is_none());
        clock.advance_ms(50);
        assert!(matches!(
            run.tick(clock.now(), clock.wall_now(), &source, &presenter),
            Some(Ok(_))
        ));
    }

    #[test]
    fn test_abort_clears_highlight() {
        let presenter = HeadlessPresenter::new(viewport());
        let clock = ManualClock::new();
        let source = || Some(SourceSample::new(0.5, 0.5));
        let mut run = CalibrationRun::from_config(
            &GazeConfig::default(),
            calibration_grid(&viewport(), 20.0),
            &presenter,
            clock.now(),
        );
        run.tick(clock.now(), clock.wall_now(), &source, &presenter);

        run.abort(&presenter);

        assert!(run.is_finished());
        assert_eq!(run.next_wake(), None);
        assert_eq!(presenter.active_target(), None);
        clock.advance_ms(5000);
        assert!(run
            .tick(clock.now(), clock.wall_now(), &source, &presenter)
            .is_none());
    }

    #[test]
    fn test_empty_target_list_fails() {
        let presenter = HeadlessPresenter::new(viewport());
        let clock = ManualClock::new();
        let source = || None;
        let mut run = CalibrationRun::from_config(
            &GazeConfig::default(),
            Vec::new(),
            &presenter,
            clock.now(),
        );

        assert!(matches!(
            run.tick(clock.now(), clock.wall_now(), &source, &presenter),
            Some(Err(GazeError::InsufficientSamples { got: 0 }))
        ));
        assert_eq!(presenter.highlight_count(), 0);
    }
}
