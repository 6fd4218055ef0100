//! Fixation detection
//!
//! A fixed-rate tick hit-tests the smoothed gaze point against the current
//! trial target grown by a tolerance margin. Continuous dwell for the
//! threshold duration confirms a fixation; leaving early discards the timer.
//!
//! [`FixationRun`] sequences trials: after a confirmed fixation the target is
//! removed, a short pause follows, then the next trial is shown.

use crate::config::GazeConfig;
use crate::types::{FixationRecord, Point, Trial};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Per-trial dwell state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixationState {
    Idle,
    Dwelling {
        started: Instant,
        started_wall: DateTime<Utc>,
    },
    /// Terminal for the current trial
    Confirmed,
}

/// Outcome of one detector evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum FixationEvent {
    /// No usable gaze point this tick; nothing was tested
    Unavailable,
    /// Gaze outside the tolerance region
    Outside,
    /// Gaze just entered the region
    Entered,
    /// Still dwelling, threshold not reached yet
    Dwelling { elapsed_ms: u64 },
    /// Gaze left before the threshold; timer discarded
    Exited,
    /// Dwell threshold reached
    Confirmed(FixationRecord),
    /// Trial already confirmed
    Done,
}

/// Dwell-time state machine for a single active trial
#[derive(Debug, Clone)]
pub struct FixationDetector {
    threshold: Duration,
    tolerance_px: f64,
    state: FixationState,
}

impl Default for FixationDetector {
    fn default() -> Self {
        Self::from_config(&GazeConfig::default())
    }
}

impl FixationDetector {
    pub fn new(threshold: Duration, tolerance_px: f64) -> Self {
        Self {
            threshold,
            tolerance_px,
            state: FixationState::Idle,
        }
    }

    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(config.fixation_threshold(), config.hit_test_tolerance_px)
    }

    pub fn state(&self) -> FixationState {
        self.state
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether `gaze` falls inside the trial's tolerance region
    pub fn hit_test(&self, gaze: Point, trial: &Trial) -> bool {
        trial.bounding_box.expand(self.tolerance_px).contains(gaze)
    }

    /// Evaluate one tick
    pub fn evaluate(
        &mut self,
        gaze: Option<Point>,
        trial: &Trial,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> FixationEvent {
        if self.state == FixationState::Confirmed {
            return FixationEvent::Done;
        }

        let Some(gaze) = gaze.filter(|g| g.is_finite()) else {
            return FixationEvent::Unavailable;
        };

        if !self.hit_test(gaze, trial) {
            return match self.state {
                FixationState::Dwelling { .. } => {
                    self.state = FixationState::Idle;
                    FixationEvent::Exited
                }
                _ => FixationEvent::Outside,
            };
        }

        match self.state {
            FixationState::Dwelling {
                started,
                started_wall,
            } => {
                let elapsed = now.saturating_duration_since(started);
                if elapsed >= self.threshold {
                    self.state = FixationState::Confirmed;
                    let record = FixationRecord {
                        trial_id: trial.id,
                        start: started_wall,
                        end: wall_now,
                        duration_ms: (elapsed.as_secs_f64() * 1000.0).round() as u64,
                    };
                    info!(
                        "Fixation confirmed on trial {} ({} ms)",
                        trial.id, record.duration_ms
                    );
                    FixationEvent::Confirmed(record)
                } else {
                    FixationEvent::Dwelling {
                        elapsed_ms: elapsed.as_millis() as u64,
                    }
                }
            }
            _ => {
                self.state = FixationState::Dwelling {
                    started: now,
                    started_wall: wall_now,
                };
                FixationEvent::Entered
            }
        }
    }

    /// Back to `Idle` for a fresh trial
    pub fn reset(&mut self) {
        self.state = FixationState::Idle;
    }
}

/// Phase of a trial run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunPhase {
    /// Target `index` is on screen
    Presenting { index: usize },
    /// Fixation confirmed; next trial appears at `until`
    AwaitingNext { next_index: usize, until: Instant },
    Finished,
}

/// What a run tick produced
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Nothing user-visible changed
    Idle,
    /// Fixation indicator switched on or off
    IndicatorChanged { fixating: bool },
    /// A fixation was recorded and the target removed
    Fixation(FixationRecord),
    /// A new trial target is on screen
    TrialShown { id: u32, index: usize },
    /// No trials remain
    Finished,
}

/// Result of a completed or stopped run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub trial_count: usize,
    pub records: Vec<FixationRecord>,
    pub finished_at: DateTime<Utc>,
    /// Whether the run was stopped before all trials were shown
    pub stopped_early: bool,
}

/// A sequence of fixation trials
#[derive(Debug, Clone)]
pub struct FixationRun {
    run_id: Uuid,
    trials: Vec<Trial>,
    detector: FixationDetector,
    phase: RunPhase,
    advance_delay: Duration,
    records: Vec<FixationRecord>,
    fixating: bool,
}

impl FixationRun {
    /// Start a run; the first trial is shown immediately
    pub fn new(trials: Vec<Trial>, config: &GazeConfig) -> Self {
        let phase = if trials.is_empty() {
            RunPhase::Finished
        } else {
            RunPhase::Presenting { index: 0 }
        };
        let run_id = Uuid::new_v4();
        info!("Fixation run {} started with {} trials", run_id, trials.len());

        Self {
            run_id,
            trials,
            detector: FixationDetector::from_config(config),
            phase,
            advance_delay: config.trial_advance_delay(),
            records: Vec::new(),
            fixating: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == RunPhase::Finished
    }

    /// Trial currently on screen, if any
    pub fn current_trial(&self) -> Option<&Trial> {
        match self.phase {
            RunPhase::Presenting { index } => self.trials.get(index),
            _ => None,
        }
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn records(&self) -> &[FixationRecord] {
        &self.records
    }

    /// Fixation indicator state ("Fixation: Yes")
    pub fn is_fixating(&self) -> bool {
        self.fixating
    }

    /// Whether the current target should be drawn highlighted
    pub fn target_highlighted(&self) -> bool {
        self.fixating && self.current_trial().is_some()
    }

    pub fn status_text(&self) -> String {
        match self.phase {
            RunPhase::Presenting { index } => format!("Trial {}/{}", index + 1, self.trials.len()),
            RunPhase::AwaitingNext { next_index, .. } => {
                format!("Trial {}/{}", next_index.min(self.trials.len()), self.trials.len())
            }
            RunPhase::Finished => format!(
                "Test finished \u{2014} {} fixations recorded",
                self.records.len()
            ),
        }
    }

    /// Evaluate one fixed-rate tick
    pub fn tick(&mut self, gaze: Option<Point>, now: Instant, wall_now: DateTime<Utc>) -> RunEvent {
        match self.phase {
            RunPhase::Finished => RunEvent::Idle,
            RunPhase::AwaitingNext { next_index, until } => {
                if now < until {
                    return RunEvent::Idle;
                }
                self.show(next_index)
            }
            RunPhase::Presenting { index } => {
                let Some(trial) = self.trials.get(index).copied() else {
                    return self.finish();
                };
                match self.detector.evaluate(gaze, &trial, now, wall_now) {
                    FixationEvent::Confirmed(record) => {
                        self.records.push(record.clone());
                        self.fixating = false;
                        self.phase = RunPhase::AwaitingNext {
                            next_index: index + 1,
                            until: now + self.advance_delay,
                        };
                        RunEvent::Fixation(record)
                    }
                    FixationEvent::Entered | FixationEvent::Dwelling { .. } => {
                        self.set_fixating(true)
                    }
                    FixationEvent::Exited | FixationEvent::Outside => self.set_fixating(false),
                    FixationEvent::Unavailable | FixationEvent::Done => RunEvent::Idle,
                }
            }
        }
    }

    /// Stop the run, keeping any fixations already recorded
    pub fn stop(&mut self, wall_now: DateTime<Utc>) -> RunSummary {
        let stopped_early = !self.is_finished();
        if stopped_early {
            info!("Fixation run {} stopped early", self.run_id);
        }
        self.phase = RunPhase::Finished;
        self.fixating = false;
        RunSummary {
            run_id: self.run_id,
            trial_count: self.trials.len(),
            records: self.records.clone(),
            finished_at: wall_now,
            stopped_early,
        }
    }

    fn show(&mut self, index: usize) -> RunEvent {
        match self.trials.get(index) {
            Some(trial) => {
                self.detector.reset();
                self.phase = RunPhase::Presenting { index };
                debug!("Showing trial {} ({}/{})", trial.id, index + 1, self.trials.len());
                RunEvent::TrialShown {
                    id: trial.id,
                    index,
                }
            }
            None => self.finish(),
        }
    }

    fn finish(&mut self) -> RunEvent {
        self.phase = RunPhase::Finished;
        self.fixating = false;
        info!(
            "Fixation run {} finished: {} fixations recorded",
            self.run_id,
            self.records.len()
        );
        RunEvent::Finished
    }

    fn set_fixating(&mut self, fixating: bool) -> RunEvent {
        if self.fixating == fixating {
            return RunEvent::Idle;
        }
        self.fixating = fixating;
        RunEvent::IndicatorChanged { fixating }
    }
}
