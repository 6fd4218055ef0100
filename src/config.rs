//! Engine configuration
//!
//! All tunables recognised by the engine, with the defaults used by the
//! calibration and fixation-test flows. Every field is optional in JSON.

use crate::error::GazeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default EMA decay for the on-screen gaze point
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.18;

/// Default dwell time required to confirm a fixation (ms)
pub const DEFAULT_FIXATION_THRESHOLD_MS: u64 = 350;

/// Default number of fixation-test trials
pub const DEFAULT_TRIAL_COUNT: usize = 8;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// EMA decay in (0, 1]; larger responds faster with more jitter
    pub smoothing_alpha: f64,
    /// Minimum landmark confidence accepted at the feed adapter
    pub confidence_threshold: f64,
    /// Number of fixation-test trials
    pub trial_count: usize,
    /// Dwell time required to confirm a fixation (ms)
    pub fixation_threshold_ms: u64,
    /// Sampling window per calibration target (ms)
    pub calibration_window_ms: u64,
    /// Polling interval inside a calibration window (ms)
    pub calibration_poll_ms: u64,
    /// Pause between calibration targets (ms)
    pub calibration_settle_ms: u64,
    /// Per-axis distance from the window median beyond which a sample is an outlier
    pub outlier_radius: f64,
    /// Hit-test tolerance added on every side of a trial target (px)
    pub hit_test_tolerance_px: f64,
    /// Fixation evaluation interval (ms)
    pub fixation_tick_ms: u64,
    /// Delay between a confirmed fixation and the next trial (ms)
    pub trial_advance_delay_ms: u64,
    /// Inset from the arena edges when placing trial targets (px)
    pub trial_margin_px: f64,
    /// Trial target edge length (px)
    pub trial_target_size_px: f64,
    /// Calibration dot edge length (px)
    pub calibration_target_size_px: f64,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            confidence_threshold: 0.05,
            trial_count: DEFAULT_TRIAL_COUNT,
            fixation_threshold_ms: DEFAULT_FIXATION_THRESHOLD_MS,
            calibration_window_ms: 700,
            calibration_poll_ms: 40,
            calibration_settle_ms: 200,
            outlier_radius: 0.12,
            hit_test_tolerance_px: 18.0,
            fixation_tick_ms: 50,
            trial_advance_delay_ms: 500,
            trial_margin_px: 60.0,
            trial_target_size_px: 90.0,
            calibration_target_size_px: 20.0,
        }
    }
}

impl GazeConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), GazeError> {
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(GazeError::InvalidConfig(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            )));
        }
        if self.calibration_window_ms == 0 || self.calibration_poll_ms == 0 {
            return Err(GazeError::InvalidConfig(
                "calibration window and poll interval must be positive".to_string(),
            ));
        }
        if self.calibration_poll_ms > self.calibration_window_ms {
            return Err(GazeError::InvalidConfig(format!(
                "calibration_poll_ms ({}) exceeds calibration_window_ms ({})",
                self.calibration_poll_ms, self.calibration_window_ms
            )));
        }
        if self.fixation_threshold_ms == 0 || self.fixation_tick_ms == 0 {
            return Err(GazeError::InvalidConfig(
                "fixation threshold and tick interval must be positive".to_string(),
            ));
        }
        if !(self.outlier_radius > 0.0) {
            return Err(GazeError::InvalidConfig(format!(
                "outlier_radius must be positive, got {}",
                self.outlier_radius
            )));
        }
        if !(self.hit_test_tolerance_px >= 0.0) {
            return Err(GazeError::InvalidConfig(format!(
                "hit_test_tolerance_px must be non-negative, got {}",
                self.hit_test_tolerance_px
            )));
        }
        if !(self.trial_target_size_px > 0.0 && self.trial_margin_px >= 0.0) {
            return Err(GazeError::InvalidConfig(
                "trial target size must be positive and margin non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn calibration_window(&self) -> Duration {
        Duration::from_millis(self.calibration_window_ms)
    }

    pub fn calibration_poll(&self) -> Duration {
        Duration::from_millis(self.calibration_poll_ms)
    }

    pub fn calibration_settle(&self) -> Duration {
        Duration::from_millis(self.calibration_settle_ms)
    }

    pub fn fixation_threshold(&self) -> Duration {
        Duration::from_millis(self.fixation_threshold_ms)
    }

    pub fn fixation_tick(&self) -> Duration {
        Duration::from_millis(self.fixation_tick_ms)
    }

    pub fn trial_advance_delay(&self) -> Duration {
        Duration::from_millis(self.trial_advance_delay_ms)
    }

    /// Load and validate configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, GazeError> {
        let config: GazeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, GazeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = GazeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.smoothing_alpha, 0.18);
        assert_eq!(config.fixation_threshold_ms, 350);
        assert_eq!(config.trial_count, 8);
        assert_eq!(config.calibration_window(), Duration::from_millis(700));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = GazeConfig::from_json(r#"{"smoothing_alpha": 0.5, "trial_count": 3}"#)
            .unwrap();
        assert_eq!(config.smoothing_alpha, 0.5);
        assert_eq!(config.trial_count, 3);
        assert_eq!(config.hit_test_tolerance_px, 18.0);
    }

    #[test]
    fn test_rejects_bad_alpha() {
        assert!(GazeConfig::from_json(r#"{"smoothing_alpha": 0.0}"#).is_err());
        assert!(GazeConfig::from_json(r#"{"smoothing_alpha": 1.5}"#).is_err());
        assert!(GazeConfig::from_json(r#"{"smoothing_alpha": 1.0}"#).is_ok());
    }

    #[test]
    fn test_rejects_poll_longer_than_window() {
        let config = GazeConfig {
            calibration_poll_ms: 800,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GazeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = GazeConfig {
            fixation_threshold_ms: 500,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        let loaded = GazeConfig::from_json(&json).unwrap();
        assert_eq!(config, loaded);
    }
}
