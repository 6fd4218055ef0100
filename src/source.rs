//! Landmark source adapters
//!
//! The engine never talks to a camera or detector. It reads the most recent
//! normalized eye position through [`LandmarkSource`]. Producers either publish
//! into a [`SampleSlot`] once per processed frame or stream JSON messages that
//! [`GazeFeedMessage`] turns into samples.

use crate::error::GazeError;
use crate::types::SourceSample;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Synchronously pollable source of the latest eye-position sample
pub trait LandmarkSource {
    /// Latest sample, or `None` when the current frame had no tracked eye
    fn current_sample(&self) -> Option<SourceSample>;
}

impl<F> LandmarkSource for F
where
    F: Fn() -> Option<SourceSample>,
{
    fn current_sample(&self) -> Option<SourceSample> {
        self()
    }
}

/// Latest-sample cell, overwritten once per processed frame
#[derive(Debug, Default)]
pub struct SampleSlot {
    latest: Cell<Option<SourceSample>>,
}

impl SampleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the result of one processed frame. Non-finite samples count as no sample.
    pub fn publish(&self, sample: Option<SourceSample>) {
        self.latest.set(sample.filter(|s| s.is_finite()));
    }

    pub fn clear(&self) {
        self.latest.set(None);
    }
}

impl LandmarkSource for SampleSlot {
    fn current_sample(&self) -> Option<SourceSample> {
        self.latest.get()
    }
}

/// One message of a raw gaze feed (WebSocket or NDJSON recording)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazeFeedMessage {
    /// Normalized x; absent or null when the frame had no face
    #[serde(default)]
    pub x: Option<f64>,
    /// Normalized y; absent or null when the frame had no face
    #[serde(default)]
    pub y: Option<f64>,
    /// Detector confidence, if the producer reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Capture time in milliseconds since the start of the recording
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_ms: Option<u64>,
}

impl GazeFeedMessage {
    /// Convert to a source sample, dropping low-confidence and incomplete messages
    pub fn to_sample(&self, confidence_threshold: f64) -> Option<SourceSample> {
        if let Some(confidence) = self.confidence {
            if !(confidence >= confidence_threshold) {
                return None;
            }
        }
        match (self.x, self.y) {
            (Some(x), Some(y)) => Some(SourceSample::new(x, y)).filter(|s| s.is_finite()),
            _ => None,
        }
    }

    /// Parse a single feed message
    pub fn parse(json: &str) -> Result<Self, GazeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse newline-delimited feed messages, skipping blank lines
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<Self>, GazeError> {
        let mut messages = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<GazeFeedMessage>(trimmed) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    return Err(GazeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(messages)
    }
}
