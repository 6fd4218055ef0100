//! Presentation capability interface
//!
//! The engine needs only a handful of facts from whatever renders the UI:
//! where the camera preview sits, how big the viewport is, whether the preview
//! is mirrored, plus two outbound signals (target highlight and status).

use crate::types::{CalibrationStatus, Rect};
use std::cell::{Cell, RefCell};

/// Narrow view of the presentation layer
pub trait Presenter {
    /// Screen rectangle of the camera preview, if one is laid out
    fn preview_rect(&self) -> Option<Rect>;

    /// Full viewport rectangle
    fn viewport(&self) -> Rect;

    /// Whether the preview is visually mirrored
    fn is_mirrored(&self) -> bool;

    /// Highlight (or un-highlight) calibration target `index`
    fn highlight_calibration_target(&self, _index: usize, _active: bool) {}

    /// Report a calibration status change
    fn signal_status(&self, _status: &CalibrationStatus) {}
}

/// Presenter without a display. Records what it was told.
#[derive(Debug)]
pub struct HeadlessPresenter {
    preview: Option<Rect>,
    viewport: Rect,
    mirrored: bool,
    active_target: Cell<Option<usize>>,
    highlight_count: Cell<usize>,
    statuses: RefCell<Vec<CalibrationStatus>>,
}

impl HeadlessPresenter {
    pub fn new(viewport: Rect) -> Self {
        Self {
            preview: None,
            viewport,
            mirrored: false,
            active_target: Cell::new(None),
            highlight_count: Cell::new(0),
            statuses: RefCell::new(Vec::new()),
        }
    }

    pub fn with_preview(mut self, preview: Rect) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_mirrored(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }

    /// Calibration target currently highlighted
    pub fn active_target(&self) -> Option<usize> {
        self.active_target.get()
    }

    /// How many targets have been highlighted so far
    pub fn highlight_count(&self) -> usize {
        self.highlight_count.get()
    }

    /// Every status signalled, oldest first
    pub fn statuses(&self) -> Vec<CalibrationStatus> {
        self.statuses.borrow().clone()
    }

    pub fn last_status(&self) -> Option<CalibrationStatus> {
        self.statuses.borrow().last().cloned()
    }
}

impl Presenter for HeadlessPresenter {
    fn preview_rect(&self) -> Option<Rect> {
        self.preview
    }

    fn viewport(&self) -> Rect {
        self.viewport
    }

    fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    fn highlight_calibration_target(&self, index: usize, active: bool) {
        if active {
            self.active_target.set(Some(index));
            self.highlight_count.set(self.highlight_count.get() + 1);
        } else if self.active_target.get() == Some(index) {
            self.active_target.set(None);
        }
    }

    fn signal_status(&self, status: &CalibrationStatus) {
        self.statuses.borrow_mut().push(status.clone());
    }
}
