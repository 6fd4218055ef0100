//! FFI bindings for Synheart Gaze
//!
//! C-compatible entry points for hosts that own the camera and the UI.
//! Strings cross the boundary as null-terminated UTF-8; returned strings are
//! allocated here and must be released with `gaze_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::Utc;

use crate::calibration::fit_variants;
use crate::config::DEFAULT_SMOOTHING_ALPHA;
use crate::presenter::Presenter;
use crate::tracker::GazeTracker;
use crate::types::{CalibrationPair, CalibrationResult, Rect, SourceSample};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Fit a calibration from a JSON array of pairs
/// (`[{"nx":..,"ny":..,"tx":..,"ty":..}, ...]`).
///
/// # Safety
/// - `pairs_json` must be a valid null-terminated C string.
/// - Returns CalibrationResult JSON that must be freed with `gaze_free_string`.
/// - Returns NULL on error; call `gaze_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gaze_fit_calibration(
    pairs_json: *const c_char,
    mirrored: bool,
) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(pairs_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid pairs string pointer");
            return ptr::null_mut();
        }
    };

    let pairs: Vec<CalibrationPair> = match serde_json::from_str(&json_str) {
        Ok(p) => p,
        Err(e) => {
            set_last_error(&format!("Invalid pairs JSON: {}", e));
            return ptr::null_mut();
        }
    };

    let result = fit_variants(&pairs, mirrored, Utc::now())
        .and_then(|r| serde_json::to_string(&r).map_err(Into::into));
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Tracker API
// ============================================================================

/// Screen layout as reported by the host
#[derive(Debug, Clone)]
struct HostLayout {
    viewport: Rect,
    preview: Option<Rect>,
    mirrored: bool,
}

impl Presenter for HostLayout {
    fn preview_rect(&self) -> Option<Rect> {
        self.preview
    }

    fn viewport(&self) -> Rect {
        self.viewport
    }

    fn is_mirrored(&self) -> bool {
        self.mirrored
    }
}

/// Opaque handle to a GazeTracker and its active calibration
pub struct GazeTrackerHandle {
    tracker: GazeTracker,
    calibration: Option<CalibrationResult>,
    layout: HostLayout,
}

/// Create a tracker for a viewport of the given size.
///
/// # Safety
/// - Returns a pointer that must be freed with `gaze_tracker_free`.
/// - A non-positive or NaN `alpha` selects the default smoothing.
#[no_mangle]
pub unsafe extern "C" fn gaze_tracker_new(
    alpha: f64,
    viewport_width: f64,
    viewport_height: f64,
) -> *mut GazeTrackerHandle {
    clear_last_error();

    let alpha = if alpha > 0.0 {
        alpha
    } else {
        DEFAULT_SMOOTHING_ALPHA
    };

    let handle = Box::new(GazeTrackerHandle {
        tracker: GazeTracker::new(alpha),
        calibration: None,
        layout: HostLayout {
            viewport: Rect::new(0.0, 0.0, viewport_width, viewport_height),
            preview: None,
            mirrored: false,
        },
    });
    Box::into_raw(handle)
}

/// Free a tracker.
///
/// # Safety
/// - `tracker` must be a pointer returned by `gaze_tracker_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn gaze_tracker_free(tracker: *mut GazeTrackerHandle) {
    if !tracker.is_null() {
        drop(Box::from_raw(tracker));
    }
}

/// Report the camera preview rectangle; a zero-sized rect clears it.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `gaze_tracker_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn gaze_tracker_set_preview(
    tracker: *mut GazeTrackerHandle,
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    mirrored: bool,
) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }

    let handle = &mut *tracker;
    let rect = Rect::new(left, top, width, height);
    handle.layout.preview = rect.has_area().then_some(rect);
    handle.layout.mirrored = mirrored;
    0
}

/// Install a calibration from CalibrationResult JSON. A NULL `json` clears it.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `gaze_tracker_new`.
/// - `json` must be a valid null-terminated C string or NULL.
/// - Returns 0 on success, -1 on error; the previous calibration is kept on error.
#[no_mangle]
pub unsafe extern "C" fn gaze_tracker_set_calibration(
    tracker: *mut GazeTrackerHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if tracker.is_null() {
        set_last_error("Null tracker pointer");
        return -1;
    }

    let handle = &mut *tracker;

    if json.is_null() {
        handle.calibration = None;
        return 0;
    }

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid calibration string pointer");
            return -1;
        }
    };

    match serde_json::from_str::<CalibrationResult>(&json_str) {
        Ok(result) if result.transform.is_finite() => {
            handle.calibration = Some(result);
            0
        }
        Ok(_) => {
            set_last_error("Calibration transform has non-finite coefficients");
            -1
        }
        Err(e) => {
            set_last_error(&format!("Invalid calibration JSON: {}", e));
            -1
        }
    }
}

/// Push one frame's sample and read back the smoothed gaze point.
///
/// Pass NaN for `x` or `y` when the frame had no tracked eye.
///
/// # Safety
/// - `tracker` must be a valid pointer returned by `gaze_tracker_new`.
/// - `out_x` and `out_y` must be valid, writable pointers.
/// - Returns 1 when a point was written, 0 when the cursor should be hidden,
///   -1 on error.
#[no_mangle]
pub unsafe extern "C" fn gaze_tracker_push(
    tracker: *mut GazeTrackerHandle,
    x: f64,
    y: f64,
    out_x: *mut f64,
    out_y: *mut f64,
) -> i32 {
    clear_last_error();

    if tracker.is_null() || out_x.is_null() || out_y.is_null() {
        set_last_error("Null pointer argument");
        return -1;
    }

    let handle = &mut *tracker;
    let sample = Some(SourceSample::new(x, y)).filter(|s| s.is_finite());

    match handle
        .tracker
        .tick(sample, handle.calibration.as_ref(), &handle.layout)
    {
        Some(point) => {
            *out_x = point.x;
            *out_y = point.y;
            1
        }
        None => 0,
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Gaze functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Gaze function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn gaze_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Gaze function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn gaze_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Gaze library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn gaze_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    /// Nine pairs from a linear eye model over a 1280×720 grid
    fn grid_pairs_json() -> CString {
        let mut pairs = Vec::new();
        for &fy in &[0.1, 0.5, 0.9] {
            for &fx in &[0.1, 0.5, 0.9] {
                let (tx, ty) = (fx * 1280.0, fy * 720.0);
                pairs.push(CalibrationPair::new(
                    0.35 + 0.3 * fx,
                    0.40 + 0.2 * fy,
                    tx,
                    ty,
                ));
            }
        }
        CString::new(serde_json::to_string(&pairs).unwrap()).unwrap()
    }

    #[test]
    fn test_ffi_fit_and_track() {
        unsafe {
            let pairs = grid_pairs_json();
            let result = gaze_fit_calibration(pairs.as_ptr(), false);
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("\"variant\":\"identity\""));

            let tracker = gaze_tracker_new(0.18, 1280.0, 720.0);
            assert!(!tracker.is_null());
            assert_eq!(gaze_tracker_set_calibration(tracker, result), 0);

            let (mut x, mut y) = (0.0, 0.0);
            assert_eq!(gaze_tracker_push(tracker, 0.5, 0.5, &mut x, &mut y), 1);
            assert!((x - 640.0).abs() < 1e-6);
            assert!((y - 360.0).abs() < 1e-6);

            // Lost frame hides the cursor
            assert_eq!(
                gaze_tracker_push(tracker, f64::NAN, 0.5, &mut x, &mut y),
                0
            );

            gaze_free_string(result);
            gaze_tracker_free(tracker);
        }
    }

    #[test]
    fn test_ffi_uncalibrated_uses_preview() {
        unsafe {
            let tracker = gaze_tracker_new(1.0, 1000.0, 800.0);
            assert_eq!(
                gaze_tracker_set_preview(tracker, 100.0, 100.0, 400.0, 300.0, true),
                0
            );

            let (mut x, mut y) = (0.0, 0.0);
            assert_eq!(gaze_tracker_push(tracker, 0.25, 0.5, &mut x, &mut y), 1);
            assert_eq!((x, y), (400.0, 250.0));

            gaze_tracker_free(tracker);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let too_few = CString::new(r#"[{"nx":0.1,"ny":0.1,"tx":1.0,"ty":1.0}]"#).unwrap();
            let result = gaze_fit_calibration(too_few.as_ptr(), false);
            assert!(result.is_null());

            let error = gaze_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let tracker = gaze_tracker_new(0.18, 1280.0, 720.0);
            let bad = CString::new("not json").unwrap();
            assert_eq!(gaze_tracker_set_calibration(tracker, bad.as_ptr()), -1);
            gaze_tracker_free(tracker);

            let (mut x, mut y) = (0.0, 0.0);
            assert_eq!(
                gaze_tracker_push(ptr::null_mut(), 0.5, 0.5, &mut x, &mut y),
                -1
            );
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = gaze_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
