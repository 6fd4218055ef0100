//! End-to-end scenarios through the public engine API

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;

use synheart_gaze::clock::{CancelToken, Clock, ManualClock};
use synheart_gaze::fixation::RunEvent;
use synheart_gaze::types::{CalibrationStatus, Point, Rect, SourceSample, Trial, VariantLabel};
use synheart_gaze::{
    CalibrationProgress, GazeConfig, GazeEngine, GazeError, HeadlessPresenter, SampleSlot,
};

const WIDTH: f64 = 1280.0;
const HEIGHT: f64 = 720.0;

fn viewport() -> Rect {
    Rect::new(0.0, 0.0, WIDTH, HEIGHT)
}

/// Linear eye model with optional horizontal inversion and uniform noise
fn eye(point: Point, invert_x: bool, noise: f64, rng: &mut StdRng) -> SourceSample {
    let mut nx = 0.35 + 0.3 * point.x / WIDTH;
    let mut ny = 0.40 + 0.2 * point.y / HEIGHT;
    if noise > 0.0 {
        nx += rng.gen_range(-noise..=noise);
        ny += rng.gen_range(-noise..=noise);
    }
    if invert_x {
        nx = 1.0 - nx;
    }
    SourceSample::new(nx, ny)
}

fn calibrate(
    engine: &mut GazeEngine,
    presenter: &HeadlessPresenter,
    invert_x: bool,
    noise: f64,
) -> Result<(VariantLabel, f64), GazeError> {
    let clock = ManualClock::new();
    let rng = RefCell::new(StdRng::seed_from_u64(11));
    let targets = engine.calibration_targets(presenter);
    let source = || {
        let index = presenter.active_target()?;
        Some(eye(
            targets[index].center(),
            invert_x,
            noise,
            &mut rng.borrow_mut(),
        ))
    };
    let result = engine.calibrate(&source, presenter, &clock, &CancelToken::new())?;
    Ok((result.variant, result.rmse))
}

#[test]
fn noisy_unmirrored_calibration_picks_identity() {
    let mut engine = GazeEngine::new(GazeConfig::default()).unwrap();
    let presenter = HeadlessPresenter::new(viewport());

    let (variant, rmse) = calibrate(&mut engine, &presenter, false, 0.002).unwrap();

    assert_eq!(variant, VariantLabel::Identity);
    assert!(rmse < 5.0, "rmse = {}", rmse);
    assert!(matches!(
        engine.status(),
        CalibrationStatus::Calibrated {
            variant: VariantLabel::Identity,
            ..
        }
    ));
}

#[test]
fn inverted_source_picks_flip() {
    let mut engine = GazeEngine::new(GazeConfig::default()).unwrap();
    let presenter = HeadlessPresenter::new(viewport());

    let (variant, rmse) = calibrate(&mut engine, &presenter, true, 0.002).unwrap();

    assert_eq!(variant, VariantLabel::FlipX);
    assert!(rmse < 5.0, "rmse = {}", rmse);

    // Looking right must move the cursor right
    let mut rng = StdRng::seed_from_u64(3);
    let p = engine
        .frame_tick(
            Some(eye(Point::new(1100.0, 360.0), true, 0.0, &mut rng)),
            &presenter,
        )
        .unwrap();
    assert!(p.distance_to(Point::new(1100.0, 360.0)) < 5.0, "{:?}", p);
}

#[test]
fn mirrored_preview_maps_back_to_screen() {
    let mut engine = GazeEngine::new(GazeConfig::default()).unwrap();
    let presenter = HeadlessPresenter::new(viewport())
        .with_preview(Rect::new(0.0, 0.0, WIDTH, HEIGHT))
        .with_mirrored(true);

    // The camera sees the unmirrored eye, so raw x runs against screen x
    let (variant, _) = calibrate(&mut engine, &presenter, true, 0.0).unwrap();
    assert_eq!(variant, VariantLabel::Identity);

    let mut rng = StdRng::seed_from_u64(3);
    let target = Point::new(200.0, 600.0);
    let p = engine
        .frame_tick(Some(eye(target, true, 0.0, &mut rng)), &presenter)
        .unwrap();
    assert!(p.distance_to(target) < 1e-6);
}

#[test]
fn frames_are_processed_while_calibrating() {
    let config = GazeConfig {
        calibration_window_ms: 70,
        calibration_poll_ms: 10,
        calibration_settle_ms: 20,
        ..GazeConfig::default()
    };
    let mut engine = GazeEngine::new(config).unwrap();
    let presenter = HeadlessPresenter::new(viewport());
    let clock = ManualClock::new();
    let mut rng = StdRng::seed_from_u64(7);
    let targets = engine.calibration_targets(&presenter);
    let slot = SampleSlot::new();

    engine.start_calibration(&presenter, clock.now());
    let mut frames = 0;
    let mut progress = CalibrationProgress::Running;
    while progress == CalibrationProgress::Running {
        let looking_at = presenter
            .active_target()
            .map_or(viewport().center(), |i| targets[i].center());
        let sample = eye(looking_at, false, 0.001, &mut rng);
        slot.publish(Some(sample));
        if engine.frame_tick(Some(sample), &presenter).is_some() {
            frames += 1;
        }
        progress = engine
            .calibration_tick(clock.now(), clock.wall_now(), &slot, &presenter)
            .unwrap();
        clock.advance_ms(5);
    }

    // 9 x (70 + 20) ms of 5 ms frames
    assert!(frames >= 150, "{} frames", frames);
    assert!(engine.smoothed().is_some());
    assert_eq!(progress, CalibrationProgress::Installed);
    assert_eq!(engine.calibration().unwrap().pair_count, 9);
}

#[test]
fn lost_tracking_fails_without_replacing_mapping() {
    let mut engine = GazeEngine::new(GazeConfig::default()).unwrap();
    let presenter = HeadlessPresenter::new(viewport());
    let lost = || None;

    let err = engine
        .calibrate(&lost, &presenter, &ManualClock::new(), &CancelToken::new())
        .unwrap_err();

    assert!(err.is_calibration_failure());
    assert!(err.to_string().contains("not enough samples"));
    assert!(engine.calibration().is_none());
    assert_eq!(engine.status_text(), "Status: calibration failed");
}

#[test]
fn fixation_test_records_every_trial() {
    let mut engine = GazeEngine::new(GazeConfig::default()).unwrap();
    let presenter = HeadlessPresenter::new(viewport());
    calibrate(&mut engine, &presenter, false, 0.0).unwrap();

    let clock = ManualClock::new();
    let mut rng = StdRng::seed_from_u64(5);
    engine.start_random_trials(&viewport(), &mut rng, clock.wall_now());
    assert_eq!(engine.active_run().unwrap().trials().len(), 8);

    let mut looking_at = viewport().center();
    let mut finished = false;
    for _ in 0..2000 {
        if let Some(center) = engine
            .active_run()
            .and_then(|r| r.current_trial())
            .map(|t| t.bounding_box.center())
        {
            looking_at = center;
        }
        engine.frame_tick(Some(eye(looking_at, false, 0.0, &mut rng)), &presenter);
        if engine.fixation_tick(clock.now(), clock.wall_now()) == RunEvent::Finished {
            finished = true;
            break;
        }
        clock.advance_ms(50);
    }

    assert!(finished);
    let records = engine.records().to_vec();
    assert_eq!(records.len(), 8);
    for (i, r) in records.iter().enumerate() {
        assert_eq!(r.trial_id, i as u32 + 1);
        assert!(r.duration_ms >= 350 && r.duration_ms < 450, "{}", r.duration_ms);
    }
    assert_eq!(
        engine.active_run().unwrap().status_text(),
        "Test finished \u{2014} 8 fixations recorded"
    );

    let csv = engine.export_csv();
    assert_eq!(csv.lines().count(), 9);
    assert!(csv.lines().nth(1).unwrap().starts_with("1,"));
}

#[test]
fn glance_shorter_than_threshold_is_not_a_fixation() {
    let config = GazeConfig {
        smoothing_alpha: 1.0,
        ..GazeConfig::default()
    };
    let mut engine = GazeEngine::new(config).unwrap();
    let presenter = HeadlessPresenter::new(viewport());
    let clock = ManualClock::new();
    engine.start_trials(
        vec![Trial {
            id: 1,
            bounding_box: Rect::new(595.0, 315.0, 90.0, 90.0),
        }],
        clock.wall_now(),
    );

    // Uncalibrated viewport projection: (0.5, 0.5) is the screen centre
    let on_target = SourceSample::new(0.5, 0.5);
    let off_target = SourceSample::new(0.05, 0.05);

    // On target for ticks at 0..=300 ms, then away
    for step in 0..20 {
        let sample = if step < 7 { on_target } else { off_target };
        engine.frame_tick(Some(sample), &presenter);
        engine.fixation_tick(clock.now(), clock.wall_now());
        clock.advance_ms(50);
    }

    assert!(engine.records().is_empty());
    let summary = engine.stop_trials(clock.wall_now()).unwrap();
    assert!(summary.stopped_early);
    assert_eq!(engine.export_csv(), "trial,start_ISO,end_ISO,duration_ms\n");
}
