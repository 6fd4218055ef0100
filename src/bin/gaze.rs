//! Gaze CLI - Command-line interface for Synheart Gaze
//!
//! Commands:
//! - fit: Fit a calibration from recorded calibration pairs
//! - simulate: Synthetic calibration and fixation test on a virtual clock
//! - replay: Replay a recorded gaze feed through tracking and fixation detection
//! - config: Print the effective configuration

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

use synheart_gaze::clock::{Clock, ManualClock};
use synheart_gaze::export;
use synheart_gaze::fixation::{RunEvent, RunSummary};
use synheart_gaze::source::GazeFeedMessage;
use synheart_gaze::types::{CalibrationPair, Point, Rect, SourceSample, Trial};
use synheart_gaze::{fit_variants, GazeConfig, GazeEngine, GazeError, HeadlessPresenter};
use synheart_gaze::{GAZE_VERSION, PRODUCER_NAME};

/// Frame interval assumed for feed messages without a timestamp (ms)
const DEFAULT_FRAME_MS: u64 = 33;

/// Upper bound on simulated time per trial (ms)
const SIM_TRIAL_BUDGET_MS: u64 = 10_000;

/// Gaze - On-device gaze calibration and fixation detection
#[derive(Parser)]
#[command(name = "gaze")]
#[command(author = "Synheart AI Inc")]
#[command(version = GAZE_VERSION)]
#[command(about = "Calibrate eye-position streams and detect fixations", long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a calibration from a JSON array of calibration pairs
    Fit {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Pairs were collected against a mirrored preview
        #[arg(long)]
        mirrored: bool,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Run a synthetic calibration and fixation test
    Simulate {
        /// Mirror the virtual camera preview
        #[arg(long)]
        mirrored: bool,

        /// Uniform noise amplitude added to normalized eye coordinates
        #[arg(long, default_value = "0.002")]
        noise: f64,

        /// Random seed for noise and trial placement
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Viewport width in pixels
        #[arg(long, default_value = "1280")]
        width: f64,

        /// Viewport height in pixels
        #[arg(long, default_value = "720")]
        height: f64,

        /// CSV output path (use - for stdout; default fixations_<unix_ms>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay a recorded NDJSON gaze feed
    Replay {
        /// Feed file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Calibration result JSON produced by `gaze fit`
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Trial list JSON; random trials are generated when omitted
        #[arg(long)]
        trials: Option<PathBuf>,

        /// Random seed for trial placement
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Viewport width in pixels
        #[arg(long, default_value = "1280")]
        width: f64,

        /// Viewport height in pixels
        #[arg(long, default_value = "720")]
        height: f64,

        /// CSV output path (use - for stdout; default fixations_<unix_ms>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "synheart_gaze=debug,gaze=debug"
    } else {
        "synheart_gaze=warn,gaze=info"
    };
    tracing_subscriber::fmt()
        .compact()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn run(cli: Cli) -> Result<(), GazeCliError> {
    let config = load_config(cli.config.as_deref())?;
    debug!("{} {} starting", PRODUCER_NAME, GAZE_VERSION);

    match cli.command {
        Commands::Fit {
            input,
            mirrored,
            output,
        } => cmd_fit(&input, mirrored, &output),

        Commands::Simulate {
            mirrored,
            noise,
            seed,
            width,
            height,
            output,
        } => cmd_simulate(
            config,
            mirrored,
            noise,
            seed,
            Rect::new(0.0, 0.0, width, height),
            output.as_deref(),
        ),

        Commands::Replay {
            input,
            calibration,
            trials,
            seed,
            width,
            height,
            output,
        } => cmd_replay(
            config,
            &input,
            calibration.as_deref(),
            trials.as_deref(),
            seed,
            Rect::new(0.0, 0.0, width, height),
            output.as_deref(),
        ),

        Commands::Config { json } => cmd_config(&config, json),
    }
}

fn load_config(path: Option<&Path>) -> Result<GazeConfig, GazeCliError> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(GazeConfig::from_json(&json)?)
        }
        None => Ok(GazeConfig::default()),
    }
}

fn cmd_fit(input: &Path, mirrored: bool, output: &Path) -> Result<(), GazeCliError> {
    let data = read_input(input)?;
    let pairs: Vec<CalibrationPair> = serde_json::from_str(&data)?;
    if pairs.is_empty() {
        return Err(GazeCliError::NoSamples);
    }

    let result = fit_variants(&pairs, mirrored, chrono::Utc::now())?;
    info!(
        "Fitted {} pairs: {} (rmse {:.2} px)",
        result.pair_count,
        result.variant.as_str(),
        result.rmse
    );
    write_output(output, &serde_json::to_string_pretty(&result)?)
}

/// Linear eye model used by `simulate`: normalized source position as a
/// function of the screen point being looked at
struct SyntheticEye {
    viewport: Rect,
    mirrored: bool,
    noise: f64,
}

impl SyntheticEye {
    fn look_at<R: Rng>(&self, point: Point, rng: &mut R) -> SourceSample {
        let nx = 0.35 + 0.3 * (point.x - self.viewport.left) / self.viewport.width;
        let ny = 0.40 + 0.2 * (point.y - self.viewport.top) / self.viewport.height;
        let (dx, dy) = if self.noise > 0.0 {
            (
                rng.gen_range(-self.noise..=self.noise),
                rng.gen_range(-self.noise..=self.noise),
            )
        } else {
            (0.0, 0.0)
        };
        // The camera sees the unmirrored image
        let nx = nx + dx;
        let raw_x = if self.mirrored { 1.0 - nx } else { nx };
        SourceSample::new(raw_x, ny + dy)
    }
}

fn cmd_simulate(
    config: GazeConfig,
    mirrored: bool,
    noise: f64,
    seed: u64,
    viewport: Rect,
    output: Option<&Path>,
) -> Result<(), GazeCliError> {
    if !viewport.has_area() {
        return Err(GazeCliError::Usage("viewport must have a positive size".to_string()));
    }

    let presenter = HeadlessPresenter::new(viewport).with_mirrored(mirrored);
    let clock = ManualClock::new();
    let rng = RefCell::new(StdRng::seed_from_u64(seed));
    let eye = SyntheticEye {
        viewport,
        mirrored,
        noise: noise.abs(),
    };

    let mut engine = GazeEngine::new(config)?;
    eprintln!("{}", engine.status_text());

    let targets = engine.calibration_targets(&presenter);
    let source = || {
        let index = presenter.active_target()?;
        let center = targets.get(index)?.center();
        Some(eye.look_at(center, &mut *rng.borrow_mut()))
    };

    // Frames keep flowing while the calibration advances on the same loop
    engine.start_calibration(&presenter, clock.now());
    while engine.is_calibrating() {
        engine.calibration_tick(clock.now(), clock.wall_now(), &source, &presenter)?;
        engine.frame_tick(source(), &presenter);
        clock.advance_ms(DEFAULT_FRAME_MS);
    }
    eprintln!("{}", engine.status_text());

    engine.start_random_trials(&viewport, &mut *rng.borrow_mut(), clock.wall_now());
    let trial_count = engine.active_run().map_or(0, |r| r.trials().len()) as u64;
    let tick = engine.config().fixation_tick();
    let budget_ms = trial_count.max(1) * SIM_TRIAL_BUDGET_MS;
    let tick_ms = engine.config().fixation_tick_ms;

    let mut looking_at = viewport.center();
    let mut elapsed_ms = 0;
    while elapsed_ms <= budget_ms {
        if let Some(center) = engine
            .active_run()
            .and_then(|r| r.current_trial())
            .map(|t| t.bounding_box.center())
        {
            looking_at = center;
        }

        let sample = eye.look_at(looking_at, &mut *rng.borrow_mut());
        engine.frame_tick(Some(sample), &presenter);
        if engine.fixation_tick(clock.now(), clock.wall_now()) == RunEvent::Finished {
            break;
        }

        clock.advance(tick);
        elapsed_ms += tick_ms;
    }

    finish_run(&mut engine, &clock, output)
}

fn cmd_replay(
    config: GazeConfig,
    input: &Path,
    calibration: Option<&Path>,
    trials: Option<&Path>,
    seed: u64,
    viewport: Rect,
    output: Option<&Path>,
) -> Result<(), GazeCliError> {
    let data = read_input(input)?;
    let messages = GazeFeedMessage::parse_ndjson(&data)?;
    if messages.is_empty() {
        return Err(GazeCliError::NoSamples);
    }

    let presenter = HeadlessPresenter::new(viewport);
    let clock = ManualClock::new();
    let mut engine = GazeEngine::new(config)?;

    if let Some(path) = calibration {
        engine.load_calibration(&fs::read_to_string(path)?)?;
    }
    eprintln!("{}", engine.status_text());

    match trials {
        Some(path) => {
            let trials: Vec<Trial> = serde_json::from_str(&fs::read_to_string(path)?)?;
            engine.start_trials(trials, clock.wall_now());
        }
        None => {
            let mut rng = StdRng::seed_from_u64(seed);
            engine.start_random_trials(&viewport, &mut rng, clock.wall_now());
        }
    }

    let threshold = engine.config().confidence_threshold;
    let tick_ms = engine.config().fixation_tick_ms;
    let origin = messages.first().and_then(|m| m.t_ms).unwrap_or(0);

    let mut elapsed_ms = 0u64;
    let mut next_tick_ms = 0u64;
    for message in &messages {
        let t = message
            .t_ms
            .map(|t| t.saturating_sub(origin))
            .unwrap_or(elapsed_ms + DEFAULT_FRAME_MS)
            .max(elapsed_ms);

        // Fixation ticks that fall due before this frame see the previous gaze
        while next_tick_ms <= t {
            clock.advance_ms(next_tick_ms - elapsed_ms);
            elapsed_ms = next_tick_ms;
            engine.fixation_tick(clock.now(), clock.wall_now());
            next_tick_ms += tick_ms;
        }

        clock.advance_ms(t - elapsed_ms);
        elapsed_ms = t;
        engine.frame_tick(message.to_sample(threshold), &presenter);
    }
    info!(
        "Replayed {} messages over {} ms",
        messages.len(),
        elapsed_ms
    );

    finish_run(&mut engine, &clock, output)
}

/// Stop the active run, report it and write the CSV export
fn finish_run(
    engine: &mut GazeEngine,
    clock: &ManualClock,
    output: Option<&Path>,
) -> Result<(), GazeCliError> {
    if let Some(run) = engine.active_run() {
        eprintln!("{}", run.status_text());
    }
    let summary: RunSummary = engine
        .stop_trials(clock.wall_now())
        .ok_or(GazeCliError::NoRun)?;
    info!(
        "Run {}: {}/{} fixations recorded",
        summary.run_id,
        summary.records.len(),
        summary.trial_count
    );

    let csv = export::to_csv(&summary.records);
    match output {
        Some(path) if path.to_string_lossy() == "-" => {
            print!("{}", csv);
            Ok(())
        }
        _ if summary.records.is_empty() => {
            eprintln!("No fixations recorded, nothing to export");
            Ok(())
        }
        Some(path) => write_output(path, &csv),
        None => {
            let path = PathBuf::from(export::file_name(clock.wall_now()));
            write_output(&path, &csv)?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn cmd_config(config: &GazeConfig, json: bool) -> Result<(), GazeCliError> {
    if json {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    println!("Gaze Configuration");
    println!("==================");
    println!("Producer: {}", PRODUCER_NAME);
    println!("Version:  {}", GAZE_VERSION);
    println!();

    if let serde_json::Value::Object(fields) = serde_json::to_value(config)? {
        for (key, value) in fields {
            println!("  {:<28} {}", key, value);
        }
    }
    Ok(())
}

fn read_input(input: &Path) -> Result<String, GazeCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(GazeCliError::NoInput);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), GazeCliError> {
    if output.to_string_lossy() == "-" {
        println!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum GazeCliError {
    Io(io::Error),
    Gaze(GazeError),
    Json(serde_json::Error),
    NoInput,
    NoSamples,
    NoRun,
    Usage(String),
}

impl From<io::Error> for GazeCliError {
    fn from(e: io::Error) -> Self {
        GazeCliError::Io(e)
    }
}

impl From<GazeError> for GazeCliError {
    fn from(e: GazeError) -> Self {
        GazeCliError::Gaze(e)
    }
}

impl From<serde_json::Error> for GazeCliError {
    fn from(e: serde_json::Error) -> Self {
        GazeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GazeCliError> for CliError {
    fn from(e: GazeCliError) -> Self {
        match e {
            GazeCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GazeCliError::Gaze(e) if e.is_calibration_failure() => CliError {
                code: "CALIBRATION_FAILED".to_string(),
                message: e.to_string(),
                hint: Some("Keep the eye tracked while each target is shown".to_string()),
            },
            GazeCliError::Gaze(GazeError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run 'gaze config --json' to see valid fields".to_string()),
            },
            GazeCliError::Gaze(e) => CliError {
                code: "GAZE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check input format".to_string()),
            },
            GazeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GazeCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal, expected piped input".to_string(),
                hint: Some("Pipe data in or pass --input <file>".to_string()),
            },
            GazeCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            GazeCliError::NoRun => CliError {
                code: "NO_RUN".to_string(),
                message: "No fixation run was active".to_string(),
                hint: None,
            },
            GazeCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'gaze --help' for usage".to_string()),
            },
        }
    }
}
