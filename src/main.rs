use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::{DynamicImage, ImageReader};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use eyecursor::calibration::record;
use eyecursor::detection::tuning::sweep_threshold;
use eyecursor::{AppConfig, GazeModel, InterpolationKind, Prediction};

#[derive(Parser)]
#[command(name = "eyecursor")]
#[command(about = "Estimate on-screen gaze from eye images")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Locate the pupils in one image
    Detect(DetectArgs),
    /// Map a sequence of frames to smoothed screen positions
    Predict(PredictArgs),
    /// Fit gaze models against the stored calibration and report the fit
    Fit(FitArgs),
    /// Pick the threshold level that finds both pupils most often
    Tune(TuneArgs),
}

#[derive(Args)]
struct DetectArgs {
    #[arg(value_name = "IMAGE")]
    image_path: PathBuf,

    /// Save intermediate pupil images to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,
}

#[derive(Args)]
struct PredictArgs {
    /// Frames, processed in order
    #[arg(value_name = "IMAGE", required = true)]
    frames: Vec<PathBuf>,

    /// Gaze model, overriding the configured one
    #[arg(long)]
    model: Option<InterpolationKind>,
}

#[derive(Args)]
struct FitArgs {
    /// Only this model instead of all of them
    #[arg(long)]
    model: Option<InterpolationKind>,
}

#[derive(Args)]
struct TuneArgs {
    #[arg(value_name = "IMAGE", required = true)]
    frames: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Detect(args) => detect(&config, args),
        Command::Predict(args) => predict(&config, args),
        Command::Fit(args) => fit(&config, args),
        Command::Tune(args) => tune(&config, args),
    }
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .decode()
        .with_context(|| format!("Failed to decode image {}", path.display()))
}

fn detect(config: &AppConfig, args: DetectArgs) -> Result<()> {
    let mut detector = config.build_detector()?;
    if let Some(dir) = args.debug_out {
        detector = detector.with_debug(dir)?;
    }

    let img = load_image(&args.image_path)?;
    let detection = detector.detect_gray(&img.to_luma8());

    println!("=== Pupil Detection ===");
    println!("Strategy: {:?}", detector.config().strategy);
    if let Some(face) = detection.face {
        println!("Face: ({:.0}, {:.0}) {:.0}x{:.0}", face.x, face.y, face.width, face.height);
    }
    println!("Pupils found: {} ({} from blobs)", detection.points.len(), detection.blob_hits);
    println!("{}", serde_json::to_string_pretty(&detection.eyes())?);
    Ok(())
}

fn load_model(config: &AppConfig, kind: InterpolationKind) -> Result<GazeModel> {
    let stored = record::load_or_uncalibrated(&config.calibration.file)
        .with_context(|| format!("Not calibrated: no usable {}", config.calibration.file.display()))?;
    Ok(GazeModel::fitted(kind, &stored.record)?)
}

fn predict(config: &AppConfig, args: PredictArgs) -> Result<()> {
    let detector = config.build_detector()?;
    let model = load_model(config, args.model.unwrap_or(config.tracking.model))?;
    let mut tracker = config.tracker();

    for path in &args.frames {
        let eyes = detector.detect(&load_image(path)?);
        let target = tracker.compute_target(&eyes, Some(&model));
        let status = if tracker.skip_movement() { "hold" } else { "move" };
        println!("{}\t{:.1}\t{:.1}\t{}", path.display(), target.x, target.y, status);
    }
    Ok(())
}

fn fit(config: &AppConfig, args: FitArgs) -> Result<()> {
    let stored = record::load(&config.calibration.file)
        .with_context(|| format!("Failed to load {}", config.calibration.file.display()))?;
    let rec = &stored.record;
    println!("Calibration {} ({})", stored.session_id, stored.created_at);
    println!("Targets: {}, usable samples: {}", rec.len(), rec.training_rows().len());

    let kinds: Vec<InterpolationKind> = match args.model {
        Some(kind) => vec![kind],
        None => InterpolationKind::ALL.to_vec(),
    };

    for kind in kinds {
        let model = match GazeModel::fitted(kind, rec) {
            Ok(model) => model,
            Err(e) => {
                println!("{kind:>9}: fit failed: {e}");
                continue;
            }
        };

        let mut errors = Vec::new();
        let mut directions = 0;
        for sample in &rec.samples {
            match model.predict(&sample.eyes) {
                Ok(Prediction::Position(p)) => {
                    let t = sample.target.screen_point;
                    errors.push(((p.x - t.x).powi(2) + (p.y - t.y).powi(2)).sqrt());
                }
                Ok(Prediction::Direction(intent)) if !intent.is_still() => directions += 1,
                _ => {}
            }
        }

        if errors.is_empty() {
            println!("{kind:>9}: {directions} of {} samples signal a direction", rec.len());
        } else {
            let mean = errors.iter().sum::<f64>() / errors.len() as f64;
            let max = errors.iter().copied().fold(0.0, f64::max);
            println!("{kind:>9}: mean error {mean:.2}px, max {max:.2}px");
        }
    }
    Ok(())
}

fn tune(config: &AppConfig, args: TuneArgs) -> Result<()> {
    let detector = config.build_detector()?;
    let frames = args
        .frames
        .iter()
        .map(|p| load_image(p).map(|img| img.to_luma8()))
        .collect::<Result<Vec<_>>>()?;

    match sweep_threshold(&detector, &frames, 0..=eyecursor::detection::MAX_THRESHOLD_LEVEL) {
        Some(sweep) => {
            for (level, score) in &sweep.scores {
                println!("level {level:>2}: {score}/{}", frames.len());
            }
            println!("Best threshold level: {}", sweep.best_level);
        }
        None => println!("No frame with two eyes; cannot tune threshold."),
    }
    Ok(())
}
