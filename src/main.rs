//! Duck Scanner - command line front end
//!
//! Scans image files through the full capture/confirm pipeline, checks typed
//! numbers, manages the valid number list and dumps preprocessed crops for
//! tuning.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use duck_scanner::analysis::ValidNumberSet;
use duck_scanner::capture::{CameraFacing, ImageSequenceProvider};
use duck_scanner::config::{self, AppConfig};
use duck_scanner::scanner::{check_manual, ScanRunner};
use duck_scanner::shared::{ScanCommand, ScanUpdate};
use duck_scanner::storage::{load_valid_numbers, NumberStore};
use duck_scanner::vision::{region, ImagePreprocessor, OcrProfile, TesseractEngine, Technique};

/// Duck Scanner - reads duck numbers and checks them against the list
#[derive(Parser, Debug)]
#[command(name = "duck-scanner")]
#[command(about = "Reads 4-digit duck numbers from a camera feed or images")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Valid number list, overrides the configured path
    #[arg(short, long, global = true)]
    numbers: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan an image, or a directory of images played as a camera feed
    Scan {
        path: PathBuf,

        /// Facing reported by the image camera
        #[arg(long, default_value = "environment")]
        facing: CameraFacing,

        /// OCR profile (fast, balanced, accurate)
        #[arg(long)]
        profile: Option<OcrProfile>,

        /// Seconds to scan before stopping
        #[arg(long, default_value = "10")]
        duration: u64,
    },
    /// Check a typed number against the list
    Check { number: String },
    /// Add a 4-digit number to the list
    Add { number: String },
    /// Remove a 4-digit number from the list
    Remove { number: String },
    /// Print the stored numbers
    List,
    /// Crop and preprocess one image, writing the OCR input to disk
    Preprocess {
        input: PathBuf,
        output: PathBuf,

        /// Overrides the configured technique
        #[arg(long)]
        technique: Option<Technique>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_app_config(args.config.as_deref())?;
    let numbers_path = match &args.numbers {
        Some(path) => path.clone(),
        None => config.numbers.resolved_path()?,
    };

    match args.command {
        Command::Scan {
            path,
            facing,
            profile,
            duration,
        } => {
            let numbers = load_valid_numbers(&numbers_path, config.numbers.fallback_when_sparse);
            scan(&config, numbers, &path, facing, profile, duration).await
        }
        Command::Check { number } => {
            let numbers = load_valid_numbers(&numbers_path, config.numbers.fallback_when_sparse);
            check(&number, &numbers)
        }
        Command::Add { number } => {
            let store = NumberStore::new(numbers_path);
            let added = store.add(&number).map_err(|e| anyhow!(e.to_json()))?;
            println!("Added {}", added);
            Ok(())
        }
        Command::Remove { number } => {
            let store = NumberStore::new(numbers_path);
            let removed = store.remove(&number).map_err(|e| anyhow!(e.to_json()))?;
            println!("Removed {}", removed);
            Ok(())
        }
        Command::List => {
            let store = NumberStore::new(numbers_path);
            let numbers = store.list().map_err(|e| anyhow!(e.to_json()))?;
            if numbers.is_empty() {
                println!("No numbers stored in {:?}", store.path());
            }
            for number in numbers {
                println!("{}", number);
            }
            Ok(())
        }
        Command::Preprocess {
            input,
            output,
            technique,
        } => preprocess(&config, &input, &output, technique),
    }
}

/// Load configuration from the given file or the platform default
fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_config_path()?,
    };
    let config = config::load_or_default(&path)?;
    info!("Using configuration from {:?}", path);
    Ok(config)
}

async fn scan(
    config: &AppConfig,
    numbers: ValidNumberSet,
    path: &Path,
    facing: CameraFacing,
    profile: Option<OcrProfile>,
    duration: u64,
) -> Result<()> {
    info!("Duck Scanner starting with {} valid numbers", numbers.len());

    let provider = Arc::new(ImageSequenceProvider::new(path, facing));
    let engine = TesseractEngine::new(&config.ocr.tesseract_path, &config.ocr.language);
    let handle = ScanRunner::spawn(config, provider, Box::new(engine), Arc::new(numbers));

    // Print updates until the runner drops its subscribers
    let updates = handle.subscribe();
    let printer = std::thread::spawn(move || {
        for update in updates {
            match update {
                ScanUpdate::Feedback(message) => info!("{}", message),
                ScanUpdate::Detected(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Could not serialize detection: {}", e),
                },
                ScanUpdate::ModeChanged(mode) => info!(?mode, "Input mode changed"),
                ScanUpdate::StateChanged(_) | ScanUpdate::CameraChanged(_) => {}
            }
        }
    });

    handle.send(ScanCommand::SwitchCamera(facing)).await?;
    if let Some(profile) = profile {
        handle.send(ScanCommand::SetProfile(profile)).await?;
    }
    handle.start().await?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => {
            info!("Scan duration elapsed");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Interrupted");
        }
    }

    let status = handle.status();
    handle.shutdown().await?;
    printer
        .join()
        .map_err(|_| anyhow!("update printer thread panicked"))?;

    info!(
        cycles = status.cycles,
        detections = status.detections,
        "Duck Scanner stopped"
    );
    Ok(())
}

fn check(input: &str, numbers: &ValidNumberSet) -> Result<()> {
    match check_manual(input, numbers) {
        Ok(event) if event.is_valid => {
            println!("{} is valid", event.number);
            Ok(())
        }
        Ok(event) => bail!("{} is not in the list", event.number),
        Err(e) => bail!("{}", e.feedback()),
    }
}

fn preprocess(
    config: &AppConfig,
    input: &Path,
    output: &Path,
    technique: Option<Technique>,
) -> Result<()> {
    let frame = image::open(input)
        .with_context(|| format!("failed to open {:?}", input))?
        .to_rgba8();
    let region = region::extract(&frame, &config.frame, config.scan.zoom)?;
    info!(crop = ?region.source, "Extracted scan region");

    let technique = technique.unwrap_or(config.preprocessing.technique);
    let processed = ImagePreprocessor::new(config.preprocessing.backend).process_with_report(
        &region.image,
        &config.preprocessing.options,
        technique,
    );
    for step in &processed.degraded {
        warn!("{}", step);
    }

    processed
        .image
        .save(output)
        .with_context(|| format!("failed to write {:?}", output))?;
    println!("Wrote {:?} ({:?})", output, technique);
    Ok(())
}
