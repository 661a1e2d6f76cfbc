//! CardScan - trading card photo analysis from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cardscan::capture;
use cardscan::config::{self, AppConfig};
use cardscan::fingerprint::{DuplicateMatcher, FingerprintEngine};
use cardscan::storage::{self, JsonFileStore};
use cardscan::vision::MultiCardLocator;
use cardscan::ScanPipeline;

/// CardScan - trading card photo analysis
#[derive(Parser, Debug)]
#[command(name = "cardscan")]
#[command(about = "Detect, fingerprint and describe trading cards in photos")]
struct Args {
    /// Configuration file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether a card is visible, where, and how usable the shot is
    Probe {
        image: PathBuf,
    },
    /// Analyze a photo and add it to the fingerprint corpus
    Commit {
        image: PathBuf,
        /// Corpus file (defaults to fingerprints.json in the data dir)
        #[arg(short, long)]
        store: Option<PathBuf>,
    },
    /// Crop every card in a flat-lay photo
    Locate {
        image: PathBuf,
        /// Directory the crops are written to
        #[arg(short, long, default_value = "crops")]
        out: PathBuf,
    },
    /// Print the encoded fingerprint of a photo
    Fingerprint {
        image: PathBuf,
    },
    /// Combined fingerprint distance between two photos
    Compare {
        first: PathBuf,
        second: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_or_default_config(args.config.as_deref())?;

    match args.command {
        Command::Probe { image } => {
            let pipeline = ScanPipeline::new(&config, storage::get_data_dir().ok())?;
            let response = pipeline.probe(&read(&image)?)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Commit { image, store } => {
            let store_path = match store {
                Some(path) => path,
                None => storage::get_data_dir()?.join("fingerprints.json"),
            };
            let store = JsonFileStore::open(&store_path)
                .with_context(|| format!("Failed to open fingerprint store {:?}", store_path))?;
            let pipeline = ScanPipeline::new(&config, storage::get_data_dir().ok())?;
            let outcome = pipeline.commit(&read(&image)?, &store)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            info!("Corpus {:?} holds {} record(s)", store.path(), store.len());
        }
        Command::Locate { image, out } => {
            let frame = capture::decode_file(&image).with_context(|| format!("Failed to decode {:?}", image))?;
            let crops = MultiCardLocator::new(config.multi_card.clone()).locate(&frame);
            std::fs::create_dir_all(&out)?;
            for (i, crop) in crops.iter().enumerate() {
                let path = out.join(format!("card_{:02}.png", i + 1));
                crop.image
                    .save(&path)
                    .with_context(|| format!("Failed to write {:?}", path))?;
                println!("{}\t{:?}", path.display(), crop.normalized);
            }
            info!("Wrote {} crop(s) to {:?}", crops.len(), out);
        }
        Command::Fingerprint { image } => {
            let frame = capture::decode_file(&image).with_context(|| format!("Failed to decode {:?}", image))?;
            let fingerprint = FingerprintEngine::new(config.fingerprint.clone()).compute(&frame.rgb);
            println!("{}", serde_json::to_string_pretty(&fingerprint.encode()?)?);
        }
        Command::Compare { first, second } => {
            let engine = FingerprintEngine::new(config.fingerprint.clone());
            let a = engine.compute(&capture::decode_file(&first)?.rgb);
            let b = engine.compute(&capture::decode_file(&second)?.rgb);
            let matcher = DuplicateMatcher::new(config.duplicate.clone());
            let distance = matcher.distance(&a, &b);
            println!(
                "distance {} (threshold {}): {}",
                distance,
                matcher.threshold(),
                if distance <= matcher.threshold() { "duplicate" } else { "distinct" }
            );
        }
    }

    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

/// Explicit config file, else the one in the config dir, else defaults
fn load_or_default_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path).with_context(|| format!("Failed to load config {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }
    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return Ok(config);
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}
