//! VoiceGuard command line
//!
//! Usage:
//!   voiceguard train --config conf/train.yaml     - Train (resumes from checkpoint)
//!   voiceguard predict --config conf/train.yaml -i noisy/ -o enhanced/
//!   voiceguard scan <data_dir> <target_dir> <json_name> [--limit N]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use vg_file::{create_meta, write_split, ScanConfig};
use vg_ml::{predict, RunConfig, Solver};

#[derive(Parser)]
#[command(name = "voiceguard", about = "Adversarial perturbation removal for speaker verification audio")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the restoration model
    Train {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Ignore an existing checkpoint
        #[arg(long)]
        restart: bool,
        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Enhance a file or a directory of files
    Predict {
        /// Run configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Input audio file or directory
        #[arg(short, long)]
        input: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
        /// Use the best validation state instead of the last one
        #[arg(long)]
        best: bool,
    },
    /// Build train/test metadata from a `<subset>/<speaker>/` corpus
    Scan {
        /// Corpus root
        data_dir: PathBuf,
        /// Metadata root (`tr/` and `val/` are created inside)
        target_dir: PathBuf,
        /// Metadata name without extension, e.g. `raw`
        json_filename: String,
        /// Stop after this many files
        #[arg(short, long)]
        limit: Option<usize>,
        /// Worker threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train {
            config,
            restart,
            epochs,
        } => train(&config, restart, epochs),
        Commands::Predict {
            config,
            input,
            output,
            best,
        } => run_predict(&config, &input, &output, best),
        Commands::Scan {
            data_dir,
            target_dir,
            json_filename,
            limit,
            threads,
        } => scan(&data_dir, &target_dir, &json_filename, limit, threads),
    }
}

fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_file(path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn train(config_path: &Path, restart: bool, epochs: Option<usize>) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.solver.restart |= restart;
    if let Some(epochs) = epochs {
        config.solver.epochs = epochs;
    }
    config.validate().context("Invalid configuration")?;

    log::info!("Training for {} epochs on {}", config.solver.epochs, config.device);
    let mut solver = Solver::from_config(config).context("Failed to set up training")?;
    let history = solver.train().context("Training failed")?;

    if let Some(last) = history.last() {
        log::info!(
            "Done: {} epochs, best valid loss {}",
            history.len(),
            last.get("best_loss").map_or("n/a".to_string(), |v| format!("{:.5}", v))
        );
    }
    Ok(())
}

fn run_predict(config_path: &Path, input: &Path, output: &Path, best: bool) -> Result<()> {
    if !input.exists() {
        bail!("Input not found: {}", input.display());
    }
    let mut config = load_config(config_path)?;
    config.inference.load_best |= best;

    let written = predict(&config, input, output).context("Enhancement failed")?;
    log::info!("Wrote {} file(s) to {}", written.len(), output.display());
    Ok(())
}

fn scan(
    data_dir: &Path,
    target_dir: &Path,
    json_filename: &str,
    limit: Option<usize>,
    threads: Option<usize>,
) -> Result<()> {
    let mut scan_config = ScanConfig::default().with_limit(limit);
    if let Some(threads) = threads {
        scan_config = scan_config.with_num_threads(threads);
    }

    let split = create_meta(data_dir, &scan_config)
        .with_context(|| format!("Failed to scan {}", data_dir.display()))?;
    write_split(target_dir, json_filename, &split)
        .with_context(|| format!("Failed to write metadata to {}", target_dir.display()))?;

    log::info!(
        "Wrote {} train / {} test entries under {}",
        split.train.entries.len(),
        split.test.entries.len(),
        target_dir.display()
    );
    Ok(())
}
