/// Offline preprocessing tool: filters catalogued raster slices by coverage,
/// splits them deterministically, estimates normalization statistics from the
/// train split, and postprocesses every slice into the output layout.
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use cryoslice_core::{pipeline, PostprocessConfig, SliceCatalog};

#[derive(Parser, Debug)]
#[command(
    name = "preprocess",
    about = "Preprocess catalogued raster slices into train/val/test splits"
)]
struct Args {
    /// Path to the slice catalog JSON (one record per slice).
    #[arg(short = 'm', long)]
    catalog: PathBuf,

    /// Output root directory for the per-split slice layout.
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Path to the postprocess configuration JSON.
    #[arg(short = 'p', long, default_value = "conf/postprocess.json")]
    config: PathBuf,
}

#[derive(Serialize)]
struct Manifest {
    qualified: usize,
    splits: BTreeMap<String, usize>,
    processed: usize,
    failed: Vec<FailedSlice>,
}

#[derive(Serialize)]
struct FailedSlice {
    id: String,
    message: String,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let catalog = SliceCatalog::load(&args.catalog)
        .with_context(|| format!("Cannot load catalog {}", args.catalog.display()))?;
    let config = PostprocessConfig::load(&args.config)
        .with_context(|| format!("Cannot load config {}", args.config.display()))?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Cannot create {}", args.output_dir.display()))?;

    let report = pipeline::run(&catalog, &config, &args.output_dir)
        .context("Preprocessing pipeline failed")?;

    for failure in &report.failures {
        warn!("slice `{}` skipped: {}", failure.id, failure.message);
    }

    let manifest = Manifest {
        qualified: report.qualified,
        splits: report
            .split_counts
            .iter()
            .map(|(split, count)| (split.to_string(), *count))
            .collect(),
        processed: report.processed,
        failed: report
            .failures
            .iter()
            .map(|f| FailedSlice { id: f.id.to_string(), message: f.message.clone() })
            .collect(),
    };
    let manifest_path = args.output_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("Write failed: {}", manifest_path.display()))?;

    info!(
        "done — {} qualified, {} processed, {} failed",
        report.qualified,
        report.processed,
        report.failures.len()
    );
    Ok(())
}
