//! Offline preprocessing orchestrator: runs all stages in order.
//!
//! Qualification → split assignment → reshuffle → statistics estimation
//! (train split only) → per-slice postprocessing of every split.
use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use ndarray::{Array2, Array3};
use ndarray_npy::{read_npy, write_npy};

use crate::catalog::{SliceCatalog, SliceId, Split};
use crate::config::PostprocessConfig;
use crate::error::{PipelineError, Result};
use crate::filter::qualify;
use crate::layout::{reshuffle, SliceFailure, SliceLocation};
use crate::split::assign_splits;
use crate::stats::{generate_stats, NormalizationStats};
use crate::transform::{postprocess, resolve_transforms, Transform};

/// Outcome of one preprocessing run.
#[derive(Debug)]
pub struct PipelineReport {
    pub qualified: usize,
    pub split_counts: BTreeMap<Split, usize>,
    pub processed: usize,
    pub stats: Option<NormalizationStats>,
    pub failures: Vec<SliceFailure>,
}

/// Run the full preprocessing pipeline into `output_dir`.
///
/// Configuration, strategy, and shape errors abort; per-slice I/O failures
/// are collected in the report and the remaining slices complete.
pub fn run(
    catalog: &SliceCatalog,
    config: &PostprocessConfig,
    output_dir: &Path,
) -> Result<PipelineReport> {
    config.validate()?;

    // ── 1. Qualification ────────────────────────────────────────────────
    info!("filtering {} catalogued slices", catalog.len());
    let qualified = qualify(catalog, &config.filter_channels, &config.filter_percentages)?;
    if qualified.is_empty() {
        return Err(PipelineError::EmptySelection(
            "no slices passed the coverage filter".to_owned(),
        ));
    }

    // ── 2. Split assignment + reshuffle ─────────────────────────────────
    info!("reshuffling {} qualified slices", qualified.len());
    let method = config.split_method.resolve()?;
    let assignment = assign_splits(&qualified, catalog, &method)?;
    let (layout, mut failures) = reshuffle(catalog, &assignment, output_dir)?;

    // ── 3. Normalization statistics (train split only) ──────────────────
    let stats = match config.normalize_fun() {
        Some(normalize) => {
            info!("getting stats");
            let train_images = layout.train_images();
            if train_images.is_empty() {
                return Err(PipelineError::EmptySelection(
                    "train split is empty; cannot estimate normalization statistics".to_owned(),
                ));
            }
            Some(generate_stats(
                &train_images,
                config.normalization_sample_size,
                config.sample_seed,
                &normalize.stats_path,
            )?)
        }
        None => None,
    };

    // ── 4. Per-slice postprocessing of every split ──────────────────────
    let transforms = resolve_transforms(&config.process_funs)?;
    let mut processed = 0usize;
    let mut split_counts = BTreeMap::new();
    for (split, locations) in layout.splits() {
        split_counts.insert(split, locations.len());
        info!("postprocessing {split} ({} slices)", locations.len());
        for result in process_locations(locations, &transforms) {
            match result {
                Ok(()) => processed += 1,
                Err(PipelineError::SliceIo { id, message }) => {
                    warn!("slice `{id}` not postprocessed: {message}");
                    failures.push(SliceFailure { id: SliceId::new(id), message });
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    Ok(PipelineReport {
        qualified: qualified.len(),
        split_counts,
        processed,
        stats,
        failures,
    })
}

/// Postprocess one relocated slice in place.
fn process_one(location: &SliceLocation, transforms: &[Transform]) -> Result<()> {
    let img: Array3<f32> = read_npy(&location.img).map_err(|e| slice_io(location, &e))?;
    let mask: Array2<u8> = read_npy(&location.mask).map_err(|e| slice_io(location, &e))?;
    let (img, mask) = postprocess(img, mask, transforms)?;
    write_npy(&location.img, &img).map_err(|e| slice_io(location, &e))?;
    write_npy(&location.mask, &mask).map_err(|e| slice_io(location, &e))?;
    Ok(())
}

fn slice_io(location: &SliceLocation, error: &dyn std::fmt::Display) -> PipelineError {
    PipelineError::SliceIo {
        id: location.id.as_str().to_owned(),
        message: error.to_string(),
    }
}

// Slices share no mutable state, so the per-split pass parallelizes freely;
// output is identical either way.
#[cfg(feature = "threading")]
fn process_locations(locations: &[SliceLocation], transforms: &[Transform]) -> Vec<Result<()>> {
    use rayon::prelude::*;
    locations.par_iter().map(|l| process_one(l, transforms)).collect()
}

#[cfg(not(feature = "threading"))]
fn process_locations(locations: &[SliceLocation], transforms: &[Transform]) -> Vec<Result<()>> {
    locations.iter().map(|l| process_one(l, transforms)).collect()
}
