//! Streaming per-channel normalization statistics.
//!
//! Welford's online update per pixel, combined across images with the Chan
//! et al. parallel rule: each image yields a local shard of sufficient
//! statistics, and a single associative merge folds shards into the master.
//! No locked shared accumulator, no full-population memory residency, and no
//! catastrophic cancellation at large pixel counts.
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayView3, Axis};
use ndarray_npy::{read_npy, write_npy};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Welford sufficient statistics for one channel: count, running mean, and
/// sum of squared deviations (M2).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl ChannelAccumulator {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Associative combination of two accumulators (Chan et al.).
    pub fn merge(&mut self, other: &ChannelAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = (self.count + other.count) as f64;
        let delta = other.mean - self.mean;
        self.m2 += other.m2 + delta * delta * self.count as f64 * other.count as f64 / total;
        self.mean += delta * other.count as f64 / total;
        self.count += other.count;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance (M2 / n); 0 for an empty accumulator.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Per-channel accumulators for one shard or the merged master.
#[derive(Debug, Clone)]
pub struct StreamingStats {
    channels: Vec<ChannelAccumulator>,
}

impl StreamingStats {
    pub fn new(channel_count: usize) -> Self {
        Self { channels: vec![ChannelAccumulator::default(); channel_count] }
    }

    /// Accumulate one `(C, H, W)` image in a single pass. Non-finite pixels
    /// (masked/missing) are skipped.
    pub fn from_image(img: &ArrayView3<'_, f32>) -> Self {
        let mut stats = Self::new(img.shape()[0]);
        for (channel, plane) in img.axis_iter(Axis(0)).enumerate() {
            let acc = &mut stats.channels[channel];
            for &v in plane.iter() {
                if v.is_finite() {
                    acc.push(f64::from(v));
                }
            }
        }
        stats
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn merge(&mut self, other: &StreamingStats) -> Result<()> {
        if self.channels.len() != other.channels.len() {
            return Err(PipelineError::ChannelMismatch {
                expected: self.channels.len(),
                actual: other.channels.len(),
            });
        }
        for (acc, shard) in self.channels.iter_mut().zip(&other.channels) {
            acc.merge(shard);
        }
        Ok(())
    }

    pub fn finalize(&self) -> NormalizationStats {
        NormalizationStats {
            mean: self.channels.iter().map(ChannelAccumulator::mean).collect(),
            std: self.channels.iter().map(ChannelAccumulator::std).collect(),
        }
    }
}

/// Immutable per-channel mean/std shared read-only by the postprocessor.
/// Persisted as a `(2, C)` f64 `.npy` array: row 0 mean, row 1 std.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl NormalizationStats {
    pub fn channel_count(&self) -> usize {
        self.mean.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let channels = self.channel_count();
        let mut table = Array2::<f64>::zeros((2, channels));
        for c in 0..channels {
            table[(0, c)] = self.mean[c];
            table[(1, c)] = self.std[c];
        }
        write_npy(path, &table).map_err(|e| PipelineError::StatsPersistence {
            path: path.to_owned(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let table: Array2<f64> =
            read_npy(path).map_err(|e| PipelineError::StatsPersistence {
                path: path.to_owned(),
                message: e.to_string(),
            })?;
        if table.shape()[0] != 2 {
            return Err(PipelineError::StatsPersistence {
                path: path.to_owned(),
                message: format!("expected a (2, C) array, got shape {:?}", table.shape()),
            });
        }
        Ok(Self {
            mean: table.row(0).to_vec(),
            std: table.row(1).to_vec(),
        })
    }
}

/// Seeded sample of at most `sample_size` paths. Paths are sorted before the
/// shuffle and the chosen sample is re-sorted, so the processing order is a
/// pure function of (paths, sample_size, seed).
pub fn sample_paths(paths: &[PathBuf], sample_size: usize, seed: u64) -> Vec<PathBuf> {
    let mut sorted = paths.to_vec();
    sorted.sort();
    let mut rng = StdRng::seed_from_u64(seed);
    sorted.shuffle(&mut rng);
    sorted.truncate(sample_size.min(paths.len()));
    sorted.sort();
    sorted
}

/// Estimate per-channel statistics from a bounded sample of the given images.
///
/// `sample_size` greater than the population clamps to the population; at the
/// population size the result equals the full-population statistics.
pub fn estimate_stats(
    image_paths: &[PathBuf],
    sample_size: usize,
    seed: u64,
) -> Result<NormalizationStats> {
    if image_paths.is_empty() {
        return Err(PipelineError::EmptySelection(
            "no images available for statistics estimation".to_owned(),
        ));
    }
    if sample_size == 0 {
        return Err(PipelineError::EmptySelection(
            "normalization sample size is 0".to_owned(),
        ));
    }

    let mut master: Option<StreamingStats> = None;
    for path in sample_paths(image_paths, sample_size, seed) {
        let img: Array3<f32> = read_npy(&path).map_err(|e| PipelineError::SliceIo {
            id: path.display().to_string(),
            message: e.to_string(),
        })?;
        let shard = StreamingStats::from_image(&img.view());
        match master.as_mut() {
            Some(m) => m.merge(&shard)?,
            None => master = Some(shard),
        }
    }

    // The sample is nonempty, so the master always exists here.
    master
        .map(|m| m.finalize())
        .ok_or_else(|| PipelineError::EmptySelection("statistics sample is empty".to_owned()))
}

/// Estimate and persist in one step, as the offline pipeline does.
pub fn generate_stats(
    image_paths: &[PathBuf],
    sample_size: usize,
    seed: u64,
    stats_path: &Path,
) -> Result<NormalizationStats> {
    let stats = estimate_stats(image_paths, sample_size, seed)?;
    stats.save(stats_path)?;
    Ok(stats)
}
