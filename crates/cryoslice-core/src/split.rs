//! Deterministic split assignment: qualified slice ids → train/val/test.
//!
//! Both strategies sort their inputs before the seeded shuffle, so a mapping
//! depends only on the id set, the fractions, and the seed, never on input
//! ordering or unseeded randomness.
use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::catalog::{SliceCatalog, SliceId, Split};
use crate::error::{PipelineError, Result};

/// Tolerance for the fractions-sum-to-one check.
pub const FRACTION_TOLERANCE: f64 = 1e-6;

/// Target proportion of qualified slices per split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitFractions {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl SplitFractions {
    pub fn validate(&self) -> Result<()> {
        for (name, fraction) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(PipelineError::InvalidFractions(format!(
                    "{name} fraction {fraction} is outside [0, 1]"
                )));
            }
        }
        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > FRACTION_TOLERANCE {
            return Err(PipelineError::InvalidFractions(format!(
                "fractions sum to {sum}, expected 1"
            )));
        }
        Ok(())
    }
}

/// Closed set of split strategies. Strategy names from configuration resolve
/// here via [`SplitMethod::from_name`].
#[derive(Debug, Clone)]
pub enum SplitMethod {
    /// Seeded shuffle of the sorted id list, cut by fraction counts.
    RandomById { fractions: SplitFractions, seed: u64 },
    /// Seeded shuffle of whole geographic groups; a group is never divided
    /// across splits, so co-located slices cannot leak between them.
    GroupedByGeographicKey { fractions: SplitFractions, seed: u64 },
}

pub const RANDOM_BY_ID: &str = "random-by-id";
pub const GROUPED_BY_GEOGRAPHIC_KEY: &str = "grouped-by-geographic-key";

impl SplitMethod {
    pub fn from_name(name: &str, fractions: SplitFractions, seed: u64) -> Result<Self> {
        match name {
            RANDOM_BY_ID => Ok(SplitMethod::RandomById { fractions, seed }),
            GROUPED_BY_GEOGRAPHIC_KEY => {
                Ok(SplitMethod::GroupedByGeographicKey { fractions, seed })
            }
            other => Err(PipelineError::UnknownStrategy(other.to_owned())),
        }
    }

    pub fn fractions(&self) -> &SplitFractions {
        match self {
            SplitMethod::RandomById { fractions, .. } => fractions,
            SplitMethod::GroupedByGeographicKey { fractions, .. } => fractions,
        }
    }
}

/// Per-split target counts over `n` slices. Rounded train/val targets, test
/// takes the remainder; a nonzero fraction that rounds to an empty split on a
/// nonempty input is rejected.
fn split_counts(n: usize, fractions: &SplitFractions) -> Result<(usize, usize, usize)> {
    let n_train = ((fractions.train * n as f64).round() as usize).min(n);
    let n_val = ((fractions.val * n as f64).round() as usize).min(n - n_train);
    let n_test = n - n_train - n_val;

    for (name, fraction, count) in [
        ("train", fractions.train, n_train),
        ("val", fractions.val, n_val),
        ("test", fractions.test, n_test),
    ] {
        if n > 0 && fraction > FRACTION_TOLERANCE && count == 0 {
            return Err(PipelineError::InvalidFractions(format!(
                "{name} fraction {fraction} yields an empty split over {n} slices"
            )));
        }
    }
    Ok((n_train, n_val, n_test))
}

/// Partition the qualified ids into splits.
///
/// The output maps every input id to exactly one of train/val/test; two calls
/// with the same ids, method, and seed produce identical mappings.
pub fn assign_splits(
    ids: &BTreeSet<SliceId>,
    catalog: &SliceCatalog,
    method: &SplitMethod,
) -> Result<BTreeMap<SliceId, Split>> {
    method.fractions().validate()?;
    match method {
        SplitMethod::RandomById { fractions, seed } => assign_random(ids, fractions, *seed),
        SplitMethod::GroupedByGeographicKey { fractions, seed } => {
            assign_grouped(ids, catalog, fractions, *seed)
        }
    }
}

fn assign_random(
    ids: &BTreeSet<SliceId>,
    fractions: &SplitFractions,
    seed: u64,
) -> Result<BTreeMap<SliceId, Split>> {
    // BTreeSet iteration is already sorted.
    let mut ordered: Vec<&SliceId> = ids.iter().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    ordered.shuffle(&mut rng);

    let (n_train, n_val, _) = split_counts(ordered.len(), fractions)?;
    let assignment = ordered
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            let split = if i < n_train {
                Split::Train
            } else if i < n_train + n_val {
                Split::Val
            } else {
                Split::Test
            };
            (id.clone(), split)
        })
        .collect();
    Ok(assignment)
}

fn assign_grouped(
    ids: &BTreeSet<SliceId>,
    catalog: &SliceCatalog,
    fractions: &SplitFractions,
    seed: u64,
) -> Result<BTreeMap<SliceId, Split>> {
    // Group membership from the catalog; sorted keys before the shuffle.
    let mut by_group: BTreeMap<&str, Vec<&SliceId>> = BTreeMap::new();
    for id in ids {
        let record = catalog.get(id).ok_or_else(|| {
            PipelineError::ConfigMismatch(format!("qualified id `{id}` is not in the catalog"))
        })?;
        let Some(group) = record.group.as_deref() else {
            return Err(PipelineError::ConfigMismatch(format!(
                "slice `{id}` has no geographic group key"
            )));
        };
        by_group.entry(group).or_default().push(id);
    }

    let mut groups: Vec<Vec<&SliceId>> = by_group.into_values().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    groups.shuffle(&mut rng);

    let (n_train, n_val, _) = split_counts(ids.len(), fractions)?;

    // Fill splits group by group; each group lands in one split whole.
    let mut assignment = BTreeMap::new();
    let mut assigned_train = 0usize;
    let mut assigned_val = 0usize;
    let mut assigned_test = 0usize;
    for group in groups {
        let split = if assigned_train < n_train {
            Split::Train
        } else if assigned_val < n_val {
            Split::Val
        } else {
            Split::Test
        };
        for id in group {
            assignment.insert(id.clone(), split);
            match split {
                Split::Train => assigned_train += 1,
                Split::Val => assigned_val += 1,
                _ => assigned_test += 1,
            }
        }
    }

    // Coarse group sizes can starve a split the fractions promised to fill.
    for (name, fraction, count) in [
        ("train", fractions.train, assigned_train),
        ("val", fractions.val, assigned_val),
        ("test", fractions.test, assigned_test),
    ] {
        if !ids.is_empty() && fraction > FRACTION_TOLERANCE && count == 0 {
            return Err(PipelineError::InvalidFractions(format!(
                "grouping leaves the {name} split empty (fraction {fraction})"
            )));
        }
    }
    Ok(assignment)
}
