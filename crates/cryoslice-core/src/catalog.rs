//! Slice catalog: per-slice identity, array locations, per-channel valid-pixel
//! coverage, and split labels. Pure data; produced by the external raster
//! slicing collaborator as a JSON record set.
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Opaque identifier for one raster slice (image + label mask, optional
/// border mask). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SliceId(String);

impl SliceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SliceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Split label of one slice. `Unassigned` until the split assigner runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    #[default]
    Unassigned,
    Train,
    Val,
    Test,
}

impl Split {
    /// The three assignable splits, in on-disk order.
    pub const ASSIGNED: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Directory name used by the on-disk split layout.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Unassigned => "unassigned",
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One catalog row: array locations plus per-channel valid-pixel fraction.
///
/// `coverage[k]` is the fraction of channel `k`'s pixels that are not
/// masked/missing, in `[0, 1]`. `group` carries the geographic grouping key
/// consumed by the grouped split strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SliceRecord {
    pub id: SliceId,
    pub img: PathBuf,
    pub mask: PathBuf,
    #[serde(default)]
    pub border: Option<PathBuf>,
    pub coverage: Vec<f64>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub split: Split,
}

/// The full slice catalog with id lookup.
#[derive(Debug, Clone, Default)]
pub struct SliceCatalog {
    records: Vec<SliceRecord>,
    index: BTreeMap<SliceId, usize>,
}

impl SliceCatalog {
    pub fn new(records: Vec<SliceRecord>) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        Self { records, index }
    }

    /// Load a catalog from a JSON array of records, rejecting duplicate ids
    /// and unrecognized keys.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let records: Vec<SliceRecord> = serde_json::from_str(&text)
            .map_err(|e| PipelineError::ConfigMismatch(format!("catalog `{}`: {e}", path.display())))?;
        let catalog = Self::new(records);
        if catalog.index.len() != catalog.records.len() {
            return Err(PipelineError::ConfigMismatch(format!(
                "catalog `{}` contains duplicate slice ids",
                path.display()
            )));
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SliceRecord] {
        &self.records
    }

    pub fn get(&self, id: &SliceId) -> Option<&SliceRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    /// Write split labels from an assignment. The split assigner is the only
    /// writer of this field; labels are overwritten, not merged.
    pub fn apply_assignment(&mut self, assignment: &BTreeMap<SliceId, Split>) {
        for record in &mut self.records {
            if let Some(&split) = assignment.get(&record.id) {
                record.split = split;
            }
        }
    }
}
