//! On-disk split layout: copy each assigned slice's arrays into a directory
//! named after its split. Pure side effect keyed off the assignment mapping;
//! the mapping itself is never altered here.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::catalog::{SliceCatalog, SliceId, SliceRecord, Split};
use crate::error::{PipelineError, Result};

/// Where one slice's arrays live after reshuffling.
#[derive(Debug, Clone)]
pub struct SliceLocation {
    pub id: SliceId,
    pub img: PathBuf,
    pub mask: PathBuf,
    pub border: Option<PathBuf>,
}

/// One slice that could not be relocated or processed, with enough identity
/// for the caller to exclude or re-fetch it.
#[derive(Debug, Clone)]
pub struct SliceFailure {
    pub id: SliceId,
    pub message: String,
}

/// Per-split slice locations under the output root.
#[derive(Debug, Clone, Default)]
pub struct SplitLayout {
    by_split: BTreeMap<Split, Vec<SliceLocation>>,
}

impl SplitLayout {
    pub fn split(&self, split: Split) -> &[SliceLocation] {
        self.by_split.get(&split).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn splits(&self) -> impl Iterator<Item = (Split, &[SliceLocation])> {
        self.by_split.iter().map(|(&s, locs)| (s, locs.as_slice()))
    }

    /// Image paths of the train split, in id order. Statistics estimation
    /// reads exactly these; val/test never contribute.
    pub fn train_images(&self) -> Vec<PathBuf> {
        self.split(Split::Train).iter().map(|l| l.img.clone()).collect()
    }

    pub fn slice_count(&self) -> usize {
        self.by_split.values().map(Vec::len).sum()
    }
}

/// Copy every assigned slice into `output_dir/<split>/`, addressable by id.
///
/// A slice whose files cannot be copied is reported in the failure list and
/// left out of the layout; the rest of the pass continues.
pub fn reshuffle(
    catalog: &SliceCatalog,
    assignment: &BTreeMap<SliceId, Split>,
    output_dir: &Path,
) -> Result<(SplitLayout, Vec<SliceFailure>)> {
    for split in Split::ASSIGNED {
        if assignment.values().any(|&s| s == split) {
            fs::create_dir_all(output_dir.join(split.dir_name()))?;
        }
    }

    let mut layout = SplitLayout::default();
    let mut failures = Vec::new();
    for (id, &split) in assignment {
        let record = catalog.get(id).ok_or_else(|| {
            PipelineError::ConfigMismatch(format!("assigned id `{id}` is not in the catalog"))
        })?;
        let dir = output_dir.join(split.dir_name());
        match copy_slice(record, id, &dir) {
            Ok(location) => layout.by_split.entry(split).or_default().push(location),
            Err(message) => {
                warn!("slice `{id}` not relocated: {message}");
                failures.push(SliceFailure { id: id.clone(), message });
            }
        }
    }
    Ok((layout, failures))
}

fn copy_slice(
    record: &SliceRecord,
    id: &SliceId,
    dir: &Path,
) -> std::result::Result<SliceLocation, String> {
    let img = dir.join(format!("{id}_img.npy"));
    let mask = dir.join(format!("{id}_mask.npy"));
    copy_one(&record.img, &img)?;
    copy_one(&record.mask, &mask)?;
    let border = match &record.border {
        Some(src) => {
            let dest = dir.join(format!("{id}_border.npy"));
            copy_one(src, &dest)?;
            Some(dest)
        }
        None => None,
    };
    Ok(SliceLocation { id: id.clone(), img, mask, border })
}

fn copy_one(src: &Path, dest: &Path) -> std::result::Result<(), String> {
    fs::copy(src, dest)
        .map(|_| ())
        .map_err(|e| format!("copy `{}` → `{}`: {e}", src.display(), dest.display()))
}
