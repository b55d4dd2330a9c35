//! Slice qualification: per-channel coverage thresholds over the catalog.
use std::collections::BTreeSet;

use crate::catalog::{SliceCatalog, SliceId};
use crate::error::{PipelineError, Result};

/// Select the slices whose valid-pixel fraction meets the threshold on every
/// gated channel.
///
/// Membership is one conjunction over all `(channel, threshold)` pairs, so the
/// result is the set intersection of the per-channel keep-sets and does not
/// depend on channel order. An empty `channels` list qualifies the whole
/// catalog.
pub fn qualify(
    catalog: &SliceCatalog,
    channels: &[usize],
    thresholds: &[f64],
) -> Result<BTreeSet<SliceId>> {
    if channels.len() != thresholds.len() {
        return Err(PipelineError::ConfigMismatch(format!(
            "{} filter channels but {} thresholds",
            channels.len(),
            thresholds.len()
        )));
    }

    let mut keep = BTreeSet::new();
    for record in catalog.records() {
        let mut qualifies = true;
        for (&channel, &threshold) in channels.iter().zip(thresholds) {
            let Some(&fraction) = record.coverage.get(channel) else {
                return Err(PipelineError::ConfigMismatch(format!(
                    "filter gates channel {channel} but slice `{}` has {} coverage channels",
                    record.id,
                    record.coverage.len()
                )));
            };
            if fraction < threshold {
                qualifies = false;
                break;
            }
        }
        if qualifies {
            keep.insert(record.id.clone());
        }
    }
    Ok(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SliceRecord, Split};

    fn catalog_with_coverage(coverage: &[&[f64]]) -> SliceCatalog {
        let records = coverage
            .iter()
            .enumerate()
            .map(|(i, cov)| SliceRecord {
                id: SliceId::new(format!("slice_{}", i + 1)),
                img: format!("slice_{}_img.npy", i + 1).into(),
                mask: format!("slice_{}_mask.npy", i + 1).into(),
                border: None,
                coverage: cov.to_vec(),
                group: None,
                split: Split::Unassigned,
            })
            .collect();
        SliceCatalog::new(records)
    }

    #[test]
    fn two_channel_thresholds_intersect() {
        // slice_2 fails channel 1, slice_4 fails channel 0.
        let catalog = catalog_with_coverage(&[
            &[1.0, 1.0],
            &[0.9, 0.4],
            &[0.5, 0.5],
            &[0.2, 0.9],
        ]);
        let keep = qualify(&catalog, &[0, 1], &[0.5, 0.5]).unwrap();
        let ids: Vec<&str> = keep.iter().map(SliceId::as_str).collect();
        assert_eq!(ids, ["slice_1", "slice_3"]);
    }

    #[test]
    fn channel_order_does_not_matter() {
        let catalog = catalog_with_coverage(&[
            &[1.0, 0.3],
            &[0.4, 0.9],
            &[0.8, 0.8],
        ]);
        let forward = qualify(&catalog, &[0, 1], &[0.5, 0.5]).unwrap();
        let reversed = qualify(&catalog, &[1, 0], &[0.5, 0.5]).unwrap();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn zero_thresholds_keep_everything() {
        let catalog = catalog_with_coverage(&[&[0.0, 0.0], &[0.1, 0.9], &[1.0, 1.0]]);
        let keep = qualify(&catalog, &[0, 1], &[0.0, 0.0]).unwrap();
        assert_eq!(keep.len(), 3);
    }

    #[test]
    fn unit_thresholds_keep_only_full_coverage() {
        let catalog = catalog_with_coverage(&[&[1.0, 1.0], &[1.0, 0.999], &[0.999, 1.0]]);
        let keep = qualify(&catalog, &[0, 1], &[1.0, 1.0]).unwrap();
        let ids: Vec<&str> = keep.iter().map(SliceId::as_str).collect();
        assert_eq!(ids, ["slice_1"]);
    }

    #[test]
    fn threshold_count_mismatch_is_an_error() {
        let catalog = catalog_with_coverage(&[&[1.0, 1.0]]);
        let err = qualify(&catalog, &[0, 1], &[0.5]).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }

    #[test]
    fn out_of_range_channel_is_an_error() {
        let catalog = catalog_with_coverage(&[&[1.0]]);
        let err = qualify(&catalog, &[3], &[0.5]).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }
}
