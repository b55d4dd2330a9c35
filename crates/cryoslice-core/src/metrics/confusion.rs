//! Confusion-count segmentation metrics.
//!
//! All functions are pure: they reduce over exactly the batch and spatial
//! axes of `(batch, height, width)` label tensors and keep no state between
//! calls. Every ratio is defined as 0 when its denominator is 0, never NaN.
use ndarray::{ArrayView3, Zip};

use crate::error::{PipelineError, Result};

/// Per-label confusion counts aggregated over one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub true_pos: u64,
    pub false_pos: u64,
    pub false_neg: u64,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl ConfusionCounts {
    /// tp / (tp + fp).
    pub fn precision(&self) -> f64 {
        ratio(self.true_pos, self.true_pos + self.false_pos)
    }

    /// tp / (tp + fn).
    pub fn recall(&self) -> f64 {
        ratio(self.true_pos, self.true_pos + self.false_neg)
    }

    /// 2·tp / (2·tp + fp + fn), equivalent to F1 over the confusion counts.
    pub fn dice(&self) -> f64 {
        ratio(2 * self.true_pos, 2 * self.true_pos + self.false_pos + self.false_neg)
    }

    /// tp / (tp + fp + fn).
    pub fn iou(&self) -> f64 {
        ratio(self.true_pos, self.true_pos + self.false_pos + self.false_neg)
    }
}

fn check_shapes(pred: &ArrayView3<'_, u8>, truth: &ArrayView3<'_, u8>) -> Result<()> {
    if pred.shape() != truth.shape() {
        return Err(PipelineError::ShapeMismatch {
            pred: pred.shape().to_vec(),
            truth: truth.shape().to_vec(),
        });
    }
    Ok(())
}

/// Count tp/fp/fn for `label` over the whole batch:
/// tp = pred==label ∧ truth==label, fp = pred==label ∧ truth≠label,
/// fn = pred≠label ∧ truth==label.
pub fn tp_fp_fn(
    pred: ArrayView3<'_, u8>,
    truth: ArrayView3<'_, u8>,
    label: u8,
) -> Result<ConfusionCounts> {
    check_shapes(&pred, &truth)?;
    let mut counts = ConfusionCounts::default();
    Zip::from(&pred).and(&truth).for_each(|&p, &t| {
        match (p == label, t == label) {
            (true, true) => counts.true_pos += 1,
            (true, false) => counts.false_pos += 1,
            (false, true) => counts.false_neg += 1,
            (false, false) => {}
        }
    });
    Ok(counts)
}

pub fn precision(pred: ArrayView3<'_, u8>, truth: ArrayView3<'_, u8>, label: u8) -> Result<f64> {
    Ok(tp_fp_fn(pred, truth, label)?.precision())
}

pub fn recall(pred: ArrayView3<'_, u8>, truth: ArrayView3<'_, u8>, label: u8) -> Result<f64> {
    Ok(tp_fp_fn(pred, truth, label)?.recall())
}

pub fn dice(pred: ArrayView3<'_, u8>, truth: ArrayView3<'_, u8>, label: u8) -> Result<f64> {
    Ok(tp_fp_fn(pred, truth, label)?.dice())
}

pub fn iou(pred: ArrayView3<'_, u8>, truth: ArrayView3<'_, u8>, label: u8) -> Result<f64> {
    Ok(tp_fp_fn(pred, truth, label)?.iou())
}

/// Fraction of elements where pred == truth; 0 for an empty tensor.
pub fn pixel_acc(pred: ArrayView3<'_, u8>, truth: ArrayView3<'_, u8>) -> Result<f64> {
    check_shapes(&pred, &truth)?;
    let total = pred.len();
    if total == 0 {
        return Ok(0.0);
    }
    let mut correct = 0u64;
    Zip::from(&pred).and(&truth).for_each(|&p, &t| {
        if p == t {
            correct += 1;
        }
    });
    Ok(correct as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    #[test]
    fn perfect_prediction_scores_one_everywhere() {
        // One positive and one negative pixel, predicted exactly.
        let mut truth = Array3::<u8>::zeros((1, 1, 2));
        truth[(0, 0, 0)] = 1;
        let pred = truth.clone();

        let counts = tp_fp_fn(pred.view(), truth.view(), 1).unwrap();
        assert_abs_diff_eq!(counts.precision(), 1.0);
        assert_abs_diff_eq!(counts.recall(), 1.0);
        assert_abs_diff_eq!(counts.dice(), 1.0);
        assert_abs_diff_eq!(counts.iou(), 1.0);
        assert_abs_diff_eq!(pixel_acc(pred.view(), truth.view()).unwrap(), 1.0);
    }

    #[test]
    fn absent_label_gives_zero_not_nan() {
        // Label 1 never predicted and never present.
        let pred = Array3::<u8>::zeros((1, 2, 2));
        let truth = Array3::<u8>::zeros((1, 2, 2));

        assert_eq!(precision(pred.view(), truth.view(), 1).unwrap(), 0.0);
        assert_eq!(recall(pred.view(), truth.view(), 1).unwrap(), 0.0);
        assert_eq!(dice(pred.view(), truth.view(), 1).unwrap(), 0.0);
        assert_eq!(iou(pred.view(), truth.view(), 1).unwrap(), 0.0);
    }

    #[test]
    fn equal_nonzero_tp_and_fp_use_the_denominator_not_equality() {
        // tp == fp == 2: precision is 0.5, not the 0 an equality-based
        // zero guard would produce.
        let mut pred = Array3::<u8>::zeros((1, 1, 4));
        let mut truth = Array3::<u8>::zeros((1, 1, 4));
        pred[(0, 0, 0)] = 1;
        pred[(0, 0, 1)] = 1;
        pred[(0, 0, 2)] = 1;
        pred[(0, 0, 3)] = 1;
        truth[(0, 0, 0)] = 1;
        truth[(0, 0, 1)] = 1;

        assert_abs_diff_eq!(precision(pred.view(), truth.view(), 1).unwrap(), 0.5);
    }

    #[test]
    fn known_counts_give_known_ratios() {
        // tp=3, fp=1, fn=1 over a 1×1×6 strip.
        let mut pred = Array3::<u8>::zeros((1, 1, 6));
        let mut truth = Array3::<u8>::zeros((1, 1, 6));
        for i in 0..3 {
            pred[(0, 0, i)] = 1;
            truth[(0, 0, i)] = 1;
        }
        pred[(0, 0, 3)] = 1; // fp
        truth[(0, 0, 4)] = 1; // fn

        let counts = tp_fp_fn(pred.view(), truth.view(), 1).unwrap();
        assert_eq!(counts, ConfusionCounts { true_pos: 3, false_pos: 1, false_neg: 1 });
        assert_abs_diff_eq!(counts.precision(), 0.75);
        assert_abs_diff_eq!(counts.recall(), 0.75);
        assert_abs_diff_eq!(counts.dice(), 0.75);
        assert_abs_diff_eq!(counts.iou(), 0.6);
    }

    #[test]
    fn pixel_acc_counts_all_labels() {
        let mut pred = Array3::<u8>::zeros((1, 2, 2));
        let truth = Array3::<u8>::zeros((1, 2, 2));
        pred[(0, 0, 0)] = 2;
        assert_abs_diff_eq!(pixel_acc(pred.view(), truth.view()).unwrap(), 0.75);
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let pred = Array3::<u8>::zeros((1, 2, 2));
        let truth = Array3::<u8>::zeros((1, 2, 3));
        let err = tp_fp_fn(pred.view(), truth.view(), 1).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
    }
}
