//! Per-batch metric bundles and explicit epoch accumulation.
//!
//! The training loop owns the accumulator and threads it through each batch;
//! nothing here retains state between calls on its own.
use ndarray::ArrayView3;

use super::confusion::{pixel_acc, tp_fp_fn};
use crate::error::Result;

/// All five segmentation metrics for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchMetrics {
    pub precision: f64,
    pub recall: f64,
    pub dice: f64,
    pub iou: f64,
    pub pixel_acc: f64,
}

/// Compute the full metric bundle for one batch with a single confusion pass.
pub fn batch_metrics(
    pred: ArrayView3<'_, u8>,
    truth: ArrayView3<'_, u8>,
    label: u8,
) -> Result<BatchMetrics> {
    let counts = tp_fp_fn(pred, truth, label)?;
    Ok(BatchMetrics {
        precision: counts.precision(),
        recall: counts.recall(),
        dice: counts.dice(),
        iou: counts.iou(),
        pixel_acc: pixel_acc(pred, truth)?,
    })
}

/// Running epoch totals of per-batch metrics.
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    sum: BatchMetrics,
    batches: u64,
}

impl EpochAccumulator {
    pub fn update(&mut self, batch: &BatchMetrics) {
        self.sum.precision += batch.precision;
        self.sum.recall += batch.recall;
        self.sum.dice += batch.dice;
        self.sum.iou += batch.iou;
        self.sum.pixel_acc += batch.pixel_acc;
        self.batches += 1;
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Mean metrics over the accumulated batches; zeros before any update.
    pub fn mean(&self) -> BatchMetrics {
        if self.batches == 0 {
            return BatchMetrics::default();
        }
        let n = self.batches as f64;
        BatchMetrics {
            precision: self.sum.precision / n,
            recall: self.sum.recall / n,
            dice: self.sum.dice / n,
            iou: self.sum.iou / n,
            pixel_acc: self.sum.pixel_acc / n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    #[test]
    fn batch_metrics_bundles_all_five() {
        let mut truth = Array3::<u8>::zeros((1, 1, 2));
        truth[(0, 0, 0)] = 1;
        let pred = truth.clone();
        let m = batch_metrics(pred.view(), truth.view(), 1).unwrap();
        assert_abs_diff_eq!(m.precision, 1.0);
        assert_abs_diff_eq!(m.dice, 1.0);
        assert_abs_diff_eq!(m.pixel_acc, 1.0);
    }

    #[test]
    fn epoch_mean_averages_batches() {
        let mut acc = EpochAccumulator::default();
        acc.update(&BatchMetrics { precision: 1.0, recall: 0.5, ..Default::default() });
        acc.update(&BatchMetrics { precision: 0.0, recall: 0.5, ..Default::default() });
        assert_eq!(acc.batches(), 2);
        let mean = acc.mean();
        assert_abs_diff_eq!(mean.precision, 0.5);
        assert_abs_diff_eq!(mean.recall, 0.5);
    }

    #[test]
    fn empty_accumulator_means_zero() {
        assert_eq!(EpochAccumulator::default().mean(), BatchMetrics::default());
    }
}
