//! Differentiable soft-dice objective.
//!
//! Mirrors the confusion-metric semantics with soft products instead of
//! boolean comparisons: per-channel sums are reduced over batch and spatial
//! axes first, then each channel is finalized with the 1-minus step.
use ndarray::{Array3, Array4, ArrayView4, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Closed set of activations applied to raw scores before the soft overlap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Sigmoid,
    Softmax,
    Identity,
}

impl Activation {
    /// Apply elementwise (sigmoid/identity) or along the channel axis
    /// (softmax, with max subtraction) of `(N, C, H, W)` scores.
    pub fn apply(&self, scores: &Array4<f32>) -> Array4<f32> {
        match self {
            Activation::Sigmoid => scores.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Identity => scores.clone(),
            Activation::Softmax => {
                let mut out = scores.clone();
                for mut lane in out.lanes_mut(Axis(1)) {
                    let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                    lane.mapv_inplace(|v| (v - max).exp());
                    let sum = lane.sum();
                    if sum > 0.0 {
                        lane.mapv_inplace(|v| v / sum);
                    }
                }
                out
            }
        }
    }
}

/// Ground truth for the dice objective: either an explicit one-hot tensor
/// matching the prediction's shape, or class indices to be expanded against
/// the prediction's channel count.
#[derive(Debug, Clone)]
pub enum DiceTarget {
    OneHot(Array4<f32>),
    Indices(Array3<usize>),
}

/// Soft-dice loss: `Σ_c w_c · (1 − coeff_c)` with
/// `coeff_c = (2·intersection_c + smooth) / (Σ pred² + Σ target² + smooth)`.
///
/// `smooth` defaults to 0; `weights` defaults to a single uniform weight,
/// broadcast across channels when its length is 1.
#[derive(Debug, Clone)]
pub struct DiceLoss {
    pub activation: Activation,
    pub smooth: f64,
    pub weights: Vec<f64>,
}

impl Default for DiceLoss {
    fn default() -> Self {
        Self { activation: Activation::Sigmoid, smooth: 0.0, weights: vec![1.0] }
    }
}

impl DiceLoss {
    /// Total loss: weighted sum of the per-channel losses.
    pub fn forward(&self, scores: &Array4<f32>, target: &DiceTarget) -> Result<f64> {
        Ok(self.per_channel(scores, target)?.into_iter().sum())
    }

    /// Weighted per-channel losses `w_c · (1 − coeff_c)`.
    pub fn per_channel(&self, scores: &Array4<f32>, target: &DiceTarget) -> Result<Vec<f64>> {
        let activated = self.activation.apply(scores);
        let (_, channels, _, _) = activated.dim();

        let expanded;
        let target_view: ArrayView4<'_, f32> = match target {
            DiceTarget::OneHot(one_hot) => {
                if one_hot.dim() != activated.dim() {
                    return Err(PipelineError::ShapeMismatch {
                        pred: activated.shape().to_vec(),
                        truth: one_hot.shape().to_vec(),
                    });
                }
                one_hot.view()
            }
            DiceTarget::Indices(indices) => {
                let (n, c, h, w) = activated.dim();
                if indices.dim() != (n, h, w) {
                    return Err(PipelineError::ShapeMismatch {
                        pred: activated.shape().to_vec(),
                        truth: indices.shape().to_vec(),
                    });
                }
                expanded = expand_one_hot(indices, c)?;
                expanded.view()
            }
        };

        let weights = self.channel_weights(channels)?;
        let mut losses = Vec::with_capacity(channels);
        for channel in 0..channels {
            let pred = activated.index_axis(Axis(1), channel);
            let truth = target_view.index_axis(Axis(1), channel);

            let mut intersection = 0.0f64;
            let mut pred_sq = 0.0f64;
            let mut truth_sq = 0.0f64;
            Zip::from(&pred).and(&truth).for_each(|&p, &t| {
                let (p, t) = (f64::from(p), f64::from(t));
                intersection += p * t;
                pred_sq += p * p;
                truth_sq += t * t;
            });

            let denominator = pred_sq + truth_sq + self.smooth;
            // Empty prediction against empty target is a perfect match.
            let coefficient = if denominator == 0.0 {
                1.0
            } else {
                (2.0 * intersection + self.smooth) / denominator
            };
            losses.push(weights[channel] * (1.0 - coefficient));
        }
        Ok(losses)
    }

    fn channel_weights(&self, channels: usize) -> Result<Vec<f64>> {
        match self.weights.len() {
            1 => Ok(vec![self.weights[0]; channels]),
            n if n == channels => Ok(self.weights.clone()),
            n => Err(PipelineError::ConfigMismatch(format!(
                "{n} channel weights for {channels} channels"
            ))),
        }
    }
}

/// Expand `(N, H, W)` class indices into `(N, C, H, W)` one-hot planes.
fn expand_one_hot(indices: &Array3<usize>, channels: usize) -> Result<Array4<f32>> {
    let (n, h, w) = indices.dim();
    let mut one_hot = Array4::<f32>::zeros((n, channels, h, w));
    for ((i, row, col), &class) in indices.indexed_iter() {
        if class >= channels {
            return Err(PipelineError::ChannelMismatch {
                expected: channels,
                actual: class + 1,
            });
        }
        one_hot[(i, class, row, col)] = 1.0;
    }
    Ok(one_hot)
}
