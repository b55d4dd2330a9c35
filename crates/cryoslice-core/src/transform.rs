//! Per-slice postprocessing: an ordered, configurable transform pipeline.
//!
//! Transforms are pure per slice, with no shared mutable state, so the caller
//! is free to process slices in any order or in parallel with identical
//! results.
use std::path::PathBuf;

use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::stats::NormalizationStats;

fn default_eps() -> f64 {
    1e-6
}

/// Keep a subset of channels, in the order given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractChannelsFun {
    pub channels: Vec<usize>,
}

/// Replace non-finite (masked/missing) pixels with a fill value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImputeMissingFun {
    #[serde(default)]
    pub fill: f32,
}

/// Clamp pixel values to `[min, max]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClipFun {
    pub min: f32,
    pub max: f32,
}

/// Subtract the per-channel mean and divide by the per-channel std from the
/// statistics artifact at `stats_path`. `eps` floors near-zero stds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeFun {
    pub stats_path: PathBuf,
    #[serde(default = "default_eps")]
    pub eps: f64,
}

/// One named transform with its parameters: configuration, not code.
/// Unrecognized names or parameters are rejected at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessFun {
    ExtractChannels(ExtractChannelsFun),
    ImputeMissing(ImputeMissingFun),
    Clip(ClipFun),
    Normalize(NormalizeFun),
}

/// A resolved transform, ready to apply: the normalize variant has its
/// statistics loaded and shares them read-only across slices.
#[derive(Debug, Clone)]
pub enum Transform {
    ExtractChannels(Vec<usize>),
    ImputeMissing(f32),
    Clip { min: f32, max: f32 },
    Normalize { stats: NormalizationStats, eps: f64 },
}

/// Resolve the configured transform list, loading statistics artifacts and
/// validating parameters.
pub fn resolve_transforms(funs: &[ProcessFun]) -> Result<Vec<Transform>> {
    funs.iter()
        .map(|fun| match fun {
            ProcessFun::ExtractChannels(f) => {
                if f.channels.is_empty() {
                    return Err(PipelineError::ConfigMismatch(
                        "extract_channels selects no channels".to_owned(),
                    ));
                }
                Ok(Transform::ExtractChannels(f.channels.clone()))
            }
            ProcessFun::ImputeMissing(f) => Ok(Transform::ImputeMissing(f.fill)),
            ProcessFun::Clip(f) => {
                if f.min > f.max {
                    return Err(PipelineError::ConfigMismatch(format!(
                        "clip min {} exceeds max {}",
                        f.min, f.max
                    )));
                }
                Ok(Transform::Clip { min: f.min, max: f.max })
            }
            ProcessFun::Normalize(f) => Ok(Transform::Normalize {
                stats: NormalizationStats::load(&f.stats_path)?,
                eps: f.eps,
            }),
        })
        .collect()
}

/// Apply the transform pipeline to one slice's `(C, H, W)` image. The label
/// mask rides along unchanged; shape and channel order are preserved except
/// where `extract_channels` narrows the channel axis.
pub fn postprocess(
    img: Array3<f32>,
    mask: Array2<u8>,
    transforms: &[Transform],
) -> Result<(Array3<f32>, Array2<u8>)> {
    let mut img = img;
    for transform in transforms {
        img = apply(img, transform)?;
    }
    Ok((img, mask))
}

fn apply(img: Array3<f32>, transform: &Transform) -> Result<Array3<f32>> {
    match transform {
        Transform::ExtractChannels(channels) => {
            let available = img.shape()[0];
            for &channel in channels {
                if channel >= available {
                    return Err(PipelineError::ConfigMismatch(format!(
                        "extract_channels selects channel {channel}, image has {available}"
                    )));
                }
            }
            Ok(img.select(Axis(0), channels))
        }
        Transform::ImputeMissing(fill) => {
            let fill = *fill;
            Ok(img.mapv_into(|v| if v.is_finite() { v } else { fill }))
        }
        Transform::Clip { min, max } => {
            let (min, max) = (*min, *max);
            Ok(img.mapv_into(|v| v.clamp(min, max)))
        }
        Transform::Normalize { stats, eps } => {
            let channels = img.shape()[0];
            if channels != stats.channel_count() {
                return Err(PipelineError::ChannelMismatch {
                    expected: stats.channel_count(),
                    actual: channels,
                });
            }
            let mut img = img;
            for (channel, mut plane) in img.axis_iter_mut(Axis(0)).enumerate() {
                let mean = stats.mean[channel];
                let denom = stats.std[channel].max(*eps);
                plane.mapv_inplace(|v| ((f64::from(v) - mean) / denom) as f32);
            }
            Ok(img)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn stats(mean: &[f64], std: &[f64]) -> NormalizationStats {
        NormalizationStats { mean: mean.to_vec(), std: std.to_vec() }
    }

    fn mask() -> Array2<u8> {
        Array2::zeros((2, 2))
    }

    #[test]
    fn normalize_maps_channel_mean_to_zero() {
        let mut img = Array3::<f32>::zeros((2, 2, 2));
        img.index_axis_mut(Axis(0), 0).fill(4.0);
        img.index_axis_mut(Axis(0), 1).fill(-1.0);
        let transforms = vec![Transform::Normalize {
            stats: stats(&[4.0, -1.0], &[2.0, 0.5]),
            eps: 1e-6,
        }];

        let (out, _) = postprocess(img, mask(), &transforms).unwrap();

        for &v in out.iter() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn normalize_scales_by_std() {
        let img = Array3::<f32>::from_elem((1, 2, 2), 7.0);
        let transforms = vec![Transform::Normalize {
            stats: stats(&[3.0], &[2.0]),
            eps: 1e-6,
        }];
        let (out, _) = postprocess(img, mask(), &transforms).unwrap();
        for &v in out.iter() {
            assert_abs_diff_eq!(v, 2.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn zero_std_is_floored_by_eps() {
        let img = Array3::<f32>::from_elem((1, 2, 2), 5.0);
        let transforms = vec![Transform::Normalize {
            stats: stats(&[3.0], &[0.0]),
            eps: 1e-3,
        }];
        let (out, _) = postprocess(img, mask(), &transforms).unwrap();
        for &v in out.iter() {
            assert!(v.is_finite());
            assert_abs_diff_eq!(v, 2000.0, epsilon = 1e-1);
        }
    }

    #[test]
    fn channel_count_must_match_statistics() {
        let img = Array3::<f32>::zeros((3, 2, 2));
        let transforms = vec![Transform::Normalize {
            stats: stats(&[0.0], &[1.0]),
            eps: 1e-6,
        }];
        let err = postprocess(img, mask(), &transforms).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ChannelMismatch { expected: 1, actual: 3 }
        ));
    }

    #[test]
    fn impute_replaces_non_finite_pixels() {
        let mut img = Array3::<f32>::from_elem((1, 2, 2), 1.0);
        img[(0, 0, 0)] = f32::NAN;
        let (out, _) = postprocess(img, mask(), &[Transform::ImputeMissing(0.0)]).unwrap();
        assert_eq!(out[(0, 0, 0)], 0.0);
        assert_eq!(out[(0, 1, 1)], 1.0);
    }

    #[test]
    fn clip_clamps_to_range() {
        let mut img = Array3::<f32>::zeros((1, 1, 3));
        img[(0, 0, 0)] = -5.0;
        img[(0, 0, 1)] = 0.5;
        img[(0, 0, 2)] = 9.0;
        let (out, _) =
            postprocess(img, mask(), &[Transform::Clip { min: 0.0, max: 1.0 }]).unwrap();
        assert_eq!(out[(0, 0, 0)], 0.0);
        assert_eq!(out[(0, 0, 1)], 0.5);
        assert_eq!(out[(0, 0, 2)], 1.0);
    }

    #[test]
    fn extract_then_normalize_composes_in_order() {
        let mut img = Array3::<f32>::zeros((3, 2, 2));
        img.index_axis_mut(Axis(0), 2).fill(10.0);
        let transforms = vec![
            Transform::ExtractChannels(vec![2]),
            Transform::Normalize { stats: stats(&[10.0], &[1.0]), eps: 1e-6 },
        ];
        let (out, _) = postprocess(img, mask(), &transforms).unwrap();
        assert_eq!(out.shape(), [1, 2, 2]);
        for &v in out.iter() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn extract_out_of_range_channel_is_an_error() {
        let img = Array3::<f32>::zeros((2, 2, 2));
        let err =
            postprocess(img, mask(), &[Transform::ExtractChannels(vec![5])]).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigMismatch(_)));
    }

    #[test]
    fn process_fun_json_round_trip() {
        let json = r#"[
            {"impute_missing": {}},
            {"clip": {"min": 0.0, "max": 1.0}},
            {"normalize": {"stats_path": "stats.npy"}}
        ]"#;
        let funs: Vec<ProcessFun> = serde_json::from_str(json).unwrap();
        assert_eq!(funs.len(), 3);
        match &funs[2] {
            ProcessFun::Normalize(n) => {
                assert_eq!(n.stats_path, PathBuf::from("stats.npy"));
                assert_abs_diff_eq!(n.eps, 1e-6, epsilon = 1e-18);
            }
            other => panic!("expected normalize, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fun_name_is_rejected() {
        let json = r#"[{"sharpen": {"amount": 2.0}}]"#;
        assert!(serde_json::from_str::<Vec<ProcessFun>>(json).is_err());
    }

    #[test]
    fn unknown_fun_parameter_is_rejected() {
        let json = r#"[{"clip": {"min": 0.0, "max": 1.0, "gamma": 2.2}}]"#;
        assert!(serde_json::from_str::<Vec<ProcessFun>>(json).is_err());
    }
}
