//! Raster-slice preparation and evaluation for supervised segmentation.
//!
//! The offline pipeline qualifies catalogued slices by per-channel coverage,
//! partitions them deterministically into train/val/test, estimates
//! per-channel normalization statistics from a bounded streaming sample of
//! the train split, and applies an ordered transform pipeline to every slice.
//! The metrics side computes confusion-based segmentation scores and a
//! differentiable soft-dice loss for the external training loop.
pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod split;
pub mod stats;
pub mod transform;

pub use catalog::{SliceCatalog, SliceId, SliceRecord, Split};
pub use config::{PostprocessConfig, SplitMethodConfig};
pub use error::{PipelineError, Result};
pub use filter::qualify;
pub use layout::{reshuffle, SliceFailure, SliceLocation, SplitLayout};
pub use metrics::{batch_metrics, Activation, BatchMetrics, ConfusionCounts, DiceLoss, DiceTarget, EpochAccumulator};
pub use pipeline::PipelineReport;
pub use split::{assign_splits, SplitFractions, SplitMethod};
pub use stats::{estimate_stats, generate_stats, ChannelAccumulator, NormalizationStats, StreamingStats};
pub use transform::{postprocess, resolve_transforms, ProcessFun, Transform};
