pub mod accumulator;
pub mod confusion;
pub mod loss;

pub use accumulator::{batch_metrics, BatchMetrics, EpochAccumulator};
pub use confusion::{dice, iou, pixel_acc, precision, recall, tp_fp_fn, ConfusionCounts};
pub use loss::{Activation, DiceLoss, DiceTarget};
