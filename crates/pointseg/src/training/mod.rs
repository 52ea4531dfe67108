//! Training pipeline: loss functions, the step-decay schedule, metric series,
//! checkpoints and the training state machine.

pub mod checkpoint;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod trainer;

pub use checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint};
pub use metrics::{MetricSeries, StepMetrics};
pub use schedule::StepLr;
pub use trainer::{adam_optimizer, SegTrainer, TrainPhase};
