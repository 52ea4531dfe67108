//! PointNet part segmentation on ShapeNet-part point clouds.
//!
//! Trains a PointNet segmentation network for one object category, probes a
//! test batch every few training steps, checkpoints every epoch, and finishes
//! with a mean-IoU benchmark over the full test split plus a curve report.

pub mod benchmark;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod model;
pub mod report;
pub mod run;
pub mod training;

pub use config::RunConfig;
pub use device::{ComputeDevice, HostDevice};
pub use error::{Result, SegError};
pub use model::{PointNetSeg, PointNetSegConfig};
pub use run::{benchmark_checkpoint, train_segmentation, train_with_sources, RunReport};
pub use training::{MetricSeries, SegTrainer, TrainPhase};
