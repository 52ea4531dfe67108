//! Mean intersection-over-union over the part classes of each test shape.
//!
//! Every class in `0..num_classes` is scored for every shape. A class that
//! appears in neither the prediction nor the ground truth of a shape has an
//! empty union and scores 1.0, so shapes that use few parts are rewarded for
//! not hallucinating the others.

use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;

use crate::data::{DataLoader, SegBatch};
use crate::error::{Result, SegError};
use crate::model::PointNetSeg;

/// IoU of one class in one shape. Empty union scores 1.0.
pub fn class_iou(pred: &[i64], target: &[i64], class: i64) -> f64 {
    let (mut intersection, mut union) = (0usize, 0usize);
    for (&p, &t) in pred.iter().zip(target) {
        let in_pred = p == class;
        let in_target = t == class;
        if in_pred && in_target {
            intersection += 1;
        }
        if in_pred || in_target {
            union += 1;
        }
    }
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Mean IoU of one shape over every class in `0..num_classes`.
pub fn shape_miou(pred: &[i64], target: &[i64], num_classes: usize) -> f64 {
    if num_classes == 0 {
        return 1.0;
    }
    let total: f64 = (0..num_classes as i64)
        .map(|class| class_iou(pred, target, class))
        .sum();
    total / num_classes as f64
}

/// Collects per-shape mIoU values over a benchmark pass.
#[derive(Debug, Clone)]
pub struct IouAccumulator {
    num_classes: usize,
    shape_ious: Vec<f64>,
}

impl IouAccumulator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            shape_ious: Vec::new(),
        }
    }

    /// Score one shape's per-point predictions against its 0-indexed targets.
    pub fn push_shape(&mut self, pred: &[i64], target: &[i64]) -> f64 {
        let iou = shape_miou(pred, target, self.num_classes);
        self.shape_ious.push(iou);
        iou
    }

    /// Score a flat batch of `points_per_shape`-sized shapes.
    pub fn push_batch(&mut self, pred: &[i64], target: &[i64], points_per_shape: usize) {
        if points_per_shape == 0 {
            return;
        }
        for (p, t) in pred
            .chunks(points_per_shape)
            .zip(target.chunks(points_per_shape))
        {
            self.push_shape(p, t);
        }
    }

    pub fn shapes(&self) -> usize {
        self.shape_ious.len()
    }

    pub fn shape_ious(&self) -> &[f64] {
        &self.shape_ious
    }

    /// Mean over scored shapes, `None` before any shape was pushed.
    pub fn mean(&self) -> Option<f64> {
        if self.shape_ious.is_empty() {
            None
        } else {
            Some(self.shape_ious.iter().sum::<f64>() / self.shape_ious.len() as f64)
        }
    }
}

/// Score `model` over one full pass of `loader` and return the mean shape mIoU.
///
/// The model should already be in inference mode (`AutodiffModule::valid`).
pub fn benchmark<B: Backend>(
    model: &PointNetSeg<B>,
    loader: &DataLoader,
    num_classes: usize,
    device: &B::Device,
    rng: &mut impl Rng,
) -> Result<f64> {
    let pb = ProgressBar::new(loader.num_batches() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) Benchmark")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut acc = IouAccumulator::new(num_classes);
    for samples in loader.epoch(rng)? {
        let batch = SegBatch::<B>::from_samples(&samples?, num_classes, device)?;
        let points_per_shape = batch.points_per_shape();
        let pred: Vec<i64> = model
            .forward(batch.channels_first())
            .log_probs
            .argmax(2)
            .into_data()
            .iter::<i64>()
            .collect();
        let target: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        acc.push_batch(&pred, &target, points_per_shape);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let miou = acc
        .mean()
        .ok_or_else(|| SegError::Data("benchmark split has no shapes".into()))?;
    tracing::info!(miou, shapes = acc.shapes(), "Benchmark finished");
    Ok(miou)
}
