//! Segmentation training state machine.
//!
//! ```text
//! Idle(e) ─ schedule step ─▶ TrainStep(e, i) ─┬─▶ TrainStep(e, i + 1)
//!                                            └─▶ EvalStep(e, i) ─▶ TrainStep(e, i + 1)
//! last batch ─▶ Checkpointed(e) ─▶ Idle(e + 1) ... ─▶ BenchmarkDone
//! ```
//!
//! The trainer owns the model and optimizer for the whole run and mutates them
//! only from the calling thread.

use std::path::PathBuf;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;

use crate::benchmark;
use crate::config::RunConfig;
use crate::data::{DataLoader, SegBatch};
use crate::error::Result;
use crate::model::{PointNetSeg, SegOutput};
use crate::training::checkpoint::{checkpoint_path, save_checkpoint};
use crate::training::loss::{
    accuracy, correct_predictions, feature_transform_regularizer, nll_loss,
};
use crate::training::metrics::{MetricSeries, StepMetrics};
use crate::training::schedule::StepLr;

/// Where the trainer is in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainPhase {
    /// Between epochs, before the schedule step of `epoch`.
    Idle { epoch: usize },
    TrainStep { epoch: usize, batch: usize },
    /// Periodic probe on one test batch after training batch `batch`.
    EvalStep { epoch: usize, batch: usize },
    Checkpointed { epoch: usize },
    /// Terminal.
    BenchmarkDone,
}

/// Adam with β = (0.9, 0.999), the run's optimizer.
pub fn adam_optimizer<B: AutodiffBackend>() -> impl Optimizer<PointNetSeg<B>, B> {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .init()
}

/// NLL loss plus the weighted feature-transform penalty, and the number of
/// correctly classified points.
fn segmentation_loss<B: Backend>(
    output: SegOutput<B>,
    targets: Tensor<B, 1, Int>,
    num_classes: usize,
    feature_transform_weight: f64,
) -> (Tensor<B, 1>, usize) {
    let points = targets.dims()[0];
    let log_probs = output.log_probs.reshape([points, num_classes]);
    let correct = correct_predictions(log_probs.clone(), targets.clone());
    let loss = nll_loss(log_probs, targets);
    let loss = match output.trans_feat {
        Some(trans_feat) => {
            loss + feature_transform_regularizer(trans_feat).mul_scalar(feature_transform_weight)
        }
        None => loss,
    };
    (loss, correct)
}

/// Drives training, periodic evaluation, checkpointing and the benchmark.
pub struct SegTrainer<B: AutodiffBackend, O: Optimizer<PointNetSeg<B>, B>> {
    model: PointNetSeg<B>,
    optim: O,
    schedule: StepLr,
    device: B::Device,
    num_classes: usize,
    feature_transform_weight: f64,
    metrics: MetricSeries,
    phase: TrainPhase,
}

impl<B: AutodiffBackend, O: Optimizer<PointNetSeg<B>, B>> SegTrainer<B, O> {
    /// `model` must already live on `device`.
    pub fn new(
        model: PointNetSeg<B>,
        optim: O,
        schedule: StepLr,
        num_classes: usize,
        feature_transform_weight: f64,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            optim,
            schedule,
            device,
            num_classes,
            feature_transform_weight,
            metrics: MetricSeries::new(),
            phase: TrainPhase::Idle { epoch: 0 },
        }
    }

    pub fn phase(&self) -> TrainPhase {
        self.phase
    }

    pub fn metrics(&self) -> &MetricSeries {
        &self.metrics
    }

    pub fn model(&self) -> &PointNetSeg<B> {
        &self.model
    }

    pub fn into_parts(self) -> (PointNetSeg<B>, MetricSeries) {
        (self.model, self.metrics)
    }

    /// One optimizer step on `batch` at learning rate `lr`.
    ///
    /// Appends the step's loss and accuracy to the train series.
    pub fn train_step(&mut self, batch: &SegBatch<B>, lr: f64) -> StepMetrics {
        let output = self.model.forward(batch.channels_first());
        let (loss, correct) = segmentation_loss(
            output,
            batch.flat_targets(),
            self.num_classes,
            self.feature_transform_weight,
        );
        let loss_val: f64 = loss.clone().into_scalar().elem();

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(lr, self.model.clone(), grads);

        let step = StepMetrics {
            loss: loss_val,
            accuracy: accuracy(correct, batch.num_points()),
        };
        self.metrics.push_train(step);
        step
    }

    /// Loss and accuracy on `batch` in inference mode, without touching
    /// parameters. Appends to the test series.
    pub fn eval_step(&mut self, batch: &SegBatch<B::InnerBackend>) -> StepMetrics {
        let model = self.model.valid();
        let output = model.forward(batch.channels_first());
        let (loss, correct) = segmentation_loss(
            output,
            batch.flat_targets(),
            self.num_classes,
            self.feature_transform_weight,
        );
        let step = StepMetrics {
            loss: loss.into_scalar().elem(),
            accuracy: accuracy(correct, batch.num_points()),
        };
        self.metrics.push_test(step);
        step
    }

    /// Save the current weights as the checkpoint for `epoch`.
    pub fn checkpoint(&mut self, config: &RunConfig, epoch: usize) -> Result<PathBuf> {
        let path = checkpoint_path(&config.outf_path(), &config.class_choice, epoch);
        save_checkpoint(&self.model, &path)?;
        self.phase = TrainPhase::Checkpointed { epoch };
        tracing::info!(epoch, path = %path.display(), "Checkpoint saved");
        Ok(path)
    }

    /// Run every epoch: train over the full train split, probe the test split
    /// every `eval_interval` batches, checkpoint at epoch end.
    ///
    /// Returns the checkpoint paths in epoch order.
    pub fn fit(
        &mut self,
        config: &RunConfig,
        train: &DataLoader,
        test: &DataLoader,
        rng: &mut impl Rng,
    ) -> Result<Vec<PathBuf>> {
        let num_batches = train.num_batches();
        let mut checkpoints = Vec::with_capacity(config.nepoch);

        for epoch in 0..config.nepoch {
            self.phase = TrainPhase::Idle { epoch };
            let lr = self.schedule.step();
            tracing::info!(epoch, lr = %format!("{lr:.2e}"), num_batches, "Epoch start");

            for (i, samples) in train.epoch(rng)?.enumerate() {
                let batch = SegBatch::<B>::from_samples(&samples?, self.num_classes, &self.device)?;
                self.phase = TrainPhase::TrainStep { epoch, batch: i };
                let step = self.train_step(&batch, lr);
                tracing::info!(
                    epoch,
                    batch = i,
                    num_batches,
                    loss = %format!("{:.4}", step.loss),
                    accuracy = %format!("{:.4}", step.accuracy),
                    "train"
                );

                if i % config.eval_interval == 0 {
                    self.phase = TrainPhase::EvalStep { epoch, batch: i };
                    let probe = test.probe(rng)?;
                    let batch = SegBatch::<B::InnerBackend>::from_samples(
                        &probe,
                        self.num_classes,
                        &self.device,
                    )?;
                    let step = self.eval_step(&batch);
                    tracing::info!(
                        epoch,
                        batch = i,
                        num_batches,
                        loss = %format!("{:.4}", step.loss),
                        accuracy = %format!("{:.4}", step.accuracy),
                        "test"
                    );
                    self.phase = TrainPhase::TrainStep { epoch, batch: i };
                }
            }

            checkpoints.push(self.checkpoint(config, epoch)?);
        }

        tracing::info!(
            epochs = config.nepoch,
            train_steps = self.metrics.train_len(),
            eval_steps = self.metrics.test_len(),
            "Training loop finished"
        );
        Ok(checkpoints)
    }

    /// Score the current model on the full test split. Terminal.
    pub fn benchmark(&mut self, test: &DataLoader, rng: &mut impl Rng) -> Result<f64> {
        let model = self.model.valid();
        let miou = benchmark::benchmark(&model, test, self.num_classes, &self.device, rng)?;
        self.phase = TrainPhase::BenchmarkDone;
        Ok(miou)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;

    use crate::config::seeded_rng;
    use crate::data::{InMemoryDataset, SegSample};
    use crate::model::PointNetSegConfig;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn small_model(num_classes: usize, feature_transform: bool) -> PointNetSeg<TestBackend> {
        PointNetSegConfig::new(num_classes)
            .with_feature_transform(feature_transform)
            .with_width_divisor(16)
            .init(&Default::default())
    }

    fn trainer(
        model: PointNetSeg<TestBackend>,
        num_classes: usize,
    ) -> SegTrainer<TestBackend, impl Optimizer<PointNetSeg<TestBackend>, TestBackend>> {
        SegTrainer::new(
            model,
            adam_optimizer::<TestBackend>(),
            StepLr::new(1e-3, 20, 0.5),
            num_classes,
            0.001,
            Default::default(),
        )
    }

    fn samples(num_shapes: usize, npoints: usize, num_classes: usize) -> Vec<SegSample> {
        let ds = InMemoryDataset::synthetic(num_shapes, npoints, num_classes, 7);
        let loader = DataLoader::new(Arc::new(ds), num_shapes, 0).unwrap();
        loader.probe(&mut seeded_rng(0)).unwrap()
    }

    /// Inference-mode outputs on a fixed input, a fingerprint of the weights.
    fn predictions(model: &PointNetSeg<TestBackend>) -> Vec<f32> {
        let probe = Tensor::<NdArray<f32>, 3>::ones([1, 3, 4], &Default::default());
        model
            .valid()
            .forward(probe)
            .log_probs
            .into_data()
            .iter::<f32>()
            .collect()
    }

    #[test]
    fn test_train_step_updates_parameters_and_series() {
        let device = Default::default();
        let batch = SegBatch::<TestBackend>::from_samples(&samples(2, 8, 2), 2, &device).unwrap();
        let mut trainer = trainer(small_model(2, false), 2);

        let before = predictions(trainer.model());
        let step = trainer.train_step(&batch, 1e-2);
        let after = predictions(trainer.model());

        assert!(step.loss.is_finite());
        assert!((0.0..=1.0).contains(&step.accuracy));
        assert_eq!(trainer.metrics().train_len(), 1);
        assert_eq!(trainer.metrics().test_len(), 0);
        assert_ne!(before, after, "optimizer step did not change the model");
    }

    #[test]
    fn test_eval_step_leaves_parameters_untouched() {
        let device = Default::default();
        let batch =
            SegBatch::<NdArray<f32>>::from_samples(&samples(2, 8, 2), 2, &device).unwrap();
        let mut trainer = trainer(small_model(2, true), 2);

        let before = predictions(trainer.model());
        let step = trainer.eval_step(&batch);
        let after = predictions(trainer.model());

        assert!(step.loss.is_finite());
        assert!((0.0..=1.0).contains(&step.accuracy));
        assert_eq!(trainer.metrics().test_len(), 1);
        assert_eq!(trainer.metrics().train_len(), 0);
        assert_eq!(before, after);
    }

    #[test]
    fn test_feature_transform_penalty_is_added() {
        let device = Default::default();
        let batch =
            SegBatch::<NdArray<f32>>::from_samples(&samples(2, 8, 2), 2, &device).unwrap();
        let model = small_model(2, true).valid();
        let targets = batch.flat_targets();

        let output = model.forward(batch.channels_first());
        let (plain, _) = segmentation_loss(output.clone(), targets.clone(), 2, 0.0);
        let (weighted, _) = segmentation_loss(output, targets, 2, 1.0);
        let plain: f64 = plain.into_scalar().elem();
        let weighted: f64 = weighted.into_scalar().elem();
        assert!(weighted >= plain, "{weighted} < {plain}");
    }

    #[test]
    fn test_fit_phases_and_series_lengths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = RunConfig::new("unused".into())
            .with_outf(tmp.path().to_string_lossy().into_owned())
            .with_nepoch(2)
            .with_batch_size(2)
            .with_eval_interval(2)
            .with_workers(0);

        // 6 shapes, batch 2: batches 0, 1, 2 per epoch, probes after 0 and 2.
        let train = DataLoader::new(Arc::new(InMemoryDataset::synthetic(6, 8, 2, 1)), 2, 0).unwrap();
        let test = DataLoader::new(Arc::new(InMemoryDataset::synthetic(3, 8, 2, 2)), 2, 0).unwrap();
        let mut trainer = trainer(small_model(2, false), 2);
        let mut rng = seeded_rng(3);

        let checkpoints = trainer.fit(&config, &train, &test, &mut rng).unwrap();
        assert_eq!(trainer.phase(), TrainPhase::Checkpointed { epoch: 1 });
        assert_eq!(checkpoints.len(), 2);
        assert!(checkpoints.iter().all(|p| p.is_file()));
        assert_eq!(trainer.metrics().train_len(), 6);
        assert_eq!(trainer.metrics().test_len(), 4);

        let miou = trainer.benchmark(&test, &mut rng).unwrap();
        assert!((0.0..=1.0).contains(&miou));
        assert_eq!(trainer.phase(), TrainPhase::BenchmarkDone);
    }
}
