//! End-to-end runs: train then benchmark, or benchmark a saved checkpoint.
//!
//! Order of a training run: validate the config, acquire the device, resolve
//! and apply the seed, prepare the output directory, build loaders and the
//! model, train, benchmark, then persist metrics and curves.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::benchmark::benchmark;
use crate::config::{seeded_rng, RunConfig};
use crate::data::{DataLoader, SegmentationSource, ShapeNetPartDataset, Split};
use crate::device::{acquire, ComputeDevice};
use crate::error::{Result, SegError};
use crate::model::{PointNetSeg, PointNetSegConfig};
use crate::report::{curves_path, write_curves};
use crate::training::{adam_optimizer, load_checkpoint, MetricSeries, SegTrainer, StepLr};

/// File names written next to the checkpoints.
pub const CONFIG_FILE: &str = "config.json";
pub const METRICS_FILE: &str = "metrics.json";

/// What a finished training run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub seed: u64,
    pub num_classes: usize,
    /// Mean shape mIoU over the test split.
    pub miou: f64,
    /// One checkpoint per epoch, in epoch order.
    pub checkpoints: Vec<PathBuf>,
    pub metrics: MetricSeries,
    pub metrics_path: PathBuf,
    pub curves_path: PathBuf,
}

/// Create the output directory. An existing directory is fine.
pub fn prepare_output_dir(outf: &Path) -> Result<()> {
    std::fs::create_dir_all(outf).map_err(|e| SegError::io(outf, e))
}

/// Network layout for a run.
pub fn model_config(config: &RunConfig, num_classes: usize) -> PointNetSegConfig {
    PointNetSegConfig::new(num_classes)
        .with_feature_transform(config.feature_transform)
        .with_width_divisor(config.width_divisor)
}

/// Fresh network, or the configured checkpoint loaded on top of one.
pub fn build_model<B: Backend>(
    config: &RunConfig,
    num_classes: usize,
    device: &B::Device,
) -> Result<PointNetSeg<B>> {
    let model_config = model_config(config, num_classes);
    match &config.model {
        Some(path) => load_checkpoint(&model_config, Path::new(path), device),
        None => Ok(model_config.init(device)),
    }
}

/// Open the ShapeNet-part train (augmented) and test splits for the
/// configured class.
pub fn open_shapenet(
    config: &RunConfig,
) -> Result<(Arc<dyn SegmentationSource>, Arc<dyn SegmentationSource>)> {
    let root = Path::new(&config.dataset);
    let train = ShapeNetPartDataset::open(
        root,
        &config.class_choice,
        Split::Train,
        true,
        config.npoints,
    )?;
    let test = ShapeNetPartDataset::open(
        root,
        &config.class_choice,
        Split::Test,
        false,
        config.npoints,
    )?;
    Ok((Arc::new(train), Arc::new(test)))
}

/// Train on the ShapeNet-part dataset at `config.dataset`.
pub fn train_segmentation<B: AutodiffBackend, C: ComputeDevice<B>>(
    config: &RunConfig,
    compute: &C,
) -> Result<RunReport> {
    config.validate()?;
    let (train, test) = open_shapenet(config)?;
    train_with_sources(config, train, test, compute)
}

/// Train on arbitrary sources, then benchmark on `test`.
pub fn train_with_sources<B: AutodiffBackend, C: ComputeDevice<B>>(
    config: &RunConfig,
    train: Arc<dyn SegmentationSource>,
    test: Arc<dyn SegmentationSource>,
    compute: &C,
) -> Result<RunReport> {
    config.validate()?;
    let device = acquire(compute)?;

    let num_classes = train.num_seg_classes();
    if test.num_seg_classes() != num_classes {
        return Err(SegError::Configuration(format!(
            "train split has {num_classes} part classes, test split has {}",
            test.num_seg_classes()
        )));
    }

    let seed = config.resolve_seed();
    B::seed(seed);
    let mut rng = seeded_rng(seed);

    let outf = config.outf_path();
    prepare_output_dir(&outf)?;
    let config_path = outf.join(CONFIG_FILE);
    config
        .clone()
        .with_seed(Some(seed))
        .save(&config_path)
        .map_err(|e| SegError::io(&config_path, e))?;

    tracing::info!(
        train_shapes = train.len(),
        test_shapes = test.len(),
        num_classes,
        class = %config.class_choice,
        "Datasets ready"
    );
    let train_loader = DataLoader::new(train, config.batch_size, config.workers)?;
    let test_loader = DataLoader::new(test, config.batch_size, config.workers)?;

    let model = compute.to_device(build_model::<B>(config, num_classes, &device)?);
    tracing::info!(
        params = model.num_params(),
        feature_transform = config.feature_transform,
        "Model ready"
    );

    let mut trainer = SegTrainer::new(
        model,
        adam_optimizer::<B>(),
        StepLr::new(config.lr, config.step_size, config.lr_gamma),
        num_classes,
        config.feature_transform_weight,
        device,
    );
    let checkpoints = trainer.fit(config, &train_loader, &test_loader, &mut rng)?;
    let miou = trainer.benchmark(&test_loader, &mut rng)?;
    tracing::info!("mIOU for class {}: {}", config.class_choice, miou);

    let (_, metrics) = trainer.into_parts();
    let metrics_path = outf.join(METRICS_FILE);
    metrics.save_json(&metrics_path)?;
    let curves_path = write_curves(
        &metrics,
        &config.class_choice,
        &curves_path(&outf, &config.class_choice),
    )?;

    Ok(RunReport {
        seed,
        num_classes,
        miou,
        checkpoints,
        metrics,
        metrics_path,
        curves_path,
    })
}

/// Benchmark the checkpoint at `config.model` on the test split.
pub fn benchmark_checkpoint<B: Backend, C: ComputeDevice<B>>(
    config: &RunConfig,
    test: Arc<dyn SegmentationSource>,
    compute: &C,
) -> Result<f64> {
    config.validate()?;
    if config.model.is_none() {
        return Err(SegError::Configuration(
            "benchmark needs a checkpoint (model)".into(),
        ));
    }
    let device = acquire(compute)?;
    let seed = config.resolve_seed();
    let mut rng = seeded_rng(seed);

    let num_classes = test.num_seg_classes();
    let model = compute.to_device(build_model::<B>(config, num_classes, &device)?);
    let loader = DataLoader::new(test, config.batch_size, config.workers)?;
    let miou = benchmark(&model, &loader, num_classes, &device, &mut rng)?;
    tracing::info!("mIOU for class {}: {}", config.class_choice, miou);
    Ok(miou)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataset;
    use crate::device::HostDevice;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_existing_output_dir_is_fine() {
        let tmp = tempfile::TempDir::new().unwrap();
        prepare_output_dir(tmp.path()).unwrap();
        prepare_output_dir(tmp.path()).unwrap();
        prepare_output_dir(&tmp.path().join("a/b")).unwrap();
        assert!(tmp.path().join("a/b").is_dir());
    }

    #[test]
    fn test_output_dir_under_a_file_is_io_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("file");
        std::fs::write(&file, "x").unwrap();
        let err = prepare_output_dir(&file.join("seg")).unwrap_err();
        assert!(matches!(err, SegError::Io { .. }), "got {err:?}");
    }

    #[test]
    fn test_class_count_disagreement_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = RunConfig::new("unused".into())
            .with_outf(tmp.path().to_string_lossy().into_owned())
            .with_seed(Some(1));
        let err = train_with_sources(
            &config,
            Arc::new(InMemoryDataset::synthetic(4, 8, 2, 0)),
            Arc::new(InMemoryDataset::synthetic(4, 8, 3, 0)),
            &HostDevice::<TestBackend>::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SegError::Configuration(_)), "got {err:?}");
    }

    #[test]
    fn test_invalid_config_fails_before_output_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let outf = tmp.path().join("never");
        let config = RunConfig::new("unused".into())
            .with_outf(outf.to_string_lossy().into_owned())
            .with_batch_size(0);
        let err = train_with_sources(
            &config,
            Arc::new(InMemoryDataset::synthetic(4, 8, 2, 0)),
            Arc::new(InMemoryDataset::synthetic(4, 8, 2, 0)),
            &HostDevice::<TestBackend>::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SegError::Configuration(_)));
        assert!(!outf.exists());
    }

    #[test]
    fn test_benchmark_requires_checkpoint() {
        let config = RunConfig::new("unused".into());
        let err = benchmark_checkpoint(
            &config,
            Arc::new(InMemoryDataset::synthetic(2, 8, 2, 0)),
            &HostDevice::<NdArray<f32>>::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SegError::Configuration(_)));
    }
}
