//! Subcommand implementations: train, benchmark and plot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;

use pointseg::data::{SegmentationSource, ShapeNetPartDataset, Split};
use pointseg::report::write_curves;
use pointseg::run::{benchmark_checkpoint, train_segmentation, RunReport};
use pointseg::{HostDevice, MetricSeries, RunConfig, SegError};

use crate::config::{build_run_config, load_run_toml, RunOverrides};
use crate::device::DeviceKind;

type CpuBackend = NdArray<f32>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Dataset root in ShapeNet-part layout.
    pub dataset: String,
    /// Optional run TOML file.
    pub config: Option<PathBuf>,
    /// CLI flag overrides (highest priority).
    pub overrides: RunOverrides,
    pub device: DeviceKind,
}

/// Arguments for the `benchmark` subcommand.
#[derive(Debug)]
pub struct BenchmarkArgs {
    pub dataset: String,
    /// Checkpoint to score.
    pub model: PathBuf,
    pub overrides: RunOverrides,
    pub device: DeviceKind,
}

/// Arguments for the `plot` subcommand.
#[derive(Debug)]
pub struct PlotArgs {
    /// `metrics.json` written by a training run.
    pub metrics: PathBuf,
    /// Output SVG. Defaults to `curves.svg` next to the metrics file.
    pub output: Option<PathBuf>,
    /// Figure title.
    pub title: String,
}

#[cfg(not(feature = "wgpu"))]
fn gpu_unavailable() -> anyhow::Error {
    SegError::Device("gpu requested but this binary was built without the wgpu feature".into())
        .into()
}

/// Train one class end to end and print the benchmark result.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let toml = match &args.config {
        Some(path) => load_run_toml(path)?.run,
        None => RunOverrides::default(),
    };
    let config = build_run_config(args.dataset, &toml, &args.overrides);
    config.validate()?;
    tracing::info!(?config, device = ?args.device, "Starting training run");

    let report = match args.device {
        DeviceKind::Cpu => {
            train_segmentation::<Autodiff<CpuBackend>, _>(&config, &HostDevice::new())?
        }
        #[cfg(feature = "wgpu")]
        DeviceKind::Gpu => {
            use burn::backend::Wgpu;
            train_segmentation::<Autodiff<Wgpu>, _>(&config, &crate::device::gpu::GpuDevice::new())?
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceKind::Gpu => return Err(gpu_unavailable()),
    };

    print_summary(&config, &report);
    Ok(())
}

fn print_summary(config: &RunConfig, report: &RunReport) {
    println!("\n--- Training Summary ---");
    println!("Class: {}", config.class_choice);
    println!("Seed: {}", report.seed);
    println!("Part classes: {}", report.num_classes);
    println!("Train steps: {}", report.metrics.train_len());
    println!("Eval probes: {}", report.metrics.test_len());
    if let Some(last) = report.checkpoints.last() {
        println!("Last checkpoint: {}", last.display());
    }
    println!("Metrics: {}", report.metrics_path.display());
    println!("Curves: {}", report.curves_path.display());
    println!("mIOU for class {}: {}", config.class_choice, report.miou);
}

/// Score a saved checkpoint on the test split.
pub fn run_benchmark(args: BenchmarkArgs) -> anyhow::Result<()> {
    let mut overrides = args.overrides;
    overrides.model = Some(args.model.to_string_lossy().into_owned());
    let config = overrides.apply(RunConfig::new(args.dataset));
    config.validate()?;

    let test: Arc<dyn SegmentationSource> = Arc::new(ShapeNetPartDataset::open(
        Path::new(&config.dataset),
        &config.class_choice,
        Split::Test,
        false,
        config.npoints,
    )?);

    let miou = match args.device {
        DeviceKind::Cpu => {
            benchmark_checkpoint::<CpuBackend, _>(&config, test, &HostDevice::new())?
        }
        #[cfg(feature = "wgpu")]
        DeviceKind::Gpu => {
            use burn::backend::Wgpu;
            benchmark_checkpoint::<Wgpu, _>(&config, test, &crate::device::gpu::GpuDevice::new())?
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceKind::Gpu => return Err(gpu_unavailable()),
    };

    println!("mIOU for class {}: {}", config.class_choice, miou);
    Ok(())
}

/// Re-render curves from a saved metrics file.
pub fn run_plot(args: PlotArgs) -> anyhow::Result<PathBuf> {
    let series = MetricSeries::load_json(&args.metrics)?;
    let output = args
        .output
        .unwrap_or_else(|| args.metrics.with_file_name("curves.svg"));
    let path = write_curves(&series, &args.title, &output)?;
    println!("Curves: {}", path.display());
    Ok(path)
}
