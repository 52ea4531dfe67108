mod config;
mod device;
mod pipeline;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::RunOverrides;
use device::DeviceKind;
use pipeline::{BenchmarkArgs, PlotArgs, TrainArgs};

/// pointseg: PointNet part segmentation on ShapeNet-part point clouds.
#[derive(Parser)]
#[command(name = "pointseg", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Hyperparameter flags shared by `train` and `benchmark`.
#[derive(Args, Debug)]
struct RunFlags {
    /// Object category to train on (e.g. Chair).
    #[arg(long)]
    class_choice: Option<String>,
    /// Enable the feature transform and its orthogonality penalty.
    #[arg(long)]
    feature_transform: bool,
    /// Shapes per batch.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Loader worker threads (0 loads on the main thread).
    #[arg(long)]
    workers: Option<usize>,
    /// Points resampled per shape.
    #[arg(long)]
    npoints: Option<usize>,
    /// Random seed (drawn from 1..=10000 when absent).
    #[arg(long)]
    seed: Option<u64>,
}

impl RunFlags {
    fn into_overrides(self) -> RunOverrides {
        RunOverrides {
            class_choice: self.class_choice,
            feature_transform: self.feature_transform.then_some(true),
            batch_size: self.batch_size,
            workers: self.workers,
            npoints: self.npoints,
            seed: self.seed,
            ..Default::default()
        }
    }
}

/// CLI subcommands for training, benchmarking and plotting.
#[derive(Subcommand)]
enum Command {
    /// Train a segmentation model for one class, then benchmark it.
    Train {
        /// Dataset root (ShapeNet-part layout).
        #[arg(long)]
        dataset: String,
        /// Path to a run config TOML file with a `[run]` section.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of epochs.
        #[arg(long)]
        nepoch: Option<usize>,
        /// Output directory for checkpoints, metrics and curves.
        #[arg(long)]
        outf: Option<String>,
        /// Checkpoint to restore before training.
        #[arg(long)]
        model: Option<String>,
        /// Base learning rate.
        #[arg(long)]
        lr: Option<f64>,
        /// Epochs between learning-rate halvings.
        #[arg(long)]
        step_size: Option<usize>,
        /// Training batches between evaluation probes.
        #[arg(long)]
        eval_interval: Option<usize>,
        #[command(flatten)]
        run: RunFlags,
        /// Compute device. There is no fallback if it is unavailable.
        #[arg(long, value_enum, default_value_t = DeviceKind::Gpu)]
        device: DeviceKind,
    },
    /// Report test-split mIoU of a saved checkpoint.
    Benchmark {
        /// Dataset root (ShapeNet-part layout).
        #[arg(long)]
        dataset: String,
        /// Checkpoint file (`seg_model_<class>_<epoch>.mpk`).
        #[arg(long)]
        model: PathBuf,
        #[command(flatten)]
        run: RunFlags,
        /// Compute device. There is no fallback if it is unavailable.
        #[arg(long, value_enum, default_value_t = DeviceKind::Gpu)]
        device: DeviceKind,
    },
    /// Re-render training curves from a saved metrics file.
    Plot {
        /// `metrics.json` written by a training run.
        #[arg(long)]
        metrics: PathBuf,
        /// Output SVG path. Defaults to `curves.svg` next to the metrics file.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Figure title.
        #[arg(long, default_value = "Training curves")]
        title: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            dataset,
            config,
            nepoch,
            outf,
            model,
            lr,
            step_size,
            eval_interval,
            run,
            device,
        } => {
            let overrides = RunOverrides {
                nepoch,
                outf,
                model,
                lr,
                step_size,
                eval_interval,
                ..run.into_overrides()
            };
            pipeline::run_train(TrainArgs {
                dataset,
                config,
                overrides,
                device,
            })
        }
        Command::Benchmark {
            dataset,
            model,
            run,
            device,
        } => pipeline::run_benchmark(BenchmarkArgs {
            dataset,
            model,
            overrides: run.into_overrides(),
            device,
        }),
        Command::Plot {
            metrics,
            output,
            title,
        } => pipeline::run_plot(PlotArgs {
            metrics,
            output,
            title,
        })
        .map(|_| ()),
    }
}
