//! TOML config loading for the segmentation CLI.
//!
//! A run file has a single `[run]` section whose keys mirror `RunConfig`.
//! Values are merged as: `RunConfig` defaults < TOML values < CLI flags.

use std::path::Path;

use pointseg::RunConfig;
use serde::Deserialize;

/// Top-level structure of a run TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct RunToml {
    #[serde(default)]
    pub run: RunOverrides,
}

/// Optional overrides for `RunConfig` fields.
///
/// Used for both the TOML `[run]` section and the CLI flags; `None` leaves
/// the lower-priority value in place.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOverrides {
    pub lr: Option<f64>,
    pub step_size: Option<usize>,
    pub lr_gamma: Option<f64>,
    pub batch_size: Option<usize>,
    pub nepoch: Option<usize>,
    pub workers: Option<usize>,
    pub outf: Option<String>,
    pub model: Option<String>,
    pub class_choice: Option<String>,
    pub feature_transform: Option<bool>,
    pub feature_transform_weight: Option<f64>,
    pub npoints: Option<usize>,
    pub eval_interval: Option<usize>,
    pub seed: Option<u64>,
    pub width_divisor: Option<usize>,
}

impl RunOverrides {
    /// Apply every set field on top of `config`.
    pub fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(v) = self.lr {
            config.lr = v;
        }
        if let Some(v) = self.step_size {
            config.step_size = v;
        }
        if let Some(v) = self.lr_gamma {
            config.lr_gamma = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.nepoch {
            config.nepoch = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = &self.outf {
            config.outf = v.clone();
        }
        if let Some(v) = &self.model {
            config.model = Some(v.clone());
        }
        if let Some(v) = &self.class_choice {
            config.class_choice = v.clone();
        }
        if let Some(v) = self.feature_transform {
            config.feature_transform = v;
        }
        if let Some(v) = self.feature_transform_weight {
            config.feature_transform_weight = v;
        }
        if let Some(v) = self.npoints {
            config.npoints = v;
        }
        if let Some(v) = self.eval_interval {
            config.eval_interval = v;
        }
        if let Some(v) = self.seed {
            config.seed = Some(v);
        }
        if let Some(v) = self.width_divisor {
            config.width_divisor = v;
        }
        config
    }
}

/// Load and deserialize a `RunToml` from a TOML file.
pub fn load_run_toml(path: &Path) -> anyhow::Result<RunToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let config: RunToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded run config");
    Ok(config)
}

/// Build the run config from defaults, the TOML section, and CLI flags.
pub fn build_run_config(dataset: String, toml: &RunOverrides, cli: &RunOverrides) -> RunConfig {
    cli.apply(toml.apply(RunConfig::new(dataset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_run_toml() {
        let toml_str = r#"
[run]
lr = 0.0005
step_size = 10
lr_gamma = 0.25
batch_size = 16
nepoch = 5
workers = 2
outf = "runs/chair"
class_choice = "Chair"
feature_transform = true
npoints = 1024
eval_interval = 5
seed = 7
width_divisor = 4
"#;
        let toml: RunToml = toml::from_str(toml_str).unwrap();
        let config = build_run_config("data".into(), &toml.run, &RunOverrides::default());
        assert!((config.lr - 0.0005).abs() < 1e-12);
        assert_eq!(config.step_size, 10);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.nepoch, 5);
        assert_eq!(config.outf, "runs/chair");
        assert!(config.feature_transform);
        assert_eq!(config.npoints, 1024);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.width_divisor, 4);
        assert!(config.model.is_none());
    }

    #[test]
    fn test_missing_run_section_uses_defaults() {
        let toml: RunToml = toml::from_str("").unwrap();
        let config = build_run_config("data".into(), &toml.run, &RunOverrides::default());
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.nepoch, 25);
        assert_eq!(config.class_choice, "Chair");
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(toml::from_str::<RunToml>("[run]\nlearning_rate = 0.1\n").is_err());
    }

    #[test]
    fn test_cli_override_priority() {
        let toml = RunOverrides {
            batch_size: Some(8),
            nepoch: Some(3),
            ..Default::default()
        };
        let cli = RunOverrides {
            batch_size: Some(4),
            ..Default::default()
        };
        let config = build_run_config("data".into(), &toml, &cli);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.nepoch, 3);
        assert_eq!(config.dataset, "data");
    }

    #[test]
    fn test_load_run_toml_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.toml");
        std::fs::write(&path, "[run]\nworkers = 0\n").unwrap();
        let toml = load_run_toml(&path).unwrap();
        assert_eq!(toml.run.workers, Some(0));
        assert!(load_run_toml(&tmp.path().join("missing.toml")).is_err());
    }
}
