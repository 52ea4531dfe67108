//! Per-step loss/accuracy series for the training and evaluation curves.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegError};

/// Loss and accuracy of one train or eval step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// Append-only metric series.
///
/// Train series grow by one entry per training step, test series by one entry
/// per evaluation probe. Nothing is ever removed or rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    train_loss: Vec<f64>,
    train_accuracy: Vec<f64>,
    test_loss: Vec<f64>,
    test_accuracy: Vec<f64>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_train(&mut self, m: StepMetrics) {
        self.train_loss.push(m.loss);
        self.train_accuracy.push(m.accuracy);
    }

    pub fn push_test(&mut self, m: StepMetrics) {
        self.test_loss.push(m.loss);
        self.test_accuracy.push(m.accuracy);
    }

    pub fn train_loss(&self) -> &[f64] {
        &self.train_loss
    }

    pub fn train_accuracy(&self) -> &[f64] {
        &self.train_accuracy
    }

    pub fn test_loss(&self) -> &[f64] {
        &self.test_loss
    }

    pub fn test_accuracy(&self) -> &[f64] {
        &self.test_accuracy
    }

    /// Number of recorded training steps.
    pub fn train_len(&self) -> usize {
        self.train_loss.len()
    }

    /// Number of recorded evaluation probes.
    pub fn test_len(&self) -> usize {
        self.test_loss.len()
    }

    /// Write the series as pretty JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SegError::Data(format!("failed to serialize metrics: {e}")))?;
        std::fs::write(path, json).map_err(|e| SegError::io(path, e))
    }

    /// Read a series written by `save_json`.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SegError::io(path, e))?;
        let series: Self = serde_json::from_str(&content)
            .map_err(|e| SegError::Data(format!("bad metrics file {}: {e}", path.display())))?;
        if series.train_loss.len() != series.train_accuracy.len()
            || series.test_loss.len() != series.test_accuracy.len()
        {
            return Err(SegError::Data(format!(
                "metrics file {} has loss/accuracy series of different lengths",
                path.display()
            )));
        }
        Ok(series)
    }
}
