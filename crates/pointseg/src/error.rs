use std::path::PathBuf;

/// Errors that abort a segmentation run.
///
/// Nothing here is retried: the run stops on the first error it cannot
/// recover from.
#[derive(Debug, thiserror::Error)]
pub enum SegError {
    /// Invalid hyperparameters or run settings, raised before any dataset is
    /// opened or model is allocated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Checkpoint could not be read or does not match the model layout.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// The requested compute device is not available.
    #[error("Device error: {0}")]
    Device(String),

    /// Filesystem failure on a specific path (checkpoint, report, output dir).
    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed dataset item or label outside the class range.
    #[error("Data error: {0}")]
    Data(String),
}

impl SegError {
    /// Wrap an `std::io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SegError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SegError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = SegError::io(
            "/tmp/seg/seg_model_Chair_0",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("seg_model_Chair_0"), "got: {msg}");
        assert!(msg.contains("denied"), "got: {msg}");
    }
}
