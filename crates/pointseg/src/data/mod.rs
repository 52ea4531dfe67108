//! Dataset sources, the prefetching loader, and tensor batches.
//!
//! Datasets produce plain `SegSample`s on worker threads; tensors are only
//! built on the main thread, in `SegBatch::from_samples`.

pub mod batch;
pub mod loader;
pub mod memory;
pub mod shapenet;

pub use batch::{normalize_labels, SegBatch};
pub use loader::{BatchIter, DataLoader};
pub use memory::InMemoryDataset;
pub use shapenet::{ShapeNetPartDataset, Split};

use crate::error::Result;

/// One shape: `points.len() == labels.len()` points with raw (1-indexed)
/// part labels.
#[derive(Debug, Clone, PartialEq)]
pub struct SegSample {
    pub points: Vec<[f32; 3]>,
    pub labels: Vec<i64>,
}

impl SegSample {
    /// Number of points in the shape.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Read-only dataset of labelled point clouds.
///
/// Implementations are shared with loader worker threads, so `get` takes
/// `&self` and receives its augmentation seed from the caller.
pub trait SegmentationSource: Send + Sync {
    /// Number of shapes in the split.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of part classes for the selected category.
    fn num_seg_classes(&self) -> usize;

    /// Points returned per shape by `get`.
    fn points_per_shape(&self) -> usize;

    /// Load shape `index`. `seed` drives resampling and augmentation.
    fn get(&self, index: usize, seed: u64) -> Result<SegSample>;
}
