use rand::{Rng, SeedableRng};

use super::{SegSample, SegmentationSource};
use crate::error::{Result, SegError};

/// Dataset held entirely in memory. Items are returned as stored; the seed
/// passed to `get` is ignored.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    samples: Vec<SegSample>,
    num_seg_classes: usize,
    points_per_shape: usize,
}

impl InMemoryDataset {
    /// Wrap pre-built samples. All samples must have the same, non-zero
    /// point count with one label per point.
    pub fn new(samples: Vec<SegSample>, num_seg_classes: usize) -> Result<Self> {
        if num_seg_classes == 0 {
            return Err(SegError::Configuration("num_seg_classes must be positive".into()));
        }
        let points_per_shape = samples.first().map(SegSample::len).unwrap_or(0);
        for (i, s) in samples.iter().enumerate() {
            if s.labels.len() != s.points.len() {
                return Err(SegError::Data(format!(
                    "sample {i}: {} points but {} labels",
                    s.points.len(),
                    s.labels.len()
                )));
            }
            if s.len() != points_per_shape || s.is_empty() {
                return Err(SegError::Data(format!(
                    "sample {i}: expected {points_per_shape} points, got {}",
                    s.len()
                )));
            }
        }
        Ok(Self {
            samples,
            num_seg_classes,
            points_per_shape,
        })
    }

    /// Deterministic toy dataset: points uniform in the unit cube, labelled
    /// by which of `num_classes` slabs along x they fall in (1-indexed).
    pub fn synthetic(num_shapes: usize, npoints: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let num_classes = num_classes.max(1);
        let samples = (0..num_shapes)
            .map(|_| {
                let points: Vec<[f32; 3]> = (0..npoints)
                    .map(|_| {
                        [
                            rng.gen_range(-1.0f32..1.0),
                            rng.gen_range(-1.0f32..1.0),
                            rng.gen_range(-1.0f32..1.0),
                        ]
                    })
                    .collect();
                let labels = points
                    .iter()
                    .map(|p| {
                        let slab = ((p[0] + 1.0) / 2.0 * num_classes as f32) as usize;
                        slab.min(num_classes - 1) as i64 + 1
                    })
                    .collect();
                SegSample { points, labels }
            })
            .collect();
        Self {
            samples,
            num_seg_classes: num_classes,
            points_per_shape: npoints,
        }
    }
}

impl SegmentationSource for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn num_seg_classes(&self) -> usize {
        self.num_seg_classes
    }

    fn points_per_shape(&self) -> usize {
        self.points_per_shape
    }

    fn get(&self, index: usize, _seed: u64) -> Result<SegSample> {
        self.samples.get(index).cloned().ok_or_else(|| {
            SegError::Data(format!(
                "index {index} out of range ({} shapes)",
                self.samples.len()
            ))
        })
    }
}
