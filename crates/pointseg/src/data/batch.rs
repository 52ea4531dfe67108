//! Conversion from loaded samples to burn tensors.

use burn::prelude::*;
use burn::tensor::TensorData;

use super::SegSample;
use crate::error::{Result, SegError};

/// Convert raw 1-indexed part labels to 0-indexed class ids.
///
/// Every result must fall in `[0, num_classes)`; anything else means the
/// dataset and the class count disagree and is reported as a data error.
pub fn normalize_labels(raw: &[i64], num_classes: usize) -> Result<Vec<i64>> {
    raw.iter()
        .map(|&label| {
            let class = label - 1;
            if class < 0 || class >= num_classes as i64 {
                Err(SegError::Data(format!(
                    "label {label} outside 1..={num_classes}"
                )))
            } else {
                Ok(class)
            }
        })
        .collect()
}

/// One batch on a device.
///
/// - `points`: `(batch, points_per_shape, 3)`
/// - `targets`: `(batch, points_per_shape)`, 0-indexed class ids
#[derive(Debug, Clone)]
pub struct SegBatch<B: Backend> {
    pub points: Tensor<B, 3>,
    pub targets: Tensor<B, 2, Int>,
}

impl<B: Backend> SegBatch<B> {
    /// Stack samples into tensors, normalizing labels on the way.
    pub fn from_samples(
        samples: &[SegSample],
        num_classes: usize,
        device: &B::Device,
    ) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| SegError::Data("empty batch".into()))?;
        let batch = samples.len();
        let npoints = first.len();

        let mut coords = Vec::with_capacity(batch * npoints * 3);
        let mut labels = Vec::with_capacity(batch * npoints);
        for (i, sample) in samples.iter().enumerate() {
            if sample.len() != npoints || sample.labels.len() != npoints {
                return Err(SegError::Data(format!(
                    "sample {i} in batch has {} points / {} labels, expected {npoints}",
                    sample.points.len(),
                    sample.labels.len()
                )));
            }
            coords.extend(sample.points.iter().flatten().copied());
            labels.extend(normalize_labels(&sample.labels, num_classes)?);
        }

        Ok(Self {
            points: Tensor::from_data(TensorData::new(coords, [batch, npoints, 3]), device),
            targets: Tensor::from_data(TensorData::new(labels, [batch, npoints]), device),
        })
    }

    /// Number of shapes in the batch.
    pub fn batch_size(&self) -> usize {
        self.points.dims()[0]
    }

    pub fn points_per_shape(&self) -> usize {
        self.points.dims()[1]
    }

    /// Total points in the batch (the accuracy denominator).
    pub fn num_points(&self) -> usize {
        self.batch_size() * self.points_per_shape()
    }

    /// Points in channel-first layout `(batch, 3, points_per_shape)`.
    pub fn channels_first(&self) -> Tensor<B, 3> {
        self.points.clone().swap_dims(1, 2)
    }

    /// Flat per-point class ids, `(batch * points_per_shape,)`.
    pub fn flat_targets(&self) -> Tensor<B, 1, Int> {
        let n = self.num_points();
        self.targets.clone().reshape([n])
    }

    /// Move the batch to another device.
    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            points: self.points.to_device(device),
            targets: self.targets.to_device(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_normalize_one_indexed_labels() {
        let normalized = normalize_labels(&[1, 2, 3, 3, 1], 3).unwrap();
        assert_eq!(normalized, vec![0, 1, 2, 2, 0]);
        assert!(normalized.iter().all(|&c| (0..3).contains(&c)));
    }

    #[test]
    fn test_normalize_rejects_out_of_range() {
        // A 0 label would become -1.
        assert!(matches!(normalize_labels(&[0, 1], 3), Err(SegError::Data(_))));
        // Label 4 with 3 classes would become 3.
        assert!(matches!(normalize_labels(&[1, 4], 3), Err(SegError::Data(_))));
    }

    #[test]
    fn test_from_samples_shapes() {
        let device = Default::default();
        let samples = vec![
            SegSample {
                points: vec![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]],
                labels: vec![1, 2],
            },
            SegSample {
                points: vec![[6.0, 7.0, 8.0], [9.0, 10.0, 11.0]],
                labels: vec![2, 2],
            },
        ];
        let batch = SegBatch::<TestBackend>::from_samples(&samples, 2, &device).unwrap();
        assert_eq!(batch.points.dims(), [2, 2, 3]);
        assert_eq!(batch.targets.dims(), [2, 2]);
        assert_eq!(batch.num_points(), 4);

        let cf = batch.channels_first();
        assert_eq!(cf.dims(), [2, 3, 2]);
        // channel 0 of shape 0 holds the x coordinates.
        let x: Vec<f32> = cf.slice([0..1, 0..1, 0..2]).into_data().iter::<f32>().collect();
        assert_eq!(x, vec![0.0, 3.0]);

        let flat: Vec<i64> = batch.flat_targets().into_data().iter::<i64>().collect();
        assert_eq!(flat, vec![0, 1, 1, 1]);
    }

    #[test]
    fn test_from_samples_rejects_empty() {
        let device = Default::default();
        assert!(SegBatch::<TestBackend>::from_samples(&[], 2, &device).is_err());
    }
}
