//! Shuffling, prefetching batch loader.
//!
//! Each epoch the main thread shuffles shape indices with the run's RNG and
//! draws one augmentation seed per item, so batch contents depend only on the
//! seed and never on worker scheduling. A prefetch thread then loads batches
//! on a rayon pool of `workers` threads and hands them over a bounded channel;
//! the consumer blocks in `next()` until a batch is ready.

use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use super::{SegSample, SegmentationSource};
use crate::error::{Result, SegError};

/// (shape index, augmentation seed) for every item of one batch.
type BatchPlan = Vec<(usize, u64)>;

/// Batches shapes from a `SegmentationSource` in shuffled order.
pub struct DataLoader {
    source: Arc<dyn SegmentationSource>,
    batch_size: usize,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl DataLoader {
    /// Create a loader. `workers == 0` loads every batch on the calling thread.
    pub fn new(
        source: Arc<dyn SegmentationSource>,
        batch_size: usize,
        workers: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(SegError::Configuration("batch_size must be positive".into()));
        }
        let pool = if workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("pointseg-loader-{i}"))
                .build()
                .map_err(|e| SegError::Configuration(format!("loader worker pool: {e}")))?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self {
            source,
            batch_size,
            pool,
        })
    }

    pub fn source(&self) -> &dyn SegmentationSource {
        self.source.as_ref()
    }

    /// Number of shapes in the underlying dataset.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches per epoch; the last batch may be short.
    pub fn num_batches(&self) -> usize {
        self.source.len().div_ceil(self.batch_size)
    }

    fn shuffled_plan(&self, rng: &mut impl Rng) -> Vec<(usize, u64)> {
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        order.shuffle(rng);
        order.into_iter().map(|i| (i, rng.gen())).collect()
    }

    /// Start one pass over the dataset in a fresh shuffled order.
    pub fn epoch(&self, rng: &mut impl Rng) -> Result<BatchIter> {
        let plans: Vec<BatchPlan> = self
            .shuffled_plan(rng)
            .chunks(self.batch_size)
            .map(<[(usize, u64)]>::to_vec)
            .collect();
        let remaining = plans.len();

        let inner = match &self.pool {
            None => BatchSource::Inline {
                source: Arc::clone(&self.source),
                plans: plans.into_iter(),
            },
            Some(pool) => {
                let capacity = pool.current_num_threads().max(1);
                let (tx, rx) = sync_channel(capacity);
                let source = Arc::clone(&self.source);
                let pool = Arc::clone(pool);
                std::thread::Builder::new()
                    .name("pointseg-prefetch".into())
                    .spawn(move || {
                        for plan in plans {
                            let batch = pool.install(|| load_parallel(source.as_ref(), &plan));
                            // Receiver gone: the epoch was abandoned.
                            if tx.send(batch).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| SegError::Data(format!("failed to start prefetch thread: {e}")))?;
                BatchSource::Prefetch { rx }
            }
        };

        Ok(BatchIter { inner, remaining })
    }

    /// Load a single shuffled batch synchronously.
    ///
    /// Used for the periodic evaluation probe; it does not cover the split.
    pub fn probe(&self, rng: &mut impl Rng) -> Result<Vec<SegSample>> {
        let mut plan = self.shuffled_plan(rng);
        plan.truncate(self.batch_size);
        match &self.pool {
            Some(pool) => pool.install(|| load_parallel(self.source.as_ref(), &plan)),
            None => load_inline(self.source.as_ref(), &plan),
        }
    }
}

fn load_parallel(source: &dyn SegmentationSource, plan: &[(usize, u64)]) -> Result<Vec<SegSample>> {
    plan.par_iter()
        .map(|&(index, seed)| source.get(index, seed))
        .collect()
}

fn load_inline(source: &dyn SegmentationSource, plan: &[(usize, u64)]) -> Result<Vec<SegSample>> {
    plan.iter()
        .map(|&(index, seed)| source.get(index, seed))
        .collect()
}

enum BatchSource {
    Inline {
        source: Arc<dyn SegmentationSource>,
        plans: std::vec::IntoIter<BatchPlan>,
    },
    Prefetch {
        rx: Receiver<Result<Vec<SegSample>>>,
    },
}

/// Iterator over one epoch's batches.
///
/// Dropping it early stops the prefetch thread after its in-flight batch.
pub struct BatchIter {
    inner: BatchSource,
    remaining: usize,
}

impl Iterator for BatchIter {
    type Item = Result<Vec<SegSample>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match &mut self.inner {
            BatchSource::Inline { source, plans } => {
                let plan = plans.next()?;
                Some(load_inline(source.as_ref(), &plan))
            }
            BatchSource::Prefetch { rx } => match rx.recv() {
                Ok(batch) => Some(batch),
                Err(_) => {
                    self.remaining = 0;
                    Some(Err(SegError::Data("prefetch thread stopped unexpectedly".into())))
                }
            },
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for BatchIter {}
