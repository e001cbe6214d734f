use std::num::NonZeroUsize;

use ndarray::{Array2, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::Dataset;

/// A batch of samples copied out of a `Dataset`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub x: Array2<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Splits a dataset into batches, reshuffling the sample order on every pass if asked to.
pub struct DataLoader<'a> {
    dataset: &'a Dataset,
    batch_size: NonZeroUsize,
    shuffle: bool,
    order: Vec<usize>,
    rng: StdRng,
}

impl<'a> DataLoader<'a> {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The samples to iterate.
    /// * `batch_size` - The amount of samples per batch, the last one may be smaller.
    /// * `shuffle` - Whether each pass visits the samples in a new random order.
    /// * `seed` - An optional seed for the shuffling.
    pub fn new(
        dataset: &'a Dataset,
        batch_size: NonZeroUsize,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            dataset,
            batch_size,
            shuffle,
            order: (0..dataset.len()).collect(),
            rng,
        }
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Returns the amount of batches in a pass.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size.get())
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Starts a new pass over the dataset.
    pub fn batches(&mut self) -> Batches<'_> {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }

        Batches {
            dataset: self.dataset,
            chunks: self.order.chunks(self.batch_size.get()),
        }
    }
}

/// One pass over a dataset.
pub struct Batches<'a> {
    dataset: &'a Dataset,
    chunks: std::slice::Chunks<'a, usize>,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.chunks.next()?;

        Some(Batch {
            x: self.dataset.images().select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.dataset.labels()[i]).collect(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ImageShape;

    fn dataset(n: usize) -> Dataset {
        let images = Array2::from_shape_fn((n, 2), |(i, j)| (i * 2 + j) as f32);
        let labels = (0..n).collect();
        let shape = ImageShape {
            channels: 1,
            height: 1,
            width: 2,
        };
        Dataset::new(images, labels, shape).unwrap()
    }

    #[test]
    fn last_batch_is_short() {
        let data = dataset(5);
        let mut loader = DataLoader::new(&data, NonZeroUsize::new(2).unwrap(), false, None);

        let sizes: Vec<_> = loader.batches().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(loader.len(), 3);
    }

    #[test]
    fn unshuffled_batches_keep_the_order_and_rows() {
        let data = dataset(3);
        let mut loader = DataLoader::new(&data, NonZeroUsize::new(2).unwrap(), false, None);
        let first = loader.batches().next().unwrap();

        assert_eq!(first.labels, vec![0, 1]);
        assert_eq!(first.x.row(1).to_vec(), vec![2., 3.]);
    }

    #[test]
    fn shuffled_pass_is_a_permutation_and_keeps_pairs() {
        let data = dataset(50);
        let mut loader = DataLoader::new(&data, NonZeroUsize::new(8).unwrap(), true, Some(3));

        let mut seen = Vec::new();
        for batch in loader.batches() {
            for (row, &label) in batch.x.rows().into_iter().zip(&batch.labels) {
                assert_eq!(row[0], (label * 2) as f32);
            }
            seen.extend(batch.labels);
        }

        assert_ne!(seen, (0..50).collect::<Vec<_>>());
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
