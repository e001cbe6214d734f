mod idx;
mod loader;

use std::{fs, path::Path};

use log::info;
use ndarray::{Array2, ArrayView2};

pub use idx::{parse_idx_images, parse_idx_labels};
pub use loader::{Batch, Batches, DataLoader};

use crate::{MlErr, Result};

/// The amount of digit classes in MNIST.
pub const MNIST_CLASSES: usize = 10;

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// The shape of a single sample, channels first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in memory image classification dataset.
///
/// Each row of `images` is one flattened sample in channel, row, column order.
#[derive(Debug, Clone)]
pub struct Dataset {
    images: Array2<f32>,
    labels: Vec<usize>,
    shape: ImageShape,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `images` - One flattened sample per row.
    /// * `labels` - The class of each sample.
    /// * `shape` - The shape every row unflattens to.
    ///
    /// # Returns
    /// A new `Dataset` or an error if the pieces don't agree in size.
    pub fn new(images: Array2<f32>, labels: Vec<usize>, shape: ImageShape) -> Result<Self> {
        if images.nrows() != labels.len() {
            return Err(MlErr::InvalidDataset(format!(
                "there are {} images but {} labels",
                images.nrows(),
                labels.len()
            )));
        }

        if images.ncols() != shape.len() {
            return Err(MlErr::InvalidDataset(format!(
                "samples have {} values but the shape {shape:?} needs {}",
                images.ncols(),
                shape.len()
            )));
        }

        Ok(Self {
            images,
            labels,
            shape,
        })
    }

    /// Reads the MNIST split found in `dir`, with pixels scaled into `[0, 1]`.
    ///
    /// The files must be the uncompressed idx files, e.g. `train-images-idx3-ubyte`.
    ///
    /// # Arguments
    /// * `dir` - The directory holding the idx files.
    /// * `train` - Whether to read the training split or the test split.
    pub fn mnist<P: AsRef<Path>>(dir: P, train: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let (images, labels) = if train {
            (TRAIN_IMAGES, TRAIN_LABELS)
        } else {
            (TEST_IMAGES, TEST_LABELS)
        };

        let (shape, images) = parse_idx_images(&fs::read(dir.join(images))?)?;
        let labels = parse_idx_labels(&fs::read(dir.join(labels))?)?;

        if let Some(&label) = labels.iter().find(|&&l| l >= MNIST_CLASSES) {
            return Err(MlErr::InvalidLabel {
                label,
                classes: MNIST_CLASSES,
            });
        }

        let dataset = Self::new(images, labels, shape)?;
        info!(
            samples = dataset.len(),
            train = train;
            "loaded mnist from {}", dir.display()
        );

        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn images(&self) -> ArrayView2<'_, f32> {
        self.images.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}
