use std::fmt::{self, Display};

use ndarray::{ArrayView1, ArrayView2, Axis};

/// Averages the losses pushed since it was last flushed.
#[derive(Debug, Default, Clone)]
pub struct LossWindow {
    sum: f32,
    count: usize,
}

impl LossWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, loss: f32) {
        self.sum += loss;
        self.count += 1;
    }

    /// Returns the mean of the window and empties it, `None` if nothing was pushed.
    pub fn flush(&mut self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }

        let mean = self.sum / self.count as f32;
        *self = Self::default();
        Some(mean)
    }
}

/// A loss reported during training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoggedLoss {
    pub epoch: usize,
    pub iter: usize,
    pub loss: f32,
}

/// What a training run went through.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs: usize,
    pub iterations: usize,
    pub losses: Vec<LoggedLoss>,
}

/// The share of correctly classified samples.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    pub fn add(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.;
        }

        100. * self.correct as f64 / self.total as f64
    }
}

impl Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Accuracy: {}/{} ({:.2}%)",
            self.correct,
            self.total,
            self.percent()
        )
    }
}

/// Returns the index of the largest score, the first one on ties.
pub fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max { (i, v) } else { (best, max) }
        })
        .0
}

/// Counts the rows whose highest score is the one of their label.
pub fn correct_predictions(y_pred: ArrayView2<f32>, labels: &[usize]) -> usize {
    y_pred
        .axis_iter(Axis(0))
        .zip(labels)
        .filter(|&(row, &label)| argmax(row) == label)
        .count()
}
