use ndarray::Array2;
use rayon::prelude::*;

use super::{check_cols, check_len};
use crate::{MlErr, Result, tensor::row_major};

/// A max pooling layer over non overlapping `kernel x kernel` windows.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    channels: usize,
    in_hw: (usize, usize),
    kernel: usize,
    out_hw: (usize, usize),

    // Forward metadata, the input index each output was taken from.
    argmax: Option<Vec<usize>>,
}

impl MaxPool2d {
    /// Creates a new `MaxPool2d` layer, trailing rows and columns that don't fill a window
    /// are dropped.
    ///
    /// # Arguments
    /// * `channels` - The amount of channels of the input.
    /// * `in_hw` - The height and width of each channel.
    /// * `kernel` - The side of the window, also used as the stride.
    pub fn new(channels: usize, in_hw: (usize, usize), kernel: usize) -> Result<Self> {
        if channels == 0 || kernel == 0 || in_hw.0 < kernel || in_hw.1 < kernel {
            return Err(MlErr::InvalidConfig(format!(
                "can't pool {channels} channels of {in_hw:?} with a kernel of {kernel}"
            )));
        }

        Ok(Self {
            channels,
            in_hw,
            kernel,
            out_hw: (in_hw.0 / kernel, in_hw.1 / kernel),
            argmax: None,
        })
    }

    pub fn in_len(&self) -> usize {
        self.channels * self.in_hw.0 * self.in_hw.1
    }

    pub fn out_len(&self) -> usize {
        self.channels * self.out_hw.0 * self.out_hw.1
    }

    pub fn forward(&mut self, x: Array2<f32>) -> Result<Array2<f32>> {
        check_cols("max pool input", &x, self.in_len())?;

        let Self {
            channels,
            in_hw: (h, w),
            kernel: k,
            out_hw: (oh, ow),
            ..
        } = *self;

        let (in_len, out_len) = (self.in_len(), self.out_len());
        let batch = x.nrows();
        let x_raw = row_major(&x);

        let mut y = vec![0.; batch * out_len];
        let mut argmax = vec![0; batch * out_len];

        y.par_chunks_mut(out_len)
            .zip(argmax.par_chunks_mut(out_len))
            .zip(x_raw.par_chunks(in_len))
            .for_each(|((yi, ai), xi)| {
                for c in 0..channels {
                    for oy in 0..oh {
                        for ox in 0..ow {
                            let origin = (c * h + oy * k) * w + ox * k;
                            let mut best = origin;

                            for ky in 0..k {
                                for kx in 0..k {
                                    let i = origin + ky * w + kx;
                                    if xi[i] > xi[best] {
                                        best = i;
                                    }
                                }
                            }

                            let o = (c * oh + oy) * ow + ox;
                            yi[o] = xi[best];
                            ai[o] = best;
                        }
                    }
                }
            });

        self.argmax = Some(argmax);
        Ok(Array2::from_shape_vec((batch, out_len), y)?)
    }

    /// Routes each output gradient back to the input that won its window.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        let argmax = self
            .argmax
            .take()
            .ok_or(MlErr::MissingForward { layer: "max pool" })?;

        let (in_len, out_len) = (self.in_len(), self.out_len());
        check_cols("max pool output gradient", &d, out_len)?;
        check_len("max pool output gradient", d.len(), argmax.len())?;

        let batch = d.nrows();
        let d_raw = row_major(&d);
        let mut dx = vec![0.; batch * in_len];

        dx.par_chunks_mut(in_len)
            .zip(d_raw.par_chunks(out_len))
            .zip(argmax.par_chunks(out_len))
            .for_each(|((dxi, di), ai)| {
                for (&g, &i) in di.iter().zip(ai) {
                    dxi[i] += g;
                }
            });

        Ok(Array2::from_shape_vec((batch, in_len), dx)?)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn picks_the_max_of_each_window() {
        let mut pool = MaxPool2d::new(1, (4, 4), 2).unwrap();
        let x = array![[
            1., 2., 5., 0., //
            3., 4., 1., 1., //
            0., 0., -1., -2., //
            9., 0., -3., -4.,
        ]];

        let y = pool.forward(x).unwrap();
        assert_eq!(y, array![[4., 5., 9., -1.]]);
    }

    #[test]
    fn gradient_goes_to_the_winners_only() {
        let mut pool = MaxPool2d::new(2, (2, 2), 2).unwrap();
        let x = array![[0., 7., 1., 2., 8., 3., 4., 5.]];
        pool.forward(x).unwrap();

        let dx = pool.backward(array![[10., 20.]]).unwrap();
        assert_eq!(dx, array![[0., 10., 0., 0., 20., 0., 0., 0.]]);
    }

    #[test]
    fn odd_sizes_drop_the_remainder() {
        let pool = MaxPool2d::new(3, (5, 5), 2).unwrap();
        assert_eq!(pool.out_len(), 3 * 2 * 2);
        assert!(MaxPool2d::new(1, (1, 1), 2).is_err());
    }
}
