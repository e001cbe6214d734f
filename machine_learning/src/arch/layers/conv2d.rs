use ndarray::{linalg, prelude::*};
use rayon::prelude::*;

use super::{check_cols, check_len};
use crate::{MlErr, Result, arch::activations::ActFn, tensor::row_major};

/// The shape of a 2d convolution over square kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    /// The height and width of each input channel.
    pub in_hw: (usize, usize),
}

impl ConvGeometry {
    /// Returns the height and width of each output channel, if the kernel fits the padded input.
    pub fn out_hw(&self) -> Option<(usize, usize)> {
        let Self {
            kernel: k,
            stride: s,
            padding: p,
            in_hw: (h, w),
            ..
        } = *self;

        if k == 0 || s == 0 || h + 2 * p < k || w + 2 * p < k {
            return None;
        }

        Some(((h + 2 * p - k) / s + 1, (w + 2 * p - k) / s + 1))
    }

    /// The rows of an unrolled input, one per kernel element of every input channel.
    fn patch_len(&self) -> usize {
        self.in_channels * self.kernel * self.kernel
    }

    /// Visits every `(unrolled index, input index)` pair that doesn't fall on padding.
    ///
    /// The unrolled input is a `(patch_len, oh * ow)` row-major matrix, each column holding
    /// the receptive field of one output position.
    fn for_each_tap<F>(&self, (oh, ow): (usize, usize), mut f: F)
    where
        F: FnMut(usize, usize),
    {
        let Self {
            in_channels,
            kernel: k,
            stride: s,
            padding: p,
            in_hw: (h, w),
            ..
        } = *self;

        for c in 0..in_channels {
            for ky in 0..k {
                for kx in 0..k {
                    let row = (c * k + ky) * k + kx;

                    for oy in 0..oh {
                        let Some(iy) = (oy * s + ky).checked_sub(p).filter(|&iy| iy < h) else {
                            continue;
                        };

                        for ox in 0..ow {
                            let Some(ix) = (ox * s + kx).checked_sub(p).filter(|&ix| ix < w)
                            else {
                                continue;
                            };

                            f(row * oh * ow + oy * ow + ox, (c * h + iy) * w + ix);
                        }
                    }
                }
            }
        }
    }

    /// Unrolls a single sample into `cols`, zeroing padded taps.
    fn im2col(&self, out_hw: (usize, usize), x: &[f32], cols: &mut [f32]) {
        cols.fill(0.);
        self.for_each_tap(out_hw, |col, i| cols[col] = x[i]);
    }

    /// Folds the gradient of an unrolled sample back onto the input, adding overlapping taps.
    fn col2im(&self, out_hw: (usize, usize), cols: &[f32], dx: &mut [f32]) {
        self.for_each_tap(out_hw, |col, i| dx[i] += cols[col]);
    }
}

/// A 2d convolution layer computed as one matrix product per sample over the unrolled input.
///
/// Inputs and outputs are `(batch, channels * height * width)` matrices in channel-major
/// order. Parameters are the `(out_channels, in_channels * kernel * kernel)` weights
/// followed by one bias per output channel.
#[derive(Debug, Clone)]
pub struct Conv2d {
    geometry: ConvGeometry,
    out_hw: (usize, usize),
    act_fn: Option<ActFn>,

    // Forward metadata
    batch: Option<usize>,
    cols: Vec<f32>,
    z: Option<Array2<f32>>,
}

impl Conv2d {
    /// Creates a new `Conv2d` layer.
    ///
    /// # Arguments
    /// * `geometry` - The shape of the convolution.
    /// * `act_fn` - An optional activation applied to the output.
    ///
    /// # Returns
    /// A new `Conv2d` or an error if the kernel doesn't fit the padded input.
    pub fn new(geometry: ConvGeometry, act_fn: Option<ActFn>) -> Result<Self> {
        let out_hw = geometry
            .out_hw()
            .filter(|_| geometry.in_channels > 0 && geometry.out_channels > 0)
            .ok_or_else(|| {
                MlErr::InvalidConfig(format!("invalid convolution geometry {geometry:?}"))
            })?;

        Ok(Self {
            geometry,
            out_hw,
            act_fn,
            batch: None,
            cols: Vec::new(),
            z: None,
        })
    }

    pub fn size(&self) -> usize {
        (self.geometry.patch_len() + 1) * self.geometry.out_channels
    }

    pub fn fan_in(&self) -> usize {
        self.geometry.patch_len()
    }

    pub fn in_len(&self) -> usize {
        let (h, w) = self.geometry.in_hw;
        self.geometry.in_channels * h * w
    }

    pub fn out_len(&self) -> usize {
        self.geometry.out_channels * self.out_area()
    }

    fn out_area(&self) -> usize {
        self.out_hw.0 * self.out_hw.1
    }

    pub fn forward(&mut self, params: &[f32], x: Array2<f32>) -> Result<Array2<f32>> {
        check_cols("conv2d input", &x, self.in_len())?;
        let (w, b) = self.view_params(params)?;

        let geometry = self.geometry;
        let out_hw = self.out_hw;
        let (in_len, out_len) = (self.in_len(), self.out_len());
        let (patch, area) = (geometry.patch_len(), self.out_area());
        let batch = x.nrows();

        let x_raw = row_major(&x);
        let mut cols = std::mem::take(&mut self.cols);
        cols.resize(batch * patch * area, 0.);
        let mut z = vec![0.; batch * out_len];

        z.par_chunks_mut(out_len)
            .zip(cols.par_chunks_mut(patch * area))
            .zip(x_raw.par_chunks(in_len))
            .try_for_each(|((zi, ci), xi)| -> Result<()> {
                geometry.im2col(out_hw, xi, ci);

                let ci = ArrayView2::from_shape((patch, area), &*ci)?;
                let mut zi = ArrayViewMut2::from_shape((geometry.out_channels, area), zi)?;
                linalg::general_mat_mul(1.0, &w, &ci, 0.0, &mut zi);

                for (mut row, &bias) in zi.rows_mut().into_iter().zip(b) {
                    row += bias;
                }

                Ok(())
            })?;

        self.cols = cols;
        self.batch = Some(batch);

        let z = Array2::from_shape_vec((batch, out_len), z)?;
        let Some(act_fn) = self.act_fn else {
            return Ok(z);
        };

        let a = z.mapv(|z| act_fn.f(z));
        self.z = Some(z);
        Ok(a)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let batch = self
            .batch
            .take()
            .ok_or(MlErr::MissingForward { layer: "conv2d" })?;

        check_cols("conv2d output gradient", &d, self.out_len())?;
        check_len("conv2d output gradient rows", d.nrows(), batch)?;
        check_len("conv2d gradient", grad.len(), self.size())?;

        if let Some(act_fn) = self.act_fn {
            let z = self.z.take().ok_or(MlErr::MissingForward { layer: "conv2d" })?;
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let (w, _) = self.view_params(params)?;
        let geometry = self.geometry;
        let out_hw = self.out_hw;
        let (in_len, out_len) = (self.in_len(), self.out_len());
        let (patch, area) = (geometry.patch_len(), self.out_area());
        let d_raw = row_major(&d);

        let (dw_raw, db_raw) = grad.split_at_mut(patch * geometry.out_channels);
        let mut dw = ArrayViewMut2::from_shape((geometry.out_channels, patch), dw_raw)?;

        for (di, ci) in d_raw.chunks(out_len).zip(self.cols.chunks(patch * area)) {
            let di = ArrayView2::from_shape((geometry.out_channels, area), di)?;
            let ci = ArrayView2::from_shape((patch, area), ci)?;
            linalg::general_mat_mul(1.0, &di, &ci.t(), 1.0, &mut dw);

            for (db, row) in db_raw.iter_mut().zip(di.rows()) {
                *db += row.sum();
            }
        }

        let mut dx = vec![0.; batch * in_len];
        dx.par_chunks_mut(in_len)
            .zip(d_raw.par_chunks(out_len))
            .try_for_each_init(
                || vec![0.; patch * area],
                |dcols, (dxi, di)| -> Result<()> {
                    let di = ArrayView2::from_shape((geometry.out_channels, area), di)?;
                    let mut dc = ArrayViewMut2::from_shape((patch, area), dcols.as_mut_slice())?;
                    linalg::general_mat_mul(1.0, &w.t(), &di, 0.0, &mut dc);
                    geometry.col2im(out_hw, dcols, dxi);
                    Ok(())
                },
            )?;

        Ok(Array2::from_shape_vec((batch, in_len), dx)?)
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, &'a [f32])> {
        check_len("conv2d parameters", params.len(), self.size())?;
        let out_channels = self.geometry.out_channels;
        let (w_raw, b) = params.split_at(out_channels * self.geometry.patch_len());
        let w = ArrayView2::from_shape((out_channels, self.geometry.patch_len()), w_raw)?;
        Ok((w, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_of_the_lenet_blocks() {
        let first = ConvGeometry {
            in_channels: 1,
            out_channels: 6,
            kernel: 5,
            stride: 1,
            padding: 2,
            in_hw: (28, 28),
        };
        assert_eq!(first.out_hw(), Some((28, 28)));

        let second = ConvGeometry {
            in_channels: 6,
            out_channels: 16,
            kernel: 5,
            stride: 1,
            padding: 0,
            in_hw: (14, 14),
        };
        assert_eq!(second.out_hw(), Some((10, 10)));

        let too_big = ConvGeometry {
            kernel: 7,
            in_hw: (3, 3),
            ..second
        };
        assert!(Conv2d::new(too_big, None).is_err());
    }

    #[test]
    fn single_channel_convolution_matches_by_hand() {
        let geometry = ConvGeometry {
            in_channels: 1,
            out_channels: 1,
            kernel: 2,
            stride: 1,
            padding: 0,
            in_hw: (3, 3),
        };
        let mut conv = Conv2d::new(geometry, None).unwrap();

        // [[1, 0], [0, -1]] plus a bias of 0.5
        let params = [1., 0., 0., -1., 0.5];
        let x = Array2::from_shape_vec((1, 9), (1..=9).map(|v| v as f32).collect()).unwrap();

        let y = conv.forward(&params, x).unwrap();
        assert_eq!(y, array![[-3.5, -3.5, -3.5, -3.5]]);
    }

    #[test]
    fn padding_keeps_the_size_and_zeroes_the_border() {
        let geometry = ConvGeometry {
            in_channels: 1,
            out_channels: 1,
            kernel: 3,
            stride: 1,
            padding: 1,
            in_hw: (2, 2),
        };
        let mut conv = Conv2d::new(geometry, None).unwrap();

        let mut params = [1.; 10];
        params[9] = 0.;
        let x = array![[1., 2., 3., 4.]];

        // Every 3x3 window centered on a 2x2 image covers all of it.
        let y = conv.forward(&params, x).unwrap();
        assert_eq!(y, array![[10., 10., 10., 10.]]);
    }

    #[test]
    fn backward_without_forward_fails() {
        let geometry = ConvGeometry {
            in_channels: 1,
            out_channels: 1,
            kernel: 1,
            stride: 1,
            padding: 0,
            in_hw: (1, 1),
        };
        let mut conv = Conv2d::new(geometry, None).unwrap();
        let mut grad = [0.; 2];

        let err = conv
            .backward(&[1., 0.], &mut grad, array![[1.]])
            .unwrap_err();
        assert!(matches!(err, MlErr::MissingForward { .. }));
    }
}
