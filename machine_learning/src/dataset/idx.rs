//! Readers for the idx format MNIST is distributed in.
//!
//! Every file starts with a big endian magic number whose low byte is the amount of
//! dimensions, then one big endian `u32` per dimension, then the unsigned bytes.

use ndarray::Array2;

use super::ImageShape;
use crate::{MlErr, Result};

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

fn invalid<T>(msg: String) -> Result<T> {
    Err(MlErr::InvalidDataset(msg))
}

/// Reads the header of an idx file.
///
/// # Returns
/// The dimensions and the data that follows them.
fn header<const N: usize>(bytes: &[u8], magic: u32) -> Result<([usize; N], &[u8])> {
    let Some((found, mut rest)) = bytes.split_first_chunk::<4>() else {
        return invalid("idx file is too short to hold a magic number".into());
    };

    let found = u32::from_be_bytes(*found);
    if found != magic {
        return invalid(format!("expected idx magic {magic:#06x}, found {found:#06x}"));
    }

    let mut dims = [0; N];
    for dim in dims.iter_mut() {
        let Some((value, tail)) = rest.split_first_chunk::<4>() else {
            return invalid("idx header is truncated".into());
        };

        *dim = u32::from_be_bytes(*value) as usize;
        rest = tail;
    }

    let Some(expected) = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)) else {
        return invalid(format!("idx dimensions {dims:?} don't fit in memory"));
    };

    if rest.len() != expected {
        return invalid(format!(
            "idx dimensions {dims:?} need {expected} bytes, found {}",
            rest.len()
        ));
    }

    Ok((dims, rest))
}

/// Parses an idx3 image file, scaling each pixel from `0..=255` into `[0, 1]`.
///
/// # Returns
/// The shape of a single image and one flattened image per row.
pub fn parse_idx_images(bytes: &[u8]) -> Result<(ImageShape, Array2<f32>)> {
    let ([n, height, width], pixels) = header::<3>(bytes, IMAGES_MAGIC)?;
    let shape = ImageShape {
        channels: 1,
        height,
        width,
    };

    let data = pixels.iter().map(|&p| p as f32 / 255.).collect();
    Ok((shape, Array2::from_shape_vec((n, shape.len()), data)?))
}

/// Parses an idx1 label file.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<usize>> {
    let ([_], labels) = header::<1>(bytes, LABELS_MAGIC)?;
    Ok(labels.iter().map(|&l| l as usize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(magic: u32, dims: &[u32], data: &[u8]) -> Vec<u8> {
        let mut bytes = magic.to_be_bytes().to_vec();
        dims.iter()
            .for_each(|d| bytes.extend_from_slice(&d.to_be_bytes()));
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn images_are_scaled_and_flattened() {
        let bytes = idx(IMAGES_MAGIC, &[2, 1, 2], &[0, 255, 51, 102]);
        let (shape, images) = parse_idx_images(&bytes).unwrap();

        assert_eq!(
            shape,
            ImageShape {
                channels: 1,
                height: 1,
                width: 2
            }
        );
        assert_eq!(images.dim(), (2, 2));
        assert_eq!(images.row(0).to_vec(), vec![0., 1.]);
        assert!((images[[1, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn labels_are_read_in_order() {
        let bytes = idx(LABELS_MAGIC, &[3], &[7, 0, 9]);
        assert_eq!(parse_idx_labels(&bytes).unwrap(), vec![7, 0, 9]);
    }

    #[test]
    fn wrong_magic_or_length_is_rejected() {
        let bytes = idx(LABELS_MAGIC, &[1, 1, 1], &[0]);
        assert!(parse_idx_images(&bytes).is_err());

        let bytes = idx(LABELS_MAGIC, &[3], &[7, 0]);
        assert!(parse_idx_labels(&bytes).is_err());

        assert!(parse_idx_labels(&[0, 0]).is_err());
    }

    #[test]
    fn huge_dimensions_are_rejected() {
        let bytes = idx(IMAGES_MAGIC, &[u32::MAX; 3], &[0; 16]);
        let err = parse_idx_images(&bytes).unwrap_err();
        assert!(matches!(err, MlErr::InvalidDataset(_)));
    }
}
