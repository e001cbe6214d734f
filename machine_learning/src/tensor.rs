//! Conversions between matrices and the flat row-major buffers they travel in.

use std::borrow::Cow;

use ndarray::Array2;

use crate::{MlErr, Result};

/// Gives the row-major contents of `x`, copying only if it isn't laid out that way.
pub fn row_major(x: &Array2<f32>) -> Cow<'_, [f32]> {
    match x.as_slice() {
        Some(raw) => Cow::Borrowed(raw),
        None => Cow::Owned(x.iter().copied().collect()),
    }
}

/// Rebuilds a `(rows, data.len() / rows)` matrix out of a flat buffer.
///
/// # Returns
/// The matrix, or an error if there are no rows or `data` can't be evenly split in them.
pub fn from_rows(rows: usize, data: &[f32]) -> Result<Array2<f32>> {
    if rows == 0 || data.len() % rows != 0 {
        return Err(MlErr::SizeMismatch {
            what: "tensor rows",
            got: rows,
            expected: rows.max(1),
        });
    }

    Ok(Array2::from_shape_vec((rows, data.len() / rows), data.to_vec())?)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn transposed_views_are_copied_in_row_order() {
        let x = array![[1., 2.], [3., 4.]];
        assert!(matches!(row_major(&x), Cow::Borrowed(_)));

        let t = x.t().to_owned();
        assert_eq!(&*row_major(&t), &[1., 3., 2., 4.]);

        let rebuilt = from_rows(2, &row_major(&t)).unwrap();
        assert_eq!(rebuilt, t);
    }

    #[test]
    fn ragged_or_empty_tensors_are_rejected() {
        assert!(from_rows(0, &[]).is_err());
        assert!(from_rows(2, &[1., 2., 3.]).is_err());
    }
}
