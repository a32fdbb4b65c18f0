use std::{
    fmt,
    ops::{Index, IndexMut},
    slice::{ChunksExact, ChunksExactMut},
};

use thiserror::Error;

/// Dense, owned `f64` array of rank `D` stored in row-major order.
///
/// The last axis is contiguous, so a "row" (or lane) is everything
/// obtained by fixing the first `D - 1` indices.
#[derive(Clone, PartialEq)]
pub struct Array<const D: usize> {
    shape: [usize; D],
    data: Box<[f64]>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArrayError {
    #[error("buffer of length {len} does not fit shape {shape:?}")]
    WrongLength { shape: Vec<usize>, len: usize },
    #[error("nested input is ragged along axis {axis}")]
    Ragged { axis: usize },
}

impl<const D: usize> Array<D> {
    #[must_use]
    pub fn zeros(shape: [usize; D]) -> Self {
        Self::filled(shape, 0.0)
    }

    #[must_use]
    pub fn filled(shape: [usize; D], value: f64) -> Self {
        Self {
            shape,
            data: vec![value; shape.iter().product()].into_boxed_slice(),
        }
    }

    /// Build an array by evaluating `f` at every multi-index.
    #[must_use]
    pub fn from_fn(shape: [usize; D], mut f: impl FnMut([usize; D]) -> f64) -> Self {
        let len = shape.iter().product();
        let data = (0..len).map(|offset| f(unravel(shape, offset))).collect();
        Self { shape, data }
    }

    /// Wrap a flat row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer length does not match the shape.
    pub fn from_flat(shape: [usize; D], data: Vec<f64>) -> Result<Self, ArrayError> {
        if data.len() != shape.iter().product::<usize>() {
            return Err(ArrayError::WrongLength {
                shape: shape.to_vec(),
                len: data.len(),
            });
        }
        Ok(Self {
            shape,
            data: data.into_boxed_slice(),
        })
    }

    #[must_use]
    pub const fn shape(&self) -> [usize; D] {
        self.shape
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    const fn row_len(&self) -> usize {
        self.shape[D - 1]
    }

    /// Iterate over all rows along the last axis.
    ///
    /// # Panics
    ///
    /// Panics if the last axis has length zero.
    pub fn rows(&self) -> ChunksExact<'_, f64> {
        self.data.chunks_exact(self.row_len())
    }

    /// Iterate mutably over all rows along the last axis.
    ///
    /// # Panics
    ///
    /// Panics if the last axis has length zero.
    pub fn rows_mut(&mut self) -> ChunksExactMut<'_, f64> {
        let row_len = self.row_len();
        self.data.chunks_exact_mut(row_len)
    }

    /// The row selected by fixing every axis except the last.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` does not name exactly `D - 1` in-bounds indices.
    #[must_use]
    pub fn row(&self, prefix: &[usize]) -> &[f64] {
        let start = self.row_offset(prefix);
        &self.data[start..start + self.row_len()]
    }

    fn row_offset(&self, prefix: &[usize]) -> usize {
        assert_eq!(
            prefix.len() + 1,
            D,
            "row of a rank {D} array needs {} indices",
            D - 1
        );
        prefix
            .iter()
            .zip(&self.shape)
            .fold(0, |offset, (&i, &n)| {
                assert!(i < n, "index {prefix:?} out of bounds for shape {:?}", self.shape);
                offset * n + i
            })
            * self.row_len()
    }

    fn offset(&self, index: [usize; D]) -> usize {
        index.iter().zip(&self.shape).fold(0, |offset, (&i, &n)| {
            assert!(i < n, "index {index:?} out of bounds for shape {:?}", self.shape);
            offset * n + i
        })
    }

    /// Smallest and largest entry, or `None` for an empty array.
    #[must_use]
    pub fn bounds(&self) -> Option<(f64, f64)> {
        if self.data.is_empty() {
            return None;
        }
        Some(self.data.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), &x| (min.min(x), max.max(x)),
        ))
    }
}

fn unravel<const D: usize>(shape: [usize; D], mut offset: usize) -> [usize; D] {
    let mut index = [0; D];
    for axis in (0..D).rev() {
        index[axis] = offset % shape[axis];
        offset /= shape[axis];
    }
    index
}

impl<const D: usize> Index<[usize; D]> for Array<D> {
    type Output = f64;

    fn index(&self, index: [usize; D]) -> &Self::Output {
        &self.data[self.offset(index)]
    }
}

impl<const D: usize> IndexMut<[usize; D]> for Array<D> {
    fn index_mut(&mut self, index: [usize; D]) -> &mut Self::Output {
        let offset = self.offset(index);
        &mut self.data[offset]
    }
}

impl<const D: usize> fmt::Debug for Array<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .finish()
    }
}

fn check_lengths<'a, T: 'a>(
    items: impl IntoIterator<Item = &'a Vec<T>>,
    axis: usize,
) -> Result<usize, ArrayError> {
    let mut items = items.into_iter();
    let len = items.next().map_or(0, Vec::len);
    if items.all(|item| item.len() == len) {
        Ok(len)
    } else {
        Err(ArrayError::Ragged { axis })
    }
}

impl TryFrom<Vec<Vec<f64>>> for Array<2> {
    type Error = ArrayError;

    fn try_from(value: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        let n1 = check_lengths(&value, 1)?;
        let shape = [value.len(), n1];
        Self::from_flat(shape, value.into_iter().flatten().collect())
    }
}

impl TryFrom<Vec<Vec<Vec<f64>>>> for Array<3> {
    type Error = ArrayError;

    fn try_from(value: Vec<Vec<Vec<f64>>>) -> Result<Self, Self::Error> {
        let n1 = check_lengths(&value, 1)?;
        let n2 = check_lengths(value.iter().flatten(), 2)?;
        let shape = [value.len(), n1, n2];
        Self::from_flat(shape, value.into_iter().flatten().flatten().collect())
    }
}

impl TryFrom<Vec<Vec<Vec<Vec<f64>>>>> for Array<4> {
    type Error = ArrayError;

    fn try_from(value: Vec<Vec<Vec<Vec<f64>>>>) -> Result<Self, Self::Error> {
        let n1 = check_lengths(&value, 1)?;
        let n2 = check_lengths(value.iter().flatten(), 2)?;
        let n3 = check_lengths(value.iter().flatten().flatten(), 3)?;
        let shape = [value.len(), n1, n2, n3];
        Self::from_flat(
            shape,
            value.into_iter().flatten().flatten().flatten().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Array, ArrayError};

    #[test]
    fn row_major_layout() {
        let array = Array::from_fn([2, 3, 4], |[i, j, k]| (100 * i + 10 * j + k) as f64);
        assert_eq!(array[[1, 2, 3]], 123.0);
        assert_eq!(array.row(&[1, 0]), &[100.0, 101.0, 102.0, 103.0]);
        assert_eq!(array.rows().count(), 6);
        assert_eq!(array.bounds(), Some((0.0, 123.0)));
    }

    #[test]
    fn nested_conversion() {
        let array = Array::<3>::try_from(vec![
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            vec![vec![5.0, 6.0], vec![7.0, 8.0]],
        ])
        .unwrap();
        assert_eq!(array.shape(), [2, 2, 2]);
        assert_eq!(array[[1, 0, 1]], 6.0);

        let ragged = Array::<2>::try_from(vec![vec![1.0, 2.0], vec![3.0]]);
        assert_eq!(ragged, Err(ArrayError::Ragged { axis: 1 }));
    }

    #[test]
    fn flat_length_is_checked() {
        assert!(Array::from_flat([2, 2], vec![0.0; 3]).is_err());
        assert!(Array::from_flat([2, 2], vec![0.0; 4]).is_ok());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_panics() {
        let array = Array::zeros([2, 2]);
        let _ = array[[0, 2]];
    }
}
