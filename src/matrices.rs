use std::ops::Range;

use rand::Rng;

use crate::error::{Error, Result};

/// Row-major dense matrix. Weight matrices are stored `[out_channels, in_channels]`.
#[derive(PartialEq, Debug, Clone)]
pub struct Matrix<T> {
    pub data: Vec<T>,
    pub rows: usize,
    pub cols: usize,
}

impl<T> Matrix<T>
where
    T: Copy + Default,
{
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![T::default(); rows * cols],
            rows,
            cols,
        }
    }

    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::DimensionMismatch {
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    pub fn transpose(&self) -> Self {
        let mut transposed = Matrix::new(self.cols, self.rows);

        for i in 0..self.rows {
            for j in 0..self.cols {
                transposed.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }

        transposed
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Matrix<f32> {
    pub fn random(rows: usize, cols: usize, range: Range<f32>, rng: &mut impl Rng) -> Self {
        let size = rows * cols;
        let mut data = Vec::<f32>::with_capacity(size);

        for _ in 0..size {
            data.push(rng.random_range(range.clone()));
        }

        Matrix { data, rows, cols }
    }

    pub fn random_square(dimension: usize, range: Range<f32>) -> Self {
        Self::random(dimension, dimension, range, &mut rand::rng())
    }

    /// Smallest and largest value, NaNs ignored. An empty matrix yields `(0.0, 0.0)`.
    pub fn min_and_max(&self) -> (f32, f32) {
        min_and_max(&self.data)
    }

    pub fn row_min_and_max(&self, i: usize) -> (f32, f32) {
        min_and_max(self.row(i))
    }

    /// `self * x` for a column vector `x` of length `cols`.
    pub fn matvec(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.cols {
            return Err(Error::DimensionMismatch {
                expected: self.cols,
                actual: x.len(),
            });
        }

        Ok((0..self.rows)
            .map(|i| {
                self.row(i)
                    .iter()
                    .zip(x.iter())
                    .map(|(&w, &v)| w * v)
                    .sum::<f32>()
            })
            .collect())
    }
}

pub fn min_and_max(values: &[f32]) -> (f32, f32) {
    let (min, max) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn transpose_non_square() {
        let m = Matrix::from_vec(vec![1., 2., 3., 4., 5., 6.], 2, 3).unwrap();

        let expected = Matrix::from_vec(vec![1., 4., 2., 5., 3., 6.], 3, 2).unwrap();
        assert_eq!(expected, m.transpose());
        assert_eq!(m, m.transpose().transpose());
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = Matrix::from_vec(vec![1.0f32; 5], 2, 3).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn min_and_max_per_row() {
        let m = Matrix::from_vec(vec![-1., 3., 0.5, 7., 2., -4.], 2, 3).unwrap();

        assert_eq!((-4.0, 7.0), m.min_and_max());
        assert_eq!((-1.0, 3.0), m.row_min_and_max(0));
        assert_eq!((-4.0, 7.0), m.row_min_and_max(1));
    }

    #[test]
    fn min_and_max_skips_nan_and_handles_empty() {
        assert_eq!((1.0, 2.0), min_and_max(&[f32::NAN, 2.0, 1.0]));
        assert_eq!((0.0, 0.0), min_and_max(&[]));
    }

    #[test]
    fn matvec_odd_shape() {
        let m = Matrix::from_vec(vec![1., 2., 3., 4., 5., 6.], 2, 3).unwrap();

        assert_eq!(vec![14., 32.], m.matvec(&[1., 2., 3.]).unwrap());
        assert!(m.matvec(&[1., 2.]).is_err());
    }

    #[test]
    fn random_respects_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = Matrix::random(4, 9, -0.5..0.5, &mut rng);

        assert_eq!(36, m.len());
        assert!(m.data.iter().all(|v| (-0.5..0.5).contains(v)));
    }
}
