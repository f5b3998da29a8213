use serde::{Deserialize, Serialize};

/// Error returned when nested rows cannot form a rectangular matrix.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum MatrixShapeError {
    #[display("matrix must have at least one row and one column")]
    Empty,
    #[display("row {row} has {actual} columns, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Dense row-major `f32` matrix holding the weights of one network layer.
///
/// Row `i` holds the edge weights from input node `i` to every output node.
/// On disk the matrix is a nested array of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<Vec<f32>>", try_from = "Vec<Vec<f32>>")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl Matrix {
    /// Builds a `rows x cols` matrix by calling `f(row, col)` for each cell.
    ///
    /// # Panics
    ///
    /// Panics if `rows` or `cols` is zero.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f32,
    {
        assert!(rows > 0 && cols > 0, "matrix dimensions must be non-zero");
        let mut values = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                values.push(f(row, col));
            }
        }
        Self { rows, cols, values }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `(rows, cols)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        (row < self.rows && col < self.cols).then(|| self.values[row * self.cols + col])
    }

    /// All weights in row-major order.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Multiplies the row vector `input` (length `rows`) by this matrix.
    ///
    /// # Panics
    ///
    /// Panics if `input.len() != rows`.
    #[must_use]
    pub fn left_mul(&self, input: &[f32]) -> Vec<f32> {
        assert_eq!(input.len(), self.rows);
        let mut output = vec![0.0; self.cols];
        for (row, x) in self.values.chunks_exact(self.cols).zip(input) {
            for (out, w) in output.iter_mut().zip(row) {
                *out += x * w;
            }
        }
        output
    }
}

impl From<Matrix> for Vec<Vec<f32>> {
    fn from(matrix: Matrix) -> Self {
        matrix
            .values
            .chunks_exact(matrix.cols)
            .map(<[f32]>::to_vec)
            .collect()
    }
}

impl TryFrom<Vec<Vec<f32>>> for Matrix {
    type Error = MatrixShapeError;

    fn try_from(rows: Vec<Vec<f32>>) -> Result<Self, Self::Error> {
        let cols = rows.first().map_or(0, Vec::len);
        if cols == 0 {
            return Err(MatrixShapeError::Empty);
        }
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (row, row_values) in rows.iter().enumerate() {
            if row_values.len() != cols {
                return Err(MatrixShapeError::Ragged {
                    row,
                    expected: cols,
                    actual: row_values.len(),
                });
            }
            values.extend_from_slice(row_values);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_mul_includes_every_row() {
        // [1, 2] x [[1, 0, 2], [3, 1, 0]] = [7, 2, 2]
        let m = Matrix::try_from(vec![vec![1.0, 0.0, 2.0], vec![3.0, 1.0, 0.0]]).unwrap();
        assert_eq!(m.left_mul(&[1.0, 2.0]), vec![7.0, 2.0, 2.0]);
    }

    #[test]
    fn test_nested_rows_keep_layout() {
        let m = Matrix::from_fn(2, 3, |r, c| (r * 10 + c) as f32);
        assert_eq!(m.get(1, 2), Some(12.0));
        assert_eq!(m.get(2, 0), None);
        let nested: Vec<Vec<f32>> = m.clone().into();
        assert_eq!(nested, vec![vec![0.0, 1.0, 2.0], vec![10.0, 11.0, 12.0]]);
        assert_eq!(Matrix::try_from(nested).unwrap(), m);
    }

    #[test]
    fn test_rejects_ragged_and_empty_rows() {
        assert_eq!(
            Matrix::try_from(vec![vec![1.0, 2.0], vec![3.0]]),
            Err(MatrixShapeError::Ragged {
                row: 1,
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(Matrix::try_from(vec![]), Err(MatrixShapeError::Empty));
        assert_eq!(Matrix::try_from(vec![vec![]]), Err(MatrixShapeError::Empty));
    }
}
