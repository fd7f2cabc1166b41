//! Dense row-major `f32` matrices.
//!
//! Element `(i, j)` lives at `data[i * width + j]`. Matrices are plain owned
//! buffers; there is no stride or view support because the kernel and the
//! reference both operate on whole, contiguous matrices.

use rand::Rng;

use crate::error::{validation_error, Result};

/// Index of element `(i, j)` in a row-major buffer with `width` columns.
#[inline(always)]
pub fn at(i: usize, j: usize, width: usize) -> usize {
    i * width + j
}

/// Number of elements of a `height × width` matrix.
///
/// # Panics
/// Panics if the count does not fit in `usize`.
fn element_count(height: usize, width: usize) -> usize {
    height
        .checked_mul(width)
        .unwrap_or_else(|| panic!("a {height}x{width} matrix overflows usize"))
}

/// A contiguous row-major matrix of single-precision values.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl Matrix {
    /// Creates a zero-filled `height × width` matrix.
    pub fn new(height: usize, width: usize) -> Self {
        Self::filled(height, width, 0.0)
    }

    /// Creates a matrix with every element set to `value`.
    pub fn filled(height: usize, width: usize, value: f32) -> Self {
        Matrix {
            data: vec![value; element_count(height, width)],
            width,
            height,
        }
    }

    /// Wraps an existing row-major buffer.
    ///
    /// Fails if `data.len()` is not `height * width`.
    pub fn from_vec(height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if height.checked_mul(width) != Some(data.len()) {
            return Err(validation_error(format!(
                "buffer of {} elements cannot hold a {}x{} matrix",
                data.len(),
                height,
                width
            )));
        }
        Ok(Matrix {
            data,
            width,
            height,
        })
    }

    /// Builds a matrix by evaluating `f(row, col)` for every element.
    pub fn from_fn(height: usize, width: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(element_count(height, width));
        for i in 0..height {
            for j in 0..width {
                data.push(f(i, j));
            }
        }
        Matrix {
            data,
            width,
            height,
        }
    }

    /// The `n × n` identity matrix.
    pub fn identity(n: usize) -> Self {
        Self::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 })
    }

    /// Fills a new matrix with independent uniform values in `[0, 1)` drawn
    /// from `rng`, in row-major order.
    ///
    /// Callers that need reproducible inputs seed one generator and draw
    /// every matrix from it in a fixed order.
    pub fn random<R: Rng + ?Sized>(height: usize, width: usize, rng: &mut R) -> Self {
        let data = (0..element_count(height, width)).map(|_| rng.random::<f32>()).collect();
        Matrix {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at `(row, col)`.
    ///
    /// # Panics
    /// Panics if the position is outside the matrix.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        assert!(row < self.height && col < self.width, "({row}, {col}) out of bounds");
        self.data[at(row, col, self.width)]
    }

    /// Overwrites the element at `(row, col)`.
    ///
    /// # Panics
    /// Panics if the position is outside the matrix.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        assert!(row < self.height && col < self.width, "({row}, {col}) out of bounds");
        self.data[at(row, col, self.width)] = value;
    }

    /// Row `i` as a slice of `width` elements.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Checks the multiply shape constraint and returns the `(height, width)`
    /// of `a × b`.
    pub fn check_multiply(a: &Matrix, b: &Matrix) -> Result<(usize, usize)> {
        if a.width != b.height {
            return Err(validation_error(format!(
                "A has {} columns but B has {} rows",
                a.width, b.height
            )));
        }
        Ok((a.height, b.width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_row_major_indexing() {
        // 2x3
        // 0 1 2
        // 3 4 5
        assert_eq!(at(0, 0, 3), 0);
        assert_eq!(at(0, 2, 3), 2);
        assert_eq!(at(1, 0, 3), 3);
        assert_eq!(at(1, 2, 3), 5);

        let m = Matrix::from_fn(2, 3, |i, j| (i * 3 + j) as f32);
        assert_eq!(m.as_slice(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(m.get(1, 2), 5.0);
        assert_eq!(m.row(1), &[3.0, 4.0, 5.0]);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Matrix::from_vec(2, 2, vec![1.0; 4]).is_ok());
        assert!(Matrix::from_vec(2, 2, vec![1.0; 5]).is_err());
        // The product wraps to 0 without a checked multiply.
        assert!(Matrix::from_vec(1 << 33, 1 << 31, Vec::new()).is_err());
    }

    #[test]
    #[should_panic(expected = "overflows usize")]
    fn test_overflowing_dimensions_panic() {
        Matrix::new(usize::MAX, 2);
    }

    #[test]
    fn test_identity() {
        let m = Matrix::identity(4);
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(m.get(i, j), if i == j { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn test_random_values_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(2006);
        let m = Matrix::random(32, 48, &mut rng);
        assert_eq!(m.len(), 32 * 48);
        assert!(m.as_slice().iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_random_is_reproducible_for_same_seed() {
        let mut rng1 = StdRng::seed_from_u64(2006);
        let mut rng2 = StdRng::seed_from_u64(2006);
        assert_eq!(
            Matrix::random(16, 16, &mut rng1),
            Matrix::random(16, 16, &mut rng2)
        );

        let mut rng3 = StdRng::seed_from_u64(2007);
        let mut rng4 = StdRng::seed_from_u64(2006);
        assert_ne!(
            Matrix::random(16, 16, &mut rng3),
            Matrix::random(16, 16, &mut rng4)
        );
    }

    #[test]
    fn test_check_multiply() {
        let a = Matrix::new(4, 3);
        let b = Matrix::new(3, 5);
        assert_eq!(Matrix::check_multiply(&a, &b).unwrap(), (4, 5));
        assert!(Matrix::check_multiply(&b, &a).is_err());
    }

    #[test]
    #[should_panic]
    fn test_get_out_of_bounds_panics() {
        let m = Matrix::new(2, 2);
        m.get(2, 0);
    }
}
