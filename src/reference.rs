//! Single-threaded reference multiplier.
//!
//! Accumulates every dot product in `f64` and narrows once per element, so
//! its results are at least as accurate as the device kernel's `f32`
//! accumulation. Used as the oracle when verifying device results.

use crate::error::{validation_error, Result};
use crate::matrix::Matrix;

/// Computes `C = A × B` into `c`.
///
/// `a` is `height × width_a`, `b` is `width_a × width_b` and `c` is
/// `height × width_b`, all row-major.
pub fn matmul_into(
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    height: usize,
    width_a: usize,
    width_b: usize,
) -> Result<()> {
    if a.len() != height * width_a || b.len() != width_a * width_b || c.len() != height * width_b
    {
        return Err(validation_error(format!(
            "slices of {}, {} and {} elements do not fit {}x{} by {}x{}",
            a.len(),
            b.len(),
            c.len(),
            height,
            width_a,
            width_a,
            width_b
        )));
    }

    for i in 0..height {
        for j in 0..width_b {
            let mut sum = 0.0f64;
            for k in 0..width_a {
                let x = a[i * width_a + k] as f64;
                let y = b[k * width_b + j] as f64;
                sum += x * y;
            }
            c[i * width_b + j] = sum as f32;
        }
    }
    Ok(())
}

/// Computes `A × B` as a new matrix.
pub fn matmul(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    let (height, width_b) = Matrix::check_multiply(a, b)?;
    let mut c = Matrix::new(height, width_b);
    matmul_into(
        a.as_slice(),
        b.as_slice(),
        c.as_mut_slice(),
        height,
        a.width(),
        width_b,
    )?;
    Ok(c)
}
