//! Element-wise verification of a device result against the reference.
//!
//! A comparison never fails the run: mismatches are collected, the first
//! `max_listed` are kept for the diff listing and the rest are only counted.

use std::fmt;

use crate::error::{validation_error, Result};
use crate::matrix::Matrix;

/// Largest absolute difference accepted for any element.
pub const DEFAULT_TOLERANCE: f32 = 1.0e-6;

/// Mismatches kept for the diff listing.
pub const DEFAULT_MAX_LISTED: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyOptions {
    pub tolerance: f32,
    pub max_listed: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            tolerance: DEFAULT_TOLERANCE,
            max_listed: DEFAULT_MAX_LISTED,
        }
    }
}

/// One element outside the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub row: usize,
    pub col: usize,
    /// Reference value.
    pub expected: f32,
    /// Device value.
    pub actual: f32,
    pub diff: f32,
}

/// Outcome of comparing a result against the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub width: usize,
    pub height: usize,
    pub tolerance: f32,
    pub max_listed: usize,
    /// The first `max_listed` mismatches in row-major order.
    pub mismatches: Vec<Mismatch>,
    pub total_mismatches: usize,
    pub max_abs_diff: f32,
    /// `‖ref − res‖₂ / ‖ref‖₂`, zero when the reference is all zeros and
    /// the result matches it.
    pub l2_relative_error: f64,
}

impl Comparison {
    /// True when every element is within tolerance.
    pub fn passed(&self) -> bool {
        self.total_mismatches == 0
    }
}

/// Compares two row-major `height × width` buffers element by element.
pub fn compare(
    reference: &[f32],
    result: &[f32],
    width: usize,
    height: usize,
    options: &VerifyOptions,
) -> Result<Comparison> {
    let len = width * height;
    if reference.len() != len || result.len() != len {
        return Err(validation_error(format!(
            "cannot compare {} and {} elements as a {}x{} matrix",
            reference.len(),
            result.len(),
            height,
            width
        )));
    }

    let mut mismatches = Vec::new();
    let mut total_mismatches = 0;
    let mut max_abs_diff = 0.0f32;
    let mut err_sq = 0.0f64;
    let mut ref_sq = 0.0f64;

    for row in 0..height {
        for col in 0..width {
            let k = row * width + col;
            let expected = reference[k];
            let actual = result[k];
            let diff = (expected - actual).abs();

            err_sq += (expected as f64 - actual as f64).powi(2);
            ref_sq += (expected as f64).powi(2);

            // NaN differences fail this test too.
            if !(diff <= options.tolerance) {
                if mismatches.len() < options.max_listed {
                    mismatches.push(Mismatch {
                        row,
                        col,
                        expected,
                        actual,
                        diff,
                    });
                }
                total_mismatches += 1;
            }
            if diff > max_abs_diff || diff.is_nan() {
                max_abs_diff = diff;
            }
        }
    }

    let l2_relative_error = if ref_sq > 0.0 {
        (err_sq / ref_sq).sqrt()
    } else {
        err_sq.sqrt()
    };

    Ok(Comparison {
        width,
        height,
        tolerance: options.tolerance,
        max_listed: options.max_listed,
        mismatches,
        total_mismatches,
        max_abs_diff,
        l2_relative_error,
    })
}

/// Compares two matrices of the same shape.
pub fn compare_matrices(
    reference: &Matrix,
    result: &Matrix,
    options: &VerifyOptions,
) -> Result<Comparison> {
    if (reference.height(), reference.width()) != (result.height(), result.width()) {
        return Err(validation_error(format!(
            "reference is {}x{} but result is {}x{}",
            reference.height(),
            reference.width(),
            result.height(),
            result.width()
        )));
    }
    compare(
        reference.as_slice(),
        result.as_slice(),
        reference.width(),
        reference.height(),
        options,
    )
}

/// The bounded diff listing, grouped by row.
impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Listing first {} Differences > {:.6}...",
            self.max_listed, self.tolerance
        )?;
        let mut current_row = None;
        for m in &self.mismatches {
            if current_row != Some(m.row) {
                writeln!(f)?;
                writeln!(f, "  Row {}:", m.row)?;
                current_row = Some(m.row);
            }
            writeln!(
                f,
                "    Loc({},{})\tCPU={:.5}\tGPU={:.5}\tDiff={:.6}",
                m.col, m.row, m.expected, m.actual, m.diff
            )?;
        }
        writeln!(f)?;
        write!(f, "  Total Errors = {}", self.total_mismatches)
    }
}
