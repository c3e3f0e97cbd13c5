//! Index composition for nested boolean masks.
//!
//! All functions use row-major raster order. A vector "restricted to `m1`"
//! holds one element per true position of `m1`, in raster order.

use crate::error::{PipelineError, Result};
use crate::types::Mask;
use ndarray::{Array1, ArrayViewD};

/// Number of true positions in `mask`.
pub fn count_true(mask: &Mask) -> usize {
    mask.iter().filter(|&&v| v).count()
}

/// Ordinals, within `m1`'s true positions, of the positions also true in `m2`.
///
/// Applying the result to a vector already restricted to `m1` yields the
/// elements under `m1 & m2`, ordered as in `m1`.
pub fn secondary_mask(m1: &Mask, m2: &Mask) -> Result<Vec<usize>> {
    if m1.shape() != m2.shape() {
        return Err(PipelineError::ShapeMismatch {
            expected: m1.shape().to_vec(),
            found: m2.shape().to_vec(),
        });
    }

    Ok(m1
        .iter()
        .zip(m2.iter())
        .filter(|&(&in_first, _)| in_first)
        .enumerate()
        .filter_map(|(ordinal, (_, &in_second))| in_second.then_some(ordinal))
        .collect())
}

/// Flatten the voxels of `volume` selected by `mask`, in raster order.
pub fn apply_mask(volume: ArrayViewD<'_, f64>, mask: &Mask) -> Result<Array1<f64>> {
    if volume.shape() != mask.shape() {
        return Err(PipelineError::ShapeMismatch {
            expected: mask.shape().to_vec(),
            found: volume.shape().to_vec(),
        });
    }

    Ok(volume
        .iter()
        .zip(mask.iter())
        .filter_map(|(&value, &keep)| keep.then_some(value))
        .collect())
}

/// Select `indices` from a vector restricted to a primary mask.
///
/// `expected_len` is the primary mask's true count; a vector of another
/// length was not produced by that mask.
pub fn project<'a, I>(vector: I, indices: &[usize], expected_len: usize) -> Result<Array1<f64>>
where
    I: IntoIterator<Item = &'a f64>,
{
    let values: Vec<f64> = vector.into_iter().copied().collect();
    if values.len() != expected_len {
        return Err(PipelineError::ShapeMismatch {
            expected: vec![expected_len],
            found: vec![values.len()],
        });
    }
    Ok(indices.iter().map(|&i| values[i]).collect())
}
