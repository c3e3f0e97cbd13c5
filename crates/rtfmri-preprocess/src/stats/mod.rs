//! Online statistics used by the streaming steps.
//!
//! - [`BufferedArray`]: append-only history of flattened samples
//! - [`RunningWindow`]: fixed-length, NaN-initialized window of recent samples
//! - [`zscore`]: standardization with a "no history yet" sentinel
//!
//! Non-finite results (zero standard deviation, empty windows) are returned
//! as-is; callers downstream decide what to do with them.

mod buffered;
mod window;

pub use buffered::BufferedArray;
pub use window::RunningWindow;

use crate::error::{PipelineError, Result};
use ndarray::{ArrayD, ArrayViewD};

/// Mean of the non-NaN values, NaN if there are none.
pub fn nan_mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Population standard deviation of the non-NaN values, NaN if there are none.
pub fn nan_std<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let finite: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }

    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64;
    variance.sqrt()
}

/// Standardize `array` with precomputed statistics.
///
/// `None` statistics mean there is no history yet and yield a zero array of
/// the same shape. `mean` and `std` must hold as many elements as `array`;
/// they are matched in row-major order. A zero `std` produces non-finite
/// values.
pub fn zscore(
    array: ArrayViewD<'_, f64>,
    stats: Option<(ArrayViewD<'_, f64>, ArrayViewD<'_, f64>)>,
) -> Result<ArrayD<f64>> {
    let Some((mean, std)) = stats else {
        return Ok(ArrayD::zeros(array.raw_dim()));
    };

    for stat in [&mean, &std] {
        if stat.len() != array.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: array.shape().to_vec(),
                found: stat.shape().to_vec(),
            });
        }
    }

    let values: Vec<f64> = array
        .iter()
        .zip(mean.iter())
        .zip(std.iter())
        .map(|((x, m), s)| (x - m) / s)
        .collect();

    Ok(ArrayD::from_shape_vec(array.raw_dim(), values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nan_mean_ignores_nan() {
        assert_eq!(nan_mean([1.0, f64::NAN, 3.0]), 2.0);
    }

    #[test]
    fn test_nan_mean_all_nan() {
        assert!(nan_mean([f64::NAN, f64::NAN]).is_nan());
    }

    #[test]
    fn test_nan_std_population() {
        // Values 2, 4: mean 3, population variance 1
        assert_eq!(nan_std([2.0, f64::NAN, 4.0]), 1.0);
    }

    #[test]
    fn test_zscore_without_history_is_zero() {
        let x = array![5.0].into_dyn();
        let z = zscore(x.view(), None).unwrap();
        assert_eq!(z, array![0.0].into_dyn());
    }

    #[test]
    fn test_zscore_basic() {
        let x = array![5.0].into_dyn();
        let mean = array![3.0].into_dyn();
        let std = array![2.0].into_dyn();
        let z = zscore(x.view(), Some((mean.view(), std.view()))).unwrap();
        assert_eq!(z, array![1.0].into_dyn());
    }

    #[test]
    fn test_zscore_zero_std_is_not_finite() {
        let x = array![5.0, 3.0].into_dyn();
        let mean = array![3.0, 3.0].into_dyn();
        let std = array![0.0, 0.0].into_dyn();
        let z = zscore(x.view(), Some((mean.view(), std.view()))).unwrap();
        assert!(z[[0]].is_infinite());
        assert!(z[[1]].is_nan());
    }

    #[test]
    fn test_zscore_matches_flat_statistics_to_shaped_array() {
        let x = array![[1.0, 2.0], [3.0, 4.0]].into_dyn();
        let mean = array![1.0, 1.0, 1.0, 1.0].into_dyn();
        let std = array![1.0, 1.0, 1.0, 2.0].into_dyn();
        let z = zscore(x.view(), Some((mean.view(), std.view()))).unwrap();
        assert_eq!(z, array![[0.0, 1.0], [2.0, 1.5]].into_dyn());
    }

    #[test]
    fn test_zscore_length_mismatch() {
        let x = array![1.0, 2.0].into_dyn();
        let mean = array![1.0].into_dyn();
        let std = array![1.0].into_dyn();
        let result = zscore(x.view(), Some((mean.view(), std.view())));
        assert!(matches!(result, Err(PipelineError::ShapeMismatch { .. })));
    }
}
