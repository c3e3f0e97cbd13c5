use super::{nan_mean, nan_std};
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis, s};

/// Fixed-capacity FIFO of the most recent samples.
///
/// Slots that have not been filled yet hold NaN and are ignored by the
/// statistics, so [`mean`](Self::mean) and [`std`](Self::std) are defined
/// before the window fills.
#[derive(Debug, Clone)]
pub struct RunningWindow {
    samples: Array2<f64>,
    filled: usize,
}

impl RunningWindow {
    /// Window of `capacity` samples, each `width` elements wide.
    pub fn new(capacity: usize, width: usize) -> Self {
        Self {
            samples: Array2::from_elem((capacity, width), f64::NAN),
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.nrows()
    }

    pub fn width(&self) -> usize {
        self.samples.ncols()
    }

    /// Number of real samples currently held.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Discard the oldest sample and append `sample` as the newest.
    pub fn push(&mut self, sample: ArrayView1<'_, f64>) -> Result<()> {
        if sample.len() != self.width() {
            return Err(PipelineError::ShapeMismatch {
                expected: vec![self.width()],
                found: vec![sample.len()],
            });
        }

        let capacity = self.capacity();
        if capacity == 0 {
            return Ok(());
        }

        let newer = self.samples.slice(s![1.., ..]).to_owned();
        self.samples.slice_mut(s![..capacity - 1, ..]).assign(&newer);
        self.samples.row_mut(capacity - 1).assign(&sample);
        self.filled = (self.filled + 1).min(capacity);
        Ok(())
    }

    /// Per-column mean ignoring unfilled slots.
    pub fn mean(&self) -> Array1<f64> {
        self.samples
            .axis_iter(Axis(1))
            .map(|column| nan_mean(column.iter().copied()))
            .collect()
    }

    /// Per-column population standard deviation ignoring unfilled slots.
    pub fn std(&self) -> Array1<f64> {
        self.samples
            .axis_iter(Axis(1))
            .map(|column| nan_std(column.iter().copied()))
            .collect()
    }

    /// Mark every slot unfilled.
    pub fn clear(&mut self) {
        self.samples.fill(f64::NAN);
        self.filled = 0;
    }

    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_new_window_is_nan() {
        let window = RunningWindow::new(3, 2);
        assert!(window.samples().iter().all(|v| v.is_nan()));
        assert!(window.mean().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_partial_window_statistics_ignore_unfilled_slots() {
        let mut window = RunningWindow::new(3, 1);
        window.push(array![2.0].view()).unwrap();
        window.push(array![4.0].view()).unwrap();

        assert_eq!(window.filled(), 2);
        assert_eq!(window.mean(), array![3.0]);
        assert_eq!(window.std(), array![1.0]);
    }

    #[test]
    fn test_push_discards_oldest() {
        let mut window = RunningWindow::new(2, 1);
        window.push(array![1.0].view()).unwrap();
        window.push(array![2.0].view()).unwrap();
        window.push(array![6.0].view()).unwrap();

        assert_eq!(window.samples(), &array![[2.0], [6.0]]);
        assert_eq!(window.mean(), array![4.0]);
        assert_eq!(window.filled(), 2);
    }

    #[test]
    fn test_push_wrong_width_is_rejected() {
        let mut window = RunningWindow::new(2, 2);
        window.push(array![1.0, 2.0].view()).unwrap();

        let result = window.push(array![1.0].view());
        assert!(result.is_err());
        assert_eq!(window.filled(), 1);
        assert_eq!(window.mean(), array![1.0, 2.0]);
    }

    #[test]
    fn test_clear() {
        let mut window = RunningWindow::new(2, 1);
        window.push(array![1.0].view()).unwrap();
        window.clear();
        assert_eq!(window.filled(), 0);
        assert!(window.mean()[0].is_nan());
    }
}
