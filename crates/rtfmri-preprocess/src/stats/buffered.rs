use crate::error::{PipelineError, Result};
use ndarray::{Array2, ArrayView1, Axis};

/// Append-only history of flattened samples, kept in arrival order.
///
/// Samples are stored contiguously, so appends are amortized O(1) and
/// [`get_array`](Self::get_array) copies the history once.
#[derive(Debug, Clone)]
pub struct BufferedArray {
    width: usize,
    data: Vec<f64>,
}

impl BufferedArray {
    /// Create an empty buffer for samples of `width` elements.
    pub fn new(width: usize) -> Self {
        Self::with_capacity(width, 0)
    }

    /// Create an empty buffer with room for `rows` samples.
    pub fn with_capacity(width: usize, rows: usize) -> Self {
        Self {
            width,
            data: Vec::with_capacity(width * rows),
        }
    }

    /// Append a copy of `sample`. A sample of the wrong width is rejected and
    /// the buffer is left unchanged.
    pub fn append<'a, I>(&mut self, sample: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let start = self.data.len();
        self.data.extend(sample);

        let appended = self.data.len() - start;
        if appended != self.width {
            self.data.truncate(start);
            return Err(PipelineError::ShapeMismatch {
                expected: vec![self.width],
                found: vec![appended],
            });
        }
        Ok(())
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Stored sample at `index`.
    pub fn row(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        let start = index.checked_mul(self.width)?;
        let end = start.checked_add(self.width)?;
        self.data.get(start..end).map(ArrayView1::from)
    }

    /// All samples stacked as a `(len, width)` matrix.
    pub fn get_array(&self) -> Array2<f64> {
        Array2::from_shape_vec((self.len(), self.width), self.data.clone())
            .unwrap_or_else(|_| Array2::zeros((0, self.width)))
    }

    /// Per-column population mean and standard deviation over the whole history.
    pub fn mean_std(&self) -> Option<(ndarray::Array1<f64>, ndarray::Array1<f64>)> {
        if self.is_empty() {
            return None;
        }
        let stacked = self.get_array();
        let mean = stacked.mean_axis(Axis(0))?;
        let std = stacked.std_axis(Axis(0), 0.0);
        Some((mean, std))
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_append_preserves_order() {
        let mut buffer = BufferedArray::new(2);
        buffer.append(&[1.0, 2.0]).unwrap();
        buffer.append(&[3.0, 4.0]).unwrap();

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get_array(), array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(buffer.row(1).unwrap(), array![3.0, 4.0]);
    }

    #[test]
    fn test_append_wrong_width_leaves_buffer_unchanged() {
        let mut buffer = BufferedArray::new(2);
        buffer.append(&[1.0, 2.0]).unwrap();

        let result = buffer.append(&[1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(PipelineError::ShapeMismatch { .. })));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get_array(), array![[1.0, 2.0]]);
    }

    #[test]
    fn test_mean_std_population() {
        let mut buffer = BufferedArray::new(2);
        buffer.append(&[1.0, 10.0]).unwrap();
        buffer.append(&[3.0, 10.0]).unwrap();

        let (mean, std) = buffer.mean_std().unwrap();
        assert_eq!(mean, array![2.0, 10.0]);
        assert_eq!(std, array![1.0, 0.0]);
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = BufferedArray::new(3);
        assert!(buffer.is_empty());
        assert!(buffer.mean_std().is_none());
        assert_eq!(buffer.get_array().shape(), &[0, 3]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = BufferedArray::new(1);
        buffer.append(&[1.0]).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
