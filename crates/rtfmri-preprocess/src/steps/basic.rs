//! Stateless reshaping and reduction steps.

use super::{Step, StepArgs, StepContext, array_input, expect_inputs};
use crate::error::{PipelineError, Result};
use crate::stats::nan_mean;
use crate::types::{Params, Value};
use ndarray::{Array2, ArrayD, Axis, Ix3, s};
use serde_json::json;
use tracing::debug;

// ============================================================================
// Debug
// ============================================================================

/// Passthrough that reports what it received: `(summary, shape)`.
#[derive(Debug, Clone)]
pub struct DebugStep {
    params: Params,
}

impl DebugStep {
    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        Ok(Self {
            params: args.keyword().clone(),
        })
    }
}

fn summarize(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(text) => text.clone(),
        other => format!("{} {:?}", other.kind(), other.shape()),
    }
}

impl Step for DebugStep {
    fn class_name(&self) -> &'static str {
        "Debug"
    }

    fn output_count(&self) -> usize {
        2
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let summary = summarize(&inputs[0]);
        debug!("Debug: {}", summary);
        Ok(vec![Value::Text(summary), Value::Shape(inputs[0].shape())])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Volume to array
// ============================================================================

/// Extract a volume's voxel data. Axes are reversed by default so that a
/// scanner-ordered `(x, y, z)` volume becomes slice-major `(z, y, x)`.
#[derive(Debug, Clone)]
pub struct VolumeToArray {
    transpose: bool,
    params: Params,
}

impl VolumeToArray {
    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        let transpose = args.bool_or(0, "transpose", true)?;
        Ok(Self {
            transpose,
            params: args.describe([("transpose", json!(transpose))]),
        })
    }
}

impl Step for VolumeToArray {
    fn class_name(&self) -> &'static str {
        "VolumeToArray"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let data = array_input(self.class_name(), inputs, 0)?;
        let array = if self.transpose {
            data.reversed_axes().as_standard_layout().into_owned()
        } else {
            data.to_owned()
        };
        Ok(vec![Value::Array(array)])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Mosaic
// ============================================================================

/// Tile the slices of a 3-D array along `dim` into a near-square 2-D image.
///
/// Tiles fill row by row; tiles past the last slice are NaN.
#[derive(Debug, Clone)]
pub struct VolumeToMosaic {
    dim: usize,
    params: Params,
}

impl VolumeToMosaic {
    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        let dim = args.usize_or(0, "dim", 0)?;
        if dim > 2 {
            return Err(PipelineError::Configuration(format!(
                "mosaic dimension must be 0, 1 or 2, got {}",
                dim
            )));
        }
        Ok(Self {
            dim,
            params: args.describe([("dim", json!(dim))]),
        })
    }
}

/// Tiles per row and per column for `n` slices.
fn mosaic_grid(n: usize) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let cols = (n as f64).sqrt().ceil() as usize;
    let rows = n.div_ceil(cols);
    (rows, cols)
}

impl Step for VolumeToMosaic {
    fn class_name(&self) -> &'static str {
        "VolumeToMosaic"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let data = array_input(self.class_name(), inputs, 0)?;
        let volume = data.into_dimensionality::<Ix3>().map_err(|_| {
            PipelineError::InvalidInput(format!(
                "VolumeToMosaic expects a 3-D array, got shape {:?}",
                inputs[0].shape()
            ))
        })?;

        let mut tile = volume.shape().to_vec();
        let slices = tile.remove(self.dim);
        let (height, width) = (tile[0], tile[1]);
        let (rows, cols) = mosaic_grid(slices);

        let mut mosaic = Array2::from_elem((rows * height, cols * width), f64::NAN);
        for (i, slice) in volume.axis_iter(Axis(self.dim)).enumerate() {
            let (r, c) = (i / cols, i % cols);
            mosaic
                .slice_mut(s![r * height..(r + 1) * height, c * width..(c + 1) * width])
                .assign(&slice);
        }

        Ok(vec![Value::Array(mosaic.into_dyn())])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Mean
// ============================================================================

/// Mean over the configured axes, or over everything when none are given.
///
/// Negative axes count from the end. A result with no remaining axes is
/// returned as a float.
#[derive(Debug, Clone)]
pub struct ReduceMean {
    dimensions: Option<Vec<i64>>,
    params: Params,
}

impl ReduceMean {
    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        let dimensions = args.optional_int_list(0, "dimensions")?;
        if let Some(dims) = &dimensions {
            let mut sorted = dims.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != dims.len() {
                return Err(PipelineError::Configuration(format!(
                    "repeated axis in dimensions {:?}",
                    dims
                )));
            }
        }
        Ok(Self {
            params: args.describe([("dimensions", json!(dimensions))]),
            dimensions,
        })
    }

    /// Resolve configured axes against an array of `ndim` dimensions,
    /// returned in descending order.
    fn resolve_axes(&self, dims: &[i64], ndim: usize) -> Result<Vec<usize>> {
        let mut axes = dims
            .iter()
            .map(|&d| {
                let resolved = if d < 0 { d + ndim as i64 } else { d };
                if resolved < 0 || resolved >= ndim as i64 {
                    Err(PipelineError::InvalidInput(format!(
                        "axis {} is out of bounds for an array of dimension {}",
                        d, ndim
                    )))
                } else {
                    Ok(resolved as usize)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        axes.sort_unstable_by(|a, b| b.cmp(a));
        let before = axes.len();
        axes.dedup();
        if axes.len() != before {
            return Err(PipelineError::InvalidInput(format!(
                "dimensions {:?} name the same axis twice",
                dims
            )));
        }
        Ok(axes)
    }
}

impl Step for ReduceMean {
    fn class_name(&self) -> &'static str {
        "ReduceMean"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let data = array_input(self.class_name(), inputs, 0)?;

        let Some(dims) = &self.dimensions else {
            return Ok(vec![Value::Float(data.sum() / data.len() as f64)]);
        };

        let axes = self.resolve_axes(dims, data.ndim())?;
        let mut reduced: ArrayD<f64> = data.to_owned();
        for axis in axes {
            let n = reduced.len_of(Axis(axis)) as f64;
            reduced = reduced.sum_axis(Axis(axis)) / n;
        }

        if reduced.ndim() == 0 {
            let value = reduced.iter().next().copied().unwrap_or(f64::NAN);
            return Ok(vec![Value::Float(value)]);
        }
        Ok(vec![Value::Array(reduced)])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Ratio
// ============================================================================

/// `x1 / (x1 + x2)` of two scalars; array inputs are first reduced to their
/// NaN-ignoring mean.
#[derive(Debug, Clone)]
pub struct ActivityRatio {
    params: Params,
}

impl ActivityRatio {
    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        Ok(Self {
            params: args.keyword().clone(),
        })
    }
}

fn scalar_or_mean(value: &Value) -> Result<f64> {
    if let Some(scalar) = value.as_scalar() {
        return Ok(scalar);
    }
    value
        .as_array()
        .map(|array| nan_mean(array.iter().copied()))
        .ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "ActivityRatio expects numbers or arrays, got {}",
                value.kind()
            ))
        })
}

impl Step for ActivityRatio {
    fn class_name(&self) -> &'static str {
        "ActivityRatio"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 2)?;
        let x1 = scalar_or_mean(&inputs[0])?;
        let x2 = scalar_or_mean(&inputs[1])?;
        Ok(vec![Value::Float(x1 / (x1 + x2))])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Volume;
    use ndarray::{Array, IxDyn, array};

    fn build<S>(construct: fn(&StepArgs, &StepContext) -> Result<S>, kwargs: serde_json::Value) -> Result<S> {
        let kwargs: Params = serde_json::from_value(kwargs).unwrap();
        construct(&StepArgs::new(Vec::new(), kwargs), &StepContext::default())
    }

    #[test]
    fn test_debug_reports_shape() {
        let mut step = build(DebugStep::from_args, json!({})).unwrap();
        let out = step
            .run(&[Value::Array(ArrayD::zeros(IxDyn(&[2, 3])))])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], Value::Shape(vec![2, 3]));
        assert_eq!(out[0], Value::Text("array [2, 3]".to_string()));
    }

    #[test]
    fn test_volume_to_array_reverses_axes() {
        let data = Array::from_shape_vec(IxDyn(&[2, 3]), (0..6).map(f64::from).collect()).unwrap();
        let mut step = build(VolumeToArray::from_args, json!({})).unwrap();
        let out = step.run(&[Value::Volume(Volume::identity(data.clone()))]).unwrap();

        let array = out[0].as_array().unwrap();
        assert_eq!(array.shape(), &[3, 2]);
        assert_eq!(array[[2, 1]], data[[1, 2]]);
    }

    #[test]
    fn test_volume_to_array_without_transpose() {
        let data = ArrayD::zeros(IxDyn(&[2, 3, 4]));
        let mut step = build(VolumeToArray::from_args, json!({"transpose": false})).unwrap();
        let out = step.run(&[Value::Volume(Volume::identity(data))]).unwrap();
        assert_eq!(out[0].shape(), vec![2, 3, 4]);
    }

    #[test]
    fn test_mosaic_layout() {
        // three 1x2 slices -> 2x2 grid of tiles, last tile NaN
        let volume = array![[[1.0, 2.0]], [[3.0, 4.0]], [[5.0, 6.0]]].into_dyn();
        let mut step = build(VolumeToMosaic::from_args, json!({"dim": 0})).unwrap();
        let out = step.run(&[Value::Array(volume)]).unwrap();

        let mosaic = out[0].as_array().unwrap();
        assert_eq!(mosaic.shape(), &[2, 4]);
        assert_eq!(mosaic[[0, 0]], 1.0);
        assert_eq!(mosaic[[0, 3]], 4.0);
        assert_eq!(mosaic[[1, 1]], 6.0);
        assert!(mosaic[[1, 2]].is_nan());
        assert!(mosaic[[1, 3]].is_nan());
    }

    #[test]
    fn test_mosaic_rejects_non_3d() {
        let mut step = build(VolumeToMosaic::from_args, json!({})).unwrap();
        let result = step.run(&[Value::Array(array![1.0].into_dyn())]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        assert!(build(VolumeToMosaic::from_args, json!({"dim": 3})).is_err());
    }

    #[test]
    fn test_reduce_mean_global() {
        let mut step = build(ReduceMean::from_args, json!({})).unwrap();
        let out = step.run(&[Value::Array(array![[1.0, 2.0], [3.0, 6.0]].into_dyn())]).unwrap();
        assert_eq!(out[0], Value::Float(3.0));
    }

    #[test]
    fn test_reduce_mean_over_axes() {
        let input = Value::Array(array![[1.0, 2.0], [3.0, 6.0]].into_dyn());

        let mut rows = build(ReduceMean::from_args, json!({"dimensions": [1]})).unwrap();
        assert_eq!(rows.run(&[input.clone()]).unwrap()[0], Value::Array(array![1.5, 4.5].into_dyn()));

        let mut last = build(ReduceMean::from_args, json!({"dimensions": [-2]})).unwrap();
        assert_eq!(last.run(&[input.clone()]).unwrap()[0], Value::Array(array![2.0, 4.0].into_dyn()));

        let mut all = build(ReduceMean::from_args, json!({"dimensions": [0, 1]})).unwrap();
        assert_eq!(all.run(&[input]).unwrap()[0], Value::Float(3.0));
    }

    #[test]
    fn test_reduce_mean_invalid_axes() {
        assert!(build(ReduceMean::from_args, json!({"dimensions": [0, 0]})).is_err());

        let mut step = build(ReduceMean::from_args, json!({"dimensions": [2]})).unwrap();
        let result = step.run(&[Value::Array(array![[1.0]].into_dyn())]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));

        let mut aliased = build(ReduceMean::from_args, json!({"dimensions": [1, -1]})).unwrap();
        assert!(aliased.run(&[Value::Array(array![[1.0]].into_dyn())]).is_err());
    }

    #[test]
    fn test_activity_ratio() {
        let mut step = build(ActivityRatio::from_args, json!({})).unwrap();
        let out = step
            .run(&[
                Value::Array(array![1.0, f64::NAN, 3.0].into_dyn()),
                Value::Float(6.0),
            ])
            .unwrap();
        assert_eq!(out[0], Value::Float(0.25));
    }

    #[test]
    fn test_activity_ratio_zero_denominator() {
        let mut step = build(ActivityRatio::from_args, json!({})).unwrap();
        let out = step.run(&[Value::Float(0.0), Value::Float(0.0)]).unwrap();
        assert!(out[0].as_scalar().unwrap().is_nan());
    }
}
