//! Stateful statistics steps and standardization.

use super::{Step, StepArgs, StepContext, array_input, expect_inputs};
use crate::error::{PipelineError, Result};
use crate::stats::{BufferedArray, RunningWindow, zscore};
use crate::types::{Params, Value};
use ndarray::{Array1, ArrayD, IxDyn};
use serde_json::json;
use tracing::{debug, warn};

fn reshape(values: &Array1<f64>, shape: &[usize]) -> Result<ArrayD<f64>> {
    Ok(ArrayD::from_shape_vec(IxDyn(shape), values.to_vec())?)
}

// ============================================================================
// Incremental mean/std
// ============================================================================

/// Mean and population standard deviation over every sample seen this
/// session.
///
/// The first call fixes the sample shape and returns `(null, null)`: one
/// sample is not enough history to standardize against.
#[derive(Debug, Clone)]
pub struct IncrementalMeanStd {
    /// Sample shape fixed by the first call, and the flattened history.
    history: Option<(Vec<usize>, BufferedArray)>,
    params: Params,
}

impl IncrementalMeanStd {
    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        Ok(Self {
            history: None,
            params: args.keyword().clone(),
        })
    }

    /// Samples stored so far.
    pub fn len(&self) -> usize {
        self.history.as_ref().map_or(0, |(_, buffer)| buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Step for IncrementalMeanStd {
    fn class_name(&self) -> &'static str {
        "IncrementalMeanStd"
    }

    fn output_count(&self) -> usize {
        2
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let array = array_input(self.class_name(), inputs, 0)?;

        let Some((shape, buffer)) = self.history.as_mut() else {
            let mut buffer = BufferedArray::new(array.len());
            buffer.append(array.iter())?;
            debug!("IncrementalMeanStd: history started with shape {:?}", array.shape());
            self.history = Some((array.shape().to_vec(), buffer));
            return Ok(vec![Value::Null, Value::Null]);
        };

        if array.shape() != shape.as_slice() {
            return Err(PipelineError::ShapeMismatch {
                expected: shape.clone(),
                found: array.shape().to_vec(),
            });
        }
        buffer.append(array.iter())?;

        let Some((mean, std)) = buffer.mean_std() else {
            return Ok(vec![Value::Null, Value::Null]);
        };
        Ok(vec![
            Value::Array(reshape(&mean, shape)?),
            Value::Array(reshape(&std, shape)?),
        ])
    }

    fn reset(&mut self) {
        self.history = None;
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Running mean/std
// ============================================================================

/// Mean and standard deviation over the last `n` samples.
///
/// While the frame index is below `n_skip` the step returns `(zeros, ones)`
/// and leaves the window alone. Gating uses the index the caller supplies;
/// an index that does not increase is logged but otherwise trusted.
#[derive(Debug, Clone)]
pub struct RunningMeanStd {
    n: usize,
    n_skip: i64,
    window: Option<RunningWindow>,
    last_index: Option<i64>,
    params: Params,
}

impl RunningMeanStd {
    pub const DEFAULT_N: usize = 20;
    pub const DEFAULT_N_SKIP: i64 = 5;

    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        let n = args.usize_or(0, "n", Self::DEFAULT_N)?;
        let n_skip = args.i64_or(1, "n_skip", Self::DEFAULT_N_SKIP)?;
        if n == 0 {
            return Err(PipelineError::Configuration(
                "running window length 'n' must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            n,
            n_skip,
            window: None,
            last_index: None,
            params: args.describe([("n", json!(n)), ("n_skip", json!(n_skip))]),
        })
    }

    pub fn window(&self) -> Option<&RunningWindow> {
        self.window.as_ref()
    }
}

impl Step for RunningMeanStd {
    fn class_name(&self) -> &'static str {
        "RunningMeanStd"
    }

    fn output_count(&self) -> usize {
        2
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 2)?;
        let array = array_input(self.class_name(), inputs, 0)?;
        let index = inputs[1].as_int().ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "RunningMeanStd expects an integer frame index, got {}",
                inputs[1].kind()
            ))
        })?;

        if let Some(last) = self.last_index
            && index <= last
        {
            warn!(
                "RunningMeanStd: frame index {} does not follow {}; frames may be missing or reordered",
                index, last
            );
        }

        if index < self.n_skip {
            self.last_index = Some(index);
            return Ok(vec![
                Value::Array(ArrayD::zeros(array.raw_dim())),
                Value::Array(ArrayD::ones(array.raw_dim())),
            ]);
        }

        let sample: Array1<f64> = array.iter().copied().collect();
        let (n, width) = (self.n, sample.len());
        let window = self
            .window
            .get_or_insert_with(|| RunningWindow::new(n, width));
        window.push(sample.view())?;
        self.last_index = Some(index);

        Ok(vec![
            Value::Array(reshape(&window.mean(), array.shape())?),
            Value::Array(reshape(&window.std(), array.shape())?),
        ])
    }

    fn reset(&mut self) {
        self.window = None;
        self.last_index = None;
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Z-score
// ============================================================================

/// `(array - mean) / std`, or zeros when `mean` is null.
#[derive(Debug, Clone)]
pub struct ZScore {
    params: Params,
}

impl ZScore {
    pub fn from_args(args: &StepArgs, _ctx: &StepContext) -> Result<Self> {
        Ok(Self {
            params: args.keyword().clone(),
        })
    }
}

impl Step for ZScore {
    fn class_name(&self) -> &'static str {
        "ZScore"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 3)?;
        let array = array_input(self.class_name(), inputs, 0)?;

        if inputs[1].is_null() {
            return Ok(vec![Value::Array(zscore(array, None)?)]);
        }
        let mean = array_input(self.class_name(), inputs, 1)?;
        let std = array_input(self.class_name(), inputs, 2)?;
        Ok(vec![Value::Array(zscore(array, Some((mean, std)))?)])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn args(kwargs: serde_json::Value) -> StepArgs {
        StepArgs::new(Vec::new(), serde_json::from_value(kwargs).unwrap())
    }

    fn arr(values: &[f64]) -> Value {
        Value::Array(Array1::from(values.to_vec()).into_dyn())
    }

    #[test]
    fn test_incremental_first_call_is_sentinel() {
        let mut step = IncrementalMeanStd::from_args(&args(json!({})), &StepContext::default()).unwrap();
        let out = step.run(&[arr(&[1.0, 2.0])]).unwrap();
        assert_eq!(out, vec![Value::Null, Value::Null]);
        assert_eq!(step.len(), 1);
    }

    #[test]
    fn test_incremental_two_samples() {
        let mut step = IncrementalMeanStd::from_args(&args(json!({})), &StepContext::default()).unwrap();
        step.run(&[arr(&[1.0, 10.0])]).unwrap();
        let out = step.run(&[arr(&[3.0, 10.0])]).unwrap();

        assert_eq!(out[0], arr(&[2.0, 10.0]));
        assert_eq!(out[1], arr(&[1.0, 0.0]));
    }

    #[test]
    fn test_incremental_keeps_sample_shape() {
        let mut step = IncrementalMeanStd::from_args(&args(json!({})), &StepContext::default()).unwrap();
        step.run(&[Value::Array(array![[1.0, 2.0], [3.0, 4.0]].into_dyn())]).unwrap();
        let out = step.run(&[Value::Array(array![[3.0, 2.0], [3.0, 4.0]].into_dyn())]).unwrap();
        assert_eq!(out[0], Value::Array(array![[2.0, 2.0], [3.0, 4.0]].into_dyn()));
    }

    #[test]
    fn test_incremental_shape_change_leaves_state() {
        let mut step = IncrementalMeanStd::from_args(&args(json!({})), &StepContext::default()).unwrap();
        step.run(&[arr(&[1.0, 2.0])]).unwrap();

        let result = step.run(&[arr(&[1.0, 2.0, 3.0])]);
        assert!(matches!(result, Err(PipelineError::ShapeMismatch { .. })));
        assert_eq!(step.len(), 1);
    }

    #[test]
    fn test_incremental_reset() {
        let mut step = IncrementalMeanStd::from_args(&args(json!({})), &StepContext::default()).unwrap();
        step.run(&[arr(&[1.0])]).unwrap();
        step.run(&[arr(&[2.0])]).unwrap();
        step.reset();
        assert!(step.is_empty());
        assert_eq!(step.run(&[arr(&[5.0])]).unwrap(), vec![Value::Null, Value::Null]);
    }

    #[test]
    fn test_running_defaults() {
        let step = RunningMeanStd::from_args(&args(json!({})), &StepContext::default()).unwrap();
        assert_eq!(step.describe()["n"], json!(20));
        assert_eq!(step.describe()["n_skip"], json!(5));
    }

    #[test]
    fn test_running_warm_up_leaves_window_untouched() {
        let mut step =
            RunningMeanStd::from_args(&args(json!({"n": 3, "n_skip": 2})), &StepContext::default())
                .unwrap();

        for index in 0..2 {
            let out = step.run(&[arr(&[7.0, 9.0]), Value::Int(index)]).unwrap();
            assert_eq!(out, vec![arr(&[0.0, 0.0]), arr(&[1.0, 1.0])]);
        }
        assert!(step.window().is_none());
    }

    #[test]
    fn test_running_partial_window_has_no_nan_bias() {
        let mut step =
            RunningMeanStd::from_args(&args(json!({"n": 3, "n_skip": 2})), &StepContext::default())
                .unwrap();
        step.run(&[arr(&[100.0]), Value::Int(0)]).unwrap();
        step.run(&[arr(&[100.0]), Value::Int(1)]).unwrap();

        let out = step.run(&[arr(&[2.0]), Value::Int(2)]).unwrap();
        assert_eq!(out[0], arr(&[2.0]));
        assert_eq!(out[1], arr(&[0.0]));

        let out = step.run(&[arr(&[4.0]), Value::Int(3)]).unwrap();
        assert_eq!(out[0], arr(&[3.0]));
        assert_eq!(out[1], arr(&[1.0]));
    }

    #[test]
    fn test_running_window_slides() {
        let mut step =
            RunningMeanStd::from_args(&args(json!({"n": 2, "n_skip": 0})), &StepContext::default())
                .unwrap();
        for (index, value) in [1.0, 2.0, 6.0].into_iter().enumerate() {
            step.run(&[arr(&[value]), Value::Int(index as i64)]).unwrap();
        }
        assert_eq!(step.window().unwrap().mean(), array![4.0]);
    }

    #[test]
    fn test_running_rejects_bad_index_and_zero_window() {
        let mut step = RunningMeanStd::from_args(&args(json!({})), &StepContext::default()).unwrap();
        let result = step.run(&[arr(&[1.0]), Value::Text("seven".into())]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));

        assert!(RunningMeanStd::from_args(&args(json!({"n": 0})), &StepContext::default()).is_err());
    }

    #[test]
    fn test_zscore_step() {
        let mut step = ZScore::from_args(&args(json!({})), &StepContext::default()).unwrap();

        let out = step.run(&[arr(&[5.0]), Value::Null, Value::Null]).unwrap();
        assert_eq!(out[0], arr(&[0.0]));

        let out = step.run(&[arr(&[5.0]), arr(&[3.0]), arr(&[2.0])]).unwrap();
        assert_eq!(out[0], arr(&[1.0]));
    }

    #[test]
    fn test_zscore_rejects_missing_std() {
        let mut step = ZScore::from_args(&args(json!({})), &StepContext::default()).unwrap();
        let result = step.run(&[arr(&[5.0]), arr(&[3.0]), Value::Null]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }
}
