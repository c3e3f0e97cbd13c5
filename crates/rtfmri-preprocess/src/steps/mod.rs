//! Step abstraction and the built-in transforms.
//!
//! A step is constructed once per session from its [`StepArgs`] and a
//! [`StepContext`], then called once per frame with the values named by its
//! input keys. Every step returns a fixed number of values
//! ([`Step::output_count`]); the executor binds them to output keys
//! positionally.
//!
//! # Built-in Steps
//!
//! | Type name | Inputs | Outputs |
//! |---|---|---|
//! | `Debug` | value | text, shape |
//! | `SaveVolume` | volume, image_number | none |
//! | `AlignToReference` | volume | volume |
//! | `VolumeToArray` | volume | array |
//! | `VolumeToMosaic` | array | array |
//! | `ApplyMask` | volume | array |
//! | `ApplySecondaryMask` | array | array |
//! | `ReduceMean` | array | array or float |
//! | `ActivityRatio` | x1, x2 | float |
//! | `RegionSummary` | array | regions |
//! | `DetrendByModel` | wm, gm | array |
//! | `IncrementalMeanStd` | array | mean, std |
//! | `RunningMeanStd` | array, image_number | mean, std |
//! | `ZScore` | array, mean, std | array |
//!
//! # Writing a Step
//!
//! ```rust,ignore
//! use rtfmri_preprocess::steps::{Step, StepArgs, StepContext};
//!
//! struct Scale { factor: f64, params: Params }
//!
//! impl Step for Scale {
//!     fn class_name(&self) -> &'static str { "Scale" }
//!     fn output_count(&self) -> usize { 1 }
//!     fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
//!         let array = array_input(self.class_name(), inputs, 0)?;
//!         Ok(vec![Value::Array(&array * self.factor)])
//!     }
//!     fn describe(&self) -> &Params { &self.params }
//! }
//!
//! registry.register("Scale", |args, _ctx| {
//!     let factor = args.f64_or(0, "factor", 1.0)?;
//!     Ok(Box::new(Scale { factor, params: args.describe([("factor", factor.into())]) }))
//! });
//! ```

mod alignment;
mod basic;
mod detrend;
mod io;
mod masking;
mod statistics;

pub use alignment::AlignToReference;
pub use basic::{ActivityRatio, DebugStep, ReduceMean, VolumeToArray, VolumeToMosaic};
pub use detrend::DetrendByModel;
pub use io::SaveVolume;
pub use masking::{ApplyMask, ApplySecondaryMask, RegionSummary};
pub use statistics::{IncrementalMeanStd, RunningMeanStd, ZScore};

use crate::error::{PipelineError, Result};
use crate::providers::{ArtifactStore, GeometryProvider, Registration};
use crate::types::{Params, Value};
use ndarray::ArrayViewD;
use std::path::PathBuf;
use std::sync::Arc;

/// A pipeline step.
///
/// Steps own their configuration and any state carried between frames.
/// `run` must validate its inputs before touching that state, so a failed
/// call leaves the step exactly as it was.
pub trait Step: Send {
    /// Registered type name, written to the manifest.
    fn class_name(&self) -> &'static str;

    /// Number of values every call to [`run`](Self::run) returns.
    fn output_count(&self) -> usize;

    /// Process one frame's inputs, in declared input-key order.
    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>>;

    /// Discard per-session state.
    fn reset(&mut self) {}

    /// Parameters the step was configured with.
    fn describe(&self) -> &Params;

    /// One-time work for steps declared in the static section.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Constructor registered under a type name.
pub type StepFactory = Arc<dyn Fn(&StepArgs, &StepContext) -> Result<Box<dyn Step>> + Send + Sync>;

// ============================================================================
// Arguments
// ============================================================================

/// Positional arguments plus keyword arguments (global parameters already
/// merged in) for one step.
///
/// A parameter is looked up at its positional index first, then by name.
/// JSON `null` counts as absent.
#[derive(Debug, Clone, Default)]
pub struct StepArgs {
    positional: Vec<serde_json::Value>,
    keyword: Params,
}

impl StepArgs {
    pub fn new(positional: Vec<serde_json::Value>, keyword: Params) -> Self {
        Self {
            positional,
            keyword,
        }
    }

    pub fn positional(&self) -> &[serde_json::Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &Params {
        &self.keyword
    }

    /// Raw value for the parameter at `index` / `name`.
    pub fn get(&self, index: usize, name: &str) -> Option<&serde_json::Value> {
        self.positional
            .get(index)
            .filter(|v| !v.is_null())
            .or_else(|| self.keyword.get(name).filter(|v| !v.is_null()))
    }

    pub fn required_str(&self, index: usize, name: &str) -> Result<String> {
        self.optional_str(index, name)?
            .ok_or_else(|| missing_argument(name))
    }

    pub fn optional_str(&self, index: usize, name: &str) -> Result<Option<String>> {
        match self.get(index, name) {
            None => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(invalid_argument(name, "a string", other)),
        }
    }

    pub fn usize_or(&self, index: usize, name: &str, default: usize) -> Result<usize> {
        match self.get(index, name) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| invalid_argument(name, "a non-negative integer", value)),
        }
    }

    pub fn i64_or(&self, index: usize, name: &str, default: i64) -> Result<i64> {
        match self.get(index, name) {
            None => Ok(default),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| invalid_argument(name, "an integer", value)),
        }
    }

    pub fn f64_or(&self, index: usize, name: &str, default: f64) -> Result<f64> {
        match self.get(index, name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| invalid_argument(name, "a number", value)),
        }
    }

    pub fn bool_or(&self, index: usize, name: &str, default: bool) -> Result<bool> {
        match self.get(index, name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| invalid_argument(name, "a boolean", value)),
        }
    }

    /// A list of integers; a bare integer is accepted as a one-element list.
    pub fn optional_int_list(&self, index: usize, name: &str) -> Result<Option<Vec<i64>>> {
        let Some(value) = self.get(index, name) else {
            return Ok(None);
        };
        if let Some(single) = value.as_i64() {
            return Ok(Some(vec![single]));
        }
        let items = value
            .as_array()
            .ok_or_else(|| invalid_argument(name, "a list of integers", value))?;
        items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| invalid_argument(name, "a list of integers", value))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// A list of strings; a bare string is accepted as a one-element list.
    pub fn string_list(&self, index: usize, name: &str) -> Result<Vec<String>> {
        let value = self.get(index, name).ok_or_else(|| missing_argument(name))?;
        if let Some(single) = value.as_str() {
            return Ok(vec![single.to_string()]);
        }
        let items = value
            .as_array()
            .ok_or_else(|| invalid_argument(name, "a list of strings", value))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid_argument(name, "a list of strings", value))
            })
            .collect()
    }

    /// Parameter map for the manifest: every keyword argument, overlaid with
    /// the step's resolved named parameters (defaults included).
    pub fn describe<'a, I>(&self, resolved: I) -> Params
    where
        I: IntoIterator<Item = (&'a str, serde_json::Value)>,
    {
        let mut params = self.keyword.clone();
        for (name, value) in resolved {
            params.insert(name.to_string(), value);
        }
        params
    }
}

fn missing_argument(name: &str) -> PipelineError {
    PipelineError::Configuration(format!("missing required argument '{}'", name))
}

fn invalid_argument(name: &str, expected: &str, found: &serde_json::Value) -> PipelineError {
    PipelineError::Configuration(format!(
        "argument '{}' must be {}, got {}",
        name, expected, found
    ))
}

// ============================================================================
// Context
// ============================================================================

/// Collaborators and session settings available to step constructors.
#[derive(Clone, Default)]
pub struct StepContext {
    pub geometry: Option<Arc<dyn GeometryProvider>>,
    pub registration: Option<Arc<dyn Registration>>,
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
    pub recording_id: String,
    pub recording_root: PathBuf,
}

impl StepContext {
    pub fn geometry(&self) -> Result<&dyn GeometryProvider> {
        self.geometry
            .as_deref()
            .ok_or_else(|| PipelineError::Configuration("no geometry provider configured".into()))
    }

    pub fn registration(&self) -> Result<Arc<dyn Registration>> {
        self.registration.clone().ok_or_else(|| {
            PipelineError::Configuration("no registration engine configured".into())
        })
    }

    pub fn artifacts(&self) -> Result<&dyn ArtifactStore> {
        self.artifacts
            .as_deref()
            .ok_or_else(|| PipelineError::Configuration("no artifact store configured".into()))
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("geometry", &self.geometry.is_some())
            .field("registration", &self.registration.as_ref().map(|r| r.name()))
            .field("artifacts", &self.artifacts.is_some())
            .field("recording_id", &self.recording_id)
            .field("recording_root", &self.recording_root)
            .finish()
    }
}

// ============================================================================
// Input helpers
// ============================================================================

/// Fail unless exactly `expected` inputs were supplied.
pub fn expect_inputs(step: &str, inputs: &[Value], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(PipelineError::InvalidInput(format!(
            "{} takes {} input(s), got {}",
            step,
            expected,
            inputs.len()
        )));
    }
    Ok(())
}

/// Array view of input `index` (arrays and volumes both qualify).
pub fn array_input<'a>(step: &str, inputs: &'a [Value], index: usize) -> Result<ArrayViewD<'a, f64>> {
    let value = inputs.get(index).ok_or_else(|| {
        PipelineError::InvalidInput(format!("{} is missing input {}", step, index))
    })?;
    value.as_array().ok_or_else(|| {
        PipelineError::InvalidInput(format!(
            "{} expects an array at input {}, got {}",
            step,
            index,
            value.kind()
        ))
    })
}

/// Built-in step types and their constructors.
pub(crate) fn builtin_factories() -> Vec<(&'static str, StepFactory)> {
    fn factory<S, F>(construct: F) -> StepFactory
    where
        S: Step + 'static,
        F: Fn(&StepArgs, &StepContext) -> Result<S> + Send + Sync + 'static,
    {
        Arc::new(move |args: &StepArgs, ctx: &StepContext| {
            Ok(Box::new(construct(args, ctx)?) as Box<dyn Step>)
        })
    }

    vec![
        ("Debug", factory(DebugStep::from_args)),
        ("SaveVolume", factory(SaveVolume::from_args)),
        ("AlignToReference", factory(AlignToReference::from_args)),
        ("VolumeToArray", factory(VolumeToArray::from_args)),
        ("VolumeToMosaic", factory(VolumeToMosaic::from_args)),
        ("ApplyMask", factory(ApplyMask::from_args)),
        ("ApplySecondaryMask", factory(ApplySecondaryMask::from_args)),
        ("ReduceMean", factory(ReduceMean::from_args)),
        ("ActivityRatio", factory(ActivityRatio::from_args)),
        ("RegionSummary", factory(RegionSummary::from_args)),
        ("DetrendByModel", factory(DetrendByModel::from_args)),
        ("IncrementalMeanStd", factory(IncrementalMeanStd::from_args)),
        ("RunningMeanStd", factory(RunningMeanStd::from_args)),
        ("ZScore", factory(ZScore::from_args)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(positional: Vec<serde_json::Value>, keyword: serde_json::Value) -> StepArgs {
        let keyword: Params = serde_json::from_value(keyword).unwrap();
        StepArgs::new(positional, keyword)
    }

    #[test]
    fn test_positional_before_keyword() {
        let args = args(vec![json!("S1")], json!({"surface": "S2", "transform": "T1"}));
        assert_eq!(args.required_str(0, "surface").unwrap(), "S1");
        assert_eq!(args.required_str(1, "transform").unwrap(), "T1");
    }

    #[test]
    fn test_null_counts_as_absent() {
        let args = args(vec![], json!({"mask_type": null}));
        assert_eq!(args.optional_str(2, "mask_type").unwrap(), None);
    }

    #[test]
    fn test_null_positional_falls_back_to_keyword() {
        let args = args(vec![json!(null), json!("T1")], json!({"surface": "S2"}));
        assert_eq!(args.required_str(0, "surface").unwrap(), "S2");
        assert_eq!(args.required_str(1, "transform").unwrap(), "T1");
    }

    #[test]
    fn test_missing_required_argument() {
        let args = args(vec![], json!({}));
        let err = args.required_str(0, "surface").unwrap_err();
        assert!(err.to_string().contains("surface"));
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_typed_getters_reject_wrong_types() {
        let args = args(vec![], json!({"n": "twenty", "two_pass": 1}));
        assert!(args.usize_or(0, "n", 20).is_err());
        assert!(args.bool_or(0, "two_pass", false).is_err());
        assert_eq!(args.usize_or(1, "n_skip", 5).unwrap(), 5);
    }

    #[test]
    fn test_lists_accept_single_values() {
        let args = args(vec![], json!({"dimensions": 1, "roi_names": "V1"}));
        assert_eq!(args.optional_int_list(0, "dimensions").unwrap(), Some(vec![1]));
        assert_eq!(args.string_list(0, "roi_names").unwrap(), vec!["V1"]);
    }

    #[test]
    fn test_describe_overlays_resolved_values() {
        let args = args(vec![], json!({"surface": "S1", "n": 3}));
        let params = args.describe([("n", json!(3)), ("n_skip", json!(5))]);
        assert_eq!(params["surface"], json!("S1"));
        assert_eq!(params["n_skip"], json!(5));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let factories = builtin_factories();
        let mut names: Vec<_> = factories.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), factories.len());
    }

    #[test]
    fn test_context_without_collaborators() {
        let ctx = StepContext::default();
        assert!(ctx.geometry().is_err());
        assert!(ctx.registration().is_err());
        assert!(ctx.artifacts().is_err());
    }
}
