use crate::error::{PipelineError, Result};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, s};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Frame key holding the scanner's image counter.
pub const IMAGE_NUMBER_KEY: &str = "image_number";

/// Step parameters (global parameters, keyword arguments, manifests).
pub type Params = BTreeMap<String, serde_json::Value>;

/// Boolean voxel mask; raster order is row-major.
pub type Mask = ArrayD<bool>;

// ============================================================================
// Pipeline specification
// ============================================================================

/// Declarative description of a pipeline. Declaration order is execution order.
///
/// The core never reads files; an external loader deserializes this type.
/// Field aliases accept the names used by older YAML pipeline definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Merged into every step's keyword arguments; explicit kwargs win.
    #[serde(default)]
    pub global_parameters: Params,
    /// Steps constructed and set up once, never run per frame.
    #[serde(default, alias = "static_pipeline")]
    pub static_steps: Vec<StepSpec>,
    /// Steps run for every frame.
    #[serde(default, alias = "pipeline")]
    pub steps: Vec<StepSpec>,
}

impl PipelineSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.global_parameters.insert(key.into(), value.into());
        self
    }

    pub fn static_step(mut self, step: StepSpec) -> Self {
        self.static_steps.push(step);
        self
    }

    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    /// Check structural validity before anything is constructed.
    pub fn validate(&self) -> Result<()> {
        for step in self.static_steps.iter().chain(self.steps.iter()) {
            if step.name.trim().is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "step of type '{}' has an empty name",
                    step.type_name
                )));
            }
            if step.type_name.trim().is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "step '{}' has an empty type name",
                    step.name
                )));
            }
        }
        Ok(())
    }
}

/// One step of a [`PipelineSpec`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(alias = "class_name")]
    pub type_name: String,
    #[serde(default, alias = "args")]
    pub positional_args: Vec<serde_json::Value>,
    #[serde(default, alias = "kwargs")]
    pub keyword_args: Params,
    #[serde(default, alias = "input")]
    pub input_keys: Vec<String>,
    #[serde(default, alias = "output")]
    pub output_keys: Vec<String>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.positional_args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.keyword_args.insert(key.into(), value.into());
        self
    }

    pub fn inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Frame values
// ============================================================================

/// A scan volume: voxel data plus the 4x4 affine mapping voxels to space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub data: ArrayD<f64>,
    pub affine: Array2<f64>,
}

impl Volume {
    pub fn new(data: ArrayD<f64>, affine: Array2<f64>) -> Result<Self> {
        if affine.shape() != [4, 4] {
            return Err(PipelineError::ShapeMismatch {
                expected: vec![4, 4],
                found: affine.shape().to_vec(),
            });
        }
        Ok(Self { data, affine })
    }

    /// Volume with an identity affine.
    pub fn identity(data: ArrayD<f64>) -> Self {
        Self {
            data,
            affine: Array2::eye(4),
        }
    }

    /// Rotation/scaling block of the affine.
    pub fn orientation(&self) -> ArrayView2<'_, f64> {
        self.affine.slice(s![..3, ..3])
    }

    /// Whether both volumes share an orientation, compared like `numpy.allclose`.
    pub fn same_orientation(&self, other: &Volume) -> bool {
        const RTOL: f64 = 1e-5;
        const ATOL: f64 = 1e-8;
        self.orientation()
            .iter()
            .zip(other.orientation().iter())
            .all(|(a, b)| (a - b).abs() <= ATOL + RTOL * b.abs())
    }
}

/// A typed value stored in a [`Frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// "Not enough history yet" sentinel.
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Array(ArrayD<f64>),
    Volume(Volume),
    Shape(Vec<usize>),
    /// Region name to mean activity.
    Regions(BTreeMap<String, f64>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Volume(_) => "volume",
            Value::Shape(_) => "shape",
            Value::Regions(_) => "regions",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Array view of an array value or of a volume's data.
    pub fn as_array(&self) -> Option<ArrayViewD<'_, f64>> {
        match self {
            Value::Array(array) => Some(array.view()),
            Value::Volume(volume) => Some(volume.data.view()),
            _ => None,
        }
    }

    pub fn as_volume(&self) -> Option<&Volume> {
        match self {
            Value::Volume(volume) => Some(volume),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Shape of the value; scalars have an empty shape.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Array(array) => array.shape().to_vec(),
            Value::Volume(volume) => volume.data.shape().to_vec(),
            Value::Shape(shape) => vec![shape.len()],
            Value::Regions(regions) => vec![regions.len()],
            Value::Text(text) => vec![text.len()],
            Value::Null | Value::Int(_) | Value::Float(_) => Vec::new(),
        }
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(array: ArrayD<f64>) -> Self {
        Value::Array(array)
    }
}

impl From<Volume> for Value {
    fn from(volume: Volume) -> Self {
        Value::Volume(volume)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

// ============================================================================
// Frame
// ============================================================================

/// Key/value record for one stream arrival.
///
/// Grows as steps write outputs and never shrinks: there is no removal API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    values: BTreeMap<String, Value>,
}

impl Frame {
    /// Empty frame carrying only its image number.
    pub fn new(image_number: i64) -> Self {
        let mut frame = Self::default();
        frame.insert(IMAGE_NUMBER_KEY, Value::Int(image_number));
        frame
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, overwriting any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Lend a value to a running step; the executor puts it back afterwards.
    pub(crate) fn take(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn image_number(&self) -> Option<i64> {
        self.values.get(IMAGE_NUMBER_KEY).and_then(Value::as_int)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }
}
