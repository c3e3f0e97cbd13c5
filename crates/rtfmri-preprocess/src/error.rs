//! Error types for the preprocessing pipeline engine.
//!
//! Build-time errors ([`PipelineError::Configuration`],
//! [`PipelineError::UnknownStepType`], [`PipelineError::StepConstruction`])
//! prevent a pipeline from existing at all. Per-frame errors are returned from
//! `Pipeline::process` wrapped in [`PipelineError::Step`] so the caller knows
//! which frame and which step failed, and can drop the frame or halt.
//!
//! Errors are serializable as `{code, message}` for control surfaces.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the pipeline engine.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed spec, invalid configuration or bad step argument.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// No constructor registered under this type name.
    #[error("Unknown step type '{0}'")]
    UnknownStepType(String),

    /// A step constructor failed; the whole build is aborted.
    #[error("Failed to construct step '{step}' of type '{type_name}': {source}")]
    StepConstruction {
        step: String,
        type_name: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// A declared input key was absent from the frame.
    #[error("Step '{step}' requires key '{key}' which is missing from frame {}", display_image_number(.image_number))]
    MissingKey {
        key: String,
        step: String,
        image_number: Option<i64>,
    },

    /// A region name could not be resolved by the labeling provider.
    #[error("Unknown region '{0}'")]
    UnknownRegion(String),

    /// An input had the wrong kind of value for the step.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Array shapes are incompatible.
    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A step returned a different number of values than declared outputs
    /// (only raised when strict output arity is enabled).
    #[error("Step '{step}' declares {declared} outputs but returns {returned}")]
    OutputArity {
        step: String,
        declared: usize,
        returned: usize,
    },

    /// A step failed while processing a frame.
    #[error("Step '{step}' failed on frame {}: {source}", display_image_number(.image_number))]
    Step {
        step: String,
        image_number: Option<i64>,
        #[source]
        source: Box<PipelineError>,
    },

    /// An external collaborator (geometry lookup, registration, artifact
    /// store, manifest store) failed.
    #[error("External collaborator failed: {0}")]
    Collaborator(#[from] anyhow::Error),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ndarray shape error.
    #[error("Array shape error: {0}")]
    Array(#[from] ndarray::ShapeError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

fn display_image_number(image_number: &Option<i64>) -> String {
    match image_number {
        Some(n) => n.to_string(),
        None => "<unnumbered>".to_string(),
    }
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for control surfaces.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnknownStepType(_) => "UNKNOWN_STEP_TYPE",
            Self::StepConstruction { .. } => "STEP_CONSTRUCTION_FAILED",
            Self::MissingKey { .. } => "MISSING_KEY",
            Self::UnknownRegion(_) => "UNKNOWN_REGION",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            Self::OutputArity { .. } => "OUTPUT_ARITY_MISMATCH",
            Self::Step { source, .. } => source.error_code(),
            Self::Collaborator(_) => "COLLABORATOR_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Array(_) => "ARRAY_SHAPE_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// True for errors raised while building a pipeline.
    pub fn is_build_error(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::UnknownStepType(_) | Self::StepConstruction { .. } => {
                true
            }
            Self::WithContext { source, .. } => source.is_build_error(),
            _ => false,
        }
    }

    /// True when the failure is confined to one frame; the engine can keep
    /// consuming frames afterwards.
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Self::Step { .. } | Self::MissingKey { .. })
    }

    /// Image number of the frame that failed, if this is a per-frame error.
    pub fn image_number(&self) -> Option<i64> {
        match self {
            Self::Step { image_number, .. } | Self::MissingKey { image_number, .. } => {
                *image_number
            }
            Self::WithContext { source, .. } => source.image_number(),
            _ => None,
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for anyhow::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Collaborator(e).with_context(context))
    }
}
