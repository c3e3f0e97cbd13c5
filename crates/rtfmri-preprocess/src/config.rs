//! Engine-level configuration for a preprocessing pipeline session.
//!
//! Step parameters live in the [`PipelineSpec`](crate::types::PipelineSpec);
//! this module configures the session around them: identifiers used for
//! manifest keys and recording paths, and how strictly outputs are checked.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a pipeline session.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use rtfmri_preprocess::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .recording_id("subject01_run02")
///     .recording_root("/data/recordings")
///     .strict_output_arity(true)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identifier used in manifest keys (`pipeline:<id>:<step>:<param>`).
    /// If None, a random identifier is generated at build time.
    /// Default: None
    pub pipeline_id: Option<String>,

    /// Identifier of the recording session. Steps that persist data use it
    /// to build their output directory.
    /// Default: "recording_<YYYYmmdd_HHMM>"
    pub recording_id: String,

    /// Root directory for per-recording output.
    /// Default: "recordings"
    pub recording_root: PathBuf,

    /// Treat a mismatch between declared output keys and returned values as
    /// an error instead of silently truncating.
    /// Default: false
    pub strict_output_arity: bool,

    /// Whether to export step manifests when a manifest store is supplied.
    /// Default: true
    pub register_steps: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_id: None,
            recording_id: default_recording_id(),
            recording_root: PathBuf::from("recordings"),
            strict_output_arity: false,
            register_steps: true,
        }
    }
}

/// Recording identifier derived from the local time, e.g. `recording_20240131_0915`.
pub fn default_recording_id() -> String {
    format!("recording_{}", chrono::Local::now().format("%Y%m%d_%H%M"))
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if let Some(id) = &self.pipeline_id {
            validate_identifier("pipeline_id", id)?;
        }
        validate_identifier("recording_id", &self.recording_id)?;

        if self.recording_root.as_os_str().is_empty() {
            return Err(ConfigValidationError::EmptyRecordingRoot);
        }

        Ok(())
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigValidationError> {
    if value.trim().is_empty() {
        return Err(ConfigValidationError::EmptyIdentifier(field.to_string()));
    }
    // ':' separates levels of the manifest key hierarchy
    if value.contains(':') {
        return Err(ConfigValidationError::InvalidIdentifier {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("'{0}' must not be empty")]
    EmptyIdentifier(String),

    #[error("Invalid value for '{field}': '{value}' (must not contain ':')")]
    InvalidIdentifier { field: String, value: String },

    #[error("recording_root must not be empty")]
    EmptyRecordingRoot,
}

impl From<ConfigValidationError> for crate::error::PipelineError {
    fn from(err: ConfigValidationError) -> Self {
        crate::error::PipelineError::Configuration(err.to_string())
    }
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    pipeline_id: Option<String>,
    recording_id: Option<String>,
    recording_root: Option<PathBuf>,
    strict_output_arity: Option<bool>,
    register_steps: Option<bool>,
}

impl PipelineConfigBuilder {
    /// Set an explicit pipeline identifier.
    pub fn pipeline_id(mut self, id: impl Into<String>) -> Self {
        self.pipeline_id = Some(id.into());
        self
    }

    /// Set the recording identifier.
    pub fn recording_id(mut self, id: impl Into<String>) -> Self {
        self.recording_id = Some(id.into());
        self
    }

    /// Set the root directory for per-recording output.
    pub fn recording_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.recording_root = Some(path.into());
        self
    }

    /// Enable or disable strict checking of output arity.
    pub fn strict_output_arity(mut self, strict: bool) -> Self {
        self.strict_output_arity = Some(strict);
        self
    }

    /// Enable or disable manifest export.
    pub fn register_steps(mut self, register: bool) -> Self {
        self.register_steps = Some(register);
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> Result<PipelineConfig, ConfigValidationError> {
        let config = PipelineConfig {
            pipeline_id: self.pipeline_id,
            recording_id: self.recording_id.unwrap_or_else(default_recording_id),
            recording_root: self
                .recording_root
                .unwrap_or_else(|| PathBuf::from("recordings")),
            strict_output_arity: self.strict_output_arity.unwrap_or(false),
            register_steps: self.register_steps.unwrap_or(true),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.pipeline_id.is_none());
        assert!(config.recording_id.starts_with("recording_"));
        assert_eq!(config.recording_root, PathBuf::from("recordings"));
        assert!(!config.strict_output_arity);
        assert!(config.register_steps);
    }

    #[test]
    fn test_builder_custom_values() {
        let config = PipelineConfig::builder()
            .pipeline_id("42")
            .recording_id("sub01_run02")
            .recording_root("/tmp/rec")
            .strict_output_arity(true)
            .register_steps(false)
            .build()
            .unwrap();

        assert_eq!(config.pipeline_id.as_deref(), Some("42"));
        assert_eq!(config.recording_id, "sub01_run02");
        assert_eq!(config.recording_root, PathBuf::from("/tmp/rec"));
        assert!(config.strict_output_arity);
        assert!(!config.register_steps);
    }

    #[test]
    fn test_validation_rejects_colon_in_pipeline_id() {
        let result = PipelineConfig::builder().pipeline_id("a:b").build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::InvalidIdentifier { .. }
        ));
    }

    #[test]
    fn test_validation_rejects_empty_recording_id() {
        let result = PipelineConfig::builder().recording_id("  ").build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::EmptyIdentifier(_)
        ));
    }

    #[test]
    fn test_validation_rejects_empty_root() {
        let result = PipelineConfig::builder().recording_root("").build();
        assert!(matches!(
            result.unwrap_err(),
            ConfigValidationError::EmptyRecordingRoot
        ));
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "pipeline_id": "demo",
            "recording_id": "sub01",
            "recording_root": "out",
            "strict_output_arity": true,
            "register_steps": false
        }"#;

        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pipeline_id.as_deref(), Some("demo"));
        assert!(config.strict_output_arity);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_from_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"strict_output_arity": true}"#).unwrap();
        assert!(config.strict_output_arity);
        assert!(config.pipeline_id.is_none());
        assert!(config.recording_id.starts_with("recording_"));
        assert_eq!(config.recording_root, PathBuf::from("recordings"));
        assert!(config.register_steps);
        assert!(config.validate().is_ok());
    }
}
