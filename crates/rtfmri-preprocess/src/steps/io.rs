//! Persisting frames to disk.

use super::{Step, StepArgs, StepContext, expect_inputs};
use crate::error::{PipelineError, Result};
use crate::types::{Params, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `{}`, `{:N}` or `{:0N}`.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(?::(0)?([0-9]+))?\}").expect("Invalid regex: placeholder"));

/// File name template with exactly one integer placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut matches = PLACEHOLDER.captures_iter(template);
        let (Some(found), None) = (matches.next(), matches.next()) else {
            return Err(PipelineError::Configuration(format!(
                "path template '{}' must contain exactly one placeholder such as {{:04}}",
                template
            )));
        };

        let whole = found.get(0).map_or(0..0, |m| m.range());
        let width = match found.get(2) {
            Some(digits) => digits.as_str().parse().map_err(|_| {
                PipelineError::Configuration(format!("invalid width in template '{}'", template))
            })?,
            None => 0,
        };

        Ok(Self {
            prefix: template[..whole.start].to_string(),
            suffix: template[whole.end..].to_string(),
            width,
            zero_pad: found.get(1).is_some(),
        })
    }

    pub fn render(&self, number: i64) -> String {
        let number = if self.zero_pad {
            format!("{:0width$}", number, width = self.width)
        } else {
            format!("{:>width$}", number, width = self.width)
        };
        format!("{}{}{}", self.prefix, number, self.suffix)
    }
}

/// Write each incoming volume to
/// `<recording_root>/<recording_id>/volumes/<template(image_number)>` as JSON.
#[derive(Debug, Clone)]
pub struct SaveVolume {
    directory: PathBuf,
    template: PathTemplate,
    params: Params,
}

impl SaveVolume {
    pub const DEFAULT_TEMPLATE: &'static str = "volume_{:04}.json";

    pub fn from_args(args: &StepArgs, ctx: &StepContext) -> Result<Self> {
        let recording_id = args
            .optional_str(0, "recording_id")?
            .unwrap_or_else(|| ctx.recording_id.clone());
        let path_format = args
            .optional_str(1, "path_format")?
            .unwrap_or_else(|| Self::DEFAULT_TEMPLATE.to_string());

        if recording_id.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "SaveVolume needs a recording id".to_string(),
            ));
        }
        let template = PathTemplate::parse(&path_format)?;

        let directory = ctx.recording_root.join(&recording_id).join("volumes");
        fs::create_dir_all(&directory).map_err(|e| {
            PipelineError::from(e).with_context(format!(
                "Failed to create recording directory {}",
                directory.display()
            ))
        })?;
        info!("Saving volumes to {}", directory.display());

        Ok(Self {
            directory,
            template,
            params: args.describe([
                ("recording_id", json!(recording_id)),
                ("path_format", json!(path_format)),
            ]),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Destination for the volume with `image_number`.
    pub fn path_for(&self, image_number: i64) -> PathBuf {
        self.directory.join(self.template.render(image_number))
    }
}

impl Step for SaveVolume {
    fn class_name(&self) -> &'static str {
        "SaveVolume"
    }

    fn output_count(&self) -> usize {
        0
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 2)?;
        let volume = inputs[0].as_volume().ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "SaveVolume expects a volume, got {}",
                inputs[0].kind()
            ))
        })?;
        let image_number = inputs[1].as_int().ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "SaveVolume expects an integer image number, got {}",
                inputs[1].kind()
            ))
        })?;

        let path = self.path_for(image_number);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, volume)?;
        writer.flush()?;
        debug!("Saved volume {} to {}", image_number, path.display());

        Ok(Vec::new())
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Volume;
    use ndarray::{ArrayD, IxDyn};
    use tempfile::TempDir;

    fn context(root: &Path) -> StepContext {
        StepContext {
            recording_id: "run01".to_string(),
            recording_root: root.to_path_buf(),
            ..Default::default()
        }
    }

    fn args(kwargs: serde_json::Value) -> StepArgs {
        StepArgs::new(Vec::new(), serde_json::from_value(kwargs).unwrap())
    }

    #[test]
    fn test_template_rendering() {
        assert_eq!(PathTemplate::parse("volume_{:04}.json").unwrap().render(7), "volume_0007.json");
        assert_eq!(PathTemplate::parse("v{}.json").unwrap().render(12), "v12.json");
        assert_eq!(PathTemplate::parse("v{:3}").unwrap().render(5), "v  5");
    }

    #[test]
    fn test_template_requires_one_placeholder() {
        assert!(PathTemplate::parse("volume.json").is_err());
        assert!(PathTemplate::parse("{}_{:04}.json").is_err());
    }

    #[test]
    fn test_save_volume_writes_json() {
        let root = TempDir::new().unwrap();
        let mut step = SaveVolume::from_args(&args(json!({})), &context(root.path())).unwrap();
        assert_eq!(step.directory(), root.path().join("run01").join("volumes"));

        let volume = Volume::identity(ArrayD::from_elem(IxDyn(&[2, 2]), 3.0));
        let out = step
            .run(&[Value::Volume(volume.clone()), Value::Int(3)])
            .unwrap();
        assert!(out.is_empty());

        let written = fs::read_to_string(step.path_for(3)).unwrap();
        assert!(step.path_for(3).ends_with("volume_0003.json"));
        let restored: Volume = serde_json::from_str(&written).unwrap();
        assert_eq!(restored, volume);
    }

    #[test]
    fn test_save_volume_recording_override() {
        let root = TempDir::new().unwrap();
        let step = SaveVolume::from_args(
            &args(json!({"recording_id": "other", "path_format": "img{}.json"})),
            &context(root.path()),
        )
        .unwrap();
        assert_eq!(step.path_for(1), root.path().join("other/volumes/img1.json"));
        assert_eq!(step.describe()["recording_id"], json!("other"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_save_volume_reports_write_failure() {
        let root = TempDir::new().unwrap();
        let mut step = SaveVolume::from_args(&args(json!({})), &context(root.path())).unwrap();
        // every write to /dev/full fails with ENOSPC
        std::os::unix::fs::symlink("/dev/full", step.path_for(0)).unwrap();

        let volume = Volume::identity(ArrayD::from_elem(IxDyn(&[2, 2]), 1.0));
        let result = step.run(&[Value::Volume(volume), Value::Int(0)]);
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_save_volume_rejects_arrays() {
        let root = TempDir::new().unwrap();
        let mut step = SaveVolume::from_args(&args(json!({})), &context(root.path())).unwrap();
        let result = step.run(&[Value::Array(ArrayD::zeros(IxDyn(&[1]))), Value::Int(0)]);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
        assert!(!step.path_for(0).exists());
    }
}
