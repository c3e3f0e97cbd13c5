use super::{Step, StepArgs, StepContext, expect_inputs};
use crate::error::{PipelineError, Result};
use crate::providers::Registration;
use crate::types::{Params, Value, Volume};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Align each incoming volume to the subject's reference volume.
///
/// The reference is fetched once at construction. A volume whose orientation
/// differs from the reference is still aligned, with a warning.
pub struct AlignToReference {
    reference: Volume,
    registration: Arc<dyn Registration>,
    two_pass: bool,
    params: Params,
}

impl AlignToReference {
    pub fn from_args(args: &StepArgs, ctx: &StepContext) -> Result<Self> {
        let surface = args.required_str(0, "surface")?;
        let transform = args.required_str(1, "transform")?;
        // older pipeline files spell it `twopass`
        let two_pass = if args.keyword().contains_key("twopass") {
            args.bool_or(2, "twopass", false)?
        } else {
            args.bool_or(2, "two_pass", false)?
        };

        let registration = ctx.registration()?;
        let reference = ctx.geometry()?.reference_volume(&surface, &transform)?;
        debug!(
            "Aligning to reference {:?} for {}/{} with {}",
            reference.data.shape(),
            surface,
            transform,
            registration.name()
        );

        Ok(Self {
            reference,
            registration,
            two_pass,
            params: args.describe([
                ("surface", json!(surface)),
                ("transform", json!(transform)),
                ("two_pass", json!(two_pass)),
            ]),
        })
    }

    pub fn reference(&self) -> &Volume {
        &self.reference
    }
}

impl std::fmt::Debug for AlignToReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignToReference")
            .field("reference_shape", &self.reference.data.shape())
            .field("registration", &self.registration.name())
            .field("two_pass", &self.two_pass)
            .finish()
    }
}

impl Step for AlignToReference {
    fn class_name(&self) -> &'static str {
        "AlignToReference"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let volume = inputs[0].as_volume().ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "AlignToReference expects a volume, got {}",
                inputs[0].kind()
            ))
        })?;

        if !volume.same_orientation(&self.reference) {
            warn!(
                "Input and reference volumes have different orientations: input {:?}, reference {:?}",
                volume.orientation(),
                self.reference.orientation()
            );
        }

        let aligned = self
            .registration
            .align(volume, &self.reference, self.two_pass)?;
        Ok(vec![Value::Volume(aligned)])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}
