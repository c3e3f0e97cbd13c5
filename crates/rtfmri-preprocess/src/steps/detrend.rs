use super::{Step, StepArgs, StepContext, array_input, expect_inputs};
use crate::error::{PipelineError, Result};
use crate::providers::DetrendArtifacts;
use crate::types::{Params, Value};
use ndarray::{Array1, ArrayD};
use serde_json::json;
use tracing::debug;

/// Remove the trend predicted from white-matter activity from gray-matter
/// activity.
///
/// White-matter activity is projected into component space, a trained model
/// predicts the gray-matter trend from the components, and the prediction is
/// subtracted. Inputs are `(wm, gm)`; the output has the shape of `gm`.
#[derive(Debug, Clone)]
pub struct DetrendByModel {
    artifacts: DetrendArtifacts,
    params: Params,
}

impl DetrendByModel {
    pub fn from_args(args: &StepArgs, ctx: &StepContext) -> Result<Self> {
        let subject = args.required_str(0, "subject")?;
        let model_name = args.optional_str(1, "model_name")?;

        let artifacts = ctx
            .artifacts()?
            .detrend_artifacts(&subject, model_name.as_deref())?;
        debug!("Loaded detrend model {:?} for {}", model_name, subject);

        Ok(Self {
            artifacts,
            params: args.describe([
                ("subject", json!(subject)),
                ("model_name", json!(model_name)),
            ]),
        })
    }
}

impl Step for DetrendByModel {
    fn class_name(&self) -> &'static str {
        "DetrendByModel"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 2)?;
        let wm: Array1<f64> = array_input(self.class_name(), inputs, 0)?
            .iter()
            .copied()
            .collect();
        let gm = array_input(self.class_name(), inputs, 1)?;

        let components = self.artifacts.reducer.transform(wm.view())?;
        let trend = self.artifacts.model.predict(components.view())?;
        if trend.len() != gm.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: gm.shape().to_vec(),
                found: trend.shape().to_vec(),
            });
        }

        let detrended: Vec<f64> = gm.iter().zip(trend.iter()).map(|(g, t)| g - t).collect();
        Ok(vec![Value::Array(ArrayD::from_shape_vec(gm.raw_dim(), detrended)?)])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}
