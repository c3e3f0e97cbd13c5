//! Frame execution.
//!
//! Drives one frame at a time through the ordered step list: gather the
//! declared inputs, run the step, bind its outputs to the declared output
//! keys. Steps run strictly in declaration order on the calling thread.

use crate::error::{PipelineError, Result};
use crate::steps::Step;
use crate::types::{Frame, Value};
use tracing::{debug, info};

/// A constructed step together with its routing.
pub struct BoundStep {
    name: String,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
    step: Box<dyn Step>,
}

impl BoundStep {
    pub fn new(
        name: impl Into<String>,
        input_keys: Vec<String>,
        output_keys: Vec<String>,
        step: Box<dyn Step>,
    ) -> Self {
        Self {
            name: name.into(),
            input_keys,
            output_keys,
            step,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    pub fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    pub fn step(&self) -> &dyn Step {
        self.step.as_ref()
    }
}

impl std::fmt::Debug for BoundStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundStep")
            .field("name", &self.name)
            .field("class_name", &self.step.class_name())
            .field("input_keys", &self.input_keys)
            .field("output_keys", &self.output_keys)
            .finish()
    }
}

/// Runs frames through an ordered list of steps.
#[derive(Debug)]
pub struct ExecutionEngine {
    steps: Vec<BoundStep>,
    strict_output_arity: bool,
}

impl ExecutionEngine {
    pub fn new(steps: Vec<BoundStep>, strict_output_arity: bool) -> Self {
        Self {
            steps,
            strict_output_arity,
        }
    }

    pub fn steps(&self) -> &[BoundStep] {
        &self.steps
    }

    /// Run `frame` through every step and return it with all outputs added.
    ///
    /// A step returning more values than it has output keys has the extras
    /// dropped; fewer values leave the remaining keys unwritten. With strict
    /// output arity either case is an error.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingKey`] when a declared input is absent.
    /// - [`PipelineError::Step`] wrapping the step's own failure.
    ///
    /// Both are confined to this frame; the engine accepts the next one.
    pub fn process(&mut self, mut frame: Frame) -> Result<Frame> {
        let image_number = frame.image_number();
        info!("Processing frame {:?}", image_number);

        for bound in &mut self.steps {
            // Inputs are moved out of the frame and restored after the call
            let mut inputs: Vec<Value> = Vec::with_capacity(bound.input_keys.len());
            for (position, key) in bound.input_keys.iter().enumerate() {
                let value = match frame.take(key) {
                    Some(value) => value,
                    None => match bound.input_keys[..position].iter().position(|k| k == key) {
                        Some(earlier) => inputs[earlier].clone(),
                        None => {
                            return Err(PipelineError::MissingKey {
                                key: key.clone(),
                                step: bound.name.clone(),
                                image_number,
                            });
                        }
                    },
                };
                inputs.push(value);
            }

            debug!("Running step '{}'", bound.name);
            let result = bound.step.run(&inputs);
            for (key, value) in bound.input_keys.iter().zip(inputs) {
                frame.insert(key.clone(), value);
            }
            let outputs = result.map_err(|source| PipelineError::Step {
                step: bound.name.clone(),
                image_number,
                source: Box::new(source),
            })?;

            if outputs.len() != bound.output_keys.len() {
                if self.strict_output_arity {
                    return Err(PipelineError::Step {
                        step: bound.name.clone(),
                        image_number,
                        source: Box::new(PipelineError::OutputArity {
                            step: bound.name.clone(),
                            declared: bound.output_keys.len(),
                            returned: outputs.len(),
                        }),
                    });
                }
                debug!(
                    "Step '{}' returned {} values for {} output keys; binding {}",
                    bound.name,
                    outputs.len(),
                    bound.output_keys.len(),
                    outputs.len().min(bound.output_keys.len())
                );
            }

            for (key, value) in bound.output_keys.iter().zip(outputs) {
                frame.insert(key.clone(), value);
            }
            debug!("Finished step '{}'", bound.name);
        }

        Ok(frame)
    }

    /// Reset every step's per-session state.
    pub fn reset(&mut self) {
        for bound in &mut self.steps {
            bound.step.reset();
        }
    }
}
