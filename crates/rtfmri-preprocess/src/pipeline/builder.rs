//! Pipeline assembly.
//!
//! This module provides the `Pipeline` struct and the builder that turns a
//! [`PipelineSpec`] into constructed steps.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::executor::{BoundStep, ExecutionEngine};
use crate::pipeline::registrar::{StepRegistrar, pipeline_key};
use crate::pipeline::StepRegistry;
use crate::providers::{ArtifactStore, GeometryProvider, ManifestStore, Registration};
use crate::steps::{Step, StepArgs, StepContext};
use crate::types::{Frame, Params, PipelineSpec, StepSpec};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A built preprocessing pipeline.
///
/// Use [`Pipeline::builder()`] to create one from a [`PipelineSpec`].
///
/// # Example
///
/// ```rust,ignore
/// use rtfmri_preprocess::{Frame, Pipeline, PipelineConfig, PipelineSpec, StepSpec};
/// use rtfmri_preprocess::providers::{InMemoryManifestStore, StaticGeometry};
/// use std::sync::Arc;
///
/// let spec = PipelineSpec::new()
///     .global("surface", "S1")
///     .global("transform", "T1")
///     .step(StepSpec::new("gm", "ApplyMask").inputs(["volume"]).outputs(["gm"]))
///     .step(StepSpec::new("stats", "IncrementalMeanStd").inputs(["gm"]).outputs(["mean", "std"]))
///     .step(StepSpec::new("z", "ZScore").inputs(["gm", "mean", "std"]).outputs(["gm_z"]));
///
/// let mut pipeline = Pipeline::builder()
///     .spec(spec)
///     .geometry(Arc::new(geometry))
///     .manifest_store(store.clone())
///     .build()?;
///
/// let frame = pipeline.process(Frame::new(0).with("volume", volume))?;
/// println!("{:?}", frame.get("gm_z"));
/// ```
#[derive(Debug)]
pub struct Pipeline {
    id: String,
    config: PipelineConfig,
    global_parameters: Params,
    engine: ExecutionEngine,
}

// Drivers move the pipeline onto a dedicated worker thread
static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Identifier used in manifest keys.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Manifest key prefix, `pipeline:<id>`.
    pub fn key(&self) -> String {
        pipeline_key(&self.id)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn global_parameters(&self) -> &Params {
        &self.global_parameters
    }

    /// Number of runtime steps.
    pub fn len(&self) -> usize {
        self.engine.steps().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.steps().is_empty()
    }

    /// Runtime step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.engine.steps().iter().map(BoundStep::name).collect()
    }

    pub fn steps(&self) -> &[BoundStep] {
        self.engine.steps()
    }

    /// Run one frame through every runtime step.
    ///
    /// # Errors
    ///
    /// Per-frame errors ([`PipelineError::MissingKey`], [`PipelineError::Step`])
    /// carry the frame's `image_number`. The pipeline stays usable afterwards.
    pub fn process(&mut self, frame: Frame) -> Result<Frame> {
        self.engine.process(frame)
    }

    /// Start a new logical session: every step forgets its history.
    pub fn reset(&mut self) {
        info!("Resetting pipeline {}", self.id);
        self.engine.reset();
    }

    /// Export every runtime step's manifest to `store`.
    pub fn register(&self, store: &dyn ManifestStore) -> Result<()> {
        let registrar = StepRegistrar::new(store, &self.id);
        for (index, bound) in self.engine.steps().iter().enumerate() {
            registrar.register(index, bound.step())?;
        }
        registrar.finish(self.len())?;
        info!("Registered {} steps under {}", self.len(), self.key());
        Ok(())
    }
}

/// Merge global parameters under a step's keyword arguments.
///
/// Keyword arguments win over same-named globals; neither input is modified.
pub fn merge_parameters(global: &Params, kwargs: &Params) -> Params {
    let mut merged = global.clone();
    merged.extend(kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn generate_pipeline_id() -> String {
    rand::random::<u32>().to_string()
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    spec: Option<PipelineSpec>,
    config: Option<PipelineConfig>,
    registry: Option<StepRegistry>,
    geometry: Option<Arc<dyn GeometryProvider>>,
    registration: Option<Arc<dyn Registration>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    manifest_store: Option<Arc<dyn ManifestStore>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline specification. Required.
    pub fn spec(mut self, spec: PipelineSpec) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Set the session configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom step registry instead of the built-ins.
    pub fn registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn geometry(mut self, geometry: Arc<dyn GeometryProvider>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn registration(mut self, registration: Arc<dyn Registration>) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Store that receives step manifests after a successful build.
    ///
    /// Ignored when `register_steps` is disabled in the configuration.
    pub fn manifest_store(mut self, store: Arc<dyn ManifestStore>) -> Self {
        self.manifest_store = Some(store);
        self
    }

    /// Construct every step.
    ///
    /// Static steps are constructed and set up first, then dropped. Any
    /// failure aborts the whole build.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Configuration`] for an invalid config or spec.
    /// - [`PipelineError::UnknownStepType`] for an unregistered type name.
    /// - [`PipelineError::StepConstruction`] when a constructor fails.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let spec = self
            .spec
            .ok_or_else(|| PipelineError::Configuration("no pipeline spec provided".to_string()))?;
        spec.validate()?;

        let id = config
            .pipeline_id
            .clone()
            .unwrap_or_else(generate_pipeline_id);
        let registry = self.registry.unwrap_or_default();
        let context = StepContext {
            geometry: self.geometry,
            registration: self.registration,
            artifacts: self.artifacts,
            recording_id: config.recording_id.clone(),
            recording_root: config.recording_root.clone(),
        };

        info!(
            "Building pipeline {} ({} static, {} runtime steps)",
            id,
            spec.static_steps.len(),
            spec.steps.len()
        );

        for step_spec in &spec.static_steps {
            let mut step = construct(step_spec, &spec.global_parameters, &registry, &context)?;
            step.setup()
                .map_err(|source| construction_error(step_spec, source))?;
            debug!("Static step '{}' set up", step_spec.name);
        }

        let mut steps = Vec::with_capacity(spec.steps.len());
        for step_spec in &spec.steps {
            let step = construct(step_spec, &spec.global_parameters, &registry, &context)?;
            if step.output_count() != step_spec.output_keys.len() {
                warn!(
                    "Step '{}' ({}) returns {} values but declares {} output keys",
                    step_spec.name,
                    step_spec.type_name,
                    step.output_count(),
                    step_spec.output_keys.len()
                );
            }
            steps.push(BoundStep::new(
                step_spec.name.clone(),
                step_spec.input_keys.clone(),
                step_spec.output_keys.clone(),
                step,
            ));
        }

        let pipeline = Pipeline {
            id,
            engine: ExecutionEngine::new(steps, config.strict_output_arity),
            global_parameters: spec.global_parameters,
            config,
        };

        if pipeline.config.register_steps
            && let Some(store) = &self.manifest_store
        {
            pipeline.register(store.as_ref())?;
        }

        info!("Pipeline {} ready: {:?}", pipeline.id, pipeline.step_names());
        Ok(pipeline)
    }
}

fn construction_error(spec: &StepSpec, source: PipelineError) -> PipelineError {
    PipelineError::StepConstruction {
        step: spec.name.clone(),
        type_name: spec.type_name.clone(),
        source: Box::new(source),
    }
}

fn construct(
    spec: &StepSpec,
    global_parameters: &Params,
    registry: &StepRegistry,
    context: &StepContext,
) -> Result<Box<dyn Step>> {
    let factory = registry.resolve(&spec.type_name)?;
    let args = StepArgs::new(
        spec.positional_args.clone(),
        merge_parameters(global_parameters, &spec.keyword_args),
    );
    debug!("Constructing '{}' as {}", spec.name, spec.type_name);
    factory(&args, context).map_err(|source| construction_error(spec, source))
}
