//! Pipeline module.
//!
//! This module provides the pipeline itself, the step registry it resolves
//! type names through, and manifest export.

mod builder;
mod executor;
pub mod registrar;
mod registry;

pub use builder::{Pipeline, PipelineBuilder, merge_parameters};
pub use executor::{BoundStep, ExecutionEngine};
pub use registrar::{StepManifest, StepRegistrar, pipeline_key, read_manifests};
pub use registry::StepRegistry;
