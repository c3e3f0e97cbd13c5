//! Real-time Preprocessing Pipeline Library
//!
//! A configurable engine that turns a declarative list of steps into a
//! per-frame transformation over streamed scan volumes.
//!
//! # Overview
//!
//! Each incoming volume travels through the pipeline as a [`Frame`], a map of
//! named values. Steps read named inputs from the frame and write named
//! outputs back, so later steps see earlier results:
//!
//! - **Declarative assembly**: a [`PipelineSpec`] lists steps by type name,
//!   arguments, and input/output keys
//! - **Stateful steps**: running statistics carry history across frames
//! - **Pluggable collaborators**: masks, registration, detrending models and
//!   manifest storage sit behind traits in [`providers`]
//! - **Manifest export**: every step's class and parameters are published
//!   under `pipeline:<id>:<index>:<param>`
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rtfmri_preprocess::{Frame, Pipeline, PipelineConfig, PipelineSpec, StepSpec, Volume};
//! use rtfmri_preprocess::providers::{InMemoryManifestStore, StaticGeometry};
//! use std::sync::Arc;
//!
//! let spec = PipelineSpec::new()
//!     .global("surface", "S1")
//!     .global("transform", "T1")
//!     .step(StepSpec::new("gm", "ApplyMask").inputs(["volume"]).outputs(["gm"]))
//!     .step(StepSpec::new("stats", "RunningMeanStd")
//!         .kwarg("n", 20)
//!         .inputs(["gm", "image_number"])
//!         .outputs(["mean", "std"]))
//!     .step(StepSpec::new("z", "ZScore").inputs(["gm", "mean", "std"]).outputs(["gm_z"]));
//!
//! let config = PipelineConfig::builder()
//!     .recording_id("subject01_run02")
//!     .build()?;
//!
//! let mut pipeline = Pipeline::builder()
//!     .spec(spec)
//!     .config(config)
//!     .geometry(Arc::new(geometry))
//!     .manifest_store(Arc::new(InMemoryManifestStore::new()))
//!     .build()?;
//!
//! for (i, volume) in volumes.into_iter().enumerate() {
//!     match pipeline.process(Frame::new(i as i64).with("volume", volume)) {
//!         Ok(frame) => println!("{:?}", frame.get("gm_z")),
//!         Err(e) => eprintln!("frame {} skipped: {}", i, e),
//!     }
//! }
//! ```
//!
//! # Custom Steps
//!
//! Implement [`steps::Step`] and register a constructor on a
//! [`StepRegistry`]:
//!
//! ```rust,ignore
//! let mut registry = StepRegistry::default();
//! registry.register("Scale", |args, _ctx| Ok(Box::new(Scale::from_args(args)?)));
//!
//! let pipeline = Pipeline::builder().spec(spec).registry(registry).build()?;
//! ```
//!
//! # Errors
//!
//! Build errors (unknown type names, failing constructors, bad configuration)
//! abort construction. Frame errors carry the frame's `image_number` and
//! leave the pipeline ready for the next frame; see
//! [`PipelineError::is_frame_error`].

pub mod config;
pub mod error;
pub mod masks;
pub mod pipeline;
pub mod providers;
pub mod stats;
pub mod steps;
pub mod types;

// Re-exports for convenient access
pub use config::{ConfigValidationError, PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, Result as PipelineResult, ResultExt};
pub use pipeline::{
    BoundStep, ExecutionEngine, Pipeline, PipelineBuilder, StepManifest, StepRegistry,
    merge_parameters, read_manifests,
};
pub use steps::{Step, StepArgs, StepContext};
pub use types::{Frame, IMAGE_NUMBER_KEY, Mask, Params, PipelineSpec, StepSpec, Value, Volume};
