//! External collaborators the engine delegates to.
//!
//! The engine never resolves geometry, aligns volumes, loads trained models or
//! stores manifests itself. Each concern is a trait; steps receive the
//! implementations through their [`StepContext`](crate::steps::StepContext)
//! and call them only at construction time, except for [`Registration`],
//! which runs once per frame.
//!
//! Implementations return `anyhow::Result`; failures are propagated unchanged
//! as [`PipelineError::Collaborator`](crate::error::PipelineError::Collaborator).
//!
//! # Implementing a Provider
//!
//! ```rust,ignore
//! use rtfmri_preprocess::providers::GeometryProvider;
//!
//! struct CortexDatabase { /* ... */ }
//!
//! impl GeometryProvider for CortexDatabase {
//!     fn mask(&self, surface: &str, transform: &str, mask_type: Option<&str>) -> anyhow::Result<Mask> {
//!         // look the mask up in the subject database
//!     }
//!     // ...
//! }
//! ```

mod linear;
mod memory;

pub use linear::{LinearProjection, LinearTrendModel};
pub use memory::{IdentityRegistration, InMemoryManifestStore, StaticArtifacts, StaticGeometry};

use crate::types::{Mask, Volume};
use anyhow::Result;
use ndarray::{Array1, ArrayView1};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolves masks, region labels and reference volumes for a subject.
///
/// Treated as a pure lookup: repeated calls with the same arguments must
/// return the same result.
pub trait GeometryProvider: Send + Sync {
    /// Boolean mask of `mask_type` (the provider's default when `None`).
    fn mask(&self, surface: &str, transform: &str, mask_type: Option<&str>) -> Result<Mask>;

    /// Masks for the requested region names. Names the provider cannot
    /// resolve are omitted from the result.
    fn roi_masks(
        &self,
        surface: &str,
        transform: &str,
        roi_names: &[String],
    ) -> Result<BTreeMap<String, Mask>>;

    /// Reference volume incoming volumes are aligned to.
    fn reference_volume(&self, surface: &str, transform: &str) -> Result<Volume>;
}

/// Numerical co-registration engine.
pub trait Registration: Send + Sync {
    /// Align `volume` to `reference`, returning the aligned volume.
    fn align(&self, volume: &Volume, reference: &Volume, two_pass: bool) -> Result<Volume>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

/// Projects activity into a reduced component space.
pub trait ComponentReducer: Send + Sync {
    fn transform(&self, activity: ArrayView1<'_, f64>) -> Result<Array1<f64>>;
}

/// Predicts expected activity from component scores.
pub trait TrendModel: Send + Sync {
    fn predict(&self, components: ArrayView1<'_, f64>) -> Result<Array1<f64>>;
}

/// Trained artifacts used by the detrending step.
#[derive(Clone)]
pub struct DetrendArtifacts {
    pub reducer: Arc<dyn ComponentReducer>,
    pub model: Arc<dyn TrendModel>,
}

impl std::fmt::Debug for DetrendArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetrendArtifacts").finish_non_exhaustive()
    }
}

/// Resolves per-subject trained artifacts.
pub trait ArtifactStore: Send + Sync {
    fn detrend_artifacts(&self, subject: &str, model_name: Option<&str>)
    -> Result<DetrendArtifacts>;
}

/// Key/value sink for step manifests.
///
/// The engine only writes; [`scan_prefix`](Self::scan_prefix) exists for the
/// rendering/control side that reads manifests back.
pub trait ManifestStore: Send + Sync {
    fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// All entries whose key starts with `prefix`, sorted by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>>;
}
