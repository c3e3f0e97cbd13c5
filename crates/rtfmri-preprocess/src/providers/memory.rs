//! In-memory collaborator implementations.
//!
//! Useful for tests, demos and embedding the engine next to a loader that
//! already has everything in memory. The geometry and artifact tables are
//! serde types so a driver can load them from JSON.

use super::{
    ArtifactStore, DetrendArtifacts, GeometryProvider, LinearProjection, LinearTrendModel,
    ManifestStore, Registration,
};
use crate::types::{Mask, Volume};
use anyhow::{Result, anyhow};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// Geometry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MaskEntry {
    surface: String,
    transform: String,
    #[serde(default)]
    mask_type: Option<String>,
    mask: Mask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoiEntry {
    surface: String,
    transform: String,
    name: String,
    mask: Mask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReferenceEntry {
    surface: String,
    transform: String,
    volume: Volume,
}

/// Geometry provider backed by fixed tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticGeometry {
    #[serde(default)]
    masks: Vec<MaskEntry>,
    #[serde(default)]
    rois: Vec<RoiEntry>,
    #[serde(default)]
    references: Vec<ReferenceEntry>,
}

impl StaticGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask(
        mut self,
        surface: impl Into<String>,
        transform: impl Into<String>,
        mask_type: Option<&str>,
        mask: Mask,
    ) -> Self {
        self.masks.push(MaskEntry {
            surface: surface.into(),
            transform: transform.into(),
            mask_type: mask_type.map(str::to_string),
            mask,
        });
        self
    }

    pub fn with_roi(
        mut self,
        surface: impl Into<String>,
        transform: impl Into<String>,
        name: impl Into<String>,
        mask: Mask,
    ) -> Self {
        self.rois.push(RoiEntry {
            surface: surface.into(),
            transform: transform.into(),
            name: name.into(),
            mask,
        });
        self
    }

    pub fn with_reference(
        mut self,
        surface: impl Into<String>,
        transform: impl Into<String>,
        volume: Volume,
    ) -> Self {
        self.references.push(ReferenceEntry {
            surface: surface.into(),
            transform: transform.into(),
            volume,
        });
        self
    }
}

impl GeometryProvider for StaticGeometry {
    fn mask(&self, surface: &str, transform: &str, mask_type: Option<&str>) -> Result<Mask> {
        self.masks
            .iter()
            .find(|e| {
                e.surface == surface && e.transform == transform && e.mask_type.as_deref() == mask_type
            })
            .map(|e| e.mask.clone())
            .ok_or_else(|| {
                anyhow!(
                    "no mask '{}' for {}/{}",
                    mask_type.unwrap_or("<default>"),
                    surface,
                    transform
                )
            })
    }

    fn roi_masks(
        &self,
        surface: &str,
        transform: &str,
        roi_names: &[String],
    ) -> Result<BTreeMap<String, Mask>> {
        Ok(self
            .rois
            .iter()
            .filter(|e| e.surface == surface && e.transform == transform)
            .filter(|e| roi_names.contains(&e.name))
            .map(|e| (e.name.clone(), e.mask.clone()))
            .collect())
    }

    fn reference_volume(&self, surface: &str, transform: &str) -> Result<Volume> {
        self.references
            .iter()
            .find(|e| e.surface == surface && e.transform == transform)
            .map(|e| e.volume.clone())
            .ok_or_else(|| anyhow!("no reference volume for {}/{}", surface, transform))
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Registration that assumes volumes are already aligned: returns the input
/// data placed in the reference's space.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRegistration;

impl Registration for IdentityRegistration {
    fn align(&self, volume: &Volume, reference: &Volume, _two_pass: bool) -> Result<Volume> {
        if volume.data.shape() != reference.data.shape() {
            return Err(anyhow!(
                "cannot align volume of shape {:?} to reference of shape {:?}",
                volume.data.shape(),
                reference.data.shape()
            ));
        }
        Ok(Volume {
            data: volume.data.clone(),
            affine: reference.affine.clone(),
        })
    }

    fn name(&self) -> &str {
        "identity"
    }
}

// ============================================================================
// Artifacts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactEntry {
    subject: String,
    #[serde(default)]
    model_name: Option<String>,
    projection: LinearProjection,
    trend: LinearTrendModel,
}

/// Artifact store holding linear detrending models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticArtifacts {
    #[serde(default)]
    entries: Vec<ArtifactEntry>,
}

impl StaticArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detrender(
        mut self,
        subject: impl Into<String>,
        model_name: Option<&str>,
        projection: LinearProjection,
        trend: LinearTrendModel,
    ) -> Self {
        self.entries.push(ArtifactEntry {
            subject: subject.into(),
            model_name: model_name.map(str::to_string),
            projection,
            trend,
        });
        self
    }
}

impl ArtifactStore for StaticArtifacts {
    fn detrend_artifacts(
        &self,
        subject: &str,
        model_name: Option<&str>,
    ) -> Result<DetrendArtifacts> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.subject == subject && e.model_name.as_deref() == model_name)
            .ok_or_else(|| {
                anyhow!(
                    "no detrend model '{}' for subject '{}'",
                    model_name.unwrap_or("<default>"),
                    subject
                )
            })?;

        Ok(DetrendArtifacts {
            reducer: Arc::new(entry.projection.clone()),
            model: Arc::new(entry.trend.clone()),
        })
    }
}

// ============================================================================
// Manifests
// ============================================================================

/// Manifest store kept in memory and shareable with a reader thread.
#[derive(Debug, Default)]
pub struct InMemoryManifestStore {
    entries: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ManifestStore for InMemoryManifestStore {
    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, serde_json::Value)>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn, array};

    #[test]
    fn test_static_geometry_mask_lookup() {
        let mask = array![true, false].into_dyn();
        let geometry = StaticGeometry::new().with_mask("S1", "T1", Some("thick"), mask.clone());

        assert_eq!(geometry.mask("S1", "T1", Some("thick")).unwrap(), mask);
        assert!(geometry.mask("S1", "T1", None).is_err());
        assert!(geometry.mask("S2", "T1", Some("thick")).is_err());
    }

    #[test]
    fn test_static_geometry_roi_lookup_omits_unknown() {
        let geometry = StaticGeometry::new()
            .with_roi("S1", "T1", "V1", array![true].into_dyn())
            .with_roi("S1", "T1", "MT", array![false].into_dyn());

        let names = vec!["V1".to_string(), "FFA".to_string()];
        let rois = geometry.roi_masks("S1", "T1", &names).unwrap();
        assert_eq!(rois.len(), 1);
        assert!(rois.contains_key("V1"));
    }

    #[test]
    fn test_identity_registration_takes_reference_space() {
        let reference = Volume::identity(ArrayD::zeros(IxDyn(&[2, 2])));
        let mut volume = Volume::identity(ArrayD::ones(IxDyn(&[2, 2])));
        volume.affine[[0, 3]] = 4.0;

        let aligned = IdentityRegistration.align(&volume, &reference, false).unwrap();
        assert_eq!(aligned.data, volume.data);
        assert_eq!(aligned.affine, reference.affine);
    }

    #[test]
    fn test_static_artifacts_lookup() {
        let artifacts = StaticArtifacts::new().with_detrender(
            "S1",
            Some("wm"),
            LinearProjection::new(array![0.0], array![[1.0]]).unwrap(),
            LinearTrendModel::new(array![[1.0]], array![0.0]).unwrap(),
        );

        assert!(artifacts.detrend_artifacts("S1", Some("wm")).is_ok());
        assert!(artifacts.detrend_artifacts("S1", None).is_err());
    }

    #[test]
    fn test_manifest_scan_prefix() {
        let store = InMemoryManifestStore::new();
        store.set("pipeline:1:0:class_name", "ZScore".into()).unwrap();
        store.set("pipeline:1:1:class_name", "Debug".into()).unwrap();
        store.set("pipeline:2:0:class_name", "Debug".into()).unwrap();

        let entries = store.scan_prefix("pipeline:1:").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "pipeline:1:0:class_name");
        assert_eq!(store.len(), 3);
    }
}
