//! Mask-based projection steps.
//!
//! Masks are resolved once at construction through the geometry provider;
//! per-frame work is pure indexing.

use super::{Step, StepArgs, StepContext, array_input, expect_inputs};
use crate::error::{PipelineError, Result};
use crate::masks::{apply_mask, count_true, project, secondary_mask};
use crate::types::{Mask, Params, Value};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// Primary mask
// ============================================================================

/// Flatten the voxels of a volume selected by a boolean mask.
#[derive(Debug, Clone)]
pub struct ApplyMask {
    mask: Mask,
    params: Params,
}

impl ApplyMask {
    pub fn from_args(args: &StepArgs, ctx: &StepContext) -> Result<Self> {
        let surface = args.required_str(0, "surface")?;
        let transform = args.required_str(1, "transform")?;
        let mask_type = args.optional_str(2, "mask_type")?;

        let mask = ctx
            .geometry()?
            .mask(&surface, &transform, mask_type.as_deref())?;
        debug!(
            "Loaded mask {:?} with {} voxels for {}/{}",
            mask_type,
            count_true(&mask),
            surface,
            transform
        );

        Ok(Self {
            mask,
            params: args.describe([
                ("surface", json!(surface)),
                ("transform", json!(transform)),
                ("mask_type", json!(mask_type)),
            ]),
        })
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }
}

impl Step for ApplyMask {
    fn class_name(&self) -> &'static str {
        "ApplyMask"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let volume = array_input(self.class_name(), inputs, 0)?;
        let masked = apply_mask(volume, &self.mask)?;
        Ok(vec![Value::Array(masked.into_dyn())])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Secondary mask
// ============================================================================

/// Narrow a vector produced by `mask_type_1` down to the voxels also in
/// `mask_type_2`, as if their intersection had been applied to the volume.
#[derive(Debug, Clone)]
pub struct ApplySecondaryMask {
    indices: Vec<usize>,
    primary_len: usize,
    params: Params,
}

impl ApplySecondaryMask {
    pub fn from_args(args: &StepArgs, ctx: &StepContext) -> Result<Self> {
        let surface = args.required_str(0, "surface")?;
        let transform = args.required_str(1, "transform")?;
        let mask_type_1 = args.required_str(2, "mask_type_1")?;
        let mask_type_2 = args.required_str(3, "mask_type_2")?;

        let geometry = ctx.geometry()?;
        let primary = geometry.mask(&surface, &transform, Some(&mask_type_1))?;
        let secondary = geometry.mask(&surface, &transform, Some(&mask_type_2))?;
        let indices = secondary_mask(&primary, &secondary)?;

        Ok(Self {
            primary_len: count_true(&primary),
            indices,
            params: args.describe([
                ("surface", json!(surface)),
                ("transform", json!(transform)),
                ("mask_type_1", json!(mask_type_1)),
                ("mask_type_2", json!(mask_type_2)),
            ]),
        })
    }

    /// Positions within the primary vector that are kept.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Step for ApplySecondaryMask {
    fn class_name(&self) -> &'static str {
        "ApplySecondaryMask"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let vector = array_input(self.class_name(), inputs, 0)?;
        let narrowed = project(vector.iter(), &self.indices, self.primary_len)?;
        Ok(vec![Value::Array(narrowed.into_dyn())])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}

// ============================================================================
// Region summary
// ============================================================================

/// Mean activity of named regions, given a vector restricted to the
/// `pre_mask_name` mask.
#[derive(Debug, Clone)]
pub struct RegionSummary {
    regions: BTreeMap<String, Vec<usize>>,
    primary_len: usize,
    params: Params,
}

impl RegionSummary {
    pub fn from_args(args: &StepArgs, ctx: &StepContext) -> Result<Self> {
        let surface = args.required_str(0, "surface")?;
        let transform = args.required_str(1, "transform")?;
        let pre_mask_name = args.required_str(2, "pre_mask_name")?;
        let roi_names = args.string_list(3, "roi_names")?;

        let geometry = ctx.geometry()?;
        let primary = geometry.mask(&surface, &transform, Some(&pre_mask_name))?;
        let roi_masks = geometry.roi_masks(&surface, &transform, &roi_names)?;

        let mut regions = BTreeMap::new();
        for name in &roi_names {
            let roi = roi_masks
                .get(name)
                .ok_or_else(|| PipelineError::UnknownRegion(name.clone()))?;
            regions.insert(name.clone(), secondary_mask(&primary, roi)?);
        }

        Ok(Self {
            regions,
            primary_len: count_true(&primary),
            params: args.describe([
                ("surface", json!(surface)),
                ("transform", json!(transform)),
                ("pre_mask_name", json!(pre_mask_name)),
                ("roi_names", json!(roi_names)),
            ]),
        })
    }
}

impl Step for RegionSummary {
    fn class_name(&self) -> &'static str {
        "RegionSummary"
    }

    fn output_count(&self) -> usize {
        1
    }

    fn run(&mut self, inputs: &[Value]) -> Result<Vec<Value>> {
        expect_inputs(self.class_name(), inputs, 1)?;
        let activity = array_input(self.class_name(), inputs, 0)?;

        let mut summary = BTreeMap::new();
        for (name, indices) in &self.regions {
            let values = project(activity.iter(), indices, self.primary_len)?;
            let mean = values.sum() / values.len() as f64;
            summary.insert(name.clone(), mean);
        }
        Ok(vec![Value::Regions(summary)])
    }

    fn describe(&self) -> &Params {
        &self.params
    }
}
