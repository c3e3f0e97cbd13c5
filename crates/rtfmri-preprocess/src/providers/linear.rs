//! Linear implementations of the detrending artifacts.

use super::{ComponentReducer, TrendModel};
use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// PCA-style projection: `components · (x - mean)`.
///
/// `components` has one row per component and one column per input element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearProjection {
    pub mean: Array1<f64>,
    pub components: Array2<f64>,
}

impl LinearProjection {
    pub fn new(mean: Array1<f64>, components: Array2<f64>) -> Result<Self> {
        if components.ncols() != mean.len() {
            bail!(
                "projection components have {} columns but mean has {} elements",
                components.ncols(),
                mean.len()
            );
        }
        Ok(Self { mean, components })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }
}

impl ComponentReducer for LinearProjection {
    fn transform(&self, activity: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        if activity.len() != self.mean.len() {
            bail!(
                "projection expects {} elements, got {}",
                self.mean.len(),
                activity.len()
            );
        }
        let centered = &activity - &self.mean;
        Ok(self.components.dot(&centered))
    }
}

/// Linear regression from component scores: `coef · pcs + intercept`.
///
/// `coef` has one row per predicted element and one column per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTrendModel {
    pub coef: Array2<f64>,
    pub intercept: Array1<f64>,
}

impl LinearTrendModel {
    pub fn new(coef: Array2<f64>, intercept: Array1<f64>) -> Result<Self> {
        if coef.nrows() != intercept.len() {
            bail!(
                "trend model has {} coefficient rows but {} intercepts",
                coef.nrows(),
                intercept.len()
            );
        }
        Ok(Self { coef, intercept })
    }
}

impl TrendModel for LinearTrendModel {
    fn predict(&self, components: ArrayView1<'_, f64>) -> Result<Array1<f64>> {
        if components.len() != self.coef.ncols() {
            bail!(
                "trend model expects {} components, got {}",
                self.coef.ncols(),
                components.len()
            );
        }
        Ok(self.coef.dot(&components) + &self.intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_projection_centers_then_projects() {
        let projection =
            LinearProjection::new(array![1.0, 1.0], array![[1.0, 0.0], [1.0, 1.0]]).unwrap();
        let scores = projection.transform(array![3.0, 2.0].view()).unwrap();
        assert_eq!(scores, array![2.0, 3.0]);
    }

    #[test]
    fn test_projection_rejects_wrong_length() {
        let projection = LinearProjection::new(array![0.0], array![[1.0]]).unwrap();
        assert!(projection.transform(array![1.0, 2.0].view()).is_err());
    }

    #[test]
    fn test_trend_prediction() {
        let model =
            LinearTrendModel::new(array![[2.0], [0.5], [0.0]], array![1.0, 0.0, -1.0]).unwrap();
        let trend = model.predict(array![4.0].view()).unwrap();
        assert_eq!(trend, array![9.0, 2.0, -1.0]);
    }

    #[test]
    fn test_mismatched_construction_is_rejected() {
        assert!(LinearProjection::new(array![0.0, 0.0], array![[1.0]]).is_err());
        assert!(LinearTrendModel::new(array![[1.0]], array![0.0, 0.0]).is_err());
    }
}
