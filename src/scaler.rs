//! Log transform and the pretrained robust scaler
//!
//! The scaler's median/IQR parameters are fitted once offline, loaded at
//! startup, and injected into the pipeline as an immutable dependency. They
//! are never refit at inference time; running with mismatched parameters is a
//! correctness bug, so a missing or degenerate parameter file is fatal.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context};
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::features::N_FEATURES;

/// Median-centering, IQR-scaling transform over the feature axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustScaler {
    /// Per-feature median
    pub center: [f64; N_FEATURES],
    /// Per-feature interquartile range
    pub scale: [f64; N_FEATURES],
}

impl RobustScaler {
    /// Validate the fitted parameters; a zero or non-finite IQR would make the
    /// transform degenerate and is rejected outright.
    pub fn new(center: [f64; N_FEATURES], scale: [f64; N_FEATURES]) -> crate::Result<Self> {
        for (column, &s) in scale.iter().enumerate() {
            if !s.is_finite() || s == 0.0 {
                bail!("degenerate scale (IQR) {s} for feature column {column}");
            }
        }
        for (column, &c) in center.iter().enumerate() {
            if !c.is_finite() {
                bail!("non-finite center {c} for feature column {column}");
            }
        }
        Ok(Self { center, scale })
    }

    /// Load fitted parameters from a JSON file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("cannot open scaler parameter file {}", path.display()))?;
        let raw: RobustScaler = serde_json::from_reader(file)
            .with_context(|| format!("invalid scaler parameters in {}", path.display()))?;
        Self::new(raw.center, raw.scale)
    }

    /// Scale each feature column independently, preserving the 3D shape
    ///
    /// Equivalent to flattening the (customers × months) axes, transforming
    /// the 3 columns, and reshaping back.
    pub fn transform(&self, tensor: &mut Array3<f64>) {
        for f in 0..N_FEATURES {
            let center = self.center[f];
            let scale = self.scale[f];
            tensor
                .index_axis_mut(Axis(2), f)
                .mapv_inplace(|v| (v - center) / scale);
        }
    }

    /// Undo `transform`
    pub fn inverse_transform(&self, tensor: &mut Array3<f64>) {
        for f in 0..N_FEATURES {
            let center = self.center[f];
            let scale = self.scale[f];
            tensor
                .index_axis_mut(Axis(2), f)
                .mapv_inplace(|v| v * scale + center);
        }
    }

    /// The identity transform; handy in tests and for unscaled inspection
    pub fn identity() -> Self {
        Self {
            center: [0.0; N_FEATURES],
            scale: [1.0; N_FEATURES],
        }
    }
}

/// Elementwise log1p over the whole tensor
///
/// Stabilizes the heavy-tailed monetary and count features; defined for all
/// values >= 0, which the upstream row validation guarantees.
pub fn log1p_inplace(tensor: &mut Array3<f64>) {
    tensor.mapv_inplace(f64::ln_1p);
}
