//! Object boundaries and shape descriptors.
//!
//! A pixel is a perimeter pixel when its square neighbourhood of radius `r`
//! contains a different id; positions beyond the raster edge count as
//! different. Perimeter counts per object reuse the zonal accumulators.
//!
//! Shape descriptors (Jiao & Liu, 2012) from area A and perimeter P:
//!   form factor   = 100  · 4πA / P²
//!   square pixel  = 1000 · (1 − 4√A / P)
//!   fractal dim.  = 1000 · 2·ln(P/4) / ln(A)
//!   shape index   = 1000 · P / (4√A)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::{LabeledGrid, Mask, NO_OBJECT};
use crate::zonal::{aggregate, Reducer};

/// The 8-neighbourhood.
pub const DEFAULT_RADIUS: usize = 1;

/// Flag every object pixel that touches another id within `radius`.
pub fn perimeter_pixels(labels: &LabeledGrid, radius: usize) -> Mask {
    let mut mask = Mask::new(labels.width, labels.height, false);
    for row in 0..labels.height {
        for col in 0..labels.width {
            let id = labels.get(row, col);
            if id == NO_OBJECT {
                continue;
            }
            if labels.neighbours(row, col, radius).any(|n| n != Some(id)) {
                mask.set(row, col, true);
            }
        }
    }
    mask
}

/// Number of perimeter pixels per object.
pub fn perimeter_count(labels: &LabeledGrid, radius: usize) -> Result<BTreeMap<u32, u64>> {
    let band = perimeter_pixels(labels, radius).to_band();
    let stats = aggregate(labels, &[&band], &[Reducer::Sum])?;
    Ok(stats
        .objects
        .iter()
        .map(|(&id, obj)| (id, obj.bands[0].sum as u64))
        .collect())
}

// ── Shape descriptors ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeDescriptors {
    pub form_factor: f64,
    pub square_pixel: f64,
    pub fractal_dimension: f64,
    pub shape_index: f64,
}

impl ShapeDescriptors {
    /// Descriptors for area `area` and perimeter length `perimeter`.
    ///
    /// Undefined when `perimeter` is 0 or `area ≤ 1`.
    pub fn compute(area: f64, perimeter: f64) -> Option<Self> {
        if !(perimeter > 0.0) || !(area > 1.0) {
            return None;
        }
        let sqrt_a = area.sqrt();
        Some(Self {
            form_factor: 100.0 * 4.0 * std::f64::consts::PI * area / (perimeter * perimeter),
            square_pixel: 1000.0 * (1.0 - 4.0 * sqrt_a / perimeter),
            fractal_dimension: 1000.0 * 2.0 * (perimeter / 4.0).ln() / area.ln(),
            shape_index: 1000.0 * perimeter / (4.0 * sqrt_a),
        })
    }
}

/// Area, perimeter length and shape of one object in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectGeometry {
    pub area: f64,
    pub perimeter: f64,
    pub shape: Option<ShapeDescriptors>,
}

impl ObjectGeometry {
    /// `pixels` object pixels and `perimeter_pixels` boundary pixels of side `pixel_size`.
    pub fn from_counts(pixels: u64, perimeter_pixels: u64, pixel_size: f64) -> Self {
        let area = pixels as f64 * pixel_size * pixel_size;
        let perimeter = perimeter_pixels as f64 * pixel_size;
        Self { area, perimeter, shape: ShapeDescriptors::compute(area, perimeter) }
    }

    /// Degenerate objects carry no shape and are kept out of purity and sampling.
    pub fn is_degenerate(&self) -> bool {
        self.shape.is_none()
    }
}
