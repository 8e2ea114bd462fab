//! Per-layer purity labelling.
//!
//! An object is pure for a reference layer when every one of its pixels
//! carries the same code: the population standard deviation of the codes is
//! exactly 0 and the mode lies in `1..=K`. Anything else is labelled 0.
//!
//! Reference rasters arrive with thematic codes; each layer's [`CodeRemap`]
//! maps them onto `0..=K` before aggregation. Missing reference pixels become
//! code 0 and still take part in the statistics, so an object only partly
//! covered by the layer comes out impure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::grid::ValueBand;
use crate::zonal::{Accumulator, ZonalStats};

/// Label given to impure or undefined objects.
pub const IMPURE: u16 = 0;

// ── Layer configuration ──────────────────────────────────────────────────────

/// Half-open range `[lower, upper)` of raw values mapped to `code`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub lower: f64,
    pub upper: f64,
    pub code: u16,
}

/// How raw reference values become class codes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeRemap {
    /// Values already are class codes.
    #[default]
    Identity,
    /// Explicit raw → code table; unlisted values become 0.
    Table { entries: BTreeMap<i64, u16> },
    /// First matching range wins; unmatched values become 0.
    Thresholds { ranges: Vec<ThresholdRange> },
}

impl CodeRemap {
    /// Code for one raw pixel value. No-data maps to 0.
    pub fn apply(&self, raw: f32) -> u16 {
        if !raw.is_finite() {
            return IMPURE;
        }
        let raw = raw as f64;
        match self {
            CodeRemap::Identity => {
                if raw.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&raw) {
                    raw as u16
                } else {
                    IMPURE
                }
            }
            CodeRemap::Table { entries } => {
                if raw.fract() != 0.0 {
                    return IMPURE;
                }
                entries.get(&(raw as i64)).copied().unwrap_or(IMPURE)
            }
            CodeRemap::Thresholds { ranges } => ranges
                .iter()
                .find(|r| raw >= r.lower && raw < r.upper)
                .map_or(IMPURE, |r| r.code),
        }
    }

    /// Remap a whole raster. The result has no no-data pixels.
    pub fn apply_band(&self, raw: &ValueBand) -> ValueBand {
        ValueBand {
            data: raw.data.iter().map(|&v| self.apply(v) as f32).collect(),
            width: raw.width,
            height: raw.height,
        }
    }
}

/// One reference layer: its name, class-count bound K, and code remap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub class_bound: u16,
    #[serde(default)]
    pub remap: CodeRemap,
}

impl LayerConfig {
    pub fn new(name: impl Into<String>, class_bound: u16) -> Self {
        Self { name: name.into(), class_bound, remap: CodeRemap::Identity }
    }

    pub fn with_remap(mut self, remap: CodeRemap) -> Self {
        self.remap = remap;
        self
    }

    pub fn classifier(&self) -> PurityClassifier {
        PurityClassifier::new(self.class_bound)
    }
}

// ── Classifier ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurityClassifier {
    pub class_bound: u16,
    /// Largest stdDev still counted as pure. 0 keeps the exact rule.
    pub tolerance: f64,
}

impl PurityClassifier {
    pub fn new(class_bound: u16) -> Self {
        Self { class_bound, tolerance: 0.0 }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    /// Purity label of one object's reference-layer accumulator.
    pub fn label(&self, acc: &Accumulator) -> u16 {
        let (Some(std), Some(mode)) = (acc.std_dev(), acc.mode()) else {
            return IMPURE;
        };
        if std > self.tolerance {
            return IMPURE;
        }
        // Modes count rounded values; the raw values must be the code itself.
        let code = mode as f64;
        let unanimous = if self.tolerance == 0.0 {
            acc.min == acc.max && acc.min == code
        } else {
            acc.mean().is_some_and(|m| (m - code).abs() <= self.tolerance)
        };
        if !unanimous {
            return IMPURE;
        }
        if mode >= 1 && mode <= self.class_bound as i64 {
            mode as u16
        } else {
            IMPURE
        }
    }

    /// Label every object of `stats` using band `band`, which must have been
    /// accumulated with code tracking.
    pub fn classify(&self, stats: &ZonalStats, band: usize) -> BTreeMap<u32, u16> {
        stats
            .objects
            .iter()
            .map(|(&id, obj)| (id, obj.bands.get(band).map_or(IMPURE, |acc| self.label(acc))))
            .collect()
    }
}
