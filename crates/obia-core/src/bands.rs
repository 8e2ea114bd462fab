//! Typed band identity and the band stack.
//!
//! Composite bands are identified by `(Period, BandName)` rather than by
//! concatenated strings such as `"S2NDVI"`; the display form exists only for
//! column headers in exported tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{check_grid, ObiaError, Result};
use crate::grid::{Region, ValueBand};

/// Temporal slot a composite band belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum Period {
    /// Time-invariant layers (elevation, slope, ...).
    Static,
    /// Seasonal composite, 1-based.
    Season(u8),
    /// Monthly composite, 1-based.
    Month(u8),
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Static => Ok(()),
            Period::Season(s) => write!(f, "S{s}"),
            Period::Month(m) => write!(f, "M{m}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BandName(pub String);

impl From<&str> for BandName {
    fn from(s: &str) -> Self {
        BandName(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BandKey {
    pub period: Period,
    pub name: BandName,
}

impl BandKey {
    pub fn new(period: Period, name: impl Into<BandName>) -> Self {
        Self { period, name: name.into() }
    }
}

impl fmt::Display for BandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            Period::Static => write!(f, "{}", self.name.0),
            p => write!(f, "{p}_{}", self.name.0),
        }
    }
}

/// Value bands sharing one pixel grid, ordered by key.
#[derive(Debug, Clone, Default)]
pub struct BandStack {
    width: usize,
    height: usize,
    bands: BTreeMap<BandKey, ValueBand>,
}

impl BandStack {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, bands: BTreeMap::new() }
    }

    /// Add a band; its grid must match the stack's.
    pub fn insert(&mut self, key: BandKey, band: ValueBand) -> Result<()> {
        check_grid(&format!("band {key}"), (self.width, self.height), band.dims())?;
        self.bands.insert(key, band);
        Ok(())
    }

    pub fn get(&self, key: &BandKey) -> Result<&ValueBand> {
        self.bands.get(key).ok_or_else(|| ObiaError::MissingBand(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &BandKey> {
        self.bands.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BandKey, &ValueBand)> {
        self.bands.iter()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Every band cropped to `region`, in key order.
    pub fn window(&self, region: Region) -> Vec<ValueBand> {
        self.bands.values().map(|b| b.window(region)).collect()
    }
}
