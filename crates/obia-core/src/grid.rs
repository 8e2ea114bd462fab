//! Row-major raster containers shared by every stage: the object label grid,
//! per-pixel value bands and boolean masks.
//!
//! All three carry only `width × height` and their data; the label grid also
//! carries the georeferencing and the offset of the window it was cut from,
//! so pixel locations stay global when a scene is processed in tiles.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ObiaError, Result};

/// Label value marking pixels that belong to no object.
pub const NO_OBJECT: u32 = 0;

// ── Geometry ─────────────────────────────────────────────────────────────────

/// Map-space bounds of a raster. Row 0 is the `max_y` (north) edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Extent {
    /// Pixel-space extent: one unit per pixel.
    pub fn pixels(width: usize, height: usize) -> Self {
        Self {
            min_x: 0.0,
            max_x: width as f64,
            min_y: 0.0,
            max_y: height as f64,
        }
    }

    /// Centre of pixel `(row, col)` for a `width × height` raster covering `self`.
    pub fn pixel_centre(&self, width: usize, height: usize, row: usize, col: usize) -> (f64, f64) {
        let dx = (self.max_x - self.min_x) / width as f64;
        let dy = (self.max_y - self.min_y) / height as f64;
        (
            self.min_x + (col as f64 + 0.5) * dx,
            self.max_y - (row as f64 + 0.5) * dy,
        )
    }

    /// Bounds of `region` inside a `width × height` raster covering `self`.
    pub fn window(&self, width: usize, height: usize, region: Region) -> Extent {
        let dx = (self.max_x - self.min_x) / width as f64;
        let dy = (self.max_y - self.min_y) / height as f64;
        Extent {
            min_x: self.min_x + region.col0 as f64 * dx,
            max_x: self.min_x + (region.col0 + region.cols) as f64 * dx,
            min_y: self.max_y - (region.row0 + region.rows) as f64 * dy,
            max_y: self.max_y - region.row0 as f64 * dy,
        }
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub row0: usize,
    pub col0: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Region {
    pub fn full(width: usize, height: usize) -> Self {
        Self { row0: 0, col0: 0, rows: height, cols: width }
    }

    #[inline]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row0 && row < self.row0 + self.rows && col >= self.col0 && col < self.col0 + self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Grow by `margin` pixels on every side, clipped to a `width × height` raster.
    pub fn expand(&self, margin: usize, width: usize, height: usize) -> Region {
        let row0 = self.row0.saturating_sub(margin);
        let col0 = self.col0.saturating_sub(margin);
        let row1 = (self.row0 + self.rows + margin).min(height);
        let col1 = (self.col0 + self.cols + margin).min(width);
        Region { row0, col0, rows: row1 - row0, cols: col1 - col0 }
    }

    /// Re-express `self` relative to the origin of `outer`, which must enclose it.
    pub fn relative_to(&self, outer: &Region) -> Region {
        Region {
            row0: self.row0 - outer.row0,
            col0: self.col0 - outer.col0,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

/// A pixel position in the full raster plus its map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelLocation {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
}

impl PixelLocation {
    /// Row-major ordering key.
    pub fn key(&self) -> (usize, usize) {
        (self.row, self.col)
    }
}

fn check_len(what: &str, width: usize, height: usize, len: usize) -> Result<()> {
    let Some(expected) = width.checked_mul(height) else {
        return Err(ObiaError::InvalidConfig(format!("{what} of {width}x{height} pixels is too large")));
    };
    if expected != len {
        return Err(ObiaError::InvalidConfig(format!(
            "{what} holds {len} values, expected {width}x{height} = {expected}"
        )));
    }
    Ok(())
}

// ── Label grid ───────────────────────────────────────────────────────────────

/// Object ids per pixel, row-major. `NO_OBJECT` marks no-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledGrid {
    pub data: Vec<u32>,
    pub width: usize,
    pub height: usize,
    pub extent: Extent,
    /// Position of this grid's first pixel in the raster it was cut from.
    #[serde(default)]
    pub origin: (usize, usize),
}

impl LabeledGrid {
    /// A grid filled with `fill`, in pixel-space coordinates.
    pub fn new(width: usize, height: usize, fill: u32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            extent: Extent::pixels(width, height),
            origin: (0, 0),
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<u32>) -> Result<Self> {
        check_len("label grid", width, height, data.len())?;
        Ok(Self {
            data,
            width,
            height,
            extent: Extent::pixels(width, height),
            origin: (0, 0),
        })
    }

    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.extent = extent;
        self
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, id: u32) {
        self.data[row * self.width + col] = id;
    }

    /// Label at a signed offset from `(row, col)`; `None` outside the raster.
    #[inline]
    pub fn get_offset(&self, row: usize, col: usize, dr: isize, dc: isize) -> Option<u32> {
        let r = row as isize + dr;
        let c = col as isize + dc;
        if r < 0 || c < 0 || r >= self.height as isize || c >= self.width as isize {
            return None;
        }
        Some(self.get(r as usize, c as usize))
    }

    /// Labels of the square neighbourhood of radius `radius` around `(row, col)`,
    /// excluding the centre. Positions outside the raster yield `None`.
    pub fn neighbours(&self, row: usize, col: usize, radius: usize) -> impl Iterator<Item = Option<u32>> + '_ {
        let r = radius as isize;
        (-r..=r)
            .flat_map(move |dr| (-r..=r).map(move |dc| (dr, dc)))
            .filter(|&(dr, dc)| dr != 0 || dc != 0)
            .map(move |(dr, dc)| self.get_offset(row, col, dr, dc))
    }

    /// Distinct object ids present in the grid, ascending.
    pub fn object_ids(&self) -> BTreeSet<u32> {
        self.data.iter().copied().filter(|&id| id != NO_OBJECT).collect()
    }

    /// Location of a pixel of this grid in full-raster terms.
    pub fn location(&self, row: usize, col: usize) -> PixelLocation {
        let (x, y) = self.extent.pixel_centre(self.width, self.height, row, col);
        PixelLocation {
            row: self.origin.0 + row,
            col: self.origin.1 + col,
            x,
            y,
        }
    }

    /// Copy out `region` as its own grid, keeping global locations intact.
    pub fn window(&self, region: Region) -> LabeledGrid {
        LabeledGrid {
            data: copy_region(&self.data, self.width, region),
            width: region.cols,
            height: region.rows,
            extent: self.extent.window(self.width, self.height, region),
            origin: (self.origin.0 + region.row0, self.origin.1 + region.col0),
        }
    }
}

fn copy_region<T: Copy>(data: &[T], width: usize, region: Region) -> Vec<T> {
    let mut out = Vec::with_capacity(region.rows * region.cols);
    for r in region.row0..region.row0 + region.rows {
        let start = r * width + region.col0;
        out.extend_from_slice(&data[start..start + region.cols]);
    }
    out
}

// ── Value band ───────────────────────────────────────────────────────────────

/// Per-pixel values, row-major. `NaN` is no-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueBand {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl ValueBand {
    pub fn new(width: usize, height: usize, fill: f32) -> Self {
        Self { data: vec![fill; width * height], width, height }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        check_len("value band", width, height, data.len())?;
        Ok(Self { data, width, height })
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    pub fn window(&self, region: Region) -> ValueBand {
        ValueBand {
            data: copy_region(&self.data, self.width, region),
            width: region.cols,
            height: region.rows,
        }
    }
}

// ── Mask ─────────────────────────────────────────────────────────────────────

/// Per-pixel boolean flags, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub data: Vec<bool>,
    pub width: usize,
    pub height: usize,
}

impl Mask {
    pub fn new(width: usize, height: usize, fill: bool) -> Self {
        Self { data: vec![fill; width * height], width, height }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<bool>) -> Result<Self> {
        check_len("mask", width, height, data.len())?;
        Ok(Self { data, width, height })
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: bool) {
        self.data[row * self.width + col] = val;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }

    pub fn window(&self, region: Region) -> Mask {
        Mask {
            data: copy_region(&self.data, self.width, region),
            width: region.cols,
            height: region.rows,
        }
    }

    /// 1.0 / 0.0 indicator band, for feeding flags through the zonal reducers.
    pub fn to_band(&self) -> ValueBand {
        ValueBand {
            data: self.data.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            width: self.width,
            height: self.height,
        }
    }
}
