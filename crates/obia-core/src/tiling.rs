//! Tiled execution over one globally labelled raster.
//!
//! Each tile is read as its core plus a halo of `radius` pixels, so perimeter
//! flags along seams see the neighbouring tile's labels. Only core pixels are
//! accumulated. Objects that continue into the halo are keyed as fragments
//! of this tile; reconciliation folds every key back onto its object id by
//! merging accumulators, before any statistic is finalised. A tiled run and
//! an untiled run therefore produce the same statistics.
//!
//! Tiles are independent. With the `threading` feature they are fetched and
//! accumulated on the rayon pool; partials are absorbed in tile order.
//! A [`CancelToken`] is checked before each tile starts.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::anchors::{first_anchors_in, merge_anchors};
use crate::boundary::perimeter_pixels;
use crate::error::{check_grid, ObiaError, Result};
use crate::grid::{LabeledGrid, Mask, PixelLocation, Region, ValueBand, NO_OBJECT};
use crate::zonal::{accumulate, ObjectAccumulator, ZonalStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub id: TileId,
    /// Pixels this tile is responsible for.
    pub core: Region,
    /// Core plus halo, clipped to the raster.
    pub window: Region,
}

/// Tiles whose cores partition a `width × height` raster.
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub width: usize,
    pub height: usize,
    pub tile_size: usize,
    pub halo: usize,
    pub tiles: Vec<Tile>,
}

impl TilePlan {
    pub fn new(width: usize, height: usize, tile_size: usize, halo: usize) -> Result<Self> {
        if tile_size == 0 {
            return Err(ObiaError::InvalidConfig("tile size must be at least 1".into()));
        }
        let mut tiles = Vec::new();
        for row0 in (0..height).step_by(tile_size) {
            for col0 in (0..width).step_by(tile_size) {
                let core = Region {
                    row0,
                    col0,
                    rows: tile_size.min(height - row0),
                    cols: tile_size.min(width - col0),
                };
                tiles.push(Tile {
                    id: TileId(tiles.len()),
                    core,
                    window: core.expand(halo, width, height),
                });
            }
        }
        Ok(Self { width, height, tile_size, halo, tiles })
    }

    /// The whole raster as a single tile.
    pub fn single(width: usize, height: usize) -> Self {
        let core = Region::full(width, height);
        Self {
            width,
            height,
            tile_size: width.max(height),
            halo: 0,
            tiles: vec![Tile { id: TileId(0), core, window: core }],
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn signature(&self, layout: BandLayout, radius: usize) -> PlanSignature {
        PlanSignature {
            width: self.width,
            height: self.height,
            tile_size: self.tile_size,
            halo: self.halo,
            radius,
            layout,
        }
    }
}

/// Everything that decides which pixels a tile id covers and how its bands
/// are laid out. Partials from different signatures cannot be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSignature {
    pub width: usize,
    pub height: usize,
    pub tile_size: usize,
    pub halo: usize,
    pub radius: usize,
    pub layout: BandLayout,
}

/// Identity of a per-tile partial before reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKey {
    /// Object lies entirely inside one tile core.
    Whole(u32),
    /// Part of an object that continues past the tile core.
    Fragment { tile: TileId, local: u32 },
}

impl ObjectKey {
    pub fn id(&self) -> u32 {
        match *self {
            ObjectKey::Whole(id) => id,
            ObjectKey::Fragment { local, .. } => local,
        }
    }
}

/// Order of the bands a tile source delivers, followed by the two indicator
/// bands appended during accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLayout {
    pub features: usize,
    pub references: usize,
}

impl BandLayout {
    pub fn feature(&self, i: usize) -> usize {
        i
    }

    pub fn reference(&self, i: usize) -> usize {
        self.features + i
    }

    pub fn perimeter(&self) -> usize {
        self.features + self.references
    }

    pub fn validation(&self) -> usize {
        self.features + self.references + 1
    }

    /// Bands a source must deliver per tile.
    pub fn source_bands(&self) -> usize {
        self.features + self.references
    }

    /// Mode tables are only kept for reference layers.
    fn track_codes(&self) -> Vec<bool> {
        let mut track = vec![false; self.features];
        track.extend(std::iter::repeat(true).take(self.references));
        track.extend([false, false]);
        track
    }
}

// ── Sources ──────────────────────────────────────────────────────────────────

/// Rasters of one tile window: labels, feature bands then reference codes
/// (see [`BandLayout`]), validation marks and anchors.
#[derive(Debug, Clone)]
pub struct TileData {
    pub labels: LabeledGrid,
    pub bands: Vec<ValueBand>,
    pub validation: Mask,
    pub anchors: Mask,
}

/// Supplies tile windows. Implementations that fetch remotely report
/// failures as [`ObiaError::TileFetch`].
pub trait TileSource: Sync {
    fn layout(&self) -> BandLayout;
    fn fetch(&self, tile: &Tile) -> Result<TileData>;
}

// ── Per-tile accumulation ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TilePartial {
    pub tile: TileId,
    pub objects: HashMap<ObjectKey, ObjectAccumulator>,
    pub anchors: BTreeMap<u32, PixelLocation>,
}

/// Ids present in the window outside `core`.
fn halo_ids(labels: &LabeledGrid, core: Region) -> HashSet<u32> {
    let mut ids = HashSet::new();
    for row in 0..labels.height {
        for col in 0..labels.width {
            let id = labels.get(row, col);
            if id != NO_OBJECT && !core.contains(row, col) {
                ids.insert(id);
            }
        }
    }
    ids
}

pub fn process_tile(tile: &Tile, data: &TileData, layout: BandLayout, radius: usize) -> Result<TilePartial> {
    let dims = (tile.window.cols, tile.window.rows);
    check_grid("tile labels", dims, data.labels.dims())?;
    check_grid("tile validation marks", dims, data.validation.dims())?;
    check_grid("tile anchors", dims, data.anchors.dims())?;
    if data.bands.len() != layout.source_bands() {
        return Err(ObiaError::InvalidConfig(format!(
            "tile {} delivered {} bands, expected {}",
            tile.id.0,
            data.bands.len(),
            layout.source_bands()
        )));
    }

    let core = tile.core.relative_to(&tile.window);
    let perimeter = perimeter_pixels(&data.labels, radius).to_band();
    let validation = data.validation.to_band();
    let mut bands: Vec<&ValueBand> = data.bands.iter().collect();
    bands.push(&perimeter);
    bands.push(&validation);

    let by_id = accumulate(&data.labels, &bands, &layout.track_codes(), core)?;
    let continuing = halo_ids(&data.labels, core);
    let objects = by_id
        .into_iter()
        .map(|(id, acc)| {
            let key = if continuing.contains(&id) {
                ObjectKey::Fragment { tile: tile.id, local: id }
            } else {
                ObjectKey::Whole(id)
            };
            (key, acc)
        })
        .collect();
    let anchors = first_anchors_in(&data.labels, &data.anchors, core)?;

    Ok(TilePartial { tile: tile.id, objects, anchors })
}

// ── Reconciliation ───────────────────────────────────────────────────────────

/// Everything merged so far. Valid after any number of tiles, so a cancelled
/// run can be resumed by passing it back with the same source and plan.
#[derive(Debug, Clone, Default)]
pub struct MergeState {
    /// Plan the completed tiles belong to; `None` until the first run.
    pub plan: Option<PlanSignature>,
    pub objects: HashMap<u32, ObjectAccumulator>,
    pub anchors: BTreeMap<u32, PixelLocation>,
    pub completed: BTreeSet<TileId>,
    /// Fragment partials folded into their objects.
    pub fragments: usize,
}

impl MergeState {
    /// Empty state bound to `plan`, for callers that absorb tiles themselves.
    pub fn for_plan(plan: &TilePlan, layout: BandLayout, radius: usize) -> Self {
        Self { plan: Some(plan.signature(layout, radius)), ..Self::default() }
    }

    /// Fail unless this state can continue under `signature`.
    fn check_plan(&self, signature: &PlanSignature, tiles: usize) -> Result<()> {
        match &self.plan {
            Some(own) if own != signature => Err(ObiaError::InvalidConfig(format!(
                "merge state was built for {own:?}, cannot resume under {signature:?}"
            ))),
            None if !self.completed.is_empty() => Err(ObiaError::InvalidConfig(
                "merge state has completed tiles but no plan".into(),
            )),
            _ => match self.completed.iter().find(|t| t.0 >= tiles) {
                Some(t) => Err(ObiaError::InvalidConfig(format!(
                    "completed tile {} is not in a {tiles}-tile plan",
                    t.0
                ))),
                None => Ok(()),
            },
        }
    }

    pub fn absorb(&mut self, partial: TilePartial) {
        let mut keys: Vec<ObjectKey> = partial.objects.keys().copied().collect();
        keys.sort_unstable();
        let mut objects = partial.objects;
        for key in keys {
            let Some(acc) = objects.remove(&key) else { continue };
            let id = key.id();
            match key {
                ObjectKey::Fragment { .. } => self.fragments += 1,
                ObjectKey::Whole(_) if self.objects.contains_key(&id) => {
                    warn!("object {id} is whole in tile {} but was already seen; ids are not unique across tiles", partial.tile.0);
                }
                ObjectKey::Whole(_) => {}
            }
            self.objects.entry(id).or_default().merge(&acc);
        }
        merge_anchors(&mut self.anchors, partial.anchors);
        self.completed.insert(partial.tile);
    }

    pub fn is_complete(&self, plan: &TilePlan) -> bool {
        plan.tiles.iter().all(|t| self.completed.contains(&t.id))
    }

    pub fn into_parts(self) -> (ZonalStats, BTreeMap<u32, PixelLocation>) {
        (ZonalStats::from_accumulators(self.objects), self.anchors)
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum TileRun {
    Complete(MergeState),
    Cancelled(MergeState),
}

/// Process every tile of `plan` not yet in `state.completed`.
pub fn run_tiles<S: TileSource>(
    source: &S,
    plan: &TilePlan,
    mut state: MergeState,
    radius: usize,
    cancel: &CancelToken,
) -> Result<TileRun> {
    let layout = source.layout();
    let signature = plan.signature(layout, radius);
    state.check_plan(&signature, plan.len())?;
    state.plan = Some(signature);
    let pending: Vec<&Tile> = plan.tiles.iter().filter(|t| !state.completed.contains(&t.id)).collect();
    debug!("{} of {} tiles pending", pending.len(), plan.len());

    let work = |tile: &Tile| -> Option<Result<TilePartial>> {
        if cancel.is_cancelled() {
            return None;
        }
        Some(source.fetch(tile).and_then(|data| process_tile(tile, &data, layout, radius)))
    };

    #[cfg(feature = "threading")]
    let results: Vec<Option<Result<TilePartial>>> = {
        use rayon::prelude::*;
        pending.par_iter().map(|&tile| work(tile)).collect()
    };
    #[cfg(not(feature = "threading"))]
    let results: Vec<Option<Result<TilePartial>>> = pending.iter().map(|&tile| work(tile)).collect();

    for partial in results.into_iter().flatten() {
        let partial = partial?;
        debug!("tile {} merged: {} object partials", partial.tile.0, partial.objects.len());
        state.absorb(partial);
    }

    if state.is_complete(plan) {
        Ok(TileRun::Complete(state))
    } else {
        Ok(TileRun::Cancelled(state))
    }
}
