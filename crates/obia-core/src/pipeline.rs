//! Orchestrates one scene: tiled accumulation, reconciliation, geometry,
//! exclusion, per-layer purity and sampling, and the merged sample set.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::anchors::seed_grid;
use crate::boundary::{ObjectGeometry, DEFAULT_RADIUS};
use crate::error::{ObiaError, Result};
use crate::exclusion::excluded_in;
use crate::features::{training_rows, FeatureTable, TrainingRow};
use crate::grid::PixelLocation;
use crate::purity::{LayerConfig, IMPURE};
use crate::sampling::{SampleSet, StratifiedSampler, DEFAULT_SEED};
use crate::scene::{Scene, SceneSource};
use crate::tiling::{run_tiles, BandLayout, CancelToken, MergeState, TilePlan, TileRun, TileSource};

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reference layers in priority order.
    pub layers: Vec<LayerConfig>,
    pub samples_per_class: usize,
    pub seed: Option<u64>,
    /// Refuse to run without an explicit seed.
    pub require_seed: bool,
    /// Perimeter neighbourhood radius, also the tile halo.
    pub radius: usize,
    /// Pixel side in map units (metres).
    pub pixel_size: f64,
    /// Anchor grid spacing in pixels, used when the scene has no anchors.
    pub anchor_spacing: usize,
    /// Tile side in pixels; `None` runs the scene as one tile.
    pub tile_size: Option<usize>,
    pub purity_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            samples_per_class: 500,
            seed: None,
            require_seed: false,
            radius: DEFAULT_RADIUS,
            pixel_size: 10.0,
            anchor_spacing: 10,
            tile_size: None,
            purity_tolerance: 0.0,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ObiaError::InvalidConfig(msg));
        if self.radius == 0 {
            return invalid("neighbourhood radius must be at least 1".into());
        }
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return invalid(format!("pixel size must be positive, got {}", self.pixel_size));
        }
        if self.anchor_spacing == 0 {
            return invalid("anchor spacing must be at least 1".into());
        }
        if self.tile_size == Some(0) {
            return invalid("tile size must be at least 1".into());
        }
        if !(self.purity_tolerance.is_finite() && self.purity_tolerance >= 0.0) {
            return invalid(format!("purity tolerance must be non-negative, got {}", self.purity_tolerance));
        }
        let mut names = BTreeSet::new();
        for layer in &self.layers {
            if layer.name.is_empty() {
                return invalid("reference layer with an empty name".into());
            }
            if !names.insert(layer.name.as_str()) {
                return invalid(format!("reference layer {} is listed twice", layer.name));
            }
        }
        Ok(())
    }

    pub fn resolve_seed(&self) -> Result<u64> {
        match (self.seed, self.require_seed) {
            (Some(seed), _) => Ok(seed),
            (None, true) => Err(ObiaError::MissingSeed),
            (None, false) => {
                warn!("no sampling seed configured, using {DEFAULT_SEED}");
                Ok(DEFAULT_SEED)
            }
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub pure: usize,
    pub impure: usize,
    /// Pure objects withheld for validation.
    pub excluded: usize,
    pub sampled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub objects: usize,
    pub tiles: usize,
    pub fragments_merged: usize,
    /// Objects without defined shape, kept out of purity and sampling.
    pub degenerate: usize,
    pub excluded: usize,
    pub anchored: usize,
    pub seed: u64,
    pub layers: Vec<LayerSummary>,
    /// Samples dropped because the object was already drawn for an earlier layer.
    pub duplicates_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct LayerOutcome {
    pub name: String,
    pub labels: BTreeMap<u32, u16>,
    pub samples: SampleSet,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub features: FeatureTable,
    pub exclusions: BTreeSet<u32>,
    pub anchors: BTreeMap<u32, PixelLocation>,
    pub layers: Vec<LayerOutcome>,
    pub samples: SampleSet,
    pub report: RunReport,
}

impl PipelineResult {
    pub fn layer(&self, name: &str) -> Option<&LayerOutcome> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Pure labels of the withheld objects of `layer`: the reference side of
    /// an accuracy assessment.
    pub fn validation_labels(&self, layer: &str) -> Option<BTreeMap<u32, u16>> {
        let outcome = self.layer(layer)?;
        Some(
            outcome
                .labels
                .iter()
                .filter(|(&id, &code)| code != IMPURE && self.exclusions.contains(&id))
                .map(|(&id, &code)| (id, code))
                .collect(),
        )
    }

    pub fn training_rows(&self) -> Vec<TrainingRow> {
        training_rows(&self.samples, &self.features)
    }
}

#[derive(Debug)]
pub enum RunStatus {
    Complete(Box<PipelineResult>),
    /// Partial state to pass back to [`ObjectPipeline::run_tiled`].
    Cancelled(MergeState),
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ObjectPipeline {
    config: PipelineConfig,
}

impl ObjectPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `scene` to completion.
    pub fn run(&self, scene: &Scene) -> Result<PipelineResult> {
        match self.run_tiled(scene, MergeState::default(), &CancelToken::new())? {
            RunStatus::Complete(result) => Ok(*result),
            RunStatus::Cancelled(_) => Err(ObiaError::Cancelled),
        }
    }

    /// Run the tiles of `scene` not yet in `state`, stopping early once
    /// `cancel` is set.
    pub fn run_tiled(&self, scene: &Scene, state: MergeState, cancel: &CancelToken) -> Result<RunStatus> {
        let cfg = &self.config;
        let seed = cfg.resolve_seed()?;
        let (width, height) = scene.dims();

        let generated;
        let anchors = match &scene.anchors {
            Some(mask) => mask,
            None => {
                generated = seed_grid(width, height, cfg.anchor_spacing)?;
                &generated
            }
        };
        let source = SceneSource::new(scene, &cfg.layers, anchors)?;
        let plan = match cfg.tile_size {
            Some(size) => TilePlan::new(width, height, size, cfg.radius)?,
            None => TilePlan::single(width, height),
        };
        info!(
            "{width}x{height} scene: {} bands, {} reference layers, {} tiles",
            scene.bands.len(),
            cfg.layers.len(),
            plan.len()
        );

        match run_tiles(&source, &plan, state, cfg.radius, cancel)? {
            TileRun::Complete(state) => {
                let result = self.finalize(scene, state, source.layout(), plan.len(), seed);
                Ok(RunStatus::Complete(Box::new(result)))
            }
            TileRun::Cancelled(state) => {
                warn!("cancelled after {} of {} tiles", state.completed.len(), plan.len());
                Ok(RunStatus::Cancelled(state))
            }
        }
    }

    fn finalize(&self, scene: &Scene, state: MergeState, layout: BandLayout, tiles: usize, seed: u64) -> PipelineResult {
        let cfg = &self.config;
        let fragments_merged = state.fragments;
        let (stats, anchors) = state.into_parts();

        let geometry: BTreeMap<u32, ObjectGeometry> = stats
            .objects
            .iter()
            .map(|(&id, obj)| {
                let perimeter = obj.bands.get(layout.perimeter()).map_or(0, |acc| acc.sum as u64);
                (id, ObjectGeometry::from_counts(obj.pixels, perimeter, cfg.pixel_size))
            })
            .collect();
        let degenerate: BTreeSet<u32> = geometry
            .iter()
            .filter(|(_, g)| g.is_degenerate())
            .map(|(&id, _)| id)
            .collect();
        for id in &degenerate {
            debug!("object {id} has no defined shape, skipped");
        }

        let exclusions = excluded_in(&stats, layout.validation());
        let band_names = scene.bands.keys().map(ToString::to_string).collect();
        let mut features = FeatureTable::build(&stats, band_names, &geometry);
        let sampler = StratifiedSampler::new(cfg.samples_per_class, seed);

        let mut layers = Vec::with_capacity(cfg.layers.len());
        let mut summaries = Vec::with_capacity(cfg.layers.len());
        for (i, layer) in cfg.layers.iter().enumerate() {
            let classifier = layer.classifier().with_tolerance(cfg.purity_tolerance);
            let mut labels = classifier.classify(&stats, layout.reference(i));
            for &id in &degenerate {
                labels.insert(id, IMPURE);
            }
            features.set_purity(&layer.name, &labels);
            let samples = sampler.sample(&layer.name, &labels, &exclusions, &anchors);

            let pure: Vec<u32> = labels.iter().filter(|(_, &c)| c != IMPURE).map(|(&id, _)| id).collect();
            let summary = LayerSummary {
                name: layer.name.clone(),
                pure: pure.len(),
                impure: labels.len() - pure.len() - degenerate.len(),
                excluded: pure.iter().filter(|&&id| exclusions.contains(&id)).count(),
                sampled: samples.len(),
            };
            info!(
                "{}: {} pure, {} impure, {} withheld, {} sampled",
                summary.name, summary.pure, summary.impure, summary.excluded, summary.sampled
            );
            summaries.push(summary);
            layers.push(LayerOutcome { name: layer.name.clone(), labels, samples });
        }

        let (samples, duplicates_dropped) = SampleSet::merge_layers(layers.iter().map(|l| l.samples.clone()));
        if duplicates_dropped > 0 {
            info!("{duplicates_dropped} objects sampled for several layers, earliest layer kept");
        }

        let report = RunReport {
            objects: stats.len(),
            tiles,
            fragments_merged,
            degenerate: degenerate.len(),
            excluded: exclusions.len(),
            anchored: anchors.len(),
            seed,
            layers: summaries,
            duplicates_dropped,
        };
        PipelineResult { features, exclusions, anchors, layers, samples, report }
    }
}
