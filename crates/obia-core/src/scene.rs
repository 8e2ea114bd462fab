//! In-memory scene: the segmented label grid plus every raster sharing its
//! pixel grid, and its JSON document form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bands::{BandKey, BandName, BandStack, Period};
use crate::error::{check_grid, ObiaError, Result};
use crate::grid::{Extent, LabeledGrid, Mask, ValueBand};
use crate::purity::LayerConfig;
use crate::tiling::{BandLayout, Tile, TileData, TileSource};

#[derive(Debug, Clone)]
pub struct Scene {
    pub labels: LabeledGrid,
    pub bands: BandStack,
    /// Raw reference rasters by layer name, before remapping.
    pub references: BTreeMap<String, ValueBand>,
    pub validation: Mask,
    /// Explicit anchors; a seed grid is generated when absent.
    pub anchors: Option<Mask>,
}

impl Scene {
    pub fn new(labels: LabeledGrid) -> Self {
        let (w, h) = labels.dims();
        Self {
            labels,
            bands: BandStack::new(w, h),
            references: BTreeMap::new(),
            validation: Mask::new(w, h, false),
            anchors: None,
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        self.labels.dims()
    }

    pub fn with_band(mut self, key: BandKey, band: ValueBand) -> Result<Self> {
        self.bands.insert(key, band)?;
        Ok(self)
    }

    pub fn with_reference(mut self, name: impl Into<String>, band: ValueBand) -> Result<Self> {
        let name = name.into();
        check_grid(&format!("reference layer {name}"), self.dims(), band.dims())?;
        self.references.insert(name, band);
        Ok(self)
    }

    pub fn with_validation(mut self, marks: Mask) -> Result<Self> {
        check_grid("validation marks", self.dims(), marks.dims())?;
        self.validation = marks;
        Ok(self)
    }

    pub fn with_anchors(mut self, anchors: Mask) -> Result<Self> {
        check_grid("anchor mask", self.dims(), anchors.dims())?;
        self.anchors = Some(anchors);
        Ok(self)
    }

    pub fn reference(&self, name: &str) -> Result<&ValueBand> {
        self.references.get(name).ok_or_else(|| ObiaError::MissingLayer(name.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: SceneFile = serde_json::from_str(text)?;
        file.into_scene()
    }
}

// ── Document form ────────────────────────────────────────────────────────────

fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandEntry {
    #[serde(default = "static_period")]
    pub period: Period,
    pub name: String,
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
}

fn static_period() -> Period {
    Period::Static
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub name: String,
    #[serde(deserialize_with = "null_as_nan_vec")]
    pub data: Vec<f32>,
}

/// JSON scene document. Raster values are row-major; `null` is no-data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub extent: Option<Extent>,
    pub labels: Vec<u32>,
    #[serde(default)]
    pub bands: Vec<BandEntry>,
    #[serde(default)]
    pub references: Vec<ReferenceEntry>,
    #[serde(default)]
    pub validation: Option<Vec<bool>>,
    #[serde(default)]
    pub anchors: Option<Vec<bool>>,
}

impl SceneFile {
    pub fn into_scene(self) -> Result<Scene> {
        let (w, h) = (self.width, self.height);
        let mut labels = LabeledGrid::from_vec(w, h, self.labels)?;
        if let Some(extent) = self.extent {
            labels = labels.with_extent(extent);
        }
        let mut scene = Scene::new(labels);
        for band in self.bands {
            let key = BandKey::new(band.period, BandName(band.name));
            scene = scene.with_band(key, ValueBand::from_vec(w, h, band.data)?)?;
        }
        for reference in self.references {
            scene = scene.with_reference(reference.name, ValueBand::from_vec(w, h, reference.data)?)?;
        }
        if let Some(marks) = self.validation {
            scene = scene.with_validation(Mask::from_vec(w, h, marks)?)?;
        }
        if let Some(anchors) = self.anchors {
            scene = scene.with_anchors(Mask::from_vec(w, h, anchors)?)?;
        }
        Ok(scene)
    }
}

// ── Tile source ──────────────────────────────────────────────────────────────

/// Serves windows of an in-memory scene, remapping reference layers on the fly.
pub struct SceneSource<'a> {
    scene: &'a Scene,
    layers: &'a [LayerConfig],
    anchors: &'a Mask,
}

impl<'a> SceneSource<'a> {
    pub fn new(scene: &'a Scene, layers: &'a [LayerConfig], anchors: &'a Mask) -> Result<Self> {
        for layer in layers {
            scene.reference(&layer.name)?;
        }
        check_grid("anchor mask", scene.dims(), anchors.dims())?;
        Ok(Self { scene, layers, anchors })
    }
}

impl TileSource for SceneSource<'_> {
    fn layout(&self) -> BandLayout {
        BandLayout { features: self.scene.bands.len(), references: self.layers.len() }
    }

    fn fetch(&self, tile: &Tile) -> Result<TileData> {
        let window = tile.window;
        let mut bands = self.scene.bands.window(window);
        for layer in self.layers {
            let raw = self.scene.reference(&layer.name)?.window(window);
            bands.push(layer.remap.apply_band(&raw));
        }
        Ok(TileData {
            labels: self.scene.labels.window(window),
            bands,
            validation: self.scene.validation.window(window),
            anchors: self.anchors.window(window),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::TilePlan;

    const DOC: &str = r#"{
        "width": 3, "height": 2,
        "labels": [1, 1, 2, 1, 2, 2],
        "bands": [
            {"period": {"kind": "season", "index": 1}, "name": "NDVI", "data": [0.1, 0.2, null, 0.4, 0.5, 0.6]},
            {"name": "elev", "data": [10, 11, 12, 13, 14, 15]}
        ],
        "references": [{"name": "natura", "data": [4, 4, 9, 4, 9, null]}],
        "validation": [false, false, false, false, false, true]
    }"#;

    #[test]
    fn document_loads_with_no_data() {
        let scene = Scene::from_json(DOC).unwrap();
        assert_eq!(scene.dims(), (3, 2));
        let ndvi = scene.bands.get(&BandKey::new(Period::Season(1), "NDVI")).unwrap();
        assert!(ndvi.get(0, 2).is_nan());
        assert!(scene.bands.get(&BandKey::new(Period::Static, "elev")).is_ok());
        assert!(scene.reference("natura").unwrap().get(1, 2).is_nan());
        assert_eq!(scene.validation.count(), 1);
        assert!(scene.anchors.is_none());
    }

    #[test]
    fn malformed_documents_fail() {
        assert!(matches!(Scene::from_json("{"), Err(ObiaError::Parse(_))));
        let short = r#"{"width": 2, "height": 2, "labels": [1, 1, 1]}"#;
        assert!(matches!(Scene::from_json(short), Err(ObiaError::InvalidConfig(_))));
    }

    #[test]
    fn source_windows_and_remaps() {
        let scene = Scene::from_json(DOC).unwrap();
        let layers = vec![LayerConfig::new("natura", 22)];
        let anchors = Mask::new(3, 2, true);
        let source = SceneSource::new(&scene, &layers, &anchors).unwrap();
        let layout = source.layout();
        assert_eq!((layout.features, layout.references), (2, 1));

        let plan = TilePlan::new(3, 2, 2, 1).unwrap();
        let data = source.fetch(&plan.tiles[1]).unwrap();
        assert_eq!(data.labels.dims(), (2, 2));
        assert_eq!(data.labels.origin, (0, 1));
        // No-data reference pixel is remapped to code 0.
        assert_eq!(data.bands[layout.reference(0)].get(1, 1), 0.0);
    }

    #[test]
    fn unknown_layer_is_reported() {
        let scene = Scene::from_json(DOC).unwrap();
        let layers = vec![LayerConfig::new("lpis", 5)];
        let anchors = Mask::new(3, 2, true);
        assert!(matches!(
            SceneSource::new(&scene, &layers, &anchors),
            Err(ObiaError::MissingLayer(name)) if name == "lpis"
        ));
    }
}
