//! Per-object feature table, training rows and the model seam.
//!
//! The table carries, for every object: pixel count, mean and stdDev of each
//! feature band, area and perimeter in map units, the four shape descriptors
//! and one purity code per reference layer. Training rows join a sample set
//! onto the table; rows with any missing value are dropped.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::boundary::{ObjectGeometry, ShapeDescriptors};
use crate::sampling::SampleSet;
use crate::zonal::ZonalStats;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectFeatures {
    pub object_id: u32,
    pub pixels: u64,
    pub means: Vec<Option<f64>>,
    pub std_devs: Vec<Option<f64>>,
    pub area: f64,
    pub perimeter: f64,
    pub shape: Option<ShapeDescriptors>,
    pub purity: BTreeMap<String, u16>,
}

impl ObjectFeatures {
    /// Model input: means, stdDevs, area, perimeter, shape. `None` if any
    /// component is missing.
    pub fn vector(&self) -> Option<Vec<f64>> {
        let shape = self.shape?;
        let mut v = Vec::with_capacity(self.means.len() * 2 + 6);
        for m in &self.means {
            v.push((*m)?);
        }
        for s in &self.std_devs {
            v.push((*s)?);
        }
        v.extend([
            self.area,
            self.perimeter,
            shape.form_factor,
            shape.square_pixel,
            shape.fractal_dimension,
            shape.shape_index,
        ]);
        Some(v)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureTable {
    /// Display names of the feature bands, in column order.
    pub bands: Vec<String>,
    pub objects: BTreeMap<u32, ObjectFeatures>,
}

impl FeatureTable {
    /// Table from the first `bands.len()` bands of `stats`.
    pub fn build(stats: &ZonalStats, bands: Vec<String>, geometry: &BTreeMap<u32, ObjectGeometry>) -> Self {
        let n = bands.len();
        let objects = stats
            .objects
            .iter()
            .map(|(&id, obj)| {
                let geom = geometry.get(&id);
                let row = ObjectFeatures {
                    object_id: id,
                    pixels: obj.pixels,
                    means: (0..n).map(|b| obj.bands.get(b).and_then(|a| a.mean())).collect(),
                    std_devs: (0..n).map(|b| obj.bands.get(b).and_then(|a| a.std_dev())).collect(),
                    area: geom.map_or(0.0, |g| g.area),
                    perimeter: geom.map_or(0.0, |g| g.perimeter),
                    shape: geom.and_then(|g| g.shape),
                    purity: BTreeMap::new(),
                };
                (id, row)
            })
            .collect();
        Self { bands, objects }
    }

    pub fn set_purity(&mut self, layer: &str, labels: &BTreeMap<u32, u16>) {
        for (id, &code) in labels {
            if let Some(row) = self.objects.get_mut(id) {
                row.purity.insert(layer.to_string(), code);
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<&ObjectFeatures> {
        self.objects.get(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Column names matching [`ObjectFeatures::vector`].
    pub fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.bands.iter().map(|b| format!("{b}_mean")).collect();
        cols.extend(self.bands.iter().map(|b| format!("{b}_stdDev")));
        cols.extend(
            ["area", "perimeter", "form_factor", "square_pixel", "fractal_dimension", "shape_index"]
                .map(String::from),
        );
        cols
    }
}

// ── Training ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingRow {
    pub object_id: u32,
    pub layer: String,
    pub label: u16,
    pub features: Vec<f64>,
}

/// One row per sample whose object has a complete feature vector.
pub fn training_rows(samples: &SampleSet, table: &FeatureTable) -> Vec<TrainingRow> {
    samples
        .iter()
        .filter_map(|s| {
            let features = table.get(s.object_id)?.vector()?;
            Some(TrainingRow {
                object_id: s.object_id,
                layer: s.layer.clone(),
                label: s.class_code,
                features,
            })
        })
        .collect()
}

/// Supervised object classifier supplied by the caller.
pub trait ObjectClassifier {
    fn train(&mut self, rows: &[TrainingRow]) -> anyhow::Result<()>;
    fn classify(&self, features: &[f64]) -> anyhow::Result<u16>;
}

/// Predict every object with a complete feature vector.
pub fn classify_objects<C: ObjectClassifier + ?Sized>(
    model: &C,
    table: &FeatureTable,
) -> anyhow::Result<BTreeMap<u32, u16>> {
    let mut out = BTreeMap::new();
    for (&id, row) in &table.objects {
        if let Some(v) = row.vector() {
            out.insert(id, model.classify(&v)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{LabeledGrid, PixelLocation, ValueBand};
    use crate::sampling::Sample;
    use crate::zonal::{aggregate, Reducer};

    /// Nearest class mean on the first feature.
    #[derive(Default)]
    struct NearestMean {
        centres: BTreeMap<u16, f64>,
    }

    impl ObjectClassifier for NearestMean {
        fn train(&mut self, rows: &[TrainingRow]) -> anyhow::Result<()> {
            anyhow::ensure!(!rows.is_empty(), "no training rows");
            let mut sums: BTreeMap<u16, (f64, f64)> = BTreeMap::new();
            for r in rows {
                let e = sums.entry(r.label).or_default();
                e.0 += r.features[0];
                e.1 += 1.0;
            }
            self.centres = sums.into_iter().map(|(c, (s, n))| (c, s / n)).collect();
            Ok(())
        }

        fn classify(&self, features: &[f64]) -> anyhow::Result<u16> {
            self.centres
                .iter()
                .min_by(|a, b| (a.1 - features[0]).abs().total_cmp(&(b.1 - features[0]).abs()))
                .map(|(&c, _)| c)
                .ok_or_else(|| anyhow::anyhow!("model is not trained"))
        }
    }

    /// Three 3×3-pixel objects side by side, object 3 with no valid band value.
    fn table() -> FeatureTable {
        let mut labels = LabeledGrid::new(9, 3, 1);
        let mut band = ValueBand::new(9, 3, 0.2);
        for r in 0..3 {
            for c in 3..9 {
                labels.set(r, c, if c < 6 { 2 } else { 3 });
                band.set(r, c, if c < 6 { 0.8 } else { f32::NAN });
            }
        }
        let stats = aggregate(&labels, &[&band], &[Reducer::Mean, Reducer::StdDev]).unwrap();
        let geometry = stats
            .ids()
            .map(|id| (id, ObjectGeometry::from_counts(9, 8, 10.0)))
            .collect();
        FeatureTable::build(&stats, vec!["S1_NDVI".into()], &geometry)
    }

    fn sample(id: u32, class: u16) -> Sample {
        Sample {
            object_id: id,
            layer: "natura".into(),
            class_code: class,
            location: PixelLocation { row: 0, col: 0, x: 0.0, y: 0.0 },
        }
    }

    #[test]
    fn table_rows_carry_every_column() {
        let t = table();
        assert_eq!(t.len(), 3);
        let row = t.get(1).unwrap();
        assert_eq!(row.area, 900.0);
        assert_eq!(row.perimeter, 80.0);
        assert!(row.shape.is_some());
        assert_eq!(row.vector().unwrap().len(), t.columns().len());
        assert_eq!(t.columns()[0], "S1_NDVI_mean");
        assert_eq!(t.get(3).unwrap().means, vec![None]);
    }

    #[test]
    fn incomplete_rows_are_dropped() {
        let samples = SampleSet { samples: vec![sample(1, 4), sample(3, 4), sample(9, 2)] };
        let rows = training_rows(&samples, &table());
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].object_id, rows[0].label), (1, 4));
    }

    #[test]
    fn trained_model_classifies_complete_objects() {
        let t = table();
        let samples = SampleSet { samples: vec![sample(1, 4), sample(2, 7)] };
        let mut model = NearestMean::default();
        assert!(classify_objects(&model, &t).is_err());
        model.train(&training_rows(&samples, &t)).unwrap();

        let predicted = classify_objects(&model, &t).unwrap();
        assert_eq!(predicted, BTreeMap::from([(1, 4), (2, 7)]));
    }

    #[test]
    fn purity_codes_land_per_layer() {
        let mut t = table();
        t.set_purity("natura", &BTreeMap::from([(1, 4), (2, 0)]));
        t.set_purity("lpis", &BTreeMap::from([(1, 2)]));
        assert_eq!(t.get(1).unwrap().purity, BTreeMap::from([("lpis".to_string(), 2), ("natura".to_string(), 4)]));
        assert_eq!(t.get(2).unwrap().purity["natura"], 0);
    }
}
