//! End-to-end runs of the object pipeline on small synthetic scenes.

use std::collections::{BTreeMap, BTreeSet};

use obia_core::bands::{BandKey, Period};
use obia_core::grid::{LabeledGrid, Mask, ValueBand};
use obia_core::purity::LayerConfig;
use obia_core::scene::SceneSource;
use obia_core::tiling::{process_tile, CancelToken, MergeState, TilePlan, TileSource};
use obia_core::zonal::{aggregate, Reducer};
use obia_core::{ObiaError, ObjectPipeline, PipelineConfig, PipelineResult, RunStatus, Scene};

/// 10×10 grid: object 1 on rows 0–4, object 2 on rows 5–9.
fn two_halves(reference: impl Fn(usize, usize) -> f32) -> Scene {
    let mut labels = LabeledGrid::new(10, 10, 1);
    let mut refs = ValueBand::new(10, 10, 0.0);
    let mut ndvi = ValueBand::new(10, 10, 0.0);
    for r in 0..10 {
        for c in 0..10 {
            if r >= 5 {
                labels.set(r, c, 2);
            }
            refs.set(r, c, reference(r, c));
            ndvi.set(r, c, if r < 5 { 0.3 } else { 0.7 });
        }
    }
    Scene::new(labels)
        .with_band(BandKey::new(Period::Season(1), "NDVI"), ndvi)
        .unwrap()
        .with_reference("natura", refs)
        .unwrap()
}

fn config(per_class: usize) -> PipelineConfig {
    PipelineConfig {
        layers: vec![LayerConfig::new("natura", 2)],
        samples_per_class: per_class,
        seed: Some(42),
        // Anchors at rows/cols 2 and 7: both halves hold some.
        anchor_spacing: 5,
        ..PipelineConfig::default()
    }
}

fn run(scene: &Scene, config: PipelineConfig) -> PipelineResult {
    ObjectPipeline::new(config).unwrap().run(scene).unwrap()
}

#[test]
fn two_pure_objects_one_sample_each() {
    let scene = two_halves(|r, _| if r < 5 { 1.0 } else { 2.0 });

    let refs = scene.reference("natura").unwrap();
    let stats = aggregate(&scene.labels, &[refs], &[Reducer::StdDev]).unwrap();
    assert_eq!(stats.value(1, 0, Reducer::StdDev), Some(0.0));
    assert_eq!(stats.value(2, 0, Reducer::StdDev), Some(0.0));

    let result = run(&scene, config(1));
    assert_eq!(result.layer("natura").unwrap().labels, BTreeMap::from([(1, 1), (2, 2)]));
    assert_eq!(result.samples.len(), 2);
    let picked: Vec<(u16, u32)> = result.samples.iter().map(|s| (s.class_code, s.object_id)).collect();
    assert_eq!(picked, vec![(1, 1), (2, 2)]);
}

#[test]
fn mixed_object_is_never_sampled() {
    let scene = two_halves(|r, c| if r < 5 { 1.0 } else { (c % 2 + 1) as f32 });
    for n in [1, 5, 500] {
        let result = run(&scene, config(n));
        assert_eq!(result.layer("natura").unwrap().labels, BTreeMap::from([(1, 1), (2, 0)]));
        assert!(!result.samples.object_ids().contains(&2), "N = {n}");
        assert_eq!(result.samples.object_ids(), BTreeSet::from([1]));
    }
}

#[test]
fn validation_pixel_withholds_pure_object() {
    let mut marks = Mask::new(10, 10, false);
    marks.set(3, 8, true);
    let scene = two_halves(|r, _| if r < 5 { 1.0 } else { 2.0 })
        .with_validation(marks)
        .unwrap();
    let result = run(&scene, config(10));

    assert_eq!(result.exclusions, BTreeSet::from([1]));
    assert_eq!(result.layer("natura").unwrap().labels[&1], 1);
    assert_eq!(result.samples.object_ids(), BTreeSet::from([2]));
    assert_eq!(result.validation_labels("natura").unwrap(), BTreeMap::from([(1, 1)]));
}

// ── Tiled execution ──────────────────────────────────────────────────────────

/// 30×30 scene of sheared blocks with a mix of pure and impure objects.
fn patchwork() -> Scene {
    let (w, h) = (30, 30);
    let mut labels = LabeledGrid::new(w, h, 0);
    let mut natura = ValueBand::new(w, h, 0.0);
    let mut lpis = ValueBand::new(w, h, f32::NAN);
    let mut ndvi = ValueBand::new(w, h, 0.0);
    let mut elev = ValueBand::new(w, h, 0.0);
    for r in 0..h {
        for c in 0..w {
            let id = (r / 5 * 8 + (c + r / 3) / 5 + 1) as u32;
            labels.set(r, c, id);
            let code = if id % 4 == 0 { (r + c) % 3 + 1 } else { id as usize % 3 + 1 };
            natura.set(r, c, code as f32);
            if c < 18 {
                lpis.set(r, c, if id % 2 == 0 { 211.0 } else { 311.0 });
            }
            ndvi.set(r, c, ((r * 31 + c * 17) % 100) as f32 / 100.0);
            elev.set(r, c, (200 + r * 3 + c) as f32);
        }
    }
    labels.set(12, 12, 0);
    let mut marks = Mask::new(w, h, false);
    marks.set(21, 4, true);
    marks.set(8, 26, true);

    Scene::new(labels)
        .with_band(BandKey::new(Period::Season(2), "NDVI"), ndvi)
        .unwrap()
        .with_band(BandKey::new(Period::Static, "elev"), elev)
        .unwrap()
        .with_reference("natura", natura)
        .unwrap()
        .with_reference("lpis", lpis)
        .unwrap()
        .with_validation(marks)
        .unwrap()
        .with_anchors(Mask::new(w, h, true))
        .unwrap()
}

fn patchwork_config(tile_size: Option<usize>) -> PipelineConfig {
    let lpis = LayerConfig::new("lpis", 5).with_remap(obia_core::purity::CodeRemap::Table {
        entries: BTreeMap::from([(211, 3), (311, 4)]),
    });
    PipelineConfig {
        layers: vec![LayerConfig::new("natura", 3), lpis],
        samples_per_class: 3,
        seed: Some(2024),
        tile_size,
        ..PipelineConfig::default()
    }
}

fn assert_same_result(a: &PipelineResult, b: &PipelineResult) {
    assert_eq!(a.exclusions, b.exclusions);
    assert_eq!(a.samples, b.samples);
    for (la, lb) in a.layers.iter().zip(&b.layers) {
        assert_eq!(la.labels, lb.labels, "layer {}", la.name);
    }
    assert_eq!(a.features.len(), b.features.len());
    for (id, fa) in &a.features.objects {
        let fb = &b.features.objects[id];
        assert_eq!(fa.pixels, fb.pixels, "object {id}");
        assert_eq!(fa.area, fb.area, "object {id}");
        assert_eq!(fa.perimeter, fb.perimeter, "object {id}");
        assert_eq!(fa.purity, fb.purity, "object {id}");
        for (ma, mb) in fa.means.iter().zip(&fb.means) {
            assert!((ma.unwrap() - mb.unwrap()).abs() < 1e-9, "object {id}");
        }
        for (sa, sb) in fa.std_devs.iter().zip(&fb.std_devs) {
            assert!((sa.unwrap() - sb.unwrap()).abs() < 1e-6, "object {id}");
        }
    }
}

#[test]
fn tiled_run_matches_untiled_run() {
    let scene = patchwork();
    let whole = run(&scene, patchwork_config(None));
    assert_eq!(whole.report.tiles, 1);
    assert!(!whole.samples.is_empty());

    for size in [4, 7, 16] {
        let tiled = run(&scene, patchwork_config(Some(size)));
        assert!(tiled.report.tiles > 1);
        assert!(tiled.report.fragments_merged > 0);
        assert_same_result(&whole, &tiled);
    }
}

#[test]
fn lpis_purity_follows_layer_coverage() {
    let result = run(&patchwork(), patchwork_config(None));
    let lpis = &result.layer("lpis").unwrap().labels;
    // Parcels cover columns 0-17: objects inside are pure, objects straddling
    // or beyond the edge are not.
    assert_eq!(lpis[&1], 4);
    assert_eq!(lpis[&2], 3);
    assert_eq!(lpis[&4], 0);
    assert_eq!(lpis[&6], 0);
    assert!(lpis.values().all(|&c| c == 0 || c == 3 || c == 4));
}

#[test]
fn cancelled_run_resumes_to_the_same_result() {
    let scene = patchwork();
    let pipeline = ObjectPipeline::new(patchwork_config(Some(7))).unwrap();
    let fresh = pipeline.run(&scene).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let state = match pipeline.run_tiled(&scene, MergeState::default(), &cancel).unwrap() {
        RunStatus::Cancelled(state) => state,
        RunStatus::Complete(_) => panic!("expected cancellation"),
    };

    // Finish a few tiles by hand, as a run interrupted midway would have.
    let anchors = scene.anchors.clone().unwrap();
    let source = SceneSource::new(&scene, &pipeline.config().layers, &anchors).unwrap();
    let plan = TilePlan::new(30, 30, 7, 1).unwrap();
    let mut state = state;
    for tile in &plan.tiles[..5] {
        let data = source.fetch(tile).unwrap();
        state.absorb(process_tile(tile, &data, source.layout(), 1).unwrap());
    }
    assert_eq!(state.completed.len(), 5);

    let resumed = match pipeline.run_tiled(&scene, state, &CancelToken::new()).unwrap() {
        RunStatus::Complete(result) => result,
        RunStatus::Cancelled(_) => panic!("resume was cancelled"),
    };
    assert_same_result(&fresh, &resumed);
}

#[test]
fn resume_with_another_tile_size_is_rejected() {
    let scene = patchwork();
    let cancel = CancelToken::new();
    cancel.cancel();
    let pipeline = ObjectPipeline::new(patchwork_config(Some(7))).unwrap();
    let mut state = match pipeline.run_tiled(&scene, MergeState::default(), &cancel).unwrap() {
        RunStatus::Cancelled(state) => state,
        RunStatus::Complete(_) => panic!("expected cancellation"),
    };
    let anchors = scene.anchors.clone().unwrap();
    let layers = patchwork_config(None).layers;
    let source = SceneSource::new(&scene, &layers, &anchors).unwrap();
    let plan = TilePlan::new(30, 30, 7, 1).unwrap();
    for tile in &plan.tiles[..3] {
        state.absorb(process_tile(tile, &source.fetch(tile).unwrap(), source.layout(), 1).unwrap());
    }

    // Tile ids 0..3 cover different pixels under a 10-pixel plan.
    let other = ObjectPipeline::new(patchwork_config(Some(10))).unwrap();
    let err = other.run_tiled(&scene, state, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, ObiaError::InvalidConfig(_)), "{err:?}");
}

#[test]
fn sampling_is_reproducible_and_bounded() {
    let scene = patchwork();
    let a = run(&scene, patchwork_config(Some(9)));
    let b = run(&scene, patchwork_config(Some(9)));
    assert_eq!(a.samples, b.samples);

    for layer in &a.layers {
        let mut per_class: BTreeMap<u16, usize> = BTreeMap::new();
        for s in layer.samples.iter() {
            *per_class.entry(s.class_code).or_default() += 1;
            assert!(!a.exclusions.contains(&s.object_id));
            assert_eq!(layer.labels[&s.object_id], s.class_code);
        }
        assert!(per_class.values().all(|&n| n <= 3), "layer {}", layer.name);
    }
    let ids: Vec<u32> = a.samples.iter().map(|s| s.object_id).collect();
    assert_eq!(ids.len(), a.samples.object_ids().len());
}
