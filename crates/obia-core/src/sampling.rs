//! Class-stratified sampling of pure objects.
//!
//! For every class of a layer the candidate pool holds the objects labelled
//! with that class, not excluded for validation, and holding an anchor.
//! Pools are walked in ascending id order and up to N members are drawn
//! without replacement from a seeded stream, so the same inputs and seed
//! always give the same sample. Short pools are returned whole.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::grid::PixelLocation;
use crate::purity::IMPURE;

/// Seed used when reproducibility is not enforced and none is configured.
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub object_id: u32,
    pub layer: String,
    pub class_code: u16,
    pub location: PixelLocation,
}

/// Ordered sample list: layer, then class, then object id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    pub samples: Vec<Sample>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn object_ids(&self) -> BTreeSet<u32> {
        self.samples.iter().map(|s| s.object_id).collect()
    }

    /// Samples drawn for `class` of `layer`.
    pub fn count_for(&self, layer: &str, class: u16) -> usize {
        self.samples
            .iter()
            .filter(|s| s.layer == layer && s.class_code == class)
            .count()
    }

    /// Union keyed by object id. Sets earlier in `sets` win when the same
    /// object was drawn for several layers. Returns the merged set and the
    /// number of dropped duplicates.
    pub fn merge_layers(sets: impl IntoIterator<Item = SampleSet>) -> (SampleSet, usize) {
        let mut seen = BTreeSet::new();
        let mut merged = SampleSet::default();
        let mut dropped = 0;
        for set in sets {
            for sample in set.samples {
                if seen.insert(sample.object_id) {
                    merged.samples.push(sample);
                } else {
                    dropped += 1;
                }
            }
        }
        (merged, dropped)
    }
}

/// Candidate pools per class, each in ascending id order.
pub fn candidate_pools(
    class_labels: &BTreeMap<u32, u16>,
    exclusions: &BTreeSet<u32>,
    anchors: &BTreeMap<u32, PixelLocation>,
) -> BTreeMap<u16, Vec<u32>> {
    let mut pools: BTreeMap<u16, Vec<u32>> = BTreeMap::new();
    for (&id, &class) in class_labels {
        if class == IMPURE || exclusions.contains(&id) || !anchors.contains_key(&id) {
            continue;
        }
        pools.entry(class).or_default().push(id);
    }
    pools
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratifiedSampler {
    pub per_class: usize,
    pub seed: u64,
}

impl StratifiedSampler {
    pub fn new(per_class: usize, seed: u64) -> Self {
        Self { per_class, seed }
    }

    /// Independent stream per class so adding a class leaves others unchanged.
    fn rng_for(&self, class: u16) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ 0x7F4A_7C15_9E37_79B9 ^ (class as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Draw up to `per_class` objects of every class of `layer`.
    pub fn sample(
        &self,
        layer: &str,
        class_labels: &BTreeMap<u32, u16>,
        exclusions: &BTreeSet<u32>,
        anchors: &BTreeMap<u32, PixelLocation>,
    ) -> SampleSet {
        let mut set = SampleSet::default();
        for (class, pool) in candidate_pools(class_labels, exclusions, anchors) {
            let picked: Vec<u32> = if pool.len() <= self.per_class {
                pool.clone()
            } else {
                let mut idx = rand::seq::index::sample(&mut self.rng_for(class), pool.len(), self.per_class).into_vec();
                idx.sort_unstable();
                idx.into_iter().map(|i| pool[i]).collect()
            };
            debug!("{layer}: class {class} pool {} drew {}", pool.len(), picked.len());

            for id in picked {
                // Pool members always have an anchor.
                let Some(&location) = anchors.get(&id) else { continue };
                set.samples.push(Sample {
                    object_id: id,
                    layer: layer.to_string(),
                    class_code: class,
                    location,
                });
            }
        }
        set
    }
}
