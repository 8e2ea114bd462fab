//! Object-based land-cover core: zonal statistics over segmented objects,
//! boundary and shape descriptors, per-layer purity labelling, validation
//! exclusion and class-stratified sampling, run whole or in tiles.

pub mod accuracy;
pub mod anchors;
pub mod bands;
pub mod boundary;
pub mod error;
pub mod exclusion;
pub mod features;
pub mod grid;
pub mod pipeline;
pub mod purity;
pub mod sampling;
pub mod scene;
pub mod tiling;
pub mod zonal;

pub use error::{ObiaError, Result};
pub use pipeline::{ObjectPipeline, PipelineConfig, PipelineResult, RunStatus};
pub use scene::Scene;
