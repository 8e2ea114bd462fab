//! Stratified training-sample extraction for one segmented scene.
//! Reads a scene JSON (labels, feature bands, reference layers, validation
//! marks), runs zonal statistics, purity labelling and sampling, and writes
//! the merged sample set plus optional feature and training tables.

use anyhow::{Context, Result};
use clap::Parser;
use obia_core::{ObjectPipeline, PipelineConfig, Scene};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "obia-sample", about = "Sample pure segmented objects per reference layer")]
struct Args {
    /// Scene JSON: labels, bands, references, optional validation and anchors.
    #[arg(short, long)]
    scene: PathBuf,

    /// Pipeline configuration JSON; defaults apply to omitted fields.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output path for the merged sample set.
    #[arg(short, long, default_value = "samples.json")]
    output: PathBuf,

    /// Also write the per-object feature table here.
    #[arg(short, long)]
    features: Option<PathBuf>,

    /// Also write training rows (samples joined with features) here.
    #[arg(short, long)]
    training: Option<PathBuf>,

    /// Override the configured sampling seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the configured tile size in pixels.
    #[arg(long)]
    tile_size: Option<usize>,

    /// Debug-level logging unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json(&read_to_string(path)?)
            .with_context(|| format!("parsing config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.tile_size.is_some() {
        config.tile_size = args.tile_size;
    }
    log::debug!("{config:?}");

    eprintln!("Loading scene {} ...", args.scene.display());
    let scene = Scene::from_json(&read_to_string(&args.scene)?)
        .with_context(|| format!("parsing scene {}", args.scene.display()))?;

    let pipeline = ObjectPipeline::new(config)?;
    let result = pipeline.run(&scene)?;
    let report = &result.report;

    eprintln!(
        "\n{} objects, {} tiles, {} fragments merged, {} degenerate, {} withheld, seed {}",
        report.objects, report.tiles, report.fragments_merged, report.degenerate, report.excluded, report.seed
    );
    eprintln!("\n{:<16} {:>8} {:>8} {:>9} {:>8}", "Layer", "Pure", "Impure", "Withheld", "Sampled");
    eprintln!("{}", "-".repeat(53));
    for layer in &report.layers {
        eprintln!(
            "{:<16} {:>8} {:>8} {:>9} {:>8}",
            layer.name, layer.pure, layer.impure, layer.excluded, layer.sampled
        );
    }
    if report.duplicates_dropped > 0 {
        eprintln!("{} duplicate samples dropped across layers.", report.duplicates_dropped);
    }

    write_json(&args.output, &result.samples)?;
    eprintln!("\n{} samples -> {}", result.samples.len(), args.output.display());

    if let Some(path) = &args.features {
        write_json(path, &result.features)?;
        eprintln!("{} objects -> {}", result.features.len(), path.display());
    }
    if let Some(path) = &args.training {
        let rows = result.training_rows();
        write_json(path, &rows)?;
        eprintln!("{} training rows -> {}", rows.len(), path.display());
    }
    Ok(())
}
