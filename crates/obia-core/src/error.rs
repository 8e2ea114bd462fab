//! Error taxonomy for the object statistics core.
//!
//! Only structural problems surface here. Statistical edge cases (degenerate
//! objects, short sampling pools, out-of-range reference codes) are absorbed
//! where they occur and reported as counts in the run report.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObiaError {
    /// Two rasters that must share a pixel grid do not.
    #[error("grid mismatch: {what} is {got_width}x{got_height}, expected {want_width}x{want_height}")]
    GridMismatch {
        what: String,
        want_width: usize,
        want_height: usize,
        got_width: usize,
        got_height: usize,
    },

    /// Reproducible sampling was requested without a seed.
    #[error("sampling seed is required but none was configured")]
    MissingSeed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("band {0} is not present in the band stack")]
    MissingBand(String),

    #[error("reference layer {0} is not present in the scene")]
    MissingLayer(String),

    #[error("failed to fetch tile {tile}: {reason}")]
    TileFetch { tile: usize, reason: String },

    #[error("run was cancelled before all tiles were processed")]
    Cancelled,

    #[error("malformed scene document: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ObiaError>;

/// Fail with [`ObiaError::GridMismatch`] unless `got` matches `want`.
pub fn check_grid(what: &str, want: (usize, usize), got: (usize, usize)) -> Result<()> {
    if want == got {
        return Ok(());
    }
    Err(ObiaError::GridMismatch {
        what: what.to_string(),
        want_width: want.0,
        want_height: want.1,
        got_width: got.0,
        got_height: got.1,
    })
}
