use thiserror::Error;

/// Infrastructure failures that abort the pipeline. Per-object anomalies
/// (degenerate geometry, missing neighbors, ambiguous overlap) are handled
/// locally and never reach this enum.
#[derive(Error, Debug)]
pub enum Error {
    #[error("classifier artifact unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("malformed classifier artifact: {0}")]
    MalformedModel(String),

    #[error("feature matrix has width {got}, classifier expects {expected}")]
    MalformedFeatures { expected: usize, got: usize },

    #[error("volume has a zero-length axis")]
    EmptyVolume,

    #[error("volume shapes disagree: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    #[error("snapshot i/o failed: {0}")]
    Persist(String),

    #[error("cancelled")]
    Cancelled,
}
