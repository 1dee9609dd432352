use std::path::PathBuf;
use thiserror::Error;

pub type PodResult<T> = Result<T, PodError>;

#[derive(Debug, Error)]
pub enum PodError {
    #[error("requested {requested} basis modes but only {available} snapshots are available")]
    BasisCountExceedsSnapshots { requested: usize, available: usize },

    #[error("reduced dimension {requested} exceeds the precomputed tensor dimension {available}")]
    DimensionExceedsTensors { requested: usize, available: usize },

    #[error("no snapshots selected")]
    NoSnapshots,

    #[error("field shape mismatch in {context}: expected {expected} cells, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("symmetric eigensolver did not converge on the {dim}x{dim} correlation matrix")]
    EigenNonConvergence { dim: usize },

    #[error("non-finite modal coefficients after step {step} (t={time})")]
    NonFiniteCoefficients { step: usize, time: f64 },

    #[error("field '{name}' not found at time {time}")]
    MissingField { name: String, time: String },

    #[error("{}: line {line}: {message}", path.display())]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PodError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PodError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        PodError::Json {
            path: path.into(),
            source,
        }
    }

    pub fn format(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        PodError::Format {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}
