use std::path::PathBuf;

/// Broad classes of failure, used by callers that only care about what went wrong
/// rather than the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ShapeMismatch,
    Io,
}

/// Errors produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum SeriesError {
    /// Invalid partition spec, grouping geometry or key set.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An array disagrees with the established dimensions or element type.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Unsupported value type: {0}")]
    UnsupportedType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoPath {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A data file does not hold a whole number of records.
    #[error(
        "Truncated file {path}: {len} bytes is not a whole number of {record_size} byte records"
    )]
    Truncated {
        path: PathBuf,
        len: u64,
        record_size: usize,
    },

    /// The directory has no completion marker, so its contents cannot be trusted.
    #[error("Incomplete output in {0}: completion marker missing")]
    Incomplete(PathBuf),

    #[error("Failed to read or write manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Unable to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl SeriesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SeriesError::Configuration(_) => ErrorKind::Configuration,
            SeriesError::ShapeMismatch(_) | SeriesError::UnsupportedType(_) => {
                ErrorKind::ShapeMismatch
            }
            SeriesError::ThreadPool(_) => ErrorKind::Configuration,
            SeriesError::Io(_)
            | SeriesError::IoPath { .. }
            | SeriesError::Truncated { .. }
            | SeriesError::Incomplete(_)
            | SeriesError::Manifest(_)
            | SeriesError::Pattern(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SeriesError::Configuration(msg.into())
    }

    pub(crate) fn at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| SeriesError::IoPath { path, source }
    }
}

impl From<ndarray::ShapeError> for SeriesError {
    fn from(e: ndarray::ShapeError) -> Self {
        SeriesError::ShapeMismatch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SeriesError>;
