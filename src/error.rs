use thiserror::Error;

/// errors surfaced by the restoration engine, the empirical scanner and the io adapters
#[derive(Error, Debug)]
pub enum BifsError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// a derived image was requested before an image was loaded
    #[error("no image loaded")]
    NoImageLoaded,

    #[error("empirical scan produced no usable samples ({failures} unreadable, {rejected} rejected)")]
    NoUsableSamples {
        failures: usize,
        rejected: usize,
    },

    #[error("malformed prior artifact: {0}")]
    MalformedArtifact(String),

    #[error("unreadable volume {path}: {reason}")]
    UnreadableVolume {
        path: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bad glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to parse parameter file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to write parameter file: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BifsError>;

impl BifsError {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub fn unreadable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnreadableVolume {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Bad values and mismatched shapes. These leave the engine untouched and can be retried
    /// with a corrected argument.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_) | Self::ShapeMismatch { .. })
    }
}
