use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelinkError {
    #[error("Cannot make {} writable: {source}", path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed binary {}: {reason}", path.display())]
    MalformedBinary { path: PathBuf, reason: String },

    #[error("Search path {} already present in {}", dir.display(), path.display())]
    SearchPathExists { path: PathBuf, dir: PathBuf },

    #[error("Launcher destination already exists: {}", .0.display())]
    WrapTargetExists(PathBuf),

    #[error("Relink target must be an absolute path: {}", .0.display())]
    RelativeTarget(PathBuf),

    #[error("Invalid environment variable name: {0:?}")]
    InvalidEnvName(String),

    #[error("Failed to run {tool} on {}: {source}", path.display())]
    Tool {
        path: PathBuf,
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Config(#[from] serde_json::Error),
}

impl RelinkError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RelinkError::Io {
            path: path.into(),
            source,
        }
    }

    /// Path of the artifact or file that caused the failure, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            RelinkError::Unwritable { path, .. }
            | RelinkError::MalformedBinary { path, .. }
            | RelinkError::SearchPathExists { path, .. }
            | RelinkError::Tool { path, .. }
            | RelinkError::Io { path, .. } => Some(path),
            RelinkError::WrapTargetExists(path) | RelinkError::RelativeTarget(path) => Some(path),
            RelinkError::InvalidEnvName(_) | RelinkError::Config(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelinkError>;
