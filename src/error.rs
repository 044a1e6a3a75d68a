//! Error types for loading and watching an app
//!
//! `LoadError` is what the snapshot loader reports. During a watch session it is
//! recoverable: the previous model is kept and a warning is logged. `WatchError`
//! covers failures that end the session.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{} is missing required field `{field}`", path.display())]
    MissingField { path: PathBuf, field: String },

    #[error("field `{field}` in {} must be {expected}", path.display())]
    InvalidField {
        path: PathBuf,
        field: String,
        expected: &'static str,
    },

    #[error("invalid extension handle `{handle}` in {}", path.display())]
    InvalidHandle { path: PathBuf, handle: String },

    #[error("unknown extension type `{extension_type}` in {}", path.display())]
    UnknownExtensionType { path: PathBuf, extension_type: String },

    #[error("invalid glob pattern `{pattern}`: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error(
        "extension handle `{handle}` is defined twice ({} and {})",
        first.display(),
        second.display()
    )]
    DuplicateHandle {
        handle: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("load task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum WatchError {
    /// The root configuration file disappeared; no valid model can be built.
    #[error("the active app configuration {} was deleted, exiting", path.display())]
    ConfigLost { path: PathBuf },

    #[error("failed to load app: {0}")]
    Load(#[from] LoadError),
}

impl WatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchError::ConfigLost { .. })
    }
}
