//! Error types for fleet-core.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration problems. Any of these aborts a run before a single
/// repository is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading configuration input.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Well-formed YAML with values that cannot be used.
    #[error("invalid configuration in {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    /// `dirs::home_dir()` returned `None` and `FLEET_HOME` is unset.
    #[error("cannot determine home directory; set $HOME or $FLEET_HOME")]
    HomeNotFound,
}

impl ConfigError {
    pub fn invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience constructor for [`ConfigError::Io`].
pub fn config_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
