use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while building a configuration snapshot.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The explicitly requested configuration file does not exist.
    #[error("configuration file '{path}' not found")]
    NotFound {
        /// Requested path.
        path: Utf8PathBuf,
    },
    /// The configuration file exists but could not be read.
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        /// File path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The configuration file is not a valid document for the schema.
    #[error("failed to parse configuration file '{path}': {message}")]
    Parse {
        /// File path.
        path: Utf8PathBuf,
        /// Decoder diagnostic.
        message: String,
    },
    /// A field, or a combination of fields, holds an unacceptable value.
    #[error("invalid configuration: {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// Explanation of the constraint that failed.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}
