//! Classified engine errors.
//!
//! Most of our internal plumbing uses [`anyhow`], but anything that crosses
//! the engine boundary is sorted into one of these classes, so that the host
//! pipeline can tell "your configuration is wrong" apart from "Google was
//! unhappy with this page".

use std::{io, path::PathBuf};

/// Result type for engine operations.
pub type EngineResult<T, E = EngineError> = std::result::Result<T, E>;

/// An error reported by the engine to the host pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid options or credential file. Detected before any recognition.
    #[error("configuration error: {0}")]
    Config(String),

    /// We could not construct a session with the remote service.
    #[error("could not initialize Google Cloud Vision client: {source:#}")]
    Environment {
        #[source]
        source: anyhow::Error,
    },

    /// The remote service reported an error, or the call itself failed.
    #[error("Google Cloud Vision error: {message}")]
    RemoteRecognition { message: String },

    /// Reading the page or writing an output artifact failed.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Anything we did not anticipate. The original cause is preserved.
    #[error("plugin error during Google Cloud Vision OCR: {source:#}")]
    Plugin {
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a remote recognition error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteRecognition {
            message: message.into(),
        }
    }

    /// Create an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an unexpected error, unless it's already classified.
    pub fn plugin(source: anyhow::Error) -> Self {
        match source.downcast::<EngineError>() {
            Ok(classified) => classified,
            Err(source) => Self::Plugin { source },
        }
    }

    /// Is this a per-page execution failure (as opposed to a problem with
    /// our configuration or environment)?
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::RemoteRecognition { .. } | Self::Io { .. })
    }
}
