use std::path::PathBuf;

/// Errors produced by the orchestrator itself (catalog, configuration,
/// classification table). Per-source fetch failures are [`FetchError`].
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalog `{path}`: {source}")]
    CatalogFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid classification table `{path}`: {source}")]
    TableFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl OrchestratorError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

/// Failure raised by a fetch engine while delivering one source.
///
/// The display form is what the classification table inspects, so engine
/// implementations should surface the engine's own error text verbatim.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to launch fetch engine: {source}")]
    Launch {
        #[from]
        source: std::io::Error,
    },

    #[error("{message}")]
    Engine { message: String },
}

impl FetchError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }
}
