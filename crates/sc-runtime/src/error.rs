use std::path::PathBuf;

/// Loader failures. The runtime publishes these on the bus; a failed START
/// creates no chain, a failed RELOAD keeps the previous entry function.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed reading script manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown script module '{module}' referenced by '{script}'")]
    UnknownModule { script: String, module: String },

    #[error("no entry function in '{script}', expected one of {candidates:?}")]
    NoEntryFunction {
        script: String,
        candidates: Vec<String>,
    },
}
