use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the store's persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The snapshot file exists but isn't a valid store snapshot.
    /// Fatal at startup: serving a partial data set is worse than
    /// refusing to start.
    #[error("snapshot file {path:?} is not valid JSON: {source}")]
    CorruptSnapshot {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(serde_json::Error),
}
