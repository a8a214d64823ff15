//! Error types for fieldsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use fieldsync_core::ConfigError;

use crate::geometry::GeometryError;

pub type SyncResult<T> = Result<T, SyncError>;

/// All errors that can arise from reconciliation in either direction.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The Provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// Transport-level failure talking to the Provider or the Store.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(String),

    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// No grower mapping exists under the services path.
    #[error("no grower mapping found at {path}")]
    MissingGrowerAlias { path: String },

    /// A Provider record or Store body lacks a field the reconciler needs.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl SyncError {
    /// Failures confined to one record: that record is skipped, its siblings
    /// in the same tick or event still run.
    pub fn is_record_local(&self) -> bool {
        matches!(self, SyncError::Geometry(_) | SyncError::MalformedRecord(_))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_local_classification() {
        assert!(SyncError::Geometry(GeometryError::NonFinite).is_record_local());
        assert!(SyncError::MalformedRecord("no id".into()).is_record_local());
        assert!(!SyncError::Store("boom".into()).is_record_local());
        assert!(!SyncError::MissingGrowerAlias {
            path: "/bookmarks/services/datasilo".into()
        }
        .is_record_local());
    }
}
