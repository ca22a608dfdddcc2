//! Sync error handling
//!
//! Typed errors for the session engine. Only connection errors end a
//! connection; everything else is reported and the session carries on.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while scanning the sync root
#[derive(Error, Debug)]
pub enum ScanError {
    /// Root folder is missing or not a directory
    #[error("Sync root '{path}' is not a readable directory")]
    InvalidRoot { path: PathBuf },

    /// Part of the tree could not be read
    #[error("Failed to read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File name is not valid UTF-8 and cannot be put on the wire
    #[error("Path '{path}' is not valid UTF-8")]
    InvalidPath { path: PathBuf },

    /// The blocking scan task was cancelled or panicked
    #[error("Scan task failed: {0}")]
    Task(String),
}

impl From<walkdir::Error> for ScanError {
    fn from(error: walkdir::Error) -> Self {
        let path = error.path().map(PathBuf::from).unwrap_or_default();
        match error.into_io_error() {
            Some(source) => ScanError::Unreadable { path, source },
            None => ScanError::Unreadable {
                path,
                source: io::Error::new(io::ErrorKind::Other, "filesystem loop detected"),
            },
        }
    }
}

/// Errors that can occur during a sync session
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport failure; recovered by reconnecting
    #[error("Connection error: {0}")]
    Connection(String),

    /// Manifest scan failed; the cycle is aborted
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Message arrived that the current state does not allow
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Streamed byte count or digest disagrees with what was announced
    #[error("Integrity mismatch for '{path}': {details}")]
    IntegrityMismatch { path: String, details: String },

    /// Local file I/O failed
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Control message could not be encoded or decoded
    #[error("Invalid control message: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the connection is gone
    pub fn is_connection(&self) -> bool {
        matches!(self, SyncError::Connection(_))
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors from one-off file sends over HTTP
#[derive(Error, Debug)]
pub enum QuickTransferError {
    /// `server_url` cannot be turned into an HTTP upload endpoint
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Local file could not be opened
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Peer answered with a non-success status
    #[error("Upload of '{name}' rejected with status {status}")]
    Rejected { name: String, status: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_classification() {
        let err = SyncError::Connection("reset by peer".to_string());
        assert!(err.is_connection());

        let err = SyncError::ProtocolViolation("unexpected sync_plan".to_string());
        assert!(!err.is_connection());
    }

    #[test]
    fn test_scan_error_display() {
        let err = SyncError::from(ScanError::InvalidRoot {
            path: PathBuf::from("/missing/root"),
        });

        let msg = err.to_string();
        assert!(msg.contains("/missing/root"));
        assert!(msg.contains("not a readable directory"));
    }

    #[test]
    fn test_io_error_display() {
        let err = SyncError::io(
            "photos/a.jpg",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );

        let msg = err.to_string();
        assert!(msg.contains("photos/a.jpg"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_quick_transfer_error_display() {
        let err = QuickTransferError::Rejected {
            name: "photo.jpg".to_string(),
            status: 413,
        };
        assert_eq!(
            err.to_string(),
            "Upload of 'photo.jpg' rejected with status 413"
        );
    }
}
