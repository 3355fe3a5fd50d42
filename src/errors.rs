//! Error handling for the election store

use serde::{Deserialize, Serialize};

/// Result type alias for the election store
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes reported by a remote document store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    PermissionDenied,
    Network,
    Unknown,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RemoteErrorKind::PermissionDenied => "permission denied",
            RemoteErrorKind::Network => "network",
            RemoteErrorKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Main error type for the election store
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Remote backend rejected or failed an operation
    #[error("Remote store error ({kind}): {raw}")]
    Remote { kind: RemoteErrorKind, raw: String },

    /// Local persistent cache failures
    #[error("Local cache error: {message}")]
    LocalCache { message: String },

    /// Ballot or lookup for an id absent from the roster
    #[error("Voter not found: {voter_id}")]
    VoterNotFound { voter_id: String },

    /// Phase 2 selection larger than the configured limit
    #[error("Selection of {selected} candidates exceeds the limit of {limit}")]
    SelectionLimitExceeded { selected: usize, limit: u32 },

    /// Ballot submitted while the phase is closed
    #[error("Phase {phase} is closed")]
    PhaseClosed { phase: u8 },

    /// Malformed or unreadable tabular input
    #[error("Import failed: {message}")]
    ImportParse { message: String },

    /// Admin secret mismatch
    #[error("Admin secret rejected")]
    AdminDenied,

    /// Validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a new remote error
    pub fn remote(kind: RemoteErrorKind, raw: impl Into<String>) -> Self {
        Self::Remote {
            kind,
            raw: raw.into(),
        }
    }

    /// Create a new local cache error
    pub fn local_cache(message: impl Into<String>) -> Self {
        Self::LocalCache {
            message: message.into(),
        }
    }

    pub fn voter_not_found(voter_id: impl Into<String>) -> Self {
        Self::VoterNotFound {
            voter_id: voter_id.into(),
        }
    }

    /// Create a new import error
    pub fn import(message: impl Into<String>) -> Self {
        Self::ImportParse {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Error::Remote {
                kind: RemoteErrorKind::PermissionDenied,
                ..
            }
        )
    }

    /// Human-facing message for the admin console.
    ///
    /// Permission failures get remediation steps, since the usual cause is
    /// access rules on the remote database that block reads and writes.
    pub fn diagnostic(&self) -> String {
        if self.is_permission_denied() {
            return "Remote store denied access (PERMISSION DENIED). Open the database \
                    console, go to the access rules of the realtime database, allow \
                    read and write for the election document, then publish the rules."
                .to_string();
        }
        self.to_string()
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! store_error {
    ($msg:expr) => {
        $crate::Error::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::internal(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! import_error {
    ($msg:expr) => {
        $crate::Error::import($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::import(format!($fmt, $($arg)*))
    };
}
