use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// Classification of a failed remote call, computed once at the adapter
/// boundary so the store never looks at message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The resource lacks a field the request referenced.
    SchemaIncompatible,
    /// The target exists but the acting user may not touch it.
    PermissionDenied,
    /// The target (or the whole resource) does not exist.
    NotFound,
    /// Connection-level failure or timeout.
    Unreachable,
    /// Anything the adapter could not classify.
    Unknown,
}

impl RemoteErrorKind {
    /// Failures the caller can act on. Everything else is recovered locally.
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::PermissionDenied | Self::NotFound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SchemaIncompatible => "schema_incompatible",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::Unreachable => "unreachable",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote {kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unreachable, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::SchemaIncompatible, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::PermissionDenied, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unknown, message)
    }
}

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger only accepts locally-identified records, got \"{0}\"")]
    NotLocal(String),

    #[error("Ledger backend error: {0}")]
    Backend(String),

    #[error("Failed to serialize ledger entries: {0}")]
    Serialize(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Failures the store surfaces to its caller. Everything recoverable is
/// absorbed before it gets here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Permission denied for {resource}/{id}")]
    PermissionDenied { resource: String, id: String },

    #[error("Record not found: {resource}/{id}")]
    NotFound { resource: String, id: String },

    #[error("Record in \"{resource}\" has no id")]
    MissingId { resource: String },

    #[error("Local fallback failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Failed to encode {resource} record: {source}")]
    Encode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {resource} record \"{id}\": {source}")]
    Decode {
        resource: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for \"{field}\": {reason}")]
    Invalid { field: String, reason: String },
}

// ---------------------------------------------------------------------------
// SchedulerError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Reconcile scheduler is disposed")]
    Disposed,

    #[error("Scheduled reconcile was dropped before completing")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// HerdbookError (top-level rollup)
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HerdbookError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Convenience alias. The default error type is `HerdbookError`.
pub type Result<T, E = HerdbookError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
