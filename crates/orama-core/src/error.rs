//! Error taxonomy shared across the Orama workspace.
//!
//! Every fallible operation in the core returns an [`Error`] carrying a
//! typed [`ErrorKind`]. Call sites branch on kinds, never on message
//! substrings — the port allocator retries on [`ErrorKind::AlreadyExists`],
//! the HTTP layers map kinds to status codes.

use thiserror::Error;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of a core error. Wire names are kebab-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Validation,
    Unauthorized,
    Forbidden,
    Conflict,
    NoNodesAvailable,
    NoPortsAvailable,
    NamespaceNotAssigned,
    RetryExhausted,
    PeerRpc,
    HealthCheck,
    StorageUnavailable,
    Internal,
}

impl ErrorKind {
    /// Kebab-case label, as carried in error bodies and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NoNodesAvailable => "no-nodes-available",
            ErrorKind::NoPortsAvailable => "no-ports-available",
            ErrorKind::NamespaceNotAssigned => "namespace-not-assigned",
            ErrorKind::RetryExhausted => "retry-exhausted",
            ErrorKind::PeerRpc => "peer-rpc-failed",
            ErrorKind::HealthCheck => "health-check-failed",
            ErrorKind::StorageUnavailable => "storage-unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

/// A core error: a typed kind plus a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{}: {}", .kind.as_str(), .message)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn no_nodes_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoNodesAvailable, message)
    }

    pub fn no_ports_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoPortsAvailable, message)
    }

    pub fn namespace_not_assigned(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NamespaceNotAssigned, message)
    }

    pub fn retry_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RetryExhausted, message)
    }

    pub fn peer_rpc(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PeerRpc, message)
    }

    pub fn health_check(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HealthCheck, message)
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::internal(format!("io error: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_matchable() {
        let err = Error::already_exists("port 10100 on node-a");
        assert!(err.is(ErrorKind::AlreadyExists));
        assert!(!err.is(ErrorKind::Conflict));
    }

    #[test]
    fn display_includes_kind_label() {
        let err = Error::no_ports_available("range exhausted on node-a");
        let rendered = err.to_string();
        assert!(rendered.starts_with("no-ports-available:"));
        assert!(rendered.contains("node-a"));
    }

    #[test]
    fn io_errors_become_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
