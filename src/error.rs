//! Error types for coordination operations.
//!
//! Every tree and session failure names the operation that raised it and the
//! path it was aimed at, so callers can tell a session problem apart from a
//! structural conflict in the tree.

use config::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::op::OpCode;
use crate::session::SessionId;

/// Errors that can occur while processing coordination requests.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The node does not exist.
    #[error("{op} {path:?}: no node")]
    NoNode { op: OpCode, path: String },

    /// A node already exists at the path.
    #[error("{op} {path:?}: node already exists")]
    NodeExists { op: OpCode, path: String },

    /// The parent of the path does not exist.
    #[error("{op} {path:?}: parent node does not exist")]
    NoParent { op: OpCode, path: String },

    /// The node still has children.
    #[error("{op} {path:?}: node has children")]
    NotEmpty { op: OpCode, path: String },

    /// Expected data version does not match the node's current version.
    #[error("{op} {path:?}: version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        op: OpCode,
        path: String,
        expected: i64,
        found: i64,
    },

    /// The session is unknown or has already expired.
    #[error("{op} {path:?}: no such session {session}")]
    NoSuchSession {
        op: OpCode,
        path: String,
        session: SessionId,
    },

    /// The session is live in the table but can no longer be used.
    #[error("{op} {path:?}: session {session} expired")]
    SessionExpired {
        op: OpCode,
        path: String,
        session: SessionId,
    },

    /// The session is disconnected and must reconnect before issuing requests.
    #[error("{op} {path:?}: connection lost for session {session}")]
    ConnectionLoss {
        op: OpCode,
        path: String,
        session: SessionId,
    },

    /// Malformed path.
    #[error("{op} {path:?}: invalid path: {reason}")]
    InvalidPath {
        op: OpCode,
        path: String,
        reason: String,
    },

    /// Payload exceeds the configured limit.
    #[error("{op} {path:?}: data of {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        op: OpCode,
        path: String,
        size: usize,
        limit: usize,
    },

    /// Ephemeral nodes cannot be parents.
    #[error("{op} {path:?}: ephemeral nodes cannot have children")]
    NoChildrenForEphemerals { op: OpCode, path: String },

    /// One operation of an atomic batch failed; nothing was applied.
    #[error("multi op #{index} failed: {source}")]
    MultiFailed {
        index: usize,
        #[source]
        source: Box<CoordError>,
    },

    /// Internal invariant violated; the operation was aborted.
    #[error("{op} {path:?}: internal invariant violated: {detail}")]
    Internal {
        op: OpCode,
        path: String,
        detail: String,
    },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for coordination operations.
pub type Result<T> = std::result::Result<T, CoordError>;

/// Flat error code, suitable for putting on the wire or matching on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NoNode,
    NodeExists,
    NoParent,
    NotEmpty,
    VersionMismatch,
    NoSuchSession,
    SessionExpired,
    ConnectionLoss,
    InvalidPath,
    DataTooLarge,
    NoChildrenForEphemerals,
    Internal,
    Config,
    Serialization,
}

impl CoordError {
    /// The flat code for this error. Batch failures report the inner code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordError::NoNode { .. } => ErrorCode::NoNode,
            CoordError::NodeExists { .. } => ErrorCode::NodeExists,
            CoordError::NoParent { .. } => ErrorCode::NoParent,
            CoordError::NotEmpty { .. } => ErrorCode::NotEmpty,
            CoordError::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            CoordError::NoSuchSession { .. } => ErrorCode::NoSuchSession,
            CoordError::SessionExpired { .. } => ErrorCode::SessionExpired,
            CoordError::ConnectionLoss { .. } => ErrorCode::ConnectionLoss,
            CoordError::InvalidPath { .. } => ErrorCode::InvalidPath,
            CoordError::DataTooLarge { .. } => ErrorCode::DataTooLarge,
            CoordError::NoChildrenForEphemerals { .. } => ErrorCode::NoChildrenForEphemerals,
            CoordError::MultiFailed { source, .. } => source.code(),
            CoordError::Internal { .. } => ErrorCode::Internal,
            CoordError::Config(_) => ErrorCode::Config,
            CoordError::SerializationError(_) => ErrorCode::Serialization,
        }
    }

    /// The operation that raised this error, if it came from a request.
    pub fn op(&self) -> Option<OpCode> {
        match self {
            CoordError::NoNode { op, .. }
            | CoordError::NodeExists { op, .. }
            | CoordError::NoParent { op, .. }
            | CoordError::NotEmpty { op, .. }
            | CoordError::VersionMismatch { op, .. }
            | CoordError::NoSuchSession { op, .. }
            | CoordError::SessionExpired { op, .. }
            | CoordError::ConnectionLoss { op, .. }
            | CoordError::InvalidPath { op, .. }
            | CoordError::DataTooLarge { op, .. }
            | CoordError::NoChildrenForEphemerals { op, .. }
            | CoordError::Internal { op, .. } => Some(*op),
            CoordError::MultiFailed { source, .. } => source.op(),
            CoordError::Config(_) | CoordError::SerializationError(_) => None,
        }
    }

    /// The path the failing operation targeted, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            CoordError::NoNode { path, .. }
            | CoordError::NodeExists { path, .. }
            | CoordError::NoParent { path, .. }
            | CoordError::NotEmpty { path, .. }
            | CoordError::VersionMismatch { path, .. }
            | CoordError::NoSuchSession { path, .. }
            | CoordError::SessionExpired { path, .. }
            | CoordError::ConnectionLoss { path, .. }
            | CoordError::InvalidPath { path, .. }
            | CoordError::DataTooLarge { path, .. }
            | CoordError::NoChildrenForEphemerals { path, .. }
            | CoordError::Internal { path, .. } => Some(path),
            CoordError::MultiFailed { source, .. } => source.path(),
            CoordError::Config(_) | CoordError::SerializationError(_) => None,
        }
    }

    /// Returns true if the failure concerns the session rather than the tree.
    ///
    /// Reconnect-and-retry policy belongs to the client; the core never
    /// retries on its own.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::NoSuchSession | ErrorCode::SessionExpired | ErrorCode::ConnectionLoss
        )
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        CoordError::SerializationError(err.to_string())
    }
}
