//! Request and response types handled by the operation processor.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::{CreateMode, Stat};

/// Operation codes, used to label requests and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpCode {
    Create,
    GetData,
    SetData,
    Delete,
    Exists,
    GetChildren,
    Check,
    Multi,
    GetEphemerals,
    CloseSession,
    Reconnect,
    Disconnect,
}

impl OpCode {
    /// Returns true if the operation never mutates the tree.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            OpCode::GetData | OpCode::Exists | OpCode::GetChildren | OpCode::GetEphemerals
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Create => "create",
            OpCode::GetData => "get_data",
            OpCode::SetData => "set_data",
            OpCode::Delete => "delete",
            OpCode::Exists => "exists",
            OpCode::GetChildren => "get_children",
            OpCode::Check => "check",
            OpCode::Multi => "multi",
            OpCode::GetEphemerals => "get_ephemerals",
            OpCode::CloseSession => "close_session",
            OpCode::Reconnect => "reconnect",
            OpCode::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Create a node.
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    /// Overwrite a node's data.
    SetData {
        path: String,
        data: Vec<u8>,
        version: i64,
    },
    /// Delete a node.
    Delete { path: String, version: i64 },
    /// Check that a node has a specific version (fails the batch if not).
    Check { path: String, version: i64 },
}

impl Op {
    /// Create a Create operation.
    pub fn create(path: impl Into<String>, data: impl Into<Vec<u8>>, mode: CreateMode) -> Self {
        Self::Create {
            path: path.into(),
            data: data.into(),
            mode,
        }
    }

    /// Create a SetData operation.
    pub fn set_data(path: impl Into<String>, data: impl Into<Vec<u8>>, version: i64) -> Self {
        Self::SetData {
            path: path.into(),
            data: data.into(),
            version,
        }
    }

    /// Create a Delete operation.
    pub fn delete(path: impl Into<String>, version: i64) -> Self {
        Self::Delete {
            path: path.into(),
            version,
        }
    }

    /// Create a Check operation.
    pub fn check(path: impl Into<String>, version: i64) -> Self {
        Self::Check {
            path: path.into(),
            version,
        }
    }

    pub fn op_code(&self) -> OpCode {
        match self {
            Op::Create { .. } => OpCode::Create,
            Op::SetData { .. } => OpCode::SetData,
            Op::Delete { .. } => OpCode::Delete,
            Op::Check { .. } => OpCode::Check,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Op::Create { path, .. }
            | Op::SetData { path, .. }
            | Op::Delete { path, .. }
            | Op::Check { path, .. } => path,
        }
    }
}

/// Per-operation result of a successful batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    Create { path: String },
    SetData { stat: Stat },
    Delete,
    Check,
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    GetData {
        path: String,
        watch: bool,
    },
    SetData {
        path: String,
        data: Vec<u8>,
        version: i64,
    },
    Delete {
        path: String,
        version: i64,
    },
    Exists {
        path: String,
        watch: bool,
    },
    GetChildren {
        path: String,
        watch: bool,
    },
    Multi(Vec<Op>),
}

impl Request {
    pub fn op_code(&self) -> OpCode {
        match self {
            Request::Create { .. } => OpCode::Create,
            Request::GetData { .. } => OpCode::GetData,
            Request::SetData { .. } => OpCode::SetData,
            Request::Delete { .. } => OpCode::Delete,
            Request::Exists { .. } => OpCode::Exists,
            Request::GetChildren { .. } => OpCode::GetChildren,
            Request::Multi(_) => OpCode::Multi,
        }
    }

    /// Target path. A batch reports its first operation's path.
    pub fn path(&self) -> &str {
        match self {
            Request::Create { path, .. }
            | Request::GetData { path, .. }
            | Request::SetData { path, .. }
            | Request::Delete { path, .. }
            | Request::Exists { path, .. }
            | Request::GetChildren { path, .. } => path,
            Request::Multi(ops) => ops.first().map(Op::path).unwrap_or(""),
        }
    }

    pub fn is_read(&self) -> bool {
        self.op_code().is_read()
    }
}

/// The response to a successful request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Create { path: String, stat: Stat },
    GetData { data: Vec<u8>, stat: Stat },
    SetData { stat: Stat },
    Delete,
    Exists { stat: Option<Stat> },
    GetChildren { children: Vec<String>, stat: Stat },
    Multi(Vec<OpResult>),
}
