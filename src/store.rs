//! CoordStore trait - the core abstraction consumed by clients.
//!
//! Node metadata (`Stat`), creation modes, and the request surface every
//! coordination backend exposes:
//! - Sessions: open, close
//! - Core operations: create, get, set, delete, exists, children
//! - Atomic batches: multi
//! - Watches: armed by reads, delivered on the session's event channel

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::error::{CoordError, Result};
use crate::op::{Op, OpCode, OpResult, Request, Response};
use crate::session::SessionId;
use crate::watch::EventReceiver;

/// Expected version that skips the version check.
pub const ANY_VERSION: i64 = -1;

/// Metadata returned alongside node data and children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Transaction that created the node.
    pub czxid: u64,
    /// Transaction that last wrote the node's data.
    pub mzxid: u64,
    /// Transaction that last added or removed a child.
    pub pzxid: u64,
    /// When the node was created.
    pub ctime: SystemTime,
    /// When the node's data was last written.
    pub mtime: SystemTime,
    /// Data version, incremented on every data write.
    pub version: i64,
    /// Children version, incremented on every child add or remove.
    pub cversion: i64,
    /// Owning session for ephemeral nodes.
    pub ephemeral_owner: Option<SessionId>,
    pub data_length: usize,
    pub num_children: usize,
}

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CreateMode {
    /// Survives its creator's session.
    #[default]
    Persistent,
    /// Deleted when the creating session ends.
    Ephemeral,
    /// Persistent, with a parent-assigned sequence suffix.
    PersistentSequential,
    /// Ephemeral, with a parent-assigned sequence suffix.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

fn unexpected(op: OpCode, path: &str, response: &Response) -> CoordError {
    CoordError::Internal {
        op,
        path: path.to_string(),
        detail: format!("unexpected response {:?}", response),
    }
}

/// The coordination service surface.
///
/// The in-process [`Coordinator`](crate::Coordinator) implements this trait;
/// a replicated or remote backend would implement it too. Code should depend
/// on this trait, not on a specific implementation.
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Open a session with the requested timeout.
    ///
    /// Returns the session id, the negotiated timeout and the session's
    /// event channel.
    async fn open_session(&self, timeout: Duration)
        -> Result<(SessionId, Duration, EventReceiver)>;

    /// Close a session, deleting its ephemeral nodes.
    async fn close_session(&self, session: SessionId) -> Result<()>;

    /// Process one request on behalf of a session.
    async fn submit(&self, session: SessionId, request: Request) -> Result<Response>;

    /// Create a node. Returns the created path (which differs from the
    /// requested one for sequential modes) and its stat.
    async fn create(
        &self,
        session: SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<(String, Stat)> {
        let request = Request::Create {
            path: path.to_string(),
            data,
            mode,
        };
        match self.submit(session, request).await? {
            Response::Create { path, stat } => Ok((path, stat)),
            other => Err(unexpected(OpCode::Create, path, &other)),
        }
    }

    /// Create a node with a JSON-encoded payload.
    async fn create_json<T: Serialize + Send + Sync>(
        &self,
        session: SessionId,
        path: &str,
        value: &T,
        mode: CreateMode,
    ) -> Result<(String, Stat)> {
        let bytes = serde_json::to_vec(value)?;
        self.create(session, path, bytes, mode).await
    }

    /// Read a node's data, optionally arming a data-change watch.
    async fn get_data(&self, session: SessionId, path: &str, watch: bool) -> Result<(Vec<u8>, Stat)> {
        let request = Request::GetData {
            path: path.to_string(),
            watch,
        };
        match self.submit(session, request).await? {
            Response::GetData { data, stat } => Ok((data, stat)),
            other => Err(unexpected(OpCode::GetData, path, &other)),
        }
    }

    /// Read a node's data and deserialize it as JSON.
    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        session: SessionId,
        path: &str,
        watch: bool,
    ) -> Result<(T, Stat)> {
        let (data, stat) = self.get_data(session, path, watch).await?;
        let value: T = serde_json::from_slice(&data)?;
        Ok((value, stat))
    }

    /// Overwrite a node's data if its version matches (or `ANY_VERSION`).
    async fn set_data(
        &self,
        session: SessionId,
        path: &str,
        data: Vec<u8>,
        version: i64,
    ) -> Result<Stat> {
        let request = Request::SetData {
            path: path.to_string(),
            data,
            version,
        };
        match self.submit(session, request).await? {
            Response::SetData { stat } => Ok(stat),
            other => Err(unexpected(OpCode::SetData, path, &other)),
        }
    }

    /// Overwrite a node's data with a JSON-encoded value.
    async fn set_json<T: Serialize + Send + Sync>(
        &self,
        session: SessionId,
        path: &str,
        value: &T,
        version: i64,
    ) -> Result<Stat> {
        let bytes = serde_json::to_vec(value)?;
        self.set_data(session, path, bytes, version).await
    }

    /// Delete a childless node if its version matches (or `ANY_VERSION`).
    async fn delete(&self, session: SessionId, path: &str, version: i64) -> Result<()> {
        let request = Request::Delete {
            path: path.to_string(),
            version,
        };
        match self.submit(session, request).await? {
            Response::Delete => Ok(()),
            other => Err(unexpected(OpCode::Delete, path, &other)),
        }
    }

    /// Stat a node if present, optionally arming a watch.
    async fn stat(&self, session: SessionId, path: &str, watch: bool) -> Result<Option<Stat>> {
        let request = Request::Exists {
            path: path.to_string(),
            watch,
        };
        match self.submit(session, request).await? {
            Response::Exists { stat } => Ok(stat),
            other => Err(unexpected(OpCode::Exists, path, &other)),
        }
    }

    /// Check if a node exists, optionally arming a watch.
    async fn exists(&self, session: SessionId, path: &str, watch: bool) -> Result<bool> {
        Ok(self.stat(session, path, watch).await?.is_some())
    }

    /// List a node's children in lexicographic order, optionally arming a
    /// children-change watch.
    async fn children(
        &self,
        session: SessionId,
        path: &str,
        watch: bool,
    ) -> Result<(Vec<String>, Stat)> {
        let request = Request::GetChildren {
            path: path.to_string(),
            watch,
        };
        match self.submit(session, request).await? {
            Response::GetChildren { children, stat } => Ok((children, stat)),
            other => Err(unexpected(OpCode::GetChildren, path, &other)),
        }
    }

    /// Execute a batch atomically.
    ///
    /// All operations succeed or none is applied. Later operations observe
    /// the effects of earlier ones.
    async fn multi(&self, session: SessionId, ops: Vec<Op>) -> Result<Vec<OpResult>> {
        let request = Request::Multi(ops);
        let path = request.path().to_string();
        match self.submit(session, request).await? {
            Response::Multi(results) => Ok(results),
            other => Err(unexpected(OpCode::Multi, &path, &other)),
        }
    }
}
