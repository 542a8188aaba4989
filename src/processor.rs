//! Operation processor: the single-node coordination authority.
//!
//! Every request walks `received -> validated -> applied -> notified ->
//! responded`:
//! - validated: the session is touched (unknown, lapsed or disconnected
//!   sessions are rejected before the tree is consulted)
//! - applied: one atomic step against the tree
//! - notified: every watch the step triggered is fired and queued
//! - responded: the result is handed back
//!
//! The tree's `RwLock` is the critical section. Reads share it; mutations,
//! watch firing and session reaping hold it exclusively. The session table
//! and the watch registry are only ever locked after the tree, in that
//! order. Nothing inside the section awaits or blocks on a client: events
//! are pushed with `try_send`.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CoordConfig;
use crate::error::{CoordError, Result};
use crate::op::{OpCode, Request, Response};
use crate::session::{SessionId, SessionManager, SessionState};
use crate::store::{CoordStore, ANY_VERSION};
use crate::tree::{Change, NodeTree};
use crate::watch::{EventReceiver, SessionEvent, WatchKind, WatchRegistry};

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordStats {
    pub nodes: usize,
    pub sessions: usize,
    pub watches: usize,
    pub last_zxid: u64,
}

/// In-memory coordination authority.
///
/// Owns the node tree, the session table and the watch registry for its
/// whole lifetime. All mutation goes through [`process`](Self::process),
/// [`close`](Self::close) or [`expire_sessions`](Self::expire_sessions).
#[derive(Debug)]
pub struct Coordinator {
    tree: RwLock<NodeTree>,
    sessions: Mutex<SessionManager>,
    watches: Mutex<WatchRegistry>,
    config: CoordConfig,
}

impl Coordinator {
    pub fn new(config: CoordConfig) -> Self {
        Self {
            tree: RwLock::new(NodeTree::new(config.limits.clone())),
            sessions: Mutex::new(SessionManager::new(config.server.server_id, &config.session)),
            watches: Mutex::new(WatchRegistry::new()),
            config,
        }
    }

    pub fn config(&self) -> &CoordConfig {
        &self.config
    }

    /// Open a session. Returns its id, the negotiated timeout and its event
    /// channel.
    pub fn open(&self, timeout: Duration) -> (SessionId, Duration, EventReceiver) {
        self.sessions.lock().open(timeout, Instant::now())
    }

    /// Process one request on behalf of a session.
    pub fn process(&self, session: SessionId, request: Request) -> Result<Response> {
        let op = request.op_code();
        let path = request.path().to_string();
        let result = if request.is_read() {
            self.process_read(session, request)
        } else {
            self.process_write(session, request)
        };
        if let Err(err) = &result {
            debug!(session = %session, %op, path = %path, error = %err, "request failed");
        }
        result
    }

    fn process_read(&self, session: SessionId, request: Request) -> Result<Response> {
        let op = request.op_code();
        let tree = self.tree.read();
        self.sessions
            .lock()
            .touch(session, Instant::now())
            .map_err(|fault| fault.into_error(op, request.path(), session))?;

        // Watches are armed while the read lock is still held, so no
        // mutation can land between the read and the registration.
        match request {
            Request::GetData { path, watch } => {
                let (data, stat) = tree.get(&path)?;
                if watch {
                    self.watches.lock().register(&path, WatchKind::Data, session);
                }
                Ok(Response::GetData { data, stat })
            }
            Request::Exists { path, watch } => {
                tree.validate(&path, op)?;
                let stat = tree.stat(&path);
                if watch {
                    // Present: wait for a write or delete. Absent: wait for a create.
                    let kind = if stat.is_some() {
                        WatchKind::Data
                    } else {
                        WatchKind::Exists
                    };
                    self.watches.lock().register(&path, kind, session);
                }
                Ok(Response::Exists { stat })
            }
            Request::GetChildren { path, watch } => {
                let (children, stat) = tree.children(&path)?;
                if watch {
                    self.watches
                        .lock()
                        .register(&path, WatchKind::Children, session);
                }
                Ok(Response::GetChildren { children, stat })
            }
            other => Err(CoordError::Internal {
                op,
                path: other.path().to_string(),
                detail: "write request routed to read path".to_string(),
            }),
        }
    }

    fn process_write(&self, session: SessionId, request: Request) -> Result<Response> {
        let op = request.op_code();
        let mut tree = self.tree.write();
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        sessions
            .touch(session, now)
            .map_err(|fault| fault.into_error(op, request.path(), session))?;

        let txn = tree.begin();
        let (response, changes) = match request {
            Request::Create { path, data, mode } => {
                let (path, stat, change) = tree.create(&path, data, mode, Some(session), &txn)?;
                (Response::Create { path, stat }, vec![change])
            }
            Request::SetData {
                path,
                data,
                version,
            } => {
                let (stat, change) = tree.set(&path, data, version, &txn)?;
                (Response::SetData { stat }, vec![change])
            }
            Request::Delete { path, version } => {
                let change = tree.delete(&path, version, &txn)?;
                (Response::Delete, vec![change])
            }
            Request::Multi(ops) => {
                let (results, changes) = tree.multi(ops, Some(session), &txn)?;
                (Response::Multi(results), changes)
            }
            other => {
                return Err(CoordError::Internal {
                    op,
                    path: other.path().to_string(),
                    detail: "read request routed to write path".to_string(),
                })
            }
        };
        tree.commit(&txn);
        debug!(session = %session, %op, zxid = txn.zxid, changes = changes.len(), "request applied");

        self.notify(&mut sessions, &changes, now);
        Ok(response)
    }

    /// Record ephemeral ownership and fire the watches for applied changes,
    /// in the order they were applied.
    fn notify(&self, sessions: &mut SessionManager, changes: &[Change], now: Instant) {
        let mut watches = self.watches.lock();
        for change in changes {
            match change {
                Change::Created {
                    path,
                    ephemeral_owner: Some(owner),
                    ..
                } => sessions.add_ephemeral(*owner, path),
                Change::Deleted {
                    path,
                    ephemeral_owner: Some(owner),
                    ..
                } => sessions.remove_ephemeral(*owner, path),
                _ => {}
            }
            for (watcher, event) in watches.trigger(change) {
                sessions.deliver(watcher, SessionEvent::Watch(event), now);
            }
        }
    }

    /// Delete an ended session's ephemerals, drop its watches, tell it it
    /// has expired and forget it. Runs inside the critical section.
    fn reap(
        &self,
        tree: &mut NodeTree,
        sessions: &mut SessionManager,
        session: SessionId,
        ephemerals: Vec<String>,
        now: Instant,
    ) {
        let dropped = self.watches.lock().drop_session(session);

        let txn = tree.begin();
        let mut changes = Vec::with_capacity(ephemerals.len());
        for path in ephemerals.iter().rev() {
            match tree.delete(path, ANY_VERSION, &txn) {
                Ok(change) => changes.push(change),
                Err(err) => {
                    warn!(session = %session, path = %path, error = %err, "failed to delete ephemeral node")
                }
            }
        }
        if !changes.is_empty() {
            tree.commit(&txn);
        }
        self.notify(sessions, &changes, now);

        sessions.deliver(session, SessionEvent::State(SessionState::Expired), now);
        sessions.remove(session);
        debug!(
            session = %session,
            ephemerals = changes.len(),
            watches = dropped,
            "session reaped"
        );
    }

    /// Close a session explicitly.
    pub fn close(&self, session: SessionId) -> Result<()> {
        let mut tree = self.tree.write();
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let ephemerals = sessions
            .close(session)
            .map_err(|fault| fault.into_error(OpCode::CloseSession, "", session))?;
        self.reap(&mut tree, &mut sessions, session, ephemerals, now);
        info!(session = %session, "session closed");
        Ok(())
    }

    /// Expire every session whose deadline is at or before `now`.
    ///
    /// Takes the same exclusive section as client mutations, so a request
    /// racing the sweep either lands first (and refreshes the deadline) or
    /// is rejected.
    pub fn expire_sessions(&self, now: Instant) -> Vec<SessionId> {
        let mut tree = self.tree.write();
        let mut sessions = self.sessions.lock();
        let expired = sessions.sweep(now);
        for session in &expired {
            let ephemerals = sessions.take_ephemerals(*session);
            self.reap(&mut tree, &mut sessions, *session, ephemerals, now);
            info!(session = %session, "session expired");
        }
        expired
    }

    /// Mark a session's connection as lost. Its deadline keeps running.
    pub fn disconnect(&self, session: SessionId) -> Result<()> {
        self.sessions
            .lock()
            .disconnect(session, Instant::now())
            .map_err(|fault| fault.into_error(OpCode::Disconnect, "", session))
    }

    /// Re-attach a disconnected session before its deadline.
    pub fn reconnect(&self, session: SessionId) -> Result<()> {
        self.sessions
            .lock()
            .reconnect(session, Instant::now())
            .map_err(|fault| fault.into_error(OpCode::Reconnect, "", session))
    }

    /// Paths of the ephemeral nodes a session owns.
    pub fn ephemerals(&self, session: SessionId) -> Result<Vec<String>> {
        let _tree = self.tree.read();
        self.sessions
            .lock()
            .ephemerals(session)
            .map_err(|fault| fault.into_error(OpCode::GetEphemerals, "", session))
    }

    /// Connection state of a session still in the table.
    pub fn session_state(&self, session: SessionId) -> Option<SessionState> {
        self.sessions.lock().state(session)
    }

    pub fn stats(&self) -> CoordStats {
        let tree = self.tree.read();
        let sessions = self.sessions.lock();
        let watches = self.watches.lock();
        CoordStats {
            nodes: tree.len(),
            sessions: sessions.len(),
            watches: watches.len(),
            last_zxid: tree.last_zxid(),
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(CoordConfig::default())
    }
}

#[async_trait]
impl CoordStore for Coordinator {
    async fn open_session(
        &self,
        timeout: Duration,
    ) -> Result<(SessionId, Duration, EventReceiver)> {
        Ok(self.open(timeout))
    }

    async fn close_session(&self, session: SessionId) -> Result<()> {
        self.close(session)
    }

    async fn submit(&self, session: SessionId, request: Request) -> Result<Response> {
        self.process(session, request)
    }
}
