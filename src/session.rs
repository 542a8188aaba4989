//! Session tracking: liveness deadlines, connection state, ephemeral
//! ownership and per-session event queues.
//!
//! The manager holds no reference to the tree. Ephemeral paths are a
//! non-owning record of what the processor must delete when a session ends.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{SessionConfig, MAX_SESSION_TIMEOUT, MIN_EVENT_QUEUE_CAPACITY};
use crate::error::CoordError;
use crate::op::OpCode;
use crate::watch::{EventReceiver, SessionEvent};

/// Opaque session identifier.
///
/// The top byte carries the server id, the low 56 bits a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// Connection state of a session, as reported on its event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Expired,
}

/// Why a session cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFault {
    /// Unknown id, or the session has already been expired.
    NoSuchSession,
    /// Deadline lapsed (not yet swept) or the event queue overflowed.
    Expired,
    /// The client dropped its connection and has not reconnected.
    Disconnected,
}

impl SessionFault {
    /// Attach the failing operation and path.
    pub fn into_error(self, op: OpCode, path: &str, session: SessionId) -> CoordError {
        let path = path.to_string();
        match self {
            SessionFault::NoSuchSession => CoordError::NoSuchSession { op, path, session },
            SessionFault::Expired => CoordError::SessionExpired { op, path, session },
            SessionFault::Disconnected => CoordError::ConnectionLoss { op, path, session },
        }
    }
}

#[derive(Debug)]
struct Session {
    timeout: Duration,
    deadline: Instant,
    state: SessionState,
    /// Set when the event queue overflowed; the session is reaped on the
    /// next sweep and accepts no further requests.
    doomed: bool,
    ephemerals: BTreeSet<String>,
    events: mpsc::Sender<SessionEvent>,
}

impl Session {
    fn is_lapsed(&self, now: Instant) -> bool {
        self.doomed || self.deadline <= now
    }
}

/// Table of live sessions.
#[derive(Debug)]
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    server_id: u8,
    next_seq: u64,
    min_timeout: Duration,
    max_timeout: Duration,
    queue_capacity: usize,
}

const SEQ_MASK: u64 = (1 << 56) - 1;

impl SessionManager {
    /// Bounds from an unvalidated config are clamped into a usable range.
    pub fn new(server_id: u8, config: &SessionConfig) -> Self {
        let max_timeout = config.max_timeout().min(MAX_SESSION_TIMEOUT);
        Self {
            sessions: HashMap::new(),
            server_id,
            next_seq: 1,
            min_timeout: config.min_timeout().min(max_timeout),
            max_timeout,
            queue_capacity: config.event_queue_capacity.max(MIN_EVENT_QUEUE_CAPACITY),
        }
    }

    /// Clamp a requested timeout to the configured bounds.
    pub fn negotiate_timeout(&self, requested: Duration) -> Duration {
        requested.clamp(self.min_timeout, self.max_timeout)
    }

    fn allocate_id(&mut self) -> SessionId {
        loop {
            let seq = self.next_seq & SEQ_MASK;
            self.next_seq = self.next_seq.wrapping_add(1);
            let id = SessionId(((self.server_id as u64) << 56) | seq);
            if seq != 0 && !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Open a new session.
    ///
    /// The returned receiver has already been sent `Connecting` and
    /// `Connected`.
    pub fn open(&mut self, timeout: Duration, now: Instant) -> (SessionId, Duration, EventReceiver) {
        let timeout = self.negotiate_timeout(timeout);
        let id = self.allocate_id();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.sessions.insert(
            id,
            Session {
                timeout,
                deadline: now + timeout,
                state: SessionState::Connecting,
                doomed: false,
                ephemerals: BTreeSet::new(),
                events: tx,
            },
        );
        self.deliver(id, SessionEvent::State(SessionState::Connecting), now);
        self.set_state(id, SessionState::Connected, now);

        debug!(session = %id, timeout_ms = timeout.as_millis() as u64, "session opened");
        (id, timeout, EventReceiver::new(id, rx))
    }

    fn live(&self, id: SessionId) -> Result<&Session, SessionFault> {
        match self.sessions.get(&id) {
            Some(session) if session.state != SessionState::Expired => Ok(session),
            _ => Err(SessionFault::NoSuchSession),
        }
    }

    fn live_mut(&mut self, id: SessionId) -> Result<&mut Session, SessionFault> {
        match self.sessions.get_mut(&id) {
            Some(session) if session.state != SessionState::Expired => Ok(session),
            _ => Err(SessionFault::NoSuchSession),
        }
    }

    /// Refresh a session's deadline. Called on every request it issues.
    pub fn touch(&mut self, id: SessionId, now: Instant) -> Result<(), SessionFault> {
        let session = self.live_mut(id)?;
        if session.is_lapsed(now) {
            return Err(SessionFault::Expired);
        }
        if session.state != SessionState::Connected {
            return Err(SessionFault::Disconnected);
        }
        session.deadline = now + session.timeout;
        trace!(session = %id, "session touched");
        Ok(())
    }

    /// Mark a session expired and hand back its ephemeral paths.
    pub fn close(&mut self, id: SessionId) -> Result<Vec<String>, SessionFault> {
        let session = self.live_mut(id)?;
        session.state = SessionState::Expired;
        Ok(std::mem::take(&mut session.ephemerals).into_iter().collect())
    }

    /// Expire every session whose deadline has passed.
    ///
    /// A session is returned by at most one sweep.
    pub fn sweep(&mut self, now: Instant) -> Vec<SessionId> {
        let mut expired: Vec<SessionId> = self
            .sessions
            .iter_mut()
            .filter(|(_, s)| s.state != SessionState::Expired && s.is_lapsed(now))
            .map(|(id, s)| {
                s.state = SessionState::Expired;
                *id
            })
            .collect();
        expired.sort();
        expired
    }

    /// Take the ephemeral paths of an expired session for cleanup.
    pub fn take_ephemerals(&mut self, id: SessionId) -> Vec<String> {
        self.sessions
            .get_mut(&id)
            .map(|s| std::mem::take(&mut s.ephemerals).into_iter().collect())
            .unwrap_or_default()
    }

    /// Drop a session's record, closing its event channel.
    pub fn remove(&mut self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    /// Ephemeral paths owned by a live session, sorted.
    pub fn ephemerals(&self, id: SessionId) -> Result<Vec<String>, SessionFault> {
        Ok(self.live(id)?.ephemerals.iter().cloned().collect())
    }

    pub fn add_ephemeral(&mut self, id: SessionId, path: &str) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.ephemerals.insert(path.to_string());
        }
    }

    pub fn remove_ephemeral(&mut self, id: SessionId, path: &str) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.ephemerals.remove(path);
        }
    }

    /// Client dropped its connection. The deadline keeps running.
    pub fn disconnect(&mut self, id: SessionId, now: Instant) -> Result<(), SessionFault> {
        let session = self.live_mut(id)?;
        if session.state == SessionState::Disconnected {
            return Ok(());
        }
        self.set_state(id, SessionState::Disconnected, now);
        Ok(())
    }

    /// Client re-established its connection before the deadline.
    pub fn reconnect(&mut self, id: SessionId, now: Instant) -> Result<(), SessionFault> {
        let session = self.live_mut(id)?;
        if session.is_lapsed(now) {
            return Err(SessionFault::Expired);
        }
        session.deadline = now + session.timeout;
        self.set_state(id, SessionState::Connecting, now);
        self.set_state(id, SessionState::Connected, now);
        Ok(())
    }

    fn set_state(&mut self, id: SessionId, state: SessionState, now: Instant) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.state = state;
        }
        self.deliver(id, SessionEvent::State(state), now);
    }

    /// Push an event onto a session's queue without blocking.
    ///
    /// A full queue dooms the session: it is expired at the next sweep.
    pub fn deliver(&mut self, id: SessionId, event: SessionEvent, now: Instant) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        match session.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                if !session.doomed {
                    warn!(session = %id, ?event, "event queue full, expiring session");
                }
                session.doomed = true;
                session.deadline = now;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(session = %id, "event receiver dropped");
            }
        }
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|s| s.state)
    }

    pub fn timeout(&self, id: SessionId) -> Option<Duration> {
        self.sessions.get(&id).map(|s| s.timeout)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
