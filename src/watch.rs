//! One-shot watches and the per-session event channel.
//!
//! A watch is a (path, kind) registration owned by a session. It is consumed
//! the first time a matching change is applied and never re-armed on its
//! own. Fired watches become [`WatchedEvent`]s on the owning session's queue.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::trace;

use crate::session::{SessionId, SessionState};
use crate::tree::Change;

/// What a watch waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WatchKind {
    /// Creation or deletion of the path (and data writes once it exists).
    Exists,
    /// Data write or deletion of the path.
    Data,
    /// Child added or removed, or deletion of the path.
    Children,
}

/// Type of change reported to a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// A fired watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEvent {
    /// The path the watch was registered on.
    pub path: String,
    pub event_type: EventType,
}

impl WatchedEvent {
    pub fn new(path: impl Into<String>, event_type: EventType) -> Self {
        Self {
            path: path.into(),
            event_type,
        }
    }
}

/// Everything pushed to a client over its session's event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Connection state transition.
    State(SessionState),
    /// A watch fired.
    Watch(WatchedEvent),
}

/// Consumer end of a session's event queue.
///
/// Events arrive in the order they were produced. The channel closes once
/// the session is gone.
pub struct EventReceiver {
    session: SessionId,
    receiver: mpsc::Receiver<SessionEvent>,
}

impl EventReceiver {
    pub(crate) fn new(session: SessionId, receiver: mpsc::Receiver<SessionEvent>) -> Self {
        Self { session, receiver }
    }

    /// The session this channel belongs to.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Wait for the next event. `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for EventReceiver {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Registered watches, indexed by (path, kind) and by owning session.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watches: HashMap<(String, WatchKind), BTreeSet<SessionId>>,
    by_session: HashMap<SessionId, HashSet<(String, WatchKind)>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a watch. Re-registering the same (path, kind, session) is a no-op.
    ///
    /// Returns true if the watch was newly armed.
    pub fn register(&mut self, path: &str, kind: WatchKind, session: SessionId) -> bool {
        let added = self
            .watches
            .entry((path.to_string(), kind))
            .or_default()
            .insert(session);
        if added {
            self.by_session
                .entry(session)
                .or_default()
                .insert((path.to_string(), kind));
            trace!(session = %session, path, ?kind, "watch armed");
        }
        added
    }

    /// Remove and return every session watching (path, kind).
    pub fn fire(&mut self, path: &str, kind: WatchKind) -> Vec<SessionId> {
        let key = (path.to_string(), kind);
        let Some(sessions) = self.watches.remove(&key) else {
            return Vec::new();
        };
        for session in &sessions {
            if let Some(owned) = self.by_session.get_mut(session) {
                owned.remove(&key);
                if owned.is_empty() {
                    self.by_session.remove(session);
                }
            }
        }
        sessions.into_iter().collect()
    }

    /// Remove every watch owned by a session without firing any.
    ///
    /// Returns the number of watches dropped.
    pub fn drop_session(&mut self, session: SessionId) -> usize {
        let Some(owned) = self.by_session.remove(&session) else {
            return 0;
        };
        for key in &owned {
            if let Some(sessions) = self.watches.get_mut(key) {
                sessions.remove(&session);
                if sessions.is_empty() {
                    self.watches.remove(key);
                }
            }
        }
        owned.len()
    }

    /// Fire every watch a change triggers.
    ///
    /// A session watching the same path under several kinds gets a single
    /// event per (path, event type).
    pub fn trigger(&mut self, change: &Change) -> Vec<(SessionId, WatchedEvent)> {
        let mut out = Vec::new();
        match change {
            Change::Created { path, parent, .. } => {
                self.fire_into(&mut out, path, &[WatchKind::Exists], EventType::NodeCreated);
                self.fire_into(
                    &mut out,
                    parent,
                    &[WatchKind::Children],
                    EventType::NodeChildrenChanged,
                );
            }
            Change::DataChanged { path } => {
                self.fire_into(
                    &mut out,
                    path,
                    &[WatchKind::Data, WatchKind::Exists],
                    EventType::NodeDataChanged,
                );
            }
            Change::Deleted { path, parent, .. } => {
                self.fire_into(
                    &mut out,
                    path,
                    &[WatchKind::Data, WatchKind::Exists, WatchKind::Children],
                    EventType::NodeDeleted,
                );
                self.fire_into(
                    &mut out,
                    parent,
                    &[WatchKind::Children],
                    EventType::NodeChildrenChanged,
                );
            }
        }
        out
    }

    fn fire_into(
        &mut self,
        out: &mut Vec<(SessionId, WatchedEvent)>,
        path: &str,
        kinds: &[WatchKind],
        event_type: EventType,
    ) {
        let mut notified = BTreeSet::new();
        for kind in kinds {
            notified.extend(self.fire(path, *kind));
        }
        out.extend(
            notified
                .into_iter()
                .map(|session| (session, WatchedEvent::new(path, event_type))),
        );
    }

    /// Number of armed watches.
    pub fn len(&self) -> usize {
        self.watches.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Number of watches a session has armed.
    pub fn count_for(&self, session: SessionId) -> usize {
        self.by_session.get(&session).map_or(0, HashSet::len)
    }
}
