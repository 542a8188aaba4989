//! Client-side session handle.
//!
//! Wraps a [`CoordStore`] and a session id so callers issue requests the way
//! a ZooKeeper client does, without threading the id through every call.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::op::{Op, OpResult};
use crate::processor::Coordinator;
use crate::session::SessionId;
use crate::store::{CoordStore, CreateMode, Stat};
use crate::watch::EventReceiver;

/// A connected session.
pub struct Session<S: CoordStore = Coordinator> {
    id: SessionId,
    timeout: Duration,
    store: Arc<S>,
    events: Option<EventReceiver>,
}

impl<S: CoordStore> Session<S> {
    /// Open a session against a store.
    pub async fn connect(store: Arc<S>, timeout: Duration) -> Result<Self> {
        let (id, timeout, events) = store.open_session(timeout).await?;
        debug!(session = %id, timeout_ms = timeout.as_millis() as u64, "connected");
        Ok(Self {
            id,
            timeout,
            store,
            events: Some(events),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Timeout negotiated with the store.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The session's event channel, unless it has been taken.
    pub fn events(&mut self) -> Option<&mut EventReceiver> {
        self.events.as_mut()
    }

    /// Take the event channel, e.g. to hand it to a listener task.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    /// Create a node and return the path actually created.
    pub async fn create(
        &self,
        path: &str,
        data: impl Into<Vec<u8>> + Send,
        mode: CreateMode,
    ) -> Result<String> {
        let (path, _) = self.store.create(self.id, path, data.into(), mode).await?;
        Ok(path)
    }

    pub async fn create_json<T: Serialize + Send + Sync>(
        &self,
        path: &str,
        value: &T,
        mode: CreateMode,
    ) -> Result<String> {
        let (path, _) = self.store.create_json(self.id, path, value, mode).await?;
        Ok(path)
    }

    pub async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        self.store.get_data(self.id, path, false).await
    }

    /// Read a node and arm a data-change watch on it.
    pub async fn get_w(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        self.store.get_data(self.id, path, true).await
    }

    pub async fn get_json<T: DeserializeOwned + Send>(&self, path: &str) -> Result<(T, Stat)> {
        self.store.get_json(self.id, path, false).await
    }

    pub async fn set(
        &self,
        path: &str,
        data: impl Into<Vec<u8>> + Send,
        version: i64,
    ) -> Result<Stat> {
        self.store
            .set_data(self.id, path, data.into(), version)
            .await
    }

    pub async fn set_json<T: Serialize + Send + Sync>(
        &self,
        path: &str,
        value: &T,
        version: i64,
    ) -> Result<Stat> {
        self.store.set_json(self.id, path, value, version).await
    }

    pub async fn delete(&self, path: &str, version: i64) -> Result<()> {
        self.store.delete(self.id, path, version).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.store.exists(self.id, path, false).await
    }

    /// Stat a node and arm a watch that fires on its next create, write or
    /// delete.
    pub async fn exists_w(&self, path: &str) -> Result<Option<Stat>> {
        self.store.stat(self.id, path, true).await
    }

    pub async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        self.store.children(self.id, path, false).await
    }

    /// List children and arm a children-change watch.
    pub async fn children_w(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        self.store.children(self.id, path, true).await
    }

    pub async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>> {
        self.store.multi(self.id, ops).await
    }

    /// End the session, deleting its ephemeral nodes.
    pub async fn close(self) -> Result<()> {
        self.store.close_session(self.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::session::SessionState;
    use crate::store::ANY_VERSION;
    use crate::watch::{EventType, SessionEvent, WatchedEvent};
    use serde::Deserialize;

    async fn connect(coord: &Arc<Coordinator>) -> Session {
        let mut session = Session::connect(coord.clone(), Duration::from_secs(10))
            .await
            .unwrap();
        session.events().unwrap().drain();
        session
    }

    #[tokio::test]
    async fn test_demo_flow() {
        let coord = Arc::new(Coordinator::default());
        let session = connect(&coord).await;

        let path = session
            .create("/program-test", "program-test-data", CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(path, "/program-test");

        let (children, stat) = session.children("/").await.unwrap();
        assert_eq!(children, vec!["program-test"]);
        assert_eq!(stat.num_children, 1);

        session
            .set("/program-test", "new-program-test-data", ANY_VERSION)
            .await
            .unwrap();
        let (data, stat) = session.get("/program-test").await.unwrap();
        assert_eq!(data, b"new-program-test-data");
        assert_eq!(stat.version, 1);

        assert!(session.exists("/program-test").await.unwrap());
        session.delete("/program-test", ANY_VERSION).await.unwrap();
        assert!(!session.exists("/program-test").await.unwrap());
    }

    #[tokio::test]
    async fn test_json_payloads() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Endpoint {
            host: String,
            port: u16,
        }

        let coord = Arc::new(Coordinator::default());
        let session = connect(&coord).await;
        let endpoint = Endpoint {
            host: "10.0.0.1".to_string(),
            port: 2181,
        };

        session
            .create_json("/endpoint", &endpoint, CreateMode::Ephemeral)
            .await
            .unwrap();
        let (loaded, stat): (Endpoint, Stat) = session.get_json("/endpoint").await.unwrap();
        assert_eq!(loaded, endpoint);
        assert_eq!(stat.ephemeral_owner, Some(session.id()));

        let moved = Endpoint {
            port: 2182,
            ..endpoint
        };
        let stat = session.set_json("/endpoint", &moved, 0).await.unwrap();
        assert_eq!(stat.version, 1);

        session.set("/endpoint", "not json", ANY_VERSION).await.unwrap();
        let err = session.get_json::<Endpoint>("/endpoint").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Serialization);
    }

    #[tokio::test]
    async fn test_watch_delivered_to_other_session() {
        let coord = Arc::new(Coordinator::default());
        let owner = connect(&coord).await;
        let mut watcher = connect(&coord).await;

        owner
            .create("/leader", "me", CreateMode::Ephemeral)
            .await
            .unwrap();
        assert!(watcher.exists_w("/leader").await.unwrap().is_some());
        owner.close().await.unwrap();

        let event = watcher.events().unwrap().recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::Watch(WatchedEvent::new("/leader", EventType::NodeDeleted))
        );
        assert!(!watcher.exists("/leader").await.unwrap());
    }

    #[tokio::test]
    async fn test_close_ends_event_stream() {
        let coord = Arc::new(Coordinator::default());
        let mut session = connect(&coord).await;
        let mut events = session.take_events().unwrap();
        assert!(session.events().is_none());

        session.close().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::State(SessionState::Expired))
        );
        assert_eq!(events.recv().await, None);
    }
}
