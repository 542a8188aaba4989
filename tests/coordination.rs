//! End-to-end behavior of the coordinator through the public API.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use univrs_coord::{
    CoordError, CoordStore, Coordinator, CreateMode, ErrorCode, EventType, OpCode, Session,
    SessionEvent, SessionState, WatchedEvent, ANY_VERSION,
};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn connect(coordinator: &Arc<Coordinator>) -> Session {
    let mut session = Session::connect(coordinator.clone(), TIMEOUT).await.unwrap();
    session.events().unwrap().drain();
    session
}

fn watch_events(session: &mut Session) -> Vec<WatchedEvent> {
    session
        .events()
        .unwrap()
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Watch(event) => Some(event),
            SessionEvent::State(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_exists_reflects_last_applied_operation() {
    let coordinator = Arc::new(Coordinator::default());
    let writer = connect(&coordinator).await;
    let observer = connect(&coordinator).await;

    for _ in 0..5 {
        writer
            .create("/flip", "", CreateMode::Persistent)
            .await
            .unwrap();
        assert!(observer.exists("/flip").await.unwrap());

        writer.delete("/flip", ANY_VERSION).await.unwrap();
        assert!(!observer.exists("/flip").await.unwrap());
    }
}

#[tokio::test]
async fn test_set_version_semantics() {
    let coordinator = Arc::new(Coordinator::default());
    let session = connect(&coordinator).await;
    session.create("/v", "0", CreateMode::Persistent).await.unwrap();

    for expected in 0..3 {
        let stat = session.set("/v", "next", expected).await.unwrap();
        assert_eq!(stat.version, expected + 1);
    }

    for stale in [0, 2, 4, 100] {
        let err = session.set("/v", "stale", stale).await.unwrap_err();
        assert!(matches!(
            err,
            CoordError::VersionMismatch {
                op: OpCode::SetData,
                expected,
                found: 3,
                ..
            } if expected == stale
        ));
    }
    let (_, stat) = session.get("/v").await.unwrap();
    assert_eq!(stat.version, 3);

    let stat = session.set("/v", "any", ANY_VERSION).await.unwrap();
    assert_eq!(stat.version, 4);
}

#[tokio::test]
async fn test_delete_requires_empty_node() {
    let coordinator = Arc::new(Coordinator::default());
    let session = connect(&coordinator).await;

    session.create("/p", "", CreateMode::Persistent).await.unwrap();
    session.create("/p/c1", "", CreateMode::Persistent).await.unwrap();
    session.create("/p/c2", "", CreateMode::Persistent).await.unwrap();

    let err = session.delete("/p", ANY_VERSION).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotEmpty);
    assert_eq!(err.path(), Some("/p"));

    session.delete("/p/c1", ANY_VERSION).await.unwrap();
    let err = session.delete("/p", ANY_VERSION).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotEmpty);

    session.delete("/p/c2", ANY_VERSION).await.unwrap();
    session.delete("/p", ANY_VERSION).await.unwrap();
    assert!(!session.exists("/p").await.unwrap());
}

#[tokio::test]
async fn test_get_watch_fires_exactly_once() {
    let coordinator = Arc::new(Coordinator::default());
    let writer = connect(&coordinator).await;
    let mut reader = connect(&coordinator).await;

    writer.create("/w", "a", CreateMode::Persistent).await.unwrap();
    reader.get_w("/w").await.unwrap();

    writer.set("/w", "b", ANY_VERSION).await.unwrap();
    assert_eq!(
        watch_events(&mut reader),
        vec![WatchedEvent::new("/w", EventType::NodeDataChanged)]
    );

    writer.set("/w", "c", ANY_VERSION).await.unwrap();
    writer.delete("/w", ANY_VERSION).await.unwrap();
    assert!(watch_events(&mut reader).is_empty());
}

#[tokio::test]
async fn test_get_watch_fires_on_delete() {
    let coordinator = Arc::new(Coordinator::default());
    let writer = connect(&coordinator).await;
    let mut reader = connect(&coordinator).await;

    writer.create("/d", "a", CreateMode::Persistent).await.unwrap();
    reader.get_w("/d").await.unwrap();
    writer.delete("/d", ANY_VERSION).await.unwrap();

    assert_eq!(
        watch_events(&mut reader),
        vec![WatchedEvent::new("/d", EventType::NodeDeleted)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expiry_removes_ephemerals_atomically() {
    let coordinator = Arc::new(Coordinator::default());
    let observer = Session::connect(coordinator.clone(), Duration::from_secs(3600))
        .await
        .unwrap();

    for _ in 0..20 {
        // Negotiated down to the minimum, well below the observer's timeout.
        let owner = Session::connect(coordinator.clone(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(owner.timeout() < observer.timeout());
        owner.create("/a", "", CreateMode::Ephemeral).await.unwrap();
        owner.create("/b", "", CreateMode::Ephemeral).await.unwrap();

        let (present_tx, present_rx) = oneshot::channel();
        let reader = {
            let coordinator = coordinator.clone();
            let id = observer.id();
            tokio::spawn(async move {
                let mut present_tx = Some(present_tx);
                let mut snapshots = 0usize;
                loop {
                    let (children, _) = coordinator.children(id, "/", false).await.unwrap();
                    let a = children.iter().any(|c| c == "a");
                    let b = children.iter().any(|c| c == "b");
                    assert_eq!(a, b, "observed a partial expiry: {:?}", children);
                    snapshots += 1;
                    if a {
                        if let Some(tx) = present_tx.take() {
                            let _ = tx.send(());
                        }
                    } else {
                        // Only reachable after both were seen present.
                        assert!(present_tx.is_none());
                        return snapshots;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        present_rx.await.unwrap();
        let later = Instant::now() + owner.timeout() + Duration::from_secs(1);
        let expired = {
            let coordinator = coordinator.clone();
            tokio::task::spawn_blocking(move || coordinator.expire_sessions(later))
                .await
                .unwrap()
        };
        assert_eq!(expired, vec![owner.id()]);
        assert!(reader.await.unwrap() >= 2);
    }

    let (children, _) = observer.children("/").await.unwrap();
    assert!(children.is_empty());
}

#[tokio::test]
async fn test_end_to_end_sequence() {
    let coordinator = Arc::new(Coordinator::default());
    let session = connect(&coordinator).await;

    let (_, stat) = coordinator
        .create(session.id(), "/x", b"v1".to_vec(), CreateMode::Persistent)
        .await
        .unwrap();
    assert_eq!(stat.version, 0);

    let (data, stat) = session.get("/x").await.unwrap();
    assert_eq!(data, b"v1");
    assert_eq!(stat.version, 0);

    let stat = session.set("/x", "v2", 0).await.unwrap();
    assert_eq!(stat.version, 1);

    let err = session.set("/x", "v3", 0).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::VersionMismatch);

    session.delete("/x", 1).await.unwrap();
    assert!(!session.exists("/x").await.unwrap());
}

#[tokio::test]
async fn test_session_state_transitions() {
    let coordinator = Arc::new(Coordinator::default());
    let mut session = Session::connect(coordinator.clone(), TIMEOUT).await.unwrap();
    let mut events = session.take_events().unwrap();
    let id = session.id();

    assert_eq!(
        events.drain(),
        vec![
            SessionEvent::State(SessionState::Connecting),
            SessionEvent::State(SessionState::Connected),
        ]
    );

    coordinator.expire_sessions(Instant::now() + TIMEOUT);
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::State(SessionState::Expired))
    );
    assert_eq!(events.recv().await, None);

    let err = session.get("/").await.unwrap_err();
    assert!(matches!(err, CoordError::NoSuchSession { session, .. } if session == id));
    assert!(err.is_session_error());
}

#[tokio::test]
async fn test_structural_errors_carry_path_and_op() {
    let coordinator = Arc::new(Coordinator::default());
    let session = connect(&coordinator).await;

    let err = session
        .create("/missing/child", "", CreateMode::Persistent)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoParent);
    assert_eq!(err.op(), Some(OpCode::Create));

    let err = session.get("/missing").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoNode);
    assert_eq!(err.path(), Some("/missing"));

    session.create("/e", "", CreateMode::Ephemeral).await.unwrap();
    let err = session
        .create("/e/child", "", CreateMode::Persistent)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoChildrenForEphemerals);

    let err = session
        .create("/e", "", CreateMode::Persistent)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NodeExists);

    let err = session.get("relative").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPath);
}

#[tokio::test]
async fn test_sequential_nodes_are_ordered() {
    let coordinator = Arc::new(Coordinator::default());
    let session = connect(&coordinator).await;
    session.create("/queue", "", CreateMode::Persistent).await.unwrap();

    let first = session
        .create("/queue/item-", "1", CreateMode::PersistentSequential)
        .await
        .unwrap();
    let second = session
        .create("/queue/item-", "2", CreateMode::EphemeralSequential)
        .await
        .unwrap();
    assert_eq!(first, "/queue/item-0000000000");
    assert_eq!(second, "/queue/item-0000000001");

    let (children, _) = session.children("/queue").await.unwrap();
    assert_eq!(children, vec!["item-0000000000", "item-0000000001"]);
}

#[tokio::test]
async fn test_children_watch_sees_ephemeral_cleanup() {
    let coordinator = Arc::new(Coordinator::default());
    let mut watcher = connect(&coordinator).await;
    let member = connect(&coordinator).await;

    watcher.create("/group", "", CreateMode::Persistent).await.unwrap();
    member
        .create("/group/m1", "", CreateMode::Ephemeral)
        .await
        .unwrap();

    let (children, _) = watcher.children_w("/group").await.unwrap();
    assert_eq!(children, vec!["m1"]);
    member.close().await.unwrap();

    assert_eq!(
        watch_events(&mut watcher),
        vec![WatchedEvent::new("/group", EventType::NodeChildrenChanged)]
    );
    let (children, stat) = watcher.children("/group").await.unwrap();
    assert!(children.is_empty());
    assert_eq!(stat.num_children, 0);
}
