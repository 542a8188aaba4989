//! Background session reaper.
//!
//! Runs [`Coordinator::expire_sessions`] on a fixed interval. The sweep takes
//! the coordinator's exclusive section, the same one client mutations use,
//! so ephemeral cleanup is serialized with ordinary requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::processor::Coordinator;

/// Spawn the reaper on the current tokio runtime.
///
/// The task stops when `shutdown` changes or its sender is dropped.
pub fn spawn_session_reaper(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = coordinator.expire_sessions(Instant::now());
                    if !expired.is_empty() {
                        debug!("Session reaper: expired {} sessions", expired.len());
                    }
                }
                _ = shutdown.changed() => {
                    info!("Session reaper received shutdown signal");
                    break;
                }
            }
        }

        debug!("Session reaper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::store::{CoordStore, CreateMode};
    use crate::watch::SessionEvent;

    #[tokio::test(start_paused = true)]
    async fn test_reaper_expires_idle_sessions() {
        let coord = Arc::new(Coordinator::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = spawn_session_reaper(coord.clone(), Duration::from_millis(100), shutdown_rx);

        let (idle, timeout, mut events) = coord.open_session(Duration::from_secs(5)).await.unwrap();
        coord
            .create(idle, "/worker", Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();

        tokio::time::sleep(timeout + Duration::from_millis(200)).await;

        assert_eq!(coord.session_state(idle), None);
        assert_eq!(coord.stats().nodes, 1);
        let states: Vec<_> = events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::State(s) => Some(s),
                SessionEvent::Watch(_) => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Expired
            ]
        );

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_session_survives() {
        let coord = Arc::new(Coordinator::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = spawn_session_reaper(coord.clone(), Duration::from_millis(100), shutdown_rx);

        let (busy, timeout, _events) = coord.open_session(Duration::from_secs(5)).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(timeout / 2).await;
            coord.exists(busy, "/", false).await.unwrap();
        }
        assert_eq!(coord.session_state(busy), Some(SessionState::Connected));

        drop(shutdown_tx);
        handle.await.unwrap();
    }
}
