//! Walks a single session through the basic node lifecycle against an
//! in-process coordinator.
//!
//! Configuration is read from `CONFIG_PATH` and `COORD__*` variables; log
//! filtering follows `RUST_LOG` (default `info`).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use univrs_coord::{
    spawn_session_reaper, CoordConfig, Coordinator, CreateMode, Result, Session, SessionEvent,
    SessionState, ANY_VERSION,
};

const TEST_NODE: &str = "program-test2";

fn node_path(node: &str) -> String {
    format!("/{node}")
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    let config = CoordConfig::new()?.validate()?;
    let sweep_interval = config.session.sweep_interval();
    let coordinator = Arc::new(Coordinator::new(config));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let reaper = spawn_session_reaper(coordinator.clone(), sweep_interval, shutdown_rx);

    let mut session = Session::connect(coordinator.clone(), Duration::from_secs(1)).await?;
    info!(session = %session.id(), timeout_ms = session.timeout().as_millis() as u64, "connected");

    let listener = session.take_events().map(|mut events| {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::State(state) => {
                        info!("Coordinator state: {:?}", state);
                        if state == SessionState::Connected {
                            info!("Session established");
                        }
                    }
                    SessionEvent::Watch(event) => {
                        info!("Watch fired: {:?} on {}", event.event_type, event.path);
                    }
                }
            }
        })
    });

    run_demo(&session).await;

    if let Err(e) = session.close().await {
        warn!("Failed to close session: {}", e);
    }
    if let Some(listener) = listener {
        if let Err(e) = listener.await {
            warn!("Event listener task failed: {}", e);
        }
    }

    if let Err(e) = shutdown_tx.send(()) {
        warn!("Failed to signal session reaper shutdown: {}", e);
    }
    if let Err(e) = reaper.await {
        warn!("Session reaper task failed: {}", e);
    }
    Ok(())
}

async fn run_demo(session: &Session) {
    let path = node_path(TEST_NODE);

    match session
        .create(&path, "program-test-data-2", CreateMode::Persistent)
        .await
    {
        Ok(created) => info!("node added at path: {}", created),
        Err(e) => warn!("{}", e),
    }

    match session.children("/").await {
        Ok((children, stat)) => println!("{:?} {:?}", children, stat),
        Err(e) => warn!("{}", e),
    }

    match session.set(&path, "new-program-test-data-2", ANY_VERSION).await {
        Ok(_) => info!("set data completed at path: {}", path),
        Err(e) => warn!("{}", e),
    }

    match session.get(&path).await {
        Ok((data, stat)) => println!("{} {:?}", String::from_utf8_lossy(&data), stat),
        Err(e) => warn!("{}", e),
    }

    match session.exists(&path).await {
        Ok(exists) => println!("Node at path: {} exists: {}", path, exists),
        Err(e) => warn!("{}", e),
    }

    match session.delete(&path, ANY_VERSION).await {
        Ok(()) => println!("node deleted at path: {}", path),
        Err(e) => warn!("{}", e),
    }

    match session.exists(&path).await {
        Ok(exists) => println!("Node at path: {} exists: {}", path, exists),
        Err(e) => warn!("{}", e),
    }
}

fn init_observability() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(fmt_layer).init();
}
