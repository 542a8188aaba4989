//! # univrs-coord
//!
//! Single-node coordination core for the Univrs ecosystem, modeled on the
//! ZooKeeper data model:
//!
//! - **Node tree**: Hierarchical znodes (`/services/api/leader`) with data,
//!   versions and zxid-stamped stats
//! - **Sessions**: Time-bounded client sessions that own ephemeral nodes
//! - **Watches**: One-shot change notifications on a per-session channel
//! - **Atomic batches**: Multi-operation requests that apply all or nothing
//!
//! All state lives in memory inside a [`Coordinator`]. Requests are
//! linearized through one critical section, so every session observes the
//! same order of changes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use univrs_coord::{Coordinator, CreateMode, Session, ANY_VERSION};
//!
//! #[tokio::main]
//! async fn main() -> univrs_coord::Result<()> {
//!     let coordinator = Arc::new(Coordinator::default());
//!     let session = Session::connect(coordinator, Duration::from_secs(10)).await?;
//!
//!     // Create a node
//!     let path = session.create("/config", "v1", CreateMode::Persistent).await?;
//!
//!     // Conditional update
//!     let stat = session.set(&path, "v2", 0).await?;
//!     println!("Version: {}", stat.version);
//!
//!     session.delete(&path, ANY_VERSION).await?;
//!     session.close().await
//! }
//! ```
//!
//! ## Watches and Ephemeral Nodes
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use univrs_coord::{Coordinator, CreateMode, Session, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> univrs_coord::Result<()> {
//!     let coordinator = Arc::new(Coordinator::default());
//!     let leader = Session::connect(coordinator.clone(), Duration::from_secs(10)).await?;
//!     let mut follower = Session::connect(coordinator, Duration::from_secs(10)).await?;
//!
//!     leader.create("/leader", "node-1", CreateMode::Ephemeral).await?;
//!     follower.exists_w("/leader").await?;
//!
//!     // Closing the leader's session deletes its ephemeral node.
//!     leader.close().await?;
//!
//!     let events = follower.events().expect("event channel not taken");
//!     while let Some(event) = events.recv().await {
//!         if let SessionEvent::Watch(event) = event {
//!             println!("{:?} on {}", event.event_type, event.path);
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Atomic Batches
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use univrs_coord::{Coordinator, CreateMode, Op, Session};
//!
//! #[tokio::main]
//! async fn main() -> univrs_coord::Result<()> {
//!     let coordinator = Arc::new(Coordinator::default());
//!     let session = Session::connect(coordinator, Duration::from_secs(10)).await?;
//!
//!     session.create("/nodes", "", CreateMode::Persistent).await?;
//!
//!     // Claim a slot only if the registry is still at version 0
//!     session.multi(vec![
//!         Op::check("/nodes", 0),
//!         Op::create("/nodes/slot-", "w1", CreateMode::EphemeralSequential),
//!         Op::set_data("/nodes", "1 member", 0),
//!     ]).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod op;
pub mod path;
pub mod processor;
pub mod reaper;
pub mod session;
pub mod store;
pub mod tree;
pub mod watch;

// Re-export main types
pub use client::Session;
pub use config::CoordConfig;
pub use error::{CoordError, ErrorCode, Result};
pub use op::{Op, OpCode, OpResult, Request, Response};
pub use processor::{CoordStats, Coordinator};
pub use reaper::spawn_session_reaper;
pub use session::{SessionId, SessionState};
pub use store::{CoordStore, CreateMode, Stat, ANY_VERSION};
pub use watch::{EventReceiver, EventType, SessionEvent, WatchKind, WatchedEvent};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::Session;
    pub use crate::error::{CoordError, Result};
    pub use crate::op::Op;
    pub use crate::processor::Coordinator;
    pub use crate::store::{CoordStore, CreateMode, Stat, ANY_VERSION};
    pub use crate::watch::{EventType, SessionEvent, WatchedEvent};
}
