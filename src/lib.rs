//! # kernel-bridge
//!
//! **kernel-bridge** multiplexes many consumers (browser tabs, websockets, tools) onto
//! one long-lived compute kernel reachable over five message channels.
//!
//! It keeps a single connection per kernel, correlates every request with the replies
//! and status events it causes, tracks the kernel's execution and lifecycle state, and
//! fans kernel traffic out to filtered subscribers.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   consumer #1        consumer #2        consumer #3
//!  (KernelConnection) (KernelConnection) (KernelConnection)
//!        │ ▲                │ ▲                │ ▲
//!        ▼ │                ▼ │                ▼ │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ClientDirectory (kernel id → client)                             │
//! │  - Bus listener (start / restart / shutdown / interrupt)          │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  KernelManager                                                    │
//! │  - LifecycleTracker (unknown → starting → started → ... → dead)   │
//! │  - KernelProcess (external supervisor)                            │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  KernelBridge                                                     │
//! │  - CorrelationCache (message id / unit of work → request)         │
//! │  - PendingQueue (messages sent before the connection is ready)    │
//! │  - SubscriberRegistry (filtered fan-out)                          │
//! │  - ExecutionState (driven by status messages)                     │
//! └──────┬──────────┬──────────┬──────────┬──────────┬────────────────┘
//!        ▼          ▼          ▼          ▼          ▼
//!      shell      iopub      stdin     control   heartbeat
//!        └──────────┴──── Transport ─────┴──────────┘
//! ```
//!
//! ### Connect
//! ```text
//! KernelManager::start() ──► Bus(Start) ──► ClientDirectory
//!                                             ├─► create_client
//!                                             └─► spawn(connect_client)
//!                                                   ├─ wait for lifecycle `started`
//!                                                   ├─ load connection info
//!                                                   └─ KernelBridge::connect()
//!                                                        ├─ open channels, spawn monitors
//!                                                        ├─ heartbeat ≤ N polls
//!                                                        ├─ verify communication
//!                                                        └─ flush pending (FIFO)
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Bridge**        | One shared connection per kernel.                             | [`KernelBridge`], [`Transport`]             |
//! | **Correlation**   | Bounded LRU map of request metadata.                          | [`CorrelationCache`], [`CacheEntry`]        |
//! | **Subscribers**   | Filtered fan-out of kernel messages.                          | [`Subscribe`], [`SubscribeFn`], [`MessageFilter`] |
//! | **Supervision**   | Lifecycle state machine and connect sequencing.               | [`KernelManager`], [`KernelProcess`]        |
//! | **Directory**     | Process-wide clients reacting to kernel events.               | [`ClientDirectory`], [`KernelEvent`]        |
//! | **Errors**        | Typed errors with stable labels.                              | [`ConnectError`], [`CacheError`]            |
//! | **Configuration** | Timing and capacity settings.                                 | [`BridgeConfig`], [`ManagerConfig`]         |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use kernel_bridge::{BridgeConfig, Channel, ConnectionInfo, KernelBridge, MemoryTransport, MessageFilter, SubscribeFn, SubscriberError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (transport, _kernel) = MemoryTransport::new();
//!     let bridge = KernelBridge::new("k-1", Arc::new(transport), BridgeConfig::default());
//!     bridge.load_connection_info(ConnectionInfo::default());
//!
//!     bridge.subscribe(
//!         SubscribeFn::arc("printer", |channel: Channel, env| async move {
//!             println!("[{channel}] {}", env.msg_type());
//!             Ok::<_, SubscriberError>(())
//!         }),
//!         MessageFilter::All,
//!     );
//!
//!     bridge.connect().await?;
//!     assert!(bridge.is_connected());
//!     bridge.disconnect();
//!     Ok(())
//! }
//! ```
mod bridge;
mod cache;
mod config;
mod core;
mod error;
mod events;
mod message;
mod state;
mod subscribers;
mod transport;

// ---- Public re-exports ----

pub use bridge::{KernelBridge, Offer, PendingQueue};
pub use cache::{CacheEntry, CacheKey, CorrelationCache, Direction};
pub use config::{BridgeConfig, DirectoryConfig, ManagerConfig};
pub use core::{ClientDirectory, FrameSink, KernelConnection, KernelManager, KernelProcess};
pub use error::{
    CacheError, ChannelError, ConnectError, ProcessError, SendError, SinkError, SubscriberError,
};
pub use events::{Bus, KernelAction, KernelEvent};
pub use message::{Channel, Envelope, Header, Request, Session, PROTOCOL_VERSION, UNIT_OF_WORK_KEY};
pub use state::{ExecutionState, KernelStatus, LifecycleOp, LifecycleState, LifecycleTracker};
pub use subscribers::{MessageFilter, MessageKinds, Subscribe, SubscribeFn, SubscriberRef, SubscriberRegistry};
pub use transport::{
    wire, ChannelSet, ConnectionInfo, Frames, Heartbeat, KernelChannel, KernelHandle,
    MemoryTransport, Transport,
};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
