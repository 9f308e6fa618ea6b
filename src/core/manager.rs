//! # Connection supervisor for one kernel.
//!
//! [`KernelManager`] pairs the external [`KernelProcess`] with the [`KernelBridge`] that
//! talks to it. It drives the lifecycle state machine around every management call and
//! refuses to connect the bridge before the process reports `started`.
//!
//! ## Architecture
//! ```text
//! start()/restart()/shutdown()
//!     │  LifecycleTracker::transition(op, process.op())
//!     │      starting/restarting/terminating ──► started/dead | unknown on error
//!     └─ on success: bus.publish(KernelEvent) ──► ClientDirectory listener
//!
//! connect_bridge()
//!     ├─ dead?                    → KernelDead
//!     ├─ poll until started       → KernelStartTimeout / KernelDead
//!     ├─ bridge.load_connection_info(process.connection_info())
//!     └─ bridge.connect()
//! ```
//!
//! ## Rules
//! - `interrupt` does not transition the lifecycle state.
//! - Bridge side effects of start/restart/shutdown (connect, reset, removal) belong to
//!   the [`ClientDirectory`](crate::ClientDirectory) reacting to the published events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::KernelBridge;
use crate::config::ManagerConfig;
use crate::error::{ConnectError, ProcessError};
use crate::events::{Bus, KernelAction, KernelEvent};
use crate::state::{KernelStatus, LifecycleOp, LifecycleState, LifecycleTracker};
use crate::transport::{ConnectionInfo, Transport};

/// The external supervisor of a kernel process.
///
/// Launching, signalling and provisioning the process are its business; the manager
/// only sequences the calls.
#[async_trait]
pub trait KernelProcess: Send + Sync + 'static {
    async fn start(&self) -> Result<(), ProcessError>;

    async fn restart(&self) -> Result<(), ProcessError>;

    async fn shutdown(&self) -> Result<(), ProcessError>;

    async fn interrupt(&self) -> Result<(), ProcessError>;

    /// Current connection info. Ports may be placeholders until the process started.
    fn connection_info(&self) -> ConnectionInfo;
}

/// Supervisor of one kernel: lifecycle state plus the bridge to it.
pub struct KernelManager {
    kernel_id: Arc<str>,
    process: Arc<dyn KernelProcess>,
    lifecycle: LifecycleTracker,
    bridge: Arc<KernelBridge>,
    cfg: ManagerConfig,
    bus: Option<Bus>,
}

impl KernelManager {
    /// Creates a manager and its (disconnected) bridge.
    pub fn new(
        kernel_id: impl Into<Arc<str>>,
        process: Arc<dyn KernelProcess>,
        transport: Arc<dyn Transport>,
        cfg: ManagerConfig,
    ) -> Self {
        let kernel_id: Arc<str> = kernel_id.into();
        let bridge = KernelBridge::new(Arc::clone(&kernel_id), transport, cfg.bridge.clone());
        Self {
            lifecycle: LifecycleTracker::new(Arc::clone(&kernel_id)),
            kernel_id,
            process,
            bridge,
            cfg,
            bus: None,
        }
    }

    /// Publishes a [`KernelEvent`] on `bus` after each successful management call.
    #[must_use]
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    /// The bridge owned by this manager.
    pub fn bridge(&self) -> &Arc<KernelBridge> {
        &self.bridge
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.process.connection_info()
    }

    // ---------------------------
    // Management operations
    // ---------------------------

    pub async fn start(&self) -> Result<(), ProcessError> {
        info!(kernel_id = %self.kernel_id, "starting kernel");
        self.lifecycle
            .transition(LifecycleOp::Start, self.process.start())
            .await?;
        self.publish(KernelAction::Start);
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), ProcessError> {
        info!(kernel_id = %self.kernel_id, "restarting kernel");
        self.lifecycle
            .transition(LifecycleOp::Restart, self.process.restart())
            .await?;
        self.publish(KernelAction::Restart);
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), ProcessError> {
        info!(kernel_id = %self.kernel_id, "shutting down kernel");
        self.lifecycle
            .transition(LifecycleOp::Shutdown, self.process.shutdown())
            .await?;
        self.publish(KernelAction::Shutdown);
        Ok(())
    }

    pub async fn interrupt(&self) -> Result<(), ProcessError> {
        info!(kernel_id = %self.kernel_id, "interrupting kernel");
        self.process.interrupt().await?;
        self.publish(KernelAction::Interrupt);
        Ok(())
    }

    fn publish(&self, action: KernelAction) {
        if let Some(bus) = &self.bus {
            bus.publish(KernelEvent::new(action, Arc::clone(&self.kernel_id)));
        }
    }

    // ---------------------------
    // Bridge sequencing
    // ---------------------------

    /// Polls the lifecycle state until `started`.
    ///
    /// Fails fast on `dead`, or with [`ConnectError::KernelStartTimeout`] after
    /// `started_timeout`.
    pub async fn wait_for_started(&self) -> Result<(), ConnectError> {
        let deadline = Instant::now() + self.cfg.started_timeout;
        loop {
            let state = self.lifecycle.state();
            debug!(kernel_id = %self.kernel_id, %state, "waiting for kernel to start");
            match state {
                LifecycleState::Started => return Ok(()),
                LifecycleState::Dead => return Err(ConnectError::KernelDead),
                _ => {}
            }
            if Instant::now() >= deadline {
                warn!(kernel_id = %self.kernel_id, last_state = %state, "timed out waiting for kernel to start");
                return Err(ConnectError::KernelStartTimeout {
                    timeout: self.cfg.started_timeout,
                    last_state: state.to_string(),
                });
            }
            tokio::time::sleep(self.cfg.started_poll).await;
        }
    }

    /// Connects the bridge once the kernel has started.
    pub async fn connect_bridge(&self) -> Result<(), ConnectError> {
        if self.lifecycle.is_dead() {
            warn!(kernel_id = %self.kernel_id, "kernel is dead, not connecting");
            return Err(ConnectError::KernelDead);
        }
        self.wait_for_started().await?;
        self.bridge.load_connection_info(self.process.connection_info());
        self.bridge.connect().await
    }

    // ---------------------------
    // State
    // ---------------------------

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Overrides the lifecycle state (for supervisors that learn it out of band).
    pub fn set_lifecycle_state(&self, state: LifecycleState) {
        self.lifecycle.set(state);
    }

    /// Receiver observing lifecycle state changes.
    pub fn watch_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    pub fn is_unknown(&self) -> bool {
        self.lifecycle.is_unknown()
    }

    pub fn is_starting(&self) -> bool {
        self.lifecycle.is_starting()
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    pub fn is_restarting(&self) -> bool {
        self.lifecycle.is_restarting()
    }

    pub fn is_terminating(&self) -> bool {
        self.lifecycle.is_terminating()
    }

    pub fn is_dead(&self) -> bool {
        self.lifecycle.is_dead()
    }

    /// Lifecycle and execution state together.
    pub fn status(&self) -> KernelStatus {
        KernelStatus {
            kernel_id: self.kernel_id.to_string(),
            lifecycle_state: self.lifecycle.state(),
            execution_state: self.bridge.execution_state(),
            connected: self.bridge.is_connected(),
            last_activity: self.bridge.last_activity(),
        }
    }
}

impl std::fmt::Debug for KernelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelManager")
            .field("kernel_id", &self.kernel_id)
            .field("lifecycle_state", &self.lifecycle.state())
            .field("bridge", &self.bridge)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::state::ExecutionState;
    use crate::transport::{KernelHandle, MemoryTransport};

    /// Process double whose operations succeed unless told otherwise.
    #[derive(Default)]
    pub(crate) struct FakeProcess {
        pub(crate) fail: AtomicBool,
    }

    impl FakeProcess {
        fn result(&self, err: fn(String) -> ProcessError) -> Result<(), ProcessError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(err("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KernelProcess for FakeProcess {
        async fn start(&self) -> Result<(), ProcessError> {
            self.result(ProcessError::Start)
        }

        async fn restart(&self) -> Result<(), ProcessError> {
            self.result(ProcessError::Restart)
        }

        async fn shutdown(&self) -> Result<(), ProcessError> {
            self.result(ProcessError::Shutdown)
        }

        async fn interrupt(&self) -> Result<(), ProcessError> {
            self.result(ProcessError::Interrupt)
        }

        fn connection_info(&self) -> ConnectionInfo {
            ConnectionInfo {
                ip: "127.0.0.1".into(),
                shell_port: 1,
                iopub_port: 2,
                stdin_port: 3,
                control_port: 4,
                hb_port: 5,
                ..Default::default()
            }
        }
    }

    pub(crate) fn manager(kernel_id: &str) -> (KernelManager, Arc<FakeProcess>, KernelHandle) {
        let (transport, kernel) = MemoryTransport::new();
        let process = Arc::new(FakeProcess::default());
        let mgr = KernelManager::new(
            kernel_id,
            process.clone(),
            Arc::new(transport),
            ManagerConfig::default(),
        );
        (mgr, process, kernel)
    }

    #[tokio::test]
    async fn operations_follow_the_transition_table() {
        let (mgr, process, _kernel) = manager("k");
        assert!(mgr.is_unknown());

        mgr.start().await.unwrap();
        assert!(mgr.is_started());

        mgr.restart().await.unwrap();
        assert!(mgr.is_started());

        mgr.interrupt().await.unwrap();
        assert!(mgr.is_started());

        process.fail.store(true, Ordering::SeqCst);
        assert_eq!(
            mgr.restart().await,
            Err(ProcessError::Restart("boom".into()))
        );
        assert!(mgr.is_unknown());

        process.fail.store(false, Ordering::SeqCst);
        mgr.shutdown().await.unwrap();
        assert!(mgr.is_dead());
    }

    #[tokio::test]
    async fn successful_operations_are_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let (mgr, process, _kernel) = manager("k");
        let mgr = mgr.with_bus(bus);

        mgr.start().await.unwrap();
        process.fail.store(true, Ordering::SeqCst);
        assert!(mgr.interrupt().await.is_err());
        process.fail.store(false, Ordering::SeqCst);
        mgr.shutdown().await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.action, KernelAction::Start);
        assert_eq!(second.action, KernelAction::Shutdown);
        assert_eq!(&*second.kernel_id, "k");
    }

    #[tokio::test]
    async fn lifecycle_changes_are_observable() {
        let (mgr, _process, _kernel) = manager("k");
        let mut rx = mgr.watch_lifecycle();

        mgr.start().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LifecycleState::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_waits_for_started() {
        let (mgr, _process, kernel) = manager("k");
        let mgr = Arc::new(mgr);

        let m = Arc::clone(&mgr);
        let connecting = tokio::spawn(async move { m.connect_bridge().await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(kernel.opens(), 0);

        mgr.set_lifecycle_state(LifecycleState::Started);
        connecting.await.unwrap().unwrap();
        assert_eq!(kernel.opens(), 1);
        assert!(mgr.bridge().connection_info().unwrap().is_provisioned());

        let status = mgr.status();
        assert_eq!(status.lifecycle_state, LifecycleState::Started);
        assert_eq!(status.execution_state, ExecutionState::Idle);
        assert!(status.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_on_dead_or_slow_kernels() {
        let (mgr, _process, kernel) = manager("k");

        let err = mgr.connect_bridge().await.unwrap_err();
        assert_eq!(
            err,
            ConnectError::KernelStartTimeout {
                timeout: Duration::from_secs(30),
                last_state: "unknown".into(),
            }
        );

        mgr.set_lifecycle_state(LifecycleState::Dead);
        assert_eq!(mgr.connect_bridge().await, Err(ConnectError::KernelDead));
        assert_eq!(kernel.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn death_while_waiting_fails_fast() {
        let (mgr, _process, kernel) = manager("k");
        let mgr = Arc::new(mgr);
        let started = tokio::time::Instant::now();

        let m = Arc::clone(&mgr);
        let connecting = tokio::spawn(async move { m.connect_bridge().await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        mgr.set_lifecycle_state(LifecycleState::Dead);

        assert_eq!(connecting.await.unwrap(), Err(ConnectError::KernelDead));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(kernel.opens(), 0);
    }
}
