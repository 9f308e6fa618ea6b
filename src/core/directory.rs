//! # Client directory: process-wide map of kernel bridges.
//!
//! The directory knows every registered [`KernelManager`] and the [`KernelBridge`]
//! currently serving each kernel. It subscribes to the kernel action [`Bus`] and keeps
//! clients in step with the kernels:
//!
//! ## Architecture
//! ```text
//! KernelManager ─► Bus ─► ClientDirectory::spawn_listener()
//!                           ├─► Start     → create_client + spawn(connect_client)
//!                           ├─► Restart   → client.reset_for_restart()
//!                           ├─► Shutdown  → remove_client
//!                           └─► Interrupt → remove_client
//! ```
//!
//! ## Rules
//! - At most one client per kernel id; `create_client` is idempotent.
//! - A client is always the bridge owned by the kernel's manager.
//! - Removing a client cancels its background connect and disconnects it.
//! - The listener never awaits a connect: a slow kernel does not delay events for others.
//! - Listener failures are logged; the listener keeps running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::KernelBridge;
use crate::config::DirectoryConfig;
use crate::core::manager::KernelManager;
use crate::error::ConnectError;
use crate::events::{Bus, KernelAction, KernelEvent};
use crate::state::KernelStatus;

/// Background connect started by a `Start` event.
struct ConnectTask {
    id: u64,
    token: CancellationToken,
}

/// Registry of kernel managers and their active clients.
pub struct ClientDirectory {
    bus: Bus,
    kernels: RwLock<HashMap<String, Arc<KernelManager>>>,
    clients: RwLock<HashMap<String, Arc<KernelBridge>>>,
    connecting: Mutex<HashMap<String, ConnectTask>>,
    next_task: AtomicU64,
    listening: AtomicBool,
}

impl ClientDirectory {
    /// Creates an empty directory with its own event bus.
    pub fn new(cfg: DirectoryConfig) -> Arc<Self> {
        Arc::new(Self {
            bus: Bus::new(cfg.bus_capacity_clamped()),
            kernels: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            next_task: AtomicU64::new(1),
            listening: AtomicBool::new(false),
        })
    }

    /// The bus kernel managers should publish on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    // ---------------------------
    // Kernels
    // ---------------------------

    /// Registers a kernel manager, replacing any previous one under the same id.
    pub async fn add_kernel(&self, manager: Arc<KernelManager>) {
        let kernel_id = manager.kernel_id().to_string();
        debug!(%kernel_id, "kernel registered");
        self.kernels.write().await.insert(kernel_id, manager);
    }

    /// Unregisters a kernel manager and removes its client.
    pub async fn remove_kernel(&self, kernel_id: &str) -> Option<Arc<KernelManager>> {
        let removed = self.kernels.write().await.remove(kernel_id);
        self.remove_client(kernel_id).await;
        removed
    }

    pub async fn kernel(&self, kernel_id: &str) -> Option<Arc<KernelManager>> {
        self.kernels.read().await.get(kernel_id).cloned()
    }

    // ---------------------------
    // Clients
    // ---------------------------

    /// Returns the client for `kernel_id`, creating it from the kernel's manager.
    ///
    /// `None` when no manager is registered under the id.
    pub async fn create_client(&self, kernel_id: &str) -> Option<Arc<KernelBridge>> {
        if let Some(client) = self.get_client(kernel_id).await {
            return Some(client);
        }
        let manager = self.kernel(kernel_id).await?;

        let mut clients = self.clients.write().await;
        let client = clients
            .entry(kernel_id.to_string())
            .or_insert_with(|| {
                info!(%kernel_id, "client created");
                Arc::clone(manager.bridge())
            })
            .clone();
        Some(client)
    }

    /// Connects the client for `kernel_id`.
    ///
    /// A connected client returns at once. A client that is already connecting is
    /// joined for at most [`BridgeConfig::ready_wait`](crate::BridgeConfig::ready_wait),
    /// then [`ConnectError::ReadyTimeout`]. Otherwise the manager sequences the connect
    /// (waits for `started`, loads the connection info).
    pub async fn connect_client(&self, kernel_id: &str) -> Result<(), ConnectError> {
        let unknown = || ConnectError::UnknownKernel {
            kernel_id: kernel_id.to_string(),
        };
        let client = self.get_client(kernel_id).await.ok_or_else(unknown)?;

        if client.is_connected() {
            return Ok(());
        }
        if client.is_connecting() {
            let timeout = client.config().ready_wait;
            debug!(%kernel_id, ?timeout, "client already connecting, waiting for it");
            return match tokio::time::timeout(timeout, client.connect()).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(%kernel_id, ?timeout, "client did not become ready");
                    Err(ConnectError::ReadyTimeout { timeout })
                }
            };
        }

        let manager = self.kernel(kernel_id).await.ok_or_else(unknown)?;
        manager.connect_bridge().await
    }

    /// Disconnects the client, keeping it registered. `false` if there is none.
    pub async fn disconnect_client(&self, kernel_id: &str) -> bool {
        match self.get_client(kernel_id).await {
            Some(client) => {
                client.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnects and unregisters the client. `false` if there is none.
    pub async fn remove_client(&self, kernel_id: &str) -> bool {
        self.cancel_connect(kernel_id);
        let removed = self.clients.write().await.remove(kernel_id);
        match removed {
            Some(client) => {
                client.disconnect();
                info!(%kernel_id, "client removed");
                true
            }
            None => false,
        }
    }

    pub async fn get_client(&self, kernel_id: &str) -> Option<Arc<KernelBridge>> {
        self.clients.read().await.get(kernel_id).cloned()
    }

    pub async fn has_client(&self, kernel_id: &str) -> bool {
        self.clients.read().await.contains_key(kernel_id)
    }

    /// Sorted ids of all clients.
    pub async fn client_ids(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut ids: Vec<String> = clients.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Disconnects and unregisters every client.
    pub async fn remove_all_clients(&self) {
        let tasks: Vec<(String, ConnectTask)> = self.tasks().drain().collect();
        for (kernel_id, task) in tasks {
            task.token.cancel();
            debug!(%kernel_id, "background connect cancelled");
        }
        let drained: Vec<(String, Arc<KernelBridge>)> = {
            let mut clients = self.clients.write().await;
            clients.drain().collect()
        };
        for (kernel_id, client) in drained {
            client.disconnect();
            debug!(%kernel_id, "client removed");
        }
    }

    /// Status of a registered kernel.
    pub async fn status(&self, kernel_id: &str) -> Option<KernelStatus> {
        self.kernel(kernel_id).await.map(|m| m.status())
    }

    // ---------------------------
    // Background connects
    // ---------------------------

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, ConnectTask>> {
        self.connecting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connects the client on its own task. No-op while one is already running for the id.
    fn spawn_connect(self: &Arc<Self>, kernel_id: &str) {
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut tasks = self.tasks();
            if tasks.contains_key(kernel_id) {
                debug!(%kernel_id, "background connect already running");
                return;
            }
            tasks.insert(
                kernel_id.to_string(),
                ConnectTask {
                    id,
                    token: token.clone(),
                },
            );
        }

        let me = Arc::clone(self);
        let kernel_id = kernel_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(%kernel_id, "background connect cancelled");
                }
                res = me.connect_client(&kernel_id) => {
                    if let Err(e) = res {
                        warn!(%kernel_id, error = %e, label = e.as_label(), "client connect failed");
                    }
                }
            }
            let mut tasks = me.tasks();
            if tasks.get(&kernel_id).is_some_and(|t| t.id == id) {
                tasks.remove(&kernel_id);
            }
        });
    }

    fn cancel_connect(&self, kernel_id: &str) {
        if let Some(task) = self.tasks().remove(kernel_id) {
            task.token.cancel();
        }
    }

    fn connect_tasks(&self) -> usize {
        self.tasks().len()
    }

    // ---------------------------
    // Event handling
    // ---------------------------

    /// Spawns the bus listener. Returns `None` if one is already running.
    ///
    /// The listener stops when `token` is cancelled or the bus closes, and removes
    /// all clients on the way out.
    pub fn spawn_listener(self: &Arc<Self>, token: CancellationToken) -> Option<JoinHandle<()>> {
        if self.listening.swap(true, Ordering::AcqRel) {
            return None;
        }
        let mut rx = self.bus.subscribe();
        let me = Arc::clone(self);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => me.handle_event(&ev).await,
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "client directory listener lagged");
                            continue;
                        }
                    }
                }
            }

            me.remove_all_clients().await;
            me.listening.store(false, Ordering::Release);
        }))
    }

    /// Applies one kernel action to the clients.
    ///
    /// `Start` returns once the connect is spawned; the other actions complete inline.
    pub async fn handle_event(self: &Arc<Self>, event: &KernelEvent) {
        let kernel_id: &str = &event.kernel_id;
        debug!(seq = event.seq, action = %event.action, %kernel_id, "kernel action");

        match event.action {
            KernelAction::Start => {
                if self.create_client(kernel_id).await.is_none() {
                    warn!(%kernel_id, "start for unregistered kernel");
                    return;
                }
                self.spawn_connect(kernel_id);
            }
            KernelAction::Restart => match self.get_client(kernel_id).await {
                Some(client) => client.reset_for_restart(),
                None => debug!(%kernel_id, "restart without client"),
            },
            KernelAction::Shutdown | KernelAction::Interrupt => {
                self.remove_client(kernel_id).await;
            }
        }
    }
}

impl std::fmt::Debug for ClientDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDirectory")
            .field("listening", &self.listening.load(Ordering::Relaxed))
            .field("connecting", &self.connect_tasks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::CacheKey;
    use crate::core::manager::tests::manager;
    use crate::message::Channel;
    use crate::state::LifecycleState;
    use crate::transport::KernelHandle;

    async fn setup(ids: &[&str]) -> (Arc<ClientDirectory>, Vec<KernelHandle>) {
        let dir = ClientDirectory::new(DirectoryConfig::default());
        let mut handles = Vec::new();
        for id in ids {
            let (mgr, _process, kernel) = manager(id);
            dir.add_kernel(Arc::new(mgr.with_bus(dir.bus().clone()))).await;
            handles.push(kernel);
        }
        (dir, handles)
    }

    #[tokio::test]
    async fn create_client_is_idempotent() {
        let (dir, _kernels) = setup(&["k1"]).await;

        let a = dir.create_client("k1").await.unwrap();
        let b = dir.create_client("k1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, dir.kernel("k1").await.unwrap().bridge()));

        assert!(dir.create_client("missing").await.is_none());
        assert_eq!(dir.client_ids().await, vec!["k1".to_string()]);
    }

    #[tokio::test]
    async fn connect_unknown_client_fails() {
        let (dir, _kernels) = setup(&["k1"]).await;
        assert_eq!(
            dir.connect_client("k1").await,
            Err(ConnectError::UnknownKernel {
                kernel_id: "k1".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_goes_through_the_manager() {
        let (dir, kernels) = setup(&["k1"]).await;
        let mgr = dir.kernel("k1").await.unwrap();
        mgr.set_lifecycle_state(LifecycleState::Started);

        dir.create_client("k1").await.unwrap();
        dir.connect_client("k1").await.unwrap();
        assert_eq!(kernels[0].opens(), 1);

        dir.connect_client("k1").await.unwrap();
        assert_eq!(kernels[0].opens(), 1);

        assert!(dir.disconnect_client("k1").await);
        assert!(dir.has_client("k1").await);
        assert!(!dir.get_client("k1").await.unwrap().is_connected());
        assert!(!dir.disconnect_client("k2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_events_drive_clients() {
        let (dir, kernels) = setup(&["k1", "k2"]).await;
        let token = CancellationToken::new();
        let listener = dir.spawn_listener(token.clone()).unwrap();
        assert!(dir.spawn_listener(token.clone()).is_none());

        let k1 = dir.kernel("k1").await.unwrap();
        k1.start().await.unwrap();
        while !dir.get_client("k1").await.is_some_and(|c| c.is_connected()) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(kernels[0].opens(), 1);
        assert!(!dir.has_client("k2").await);

        let client = dir.get_client("k1").await.unwrap();
        let env = client.session().message(
            "execute_request",
            &serde_json::json!({"code": "1"}),
            None,
            Default::default(),
        );
        client.send(Channel::Shell, &env).await.unwrap();
        assert!(client.cached(CacheKey::MessageId(env.msg_id())).is_some());

        k1.restart().await.unwrap();
        while client.cached(CacheKey::MessageId(env.msg_id())).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dir.has_client("k1").await);

        k1.shutdown().await.unwrap();
        while dir.has_client("k1").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!client.is_connected());

        token.cancel();
        listener.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connect_does_not_hold_up_other_kernels() {
        let (dir, kernels) = setup(&["k1", "k2"]).await;
        let token = CancellationToken::new();
        let listener = dir.spawn_listener(token.clone()).unwrap();

        let k2 = dir.kernel("k2").await.unwrap();
        k2.start().await.unwrap();
        while !dir.get_client("k2").await.is_some_and(|c| c.is_connected()) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        kernels[0].set_responsive(false);
        let k1 = dir.kernel("k1").await.unwrap();
        k1.start().await.unwrap();
        while !dir.get_client("k1").await.is_some_and(|c| c.is_connecting()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        k2.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!dir.has_client("k2").await);
        let slow = dir.get_client("k1").await.unwrap();
        assert!(slow.is_connecting());
        assert_eq!(dir.connect_tasks(), 1);

        k1.interrupt().await.unwrap();
        while dir.has_client("k1").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!slow.is_connecting());
        assert!(!slow.is_ready());
        assert_eq!(dir.connect_tasks(), 0);

        token.cancel();
        listener.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_waits_at_most_ready_wait() {
        let (dir, kernels) = setup(&["k1"]).await;
        kernels[0].set_responsive(false);
        dir.kernel("k1")
            .await
            .unwrap()
            .set_lifecycle_state(LifecycleState::Started);
        let client = dir.create_client("k1").await.unwrap();

        let d = Arc::clone(&dir);
        let first = tokio::spawn(async move { d.connect_client("k1").await });
        while !client.is_connecting() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = dir.connect_client("k1").await.unwrap_err();
        assert_eq!(
            err,
            ConnectError::ReadyTimeout {
                timeout: Duration::from_secs(30)
            }
        );
        assert!(err.is_timeout());
        assert!(client.is_connecting());

        dir.remove_client("k1").await;
        assert_eq!(first.await.unwrap(), Err(ConnectError::Cancelled));
    }

    #[tokio::test]
    async fn interrupt_removes_the_client() {
        let (dir, _kernels) = setup(&["k1"]).await;
        dir.create_client("k1").await.unwrap();

        dir.handle_event(&KernelEvent::new(KernelAction::Interrupt, "k1"))
            .await;
        assert!(!dir.has_client("k1").await);
    }

    #[tokio::test]
    async fn removing_a_kernel_drops_its_client() {
        let (dir, _kernels) = setup(&["k1", "k2"]).await;
        dir.create_client("k1").await.unwrap();
        dir.create_client("k2").await.unwrap();
        assert_eq!(dir.client_ids().await, vec!["k1", "k2"]);

        assert!(dir.remove_kernel("k1").await.is_some());
        assert_eq!(dir.client_ids().await, vec!["k2"]);
        assert!(dir.status("k1").await.is_none());
        assert_eq!(
            dir.status("k2").await.unwrap().lifecycle_state,
            LifecycleState::Unknown
        );

        dir.remove_all_clients().await;
        assert!(dir.client_ids().await.is_empty());
    }
}
