//! # KernelBridge: one kernel, many consumers.
//!
//! The bridge owns everything per-connection: the physical [`ChannelSet`], one monitor
//! task per message channel, the [`CorrelationCache`], the [`SubscriberRegistry`], the
//! [`PendingQueue`] and the execution state.
//!
//! ## Connect sequence
//! ```text
//! connect() ──┬─ attempt in flight? ── yes ──► await the same Shared future
//!             └─ no
//!                 │ execution_state = busy
//!                 ├─ transport.open(info)          → ChannelSet
//!                 ├─ spawn monitor × 4             (iopub, shell, stdin, control)
//!                 ├─ heartbeat.unpause + poll      ≤ heartbeat_attempts
//!                 ├─ verify communication          (skipped if transport opts out)
//!                 ├─ flush pending queue (FIFO) and open the gate
//!                 └─ execution_state = idle        (unless a status already moved it)
//! ```
//!
//! ## Traffic
//! ```text
//! consumer ── handle_incoming ──► cache(inbound) ──► gate closed? ──► PendingQueue
//!                                                         └─ open ──► channel.send
//! kernel ── monitor ──► strip routing ──► iopub status? ──► cache lookup ──► execution state
//!                                    └──────────────────────────────────► SubscriberRegistry
//! ```
//!
//! ## Rules
//! - Only status messages whose parent was sent on `shell` change the execution state;
//!   `control` parents only refresh the control last-seen instant.
//! - Failures of one connect attempt are reported to every caller awaiting it and tear
//!   the channels down; the bridge stays usable for another `connect`.
//! - `disconnect` keeps subscribers and queued messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::pending::{Offer, PendingQueue};
use crate::bridge::{monitor, verify};
use crate::cache::{CacheEntry, CacheKey, CorrelationCache};
use crate::config::BridgeConfig;
use crate::error::{ChannelError, ConnectError, SendError};
use crate::message::{Channel, Envelope, Request, Session};
use crate::state::ExecutionState;
use crate::subscribers::{MessageFilter, SubscriberRef, SubscriberRegistry};
use crate::transport::{wire, ChannelSet, ConnectionInfo, Frames, Transport};

type ConnectFuture = Shared<BoxFuture<'static, Result<(), ConnectError>>>;

struct Attempt {
    id: u64,
    fut: ConnectFuture,
}

/// Channels and monitor tasks of the current (or last) attempt.
#[derive(Default)]
struct Link {
    attempt: u64,
    token: CancellationToken,
    channels: Option<ChannelSet>,
    monitors: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Activity {
    last_activity: Option<DateTime<Utc>>,
    shell_status: Option<Instant>,
    control_status: Option<Instant>,
}

/// Channel bridge to one kernel.
pub struct KernelBridge {
    kernel_id: Arc<str>,
    cfg: BridgeConfig,
    transport: Arc<dyn Transport>,
    session: Session,

    cache: Mutex<CorrelationCache>,
    subscribers: SubscriberRegistry,
    pending: PendingQueue,

    execution: watch::Sender<ExecutionState>,
    ready: watch::Sender<bool>,
    activity: Mutex<Activity>,
    connection_info: Mutex<Option<ConnectionInfo>>,

    link: Mutex<Link>,
    attempt: Mutex<Option<Attempt>>,
    next_attempt: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KernelBridge {
    /// Creates a disconnected bridge.
    pub fn new(
        kernel_id: impl Into<Arc<str>>,
        transport: Arc<dyn Transport>,
        cfg: BridgeConfig,
    ) -> Arc<Self> {
        let (execution, _) = watch::channel(ExecutionState::Unknown);
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            kernel_id: kernel_id.into(),
            cache: Mutex::new(CorrelationCache::new(cfg.cache_capacity_clamped())),
            pending: PendingQueue::new(cfg.pending_capacity_clamped()),
            subscribers: SubscriberRegistry::new(),
            session: Session::default(),
            execution,
            ready,
            activity: Mutex::new(Activity::default()),
            connection_info: Mutex::new(None),
            link: Mutex::new(Link::default()),
            attempt: Mutex::new(None),
            next_attempt: AtomicU64::new(1),
            transport,
            cfg,
        })
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // ---------------------------
    // Connection
    // ---------------------------

    /// Sets the connection info used by the next `connect`.
    pub fn load_connection_info(&self, info: ConnectionInfo) {
        *lock(&self.connection_info) = Some(info);
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        lock(&self.connection_info).clone()
    }

    /// Connects to the kernel.
    ///
    /// Concurrent calls share one attempt and all observe its outcome. Returns
    /// immediately when already ready.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectError> {
        let fut = {
            let mut slot = lock(&self.attempt);
            match slot.as_ref() {
                Some(attempt) => attempt.fut.clone(),
                None => {
                    if self.is_ready() {
                        return Ok(());
                    }
                    let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let token = CancellationToken::new();
                    {
                        let mut link = lock(&self.link);
                        link.attempt = id;
                        link.token = token.clone();
                    }

                    let this = Arc::clone(self);
                    let fut = async move {
                        let out = this.establish(id, token).await;
                        this.finish_attempt(id);
                        out
                    }
                    .boxed()
                    .shared();
                    *slot = Some(Attempt {
                        id,
                        fut: fut.clone(),
                    });
                    fut
                }
            }
        };
        fut.await
    }

    /// Disconnects then connects again.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), ConnectError> {
        info!(kernel_id = %self.kernel_id, "reconnecting to kernel");
        self.disconnect();
        self.connect().await
    }

    /// Stops the monitors, closes the channels and clears the readiness flags.
    ///
    /// Subscribers and queued messages are kept for the next connection. An attempt in
    /// flight fails with [`ConnectError::Cancelled`].
    pub fn disconnect(&self) {
        lock(&self.attempt).take();
        let link = std::mem::take(&mut *lock(&self.link));
        link.token.cancel();
        if let Some(channels) = &link.channels {
            channels.close_all();
        }
        self.pending.close();
        self.ready.send_replace(false);
        info!(
            kernel_id = %self.kernel_id,
            monitors = link.monitors.len(),
            "disconnected from kernel"
        );
    }

    /// Waits until the connection is ready. `false` on timeout.
    pub async fn wait_for_connection_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready.subscribe();
        let ready = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .is_ok_and(|r| r.is_ok());
        ready
    }

    /// True while a connect attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        lock(&self.attempt).is_some()
    }

    /// True once channels are open and communication was verified.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Ready and the heartbeat is still beating.
    pub fn is_connected(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        lock(&self.link)
            .channels
            .as_ref()
            .is_some_and(|c| c.heartbeat.is_beating())
    }

    fn finish_attempt(&self, id: u64) {
        let mut slot = lock(&self.attempt);
        if slot.as_ref().is_some_and(|a| a.id == id) {
            slot.take();
        }
    }

    async fn establish(
        self: &Arc<Self>,
        id: u64,
        token: CancellationToken,
    ) -> Result<(), ConnectError> {
        let started = Instant::now();
        info!(kernel_id = %self.kernel_id, attempt = id, "connecting to kernel");

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ConnectError::Cancelled),
            r = self.open_and_verify(id, &token, started) => r,
        };

        match &result {
            Ok(()) => info!(kernel_id = %self.kernel_id, "connected to kernel"),
            Err(ConnectError::Cancelled) => {
                debug!(kernel_id = %self.kernel_id, attempt = id, "connect cancelled");
            }
            Err(e) => {
                error!(kernel_id = %self.kernel_id, error = %e, label = e.as_label(), "failed to connect to kernel");
                self.teardown(id);
            }
        }
        result
    }

    async fn open_and_verify(
        self: &Arc<Self>,
        id: u64,
        token: &CancellationToken,
        started: Instant,
    ) -> Result<(), ConnectError> {
        self.set_execution_state(ExecutionState::Busy);
        self.touch_activity();

        let info = self.connection_info().ok_or(ConnectError::NoConnectionInfo)?;
        let channels = self.transport.open(&info).await?;
        {
            let mut link = lock(&self.link);
            if link.attempt != id || token.is_cancelled() {
                channels.close_all();
                return Err(ConnectError::Cancelled);
            }
            link.monitors = self.spawn_monitors(&channels, token);
            link.channels = Some(channels.clone());
        }

        channels.heartbeat.unpause();
        self.wait_for_heartbeat(&channels).await?;

        if self.transport.verifies_communication() {
            verify::communication(self, started).await?;
        }

        self.open_gate().await?;
        if self.execution_state() == ExecutionState::Busy {
            self.set_execution_state(ExecutionState::Idle);
            self.touch_activity();
        }
        Ok(())
    }

    fn spawn_monitors(
        self: &Arc<Self>,
        channels: &ChannelSet,
        token: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        Channel::MONITORED
            .into_iter()
            .filter_map(|ch| channels.get(ch).cloned())
            .filter(|c| c.is_alive())
            .map(|c| {
                monitor::spawn(
                    Arc::downgrade(self),
                    Arc::clone(&self.kernel_id),
                    c,
                    token.child_token(),
                    self.cfg.monitor_idle,
                )
            })
            .collect()
    }

    async fn wait_for_heartbeat(&self, channels: &ChannelSet) -> Result<(), ConnectError> {
        let mut attempt = 0u32;
        while !channels.heartbeat.is_beating() {
            attempt += 1;
            if attempt > self.cfg.heartbeat_attempts {
                return Err(ConnectError::HeartbeatTimeout {
                    attempts: self.cfg.heartbeat_attempts,
                });
            }
            tokio::time::sleep(self.cfg.heartbeat_interval).await;
        }
        debug!(kernel_id = %self.kernel_id, attempts = attempt, "heartbeat beating");
        Ok(())
    }

    /// Flushes the pending queue in order, then opens the gate and flips readiness.
    ///
    /// A message leaves the queue only after it was handed to the channel. If the
    /// channels close mid-flush, the rest stays queued for the next connection.
    async fn open_gate(&self) -> Result<(), ChannelError> {
        let mut flushed = 0usize;
        while let Some((channel, env)) = self.pending.front_or_open() {
            match self.transmit(channel, &env).await {
                Ok(()) => flushed += 1,
                Err(e @ ChannelError::Closed { .. }) => {
                    debug!(kernel_id = %self.kernel_id, %channel, queued = self.pending.len(), "channels closed during flush");
                    return Err(e);
                }
                Err(e) => {
                    error!(kernel_id = %self.kernel_id, %channel, error = %e, "failed to flush queued message");
                }
            }
            self.pending.commit(env.msg_id());
        }
        if flushed > 0 {
            info!(kernel_id = %self.kernel_id, count = flushed, "flushed queued messages");
        }
        self.ready.send_replace(true);
        Ok(())
    }

    /// Tears down what a failed attempt opened, unless a newer attempt owns the link.
    fn teardown(&self, id: u64) {
        let link = {
            let mut link = lock(&self.link);
            if link.attempt != id {
                return;
            }
            std::mem::take(&mut *link)
        };
        link.token.cancel();
        if let Some(channels) = &link.channels {
            channels.close_all();
        }
    }

    // ---------------------------
    // Outbound (bridge → kernel)
    // ---------------------------

    /// Builds and sends a request on the channel its operation maps to.
    ///
    /// Returns the message id of the request.
    pub async fn request(
        &self,
        request: Request,
        content: Value,
        metadata: Map<String, Value>,
    ) -> Result<String, SendError> {
        let content = request.content(content);
        let env = self
            .session
            .message(request.msg_type(), &content, None, metadata);
        self.send_as(request.channel(), &env, Some(request.method_name()))
            .await?;
        Ok(env.msg_id().to_string())
    }

    /// Records `envelope` for correlation, then transmits it on `channel`.
    pub async fn send(&self, channel: Channel, envelope: &Envelope) -> Result<(), SendError> {
        self.send_as(channel, envelope, None).await
    }

    async fn send_as(
        &self,
        channel: Channel,
        envelope: &Envelope,
        method: Option<&str>,
    ) -> Result<(), SendError> {
        let mut entry = CacheEntry::outbound(envelope.msg_id(), channel)
            .with_unit_of_work(envelope.unit_of_work_id())
            .with_message_type(envelope.msg_type());
        if let Some(method) = method {
            entry = entry.with_method(method);
        }
        lock(&self.cache).add(entry)?;
        self.transmit(channel, envelope).await?;
        Ok(())
    }

    async fn transmit(&self, channel: Channel, envelope: &Envelope) -> Result<(), ChannelError> {
        let target = lock(&self.link)
            .channels
            .as_ref()
            .and_then(|c| c.get(channel).cloned());
        let Some(target) = target else {
            return Err(ChannelError::Closed {
                channel: channel.to_string(),
            });
        };
        target.send(envelope.to_frames()?).await
    }

    // ---------------------------
    // Inbound (consumer → kernel)
    // ---------------------------

    /// Entry point for deframed consumer messages.
    pub async fn handle_incoming(&self, channel: Channel, frames: Frames) -> Result<(), ChannelError> {
        if frames.is_empty() {
            return Ok(());
        }
        let envelope = Envelope::from_frames(frames)?;
        self.on_receive(channel, envelope).await
    }

    /// Records a consumer message for correlation and forwards it, or queues it while
    /// the connection is not ready.
    pub async fn on_receive(&self, channel: Channel, envelope: Envelope) -> Result<(), ChannelError> {
        self.cache_inbound(channel, &envelope);
        match self.pending.offer(channel, envelope) {
            Offer::Queued { dropped } => {
                if let Some((_, old)) = dropped {
                    warn!(
                        kernel_id = %self.kernel_id,
                        msg_id = old.msg_id(),
                        capacity = self.pending.capacity(),
                        "pending queue full, dropped oldest message"
                    );
                }
                debug!(kernel_id = %self.kernel_id, %channel, "connection not ready, message queued");
                Ok(())
            }
            Offer::Open(channel, envelope) => self.transmit(channel, &envelope).await,
        }
    }

    fn cache_inbound(&self, channel: Channel, envelope: &Envelope) {
        if channel.is_broadcast() || channel == Channel::Heartbeat {
            return;
        }
        let entry = CacheEntry::inbound(envelope.msg_id(), channel)
            .with_unit_of_work(envelope.unit_of_work_id())
            .with_message_type(envelope.msg_type());
        if let Err(e) = lock(&self.cache).add(entry) {
            debug!(kernel_id = %self.kernel_id, %channel, error = %e, "not caching incoming message");
        }
    }

    // ---------------------------
    // Kernel → subscribers
    // ---------------------------

    /// Handles one raw message read from a kernel channel.
    pub(crate) async fn deliver(&self, channel: Channel, frames: Frames) -> Result<usize, ChannelError> {
        let envelope = Envelope::from_frames(wire::strip_routing(frames))?;
        if channel == Channel::IOPub && envelope.is_status() {
            self.observe_status(&envelope);
        }
        Ok(self.subscribers.dispatch(channel, Arc::new(envelope)).await)
    }

    fn observe_status(&self, envelope: &Envelope) {
        let origin = envelope.parent_msg_id().and_then(|parent| {
            lock(&self.cache)
                .get(CacheKey::MessageId(parent))
                .and_then(|e| e.channel)
        });

        match origin {
            Some(Channel::Shell) => {
                {
                    let mut activity = lock(&self.activity);
                    activity.shell_status = Some(Instant::now());
                    activity.last_activity = Some(Utc::now());
                }
                if let Some(state) = envelope.execution_state() {
                    self.set_execution_state(state);
                }
            }
            Some(Channel::Control) => {
                lock(&self.activity).control_status = Some(Instant::now());
            }
            Some(_) => {}
            None => debug!(
                kernel_id = %self.kernel_id,
                state = ?envelope.execution_state(),
                "ignoring status message, parent not in cache"
            ),
        }
    }

    /// Fans a manufactured message out to subscribers.
    pub async fn route_outgoing(&self, channel: Channel, envelope: Envelope) -> usize {
        self.subscribers.dispatch(channel, Arc::new(envelope)).await
    }

    /// Sends a `status` message carrying the current execution state to subscribers.
    pub async fn broadcast_state(&self) -> usize {
        let parent = self.session.header("status");
        let env = self.session.message(
            "status",
            &json!({ "execution_state": self.execution_state() }),
            Some(&parent),
            Map::new(),
        );
        self.route_outgoing(Channel::IOPub, env).await
    }

    pub fn subscribe(&self, sub: SubscriberRef, filter: MessageFilter) -> bool {
        self.subscribers.subscribe(sub, filter)
    }

    pub fn unsubscribe(&self, sub: &SubscriberRef) -> bool {
        self.subscribers.unsubscribe(sub)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // ---------------------------
    // State
    // ---------------------------

    pub fn execution_state(&self) -> ExecutionState {
        *self.execution.borrow()
    }

    /// Receiver observing execution state changes.
    pub fn watch_execution_state(&self) -> watch::Receiver<ExecutionState> {
        self.execution.subscribe()
    }

    pub(crate) fn set_execution_state(&self, state: ExecutionState) {
        self.execution.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(kernel_id = %self.kernel_id, from = %current, to = %state, "execution state");
            *current = state;
            true
        });
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        lock(&self.activity).last_activity
    }

    fn touch_activity(&self) {
        lock(&self.activity).last_activity = Some(Utc::now());
    }

    /// True if a status answering a shell or control request arrived after `since`.
    pub(crate) fn status_seen_since(&self, since: Instant) -> bool {
        let activity = lock(&self.activity);
        activity.shell_status.is_some_and(|t| t > since)
            || activity.control_status.is_some_and(|t| t > since)
    }

    /// Forgets correlation state after a kernel restart.
    ///
    /// The execution state is left to the kernel's own status stream.
    pub fn reset_for_restart(&self) {
        let evicted = {
            let mut cache = lock(&self.cache);
            let n = cache.len();
            cache.clear();
            n
        };
        {
            let mut activity = lock(&self.activity);
            activity.shell_status = None;
            activity.control_status = None;
        }
        info!(kernel_id = %self.kernel_id, evicted, "reset client state for restarted kernel");
    }

    /// Copy of the correlation entry under `key`, without promoting it.
    pub fn cached(&self, key: CacheKey<'_>) -> Option<CacheEntry> {
        lock(&self.cache).peek(key).cloned()
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sends `kernel_info_request` on shell and control without awaiting replies.
    pub(crate) async fn probe(&self) {
        let control = self
            .session
            .message(Request::KernelInfo.msg_type(), &json!({}), None, Map::new());
        let (shell, control) = tokio::join!(
            self.request(Request::KernelInfo, json!({}), Map::new()),
            self.send_as(Channel::Control, &control, Some(Request::KernelInfo.method_name())),
        );
        if let Err(e) = shell {
            debug!(kernel_id = %self.kernel_id, error = %e, "kernel_info on shell failed");
        }
        if let Err(e) = control {
            debug!(kernel_id = %self.kernel_id, error = %e, "kernel_info on control failed");
        }
    }
}

impl Drop for KernelBridge {
    fn drop(&mut self) {
        lock(&self.link).token.cancel();
    }
}

impl std::fmt::Debug for KernelBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelBridge")
            .field("kernel_id", &self.kernel_id)
            .field("execution_state", &self.execution_state())
            .field("ready", &self.is_ready())
            .field("connecting", &self.is_connecting())
            .field("cache_len", &self.cache_len())
            .field("pending_len", &self.pending_len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
