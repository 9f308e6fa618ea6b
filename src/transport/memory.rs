//! # In-process loopback transport.
//!
//! [`MemoryTransport`] opens channels backed by unbounded `mpsc` queues; the paired
//! [`KernelHandle`] plays the kernel. It is what the bridge, manager and directory
//! tests connect to, and it is usable as a stand-in kernel in embedding applications.
//!
//! ```text
//! KernelBridge ── send ──► MemoryChannel ──► sent queue ──► KernelHandle::next_sent
//!      ▲                        │
//!      │                        └─ responsive: status(busy) → reply → status(idle)
//!      │                                          │
//!      └──── recv ◄── inbound queue ◄─────────────┴──── KernelHandle::emit / inject
//! ```
//!
//! A responsive kernel answers every shell/control request the way a real kernel
//! does: `busy` on iopub, a `<type>_reply` on the request's channel, `idle` on iopub,
//! all parented to the request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;
use crate::message::{Channel, Envelope, Header, Session};
use crate::state::ExecutionState;
use crate::transport::wire;
use crate::transport::{
    ChannelSet, ConnectionInfo, Frames, Heartbeat, KernelChannel, Transport,
};

type SentQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frames>>>;

#[derive(Default)]
struct Endpoints {
    inbound: HashMap<Channel, mpsc::UnboundedSender<Frames>>,
    sent: HashMap<Channel, SentQueue>,
}

struct Shared {
    session: Session,
    responsive: AtomicBool,
    beating: AtomicBool,
    refuse: AtomicBool,
    opens: AtomicUsize,
    open_delay: Mutex<Duration>,
    current: Mutex<Endpoints>,
}

impl Shared {
    fn inbound(&self, channel: Channel) -> Option<mpsc::UnboundedSender<Frames>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .inbound
            .get(&channel)
            .cloned()
    }

    fn emit(&self, channel: Channel, env: &Envelope) -> bool {
        let Ok(parts) = env.to_frames() else {
            return false;
        };
        match self.inbound(channel) {
            Some(tx) => tx.send(wire::with_routing(Vec::new(), parts)).is_ok(),
            None => false,
        }
    }

    fn status(&self, parent: Option<&Header>, state: ExecutionState) -> bool {
        let env = self.session.message(
            "status",
            &json!({ "execution_state": state }),
            parent,
            Map::new(),
        );
        self.emit(Channel::IOPub, &env)
    }

    fn answer(&self, channel: Channel, request: &Envelope) {
        let reply_type = request
            .msg_type()
            .strip_suffix("_request")
            .map(|base| format!("{base}_reply"))
            .unwrap_or_else(|| format!("{}_reply", request.msg_type()));
        let reply = self.session.message(
            &reply_type,
            &json!({ "status": "ok" }),
            Some(&request.header),
            Map::new(),
        );

        self.status(Some(&request.header), ExecutionState::Busy);
        self.emit(channel, &reply);
        self.status(Some(&request.header), ExecutionState::Idle);
    }
}

/// In-process transport; see the [module docs](self).
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
    verifies: bool,
}

/// Kernel side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct KernelHandle {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// A responsive, beating kernel.
    pub fn new() -> (Self, KernelHandle) {
        let shared = Arc::new(Shared {
            session: Session::new("kernel"),
            responsive: AtomicBool::new(true),
            beating: AtomicBool::new(true),
            refuse: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            open_delay: Mutex::new(Duration::ZERO),
            current: Mutex::new(Endpoints::default()),
        });
        let handle = KernelHandle {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                shared,
                verifies: true,
            },
            handle,
        )
    }

    /// Skip communication verification, like a proxied transport.
    pub fn without_verification(mut self) -> Self {
        self.verifies = false;
        self
    }
}

impl KernelHandle {
    /// Number of times the transport opened a channel set.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Answer requests automatically (default `true`).
    pub fn set_responsive(&self, on: bool) {
        self.shared.responsive.store(on, Ordering::SeqCst);
    }

    /// Answer heartbeat probes (default `true`).
    pub fn set_beating(&self, on: bool) {
        self.shared.beating.store(on, Ordering::SeqCst);
    }

    /// Make `open` fail (default `false`).
    pub fn set_refuse(&self, on: bool) {
        self.shared.refuse.store(on, Ordering::SeqCst);
    }

    /// Delay every `open` by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        *self
            .shared
            .open_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Session the kernel signs its messages with.
    pub fn session(&self) -> &Session {
        &self.shared.session
    }

    /// Pushes raw frames to the bridge. `false` if no connection is open.
    pub fn inject(&self, channel: Channel, frames: Frames) -> bool {
        match self.shared.inbound(channel) {
            Some(tx) => tx.send(frames).is_ok(),
            None => false,
        }
    }

    /// Sends `env` to the bridge with a routing prefix.
    pub fn emit(&self, channel: Channel, env: &Envelope) -> bool {
        self.shared.emit(channel, env)
    }

    /// Emits a `status` message on iopub.
    pub fn status(&self, parent: Option<&Header>, state: ExecutionState) -> bool {
        self.shared.status(parent, state)
    }

    /// Next message the bridge sent on `channel`; `None` once the channel is gone.
    pub async fn next_sent(&self, channel: Channel) -> Option<Envelope> {
        let queue = self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .get(&channel)
            .cloned()?;
        let frames = queue.lock().await.recv().await?;
        Envelope::from_frames(frames).ok()
    }

    /// Every message the bridge sent on `channel` that has not been read yet.
    pub async fn drain_sent(&self, channel: Channel) -> Vec<Envelope> {
        let queue = self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sent
            .get(&channel)
            .cloned();
        let Some(queue) = queue else {
            return Vec::new();
        };
        let mut rx = queue.lock().await;
        let mut out = Vec::new();
        while let Ok(frames) = rx.try_recv() {
            if let Ok(env) = Envelope::from_frames(frames) {
                out.push(env);
            }
        }
        out
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, _info: &ConnectionInfo) -> Result<ChannelSet, ChannelError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self
            .shared
            .open_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Open {
                reason: "connection refused".to_string(),
            });
        }

        let mut endpoints = Endpoints::default();
        let mut make = |channel: Channel| -> Arc<dyn KernelChannel> {
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            endpoints.inbound.insert(channel, in_tx);
            endpoints
                .sent
                .insert(channel, Arc::new(tokio::sync::Mutex::new(sent_rx)));
            Arc::new(MemoryChannel {
                channel,
                rx: tokio::sync::Mutex::new(in_rx),
                sent: sent_tx,
                closed: CancellationToken::new(),
                shared: Arc::clone(&self.shared),
            })
        };

        let set = ChannelSet {
            shell: make(Channel::Shell),
            iopub: make(Channel::IOPub),
            stdin: make(Channel::Stdin),
            control: make(Channel::Control),
            heartbeat: Arc::new(MemoryHeartbeat {
                paused: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                shared: Arc::clone(&self.shared),
            }),
        };
        *self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = endpoints;
        Ok(set)
    }

    fn verifies_communication(&self) -> bool {
        self.verifies
    }
}

struct MemoryChannel {
    channel: Channel,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frames>>,
    sent: mpsc::UnboundedSender<Frames>,
    closed: CancellationToken,
    shared: Arc<Shared>,
}

#[async_trait]
impl KernelChannel for MemoryChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn recv(&self) -> Result<Option<Frames>, ChannelError> {
        if self.closed.is_cancelled() {
            return Ok(None);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            msg = rx.recv() => Ok(msg),
        }
    }

    async fn send(&self, parts: Frames) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Closed {
                channel: self.channel.to_string(),
            });
        }
        let request = Envelope::from_frames(parts.clone())?;
        self.sent.send(parts).map_err(|_| ChannelError::Send {
            channel: self.channel.to_string(),
            reason: "kernel side dropped".to_string(),
        })?;

        let answers = matches!(self.channel, Channel::Shell | Channel::Control);
        if answers && self.shared.responsive.load(Ordering::SeqCst) {
            self.shared.answer(self.channel, &request);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

struct MemoryHeartbeat {
    paused: AtomicBool,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

impl Heartbeat for MemoryHeartbeat {
    fn unpause(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn is_beating(&self) -> bool {
        !self.paused.load(Ordering::SeqCst)
            && !self.closed.load(Ordering::SeqCst)
            && self.shared.beating.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responsive_kernel_answers_requests() {
        let (transport, kernel) = MemoryTransport::new();
        let set = transport.open(&ConnectionInfo::default()).await.unwrap();
        assert_eq!(kernel.opens(), 1);

        let client = Session::default();
        let req = client.message("kernel_info_request", &json!({}), None, Map::new());
        set.shell.send(req.to_frames().unwrap()).await.unwrap();

        let sent = kernel.next_sent(Channel::Shell).await.unwrap();
        assert_eq!(sent.msg_id(), req.msg_id());

        let busy = Envelope::from_frames(wire::strip_routing(
            set.iopub.recv().await.unwrap().unwrap(),
        ))
        .unwrap();
        assert_eq!(busy.execution_state(), Some(ExecutionState::Busy));
        assert_eq!(busy.parent_msg_id(), Some(req.msg_id()));

        let reply = Envelope::from_frames(wire::strip_routing(
            set.shell.recv().await.unwrap().unwrap(),
        ))
        .unwrap();
        assert_eq!(reply.msg_type(), "kernel_info_reply");
    }

    #[tokio::test]
    async fn closed_channels_stop_receiving() {
        let (transport, _kernel) = MemoryTransport::new();
        let set = transport.open(&ConnectionInfo::default()).await.unwrap();

        set.heartbeat.unpause();
        assert!(set.heartbeat.is_beating());

        set.close_all();
        assert!(!set.heartbeat.is_beating());
        assert!(!set.shell.is_alive());
        assert_eq!(set.shell.recv().await, Ok(None));
        assert!(set.shell.send(Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn refused_open_is_an_error() {
        let (transport, kernel) = MemoryTransport::new();
        kernel.set_refuse(true);
        let err = transport.open(&ConnectionInfo::default()).await.unwrap_err();
        assert_eq!(err.as_label(), "channel_open");
    }
}
