//! # Front-end adapter for one consumer socket.
//!
//! [`KernelConnection`] attaches a consumer (typically a websocket) to the client that
//! serves a kernel. Messages routed out of the bridge are written to a [`FrameSink`];
//! frames the consumer sends are forwarded to the bridge.
//!
//! ```text
//! connect()
//!   ├─ directory.create_client(kernel_id)
//!   ├─ client.subscribe(SinkWriter)        bridge ──► sink
//!   ├─ client.broadcast_state()            consumer learns the current state
//!   └─ spawn ─► directory.connect_client   cancelled by disconnect()
//!
//! handle_incoming(ch, frames) ──► client.handle_incoming   (dropped when there is no client)
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::directory::ClientDirectory;
use crate::error::{ChannelError, ConnectError, SinkError, SubscriberError};
use crate::message::{Channel, Envelope};
use crate::subscribers::{MessageFilter, Subscribe, SubscriberRef};
use crate::transport::Frames;

/// Destination for messages routed to one consumer.
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    /// Writes one serialized message. Return [`SinkError::Closed`] once the consumer is gone.
    async fn write(&self, channel: Channel, frames: Frames) -> Result<(), SinkError>;
}

struct SinkWriter {
    kernel_id: Arc<str>,
    sink: Arc<dyn FrameSink>,
}

#[async_trait]
impl Subscribe for SinkWriter {
    async fn on_message(
        &self,
        channel: Channel,
        envelope: Arc<Envelope>,
    ) -> Result<(), SubscriberError> {
        if envelope.msg_id().is_empty() && envelope.msg_type().is_empty() {
            return Ok(());
        }
        let frames = envelope
            .to_frames()
            .map_err(|e| SubscriberError::new(self.name(), e.to_string()))?;

        match self.sink.write(channel, frames).await {
            Ok(()) => Ok(()),
            Err(SinkError::Closed) => {
                warn!(kernel_id = %self.kernel_id, %channel, "sink closed, message dropped");
                Ok(())
            }
            Err(e) => Err(SubscriberError::new(self.name(), e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "SinkWriter"
    }
}

/// One consumer attached to one kernel.
pub struct KernelConnection {
    kernel_id: Arc<str>,
    directory: Arc<ClientDirectory>,
    writer: SubscriberRef,
    background: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl KernelConnection {
    pub fn new(
        directory: Arc<ClientDirectory>,
        kernel_id: impl Into<Arc<str>>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let kernel_id: Arc<str> = kernel_id.into();
        let writer: SubscriberRef = Arc::new(SinkWriter {
            kernel_id: Arc::clone(&kernel_id),
            sink,
        });
        Self {
            kernel_id,
            directory,
            writer,
            background: Mutex::new(None),
        }
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    /// Attaches the sink to the kernel's client and starts connecting it in the background.
    ///
    /// Fails with [`ConnectError::UnknownKernel`] when the kernel is not registered.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let client = self
            .directory
            .create_client(&self.kernel_id)
            .await
            .ok_or_else(|| ConnectError::UnknownKernel {
                kernel_id: self.kernel_id.to_string(),
            })?;

        client.subscribe(Arc::clone(&self.writer), MessageFilter::All);
        client.broadcast_state().await;

        let token = CancellationToken::new();
        let directory = Arc::clone(&self.directory);
        let kernel_id = Arc::clone(&self.kernel_id);
        let child = token.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {
                    debug!(%kernel_id, "background connect cancelled");
                }
                res = directory.connect_client(&kernel_id) => {
                    if let Err(e) = res {
                        warn!(%kernel_id, error = %e, label = e.as_label(), "background connect failed");
                    }
                }
            }
        });

        let previous = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((token, join));
        if let Some((prev, _)) = previous {
            prev.cancel();
        }
        Ok(())
    }

    /// Forwards consumer frames to the kernel's client.
    ///
    /// Once [`connect`](Self::connect) created the client, frames sent before it is ready
    /// wait in its pending queue. Without a client (never connected, or removed after a
    /// shutdown or interrupt) the frames are dropped; they never resurrect a client.
    pub async fn handle_incoming(&self, channel: Channel, frames: Frames) -> Result<(), ChannelError> {
        match self.directory.get_client(&self.kernel_id).await {
            Some(client) => client.handle_incoming(channel, frames).await,
            None => {
                debug!(kernel_id = %self.kernel_id, %channel, "no client, dropping consumer message");
                Ok(())
            }
        }
    }

    /// Stops the background connect and detaches the sink. The client stays connected.
    pub async fn disconnect(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((token, _join)) = background {
            token.cancel();
        }
        if let Some(client) = self.directory.get_client(&self.kernel_id).await {
            client.unsubscribe(&self.writer);
        }
    }
}

impl Drop for KernelConnection {
    fn drop(&mut self) {
        if let Some((token, _)) = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::DirectoryConfig;
    use crate::core::manager::tests::manager;
    use crate::state::{ExecutionState, LifecycleState};
    use crate::transport::KernelHandle;

    struct ChannelSink {
        tx: mpsc::UnboundedSender<(Channel, Envelope)>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn write(&self, channel: Channel, frames: Frames) -> Result<(), SinkError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SinkError::Closed);
            }
            let env = Envelope::from_frames(frames).map_err(|e| SinkError::Write(e.to_string()))?;
            let _ = self.tx.send((channel, env));
            Ok(())
        }
    }

    fn sink() -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<(Channel, Envelope)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ChannelSink {
            tx,
            closed: AtomicBool::new(false),
        });
        (sink, rx)
    }

    async fn setup() -> (Arc<ClientDirectory>, KernelHandle) {
        let dir = ClientDirectory::new(DirectoryConfig::default());
        let (mgr, _process, kernel) = manager("k1");
        mgr.set_lifecycle_state(LifecycleState::Started);
        dir.add_kernel(Arc::new(mgr)).await;
        (dir, kernel)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_attaches_and_broadcasts_state() {
        let (dir, kernel) = setup().await;
        let (sink, mut rx) = sink();
        let conn = KernelConnection::new(Arc::clone(&dir), "k1", sink);

        conn.connect().await.unwrap();
        let (ch, env) = rx.recv().await.unwrap();
        assert_eq!(ch, Channel::IOPub);
        assert_eq!(env.msg_type(), "status");
        assert_eq!(env.execution_state(), Some(ExecutionState::Unknown));

        let client = dir.get_client("k1").await.unwrap();
        assert!(client.wait_for_connection_ready(Duration::from_secs(30)).await);
        assert_eq!(kernel.opens(), 1);
        assert_eq!(client.subscriber_count(), 1);

        let stream = kernel.session().message(
            "stream",
            &json!({"name": "stdout", "text": "hi"}),
            None,
            Default::default(),
        );
        kernel.emit(Channel::IOPub, &stream);
        loop {
            let (_, env) = rx.recv().await.unwrap();
            if env.msg_id() == stream.msg_id() {
                break;
            }
        }

        conn.disconnect().await;
        assert_eq!(client.subscriber_count(), 0);
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn early_frames_wait_for_the_connection() {
        let (dir, kernel) = setup().await;
        kernel.set_open_delay(Duration::from_secs(1));
        let (sink, _rx) = sink();
        let conn = KernelConnection::new(Arc::clone(&dir), "k1", sink);

        let req = kernel
            .session()
            .message("execute_request", &json!({"code": "1"}), None, Default::default());
        conn.connect().await.unwrap();
        let client = dir.get_client("k1").await.unwrap();
        conn.handle_incoming(Channel::Shell, req.to_frames().unwrap())
            .await
            .unwrap();
        assert!(!client.is_ready());
        assert_eq!(client.pending_len(), 1);

        assert!(client.wait_for_connection_ready(Duration::from_secs(30)).await);
        assert_eq!(client.pending_len(), 0);

        loop {
            let sent = kernel.next_sent(Channel::Shell).await.unwrap();
            if sent.msg_id() == req.msg_id() {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn frames_without_a_client_are_dropped() {
        let (dir, _kernel) = setup().await;
        let (sink, _rx) = sink();
        let conn = KernelConnection::new(Arc::clone(&dir), "k1", sink);
        let frames = || {
            crate::message::Session::default()
                .message("execute_request", &json!({"code": "1"}), None, Default::default())
                .to_frames()
                .unwrap()
        };

        conn.handle_incoming(Channel::Shell, frames()).await.unwrap();
        assert!(!dir.has_client("k1").await);

        conn.connect().await.unwrap();
        let client = dir.get_client("k1").await.unwrap();
        assert!(client.wait_for_connection_ready(Duration::from_secs(30)).await);

        dir.handle_event(&crate::events::KernelEvent::new(
            crate::events::KernelAction::Interrupt,
            "k1",
        ))
        .await;
        assert!(!dir.has_client("k1").await);

        conn.handle_incoming(Channel::Shell, frames()).await.unwrap();
        assert!(!dir.has_client("k1").await);
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn closed_sink_is_not_an_error() {
        let (sink, mut rx) = sink();
        sink.closed.store(true, Ordering::SeqCst);
        let writer = SinkWriter {
            kernel_id: "k1".into(),
            sink,
        };
        let env = Arc::new(crate::message::Session::default().message(
            "status",
            &json!({"execution_state": "idle"}),
            None,
            Default::default(),
        ));

        assert!(writer.on_message(Channel::IOPub, env).await.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_kernel_is_rejected() {
        let dir = ClientDirectory::new(DirectoryConfig::default());
        let (sink, _rx) = sink();
        let conn = KernelConnection::new(dir, "nope", sink);
        assert_eq!(
            conn.connect().await,
            Err(ConnectError::UnknownKernel {
                kernel_id: "nope".into()
            })
        );
    }
}
