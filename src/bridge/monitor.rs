//! # Channel monitor loop.
//!
//! One task per message channel reads raw frames and hands them to the bridge.
//!
//! ## Rules
//! - Messages of one channel are delivered in receipt order (one at a time).
//! - A message that fails to decode is logged and dropped; the loop continues.
//! - Cancellation, a closed channel or a dropped bridge end the loop silently.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bridge::KernelBridge;
use crate::transport::KernelChannel;

pub(crate) fn spawn(
    bridge: Weak<KernelBridge>,
    kernel_id: Arc<str>,
    channel: Arc<dyn KernelChannel>,
    token: CancellationToken,
    idle: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run(bridge, kernel_id, channel, token, idle))
}

async fn run(
    bridge: Weak<KernelBridge>,
    kernel_id: Arc<str>,
    channel: Arc<dyn KernelChannel>,
    token: CancellationToken,
    idle: Duration,
) {
    let name = channel.channel();
    debug!(%kernel_id, channel = %name, "monitor started");

    while channel.is_alive() {
        let polled = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = channel.recv() => r,
        };

        match polled {
            Ok(Some(frames)) => {
                let Some(bridge) = bridge.upgrade() else {
                    break;
                };
                if let Err(e) = bridge.deliver(name, frames).await {
                    debug!(%kernel_id, channel = %name, error = %e, "dropping message");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%kernel_id, channel = %name, error = %e, "error polling channel");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }
    }

    debug!(%kernel_id, channel = %name, "monitor stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::config::BridgeConfig;
    use crate::message::{Channel, Session};
    use crate::transport::{ConnectionInfo, MemoryTransport, Transport};

    #[tokio::test]
    async fn bad_frames_do_not_stop_the_loop() {
        let (transport, kernel) = MemoryTransport::new();
        let bridge = KernelBridge::new("k", Arc::new(transport.clone()), BridgeConfig::default());
        let set = transport.open(&ConnectionInfo::default()).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bridge.subscribe(
            crate::SubscribeFn::arc("probe", move |_ch, env: Arc<crate::Envelope>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(env.msg_id().to_string());
                    Ok::<_, crate::SubscriberError>(())
                }
            }),
            crate::MessageFilter::All,
        );

        let token = CancellationToken::new();
        let handle = spawn(
            Arc::downgrade(&bridge),
            Arc::from("k"),
            Arc::clone(&set.shell),
            token.clone(),
            Duration::from_millis(1),
        );

        assert!(kernel.inject(Channel::Shell, vec![b"garbage".to_vec()]));
        let good = Session::default().message("execute_reply", &json!({}), None, Map::new());
        assert!(kernel.emit(Channel::Shell, &good));

        assert_eq!(rx.recv().await.unwrap(), good.msg_id());

        token.cancel();
        handle.await.unwrap();
    }
}
