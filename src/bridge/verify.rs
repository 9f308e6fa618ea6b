//! # Communication verification.
//!
//! A beating heartbeat only proves the process is alive. Before a connection is marked
//! ready, the kernel must show it processes requests:
//!
//! ```text
//! sleep(settle) → probe(shell + control)
//! loop every check_interval:
//!     execution_state == idle                       → ok
//!     shell/control status seen after attempt start → ok
//!     elapsed ≥ timeout                             → CommunicationTimeout
//!     since last probe ≥ retry_interval             → probe again
//! ```
//!
//! Probes are `kernel_info_request`s sent without waiting for the reply.

use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::bridge::KernelBridge;
use crate::error::ConnectError;
use crate::state::ExecutionState;

pub(crate) async fn communication(
    bridge: &KernelBridge,
    attempt_started: Instant,
) -> Result<(), ConnectError> {
    let cfg = bridge.config();
    let kernel_id = bridge.kernel_id();
    let begin = Instant::now();
    info!(%kernel_id, "verifying kernel communication");

    tokio::time::sleep(cfg.verify_settle).await;
    bridge.probe().await;
    let mut last_probe = Instant::now();

    loop {
        if bridge.execution_state() == ExecutionState::Idle {
            info!(%kernel_id, "kernel communication verified: execution state is idle");
            return Ok(());
        }
        if bridge.status_seen_since(attempt_started) {
            info!(%kernel_id, "kernel communication verified: status message received");
            return Ok(());
        }
        if begin.elapsed() >= cfg.verify_timeout {
            error!(%kernel_id, timeout = ?cfg.verify_timeout, "kernel communication not verified");
            return Err(ConnectError::CommunicationTimeout {
                timeout: cfg.verify_timeout,
            });
        }
        if last_probe.elapsed() >= cfg.verify_retry_interval {
            debug!(%kernel_id, elapsed = ?begin.elapsed(), "re-sending kernel_info probes");
            bridge.probe().await;
            last_probe = Instant::now();
        }
        tokio::time::sleep(cfg.verify_check_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::bridge::KernelBridge;
    use crate::config::BridgeConfig;
    use crate::message::Channel;
    use crate::state::ExecutionState;
    use crate::transport::{ConnectionInfo, MemoryTransport};

    #[tokio::test(start_paused = true)]
    async fn control_status_verifies_a_busy_kernel() {
        let (transport, kernel) = MemoryTransport::new();
        kernel.set_responsive(false);
        let bridge = KernelBridge::new("k-1", Arc::new(transport), BridgeConfig::default());
        bridge.load_connection_info(ConnectionInfo::default());

        let started = tokio::time::Instant::now();
        let b = Arc::clone(&bridge);
        let connect = tokio::spawn(async move { b.connect().await });
        tokio::time::sleep(Duration::from_millis(600)).await;

        let kernel_info = kernel.next_sent(Channel::Control).await.unwrap();
        assert_eq!(kernel_info.msg_type(), "kernel_info_request");
        assert!(kernel.status(Some(&kernel_info.header), ExecutionState::Busy));

        assert_eq!(connect.await.unwrap(), Ok(()));
        assert!(bridge.is_ready());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
