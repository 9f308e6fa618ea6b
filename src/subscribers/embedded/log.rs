//! # LogWriter: simple message tracer
//!
//! A minimal subscriber that writes every routed message as a `tracing` event.
//! Use it for tests or demos.
//!
//! ## Example output
//! ```text
//! INFO kernel_bridge::subscribers::embedded::log: [status] channel=iopub msg_id="…" state=busy
//! INFO kernel_bridge::subscribers::embedded::log: [execute_reply] channel=shell msg_id="…" parent="…"
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::SubscriberError;
use crate::message::{Channel, Envelope};
use crate::subscribers::Subscribe;

/// Message writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_message(
        &self,
        channel: Channel,
        envelope: Arc<Envelope>,
    ) -> Result<(), SubscriberError> {
        match envelope.execution_state() {
            Some(state) => info!(
                %channel,
                msg_id = envelope.msg_id(),
                parent = envelope.parent_msg_id(),
                %state,
                "[{}]",
                envelope.msg_type()
            ),
            None => info!(
                %channel,
                msg_id = envelope.msg_id(),
                parent = envelope.parent_msg_id(),
                "[{}]",
                envelope.msg_type()
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "LogWriter"
    }
}
