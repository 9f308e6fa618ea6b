//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for consumers of kernel traffic (front-end
//! sockets, loggers, state listeners). The [`SubscriberRegistry`](crate::SubscriberRegistry)
//! calls every matching subscriber for every message routed out of the bridge.
//!
//! ## Contract
//! - A returned error (or a panic) is logged; it never reaches other subscribers or the dispatcher.
//! - Messages from one channel arrive in receipt order; there is no ordering across channels.
//! - Implementations may call `subscribe`/`unsubscribe` on the registry from inside the callback.
//!
//! ## Example (skeleton)
//! ```rust
//! // use std::sync::Arc;
//! // use kernel_bridge::{Channel, Envelope, Subscribe, SubscriberError};
//! //
//! // struct Audit;
//! // #[async_trait::async_trait]
//! // impl Subscribe for Audit {
//! //     async fn on_message(&self, channel: Channel, env: Arc<Envelope>) -> Result<(), SubscriberError> {
//! //         // write audit record...
//! //         Ok(())
//! //     }
//! //     fn name(&self) -> &str { "audit" }
//! // }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SubscriberError;
use crate::message::{Channel, Envelope};

/// Contract for message subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle one message routed out of the bridge.
    ///
    /// # Parameters
    /// - `channel`: channel the message arrived on
    /// - `envelope`: the message, shared between all subscribers
    async fn on_message(
        &self,
        channel: Channel,
        envelope: Arc<Envelope>,
    ) -> Result<(), SubscriberError>;

    /// Human-readable name (for logs).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a subscriber. Identity (for idempotent registration) is the allocation.
pub type SubscriberRef = Arc<dyn Subscribe>;

/// True when both handles point at the same subscriber instance.
pub(crate) fn same_subscriber(a: &SubscriberRef, b: &SubscriberRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
