//! Correlation cache entry.

use serde::{Deserialize, Serialize};

use crate::message::Channel;

/// Which side produced the cached message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the bridge itself (an operation funnelled through `request`).
    Outbound,
    /// Received from a consumer and forwarded to the kernel.
    Inbound,
}

/// Where a request came from, keyed by its message id.
///
/// `channel` is optional only so that malformed entries can be represented and
/// rejected by [`CorrelationCache::put`](crate::CorrelationCache::put).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub message_id: String,
    pub channel: Option<Channel>,
    pub unit_of_work_id: Option<String>,
    pub message_type: Option<String>,
    pub direction: Direction,
    /// Operation name; outbound entries only.
    pub method_name: Option<String>,
}

impl CacheEntry {
    /// Entry for a message the bridge sent.
    pub fn outbound(message_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            message_id: message_id.into(),
            channel: Some(channel),
            unit_of_work_id: None,
            message_type: None,
            direction: Direction::Outbound,
            method_name: None,
        }
    }

    /// Entry for a message received from a consumer.
    pub fn inbound(message_id: impl Into<String>, channel: Channel) -> Self {
        Self {
            direction: Direction::Inbound,
            ..Self::outbound(message_id, channel)
        }
    }

    #[must_use]
    pub fn with_unit_of_work(mut self, id: Option<impl Into<String>>) -> Self {
        self.unit_of_work_id = id.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_message_type(mut self, msg_type: impl Into<String>) -> Self {
        self.message_type = Some(msg_type.into());
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method_name = Some(method.into());
        self
    }
}
