//! Error types used by the kernel bridge.
//!
//! - [`CacheError`]: a malformed correlation entry was rejected by `put`.
//! - [`ChannelError`]: a physical channel failed to open, send or decode one message.
//! - [`ConnectError`]: a connection attempt failed (timeouts, dead kernel, channel errors).
//! - [`SendError`]: an outbound message was rejected by the cache or the channel.
//! - [`SubscriberError`]: a fan-out callback failed; logged, never propagated.
//! - [`ProcessError`]: the external kernel process supervisor reported a failure.
//! - [`SinkError`]: a front-end sink could not accept a message.
//!
//! Every enum provides `as_label` (stable snake_case) for logs and metrics.
//! "Not found" is never an error here: lookups return `Option` or `bool`.

use std::time::Duration;
use thiserror::Error;

/// # Validation errors raised by [`CorrelationCache::put`](crate::CorrelationCache::put).
///
/// Always surfaced to the caller; the cache is left unchanged.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A required field of the entry is missing or empty.
    #[error("`{field}` missing in cache entry")]
    MissingField {
        /// Name of the missing field (`message_id` or `channel`).
        field: &'static str,
    },

    /// The key passed to `put` does not match the entry's own message id.
    #[error("key `{key}` must match message id `{message_id}` of the entry")]
    KeyMismatch {
        /// Key the caller used.
        key: String,
        /// Message id carried by the entry.
        message_id: String,
    },
}

impl CacheError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use kernel_bridge::CacheError;
    ///
    /// let err = CacheError::MissingField { field: "channel" };
    /// assert_eq!(err.as_label(), "cache_missing_field");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            CacheError::MissingField { .. } => "cache_missing_field",
            CacheError::KeyMismatch { .. } => "cache_key_mismatch",
        }
    }
}

/// # Errors produced by physical channels.
///
/// A single failed message is transient: the monitor loop logs it and moves on.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A frame could not be decoded into an envelope.
    #[error("failed to decode message: {reason}")]
    Decode {
        /// What went wrong.
        reason: String,
    },

    /// The channel is closed (or was never opened).
    #[error("channel `{channel}` is closed")]
    Closed {
        /// Channel name.
        channel: String,
    },

    /// Writing to the channel failed.
    #[error("failed to send on `{channel}`: {reason}")]
    Send {
        /// Channel name.
        channel: String,
        /// Underlying reason.
        reason: String,
    },

    /// The transport could not open its channels.
    #[error("failed to open channels: {reason}")]
    Open {
        /// Underlying reason.
        reason: String,
    },
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::Decode { .. } => "channel_decode",
            ChannelError::Closed { .. } => "channel_closed",
            ChannelError::Send { .. } => "channel_send",
            ChannelError::Open { .. } => "channel_open",
        }
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        ChannelError::Decode {
            reason: reason.into(),
        }
    }
}

/// # Errors produced by a connection attempt.
///
/// Every caller awaiting the same in-flight attempt receives a clone of the same value.
/// None of these are retried by the bridge itself; retrying is the caller's decision.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Heartbeat never reported a beating kernel.
    #[error("kernel heartbeat not beating after {attempts} attempts")]
    HeartbeatTimeout {
        /// Number of polls made.
        attempts: u32,
    },

    /// Neither an idle state nor a fresh status message was observed in time.
    #[error("kernel communication not verified within {timeout:?}")]
    CommunicationTimeout {
        /// The verification timeout that elapsed.
        timeout: Duration,
    },

    /// The kernel manager never reported `started`.
    #[error("kernel did not reach `started` within {timeout:?} (last state: {last_state})")]
    KernelStartTimeout {
        /// The configured wait.
        timeout: Duration,
        /// Last observed lifecycle state.
        last_state: String,
    },

    /// Another caller's connect did not make the client ready in time.
    #[error("client not ready within {timeout:?}")]
    ReadyTimeout {
        /// The configured wait.
        timeout: Duration,
    },

    /// The kernel manager reported `dead` while we were waiting.
    #[error("kernel is dead")]
    KernelDead,

    /// The bridge has no connection info to open channels with.
    #[error("no connection info loaded")]
    NoConnectionInfo,

    /// No kernel (or no client) is registered under the identifier.
    #[error("unknown kernel `{kernel_id}`")]
    UnknownKernel {
        /// The missing identifier.
        kernel_id: String,
    },

    /// The attempt was cancelled by a disconnect.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Opening or using a physical channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ConnectError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use kernel_bridge::ConnectError;
    ///
    /// let err = ConnectError::HeartbeatTimeout { attempts: 10 };
    /// assert_eq!(err.as_label(), "connect_heartbeat_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectError::HeartbeatTimeout { .. } => "connect_heartbeat_timeout",
            ConnectError::CommunicationTimeout { .. } => "connect_communication_timeout",
            ConnectError::KernelStartTimeout { .. } => "connect_kernel_start_timeout",
            ConnectError::ReadyTimeout { .. } => "connect_ready_timeout",
            ConnectError::KernelDead => "connect_kernel_dead",
            ConnectError::NoConnectionInfo => "connect_no_connection_info",
            ConnectError::UnknownKernel { .. } => "connect_unknown_kernel",
            ConnectError::Cancelled => "connect_cancelled",
            ConnectError::Channel(_) => "connect_channel",
        }
    }

    /// Indicates whether the failure was a timeout of one of the bounded waits.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConnectError::HeartbeatTimeout { .. }
                | ConnectError::CommunicationTimeout { .. }
                | ConnectError::KernelStartTimeout { .. }
                | ConnectError::ReadyTimeout { .. }
        )
    }
}

/// # Errors produced by [`KernelBridge::send`](crate::KernelBridge::send).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The message could not be recorded for correlation; nothing was sent.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The physical channel refused the message.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl SendError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SendError::Cache(e) => e.as_label(),
            SendError::Channel(e) => e.as_label(),
        }
    }
}

/// Error returned by a message subscriber callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("subscriber `{subscriber}` failed: {reason}")]
pub struct SubscriberError {
    /// Subscriber name.
    pub subscriber: String,
    /// Failure message.
    pub reason: String,
}

impl SubscriberError {
    /// Creates a new subscriber error.
    pub fn new(subscriber: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            reason: reason.into(),
        }
    }
}

/// # Errors reported by the external kernel process supervisor.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The process could not be launched.
    #[error("failed to start kernel: {0}")]
    Start(String),

    /// The process could not be restarted.
    #[error("failed to restart kernel: {0}")]
    Restart(String),

    /// The process could not be shut down.
    #[error("failed to shut down kernel: {0}")]
    Shutdown(String),

    /// The process could not be interrupted.
    #[error("failed to interrupt kernel: {0}")]
    Interrupt(String),
}

impl ProcessError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::Start(_) => "process_start",
            ProcessError::Restart(_) => "process_restart",
            ProcessError::Shutdown(_) => "process_shutdown",
            ProcessError::Interrupt(_) => "process_interrupt",
        }
    }
}

/// # Errors produced when writing to a front-end sink.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The front-end socket is already closed. Not fatal.
    #[error("sink closed")]
    Closed,

    /// Any other write failure.
    #[error("sink write failed: {0}")]
    Write(String),
}

impl SinkError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SinkError::Closed => "sink_closed",
            SinkError::Write(_) => "sink_write",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_converts_into_connect_error() {
        let err: ConnectError = ChannelError::Open {
            reason: "refused".into(),
        }
        .into();
        assert_eq!(err.as_label(), "connect_channel");
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "failed to open channels: refused");
    }

    #[test]
    fn timeouts_are_classified() {
        assert!(ConnectError::HeartbeatTimeout { attempts: 3 }.is_timeout());
        assert!(ConnectError::CommunicationTimeout {
            timeout: Duration::from_secs(1)
        }
        .is_timeout());
        assert!(!ConnectError::KernelDead.is_timeout());
    }
}
