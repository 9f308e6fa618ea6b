//! # Physical channel contracts.
//!
//! A transport opens one [`ChannelSet`] per connection: four message channels and a
//! heartbeat. The bridge only talks to these traits; sockets, framing and signing stay
//! inside the transport.
//!
//! ## Rules
//! - `recv` yields raw frames as received, possibly with routing identities and a
//!   signature in front (see [`wire`](crate::transport::wire)); `Ok(None)` means closed.
//! - `send` takes bare message parts `[header, parent, metadata, content, buffers…]`.
//! - `close` is idempotent.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::message::Channel;

/// Raw multipart message.
pub type Frames = Vec<Vec<u8>>;

/// One bidirectional message channel to the kernel.
#[async_trait]
pub trait KernelChannel: Send + Sync + 'static {
    /// Which channel this is.
    fn channel(&self) -> Channel;

    /// True while the channel can still deliver messages.
    fn is_alive(&self) -> bool;

    /// Waits for the next message. `Ok(None)` once the channel is closed.
    async fn recv(&self) -> Result<Option<Frames>, ChannelError>;

    /// Transmits one message.
    async fn send(&self, parts: Frames) -> Result<(), ChannelError>;

    /// Closes the channel.
    fn close(&self);
}

/// Liveness probe of the kernel.
pub trait Heartbeat: Send + Sync + 'static {
    /// Starts probing. Heartbeats are opened paused.
    fn unpause(&self);

    /// Stops probing.
    fn pause(&self);

    /// True while the kernel answers the probes.
    fn is_beating(&self) -> bool;

    /// Stops probing for good.
    fn close(&self);
}

/// The five channels of one connection.
#[derive(Clone)]
pub struct ChannelSet {
    pub shell: Arc<dyn KernelChannel>,
    pub iopub: Arc<dyn KernelChannel>,
    pub stdin: Arc<dyn KernelChannel>,
    pub control: Arc<dyn KernelChannel>,
    pub heartbeat: Arc<dyn Heartbeat>,
}

impl ChannelSet {
    /// Message channel for `channel`; `None` for the heartbeat.
    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn KernelChannel>> {
        match channel {
            Channel::Shell => Some(&self.shell),
            Channel::IOPub => Some(&self.iopub),
            Channel::Stdin => Some(&self.stdin),
            Channel::Control => Some(&self.control),
            Channel::Heartbeat => None,
        }
    }

    /// Closes every channel, heartbeat included.
    pub fn close_all(&self) {
        self.heartbeat.pause();
        self.heartbeat.close();
        for ch in Channel::MONITORED {
            if let Some(c) = self.get(ch) {
                c.close();
            }
        }
    }
}

impl std::fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSet")
            .field("shell", &self.shell.is_alive())
            .field("iopub", &self.iopub.is_alive())
            .field("stdin", &self.stdin.is_alive())
            .field("control", &self.control.is_alive())
            .field("beating", &self.heartbeat.is_beating())
            .finish()
    }
}
