//! # Physical channel transports.
//!
//! [`Transport`] is the seam between the bridge and the wire: given
//! [`ConnectionInfo`], it opens a [`ChannelSet`]. Socket libraries, framing and
//! message signing live behind it.
//!
//! - [`MemoryTransport`]: in-process loopback with a test-side kernel handle.
//! - [`wire`]: routing prefix helpers shared by transports.

mod channel;
mod info;
mod memory;
pub mod wire;

use async_trait::async_trait;

use crate::error::ChannelError;

pub use channel::{ChannelSet, Frames, Heartbeat, KernelChannel};
pub use info::ConnectionInfo;
pub use memory::{KernelHandle, MemoryTransport};

/// Opens the physical channels of a kernel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens all five channels. The heartbeat starts paused.
    async fn open(&self, info: &ConnectionInfo) -> Result<ChannelSet, ChannelError>;

    /// Whether `connect` must verify communication after the heartbeat.
    ///
    /// Proxied transports that cannot route introspection requests return `false`.
    fn verifies_communication(&self) -> bool {
        true
    }
}
