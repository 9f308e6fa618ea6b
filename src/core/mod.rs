//! Kernel supervision: the layer above the bridges.
//!
//! - [`manager`]: one kernel process and its bridge, driven through the lifecycle state machine;
//! - [`directory`]: process-wide map of kernel id to client, reacting to kernel events;
//! - [`connection`]: adapter attaching one consumer socket to a kernel's client.

mod connection;
mod directory;
mod manager;

pub use connection::{FrameSink, KernelConnection};
pub use directory::ClientDirectory;
pub use manager::{KernelManager, KernelProcess};
