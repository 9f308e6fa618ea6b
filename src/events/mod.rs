//! Kernel action events: types and broadcast bus.
//!
//! ## Contents
//! - [`KernelAction`], [`KernelEvent`] event classification and payload
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: [`KernelManager`](crate::KernelManager) after each management
//!   operation, or the hosting server directly.
//! - **Consumers**: [`ClientDirectory::spawn_listener`](crate::ClientDirectory::spawn_listener).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{KernelAction, KernelEvent};
