//! The channel bridge and its internals.
//!
//! - [`KernelBridge`]: connection lifecycle, correlation, routing.
//! - [`PendingQueue`]: pre-readiness buffer and readiness gate.
//! - `monitor`: one receive loop per channel.
//! - `verify`: proof that the kernel processes requests.

mod client;
mod monitor;
mod pending;
mod verify;

pub use client::KernelBridge;
pub use pending::{Offer, PendingQueue};
