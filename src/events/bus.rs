//! # Kernel action bus.
//!
//! Kernel managers announce every successful start, restart, shutdown and interrupt
//! on a [`Bus`]; the [`ClientDirectory`](crate::ClientDirectory) listener turns those
//! announcements into client creation, correlation resets and client removal.
//!
//! ```text
//!   KernelManager k1 ──┐
//!   KernelManager k2 ──┼──► Bus ──► ClientDirectory listener
//!   hosting server   ──┘             Start → connect, Restart → reset,
//!                                    Shutdown / Interrupt → remove
//! ```
//!
//! Publishing never waits on the directory: a manager finishes its operation whether
//! or not anybody is listening. Announcements made while no listener is subscribed are
//! not replayed, so a directory started late must be told about running kernels by
//! calling its client operations directly.
//!
//! The bus holds the last `capacity` announcements
//! ([`DirectoryConfig::bus_capacity`](crate::DirectoryConfig::bus_capacity)). A
//! listener that falls further behind skips the oldest ones and logs how many. A
//! skipped `Shutdown` or `Interrupt` leaves a stale client registered until the next
//! event for that kernel or an explicit `remove_client`; size the capacity for the
//! burst of kernel operations the host can produce.

use tokio::sync::broadcast;

use super::event::KernelEvent;

/// Fan-out of kernel action announcements. Clones share one channel.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<KernelEvent>,
}

impl Bus {
    /// Creates a bus retaining up to `capacity` unread announcements (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<KernelEvent>(capacity);
        Self { tx }
    }

    /// Announces a kernel action. Dropped when no listener is subscribed.
    pub fn publish(&self, ev: KernelEvent) {
        let _ = self.tx.send(ev);
    }

    /// New listener; it sees only announcements made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<KernelEvent> {
        self.tx.subscribe()
    }
}
