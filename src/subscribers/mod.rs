//! # Message subscribers.
//!
//! Consumers of kernel traffic implement [`Subscribe`] (or wrap a closure in
//! [`SubscribeFn`]) and register with a bridge together with a [`MessageFilter`].
//!
//! ## Architecture
//! ```text
//! monitor loop ── Envelope ──► KernelBridge::handle_incoming
//!                                   │
//!                                   ▼
//!                          SubscriberRegistry::dispatch
//!                                   │ filter.matches(msg_type, channel)
//!                      ┌────────────┼────────────┐
//!                      ▼            ▼            ▼
//!                 front-end     LogWriter     custom ...
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod filter;
mod registry;
mod subscribe;
mod subscribe_fn;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use filter::{MessageFilter, MessageKinds};
pub use registry::SubscriberRegistry;
pub(crate) use subscribe::same_subscriber;
pub use subscribe::{Subscribe, SubscriberRef};
pub use subscribe_fn::SubscribeFn;
