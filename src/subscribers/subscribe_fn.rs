//! # Function-backed subscriber (`SubscribeFn`)
//!
//! [`SubscribeFn`] wraps a closure `F: Fn(Channel, Arc<Envelope>) -> Fut`, producing a
//! fresh future per message. Shared state belongs in an explicit `Arc<...>` captured by
//! the closure.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use kernel_bridge::{Channel, Envelope, SubscribeFn, SubscriberRef, SubscriberError};
//!
//! let s: SubscriberRef = SubscribeFn::arc("printer", |channel: Channel, env: Arc<Envelope>| async move {
//!     println!("{channel}: {}", env.msg_type());
//!     Ok::<_, SubscriberError>(())
//! });
//!
//! assert_eq!(s.name(), "printer");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SubscriberError;
use crate::message::{Channel, Envelope};
use crate::subscribers::Subscribe;

/// Function-backed subscriber implementation.
#[derive(Debug)]
pub struct SubscribeFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> SubscribeFn<F>
where
    F: Fn(Channel, Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SubscriberError>> + Send + 'static,
{
    /// Creates a new function-backed subscriber.
    ///
    /// Prefer [`SubscribeFn::arc`] when you immediately need a [`SubscriberRef`](crate::SubscriberRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the subscriber and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Subscribe for SubscribeFn<F>
where
    F: Fn(Channel, Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SubscriberError>> + Send + 'static,
{
    async fn on_message(
        &self,
        channel: Channel,
        envelope: Arc<Envelope>,
    ) -> Result<(), SubscriberError> {
        (self.f)(channel, envelope).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
