//! # Filtered fan-out of kernel messages to subscribers.
//!
//! [`SubscriberRegistry`] keeps the set of subscribers for one kernel and delivers
//! every routed message to each subscriber whose [`MessageFilter`] admits it.
//!
//! ## Architecture
//! ```text
//! dispatch(channel, env)
//!     │
//!     ├─ snapshot matching subscribers (lock held only here)
//!     │
//!     └─ join_all ─┬─► sub1.on_message() ──► Err   → warn!, continue
//!                  ├─► sub2.on_message() ──► panic → error!, continue
//!                  └─► subN.on_message() ──► Ok
//! ```
//!
//! ## Rules
//! - **Idempotent**: subscribing the same `Arc` twice keeps one record (filter is replaced)
//! - **Re-entrant**: callbacks may subscribe/unsubscribe; changes apply to the next dispatch
//! - **Isolation**: an error or panic in one subscriber never reaches the others or the caller
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state inconsistent
//! if a subscriber panics while holding a lock.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use futures::FutureExt;
use tracing::{error, warn};

use crate::message::{Channel, Envelope};
use crate::subscribers::{same_subscriber, MessageFilter, SubscriberRef};

struct Record {
    sub: SubscriberRef,
    filter: MessageFilter,
}

/// Registry of message subscribers with per-subscriber filters.
#[derive(Default)]
pub struct SubscriberRegistry {
    records: RwLock<Vec<Record>>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber. Returns `false` if it was already present (its filter is updated).
    pub fn subscribe(&self, sub: SubscriberRef, filter: MessageFilter) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(rec) = records.iter_mut().find(|r| same_subscriber(&r.sub, &sub)) {
            rec.filter = filter;
            return false;
        }
        records.push(Record { sub, filter });
        true
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, sub: &SubscriberRef) -> bool {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| !same_subscriber(&r.sub, sub));
        records.len() != before
    }

    pub fn contains(&self, sub: &SubscriberRef) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| same_subscriber(&r.sub, sub))
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every subscriber.
    pub fn clear(&self) {
        self.records.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Delivers `envelope` to every matching subscriber and waits for all of them.
    ///
    /// Returns the number of subscribers the message was delivered to.
    pub async fn dispatch(&self, channel: Channel, envelope: Arc<Envelope>) -> usize {
        let targets: Vec<SubscriberRef> = {
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            records
                .iter()
                .filter(|r| r.filter.matches(envelope.msg_type(), channel))
                .map(|r| Arc::clone(&r.sub))
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }

        let delivered = targets.len();
        let calls = targets.into_iter().map(|sub| {
            let env = Arc::clone(&envelope);
            async move {
                let fut = sub.on_message(channel, env);
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(subscriber = sub.name(), %channel, error = %e, "subscriber failed");
                    }
                    Err(panic_err) => {
                        let info = panic_message(&*panic_err);
                        error!(subscriber = sub.name(), %channel, info = %info, "subscriber panicked");
                    }
                }
            }
        });
        join_all(calls).await;
        delivered
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}

fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::error::SubscriberError;
    use crate::message::Session;
    use crate::subscribers::SubscribeFn;

    fn status_env() -> Arc<Envelope> {
        let s = Session::default();
        Arc::new(s.message(
            "status",
            &json!({"execution_state": "idle"}),
            None,
            Default::default(),
        ))
    }

    fn counter(hits: Arc<AtomicUsize>) -> SubscriberRef {
        SubscribeFn::arc("counter", move |_ch, _env| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SubscriberError>(())
            }
        })
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let reg = SubscriberRegistry::new();
        let sub = counter(Arc::new(AtomicUsize::new(0)));

        assert!(reg.subscribe(Arc::clone(&sub), MessageFilter::All));
        assert!(!reg.subscribe(Arc::clone(&sub), MessageFilter::All));
        assert_eq!(reg.len(), 1);

        assert!(reg.unsubscribe(&sub));
        assert!(!reg.unsubscribe(&sub));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn filters_select_receivers() {
        let reg = SubscriberRegistry::new();
        let inc_hits = Arc::new(AtomicUsize::new(0));
        let exc_hits = Arc::new(AtomicUsize::new(0));

        reg.subscribe(
            counter(Arc::clone(&inc_hits)),
            MessageFilter::include([("status", Channel::IOPub)]),
        );
        reg.subscribe(
            counter(Arc::clone(&exc_hits)),
            MessageFilter::exclude([("status", Channel::IOPub)]),
        );

        assert_eq!(reg.dispatch(Channel::IOPub, status_env()).await, 1);
        assert_eq!(inc_hits.load(Ordering::SeqCst), 1);
        assert_eq!(exc_hits.load(Ordering::SeqCst), 0);

        assert_eq!(reg.dispatch(Channel::Shell, status_env()).await, 1);
        assert_eq!(inc_hits.load(Ordering::SeqCst), 1);
        assert_eq!(exc_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_subscribers_do_not_block_others() {
        let reg = SubscriberRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let failing: SubscriberRef = SubscribeFn::arc("failing", |_ch, _env| async {
            Err::<(), _>(SubscriberError::new("failing", "boom"))
        });
        let panicking: SubscriberRef = SubscribeFn::arc("panicking", |_ch, _env| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, SubscriberError>(())
        });

        reg.subscribe(failing, MessageFilter::All);
        reg.subscribe(panicking, MessageFilter::All);
        reg.subscribe(counter(Arc::clone(&hits)), MessageFilter::All);

        assert_eq!(reg.dispatch(Channel::IOPub, status_env()).await, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callbacks_may_subscribe_reentrantly() {
        let reg = Arc::new(SubscriberRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let late = counter(Arc::clone(&hits));

        let reg_in = Arc::clone(&reg);
        let late_in = Arc::clone(&late);
        let adder: SubscriberRef = SubscribeFn::arc("adder", move |_ch, _env| {
            let reg = Arc::clone(&reg_in);
            let late = Arc::clone(&late_in);
            async move {
                reg.subscribe(late, MessageFilter::All);
                Ok::<_, SubscriberError>(())
            }
        });
        reg.subscribe(adder, MessageFilter::All);

        assert_eq!(reg.dispatch(Channel::IOPub, status_env()).await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(reg.contains(&late));

        assert_eq!(reg.dispatch(Channel::IOPub, status_env()).await, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
