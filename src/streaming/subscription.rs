//! Subscription handles and callback-to-future bridging
//!
//! A [`Subscription`] owns the task draining a channel's backlog and live
//! feed into the registered handler. Handles must be cancelled when a
//! scenario is done with them; a leaked handle keeps a durable registration
//! alive on the org, so dropping an uncancelled handle cancels it as a
//! backstop and logs a warning.
//!
//! [`message_future`] and [`message_collector`] bridge the callback world to
//! awaitable values: a single-fire future completed exactly once by the
//! handler, and an accumulating collector for scenarios expecting several
//! correlated messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ForcestreamError, Result};
use crate::service::channel::{ChannelLog, StoredEvent};
use crate::streaming::replay::ReplayId;

pub(crate) type EventHandler = Box<dyn Fn(StoredEvent) + Send + Sync>;

/// An active durable subscription
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<ChannelLog>,
    cancelled: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    ready: watch::Receiver<bool>,
}

impl Subscription {
    /// Register against `channel` at `cursor` and start delivering to
    /// `handler`: retained backlog first, then the live feed.
    pub(crate) fn spawn(
        channel: Arc<ChannelLog>,
        cursor: ReplayId,
        handler: EventHandler,
    ) -> Result<Self> {
        let (backlog, mut receiver) = channel.subscribe(cursor)?;
        let (ready_tx, ready_rx) = watch::channel(false);
        let channel_name = channel.name().to_string();

        let task = tokio::spawn(async move {
            for event in backlog {
                handler(event);
            }
            let _ = ready_tx.send(true);
            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            channel = %channel_name,
                            skipped,
                            "subscription lagged behind live delivery"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            channel,
            cancelled: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(Some(task)),
            ready: ready_rx,
        })
    }

    /// Wait until the retained backlog has been handed to the handler and the
    /// subscription is consuming live events. This is the explicit readiness
    /// acknowledgment the remote transport never offered; prefer it over
    /// fixed settle delays.
    pub async fn ready(&self) {
        let mut ready = self.ready.clone();
        while !*ready.borrow() {
            if ready.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop delivery and release the durable registration. Idempotent:
    /// calling it again (or calling [`unsubscribe`](Self::unsubscribe) after
    /// it) is a no-op.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.channel.release_subscriber();
        debug!(channel = self.channel.name(), "subscription cancelled");
    }

    /// Alias for [`cancel`](Self::cancel), matching the remote client's
    /// two-name surface
    pub fn unsubscribe(&self) {
        self.cancel();
    }

    /// Channel this subscription is registered on
    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Has this handle been cancelled?
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.is_cancelled() {
            warn!(
                channel = self.channel.name(),
                "subscription dropped without cancel(); releasing registration"
            );
            self.cancel();
        }
    }
}

/// Single-fire future completed by a subscription handler
pub struct MessageFuture<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> MessageFuture<T> {
    /// Wait for the first message. Fails with `SubscriptionClosed` if the
    /// handler was dropped before any message arrived.
    pub async fn recv(self) -> Result<T> {
        self.receiver
            .await
            .map_err(|_| ForcestreamError::SubscriptionClosed)
    }
}

/// Create a handler/future pair: the handler resolves the future with the
/// first message it sees and ignores the rest.
pub fn message_future<T: Send + 'static>() -> (impl Fn(T) + Send + Sync + 'static, MessageFuture<T>)
{
    let (sender, receiver) = oneshot::channel();
    let slot = Mutex::new(Some(sender));
    let handler = move |message: T| {
        if let Some(sender) = slot.lock().take() {
            let _ = sender.send(message);
        }
    };
    (handler, MessageFuture { receiver })
}

struct CollectorShared<T> {
    messages: Mutex<Vec<T>>,
    arrived: Notify,
}

/// Accumulates every message a handler sees, awaitable by predicate
pub struct MessageCollector<T> {
    shared: Arc<CollectorShared<T>>,
}

impl<T: Clone> MessageCollector<T> {
    /// Snapshot of everything collected so far
    pub fn snapshot(&self) -> Vec<T> {
        self.shared.messages.lock().clone()
    }

    /// Number of messages collected so far
    pub fn len(&self) -> usize {
        self.shared.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the collected messages satisfy `predicate`, then return
    /// them. Combine with a timeout for soft-failure scenarios.
    pub async fn wait_until<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&[T]) -> bool,
    {
        loop {
            let notified = self.shared.arrived.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking, so a message landing
            // between the check and the await is not lost.
            notified.as_mut().enable();
            {
                let messages = self.shared.messages.lock();
                if predicate(&messages) {
                    return messages.clone();
                }
            }
            notified.await;
        }
    }
}

/// Create a handler/collector pair for multi-message scenarios
pub fn message_collector<T: Clone + Send + 'static>(
) -> (impl Fn(T) + Send + Sync + 'static, MessageCollector<T>) {
    let shared = Arc::new(CollectorShared {
        messages: Mutex::new(Vec::new()),
        arrived: Notify::new(),
    });
    let handler_shared = Arc::clone(&shared);
    let handler = move |message: T| {
        handler_shared.messages.lock().push(message);
        handler_shared.arrived.notify_waiters();
    };
    (handler, MessageCollector { shared })
}
