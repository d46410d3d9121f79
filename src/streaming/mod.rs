//! Streaming API facade
//!
//! Mirrors the surface the remote client exposes: `channel(name)` and
//! `topic(name)` accessors returning subscribable handles. Channel
//! subscriptions take a replay cursor; topic subscriptions always start from
//! new events, as the remote topic API offers no cursor. Both return a
//! cancellable [`Subscription`].
//!
//! # Example
//!
//! ```ignore
//! let (handler, arrived) = message_future();
//! let subscription = conn
//!     .streaming()
//!     .channel("/u/Events")
//!     .subscribe(handler, ReplayId::NewOnly)
//!     .await?;
//! subscription.ready().await;
//! conn.streaming()
//!     .channel("/u/Events")
//!     .push(PushEnvelope::broadcast("payload"))
//!     .await?;
//! let message = arrived.recv().await?;
//! subscription.cancel();
//! ```

pub mod message;
pub mod replay;
pub mod subscription;

pub use message::{
    ChangeEventHeader, ChangeType, EventDescriptor, EventType, GenericStreamingMessage,
    PushEnvelope, PushResult, StreamingMessage,
};
pub use replay::ReplayId;
pub use subscription::{
    message_collector, message_future, MessageCollector, MessageFuture, Subscription,
};

use tracing::debug;

use crate::connection::Connection;
use crate::error::Result;

/// Entry point to streaming subscriptions, obtained from
/// [`Connection::streaming`]
pub struct StreamingApi {
    conn: Connection,
}

impl StreamingApi {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Handle to a generic or change data capture channel
    pub fn channel(&self, name: impl Into<String>) -> StreamingChannel {
        StreamingChannel {
            conn: self.conn.clone(),
            name: name.into(),
        }
    }

    /// Handle to a PushTopic subscription
    pub fn topic(&self, name: impl Into<String>) -> StreamingTopic {
        StreamingTopic {
            conn: self.conn.clone(),
            name: name.into(),
        }
    }
}

/// Subscribable handle to a named streaming channel
pub struct StreamingChannel {
    conn: Connection,
    name: String,
}

impl StreamingChannel {
    /// Register `handler` at the given replay cursor
    pub async fn subscribe<H>(&self, handler: H, replay: ReplayId) -> Result<Subscription>
    where
        H: Fn(GenericStreamingMessage) + Send + Sync + 'static,
    {
        self.conn.require_session()?;
        let log = self.conn.org().channel(&self.name)?;
        debug!(channel = %self.name, cursor = replay.as_raw(), "subscribing to channel");
        Subscription::spawn(
            log,
            replay,
            Box::new(move |event| handler(event.into_generic())),
        )
    }

    /// Publish an event to this custom channel
    pub async fn push(&self, envelope: PushEnvelope) -> Result<PushResult> {
        self.conn.require_session()?;
        self.conn.org().push(&self.name, envelope)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Subscribable handle to a PushTopic
pub struct StreamingTopic {
    conn: Connection,
    name: String,
}

impl StreamingTopic {
    /// Register `handler` for new notifications on this topic
    pub async fn subscribe<H>(&self, handler: H) -> Result<Subscription>
    where
        H: Fn(StreamingMessage) + Send + Sync + 'static,
    {
        self.conn.require_session()?;
        let log = self.conn.org().topic_channel(&self.name)?;
        debug!(topic = %self.name, "subscribing to push topic");
        Subscription::spawn(
            log,
            ReplayId::NewOnly,
            Box::new(move |event| handler(event.into_topic_message())),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
