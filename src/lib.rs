#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Forcestream
//!
//! A Salesforce-style streaming client facade with an embedded in-memory org,
//! built so the streaming subsystem's observable semantics can be exercised
//! hermetically: PushTopic notifications, generic streaming channels with
//! replay cursors, and change data capture.
//!
//! ## What it models
//!
//! - **Replay cursors**: `-2` (all retained events), `-1` (new events only),
//!   or a specific replay id captured from a prior delivery.
//! - **Fan-out accounting**: pushing returns `-1` when an active durable
//!   subscription exists, `0` when nobody would receive the event live.
//! - **PushTopics**: query-backed topics notifying on matching record
//!   mutations, with per-operation notify flags.
//! - **Change data capture**: standing `/data/<Entity>ChangeEvent` channels;
//!   near-simultaneous mutations may coalesce into a single event covering
//!   several record ids.
//!
//! ## What it deliberately does not model
//!
//! There is no Bayeux/CometD transport, no long polling, and no cross-process
//! durability. The embedded org reproduces the remote service's *semantics*
//! for tests, not its wire protocol.
//!
//! ## Quick start
//!
//! ```no_run
//! use forcestream::{
//!     message_future, ConnectionConfig, ConnectionManager, EmbeddedOrg, OrgConfig,
//!     PushEnvelope, ReplayId,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> forcestream::Result<()> {
//!     let org = EmbeddedOrg::new(OrgConfig::default());
//!     let manager = ConnectionManager::new(org, ConnectionConfig::default());
//!     let conn = manager.create_connection();
//!     manager.establish_connection(&conn).await?;
//!
//!     conn.sobject("StreamingChannel")
//!         .create(json!({"Name": "/u/Demo"}))
//!         .await?;
//!
//!     let (handler, arrived) = message_future();
//!     let subscription = conn
//!         .streaming()
//!         .channel("/u/Demo")
//!         .subscribe(handler, ReplayId::NewOnly)
//!         .await?;
//!     subscription.ready().await;
//!
//!     conn.streaming()
//!         .channel("/u/Demo")
//!         .push(PushEnvelope::broadcast("hello"))
//!         .await?;
//!
//!     let message = arrived.recv().await?;
//!     assert_eq!(message.payload_str(), Some("hello"));
//!     subscription.cancel();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: connection manager and session handling
//! - [`sobject`]: record CRUD consumed by fixtures and triggers
//! - [`streaming`]: channel/topic facade, subscriptions, message envelopes
//! - [`service`]: the embedded org (channel logs, PushTopics, CDC)
//! - [`testing`]: test org bundle and soft-timeout helpers
//! - [`config`]: org and connection configuration
//! - [`error`]: error types and `Result` alias

pub mod config;
pub mod connection;
pub mod error;
pub mod service;
pub mod sobject;
pub mod streaming;
pub mod testing;

pub use config::{ConnectionConfig, OrgConfig};
pub use connection::{Connection, ConnectionManager};
pub use error::{ForcestreamError, Result};
pub use service::EmbeddedOrg;
pub use sobject::{RecordRef, SObjectCollection, SaveResult};
pub use streaming::{
    message_collector, message_future, ChangeEventHeader, ChangeType, EventDescriptor, EventType,
    GenericStreamingMessage, MessageCollector, MessageFuture, PushEnvelope, PushResult, ReplayId,
    StreamingApi, StreamingChannel, StreamingMessage, StreamingTopic, Subscription,
};
