//! Error types for Forcestream
//!
//! This module defines the main error type used throughout the crate and the
//! `Result` alias every fallible operation returns.

use thiserror::Error;

/// Result type alias for Forcestream operations
pub type Result<T> = std::result::Result<T, ForcestreamError>;

/// Errors raised by the client facade and the embedded org
#[derive(Debug, Error)]
pub enum ForcestreamError {
    #[error("No active session: call establish_connection() first")]
    InvalidSession,

    #[error("Streaming channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Push topic not found: {0}")]
    TopicNotFound(String),

    #[error("Channel already exists: {0}")]
    ChannelAlreadyExists(String),

    #[error("Push topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("Record not found")]
    RecordNotFound,

    #[error("Invalid replay id: {0}")]
    InvalidReplayId(i64),

    #[error("Replay id {replay_id} is ahead of channel {channel}")]
    ReplayOutOfRange { channel: String, replay_id: u64 },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid record data: {0}")]
    InvalidRecord(String),

    #[error("Unexpected message on channel {0}")]
    UnexpectedMessage(String),

    #[error("Fixture leak: {0}")]
    FixtureLeak(String),

    #[error("Subscription closed before a message arrived")]
    SubscriptionClosed,

    #[error("Push rejected: {0}")]
    PushRejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
