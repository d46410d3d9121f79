//! Testing utilities for Forcestream integration tests
//!
//! Provides an in-process org + connection bundle with fast timing defaults,
//! and the soft-timeout helper scenarios use to tolerate best-effort remote
//! delivery: on timeout a scenario emits a visible warning and exits early
//! instead of failing the suite.
//!
//! # Example
//!
//! ```ignore
//! let test = TestOrg::new().await?;
//! let channel = test.unique_channel_name();
//! test.conn.sobject("StreamingChannel").create(json!({"Name": channel})).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, OrgConfig};
use crate::connection::{Connection, ConnectionManager};
use crate::error::Result;
use crate::service::EmbeddedOrg;

/// Settle delay used by test connections, long enough to exercise the
/// subscribe-then-wait idiom without slowing the suite down
pub const TEST_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Soft timeout for waiting on expected deliveries in scenarios
pub const TEST_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process org with an established connection, for integration tests
pub struct TestOrg {
    /// The embedded org backing this test
    pub org: EmbeddedOrg,
    /// An established connection, shareable within the scenario
    pub conn: Connection,
}

impl TestOrg {
    /// Org and connection with fast test timings and default retention
    pub async fn new() -> Result<Self> {
        Self::with_org_config(OrgConfig::default()).await
    }

    /// Org with a custom configuration, e.g. to disable CDC coalescing
    pub async fn with_org_config(config: OrgConfig) -> Result<Self> {
        let org = EmbeddedOrg::new(config);
        let manager = ConnectionManager::new(
            org.clone(),
            ConnectionConfig {
                settle_delay: TEST_SETTLE_DELAY,
                ..ConnectionConfig::default()
            },
        );
        let conn = manager.create_connection();
        manager.establish_connection(&conn).await?;
        info!("test org ready");
        Ok(Self { org, conn })
    }

    /// Unique custom channel name for this scenario
    pub fn unique_channel_name(&self) -> String {
        format!("/u/TestChannel{}", Uuid::new_v4().simple())
    }

    /// Unique PushTopic name for this scenario
    pub fn unique_topic_name(&self) -> String {
        format!("Topic{}", Uuid::new_v4().simple())
    }

    /// Unique Account name for this scenario
    pub fn unique_account_name(&self, prefix: &str) -> String {
        format!("{prefix} #{}", Uuid::new_v4())
    }

    /// Wait out the configured settle delay. This mirrors the original
    /// subscribe-then-delay-then-trigger idiom; prefer
    /// [`Subscription::ready`](crate::streaming::Subscription::ready) in
    /// scenarios that are not specifically exercising the delay.
    pub async fn settle(&self) {
        tokio::time::sleep(self.conn.config().settle_delay).await;
    }
}

/// Outcome of a soft-timeout wait
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// All expected deliveries arrived in time
    Completed(T),
    /// The timeout elapsed; the scenario should exit early, not fail
    TimedOut,
}

impl<T> WaitOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, WaitOutcome::Completed(_))
    }
}

/// Await `future` for at most `timeout`; on expiry log `warning` visibly and
/// return [`WaitOutcome::TimedOut`].
///
/// Remote event delivery is best effort under load, so scenarios treat a
/// missed delivery as an environment limitation rather than a suite failure.
pub async fn await_or_warn<F>(future: F, timeout: Duration, warning: &str) -> WaitOutcome<F::Output>
where
    F: Future,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(value) => WaitOutcome::Completed(value),
        Err(_) => {
            warn!("{warning}");
            WaitOutcome::TimedOut
        }
    }
}
