//! Shared fixtures and utilities for the streaming integration tests
//!
//! Provides the scenario lifecycle the suite relies on: tracing init, an
//! environment gate for skipping streaming tests wholesale, guaranteed
//! cleanup scopes that survive assertion panics, and fixture guards for
//! channels, topics and accounts.

#![allow(dead_code)]

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

use forcestream::{Connection, ForcestreamError};
use futures::FutureExt;
use serde_json::{json, Value};

/// Warning emitted when expected deliveries do not arrive in time. The
/// scenario exits early instead of failing: under load, delivery is best
/// effort and a missed event is an environment limitation, not a regression.
pub const TIMEOUT_WARNING: &str = "Warning: timed out waiting for streamed events. \
    This can happen under high load and does not fail the test, but the run is \
    less reliable; re-run if uncertain.";

static TRACING: Once = Once::new();

/// Install a tracing subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Environment gate: streaming scenarios are skipped (not failed) where no
/// server-side runtime is available.
pub fn streaming_tests_enabled() -> bool {
    init_tracing();
    if std::env::var_os("FORCESTREAM_SKIP_STREAMING").is_some() {
        eprintln!("FORCESTREAM_SKIP_STREAMING set, skipping streaming scenario");
        return false;
    }
    true
}

/// Run `body`, then `cleanup`, even when `body` panics on a failed assertion.
/// The panic is resumed after cleanup so the test still fails.
pub async fn with_cleanup<T, B, C>(body: B, cleanup: C) -> T
where
    B: Future<Output = T>,
    C: Future<Output = ()>,
{
    let result = AssertUnwindSafe(body).catch_unwind().await;
    cleanup.await;
    match result {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// A provisioned custom streaming channel, deleted on teardown
pub struct ChannelFixture {
    conn: Connection,
    pub name: String,
}

impl ChannelFixture {
    pub async fn create(conn: &Connection, name: &str) -> ChannelFixture {
        conn.sobject("StreamingChannel")
            .create(json!({ "Name": name }))
            .await
            .expect("failed to provision streaming channel");
        ChannelFixture {
            conn: conn.clone(),
            name: name.to_string(),
        }
    }

    /// Delete the backing StreamingChannel record. Best effort: a missing
    /// record is logged, not escalated, since teardown runs on every path.
    pub async fn teardown(self) {
        let found = self
            .conn
            .sobject("StreamingChannel")
            .find_one(json!({ "Name": self.name }))
            .await;
        match found {
            Ok(Some(record)) => {
                if let Err(err) = record.delete().await {
                    eprintln!("channel fixture cleanup failed: {err}");
                }
            }
            Ok(None) => eprintln!("channel fixture {} already gone", self.name),
            Err(err) => eprintln!("channel fixture lookup failed: {err}"),
        }
    }
}

/// A provisioned PushTopic, deleted on teardown
pub struct TopicFixture {
    conn: Connection,
    pub name: String,
}

impl TopicFixture {
    pub async fn create(conn: &Connection, name: &str, query: &str) -> TopicFixture {
        conn.sobject("PushTopic")
            .create(json!({
                "Name": name,
                "Query": query,
                "ApiVersion": "54.0",
                "NotifyForFields": "Referenced",
                "NotifyForOperationCreate": true,
                "NotifyForOperationUpdate": true,
                "NotifyForOperationDelete": false,
                "NotifyForOperationUndelete": false,
            }))
            .await
            .expect("failed to provision push topic");
        TopicFixture {
            conn: conn.clone(),
            name: name.to_string(),
        }
    }

    pub async fn teardown(self) {
        let found = self
            .conn
            .sobject("PushTopic")
            .find_one(json!({ "Name": self.name }))
            .await;
        match found {
            Ok(Some(record)) => {
                if let Err(err) = record.delete().await {
                    eprintln!("topic fixture cleanup failed: {err}");
                }
            }
            Ok(None) => eprintln!("topic fixture {} already gone", self.name),
            Err(err) => eprintln!("topic fixture lookup failed: {err}"),
        }
    }
}

/// Bulk delete accounts created by a scenario. Finding none is a hard error:
/// it means the scenario leaked or lost its test data.
pub async fn delete_accounts_by_names(
    conn: &Connection,
    names: &[String],
) -> forcestream::Result<()> {
    let accounts = conn
        .sobject("Account")
        .find(json!({ "Name": { "$in": names } }), &["Id"])
        .await?;
    if accounts.is_empty() {
        return Err(ForcestreamError::FixtureLeak(
            "no accounts found to delete".to_string(),
        ));
    }
    let ids: Vec<String> = accounts
        .iter()
        .filter_map(|record| record.get("Id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    conn.sobject("Account").destroy(&ids).await?;
    Ok(())
}
