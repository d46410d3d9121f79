//! Streaming integration scenarios
//!
//! End-to-end exercises of the streaming surface against an embedded org:
//! PushTopic notifications, generic channel replay cursors (`-2`, `-1`, and a
//! captured replay id), fan-out accounting, and change data capture with
//! coalesced multi-record events. Each scenario provisions its fixtures,
//! subscribes, triggers record mutations, asserts on delivered messages and
//! tears its fixtures down on every path.

mod common;

use std::time::Duration;

use common::*;
use forcestream::testing::{await_or_warn, TestOrg, WaitOutcome, TEST_DELIVERY_TIMEOUT};
use forcestream::{
    message_collector, message_future, ForcestreamError, GenericStreamingMessage, PushEnvelope,
    ReplayId, StreamingMessage,
};
use serde_json::json;
use tokio::time::timeout;
use uuid::Uuid;

/// Short pause to let any unexpected extra deliveries surface before
/// asserting on exact counts
const QUIESCE: Duration = Duration::from_millis(100);

fn unique_payload() -> String {
    Uuid::new_v4().to_string()
}

/// An account created by a scenario, for correlating CDC events
#[derive(Clone)]
struct CreatedAccount {
    id: String,
    name: String,
}

/// Does this change event cover the given account, by name or record id?
fn covers(event: &GenericStreamingMessage, account: &CreatedAccount) -> bool {
    if event.payload_field_str("Name") == Some(account.name.as_str()) {
        return true;
    }
    event
        .change_event_header()
        .is_some_and(|header| header.record_ids.contains(&account.id))
}

/// Every account is covered by at least one event
fn all_covered(events: &[GenericStreamingMessage], accounts: &[CreatedAccount]) -> bool {
    accounts
        .iter()
        .all(|account| events.iter().any(|event| covers(event, account)))
}

/// Multiplicity policy: either one event per record, or one event carrying
/// every affected record id. Anything else is a delivery bug.
fn assert_multiplicity(events: &[GenericStreamingMessage], expected_records: usize) {
    let per_record = events.len() == expected_records
        && events.iter().all(|event| {
            event
                .change_event_header()
                .is_some_and(|header| header.record_ids.len() == 1)
        });
    let coalesced = events.len() == 1
        && events[0]
            .change_event_header()
            .is_some_and(|header| header.record_ids.len() == expected_records);
    assert!(
        per_record || coalesced,
        "unexpected delivery shape: {} events for {} records",
        events.len(),
        expected_records
    );
}

#[tokio::test]
async fn push_topic_notifies_once_on_matching_account_create() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();

    let account_name = test.unique_account_name("My New Account");
    let topic_name = test.unique_topic_name();
    let query = format!("SELECT Id, Name FROM Account WHERE Name='{account_name}'");
    let topic = TopicFixture::create(&conn, &topic_name, &query).await;

    let (handler, arrived) = message_collector::<StreamingMessage>();
    let subscription = conn
        .streaming()
        .topic(&topic_name)
        .subscribe(handler)
        .await
        .unwrap();
    subscription.ready().await;

    conn.sobject("Account")
        .create(json!({ "Name": account_name }))
        .await
        .unwrap();

    let account_name_for_cleanup = account_name.clone();
    let cleanup_conn = conn.clone();
    with_cleanup(
        async {
            let events = timeout(
                TEST_DELIVERY_TIMEOUT,
                arrived.wait_until(|events| !events.is_empty()),
            )
            .await
            .expect("timed out waiting for push topic notification");

            // Exactly one notification for the one matching create.
            tokio::time::sleep(QUIESCE).await;
            assert_eq!(arrived.len(), 1);

            let msg = &events[0];
            assert_eq!(msg.sobject_str("Name"), Some(account_name.as_str()));
            assert_eq!(
                msg.event.event_type,
                Some(forcestream::EventType::Created)
            );
            assert!(msg
                .sobject_str("Id")
                .is_some_and(|id| !id.is_empty()));
            assert!(msg.event.replay_id > 0);
        },
        async {
            match cleanup_conn
                .sobject("Account")
                .find_one(json!({ "Name": account_name_for_cleanup }))
                .await
            {
                Ok(Some(record)) => record.delete().await.unwrap(),
                Ok(None) => panic!("account fixture vanished before cleanup"),
                Err(err) => panic!("account cleanup lookup failed: {err}"),
            }
        },
    )
    .await;

    subscription.cancel();
    topic.teardown().await;
}

#[tokio::test]
async fn captured_replay_id_delivers_only_later_events() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();
    let channel_name = test.unique_channel_name();
    let fixture = ChannelFixture::create(&conn, &channel_name).await;

    with_cleanup(
        async {
            let channel = conn.streaming().channel(&channel_name);

            // Two events before anyone subscribes.
            let p1 = unique_payload();
            let p2 = unique_payload();
            channel.push(PushEnvelope::broadcast(&p1)).await.unwrap();
            channel.push(PushEnvelope::broadcast(&p2)).await.unwrap();

            // Subscribe with -2, then publish a fresh event and capture the
            // replay id it is delivered with.
            let (handler, arrived) = message_collector::<GenericStreamingMessage>();
            let subscription = channel
                .subscribe(handler, ReplayId::AllRetained)
                .await
                .unwrap();
            test.settle().await;

            let p3 = unique_payload();
            channel.push(PushEnvelope::broadcast(&p3)).await.unwrap();
            let events = timeout(
                TEST_DELIVERY_TIMEOUT,
                arrived.wait_until(|events| {
                    events
                        .iter()
                        .any(|event| event.payload_str() == Some(p3.as_str()))
                }),
            )
            .await
            .expect("timed out waiting for freshly pushed event");
            let captured = events
                .iter()
                .find(|event| event.payload_str() == Some(p3.as_str()))
                .map(|event| event.event.replay_id)
                .unwrap();
            assert!(captured > 0);
            subscription.cancel();

            // Resubscribe at the captured id: the prior events must not
            // reappear, only what is published afterwards.
            let (handler, resumed) = message_collector::<GenericStreamingMessage>();
            let subscription = channel
                .subscribe(handler, ReplayId::After(captured))
                .await
                .unwrap();
            subscription.ready().await;
            assert!(resumed.is_empty(), "no backlog exists after the captured id");

            test.settle().await;
            let p4 = unique_payload();
            channel.push(PushEnvelope::broadcast(&p4)).await.unwrap();

            let events = timeout(
                TEST_DELIVERY_TIMEOUT,
                resumed.wait_until(|events| !events.is_empty()),
            )
            .await
            .expect("timed out waiting for post-resubscribe event");
            tokio::time::sleep(QUIESCE).await;

            let snapshot = resumed.snapshot();
            assert_eq!(snapshot.len(), 1);
            assert_eq!(events[0].payload_str(), Some(p4.as_str()));
            assert!(events[0].event.replay_id > captured);
            subscription.cancel();
        },
        async {
            fixture.teardown().await;
        },
    )
    .await;
}

#[tokio::test]
async fn new_only_cursor_delivers_live_push_with_durable_fanout() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();
    let channel_name = test.unique_channel_name();
    let fixture = ChannelFixture::create(&conn, &channel_name).await;

    with_cleanup(
        async {
            let channel = conn.streaming().channel(&channel_name);

            let (handler, arrived) = message_future::<GenericStreamingMessage>();
            let subscription = channel.subscribe(handler, ReplayId::NewOnly).await.unwrap();
            test.settle().await;

            let payload = unique_payload();
            let result = channel
                .push(PushEnvelope::broadcast(&payload))
                .await
                .unwrap();
            assert_eq!(result.fanout_count, -1);
            // Presence map is always present, even with no targeted users.
            assert!(result.user_online_status.is_empty());

            let msg = timeout(TEST_DELIVERY_TIMEOUT, arrived.recv())
                .await
                .expect("timed out waiting for pushed event")
                .unwrap();
            assert_eq!(msg.payload_str(), Some(payload.as_str()));
            subscription.cancel();
        },
        async {
            fixture.teardown().await;
        },
    )
    .await;
}

#[tokio::test]
async fn new_only_cursor_excludes_events_published_before_subscribing() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();
    let channel_name = test.unique_channel_name();
    let fixture = ChannelFixture::create(&conn, &channel_name).await;

    with_cleanup(
        async {
            let channel = conn.streaming().channel(&channel_name);

            let before = unique_payload();
            let result = channel.push(PushEnvelope::broadcast(&before)).await.unwrap();
            // No subscriber yet; a standing durable subscription elsewhere
            // could legitimately make this -1, so accept both.
            assert!(result.fanout_count == 0 || result.fanout_count == -1);

            let (handler, arrived) = message_collector::<GenericStreamingMessage>();
            let subscription = channel.subscribe(handler, ReplayId::NewOnly).await.unwrap();
            test.settle().await;

            let after = unique_payload();
            let result = channel.push(PushEnvelope::broadcast(&after)).await.unwrap();
            assert_eq!(result.fanout_count, -1);

            let events = timeout(
                TEST_DELIVERY_TIMEOUT,
                arrived.wait_until(|events| !events.is_empty()),
            )
            .await
            .expect("timed out waiting for post-subscribe event");
            tokio::time::sleep(QUIESCE).await;

            // Only the event published after subscribing is delivered.
            let snapshot = arrived.snapshot();
            assert_eq!(snapshot.len(), 1);
            assert_eq!(events[0].payload_str(), Some(after.as_str()));
            assert!(events[0].event.replay_id > 0);
            subscription.cancel();
        },
        async {
            fixture.teardown().await;
        },
    )
    .await;
}

#[tokio::test]
async fn cdc_new_only_covers_every_created_account() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();

    let names: Vec<String> = (0..2)
        .map(|_| test.unique_account_name("CDC Test Account"))
        .collect();

    let (handler, arrived) = message_collector::<GenericStreamingMessage>();
    let subscription = conn
        .streaming()
        .channel("/data/AccountChangeEvent")
        .subscribe(handler, ReplayId::NewOnly)
        .await
        .unwrap();
    subscription.ready().await;

    let mut accounts = Vec::new();
    for name in &names {
        let save = conn
            .sobject("Account")
            .create(json!({ "Name": name }))
            .await
            .unwrap();
        assert!(save.success);
        accounts.push(CreatedAccount {
            id: save.id,
            name: name.clone(),
        });
    }

    let cleanup_conn = conn.clone();
    let cleanup_names = names.clone();
    with_cleanup(
        async {
            let outcome = await_or_warn(
                arrived.wait_until(|events| all_covered(events, &accounts)),
                TEST_DELIVERY_TIMEOUT,
                TIMEOUT_WARNING,
            )
            .await;
            let events = match outcome {
                WaitOutcome::Completed(events) => events,
                WaitOutcome::TimedOut => return,
            };

            // Every received event must correlate to this scenario; an
            // uncorrelated message is a hard failure.
            for event in &events {
                assert!(
                    event.change_event_header().is_some()
                        && accounts.iter().any(|account| covers(event, account)),
                    "received unexpected CDC event: {:?}",
                    event.payload
                );
            }
            assert_multiplicity(&events, accounts.len());
        },
        async {
            subscription.cancel();
            delete_accounts_by_names(&cleanup_conn, &cleanup_names)
                .await
                .unwrap();
        },
    )
    .await;
}

#[tokio::test]
async fn cdc_captured_replay_id_delivers_only_new_accounts() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();
    let cdc = conn.streaming().channel("/data/AccountChangeEvent");

    // Round one: subscribe with -1 and capture the last replay id seen.
    let first_names: Vec<String> = (0..2)
        .map(|_| test.unique_account_name("CDC Test Account"))
        .collect();
    let (handler, first_round) = message_collector::<GenericStreamingMessage>();
    let subscription = cdc.subscribe(handler, ReplayId::NewOnly).await.unwrap();
    subscription.ready().await;

    let mut first_accounts = Vec::new();
    for name in &first_names {
        let save = conn
            .sobject("Account")
            .create(json!({ "Name": name }))
            .await
            .unwrap();
        first_accounts.push(CreatedAccount {
            id: save.id,
            name: name.clone(),
        });
    }
    let outcome = await_or_warn(
        first_round.wait_until(|events| all_covered(events, &first_accounts)),
        TEST_DELIVERY_TIMEOUT,
        TIMEOUT_WARNING,
    )
    .await;
    subscription.cancel();
    let first_events = match outcome {
        WaitOutcome::Completed(events) => events,
        WaitOutcome::TimedOut => {
            delete_accounts_by_names(&conn, &first_names).await.unwrap();
            return;
        }
    };
    let last_replay_id = first_events
        .iter()
        .map(|event| event.event.replay_id)
        .max()
        .unwrap();

    // Round two: resume from the captured id; only newer accounts may arrive.
    let second_names: Vec<String> = (0..2)
        .map(|_| test.unique_account_name("CDC Test Account"))
        .collect();
    let (handler, second_round) = message_collector::<GenericStreamingMessage>();
    let subscription = cdc
        .subscribe(handler, ReplayId::After(last_replay_id))
        .await
        .unwrap();
    subscription.ready().await;
    assert!(second_round.is_empty(), "nothing is retained past the captured id");

    let mut second_accounts = Vec::new();
    for name in &second_names {
        let save = conn
            .sobject("Account")
            .create(json!({ "Name": name }))
            .await
            .unwrap();
        second_accounts.push(CreatedAccount {
            id: save.id,
            name: name.clone(),
        });
    }

    let cleanup_conn = conn.clone();
    let all_names: Vec<String> = first_names.iter().chain(&second_names).cloned().collect();
    with_cleanup(
        async {
            let outcome = await_or_warn(
                second_round.wait_until(|events| all_covered(events, &second_accounts)),
                TEST_DELIVERY_TIMEOUT,
                TIMEOUT_WARNING,
            )
            .await;
            let events = match outcome {
                WaitOutcome::Completed(events) => events,
                WaitOutcome::TimedOut => return,
            };

            // The first batch happened at or before the captured id and must
            // not reappear.
            for event in &events {
                assert!(
                    !first_accounts.iter().any(|account| covers(event, account)),
                    "event from before the captured replay id was redelivered"
                );
                assert!(event.event.replay_id > last_replay_id);
            }
            assert_multiplicity(&events, second_accounts.len());
        },
        async {
            subscription.cancel();
            delete_accounts_by_names(&cleanup_conn, &all_names)
                .await
                .unwrap();
        },
    )
    .await;
}

#[tokio::test]
async fn cdc_all_retained_replays_events_from_before_subscribing() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();

    // Create the accounts first; subscribe afterwards with -2 so the events
    // can only come from the retained backlog.
    let names: Vec<String> = (0..2)
        .map(|_| test.unique_account_name("CDC Test Account"))
        .collect();
    let mut accounts = Vec::new();
    for name in &names {
        let save = conn
            .sobject("Account")
            .create(json!({ "Name": name }))
            .await
            .unwrap();
        assert!(save.success);
        accounts.push(CreatedAccount {
            id: save.id,
            name: name.clone(),
        });
    }
    // Let any coalescing window flush before subscribing.
    test.settle().await;

    let (handler, arrived) = message_collector::<GenericStreamingMessage>();
    let subscription = conn
        .streaming()
        .channel("/data/AccountChangeEvent")
        .subscribe(handler, ReplayId::AllRetained)
        .await
        .unwrap();

    let cleanup_conn = conn.clone();
    let cleanup_names = names.clone();
    with_cleanup(
        async {
            let outcome = await_or_warn(
                arrived.wait_until(|events| all_covered(events, &accounts)),
                TEST_DELIVERY_TIMEOUT,
                TIMEOUT_WARNING,
            )
            .await;
            let events = match outcome {
                WaitOutcome::Completed(events) => events,
                WaitOutcome::TimedOut => return,
            };
            for event in &events {
                assert!(
                    accounts.iter().any(|account| covers(event, account)),
                    "received unexpected CDC event: {:?}",
                    event.payload
                );
            }
            assert_multiplicity(&events, accounts.len());
        },
        async {
            subscription.unsubscribe();
            subscription.cancel();
            delete_accounts_by_names(&cleanup_conn, &cleanup_names)
                .await
                .unwrap();
        },
    )
    .await;
}

#[tokio::test]
async fn cancelling_a_subscription_repeatedly_is_harmless() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();
    let channel_name = test.unique_channel_name();
    let fixture = ChannelFixture::create(&conn, &channel_name).await;

    let (handler, _arrived) = message_future::<GenericStreamingMessage>();
    let subscription = conn
        .streaming()
        .channel(&channel_name)
        .subscribe(handler, ReplayId::NewOnly)
        .await
        .unwrap();

    subscription.cancel();
    subscription.cancel();
    subscription.unsubscribe();
    assert!(subscription.is_cancelled());

    fixture.teardown().await;
}

#[tokio::test]
async fn invalid_replay_cursors_are_rejected() {
    if !streaming_tests_enabled() {
        return;
    }
    let test = TestOrg::new().await.unwrap();
    let conn = test.conn.clone();
    let channel_name = test.unique_channel_name();
    let fixture = ChannelFixture::create(&conn, &channel_name).await;

    // Unknown negative sentinels never reach the wire.
    assert!(matches!(
        ReplayId::from_raw(-3),
        Err(ForcestreamError::InvalidReplayId(-3))
    ));

    // A cursor ahead of anything the channel has issued is rejected.
    let (handler, _arrived) = message_future::<GenericStreamingMessage>();
    let err = conn
        .streaming()
        .channel(&channel_name)
        .subscribe(handler, ReplayId::After(10_000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ForcestreamError::ReplayOutOfRange { replay_id: 10_000, .. }
    ));

    fixture.teardown().await;
}
