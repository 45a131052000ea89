// SPDX-FileCopyrightText: 2026 Sonar Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document store scenarios over the in-memory document service.
//!
//! Each test builds its own DataHarness with a fresh in-memory cache.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sonar_core::SonarError;
use sonar_data::{PendingOperation, ReadOptions, RemoteOperationListener, TimeToLive, WriteOptions};
use sonar_storage::{user_table_name, DocumentCache, READONLY_TABLE};
use sonar_test_utils::{DataHarness, RecordingRemoteListener, RemoteCall};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    title: String,
    stars: u32,
}

fn note(title: &str) -> Note {
    Note {
        title: title.to_string(),
        stars: 3,
    }
}

fn listen(harness: &DataHarness) -> Arc<RecordingRemoteListener> {
    let listener = Arc::new(RecordingRemoteListener::new());
    harness
        .store
        .set_remote_operation_listener(Some(listener.clone() as Arc<dyn RemoteOperationListener>));
    listener
}

/// Fetch and cache a token for the readonly partition.
async fn prime_readonly_token(harness: &DataHarness) {
    harness
        .store
        .list::<Note>("readonly", None)
        .await
        .unwrap();
}

async fn wait_no_pending(cache: &DocumentCache, table: &str) {
    for _ in 0..1000 {
        if cache.pending_operations(table).await.unwrap().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pending operations in {table} never drained");
}

fn write_calls(harness: &DataHarness) -> usize {
    harness
        .remote
        .calls()
        .iter()
        .filter(|c| matches!(c, RemoteCall::Write { .. }))
        .count()
}

// ---- Test 1: Offline writes and sync ----

#[tokio::test]
async fn test_offline_create_syncs_once_when_online() {
    let harness = DataHarness::builder().build().await.unwrap();
    let listener = listen(&harness);
    prime_readonly_token(&harness).await;
    let calls_before = harness.remote.call_count();

    harness.network.set_connected(false);
    let created = harness
        .store
        .create("note-1", &note("offline"), "readonly", None)
        .await
        .unwrap();

    assert_eq!(created.pending_operation, Some(PendingOperation::Create));
    assert!(created.from_device_cache);
    assert_eq!(created.document, Some(note("offline")));
    assert_eq!(harness.remote.call_count(), calls_before);

    harness.network.set_connected(true);
    assert!(listener.wait_for_events(1, WAIT).await);
    wait_no_pending(&harness.cache, READONLY_TABLE).await;

    let events = listener.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].operation, PendingOperation::Create);
    assert!(events[0].error.is_none());
    let metadata = events[0].metadata.as_ref().unwrap();
    assert_eq!(metadata.id, "note-1");
    assert!(metadata.etag.is_some());
    assert!(harness.remote.contains("readonly", "note-1"));
    assert_eq!(write_calls(&harness), 1);
    assert!(matches!(
        harness.remote.calls().last(),
        Some(RemoteCall::Write { upsert: false, .. })
    ));

    // Nothing left to sync.
    assert_eq!(harness.store.process_pending_operations().await.unwrap(), 0);
    assert_eq!(write_calls(&harness), 1);
}

#[tokio::test]
async fn test_offline_replace_of_cached_document_is_queued_as_replace() {
    let harness = DataHarness::builder().build().await.unwrap();
    let listener = listen(&harness);
    let online = harness
        .store
        .create("note-1", &note("first"), "readonly", None)
        .await
        .unwrap();
    assert!(!online.from_device_cache);

    harness.network.set_connected(false);
    let queued = harness
        .store
        .replace("note-1", &note("second"), "readonly", None)
        .await
        .unwrap();
    assert_eq!(queued.pending_operation, Some(PendingOperation::Replace));
    assert_eq!(queued.etag, online.etag);

    harness.network.set_connected(true);
    assert!(listener.wait_for_events(1, WAIT).await);
    wait_no_pending(&harness.cache, READONLY_TABLE).await;
    assert_eq!(listener.events()[0].operation, PendingOperation::Replace);

    let read = harness
        .store
        .read::<Note>("note-1", "readonly", None)
        .await
        .unwrap();
    assert_eq!(read.document, Some(note("second")));
}

#[tokio::test]
async fn test_offline_write_without_cached_token_fails() {
    let harness = DataHarness::builder().offline().build().await.unwrap();

    let err = harness
        .store
        .create("note-1", &note("x"), "readonly", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SonarError::NotFound(ref m) if m.contains("readonly")));
    assert_eq!(harness.remote.call_count(), 0);
}

#[tokio::test]
async fn test_conflict_during_sync_purges_local_row() {
    let harness = DataHarness::builder().build().await.unwrap();
    let listener = listen(&harness);
    prime_readonly_token(&harness).await;
    harness.network.set_connected(false);
    harness
        .store
        .create("note-1", &note("mine"), "readonly", None)
        .await
        .unwrap();
    harness.remote.insert("readonly", "note-1", serde_json::json!({"title": "theirs", "stars": 1}));

    harness.network.set_connected(true);
    assert!(listener.wait_for_events(1, WAIT).await);

    let event = &listener.events()[0];
    assert_eq!(event.status, Some(409));
    assert!(event.metadata.is_none());
    for _ in 0..1000 {
        if harness
            .cache
            .read(READONLY_TABLE, "readonly", "note-1", None)
            .await
            .is_err()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(matches!(
        harness.cache.read(READONLY_TABLE, "readonly", "note-1", None).await,
        Err(SonarError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_server_error_during_sync_keeps_row_pending() {
    let harness = DataHarness::builder().build().await.unwrap();
    let listener = listen(&harness);
    prime_readonly_token(&harness).await;
    harness.network.set_connected(false);
    harness
        .store
        .create("note-1", &note("mine"), "readonly", None)
        .await
        .unwrap();
    harness.remote.fail_next(500);

    harness.network.set_connected(true);
    assert!(listener.wait_for_events(1, WAIT).await);
    assert_eq!(listener.events()[0].status, Some(500));

    for _ in 0..1000 {
        if harness.store.outgoing_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let pending = harness.cache.pending_operations(READONLY_TABLE).await.unwrap();
    assert_eq!(pending.len(), 1);

    assert_eq!(harness.store.process_pending_operations().await.unwrap(), 1);
    assert!(listener.wait_for_events(2, WAIT).await);
    wait_no_pending(&harness.cache, READONLY_TABLE).await;
}

// ---- Test 2: Reads and expiry ----

#[tokio::test]
async fn test_online_read_is_cached_for_offline_use() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness.remote.insert("readonly", "config", serde_json::json!({"title": "remote", "stars": 5}));

    let online = harness
        .store
        .read::<Note>("config", "readonly", None)
        .await
        .unwrap();
    assert!(!online.from_device_cache);
    assert_eq!(online.document.as_ref().unwrap().title, "remote");

    harness.network.set_connected(false);
    let offline = harness
        .store
        .read::<Note>("config", "readonly", None)
        .await
        .unwrap();
    assert!(offline.from_device_cache);
    assert_eq!(offline.document, online.document);
    assert_eq!(offline.etag, online.etag);
}

#[tokio::test]
async fn test_expired_offline_read_is_not_found_and_evicted() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness
        .store
        .create(
            "note-1",
            &note("short-lived"),
            "readonly",
            Some(WriteOptions::new(TimeToLive::Seconds(1))),
        )
        .await
        .unwrap();
    harness.network.set_connected(false);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let err = harness
        .store
        .read::<Note>("note-1", "readonly", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SonarError::NotFound(_)));
    assert!(harness
        .store
        .list::<Note>("readonly", None)
        .await
        .unwrap()
        .items
        .is_empty());
}

#[tokio::test]
async fn test_no_cache_read_removes_row() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness
        .store
        .create("note-1", &note("once"), "readonly", None)
        .await
        .unwrap();
    harness.network.set_connected(false);

    let read = harness
        .store
        .read::<Note>("note-1", "readonly", Some(ReadOptions::new(TimeToLive::NoCache)))
        .await
        .unwrap();
    assert_eq!(read.document, Some(note("once")));

    assert!(matches!(
        harness.store.read::<Note>("note-1", "readonly", None).await,
        Err(SonarError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_missing_remote_document_is_http_not_found() {
    let harness = DataHarness::builder().build().await.unwrap();

    let err = harness
        .store
        .read::<Note>("absent", "readonly", None)
        .await
        .unwrap_err();

    assert_eq!(err.http_status(), Some(404));
}

// ---- Test 3: Argument and state checks ----

#[tokio::test]
async fn test_invalid_partition_or_id_is_rejected() {
    let harness = DataHarness::builder().build().await.unwrap();

    for (id, partition) in [("note", "shared"), ("a/b", "readonly"), ("a b", "readonly"), ("", "user")] {
        let err = harness
            .store
            .read::<Note>(id, partition, None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SonarError::InvalidArgument(_)),
            "{id:?} in {partition:?} gave {err}"
        );
    }
    assert!(matches!(
        harness.store.list::<Note>("app", None).await,
        Err(SonarError::InvalidArgument(_))
    ));
    assert_eq!(harness.remote.call_count(), 0);
    assert_eq!(harness.exchange.calls(), 0);
}

#[tokio::test]
async fn test_missing_app_secret_disables_every_operation() {
    let harness = DataHarness::builder().without_app_secret().build().await.unwrap();

    assert!(matches!(
        harness.store.read::<Note>("n", "readonly", None).await,
        Err(SonarError::Disabled(_))
    ));
    assert!(matches!(
        harness.store.list::<Note>("readonly", None).await,
        Err(SonarError::Disabled(_))
    ));
    assert!(matches!(
        harness.store.create("n", &note("x"), "readonly", None).await,
        Err(SonarError::Disabled(_))
    ));
    assert!(matches!(
        harness.store.delete("n", "readonly", None).await,
        Err(SonarError::Disabled(_))
    ));
    assert_eq!(harness.remote.call_count(), 0);
}

#[tokio::test]
async fn test_disabled_store_rejects_calls_until_enabled() {
    let harness = DataHarness::builder().disabled().build().await.unwrap();
    assert!(!harness.store.is_enabled());
    assert!(matches!(
        harness.store.read::<Note>("n", "readonly", None).await,
        Err(SonarError::Disabled(_))
    ));

    harness.store.set_enabled(true).await;
    harness.remote.insert("readonly", "n", serde_json::json!({"title": "t", "stars": 0}));
    assert!(harness.store.read::<Note>("n", "readonly", None).await.is_ok());
}

#[tokio::test]
async fn test_disable_cancels_in_flight_call() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness.remote.insert("readonly", "slow", serde_json::json!({"title": "t", "stars": 0}));
    harness.remote.hold_calls();

    let read = harness.store.read::<Note>("slow", "readonly", None);
    let disable = async {
        assert!(harness.remote.wait_for_calls(1, WAIT).await);
        harness.store.set_enabled(false).await;
    };
    let (result, ()) = tokio::join!(read, disable);
    harness.remote.release_all();

    assert!(matches!(result, Err(SonarError::Cancelled)));
    assert!(matches!(
        harness.store.read::<Note>("slow", "readonly", None).await,
        Err(SonarError::Disabled(_))
    ));
}

// ---- Test 4: Listing ----

#[tokio::test]
async fn test_list_pages_through_remote_partition() {
    let harness = DataHarness::builder().build().await.unwrap();
    for i in 0..5 {
        harness.remote.insert(
            "readonly",
            &format!("note-{i}"),
            serde_json::json!({"title": format!("n{i}"), "stars": i}),
        );
    }
    harness.remote.set_page_size(2);

    let first = harness.store.list::<Note>("readonly", None).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.has_next_page());
    let second = harness.store.next_page(&first).await.unwrap();
    assert_eq!(second.items.len(), 2);
    let third = harness.store.next_page(&second).await.unwrap();
    assert_eq!(third.items.len(), 1);
    assert!(!third.has_next_page());
    assert!(matches!(
        harness.store.next_page(&third).await,
        Err(SonarError::InvalidArgument(_))
    ));

    harness.network.set_connected(false);
    let offline = harness.store.list::<Note>("readonly", None).await.unwrap();
    assert_eq!(offline.items.len(), 5);
    assert!(offline.items.iter().all(|item| item.from_device_cache));
    assert!(!offline.has_next_page());
}

#[tokio::test]
async fn test_next_page_requires_network() {
    let harness = DataHarness::builder().build().await.unwrap();
    for id in ["a", "b"] {
        harness.remote.insert("readonly", id, serde_json::json!({"title": id, "stars": 1}));
    }
    harness.remote.set_page_size(1);
    let first = harness.store.list::<Note>("readonly", None).await.unwrap();

    harness.network.set_connected(false);
    assert!(matches!(
        harness.store.next_page(&first).await,
        Err(SonarError::Network { .. })
    ));
}

#[tokio::test]
async fn test_offline_list_without_token_is_network_error() {
    let harness = DataHarness::builder().offline().build().await.unwrap();

    assert!(matches!(
        harness.store.list::<Note>("readonly", None).await,
        Err(SonarError::Network { .. })
    ));
}

#[tokio::test]
async fn test_pending_write_serves_list_from_cache() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness.remote.insert("readonly", "remote-only", serde_json::json!({"title": "r", "stars": 1}));
    prime_readonly_token(&harness).await;
    harness.network.set_connected(false);
    harness
        .store
        .create("local", &note("queued"), "readonly", None)
        .await
        .unwrap();
    harness.remote.hold_calls();
    harness.network.set_connected(true);
    assert!(harness.remote.wait_for_calls(2, WAIT).await);

    let page = harness.store.list::<Note>("readonly", None).await.unwrap();
    harness.remote.release_all();

    let ids: Vec<_> = page.items.iter().map(|i| i.id.as_str()).collect();
    assert!(ids.contains(&"local"));
    assert!(page.items.iter().all(|i| i.from_device_cache));
}

// ---- Test 5: Deletes ----

#[tokio::test]
async fn test_offline_delete_is_synced_later() {
    let harness = DataHarness::builder().build().await.unwrap();
    let listener = listen(&harness);
    harness
        .store
        .create("note-1", &note("doomed"), "readonly", None)
        .await
        .unwrap();
    harness.network.set_connected(false);

    let deleted = harness.store.delete("note-1", "readonly", None).await.unwrap();
    assert_eq!(deleted.pending_operation, Some(PendingOperation::Delete));
    assert!(matches!(
        harness.store.read::<Note>("note-1", "readonly", None).await,
        Err(SonarError::NotFound(_))
    ));
    assert!(harness.remote.contains("readonly", "note-1"));

    harness.network.set_connected(true);
    assert!(listener.wait_for_events(1, WAIT).await);
    assert_eq!(listener.events()[0].operation, PendingOperation::Delete);
    wait_no_pending(&harness.cache, READONLY_TABLE).await;
    assert!(!harness.remote.contains("readonly", "note-1"));
}

#[tokio::test]
async fn test_offline_delete_of_unsynced_create_drops_it() {
    let harness = DataHarness::builder().build().await.unwrap();
    prime_readonly_token(&harness).await;
    harness.network.set_connected(false);
    harness
        .store
        .create("draft", &note("never sent"), "readonly", None)
        .await
        .unwrap();

    let deleted = harness.store.delete("draft", "readonly", None).await.unwrap();
    assert_eq!(deleted.pending_operation, None);
    assert!(harness.cache.pending_operations(READONLY_TABLE).await.unwrap().is_empty());

    let calls = harness.remote.call_count();
    harness.network.set_connected(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.remote.call_count(), calls);
}

#[tokio::test]
async fn test_online_delete_removes_remote_and_cached_copy() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness
        .store
        .create("note-1", &note("gone"), "readonly", None)
        .await
        .unwrap();

    let deleted = harness.store.delete("note-1", "readonly", None).await.unwrap();

    assert!(!deleted.from_device_cache);
    assert!(!harness.remote.contains("readonly", "note-1"));
    assert!(harness
        .cache
        .read(READONLY_TABLE, "readonly", "note-1", None)
        .await
        .is_err());
}

// ---- Test 6: Accounts ----

#[tokio::test]
async fn test_user_partition_requires_signed_in_account() {
    let harness = DataHarness::builder().build().await.unwrap();

    assert!(matches!(
        harness.store.list::<Note>("user", None).await,
        Err(SonarError::InvalidArgument(_))
    ));

    harness.sign_in("abc-123").await.unwrap();
    let created = harness
        .store
        .create("profile", &note("me"), "user", None)
        .await
        .unwrap();
    assert_eq!(created.partition, "user-abc-123");

    let page = harness.store.list::<Note>("user", None).await.unwrap();
    assert_eq!(page.items.len(), 1);

    harness.store.set_account(None).await.unwrap();
    assert!(matches!(
        harness.store.list::<Note>("user", None).await,
        Err(SonarError::InvalidArgument(_))
    ));
    assert!(harness
        .cache
        .pending_operations(&user_table_name("abc-123"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_sign_out_drops_queued_user_writes() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness.sign_in("abc").await.unwrap();
    harness.store.list::<Note>("user", None).await.unwrap();
    harness.network.set_connected(false);
    harness
        .store
        .create("profile", &note("queued"), "user", None)
        .await
        .unwrap();
    assert_eq!(
        harness
            .cache
            .pending_operations(&user_table_name("abc"))
            .await
            .unwrap()
            .len(),
        1
    );

    harness.store.set_account(None).await.unwrap();
    harness.exchange.set_account(None);
    harness.network.set_connected(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(write_calls(&harness), 0);
}

// ---- Test 7: Configuration hooks ----

#[tokio::test]
async fn test_token_exchange_url_is_forwarded() {
    let harness = DataHarness::builder().build().await.unwrap();

    harness.store.set_token_exchange_url("https://tokens.example.com/v0.1");

    assert_eq!(
        harness.exchange.base_url().as_deref(),
        Some("https://tokens.example.com/v0.1")
    );
}

#[tokio::test]
async fn test_tokens_are_cached_between_calls() {
    let harness = DataHarness::builder().build().await.unwrap();
    harness.remote.insert("readonly", "a", serde_json::json!({"title": "a", "stars": 1}));

    harness.store.read::<Note>("a", "readonly", None).await.unwrap();
    harness.store.read::<Note>("a", "readonly", None).await.unwrap();
    harness.store.list::<Note>("readonly", None).await.unwrap();

    assert_eq!(harness.exchange.calls(), 1);
}

#[tokio::test]
async fn test_shutdown_disables_store() {
    let harness = DataHarness::builder().build().await.unwrap();

    harness.store.shutdown().await;

    assert!(!harness.store.is_enabled());
    assert_eq!(harness.store.outgoing_count(), 0);
}
