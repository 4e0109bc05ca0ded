mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tether_core::remote::DirRemote;
use tether_core::sync::{RemoteError, RetryPolicy, SyncLeg};
use tether_core::{
    Item, MergeStrategy, RemoteId, Store, SyncActivity, SyncEngine, SyncError, Table,
};

use common::{fast_settings, remote_item, setup, setup_with, within};

#[tokio::test(flavor = "multi_thread")]
async fn pushed_row_becomes_clean_with_remote_id() {
    let (store, remote, engine) = setup();
    let item = Item::new("Coffee");
    store.insert(&item).await.unwrap();

    let report = engine.send_changes().await.unwrap();
    assert_eq!(report.pushed, 1);

    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(!meta.is_dirty);
    assert_eq!(meta.remote_id, Some(RemoteId::new("R1")));
    assert_eq!(
        store.get::<Item>(item.id).await.unwrap().unwrap().name,
        "Coffee"
    );

    let pushed = remote.row(Table::Items, &RemoteId::new("R1")).unwrap();
    assert_eq!(pushed.fields["name"], json!("Coffee"));
    assert_eq!(pushed.origin_id, Some(item.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn sending_twice_is_the_same_as_once() {
    let (store, remote, engine) = setup();
    store.insert(&Item::new("Coffee")).await.unwrap();
    store.insert(&Item::new("Milk")).await.unwrap();

    let first = engine.send_changes().await.unwrap();
    let rows_after_first = remote.rows(Table::Items);
    let second = engine.send_changes().await.unwrap();

    assert_eq!(first.pushed, 2);
    assert_eq!(second.pushed, 0);
    assert_eq!(remote.push_calls(), 1);
    assert_eq!(remote.rows(Table::Items), rows_after_first);
    assert_eq!(store.sync_summary().await.unwrap().dirty, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_local_edit_beats_older_remote_version() {
    let settings = fast_settings().with_strategy(Table::Items, MergeStrategy::LastWriterWins);
    let (store, remote, engine) = setup_with(settings);

    remote.put_row(Table::Items, remote_item("R1", "Coffee", false, 1_000));
    engine.fetch_changes().await.unwrap();
    let mut item = store.list::<Item>().await.unwrap().remove(0);

    item.name = "Tea".to_string();
    store.update(&item).await.unwrap();

    // The remote re-delivers the older version
    remote.put_row(Table::Items, remote_item("R1", "Coffee", false, 1_000));
    let report = engine.fetch_changes().await.unwrap();
    assert_eq!(report.conflicts, 1);

    let stored = store.get::<Item>(item.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Tea");
    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(meta.is_dirty);

    let conflicts = store.list_conflicts(5).await.unwrap();
    assert_eq!(conflicts[0].winner, "local");
    assert_eq!(conflicts[0].incoming_modified_at, 1_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn dirty_local_fields_survive_default_merge() {
    let (store, remote, engine) = setup();
    remote.put_row(Table::Items, remote_item("R1", "Coffee", false, 1_000));
    engine.fetch_changes().await.unwrap();

    let mut item = store.list::<Item>().await.unwrap().remove(0);
    item.name = "Tea".to_string();
    store.update(&item).await.unwrap();

    // Another client adds a note after the local rename
    let edited_at = store.metadata(Table::Items, item.id).await.unwrap().unwrap().last_modified_at;
    let mut newer_remote = remote_item("R1", "Coffee", false, edited_at + 1);
    newer_remote.fields.insert("note".to_string(), json!("decaf"));
    remote.put_row(Table::Items, newer_remote);
    engine.fetch_changes().await.unwrap();

    let stored = store.get::<Item>(item.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Tea");
    assert_eq!(stored.note.as_deref(), Some("decaf"));
    assert!(store.metadata(Table::Items, item.id).await.unwrap().unwrap().is_dirty);
}

#[tokio::test(flavor = "multi_thread")]
async fn default_merge_keeps_newer_local_name() {
    let (store, remote, engine) = setup();
    remote.put_row(Table::Items, remote_item("R1", "Coffee", false, 1_000));
    engine.fetch_changes().await.unwrap();

    let mut item = store.list::<Item>().await.unwrap().remove(0);
    item.name = "Tea".to_string();
    store.update(&item).await.unwrap();

    remote.put_row(Table::Items, remote_item("R1", "Coffee", false, 1_000));
    engine.fetch_changes().await.unwrap();

    let stored = store.get::<Item>(item.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "Tea");
    assert!(store.metadata(Table::Items, item.id).await.unwrap().unwrap().is_dirty);
}

#[tokio::test(flavor = "multi_thread")]
async fn cleared_field_survives_echo_of_earlier_push() {
    let (store, remote, engine) = setup();
    let mut item = Item::new("Coffee").with_note("decaf");
    store.insert(&item).await.unwrap();
    engine.send_changes().await.unwrap();

    item.note = None;
    store.update(&item).await.unwrap();
    // Fetch sees the pushed version with the note, then send pushes the clear
    engine.sync_changes().await.unwrap();

    let stored = store.get::<Item>(item.id).await.unwrap().unwrap();
    assert_eq!(stored.note, None);
    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(!meta.is_dirty);
    let pushed = remote.row(Table::Items, &RemoteId::new("R1")).unwrap();
    assert_eq!(pushed.fields["note"], json!(null));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_send_leaves_dirty_set_and_allows_next_run() {
    let (store, remote, engine) = setup();
    let item = Item::new("Coffee");
    store.insert(&item).await.unwrap();

    let gate = remote.gate_pushes();
    let sending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.send_changes().await }
    });
    within(gate.entered()).await;
    assert!(engine.status().is_sending_changes());

    sending.abort();
    assert!(within(sending).await.unwrap_err().is_cancelled());
    remote.open_gate();

    assert!(engine.status().is_idle());
    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(meta.is_dirty);
    assert_eq!(meta.remote_id, None);

    let report = within(engine.send_changes()).await.unwrap();
    assert_eq!(report.pushed, 1);
    assert!(!store.metadata(Table::Items, item.id).await.unwrap().unwrap().is_dirty);
    assert!(engine.status().is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_batch_sizes_are_treated_as_one() {
    let mut settings = fast_settings();
    settings.pull_batch_size = 0;
    settings.push_batch_size = 0;
    let (store, remote, engine) = setup_with(settings);
    store.insert(&Item::new("Coffee")).await.unwrap();
    store.insert(&Item::new("Milk")).await.unwrap();

    let report = engine.send_changes().await.unwrap();
    assert_eq!(report.pushed, 2);
    assert_eq!(remote.push_calls(), 2);

    remote.put_row(Table::Items, remote_item("R9", "Bread", false, 10));
    engine.fetch_changes().await.unwrap();
    assert_eq!(store.list::<Item>().await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_during_push_keeps_row_dirty() {
    let (store, remote, engine) = setup();
    let item = Item::new("Coffee");
    store.insert(&item).await.unwrap();

    let gate = remote.gate_pushes();
    let sending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.send_changes().await }
    });
    within(gate.entered()).await;
    assert!(engine.status().is_sending_changes());

    let mut edited = item.clone();
    edited.name = "Decaf".to_string();
    store.update(&edited).await.unwrap();
    remote.open_gate();

    let report = within(sending).await.unwrap().unwrap();
    assert_eq!(report.pushed, 1);

    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(meta.is_dirty);
    assert_eq!(meta.remote_id, Some(RemoteId::new("R1")));

    engine.send_changes().await.unwrap();
    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(!meta.is_dirty);
    let pushed = remote.row(Table::Items, &RemoteId::new("R1")).unwrap();
    assert_eq!(pushed.fields["name"], json!("Decaf"));
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_during_first_push_still_reaches_remote() {
    let (store, remote, engine) = setup();
    let item = Item::new("Coffee");
    store.insert(&item).await.unwrap();

    let gate = remote.gate_pushes();
    let sending = tokio::spawn({
        let engine = engine.clone();
        async move { engine.send_changes().await }
    });
    within(gate.entered()).await;
    store.delete::<Item>(item.id).await.unwrap();
    remote.open_gate();
    within(sending).await.unwrap().unwrap();

    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(meta.is_deleted);
    assert!(meta.is_dirty);

    engine.send_changes().await.unwrap();
    assert!(remote.row(Table::Items, &RemoteId::new("R1")).unwrap().is_deleted);
    let meta = store.metadata(Table::Items, item.id).await.unwrap().unwrap();
    assert!(!meta.is_dirty);
}

#[tokio::test(flavor = "multi_thread")]
async fn tombstones_propagate_and_block_stale_pulls() {
    let (store, remote, engine) = setup();
    let item = Item::new("Coffee");
    store.insert(&item).await.unwrap();
    engine.sync_changes().await.unwrap();

    store.delete::<Item>(item.id).await.unwrap();
    let summary = store.sync_summary().await.unwrap();
    assert_eq!((summary.dirty, summary.tombstones), (1, 1));

    engine.sync_changes().await.unwrap();
    assert!(remote.row(Table::Items, &RemoteId::new("R1")).unwrap().is_deleted);

    // Another client re-sends the version from before the delete
    let mut stale = remote_item("R1", "Coffee", false, 1);
    stale.origin_id = Some(item.id);
    remote.put_row(Table::Items, stale);
    engine.fetch_changes().await.unwrap();

    assert!(store.list::<Item>().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_rows_stay_dirty_while_others_push() {
    let (store, remote, engine) = setup();
    let accepted = Item::new("Coffee");
    let rejected = Item::new("Shared");
    store.insert(&accepted).await.unwrap();
    store.insert(&rejected).await.unwrap();
    remote.reject_row(rejected.id, RemoteError::rejected("read-only for this account"));

    let report = engine.send_changes().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].leg, SyncLeg::Send);
    assert_eq!(report.failures[0].local_id, Some(rejected.id));
    assert!(store.metadata(Table::Items, rejected.id).await.unwrap().unwrap().is_dirty);

    remote.accept_row(rejected.id);
    let report = engine.send_changes().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert!(report.is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_advances_only_after_whole_batch() {
    let (store, remote, engine) = setup();
    remote.put_row(Table::Items, remote_item("R1", "Coffee", false, 10));
    let mut broken = remote_item("R2", "Milk", false, 10);
    broken.fields.insert("name".to_string(), json!(42));
    remote.put_row(Table::Items, broken);
    remote.put_row(Table::Items, remote_item("R3", "Bread", false, 10));

    let error = engine.fetch_changes().await.unwrap_err();
    assert!(matches!(error, SyncError::Schema(_)));
    assert!(store.sync_summary().await.unwrap().cursors.is_empty());
    // Rows merged before the failure are kept
    assert_eq!(store.list::<Item>().await.unwrap().len(), 1);

    remote.put_row(Table::Items, remote_item("R2", "Milk", false, 11));
    engine.fetch_changes().await.unwrap();

    let summary = store.sync_summary().await.unwrap();
    assert_eq!(summary.cursors.len(), 1);
    assert_eq!(summary.cursors[0].1.position(), 4);
    assert_eq!(store.list::<Item>().await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn pulls_page_through_batches() {
    let mut settings = fast_settings();
    settings.pull_batch_size = 2;
    let (store, remote, engine) = setup_with(settings);
    for n in 0..5 {
        remote.put_row(
            Table::Items,
            remote_item(&format!("R{n}"), &format!("Item {n}"), false, 10),
        );
    }

    let report = engine.fetch_changes().await.unwrap();
    assert_eq!(report.fetched, 5);
    assert_eq!(report.inserted, 5);
    assert_eq!(store.list::<Item>().await.unwrap().len(), 5);

    let cursor = store.sync_summary().await.unwrap().cursors[0].1;
    engine.fetch_changes().await.unwrap();
    assert_eq!(store.sync_summary().await.unwrap().cursors[0].1, cursor);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_are_retried() {
    let (_store, remote, engine) = setup();
    remote.fail_pulls([
        RemoteError::transient("connection reset"),
        RemoteError::quota("429"),
    ]);

    let report = engine.fetch_changes().await.unwrap();
    // Two failed pulls, then one pull per table
    assert_eq!(report.attempts, 4);
    assert_eq!(remote.pull_calls(), 4);
    assert!(engine.status().last_error.is_none());
    assert!(engine.status().last_synced_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_surface_and_status_returns_to_idle() {
    let (_store, remote, engine) = setup();
    remote.fail_pulls([
        RemoteError::transient("down"),
        RemoteError::transient("down"),
        RemoteError::transient("down"),
    ]);

    let error = engine.fetch_changes().await.unwrap_err();
    assert!(matches!(error, SyncError::TransientNetwork(_)));

    let status = engine.status();
    assert_eq!(status.activity, SyncActivity::Idle);
    assert!(status.last_error.unwrap().contains("down"));
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_failures_abort_without_retry() {
    let (_store, remote, engine) = setup();
    remote.fail_pushes([RemoteError::schema("unknown column")]);
    engine.store().insert(&Item::new("Coffee")).await.unwrap();

    let error = engine.send_changes().await.unwrap_err();
    assert_eq!(error, SyncError::Schema("unknown column".to_string()));
    assert_eq!(remote.push_calls(), 1);
    assert!(engine.status().is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_remote_times_out() {
    let settings = fast_settings()
        .with_retry(RetryPolicy::no_retry())
        .with_request_timeout(Duration::from_millis(20));
    let (_store, remote, engine) = setup_with(settings);
    remote.set_latency(Duration::from_millis(500));

    let error = engine.fetch_changes().await.unwrap_err();
    match error {
        SyncError::TransientNetwork(message) => assert!(message.contains("timed out")),
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(engine.status().is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_calls_join_the_covering_run() {
    let (store, remote, engine) = setup();
    remote.set_latency(Duration::from_millis(50));
    store.insert(&Item::new("Coffee")).await.unwrap();

    let (first, second, third) = tokio::join!(engine.sync_changes(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.sync_changes().await
    }, async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.send_changes().await
    });

    let first = first.unwrap();
    assert_eq!(second.unwrap(), first);
    assert_eq!(third.unwrap(), first);
    assert_eq!(remote.pull_calls(), 2);
    assert_eq!(remote.push_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn uncovered_call_waits_then_runs() {
    let (store, remote, engine) = setup();
    remote.set_latency(Duration::from_millis(30));
    store.insert(&Item::new("Coffee")).await.unwrap();

    let mut status = engine.subscribe_status();
    let (fetched, sent) = tokio::join!(engine.fetch_changes(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.send_changes().await
    });

    assert_eq!(fetched.unwrap().pushed, 0);
    assert_eq!(sent.unwrap().pushed, 1);
    assert!(status.borrow_and_update().is_idle());
    assert_eq!(remote.pull_calls(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn periodic_sync_pushes_in_background() {
    let (store, remote, engine) = setup();
    store.insert(&Item::new("Coffee")).await.unwrap();

    let periodic = engine.spawn_periodic(Duration::from_millis(10));
    within(async {
        while store.sync_summary().await.unwrap().dirty > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    periodic.stop();

    assert_eq!(remote.pushed_changes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn two_devices_share_a_directory_remote() {
    let dir = tempfile::tempdir().unwrap();
    let laptop_store = Store::open_in_memory().unwrap();
    let phone_store = Store::open_in_memory().unwrap();
    let laptop = SyncEngine::new(
        laptop_store.clone(),
        Arc::new(DirRemote::open(dir.path()).unwrap()),
        fast_settings(),
    );
    let phone = SyncEngine::new(
        phone_store.clone(),
        Arc::new(DirRemote::open(dir.path()).unwrap()),
        fast_settings(),
    );

    let item = Item::new("Coffee").with_quantity(2);
    laptop_store.insert(&item).await.unwrap();
    laptop.sync_changes().await.unwrap();
    phone.sync_changes().await.unwrap();

    let on_phone = phone_store.get::<Item>(item.id).await.unwrap().unwrap();
    assert_eq!(on_phone.name, "Coffee");
    assert_eq!(on_phone.quantity, Some(2));

    let mut done = on_phone;
    done.is_done = true;
    phone_store.update(&done).await.unwrap();
    phone.sync_changes().await.unwrap();
    laptop.sync_changes().await.unwrap();

    assert!(laptop_store.get::<Item>(item.id).await.unwrap().unwrap().is_done);
    assert_eq!(laptop_store.sync_summary().await.unwrap().dirty, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn engines_do_not_share_state() {
    let (_store_a, _remote_a, engine_a) = setup();
    let (_store_b, remote_b, engine_b) = setup();
    remote_b.fail_pulls([RemoteError::schema("broken")]);

    assert!(engine_b.fetch_changes().await.is_err());
    engine_a.fetch_changes().await.unwrap();
    assert!(engine_a.status().last_error.is_none());
    assert!(engine_b.status().last_error.is_some());
}
