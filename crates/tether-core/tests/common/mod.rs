#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tether_core::remote::MemoryRemote;
use tether_core::sync::{RemoteRow, RetryPolicy};
use tether_core::{Fields, Permissions, RemoteId, Store, SyncEngine, SyncSettings};

/// Settings with millisecond backoff so retry tests stay fast
pub fn fast_settings() -> SyncSettings {
    SyncSettings::default().with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        quota_backoff_multiplier: 2,
    })
}

pub fn setup_with(settings: SyncSettings) -> (Store, Arc<MemoryRemote>, SyncEngine) {
    let store = Store::open_in_memory().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let engine = SyncEngine::new(store.clone(), remote.clone(), settings);
    (store, remote, engine)
}

pub fn setup() -> (Store, Arc<MemoryRemote>, SyncEngine) {
    setup_with(fast_settings())
}

pub fn object(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// An item row as another client would have written it
pub fn remote_item(remote_id: &str, name: &str, is_done: bool, modified_at: i64) -> RemoteRow {
    RemoteRow {
        remote_id: RemoteId::new(remote_id),
        origin_id: None,
        fields: object(json!({
            "name": name,
            "is_done": is_done,
            "note": null,
            "quantity": null,
            "created_at": 1_000,
        })),
        last_modified_at: modified_at,
        is_deleted: false,
        permissions: Permissions::default(),
    }
}

/// Await `future`, failing the test if it takes longer than a second
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), future)
        .await
        .expect("timed out")
}
