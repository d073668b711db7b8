//! Integration tests for the document store.
//!
//! These tests drive a `Store` through its public async API, with subscribers
//! attached, against in-memory and real file systems.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use pretty_assertions::assert_eq;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::time::timeout;

use xweb_store::{
    ChangeRecord, FileSystem, Matcher, MemoryFs, Notification, Store, StoreConfig, StoreError,
    StoreState,
};

/// Collects every notification a subscriber receives.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(ChangeRecord, Option<Vec<Option<String>>>)>>>,
}

impl Recorder {
    fn callback(&self) -> impl Fn(&Notification<'_>) -> Result<(), xweb_store::SubscriberError> {
        let seen = self.seen.clone();
        move |n: &Notification<'_>| {
            seen.lock()
                .unwrap()
                .push((n.change.clone(), n.captures.as_ref().map(|c| c.groups.clone())));
            Ok(())
        }
    }

    fn changes(&self) -> Vec<ChangeRecord> {
        self.seen.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    fn captures(&self) -> Vec<Option<Vec<Option<String>>>> {
        self.seen.lock().unwrap().iter().map(|(_, g)| g.clone()).collect()
    }
}

/// File system whose reads block until released, to observe the Loading state.
struct GatedFs {
    inner: MemoryFs,
    gate: Notify,
}

impl FileSystem for GatedFs {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<Vec<u8>>> {
        async move {
            self.gate.notified().await;
            self.inner.read(path).await
        }
        .boxed()
    }

    fn write<'a>(
        &'a self,
        path: &'a Path,
        contents: Vec<u8>,
    ) -> BoxFuture<'a, std::io::Result<()>> {
        self.inner.write(path, contents)
    }
}

#[tokio::test]
async fn test_device_status_scenario() {
    let store = Store::new();

    let first = store
        .post("/devices/abc/status", json!({"temp": 70}))
        .await
        .unwrap();
    assert_eq!(
        first.changes,
        vec![ChangeRecord::missing("/devices/abc/status", json!({"temp": 70}))]
    );
    assert_eq!(
        serde_json::to_value(&first.changes[0]).unwrap(),
        json!({"type": "missing", "path": "/devices/abc/status", "newValue": {"temp": 70}})
    );

    let second = store
        .post("/devices/abc/status", json!({"temp": 72}))
        .await
        .unwrap();
    assert_eq!(
        second.changes,
        vec![ChangeRecord::changed("/devices/abc/status/temp", json!(70), json!(72))]
    );
}

#[tokio::test]
async fn test_idempotent_posts() {
    let store = Store::new();
    let data = json!({"mode": "heat", "zones": [{"name": "main", "setpoint": 68}]});

    assert!(!store.post("/devices/abc/config", data.clone()).await.unwrap().is_empty());
    assert!(store.post("/devices/abc/config", data).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_after_write() {
    let store = Store::new();
    let cases = [
        ("/leaf", json!("v")),
        ("/nested/leaf", json!(3.5)),
        ("/tree", json!({"a": [1, {"b": null}], "c": true})),
        ("/list[2]", json!("third")),
    ];

    for (path, value) in cases {
        store.post(path, value.clone()).await.unwrap();
        assert_eq!(store.get(path).await.unwrap(), Some(value), "get {path}");
    }
}

#[tokio::test]
async fn test_auto_vivification() {
    let store = Store::new();
    let batch = store.post("a/b[3]/c", json!("x")).await.unwrap();

    assert_eq!(batch.changes, vec![ChangeRecord::missing("/a/b[3]/c", json!("x"))]);
    assert_eq!(
        store.snapshot().await,
        json!({"a": {"b": [null, null, null, {"c": "x"}]}})
    );
}

#[tokio::test]
async fn test_get_does_not_vivify() {
    let store = Store::new();
    assert_eq!(store.get("/missing/deep[3]/path").await.unwrap(), None);
    assert_eq!(store.snapshot().await, json!({}));

    let bad = store.get(&json!(17)).await;
    assert!(matches!(bad, Err(StoreError::PathType(_))));
}

#[tokio::test]
async fn test_conflicts_leave_tree_unchanged() {
    let store = Store::with_tree(json!({"map": {"k": 1}, "list": [1, 2]})).unwrap();
    let before = store.snapshot().await;
    let recorder = Recorder::default();
    store.subscribe(Matcher::regex(".*").unwrap(), recorder.callback());

    let rejected = [
        ("/map", json!([1, 2])),
        ("/list", json!({"k": 1})),
        ("/map[0]/x", json!(1)),
        ("/list/k/deeper", json!(1)),
        ("/", json!({"fresh": "value", "map": {"k": 2}, "list": {"0": 9}})),
    ];
    for (path, data) in rejected {
        let err = store.post(path, data).await.unwrap_err();
        assert!(
            matches!(err, StoreError::StructuralConflict { .. }),
            "post to {path}: {err:?}"
        );
        assert_eq!(store.snapshot().await, before, "tree changed by post to {path}");
    }

    for path in ["/a[18446744073709551615]/b", "/a[100000000000]"] {
        let err = store.post(path, json!(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::PathType(_)), "post to {path}");
    }

    assert_eq!(store.snapshot().await, before);
    assert!(recorder.changes().is_empty());
}

#[tokio::test]
async fn test_subscriber_fan_out() {
    let store = Store::new();
    let exact = Recorder::default();
    let pattern = Recorder::default();
    let glob = Recorder::default();

    store.subscribe("/x/y", exact.callback());
    store.subscribe(Regex::new(r"^/(\w+)/(\w+)$").unwrap(), pattern.callback());
    store.subscribe(Matcher::glob("/x/*").unwrap(), glob.callback());

    store.post("/x/y", json!(1)).await.unwrap();
    store.post("/x/y", json!(2)).await.unwrap();

    assert_eq!(
        exact.changes(),
        vec![
            ChangeRecord::missing("/x/y", json!(1)),
            ChangeRecord::changed("/x/y", json!(1), json!(2)),
        ]
    );
    assert_eq!(exact.captures(), vec![None, None]);

    let groups = Some(vec![
        Some("/x/y".to_string()),
        Some("x".to_string()),
        Some("y".to_string()),
    ]);
    assert_eq!(pattern.captures(), vec![groups.clone(), groups]);

    assert_eq!(
        glob.captures()[0],
        Some(vec![Some("/x/y".to_string()), Some("y".to_string())])
    );
}

#[tokio::test]
async fn test_unsubscribe_isolation() {
    let store = Store::new();
    let first = Recorder::default();
    let second = Recorder::default();

    let handle = store.subscribe("/x/y", first.callback());
    store.subscribe("/x/y", second.callback());

    store.post("/x/y", json!(1)).await.unwrap();
    assert!(store.unsubscribe(handle));
    store.post("/x/y", json!(2)).await.unwrap();

    assert_eq!(first.changes().len(), 1);
    assert_eq!(second.changes().len(), 2);
}

#[tokio::test]
async fn test_failing_subscriber_does_not_fail_post() {
    let store = Store::new();
    let healthy = Recorder::default();

    let failing = store.subscribe("/x", |_: &Notification<'_>| Err("subscriber exploded".into()));
    store.subscribe("/x", healthy.callback());

    let batch = store.post("/x", json!(1)).await.unwrap();
    assert_eq!(batch.changes.len(), 1);
    assert_eq!(batch.delivery_failures.len(), 1);
    assert_eq!(batch.delivery_failures[0].subscription, failing);
    assert_eq!(batch.delivery_failures[0].path, "/x");
    assert_eq!(healthy.changes().len(), 1);
    assert_eq!(store.get("/x").await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn test_notifications_follow_emission_order() {
    let store = Store::with_tree(json!({"obj": {"a": 1, "b": 2}})).unwrap();
    let all = Recorder::default();
    store.subscribe(Matcher::regex("").unwrap(), all.callback());

    let batch = store
        .post("/obj", json!({"b": 20, "c": {"d": 1}, "a": 10}))
        .await
        .unwrap();

    let paths: Vec<_> = all.changes().into_iter().map(|c| c.path).collect();
    assert_eq!(paths, vec!["/obj/b", "/obj/c", "/obj/a"]);
    assert_eq!(all.changes(), batch.changes);
}

#[tokio::test]
async fn test_concurrent_posts_to_disjoint_paths() {
    let store = Arc::new(Store::new());
    let all = Recorder::default();
    store.subscribe(Matcher::glob("*").unwrap(), all.callback());

    let mut handles = Vec::new();
    for device in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let path = format!("/devices/d{device}/status");
            store
                .post(path.as_str(), json!({"temp": device, "on": true}))
                .await
                .unwrap()
        }));
    }

    for (device, handle) in handles.into_iter().enumerate() {
        let batch = handle.await.unwrap();
        assert_eq!(
            batch.changes,
            vec![ChangeRecord::missing(
                format!("/devices/d{device}/status"),
                json!({"temp": device, "on": true})
            )]
        );
    }

    let tree = store.snapshot().await;
    assert_eq!(tree["devices"].as_object().unwrap().len(), 8);
    assert_eq!(all.changes().len(), 8);
}

#[tokio::test]
async fn test_concurrent_posts_to_same_path_are_serialized() {
    let store = Arc::new(Store::new());

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.post("/counter", json!({"v": 1})).await.unwrap() })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.post("/counter", json!({"v": 2})).await.unwrap() })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    // Whichever ran second saw the first one's value as the old value.
    let mut all: Vec<_> = a.changes.into_iter().chain(b.changes).collect();
    all.sort_by_key(|c| c.old_value.is_some());
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].old_value, None);
    let final_value = store.get("/counter/v").await.unwrap().unwrap();
    assert_eq!(all[1].new_value, final_value);
    assert_eq!(all[1].old_value.as_ref(), Some(&all[0].new_value["v"]));
}

#[tokio::test]
async fn test_operations_wait_for_single_in_flight_load() {
    let fs = Arc::new(GatedFs {
        inner: MemoryFs::new(),
        gate: Notify::new(),
    });
    fs.inner.insert("/store.json", r#"{"x": 5}"#);
    let store = Arc::new(Store::open_with(
        StoreConfig::with_backing_path("/store.json"),
        fs.clone(),
    ));
    assert_eq!(store.state(), StoreState::Uninitialized);

    let reader = {
        let store = store.clone();
        tokio::spawn(async move { store.get("/x").await.unwrap() })
    };
    let writer = {
        let store = store.clone();
        tokio::spawn(async move { store.post("/y", json!(1)).await.unwrap() })
    };

    timeout(Duration::from_secs(5), async {
        while store.state() != StoreState::Loading {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("store should start loading");

    fs.gate.notify_one();

    assert_eq!(reader.await.unwrap(), Some(json!(5)));
    assert_eq!(
        writer.await.unwrap().changes,
        vec![ChangeRecord::missing("/y", json!(1))]
    );
    assert_eq!(store.state(), StoreState::Ready);
    assert_eq!(fs.inner.read_count(), 1);
    assert_eq!(store.snapshot().await, json!({"x": 5, "y": 1}));
}

#[tokio::test]
async fn test_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let tree = json!({
        "devices": {
            "abc": {"status": {"temp": 70.5, "on": true, "mode": null}},
            "def": {"zones": [null, {"name": "up"}, [1, 2, 3]]}
        },
        "empty": {},
        "unicode": "\u{00b0}F"
    });

    let store = Store::open(StoreConfig::with_backing_path(&path));
    store.post("/", tree.clone()).await.unwrap();
    store.save().await.unwrap();

    let reopened = Store::open(StoreConfig::with_backing_path(&path));
    assert_eq!(reopened.snapshot().await, tree);

    let fresh = Store::new();
    fresh.load(&path).await;
    assert_eq!(fresh.snapshot().await, tree);
    assert_eq!(fresh.backing_path().await, Some(path.clone()));
}

#[tokio::test]
async fn test_save_snapshots_are_consistent() {
    let fs = Arc::new(MemoryFs::new());
    let store = Arc::new(Store::open_with(
        StoreConfig::with_backing_path("/store.json"),
        fs.clone(),
    ));

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.post_now_with_save(true, "/counter", json!(i)).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    store.save().await.unwrap();

    let saved: Value = serde_json::from_slice(&fs.contents("/store.json").unwrap()).unwrap();
    assert_eq!(saved, store.snapshot().await);
}
