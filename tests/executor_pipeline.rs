//! End-to-end behaviour of the request pipeline over a scripted transport.
//!
//! Every test gets its own cache directory, so they can run in parallel.

mod support;

use bytes::Bytes;
use cachelane::{
    Decodable, Error, ErrorKind, Expiry, Json, RequestConfig, RequestExecutor, ResponseMetadata,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{executor, response, ScriptedTransport};

#[derive(Debug, Deserialize, PartialEq)]
struct Profile {
    name: String,
}

/// Feed that tells the cache how long it stays valid.
#[derive(Debug)]
struct Feed {
    items: Vec<String>,
    valid_until: DateTime<Utc>,
}

impl Decodable for Feed {
    fn from_json(value: Value) -> Option<Self> {
        let items = value
            .get("items")?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect();
        let valid_until = value.get("valid_until")?.as_str()?.parse().ok()?;
        Some(Feed { items, valid_until })
    }

    fn caching_ends_at(&self) -> Option<DateTime<Utc>> {
        Some(self.valid_until)
    }
}

async fn seed<T>(exec: &RequestExecutor, config: &RequestConfig<T>, body: &'static [u8], expires_at: DateTime<Utc>) {
    let key = exec.cache().key_for(&config.prepare().unwrap());
    exec.cache()
        .put(&key, Bytes::from_static(body), ResponseMetadata::default(), expires_at)
        .await
        .unwrap();
}

async fn fresh_entry<T>(exec: &RequestExecutor, config: &RequestConfig<T>) -> Option<cachelane::CacheEntry> {
    let key = exec.cache().key_for(&config.prepare().unwrap());
    exec.cache().get(&key).await.unwrap()
}

async fn any_entry<T>(exec: &RequestExecutor, config: &RequestConfig<T>) -> Option<cachelane::CacheEntry> {
    let key = exec.cache().key_for(&config.prepare().unwrap());
    exec.cache().get_forced(&key).await.unwrap()
}

#[tokio::test]
async fn network_success_without_auto_cache_leaves_cache_empty() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, br#"{"name":"ada"}"#));
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<Json<Profile>>::get("https://api.example.com/a");
    let Json(profile) = exec.execute(config).await.unwrap();

    assert_eq!(profile, Profile { name: "ada".into() });
    assert_eq!(transport.calls(), 1);
    assert!(exec.cache().is_empty().await);
}

#[tokio::test]
async fn fresh_entry_is_served_without_touching_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, br#"{"name":"network"}"#));
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<Json<Profile>>::get("https://api.example.com/a");
    seed(&exec, &config, br#"{"name":"cached"}"#, Utc::now() + ChronoDuration::minutes(5)).await;

    let Json(profile) = exec.execute(config).await.unwrap();
    assert_eq!(profile.name, "cached");
    assert_eq!(transport.calls(), 0);
    for lane in exec.lanes() {
        assert_eq!(lane.completed, 0, "{:?} lane was used", lane.lane);
        assert_eq!(lane.queued_or_running, 0);
    }
}

#[tokio::test]
async fn network_failure_without_entry_reports_the_transport_code() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::unreachable());
    let exec = executor(dir.path(), transport.clone()).await;

    let err = exec
        .execute(RequestConfig::<Json<Profile>>::get("https://api.example.com/b"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    match err {
        Error::NetworkFailure { code, message } => {
            assert_eq!(code, -1005);
            assert!(message.contains("connection reset"), "message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn expired_entry_is_served_when_the_network_fails() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::unreachable());
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<Json<Profile>>::get("https://api.example.com/b");
    seed(&exec, &config, br#"{"name":"stale"}"#, Utc::now() - ChronoDuration::minutes(10)).await;

    let Json(profile) = exec.execute(config.clone()).await.unwrap();
    assert_eq!(profile.name, "stale");
    assert_eq!(transport.calls(), 1);

    // served, but not revived
    assert!(fresh_entry(&exec, &config).await.is_none());
    assert_eq!(exec.cache().stats().stale_hits, 1);
}

#[tokio::test]
async fn error_status_is_a_network_failure_carrying_the_status() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(503, b"maintenance"));
    let exec = executor(dir.path(), transport).await;

    let err = exec
        .execute(RequestConfig::<String>::get("https://api.example.com/c"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NetworkFailure { code: 503, .. }), "got {err}");
    assert_eq!(err.code(), 503);
}

#[tokio::test]
async fn error_status_falls_back_to_stale_entry() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(500, b"boom"));
    let exec = executor(dir.path(), transport).await;

    let config = RequestConfig::<String>::get("https://api.example.com/c");
    seed(&exec, &config, b"yesterday", Utc::now() - ChronoDuration::days(1)).await;

    assert_eq!(exec.execute(config).await.unwrap(), "yesterday");
}

#[tokio::test]
async fn accept_any_status_decodes_error_bodies() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(404, br#"{"name":"missing"}"#));
    let exec = RequestExecutor::builder()
        .transport(transport)
        .cache_config(cachelane::CacheConfig::new().with_directory(dir.path()))
        .accept_any_status(true)
        .build()
        .await
        .unwrap();

    let Json(profile) = exec
        .execute(RequestConfig::<Json<Profile>>::get("https://api.example.com/gone"))
        .await
        .unwrap();
    assert_eq!(profile.name, "missing");
}

#[tokio::test]
async fn json_path_builds_types_without_a_binary_constructor() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, br#"{"items":["a","b"],"valid_until":"2030-01-01T00:00:00Z"}"#));
    let exec = executor(dir.path(), transport).await;

    let feed = exec.execute(RequestConfig::<Feed>::get("https://api.example.com/feed")).await.unwrap();
    assert_eq!(feed.items, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn garbage_bytes_are_a_malformed_json_decode_failure() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"\x89PNG not json"));
    let exec = executor(dir.path(), transport).await;

    let err = exec
        .execute(RequestConfig::<Json<Profile>>::get("https://api.example.com/a"))
        .await
        .unwrap_err();
    assert!(err.is_decode_failure());
    assert_eq!(err.kind(), ErrorKind::MalformedJson);
}

#[tokio::test]
async fn valid_json_of_the_wrong_shape_is_a_decode_failure() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, br#"{"title":"no name field"}"#));
    let exec = executor(dir.path(), transport).await;

    let err = exec
        .execute(RequestConfig::<Json<Profile>>::get("https://api.example.com/a"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DecodeFailure);
}

#[tokio::test]
async fn binary_decodable_targets_never_hit_the_json_stage() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"\xff\x00\x01 raw"));
    let exec = executor(dir.path(), transport).await;

    let raw = exec.execute(RequestConfig::<Vec<u8>>::get("https://api.example.com/blob")).await.unwrap();
    assert_eq!(raw, b"\xff\x00\x01 raw".to_vec());
}

#[tokio::test]
async fn decode_failure_does_not_fall_back_to_stale() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"<html>"));
    let exec = executor(dir.path(), transport).await;

    let config = RequestConfig::<Json<Profile>>::get("https://api.example.com/a");
    seed(&exec, &config, br#"{"name":"stale"}"#, Utc::now() - ChronoDuration::minutes(1)).await;

    let err = exec.execute(config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedJson);
}

#[tokio::test]
async fn empty_body_is_an_empty_payload_failure() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b""));
    let exec = executor(dir.path(), transport).await;

    let err = exec
        .execute(RequestConfig::<Bytes>::get("https://api.example.com/empty"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyPayload));
}

#[tokio::test]
async fn invalid_configuration_never_reaches_the_transport() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"ok"));
    let exec = executor(dir.path(), transport.clone()).await;

    let bad_url = exec.execute(RequestConfig::<String>::get("not a url")).await.unwrap_err();
    assert_eq!(bad_url.kind(), ErrorKind::ConfigurationInvalid);

    let bad_method = exec
        .execute(RequestConfig::<String>::new("GE T", "https://api.example.com/a"))
        .await
        .unwrap_err();
    assert_eq!(bad_method.kind(), ErrorKind::ConfigurationInvalid);

    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn auto_cache_uses_the_configured_caching_time() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, br#"{"name":"ada"}"#));
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<Json<Profile>>::get("https://api.example.com/a")
        .auto_cache(true)
        .cache_for(Duration::from_secs(60));

    exec.execute(config.clone()).await.unwrap();
    let Json(again) = exec.execute(config.clone()).await.unwrap();
    assert_eq!(again.name, "ada");
    assert_eq!(transport.calls(), 1);

    let entry = fresh_entry(&exec, &config).await.unwrap();
    let ttl = entry.expires_at - Utc::now();
    assert!(ttl > ChronoDuration::seconds(50) && ttl <= ChronoDuration::seconds(60), "ttl {ttl}");
    assert_eq!(entry.metadata.status, 200);
}

#[tokio::test]
async fn auto_cache_hint_wins_and_bounds_the_fresh_window() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new(|req| {
        let until = Utc::now() + ChronoDuration::milliseconds(1500);
        let body = format!(r#"{{"items":["x"],"valid_until":"{}"}}"#, until.to_rfc3339());
        Ok(response(req, 200, Bytes::from(body)))
    }));
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<Feed>::get("https://api.example.com/feed")
        .auto_cache(true)
        .cache_for(Duration::from_secs(3600));

    let first = exec.execute(config.clone()).await.unwrap();
    let entry = fresh_entry(&exec, &config).await.unwrap();
    assert_eq!(entry.expires_at, first.valid_until);

    exec.execute(config.clone()).await.unwrap();
    assert_eq!(transport.calls(), 1, "second call inside the window is a hit");

    tokio::time::sleep(Duration::from_millis(1700)).await;
    assert!(fresh_entry(&exec, &config).await.is_none());
    assert!(any_entry(&exec, &config).await.is_some(), "expired entry stays readable");

    exec.execute(config).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn auto_cache_without_any_expiry_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"text"));
    let exec = executor(dir.path(), transport).await;

    let config = RequestConfig::<String>::get("https://api.example.com/t").auto_cache(true);
    exec.execute(config).await.unwrap();
    assert!(exec.cache().is_empty().await);
}

#[tokio::test]
async fn caching_time_is_ignored_without_auto_cache() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"text"));
    let exec = executor(dir.path(), transport).await;

    let config = RequestConfig::<String>::get("https://api.example.com/t").cache_for(Duration::from_secs(60));
    exec.execute(config).await.unwrap();
    assert!(exec.cache().is_empty().await);
}

#[tokio::test]
async fn set_cache_expiry_forces_a_refetch() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"v1"));
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<String>::get("https://api.example.com/v")
        .auto_cache(true)
        .cache_for(Duration::from_secs(600));
    exec.execute(config.clone()).await.unwrap();
    exec.execute(config.clone()).await.unwrap();
    assert_eq!(transport.calls(), 1);

    let past = Utc::now() - ChronoDuration::seconds(1);
    assert!(exec.set_cache_expiry(&config, Expiry::At(past)).await.unwrap());
    exec.execute(config.clone()).await.unwrap();
    assert_eq!(transport.calls(), 2);

    let missing = RequestConfig::<String>::get("https://api.example.com/never");
    assert!(!exec.set_cache_expiry(&missing, Expiry::At(past)).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn primary_lane_runs_one_fetch_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"ok").delayed(Duration::from_millis(25)));
    let exec = executor(dir.path(), transport.clone()).await;

    let calls = (0..5).map(|i| {
        let exec = exec.clone();
        async move {
            let config = RequestConfig::<String>::get(format!("https://api.example.com/p/{i}")).main_priority(true);
            exec.execute(config).await
        }
    });
    for result in futures::future::join_all(calls).await {
        assert_eq!(result.unwrap(), "ok");
    }

    assert_eq!(transport.calls(), 5);
    assert_eq!(transport.peak_concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn secondary_lane_overlaps_up_to_its_bound() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"ok").delayed(Duration::from_millis(40)));
    let exec = executor(dir.path(), transport.clone()).await;

    let calls = (0..8).map(|i| {
        let exec = exec.clone();
        async move { exec.execute(RequestConfig::<String>::get(format!("https://api.example.com/s/{i}"))).await }
    });
    for result in futures::future::join_all(calls).await {
        result.unwrap();
    }

    let peak = transport.peak_concurrency();
    assert!(peak > 1 && peak <= 4, "peak was {peak}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identical_concurrent_misses_are_not_coalesced() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"ok").delayed(Duration::from_millis(30)));
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<String>::get("https://api.example.com/same")
        .auto_cache(true)
        .cache_for(Duration::from_secs(60));
    let (a, b) = tokio::join!(exec.execute(config.clone()), exec.execute(config));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn execute_with_delivers_exactly_once_on_every_path() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"fresh"));
    let exec = executor(dir.path(), transport).await;

    let cached = RequestConfig::<String>::get("https://api.example.com/hit");
    seed(&exec, &cached, b"cached", Utc::now() + ChronoDuration::minutes(1)).await;

    let configs = vec![
        (cached, Ok("cached")),
        (RequestConfig::<String>::get("https://api.example.com/miss"), Ok("fresh")),
        (RequestConfig::<String>::get("::"), Err(ErrorKind::ConfigurationInvalid)),
    ];

    for (config, expected) in configs {
        let deliveries = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let counter = deliveries.clone();
        let handle = exec.execute_with(config, move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        });
        handle.await.unwrap();

        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
        match (rx.await.unwrap(), expected) {
            (Ok(value), Ok(want)) => assert_eq!(value, want),
            (Err(err), Err(kind)) => assert_eq!(err.kind(), kind),
            (got, want) => panic!("got {got:?}, want {want:?}"),
        }
    }
}

/// `Send` but not `Sync`: interior mutability without locking.
struct Scratch {
    text: std::cell::RefCell<String>,
    keep_until: DateTime<Utc>,
}

impl Decodable for Scratch {
    fn from_bytes(bytes: &Bytes) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?.to_owned();
        Some(Scratch {
            text: std::cell::RefCell::new(text),
            keep_until: Utc::now() + ChronoDuration::minutes(5),
        })
    }

    fn caching_ends_at(&self) -> Option<DateTime<Utc>> {
        Some(self.keep_until)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_with_accepts_targets_that_are_not_sync() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::respond(200, b"draft"));
    let exec = executor(dir.path(), transport.clone()).await;

    let config = RequestConfig::<Scratch>::get("https://api.example.com/scratch").auto_cache(true);
    let (tx, rx) = tokio::sync::oneshot::channel();
    exec.execute_with(config.clone(), move |result| {
        let scratch = result.unwrap();
        scratch.text.borrow_mut().push_str(" v2");
        let _ = tx.send(scratch.text.into_inner());
    })
    .await
    .unwrap();

    assert_eq!(rx.await.unwrap(), "draft v2");
    let entry = fresh_entry(&exec, &config).await.expect("hint drove the cache write");
    assert!(entry.expires_at > Utc::now() + ChronoDuration::minutes(4));
    assert_eq!(transport.calls(), 1);
}
