//! Dependency watcher scheduling, supervision and cancellation.
//!
//! Runs on a paused tokio clock; sleeps advance virtual time.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use reqmeter_core::instruments::dependency_gauge;
use reqmeter_core::{Health, MetricRegistry};
use reqmeter_http::watch::{probe_once, spawn_watch};
use reqmeter_http::{probe_fn, FailurePolicy, Probe, WatchOptions, Watchers};

fn opts() -> WatchOptions {
    WatchOptions {
        initial_delay: Duration::from_secs(10),
        interval: Duration::from_secs(1500),
        probe_timeout: Duration::from_secs(5),
        on_failure: FailurePolicy::MarkDown,
    }
}

/// Probe returning `script[n]` on its n-th call (last entry repeats).
fn scripted(script: Vec<Result<u8, &'static str>>) -> (impl Probe, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let script = Arc::new(script);
    let probe = probe_fn(move || {
        let counter = Arc::clone(&counter);
        let script = Arc::clone(&script);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let idx = n.min(script.len() - 1);
            script[idx]
        }
    });
    (probe, calls)
}

#[tokio::test(start_paused = true)]
async fn gauge_follows_successive_probe_results() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let (probe, calls) = scripted(vec![Ok(1), Ok(0)]);

    watchers.watch("db", probe, None).unwrap();
    assert_eq!(watchers.gauge().get(&["db"]), None);

    sleep(Duration::from_secs(11)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(watchers.gauge().get(&["db"]), Some(1));

    sleep(Duration::from_secs(1500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(watchers.gauge().get(&["db"]), Some(0));

    assert!(registry.render().contains("dependency_up{name=\"db\"} 0"));
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn interval_override_is_used() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let (probe, calls) = scripted(vec![Ok(1)]);

    watchers.watch("cache", probe, Some(Duration::from_secs(60))).unwrap();

    sleep(Duration::from_secs(10 + 60 * 3 + 1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_probe_marks_down_and_schedule_continues() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let (probe, calls) = scripted(vec![Ok(1), Err("connection refused"), Ok(1)]);

    watchers.watch("db", probe, None).unwrap();

    sleep(Duration::from_secs(11)).await;
    assert_eq!(watchers.gauge().get(&["db"]), Some(1));

    sleep(Duration::from_secs(1500)).await;
    assert_eq!(watchers.gauge().get(&["db"]), Some(0));

    sleep(Duration::from_secs(1500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(watchers.gauge().get(&["db"]), Some(1));
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn keep_last_policy_leaves_gauge_alone() {
    let registry = MetricRegistry::new();
    let keep = WatchOptions {
        on_failure: FailurePolicy::KeepLast,
        ..opts()
    };
    let watchers = Watchers::with_defaults(&registry, keep).unwrap();
    let (probe, _) = scripted(vec![Ok(1), Err("flaky")]);

    watchers.watch("db", probe, None).unwrap();

    sleep(Duration::from_secs(11 + 1500)).await;
    assert_eq!(watchers.gauge().get(&["db"]), Some(1));
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hung_probe_times_out() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let probe = probe_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(3600)).await;
            Ok::<bool, &'static str>(true)
        }
    });

    watchers.watch("slow", probe, None).unwrap();

    // initial delay + probe timeout
    sleep(Duration::from_secs(10 + 5 + 1)).await;
    assert_eq!(watchers.gauge().get(&["slow"]), Some(0));

    sleep(Duration::from_secs(1500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_probe_does_not_kill_the_task() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let probe = probe_fn(move || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("probe exploded");
            }
            Ok::<bool, &'static str>(true)
        }
    });

    watchers.watch("fragile", probe, None).unwrap();

    sleep(Duration::from_secs(11)).await;
    assert_eq!(watchers.gauge().get(&["fragile"]), Some(0));

    sleep(Duration::from_secs(1500)).await;
    assert_eq!(watchers.gauge().get(&["fragile"]), Some(1));
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unwatch_stops_before_first_probe() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let (probe, calls) = scripted(vec![Ok(1)]);

    watchers.watch("db", probe, None).unwrap();
    assert!(watchers.unwatch("db").await);
    assert!(!watchers.unwatch("db").await);
    assert!(watchers.names().is_empty());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(watchers.gauge().get(&["db"]), None);
}

#[tokio::test(start_paused = true)]
async fn unwatch_drops_the_dependency_series() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let (db, _) = scripted(vec![Ok(1)]);
    let (cache, _) = scripted(vec![Ok(1)]);

    watchers.watch("db", db, None).unwrap();
    watchers.watch("cache", cache, None).unwrap();
    sleep(Duration::from_secs(11)).await;
    assert_eq!(watchers.gauge().get(&["db"]), Some(1));

    assert!(watchers.unwatch("db").await);
    assert_eq!(watchers.gauge().get(&["db"]), None);
    assert_eq!(watchers.status(), vec![("cache".to_string(), Some(1))]);

    let text = registry.render();
    assert!(!text.contains("name=\"db\""));
    assert!(text.contains("dependency_up{name=\"cache\"} 1"));
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_everything() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let (a, a_calls) = scripted(vec![Ok(1)]);
    let (b, b_calls) = scripted(vec![Ok(1)]);

    watchers.watch("a", a, None).unwrap();
    watchers.watch("b", b, None).unwrap();
    assert_eq!(watchers.names(), vec!["a".to_string(), "b".to_string()]);

    sleep(Duration::from_secs(11)).await;
    watchers.shutdown().await;
    assert!(watchers.names().is_empty());

    sleep(Duration::from_secs(10_000)).await;
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);

    let (c, _) = scripted(vec![Ok(1)]);
    assert!(watchers.watch("c", c, None).is_err());
}

#[tokio::test(start_paused = true)]
async fn duplicate_watch_is_rejected() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::with_defaults(&registry, opts()).unwrap();
    let (p1, _) = scripted(vec![Ok(1)]);
    let (p2, _) = scripted(vec![Ok(1)]);

    watchers.watch("db", p1, None).unwrap();
    let err = watchers.watch("db", p2, None).unwrap_err();
    assert_eq!(err.code().as_str(), "ALREADY_WATCHING");
    watchers.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_rejected() {
    let registry = MetricRegistry::new();
    let watchers = Watchers::new(&registry).unwrap();
    let (p, _) = scripted(vec![Ok(1)]);

    let err = watchers.watch("db", p, Some(Duration::ZERO)).unwrap_err();
    assert_eq!(err.code().as_str(), "BAD_CONFIG");
}

#[tokio::test(start_paused = true)]
async fn watch_handle_cancel_and_stop() {
    let registry = MetricRegistry::new();
    let gauge = dependency_gauge(&registry).unwrap();
    let (probe, calls) = scripted(vec![Ok(1)]);

    let handle = spawn_watch("solo", Arc::new(probe), gauge, opts(), CancellationToken::new()).unwrap();
    assert_eq!(handle.name(), "solo");

    sleep(Duration::from_secs(11)).await;
    assert!(!handle.is_finished());
    handle.cancel();
    handle.stop().await;

    sleep(Duration::from_secs(5000)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn probe_once_maps_outcomes() {
    let (up, _) = scripted(vec![Ok(7)]);
    assert_eq!(probe_once(&up, Duration::from_secs(1)).await.unwrap(), Health::Up);

    let (down, _) = scripted(vec![Ok(0)]);
    assert_eq!(probe_once(&down, Duration::from_secs(1)).await.unwrap(), Health::Down);

    let (bad, _) = scripted(vec![Err("refused")]);
    let err = probe_once(&bad, Duration::from_secs(1)).await.unwrap_err();
    assert_eq!(err.code().as_str(), "PROBE_FAILED");
    assert!(err.to_string().contains("refused"));
}
