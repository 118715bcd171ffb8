//! Engine tests driven by a scripted in-process fetcher.
//!
//! Tests run with paused Tokio time, so backoff schedules in whole seconds
//! finish instantly while elapsed time stays exact.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::fetch::{FetchError, FetchResponse, Fetcher};

type Script = dyn Fn(&str, usize) -> Result<FetchResponse, FetchError> + Send + Sync;

/// Fetcher whose answer depends on the key and on how many times that key
/// was fetched before.
struct ScriptedFetcher {
    script: Box<Script>,
    latency: Duration,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    active_keys: Mutex<HashSet<String>>,
    overlapping_key: AtomicBool,
}

impl ScriptedFetcher {
    fn new(
        latency: Duration,
        script: impl Fn(&str, usize) -> Result<FetchResponse, FetchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            latency,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            active_keys: Mutex::new(HashSet::new()),
            overlapping_key: AtomicBool::new(false),
        })
    }

    fn always(status: u16) -> Arc<Self> {
        Self::new(Duration::from_millis(10), move |key, _| {
            Ok(FetchResponse::new(status, format!("info-{key}")))
        })
    }

    fn calls_for(&self, key: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _base_url: &str, item_key: &str) -> Result<FetchResponse, FetchError> {
        let previous = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(item_key.to_string()).or_default();
            entry.push(Instant::now());
            entry.len() - 1
        };
        if !self
            .active_keys
            .lock()
            .unwrap()
            .insert(item_key.to_string())
        {
            self.overlapping_key.store(true, Ordering::SeqCst);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.active_keys.lock().unwrap().remove(item_key);
        (self.script)(item_key, previous)
    }
}

fn engine(fetcher: Arc<ScriptedFetcher>, concurrency: usize) -> FetchEngine {
    FetchEngine::new(
        EngineConfig {
            concurrency,
            ..EngineConfig::default()
        },
        fetcher,
    )
    .unwrap()
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, vec![Duration::from_millis(5)]).unwrap()
}

const BASE: &str = "http://items.test/items/";

// ==================== Validation ====================

#[test]
fn test_engine_new_valid_concurrency() {
    for concurrency in [1, 5, 100] {
        let engine = engine(ScriptedFetcher::always(200), concurrency);
        assert_eq!(engine.concurrency(), concurrency);
    }
}

#[test]
fn test_engine_new_invalid_concurrency() {
    for value in [0, 101] {
        let result = FetchEngine::new(
            EngineConfig {
                concurrency: value,
                ..EngineConfig::default()
            },
            ScriptedFetcher::always(200),
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidConcurrency { value: v }) if v == value
        ));
    }
}

#[test]
fn test_engine_new_zero_queue_capacity() {
    let result = FetchEngine::new(
        EngineConfig::default().with_queue_capacity(0),
        ScriptedFetcher::always(200),
    );
    assert!(matches!(result, Err(EngineError::InvalidQueueCapacity)));
}

#[test]
fn test_engine_config_rejects_bad_policy() {
    let result = EngineConfig::new(5, 3, Vec::new());
    assert!(matches!(
        result,
        Err(EngineError::InvalidRetryPolicy(
            RetryPolicyError::EmptySchedule { max_attempts: 3 }
        ))
    ));
}

#[test]
fn test_engine_error_display() {
    let msg = EngineError::InvalidConcurrency { value: 0 }.to_string();
    assert!(msg.contains("invalid concurrency"));
    assert!(msg.contains("100"));
}

#[test]
fn test_default_config() {
    let config = EngineConfig::default();
    assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    assert_eq!(config.effective_queue_capacity(), DEFAULT_CONCURRENCY);
    assert_eq!(config.retry_policy.max_attempts(), DEFAULT_MAX_ATTEMPTS);
}

// ==================== Retry semantics ====================

#[tokio::test(start_paused = true)]
async fn test_item_recovering_on_third_attempt_waits_full_backoff() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10), |key, previous| {
        if key == "42" && previous < 2 {
            Ok(FetchResponse::new(500, "boom"))
        } else {
            Ok(FetchResponse::new(200, "info-42"))
        }
    });
    let engine = engine(Arc::clone(&fetcher), 5);

    let started = Instant::now();
    let report = engine.run(BASE, ["42"]).await.unwrap();
    let elapsed = started.elapsed();

    let item = report.get("42").unwrap();
    assert_eq!(
        item.outcome,
        ItemOutcome::Succeeded {
            body: "info-42".into()
        }
    );
    assert_eq!(item.attempts, 3);
    assert_eq!(fetcher.calls_for("42").len(), 3);
    assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
    assert!(report.elapsed >= Duration::from_secs(4));
    assert_eq!(report.retried, 2);
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_item_fails_after_max_attempts() {
    let fetcher = ScriptedFetcher::always(500);
    let engine = engine(Arc::clone(&fetcher), 5);

    let report = engine.run(BASE, ["7"]).await.unwrap();

    let item = report.get("7").unwrap();
    assert_eq!(item.attempts, 3);
    assert_eq!(
        item.outcome,
        ItemOutcome::Failed {
            last_status: Some(500),
            last_error: None,
        }
    );
    assert_eq!(fetcher.calls_for("7").len(), 3);
    assert_eq!(report.failed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_spaced_by_schedule() {
    let fetcher = ScriptedFetcher::always(429);
    let engine = engine(Arc::clone(&fetcher), 5);

    engine.run(BASE, ["7"]).await.unwrap();

    let calls = fetcher.calls_for("7");
    assert_eq!(calls.len(), 3);
    // Each gap is the backoff plus one fetch latency
    let first_gap = calls[1] - calls[0];
    let second_gap = calls[2] - calls[1];
    assert!(first_gap >= Duration::from_secs(1));
    assert!(first_gap < Duration::from_secs(3));
    assert!(second_gap >= Duration::from_secs(3));
    assert!(second_gap < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_success_on_first_try_makes_one_call() {
    let fetcher = ScriptedFetcher::always(200);
    let engine = engine(Arc::clone(&fetcher), 5);

    let report = engine.run(BASE, ["1"]).await.unwrap();

    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(report.calls, 1);
    assert_eq!(report.retried, 0);
    assert_eq!(report.get("1").unwrap().attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_200_success_status_is_retried() {
    let fetcher = ScriptedFetcher::always(204);
    let engine = engine(Arc::clone(&fetcher), 1);

    let report = engine.run(BASE, ["x"]).await.unwrap();

    assert_eq!(fetcher.total_calls(), 3);
    assert!(report.get("x").unwrap().outcome.is_failure());
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_retried_not_fatal() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10), |key, previous| {
        if previous < 2 {
            Err(FetchError::timeout(format!("{BASE}{key}")))
        } else {
            Ok(FetchResponse::new(200, "ok"))
        }
    });
    let engine = engine(Arc::clone(&fetcher), 2);

    let report = engine.run(BASE, ["a", "b"]).await.unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(fetcher.calls_for("a").len(), 3);
    assert_eq!(fetcher.calls_for("b").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_on_last_attempt_reports_error() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10), |key, _| {
        Err(FetchError::timeout(format!("{BASE}{key}")))
    });
    let engine = engine(fetcher, 1);

    let report = engine.run(BASE, ["9"]).await.unwrap();

    match &report.get("9").unwrap().outcome {
        ItemOutcome::Failed {
            last_status,
            last_error,
        } => {
            assert_eq!(*last_status, None);
            assert!(last_error.as_deref().unwrap().contains("timeout"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_policy_never_retries() {
    let fetcher = ScriptedFetcher::always(503);
    let engine = FetchEngine::new(
        EngineConfig {
            retry_policy: RetryPolicy::no_retry(),
            ..EngineConfig::default()
        },
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
    )
    .unwrap();

    let report = engine.run(BASE, ["1", "2"]).await.unwrap();

    assert_eq!(fetcher.total_calls(), 2);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.retried, 0);
}

// ==================== Dedup ====================

#[tokio::test(start_paused = true)]
async fn test_repeated_key_yields_one_outcome() {
    let fetcher = ScriptedFetcher::always(200);
    let engine = engine(Arc::clone(&fetcher), 5);

    let report = engine.run(BASE, ["1", "1", "1"]).await.unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(report.duplicates, 2);
    assert_eq!(fetcher.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_key_resubmitted_in_same_run_is_deduplicated() {
    let fetcher = ScriptedFetcher::always(500);
    let engine = FetchEngine::new(
        EngineConfig {
            concurrency: 1,
            retry_policy: fast_policy(2),
            ..EngineConfig::default()
        },
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
    )
    .unwrap();

    let mut session = engine.start(BASE, &CancellationToken::new());
    assert!(session.submit("7").await.unwrap());
    session.settled().await;
    assert!(!session.submit("7").await.unwrap());
    let report = session.finish().await.unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(fetcher.total_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_outcomes_match_distinct_keys() {
    // Odd keys fail once, multiples of 5 always fail
    let fetcher = ScriptedFetcher::new(Duration::from_millis(30), |key, previous| {
        let n: u32 = key.parse().unwrap();
        if n % 5 == 0 || (n % 2 == 1 && previous == 0) {
            Ok(FetchResponse::new(404, "nope"))
        } else {
            Ok(FetchResponse::new(200, key.to_string()))
        }
    });
    let engine = engine(Arc::clone(&fetcher), 5);

    let keys: Vec<String> = (0..200).map(|i| (i * 7 % 40).to_string()).collect();
    let distinct: HashSet<&String> = keys.iter().collect();

    let report = engine.run(BASE, keys.clone()).await.unwrap();

    assert_eq!(report.succeeded() + report.failed(), distinct.len());
    assert_eq!(report.len(), distinct.len());
    let reported: HashSet<&str> = report.items.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(reported.len(), report.len(), "a key was reported twice");
    assert_eq!(report.failed(), 8);
    assert!(!fetcher.overlapping_key.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_shared_registry_refetches_only_failed_keys() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10), |key, _| {
        if key == "7" {
            Ok(FetchResponse::new(500, ""))
        } else {
            Ok(FetchResponse::new(200, "ok"))
        }
    });
    let registry = Arc::new(DedupRegistry::new());
    let engine = FetchEngine::new(
        EngineConfig {
            retry_policy: fast_policy(2),
            ..EngineConfig::default()
        },
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
    )
    .unwrap()
    .with_registry(Arc::clone(&registry));

    let first = engine.run(BASE, ["7", "42"]).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(matches!(registry.state("7"), Some(EntryState::Failed(_))));

    let second = engine.run(BASE, ["7", "42"]).await.unwrap();
    assert_eq!(second.len(), 1);
    assert!(second.get("7").is_some());
    assert_eq!(second.duplicates, 1);
    assert_eq!(fetcher.calls_for("42").len(), 1);
    assert_eq!(fetcher.calls_for("7").len(), 4);
}

// ==================== Concurrency ====================

#[tokio::test(start_paused = true)]
async fn test_in_flight_fetches_never_exceed_concurrency() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(100), |_, previous| {
        if previous == 0 {
            Ok(FetchResponse::new(429, ""))
        } else {
            Ok(FetchResponse::new(200, "ok"))
        }
    });
    let engine = engine(Arc::clone(&fetcher), 5);

    let keys: Vec<String> = (0..60).map(|i| i.to_string()).collect();
    let report = engine.run(BASE, keys).await.unwrap();

    assert_eq!(report.succeeded(), 60);
    assert_eq!(fetcher.total_calls(), 120);
    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_single_worker_processes_everything() {
    let fetcher = ScriptedFetcher::always(200);
    let engine = engine(Arc::clone(&fetcher), 1);

    let keys: Vec<String> = (0..25).map(|i| i.to_string()).collect();
    let report = engine.run(BASE, keys).await.unwrap();

    assert_eq!(report.succeeded(), 25);
    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_larger_queue_capacity_has_same_results() {
    let fetcher = ScriptedFetcher::always(200);
    let engine = FetchEngine::new(
        EngineConfig::default().with_queue_capacity(64),
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
    )
    .unwrap();

    let keys: Vec<String> = (0..30).map(|i| i.to_string()).collect();
    let report = engine.run(BASE, keys).await.unwrap();

    assert_eq!(report.succeeded(), 30);
    assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 5);
}

#[tokio::test(start_paused = true)]
async fn test_pending_backoff_does_not_block_other_items() {
    // "slow" waits 10s between tries; "fast" must finish long before that
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10), |key, previous| {
        if key == "slow" && previous == 0 {
            Ok(FetchResponse::new(500, ""))
        } else {
            Ok(FetchResponse::new(200, key.to_string()))
        }
    });
    let engine = FetchEngine::new(
        EngineConfig {
            concurrency: 1,
            retry_policy: RetryPolicy::new(2, vec![Duration::from_secs(10)]).unwrap(),
            ..EngineConfig::default()
        },
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
    )
    .unwrap();

    let started = Instant::now();
    let report = engine.run(BASE, ["slow", "fast"]).await.unwrap();

    let fast_call = fetcher.calls_for("fast")[0];
    assert!(fast_call - started < Duration::from_secs(1));
    assert_eq!(report.items[0].key, "fast");
    assert_eq!(report.items[1].key, "slow");
}

#[tokio::test(start_paused = true)]
async fn test_empty_input_returns_empty_report() {
    let fetcher = ScriptedFetcher::always(200);
    let engine = engine(Arc::clone(&fetcher), 5);

    let report = engine.run(BASE, Vec::<String>::new()).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(fetcher.total_calls(), 0);
    assert!(!report.cancelled);
}

// ==================== Sessions and cancellation ====================

#[tokio::test(start_paused = true)]
async fn test_session_settles_between_submissions() {
    let fetcher = ScriptedFetcher::always(200);
    let engine = engine(Arc::clone(&fetcher), 2);

    let mut session = engine.start(BASE, &CancellationToken::new());
    assert_eq!(session.submit_all(["1", "2"]).await.unwrap(), 2);
    session.settled().await;
    assert_eq!(session.outstanding(), 0);
    assert_eq!(session.stats().succeeded(), 2);

    assert_eq!(session.submit_all(["2", "3"]).await.unwrap(), 1);
    let report = session.finish().await.unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_submit_after_close_is_rejected() {
    let engine = engine(ScriptedFetcher::always(200), 1);

    let mut session = engine.start(BASE, &CancellationToken::new());
    session.close_submissions();
    assert!(!session.is_open());
    assert!(matches!(
        session.submit("1").await,
        Err(EngineError::SubmissionsClosed)
    ));
    assert!(session.finish().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_reports_cancelled() {
    let fetcher = ScriptedFetcher::always(500);
    let engine = FetchEngine::new(
        EngineConfig {
            retry_policy: RetryPolicy::new(3, vec![Duration::from_secs(60)]).unwrap(),
            ..EngineConfig::default()
        },
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
    )
    .unwrap();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        });
    }

    let started = Instant::now();
    let report = engine
        .run_with_cancel(BASE, ["7"], &cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(report.cancelled);
    let item = report.get("7").unwrap();
    assert_eq!(item.outcome, ItemOutcome::Cancelled);
    assert_eq!(item.attempts, 1);
    assert_eq!(fetcher.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_reports_nothing_fetched() {
    let fetcher = ScriptedFetcher::always(200);
    let engine = engine(Arc::clone(&fetcher), 5);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine
        .run_with_cancel(BASE, ["1", "2"], &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(fetcher.total_calls(), 0);
    assert_eq!(report.succeeded(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_session_stops_workers() {
    let fetcher = ScriptedFetcher::new(Duration::from_secs(30), |_, _| {
        Ok(FetchResponse::new(200, ""))
    });
    let engine = engine(Arc::clone(&fetcher), 1);

    let mut session = engine.start(BASE, &CancellationToken::new());
    session.submit("1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(session);

    tokio::time::sleep(Duration::from_secs(1)).await;
    // Only this test and the engine still hold the fetcher once workers exit
    assert_eq!(Arc::strong_count(&fetcher), 2);
    assert_eq!(fetcher.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_key_fetched_again_by_later_run() {
    let fetcher = ScriptedFetcher::always(500);
    let registry = Arc::new(DedupRegistry::new());
    let engine = FetchEngine::new(
        EngineConfig {
            retry_policy: RetryPolicy::new(3, vec![Duration::from_secs(60)]).unwrap(),
            ..EngineConfig::default()
        },
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
    )
    .unwrap()
    .with_registry(Arc::clone(&registry));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        });
    }
    let first = engine
        .run_with_cancel(BASE, ["7"], &cancel)
        .await
        .unwrap();
    assert_eq!(first.get("7").unwrap().outcome, ItemOutcome::Cancelled);
    assert_eq!(registry.state("7"), None);

    let second = engine.run(BASE, ["7"]).await.unwrap();

    assert_eq!(second.len(), 1);
    assert_eq!(second.duplicates, 0);
    assert!(second.get("7").unwrap().outcome.is_failure());
    assert_eq!(fetcher.total_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_item_reports_stream_before_finish() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10), |key, _| {
        if key == "slow" {
            Ok(FetchResponse::new(500, ""))
        } else {
            Ok(FetchResponse::new(200, key.to_string()))
        }
    });
    let engine = engine(Arc::clone(&fetcher), 2);

    let mut session = engine.start(BASE, &CancellationToken::new());
    let mut feed = session.take_item_reports().unwrap();
    assert!(session.take_item_reports().is_none());
    session.submit_all(["fast", "slow"]).await.unwrap();

    // "slow" is still in backoff when "fast" arrives
    let first = feed.recv().await.unwrap();
    assert_eq!(first.key, "fast");
    assert_eq!(session.stats().failed(), 0);

    let report = session.finish().await.unwrap();
    let second = feed.recv().await.unwrap();
    assert_eq!(second.key, "slow");
    assert!(second.outcome.is_failure());
    assert!(feed.recv().await.is_none());
    assert_eq!(report.len(), 2);
}
