use super::*;
use forklift_store::{ManualClock, MemoryKvStore};
use serde_json::json;

fn engine() -> (QueueEngine, Arc<MemoryKvStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryKvStore::with_clock(clock.clone()));
    let engine = QueueEngine::new(store.clone(), clock.clone());
    (engine, store, clock)
}

#[tokio::test]
async fn test_enqueue_due_now_goes_to_ready() {
    let (engine, _, _) = engine();
    let envelope = engine
        .enqueue("jobs", "webhook", json!({"url": "http://x"}), EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(envelope.attempts, 0);
    assert_eq!(envelope.max_retries, 3);
    assert_eq!(envelope.fingerprint, fingerprint("jobs", "webhook", &json!({"url": "http://x"})));

    let stats = engine.stats("jobs").await.unwrap();
    assert_eq!(stats, QueueStats { ready: 1, scheduled: 0, dead: 0 });
}

#[tokio::test]
async fn test_enqueue_with_delay_goes_to_scheduled() {
    let (engine, _, clock) = engine();
    let envelope = engine
        .enqueue(
            "jobs",
            "alert",
            json!({"message": "later"}),
            EnqueueOptions::delayed(Duration::from_secs(30)),
        )
        .await
        .unwrap();

    assert!(envelope.due_at > clock.now());
    let stats = engine.stats("jobs").await.unwrap();
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.ready, 0);
}

#[tokio::test]
async fn test_enqueue_explicit_due_at_wins() {
    let (engine, _, clock) = engine();
    let at = clock.now() + chrono::TimeDelta::seconds(5);
    let options = EnqueueOptions {
        delay: Some(Duration::from_secs(3600)),
        due_at: Some(at),
        ..Default::default()
    };
    let envelope = engine.enqueue("jobs", "alert", json!({}), options).await.unwrap();
    assert_eq!(envelope.due_at, at);

    clock.advance(Duration::from_secs(5));
    assert_eq!(engine.flush_due("jobs", 10).await.unwrap(), 1);
}

#[tokio::test]
async fn test_enqueue_past_due_at_goes_to_ready() {
    let (engine, _, clock) = engine();
    let options = EnqueueOptions {
        due_at: Some(clock.now() - chrono::TimeDelta::seconds(5)),
        ..Default::default()
    };
    engine.enqueue("jobs", "alert", json!({}), options).await.unwrap();
    assert_eq!(engine.stats("jobs").await.unwrap().ready, 1);
}

#[tokio::test]
async fn test_enqueue_overrides() {
    let (engine, _, _) = engine();
    let options = EnqueueOptions {
        fingerprint: Some("order-42".to_string()),
        max_retries: Some(7),
        ..Default::default()
    };
    let envelope = engine.enqueue("jobs", "webhook", json!({}), options).await.unwrap();
    assert_eq!(envelope.fingerprint, "order-42");
    assert_eq!(envelope.max_retries, 7);
}

#[tokio::test]
async fn test_enqueue_rejects_bad_input() {
    let (engine, _, _) = engine();
    let err = engine
        .enqueue("no spaces", "webhook", json!({}), EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidQueueName(_)));

    let err = engine
        .enqueue("jobs", "  ", json!({}), EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_enqueue_duplicate_is_still_inserted() {
    let (engine, _, _) = engine();
    let first = engine
        .enqueue("jobs", "webhook", json!({"n": 1}), EnqueueOptions::default())
        .await
        .unwrap();
    engine.mark_completed(&first).await.unwrap();

    engine
        .enqueue("jobs", "webhook", json!({"n": 1}), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(engine.stats("jobs").await.unwrap().ready, 2);
    assert!(engine.is_duplicate("jobs", "webhook", &json!({"n": 1})).await.unwrap());
}

#[tokio::test]
async fn test_pop_respects_count() {
    let (engine, _, _) = engine();
    for n in 0..5 {
        engine
            .enqueue("jobs", "alert", json!({ "n": n }), EnqueueOptions::default())
            .await
            .unwrap();
    }

    let batch = engine.pop("jobs", 3).await.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(engine.stats("jobs").await.unwrap().ready, 2);
    assert!(engine.pop("jobs", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pop_moves_unreadable_entries_to_dead() {
    let (engine, store, _) = engine();
    store.list_push("forklift:q:jobs:ready", "{not json").await.unwrap();
    engine
        .enqueue("jobs", "alert", json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    let batch = engine.pop("jobs", 10).await.unwrap();
    assert_eq!(batch.len(), 1);

    let stats = engine.stats("jobs").await.unwrap();
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.ready, 0);
    let dead = store.list_pop("forklift:q:jobs:dead", 1).await.unwrap();
    assert_eq!(dead, vec!["{not json"]);
}

#[tokio::test]
async fn test_flush_due_limit() {
    let (engine, _, clock) = engine();
    for n in 0..4 {
        engine
            .enqueue(
                "jobs",
                "alert",
                json!({ "n": n }),
                EnqueueOptions::delayed(Duration::from_secs(10)),
            )
            .await
            .unwrap();
    }

    assert_eq!(engine.flush_due("jobs", 10).await.unwrap(), 0);
    clock.advance(Duration::from_secs(10));
    assert_eq!(engine.flush_due("jobs", 3).await.unwrap(), 3);
    assert_eq!(engine.flush_due("jobs", 0).await.unwrap(), 0);
    assert_eq!(engine.flush_due("jobs", 3).await.unwrap(), 1);

    let stats = engine.stats("jobs").await.unwrap();
    assert_eq!(stats.ready, 4);
    assert_eq!(stats.scheduled, 0);
}

#[tokio::test]
async fn test_retry_reschedules_with_backoff() {
    let (engine, _, clock) = engine();
    let engine = engine.with_defaults(QueueConfig {
        max_retries: 3,
        retry_delay_secs: 10,
        max_retry_delay_secs: 15,
        dedup_ttl_secs: 60,
    });
    engine
        .enqueue("jobs", "webhook", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let envelope = engine.pop("jobs", 1).await.unwrap().remove(0);
    let id = envelope.id;
    let created_at = envelope.created_at;

    let start = clock.now();
    let resolution = engine
        .retry_or_deadletter(envelope, Failure::retryable("HTTP 500"))
        .await
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::Rescheduled {
            due_at: start + chrono::TimeDelta::seconds(10),
            attempts: 1,
        }
    );

    clock.advance(Duration::from_secs(10));
    engine.flush_due("jobs", 10).await.unwrap();
    let envelope = engine.pop("jobs", 1).await.unwrap().remove(0);
    assert_eq!(envelope.id, id);
    assert_eq!(envelope.attempts, 1);
    assert_eq!(envelope.last_error.as_deref(), Some("HTTP 500"));
    assert_eq!(envelope.created_at, created_at);
    assert!(envelope.due_at > envelope.created_at);

    // Second delay is capped at 15s instead of 20s.
    let resolution = engine
        .retry_or_deadletter(envelope, Failure::retryable("HTTP 502"))
        .await
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::Rescheduled {
            due_at: clock.now() + chrono::TimeDelta::seconds(15),
            attempts: 2,
        }
    );
}

#[tokio::test]
async fn test_retry_exhausted_dead_letters() {
    let (engine, _, _) = engine();
    let options = EnqueueOptions {
        max_retries: Some(1),
        ..Default::default()
    };
    engine.enqueue("jobs", "webhook", json!({}), options).await.unwrap();
    let envelope = engine.pop("jobs", 1).await.unwrap().remove(0);

    let resolution = engine
        .retry_or_deadletter(envelope, Failure::retryable("boom"))
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::DeadLettered { attempts: 1 });
    assert_eq!(resolution.state(), crate::MessageState::Dead);

    let stats = engine.stats("jobs").await.unwrap();
    assert_eq!(stats, QueueStats { ready: 0, scheduled: 0, dead: 1 });
}

#[tokio::test]
async fn test_terminal_failure_keeps_attempts() {
    let (engine, store, _) = engine();
    engine
        .enqueue("jobs", "nope", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let envelope = engine.pop("jobs", 1).await.unwrap().remove(0);

    let resolution = engine
        .retry_or_deadletter(envelope, Failure::terminal("unknown job type: nope"))
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::DeadLettered { attempts: 0 });

    let raw = store.list_pop("forklift:q:jobs:dead", 1).await.unwrap();
    let dead = Envelope::decode(&raw[0]).unwrap();
    assert_eq!(dead.attempts, 0);
    assert_eq!(dead.last_error.as_deref(), Some("unknown job type: nope"));
}

#[tokio::test]
async fn test_retry_deadletter_zero_and_empty() {
    let (engine, _, _) = engine();
    assert_eq!(engine.retry_deadletter("jobs", 0).await.unwrap(), 0);
    assert_eq!(engine.retry_deadletter("jobs", 5).await.unwrap(), 0);
}

#[tokio::test]
async fn test_mark_completed_respects_ttl() {
    let (engine, _, clock) = engine();
    let engine = engine.with_queue_config(
        "short",
        QueueConfig {
            dedup_ttl_secs: 30,
            ..Default::default()
        },
    );
    let envelope = engine
        .enqueue("short", "alert", json!({"m": 1}), EnqueueOptions::default())
        .await
        .unwrap();

    assert!(!engine.is_duplicate_fingerprint(&envelope.fingerprint).await.unwrap());
    assert_eq!(engine.mark_completed(&envelope).await.unwrap(), Resolution::Dropped);
    assert!(engine.is_duplicate_fingerprint(&envelope.fingerprint).await.unwrap());

    clock.advance(Duration::from_secs(31));
    assert!(!engine.is_duplicate_fingerprint(&envelope.fingerprint).await.unwrap());
}

#[tokio::test]
async fn test_mark_completed_with_zero_ttl_records_nothing() {
    let (engine, _, _) = engine();
    let engine = engine.with_defaults(QueueConfig {
        dedup_ttl_secs: 0,
        ..Default::default()
    });
    let envelope = engine
        .enqueue("jobs", "alert", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    engine.mark_completed(&envelope).await.unwrap();
    assert!(!engine.is_duplicate("jobs", "alert", &json!({})).await.unwrap());
}

#[tokio::test]
async fn test_key_prefix_isolates_engines() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryKvStore::with_clock(clock.clone()));
    let a = QueueEngine::new(store.clone(), clock.clone()).with_key_prefix("a");
    let b = QueueEngine::new(store.clone(), clock.clone()).with_key_prefix("b");

    a.enqueue("jobs", "alert", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(a.stats("jobs").await.unwrap().ready, 1);
    assert_eq!(b.stats("jobs").await.unwrap().ready, 0);
}

#[tokio::test]
async fn test_from_config() {
    let config = forklift_config::ConfigLoader::load_str(
        r#"
        [store]
        key_prefix = "wh"

        [queue]
        max_retries = 5

        [queues.webhooks]
        max_retries = 9
        "#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(MemoryKvStore::with_clock(clock.clone()));
    let engine = QueueEngine::from_config(store.clone(), clock, &config);

    assert_eq!(engine.keys().prefix(), "wh");
    assert_eq!(engine.queue_config("jobs").max_retries, 5);
    assert_eq!(engine.queue_config("webhooks").max_retries, 9);

    engine
        .enqueue("webhooks", "webhook", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    assert_eq!(store.list_len("wh:q:webhooks:ready").await.unwrap(), 1);
}

#[tokio::test]
async fn test_store_offline_surfaces_errors() {
    let (engine, store, _) = engine();
    store.set_offline(true);

    let err = engine
        .enqueue("jobs", "alert", json!({}), EnqueueOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(engine.pop("jobs", 1).await.is_err());
    assert!(engine.flush_due("jobs", 1).await.is_err());
    assert!(engine.stats("jobs").await.is_err());
}

#[test]
fn test_backoff() {
    let config = QueueConfig {
        retry_delay_secs: 30,
        max_retry_delay_secs: 3600,
        ..Default::default()
    };
    assert_eq!(backoff(&config, 1), Duration::from_secs(30));
    assert_eq!(backoff(&config, 2), Duration::from_secs(60));
    assert_eq!(backoff(&config, 3), Duration::from_secs(120));
    assert_eq!(backoff(&config, 10), Duration::from_secs(3600));
    assert_eq!(backoff(&config, u32::MAX), Duration::from_secs(3600));

    let mut previous = Duration::ZERO;
    for attempt in 1..40 {
        let delay = backoff(&config, attempt);
        assert!(delay >= previous);
        previous = delay;
    }
}

#[test]
fn test_backoff_floor() {
    let config = QueueConfig {
        retry_delay_secs: 0,
        max_retry_delay_secs: 0,
        ..Default::default()
    };
    assert_eq!(backoff(&config, 1), Duration::from_secs(1));
}
