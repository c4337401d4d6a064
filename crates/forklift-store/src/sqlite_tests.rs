use super::*;
use crate::clock::ManualClock;
use tempfile::TempDir;

#[tokio::test]
async fn test_sqlite_list_roundtrip() {
    let store = SqliteKvStore::in_memory().await.unwrap();
    store.list_push("ready", "a").await.unwrap();
    store.list_push("ready", "b").await.unwrap();

    assert_eq!(store.list_len("ready").await.unwrap(), 2);
    assert_eq!(store.list_pop("ready", 1).await.unwrap(), vec!["a"]);
    assert_eq!(store.list_pop("ready", 10).await.unwrap(), vec!["b"]);
    assert_eq!(store.list_len("ready").await.unwrap(), 0);
}

#[tokio::test]
async fn test_sqlite_lists_are_isolated_by_key() {
    let store = SqliteKvStore::in_memory().await.unwrap();
    store.list_push("jobs:ready", "j").await.unwrap();
    store.list_push("alerts:ready", "a").await.unwrap();

    assert_eq!(store.list_pop("jobs:ready", 10).await.unwrap(), vec!["j"]);
    assert_eq!(store.list_len("alerts:ready").await.unwrap(), 1);
}

#[tokio::test]
async fn test_sqlite_list_move() {
    let store = SqliteKvStore::in_memory().await.unwrap();
    store.list_push("dead", "x").await.unwrap();
    store.list_push("dead", "y").await.unwrap();

    let moved = store.list_move("dead", "ready", 1).await.unwrap();
    assert_eq!(moved, vec!["x"]);
    assert_eq!(store.list_len("dead").await.unwrap(), 1);
    assert_eq!(store.list_len("ready").await.unwrap(), 1);
}

#[tokio::test]
async fn test_sqlite_zset_move_due() {
    let store = SqliteKvStore::in_memory().await.unwrap();
    store.zset_add("sched", 30, "c").await.unwrap();
    store.zset_add("sched", 10, "a").await.unwrap();
    store.zset_add("sched", 20, "b").await.unwrap();

    let moved = store.zset_move_due("sched", "ready", 20, 10).await.unwrap();
    assert_eq!(moved, vec!["a", "b"]);
    assert_eq!(store.zset_len("sched").await.unwrap(), 1);
    assert_eq!(store.list_pop("ready", 10).await.unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_sqlite_zset_add_upserts() {
    let store = SqliteKvStore::in_memory().await.unwrap();
    store.zset_add("sched", 1_000, "m").await.unwrap();
    store.zset_add("sched", 5, "m").await.unwrap();

    assert_eq!(store.zset_len("sched").await.unwrap(), 1);
    assert_eq!(
        store.zset_move_due("sched", "ready", 5, 1).await.unwrap(),
        vec!["m"]
    );
}

#[tokio::test]
async fn test_sqlite_ttl_values() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = SqliteKvStore::in_memory()
        .await
        .unwrap()
        .with_clock(clock.clone());
    let ttl = Duration::from_secs(10);

    assert!(store.set_if_absent("lock:a", "t1", ttl).await.unwrap());
    assert!(!store.set_if_absent("lock:a", "t2", ttl).await.unwrap());
    assert!(store.exists("lock:a").await.unwrap());

    clock.advance(Duration::from_secs(11));
    assert!(!store.exists("lock:a").await.unwrap());
    assert!(store.set_if_absent("lock:a", "t2", ttl).await.unwrap());

    assert!(!store.delete_if_equals("lock:a", "t1").await.unwrap());
    assert!(store.delete_if_equals("lock:a", "t2").await.unwrap());
    assert!(!store.exists("lock:a").await.unwrap());
}

#[tokio::test]
async fn test_sqlite_set_with_ttl_overwrites() {
    let store = SqliteKvStore::in_memory().await.unwrap();
    store
        .set_with_ttl("dedup:f", "first", Duration::from_secs(60))
        .await
        .unwrap();
    store
        .set_with_ttl("dedup:f", "second", Duration::from_secs(60))
        .await
        .unwrap();

    assert!(!store.delete_if_equals("dedup:f", "first").await.unwrap());
    assert!(store.delete_if_equals("dedup:f", "second").await.unwrap());
}

#[tokio::test]
async fn test_sqlite_file_shared_between_handles() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("queue.db");

    let writer = SqliteKvStore::open(&path).await.unwrap();
    let reader = SqliteKvStore::open(&path).await.unwrap();

    writer.list_push("ready", "shared").await.unwrap();
    assert_eq!(reader.list_pop("ready", 1).await.unwrap(), vec!["shared"]);
    assert_eq!(writer.list_len("ready").await.unwrap(), 0);
}

async fn value_rows(store: &SqliteKvStore) -> i64 {
    store
        .conn
        .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM kv_value", [], |row| row.get(0))?))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sqlite_expired_values_are_purged_on_write() {
    let clock = Arc::new(ManualClock::starting_now());
    let store = SqliteKvStore::in_memory()
        .await
        .unwrap()
        .with_clock(clock.clone());

    for n in 0..500 {
        store
            .set_with_ttl(&format!("dedup:{n}"), "id", Duration::from_secs(60))
            .await
            .unwrap();
    }
    store
        .set_with_ttl("dedup:live", "id", Duration::from_secs(7200))
        .await
        .unwrap();
    assert_eq!(value_rows(&store).await, 501);

    clock.advance(Duration::from_secs(3600));
    store
        .set_with_ttl("dedup:new", "id", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(value_rows(&store).await, 2);

    clock.advance(Duration::from_secs(61));
    assert!(store.set_if_absent("lock:jobs", "t", Duration::from_secs(60)).await.unwrap());
    assert_eq!(value_rows(&store).await, 2);
    assert!(store.exists("dedup:live").await.unwrap());
}
