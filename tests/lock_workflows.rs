//! Integration tests for common locking workflows.
//!
//! These run the full protocol against the in-memory store on a paused
//! tokio clock, so TTLs and deadlines elapse instantly.

use distlock::prelude::*;
use distlock::{Script, ScriptCache};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const TTL: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

struct Cluster {
    store: Arc<MemoryStore>,
    scripts: Arc<ScriptCache>,
}

impl Cluster {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            scripts: Arc::new(ScriptCache::new()),
        }
    }

    /// A new holder of `name`, as if from another process
    fn handle(&self, name: &str) -> LockHandle {
        LockBuilder::new(name)
            .namespace("workflows")
            .with_ttl(TTL)
            .poll_period(Duration::from_millis(100))
            .script_cache(self.scripts.clone())
            .build(self.store.clone())
            .unwrap()
    }

    /// Like [`Cluster::handle`], with scripts registered up front
    async fn connect_handle(&self, name: &str) -> LockHandle {
        LockBuilder::new(name)
            .namespace("workflows")
            .with_ttl(TTL)
            .script_cache(self.scripts.clone())
            .connect(self.store.clone())
            .await
            .unwrap()
    }
}

// =============================================================================
// Mutual Exclusion
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_one_concurrent_locker_wins() {
    let cluster = Cluster::new();
    let handles: Vec<_> = (0..16).map(|_| cluster.handle("report")).collect();

    let tasks: Vec<_> = handles
        .iter()
        .cloned()
        .map(|lock| tokio::spawn(async move { lock.try_lock().await }))
        .collect();

    let mut owners = 0;
    for task in tasks {
        let status = task.await.unwrap().unwrap();
        assert!(status.is_locked);
        if status.is_owner {
            owners += 1;
        }
    }

    assert_eq!(owners, 1);
}

#[tokio::test]
async fn test_lock_then_unlock() {
    let cluster = Cluster::new();
    let lock = cluster.handle("report");

    assert_eq!(lock.try_lock().await.unwrap(), LockStatus::owned());

    let status = lock.try_unlock().await.unwrap();
    assert!(!status.is_locked);
    assert!(status.is_owner);

    assert!(!lock.get_lock_status().await.unwrap().is_locked);
}

#[tokio::test]
async fn test_unlock_of_free_lock() {
    let cluster = Cluster::new();
    let lock = cluster.handle("report");

    assert_eq!(lock.try_unlock().await.unwrap(), LockStatus::unlocked());
}

#[tokio::test]
async fn test_non_owner_unlock_leaves_record() {
    let cluster = Cluster::new();
    let owner = cluster.handle("report");
    let intruder = cluster.handle("report");

    owner.try_lock().await.unwrap();

    let status = intruder.try_unlock().await.unwrap();
    assert!(status.is_contested());

    assert_eq!(owner.get_lock_status().await.unwrap(), LockStatus::owned());
}

#[tokio::test]
async fn test_failed_try_lock_still_reports_locked() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    let status = b.try_lock().await.unwrap();
    assert!(status.is_locked);
    assert!(!status.is_owner);
}

#[tokio::test]
async fn test_locks_on_different_names_are_independent() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("billing");

    assert!(a.try_lock().await.unwrap().is_owner);
    assert!(b.try_lock().await.unwrap().is_owner);
}

// =============================================================================
// Expiry and Keep-Alive
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_lock_expires_without_keep_alive() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let observer = cluster.handle("report");

    a.try_lock().await.unwrap();
    assert!(observer.get_lock_status().await.unwrap().is_contested());

    tokio::time::sleep(TTL).await;

    assert!(!observer.get_lock_status().await.unwrap().is_locked);
    assert!(!a.get_lock_status().await.unwrap().is_locked);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_holds_lock_across_cycles() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(a.keep_alive().await.unwrap(), LockStatus::owned());
        assert!(!b.try_lock().await.unwrap().is_owner);
    }

    // 12s in, well past a single TTL
    assert_eq!(a.get_lock_status().await.unwrap(), LockStatus::owned());

    tokio::time::sleep(TTL).await;
    assert!(!a.get_lock_status().await.unwrap().is_locked);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_after_expiry_reports_free() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");

    a.try_lock().await.unwrap();
    tokio::time::sleep(TTL).await;

    assert_eq!(a.keep_alive().await.unwrap(), LockStatus::unlocked());
}

#[tokio::test]
async fn test_keep_alive_by_non_owner_is_refused() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    assert!(b.keep_alive().await.unwrap().is_contested());
}

// =============================================================================
// Forced Takeover
// =============================================================================

#[tokio::test]
async fn test_force_lock_takes_over_from_holder() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    assert_eq!(b.try_force_lock().await.unwrap(), LockStatus::owned());

    // The previous holder is now contested
    assert!(a.try_unlock().await.unwrap().is_contested());
    assert!(a.keep_alive().await.unwrap().is_contested());
    assert_eq!(b.get_lock_status().await.unwrap(), LockStatus::owned());
}

#[tokio::test]
async fn test_force_lock_on_free_key() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");

    assert_eq!(a.try_force_lock().await.unwrap(), LockStatus::owned());
}

// =============================================================================
// Waiting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_returns_when_holder_unlocks() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    let start = Instant::now();
    let waiter = tokio::spawn({
        let b = b.clone();
        async move { b.wait_until_unlock(start + Duration::from_secs(10)).await }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    let status = a.try_unlock().await.unwrap();
    assert!(status.is_owner);

    waiter.await.unwrap().unwrap();

    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(2));
    assert!(waited < Duration::from_millis(2200), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_immediately_when_free() {
    let cluster = Cluster::new();
    let b = cluster.handle("report");

    let start = Instant::now();
    b.wait_until_unlock(start + Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_wait_exceeds_deadline_while_held() {
    let cluster = Cluster::new();
    let a = LockBuilder::new("report")
        .namespace("workflows")
        .with_ttl(Duration::from_secs(60))
        .script_cache(cluster.scripts.clone())
        .build(cluster.store.clone())
        .unwrap();
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    let err = b
        .wait_until_unlock(Instant::now() + Duration::from_secs(3))
        .await
        .unwrap_err();
    assert!(err.is_deadline_exceeded());

    // The waiter never disturbed the holder
    assert_eq!(a.get_lock_status().await.unwrap(), LockStatus::owned());
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_after_expiry() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    let start = Instant::now();
    b.wait_until_unlock(start + Duration::from_secs(30))
        .await
        .unwrap();

    assert!(start.elapsed() >= TTL);
    assert!(start.elapsed() < TTL + Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_wait_surfaces_store_errors() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();
    b.preload_scripts().await.unwrap();
    cluster.store.fail_next_calls(1);

    let err = b
        .wait_until_unlock(Instant::now() + Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(err.is_store_error());
}

#[tokio::test(start_paused = true)]
async fn test_poll_until_lock_expires() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let observer = cluster.handle("report");

    a.try_lock().await.unwrap();

    let start = Instant::now();
    let mut polls = 0;
    poll_until(&observer, Duration::from_secs(1), |status| {
        polls += 1;
        Ok(if status.is_ok_and(|s| s.is_free()) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        })
    })
    .await
    .unwrap();

    assert_eq!(start.elapsed(), TTL);
    assert_eq!(polls, 6);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_ownership_after_takeover() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();

    let watcher = tokio::spawn({
        let a = a.clone();
        async move {
            wait_for_status(
                &a,
                Duration::from_millis(250),
                Instant::now() + Duration::from_secs(3),
                |status| status.is_contested(),
            )
            .await
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    b.try_force_lock().await.unwrap();

    assert!(watcher.await.unwrap().unwrap().is_contested());
}

// =============================================================================
// Guards
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout_waits_for_release() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    let guard = a.try_acquire().await.unwrap().expect("free lock");
    assert!(b.try_acquire().await.unwrap().is_none());

    let release = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        guard.release().await
    });

    let guard = b.acquire_timeout(Duration::from_secs(3)).await.unwrap();
    assert_eq!(guard.lock().owner_id(), b.owner_id());
    assert!(release.await.unwrap().unwrap().is_owner);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout_gives_up() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    let _guard = a.try_acquire().await.unwrap().expect("free lock");

    let err = b
        .acquire_timeout(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_deadline_exceeded());
}

#[tokio::test(start_paused = true)]
async fn test_guard_releases_on_drop() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let observer = cluster.handle("report");

    {
        let _guard = a.try_acquire().await.unwrap().expect("free lock");
        assert!(observer.get_lock_status().await.unwrap().is_contested());
    }

    // The release runs on a spawned task
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(observer.get_lock_status().await.unwrap().is_free());
}

// =============================================================================
// Script Recovery
// =============================================================================

#[tokio::test]
async fn test_scripts_recover_after_store_flush() {
    let cluster = Cluster::new();
    let a = cluster.connect_handle("report").await;

    a.try_lock().await.unwrap();
    cluster.store.flush_scripts();

    assert_eq!(a.keep_alive().await.unwrap(), LockStatus::owned());
    assert!(a.try_unlock().await.unwrap().is_owner);
    assert!(!a.get_lock_status().await.unwrap().is_locked);
}

#[tokio::test]
async fn test_scripts_load_once_per_cache() {
    let cluster = Cluster::new();
    let a = cluster.handle("report");
    let b = cluster.handle("report");

    a.try_lock().await.unwrap();
    b.try_unlock().await.unwrap();
    a.try_unlock().await.unwrap();
    a.try_lock().await.unwrap();
    a.keep_alive().await.unwrap();
    b.keep_alive().await.unwrap();

    assert_eq!(cluster.store.script_loads(), 2);
    assert!(cluster.scripts.cached(Script::Unlock).await.is_some());
    assert!(cluster.scripts.cached(Script::KeepAlive).await.is_some());
}
