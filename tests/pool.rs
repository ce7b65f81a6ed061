//! End-to-end scenarios against the mock driver, one per spec.md §8 example.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use poolkeeper::{CallerContext, ConnectionConfig, Error, OpenSpec, Pool, PoolOptions};

use common::MockConnection;

fn open_spec(url: &str, auto_commit: bool) -> OpenSpec {
    OpenSpec {
        url: url.to_string(),
        properties: vec![],
        config: ConnectionConfig { auto_commit, ..Default::default() },
    }
}

#[tokio::test]
async fn cold_start_single_borrow() {
    let url = "mock://cold-start";
    common::register(url);
    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new().min_connections(0).max_connections(1).connection_timeout(Duration::from_secs(5)),
        open_spec(url, true),
    );

    let conn = pool.acquire().await.expect("borrow should succeed");
    let size = pool.size();
    assert_eq!(size.total, 1);
    assert_eq!(size.available, 0);
    assert_eq!(size.active, 1);

    conn.close().await.expect("close without pending transaction must not error");
    tokio::task::yield_now().await;

    let size = pool.size();
    assert_eq!(size.total, 1);
    assert_eq!(size.available, 1);
    assert_eq!(size.active, 0);
    assert_eq!(size.churn_count, 0);
}

#[tokio::test]
async fn exhaustion_restores_demand_on_timeout() {
    let url = "mock://exhaustion";
    common::register(url);
    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new().max_connections(1).connection_timeout(Duration::from_millis(150)),
        open_spec(url, true),
    );

    let held = pool.acquire().await.expect("first borrow succeeds");
    assert_eq!(pool.size().active, 1);

    let start = std::time::Instant::now();
    let second = pool.acquire().await;
    assert!(matches!(second, Err(Error::ConnectionTimeout)), "borrow B must time out while A holds the only connection");
    assert!(start.elapsed() >= Duration::from_millis(140), "must not fail before connection_timeout elapses");

    // A is unaffected, and failed demand doesn't leak: a fresh borrow after
    // A releases should succeed immediately from the available queue.
    held.close().await.unwrap();
    tokio::task::yield_now().await;
    let size = pool.size();
    assert_eq!(size.total, 1);
    assert_eq!(size.available, 1);
}

#[tokio::test]
async fn forced_rollback_on_close_with_pending_transaction() {
    let url = "mock://forced-rollback";
    let control = common::register(url);
    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new().max_connections(1).connection_timeout(Duration::from_secs(5)),
        open_spec(url, false),
    );

    let conn = pool.acquire().await.unwrap();
    let stmt = conn.prepare("UPDATE t SET x = 1").await.unwrap();
    conn.execute_update(stmt).await.unwrap();

    let result = conn.close().await;
    assert!(matches!(result, Err(Error::UncommittedTransactionForcedRollback)));
    assert_eq!(control.rollbacks.load(Ordering::Acquire), 1, "rollback must be invoked exactly once");
    tokio::task::yield_now().await;

    // The connection itself was fine (no Communication/System error), so it
    // goes back to the available queue rather than being retired.
    let size = pool.size();
    assert_eq!(size.available, 1);
    assert_eq!(size.churn_count, 0);
}

#[tokio::test]
async fn reentrant_borrow_shares_connection_and_only_outermost_close_rolls_back() {
    let url = "mock://reentrant";
    let control = common::register(url);
    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new().max_connections(1).connection_timeout(Duration::from_secs(5)),
        open_spec(url, false),
    );

    let ctx = CallerContext::new();
    let outer = pool.acquire_with(&ctx).await.unwrap();
    let inner = pool.acquire_with(&ctx).await.unwrap();

    // Reentrancy invariant (spec.md §8): a nested borrow on the same caller
    // context shares the connection rather than opening a second one.
    assert_eq!(control.opens_succeeded.load(Ordering::Acquire), 1);
    assert_eq!(pool.size().active, 1);

    let stmt = inner.prepare("UPDATE t SET x = 1").await.unwrap();
    inner.execute_update(stmt).await.unwrap();

    // Closing the inner (non-outermost) handle must not touch the pending
    // transaction: the connection is still checked out by `outer`.
    let inner_result = inner.close().await;
    assert!(inner_result.is_ok(), "closing a nested handle must not force a rollback");
    assert_eq!(control.rollbacks.load(Ordering::Acquire), 0, "inner close must not roll back the outer caller's pending work");
    assert_eq!(pool.size().active, 1, "the shared connection is still checked out by the outer handle");

    // Closing the outermost handle is where the forced rollback finally happens.
    let outer_result = outer.close().await;
    assert!(matches!(outer_result, Err(Error::UncommittedTransactionForcedRollback)));
    assert_eq!(control.rollbacks.load(Ordering::Acquire), 1, "rollback must be invoked exactly once, on outermost close");
    tokio::task::yield_now().await;

    let size = pool.size();
    assert_eq!(size.available, 1);
    assert_eq!(size.churn_count, 0);
}

#[tokio::test]
async fn churn_on_communication_error() {
    let url = "mock://churn";
    let control = common::register(url);
    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new().min_connections(0).max_connections(2).connection_timeout(Duration::from_secs(5)),
        open_spec(url, true),
    );

    let conn = pool.acquire().await.unwrap();
    assert_eq!(control.opens_succeeded.load(Ordering::Acquire), 1);

    let stmt = conn.prepare("ERR:08003").await.unwrap();
    let err = conn.execute_update(stmt).await.unwrap_err();
    assert!(err.poisons_connection(), "state code 08003 must classify as Communication");

    conn.close().await.unwrap();
    tokio::task::yield_now().await;
    assert_eq!(pool.size().churn_count, 1);
    assert_eq!(control.closes.load(Ordering::Acquire), 1, "the poisoned connection must be physically closed");

    // The next borrow must come from a freshly opened physical connection,
    // not the retired one: a second successful open is required.
    let next = wait_for_acquire(&pool, Duration::from_secs(2)).await;
    assert_eq!(control.opens_succeeded.load(Ordering::Acquire), 2, "the retired connection must be replenished by a fresh open");
    next.close().await.unwrap();
}

#[tokio::test]
async fn backoff_is_monotone_and_bounded() {
    let url = "mock://backoff";
    let control = common::register(url);
    control.fail_opens_remaining.store(3, Ordering::Release);

    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new()
            .min_connections(1)
            .max_connections(2)
            .backoff_base(Duration::from_millis(40))
            .backoff_multiplier(2)
            .backoff_limit(Duration::from_millis(200)),
        open_spec(url, true),
    );

    // Wait for the opener to fight through the simulated failures.
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while pool.size().total == 0 {
        assert!(std::time::Instant::now() < deadline, "opener never succeeded after backoff");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let attempts = control.attempt_times.lock().unwrap().clone();
    assert!(attempts.len() >= 4, "expected 3 failures + 1 success, got {}", attempts.len());

    // Gaps between successive attempts must be non-decreasing (until the
    // configured limit) and never exceed backoff_limit by more than slack
    // for scheduling jitter.
    let mut prev_gap = Duration::ZERO;
    for window in attempts.windows(2) {
        let gap = window[1].duration_since(window[0]);
        assert!(
            gap + Duration::from_millis(20) >= prev_gap,
            "backoff must not shrink between attempts: {:?} then {:?}",
            prev_gap,
            gap
        );
        assert!(gap <= Duration::from_millis(200) + Duration::from_millis(50), "backoff exceeded backoff_limit: {:?}", gap);
        prev_gap = gap;
    }
}

#[tokio::test]
async fn pruning_converges_to_high_water_mark_not_below() {
    let url = "mock://pruning";
    common::register(url);
    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .connection_timeout(Duration::from_secs(5))
            .inactivity_timeout(Duration::from_millis(120))
            .prune_interval(Duration::from_millis(30)),
        open_spec(url, true),
    );

    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.acquire().await.unwrap());
    }
    assert_eq!(pool.size().active, 4);

    for conn in held {
        conn.close().await.unwrap();
    }

    // Give the pruner exactly one full window to converge. The high-water
    // mark resets every window (spec.md "per-prune-window" design note), so
    // a second idle window would correctly prune further toward `min` —
    // stay inside the first window here to observe the documented floor.
    tokio::time::sleep(Duration::from_millis(170)).await;
    let size = pool.size();
    assert_eq!(size.total, 4, "pruner must not drop below the high-water mark of the window it just closed");
    assert!(size.total >= 1, "pruner must never go below min_connections");
}

#[tokio::test]
async fn statement_cache_reuse_and_eviction() {
    let url = "mock://stmt-cache";
    common::register(url);
    let pool: Pool<MockConnection> = Pool::connect(
        PoolOptions::new().max_connections(1).statement_cache_size(2).connection_timeout(Duration::from_secs(5)),
        open_spec(url, true),
    );

    let conn = pool.acquire().await.unwrap();

    let a = conn.prepare("A").await.unwrap();
    conn.close_statement(a).await.unwrap();
    let b = conn.prepare("B").await.unwrap();
    conn.close_statement(b).await.unwrap();

    // Third prepare of "A" is a cache hit: re-inserting it promotes it to
    // most-recently-used, leaving "B" as the eviction candidate.
    let a_again = conn.prepare("A").await.unwrap();
    conn.close_statement(a_again).await.unwrap();

    // A fourth distinct key evicts the LRU entry ("B").
    let c = conn.prepare("C").await.unwrap();
    conn.close_statement(c).await.unwrap();

    conn.close().await.unwrap();
}

async fn wait_for_acquire(
    pool: &Pool<MockConnection>,
    timeout: Duration,
) -> poolkeeper::ConnectionWrapper<MockConnection> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        match pool.acquire().await {
            Ok(conn) => return conn,
            Err(Error::ConnectionTimeout) if std::time::Instant::now() < deadline => continue,
            Err(e) => panic!("unexpected acquire failure: {e}"),
        }
    }
}
