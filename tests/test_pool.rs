use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use vessel::http::request::Request;
use vessel::http::response::Response;
use vessel::server::{BoxFuture, HandlerPool, HandlerPoolConfig, JobHandler, ObjectPool, PoolFull};
use vessel::ServletError;

/// A handler that blocks every job until the gate hands out a permit.
fn gated_handler(gate: Arc<Semaphore>, done: Arc<AtomicUsize>) -> JobHandler<u32> {
    Arc::new(move |_job: u32| -> BoxFuture<()> {
        let gate = Arc::clone(&gate);
        let done = Arc::clone(&done);
        Box::pin(async move {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            done.fetch_add(1, Ordering::SeqCst);
        })
    })
}

fn config(max: usize, min_idle: usize, idle_timeout: Duration) -> HandlerPoolConfig {
    HandlerPoolConfig {
        max_handlers: max,
        min_idle,
        idle_timeout,
    }
}

#[tokio::test]
async fn test_pool_rejects_when_every_handler_is_busy() {
    let gate = Arc::new(Semaphore::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let pool = HandlerPool::new(
        config(2, 0, Duration::from_secs(60)),
        gated_handler(Arc::clone(&gate), Arc::clone(&done)),
    );

    assert!(pool.assign(1).is_ok());
    assert!(pool.assign(2).is_ok());
    assert!(matches!(pool.assign(3), Err(PoolFull(3))));

    let stats = pool.stats();
    assert_eq!(stats.busy, 2);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.rejected, 1);

    gate.add_permits(2);
    assert!(pool.wait_idle(Duration::from_secs(2)).await);
    assert_eq!(done.load(Ordering::SeqCst), 2);

    let stats = pool.stats();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.idle, 2);
}

#[tokio::test]
async fn test_pool_reuses_idle_handlers() {
    let gate = Arc::new(Semaphore::new(100));
    let done = Arc::new(AtomicUsize::new(0));
    let pool = HandlerPool::new(
        config(3, 1, Duration::from_secs(60)),
        gated_handler(gate, Arc::clone(&done)),
    );
    assert_eq!(pool.stats().idle, 1);

    for job in 0..10 {
        pool.assign(job).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(2)).await);
        let stats = pool.stats();
        assert!(stats.idle + stats.busy <= stats.max);
    }

    assert_eq!(done.load(Ordering::SeqCst), 10);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_pool_never_exceeds_max() {
    let gate = Arc::new(Semaphore::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let pool = HandlerPool::new(
        config(4, 2, Duration::from_secs(60)),
        gated_handler(Arc::clone(&gate), done),
    );

    let mut accepted = 0;
    for job in 0..20 {
        if pool.assign(job).is_ok() {
            accepted += 1;
        }
        let stats = pool.stats();
        assert!(stats.idle + stats.busy <= stats.max);
    }

    assert_eq!(accepted, 4);
    assert_eq!(pool.stats().rejected, 16);
    gate.add_permits(4);
    assert!(pool.wait_idle(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_surplus_idle_handlers_retire() {
    let gate = Arc::new(Semaphore::new(100));
    let done = Arc::new(AtomicUsize::new(0));
    let pool = HandlerPool::new(
        config(4, 1, Duration::from_millis(50)),
        gated_handler(gate, Arc::clone(&done)),
    );

    for job in 0..3 {
        pool.assign(job).unwrap();
    }
    assert!(pool.wait_idle(Duration::from_secs(2)).await);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = pool.stats();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.busy, 0);
    assert_eq!(done.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_panicking_job_returns_its_handler() {
    let done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done);
    let handler: JobHandler<u32> = Arc::new(move |job: u32| -> BoxFuture<()> {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            if job == 0 {
                panic!("job {job} failed");
            }
            counter.fetch_add(1, Ordering::SeqCst);
        })
    });
    let pool = HandlerPool::new(config(1, 0, Duration::from_secs(60)), handler);

    pool.assign(0).unwrap();
    assert!(pool.wait_idle(Duration::from_secs(2)).await);
    assert_eq!(pool.stats().busy, 0);
    assert_eq!(pool.stats().idle, 1);

    for job in 1..4 {
        assert!(pool.assign(job).is_ok());
        assert!(pool.wait_idle(Duration::from_secs(2)).await);
    }
    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert_eq!(pool.stats().rejected, 0);
}

#[test]
fn test_object_pool_recycles_requests() {
    let pool: Arc<ObjectPool<Request>> = ObjectPool::new("request", 1);
    {
        let mut req = pool.acquire().unwrap();
        req.set_attribute("leftover", 1u8);
    }
    assert_eq!(pool.available(), 1);

    let req = pool.acquire().unwrap();
    assert!(req.attribute("leftover").is_none());
    assert_eq!(pool.created(), 1);
}

#[test]
fn test_object_pool_exhaustion() {
    let pool: Arc<ObjectPool<Response>> = ObjectPool::new("response", 2);
    let a = pool.acquire().unwrap();
    let _b = pool.acquire().unwrap();

    assert!(matches!(
        pool.acquire(),
        Err(ServletError::ObjectPoolExhausted("response"))
    ));

    drop(a);
    assert!(pool.acquire().is_ok());
    assert_eq!(pool.created(), 2);
}
