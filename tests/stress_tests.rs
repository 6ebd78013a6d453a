//! Stress tests for the adaptive limiter and its primitives.
//!
//! These tests verify behavior under high load and contention.

use adaptive_limiter::semaphore::DynamicSemaphore;
use adaptive_limiter::{AdaptiveLimiter, CancellationToken};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[compio::test]
async fn test_high_contention_semaphore() {
    let sem = Arc::new(DynamicSemaphore::new(1));
    let counter = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for _ in 0..1000 {
        let sem = sem.clone();
        let counter = counter.clone();
        handles.push(compio::runtime::spawn(async move {
            let token = CancellationToken::none();
            let _p = sem.acquire(&token).await.unwrap();
            counter.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), 1000);
    assert_eq!(sem.inflight(), 0);
}

#[compio::test]
async fn test_rapid_acquire_release() {
    let sem = Arc::new(DynamicSemaphore::new(10));
    let counter = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for _ in 0..100 {
        let sem = sem.clone();
        let counter = counter.clone();
        handles.push(compio::runtime::spawn(async move {
            for _ in 0..100 {
                let token = CancellationToken::none();
                let _p = sem.acquire(&token).await.unwrap();
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), 10_000);
    assert_eq!(sem.inflight(), 0);
}

#[compio::test]
async fn test_many_waiters_wake_order() {
    let sem = Arc::new(DynamicSemaphore::new(1));
    let permit = sem.acquire(&CancellationToken::none()).await.unwrap();

    let mut handles = vec![];
    for i in 0..100 {
        let sem = sem.clone();
        handles.push(compio::runtime::spawn(async move {
            let token = CancellationToken::none();
            let _p = sem.acquire(&token).await.unwrap();
            i
        }));
    }

    drop(permit);

    let mut results = vec![];
    for h in handles {
        results.push(h.await.unwrap());
    }

    assert_eq!(results.len(), 100);
}

#[compio::test]
async fn test_future_cancellation_stress() {
    let sem = Arc::new(DynamicSemaphore::new(1));
    let _permit = sem.acquire(&CancellationToken::none()).await.unwrap();

    for _ in 0..100 {
        let sem = sem.clone();
        let fut = Box::pin(async move {
            let token = CancellationToken::new();
            let _p = sem.acquire(&token).await;
        });
        drop(fut);
    }

    drop(_permit);
    let _p2 = sem.acquire(&CancellationToken::none()).await.unwrap();
}

#[compio::test]
async fn test_adaptive_limiter_under_sustained_load() {
    let limiter = Arc::new(AdaptiveLimiter::builder().limits(1.0, 50.0, 10.0).build());
    let completed = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for _ in 0..500 {
        let limiter = limiter.clone();
        let completed = completed.clone();
        handles.push(compio::runtime::spawn(async move {
            let token = CancellationToken::none();
            let permit = limiter.acquire(&token).await.unwrap();
            compio::time::sleep(Duration::from_micros(100)).await;
            permit.record(Duration::from_micros(100));
            completed.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::Relaxed), 500);
    assert_eq!(limiter.inflight(), 0);
    assert!(limiter.limit() >= 1 && (limiter.limit() as f64) <= 50.0);
}
