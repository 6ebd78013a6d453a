//! Integration tests for DynamicSemaphore

use adaptive_limiter::semaphore::DynamicSemaphore;
use adaptive_limiter::{CancellationToken, Error};
use std::sync::Arc;
use std::time::Duration;

#[compio::test]
async fn test_semaphore_basic_acquire_release() {
    compio::time::timeout(Duration::from_secs(5), async {
        let sem = DynamicSemaphore::new(1);
        let token = CancellationToken::none();
        let permit = sem.acquire(&token).await.unwrap();
        assert!(sem.is_full());
        drop(permit);
        assert!(!sem.is_full());
    })
    .await
    .expect("test timed out");
}

#[compio::test]
async fn test_semaphore_concurrent_access() {
    compio::time::timeout(Duration::from_secs(10), async {
        let sem = Arc::new(DynamicSemaphore::new(5));
        let mut handles = vec![];

        for i in 0..20 {
            let sem = sem.clone();
            let handle = compio::runtime::spawn(async move {
                let token = CancellationToken::none();
                let _permit = sem.acquire(&token).await.unwrap();
                compio::time::sleep(Duration::from_millis(10)).await;
                i
            });
            handles.push(handle);
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), i);
        }

        assert_eq!(sem.inflight(), 0);
    })
    .await
    .expect("test timed out");
}

#[compio::test]
async fn test_semaphore_try_acquire() {
    compio::time::timeout(Duration::from_secs(5), async {
        let sem = DynamicSemaphore::new(1);

        let permit1 = sem.try_acquire();
        assert!(permit1.is_some());
        assert!(sem.is_full());

        let permit2 = sem.try_acquire();
        assert!(permit2.is_none());

        drop(permit1);
        assert!(!sem.is_full());

        let permit3 = sem.try_acquire();
        assert!(permit3.is_some());
    })
    .await
    .expect("test timed out");
}

#[compio::test]
async fn test_semaphore_multiple_permits() {
    compio::time::timeout(Duration::from_secs(5), async {
        let sem = Arc::new(DynamicSemaphore::new(10));

        let mut permits = vec![];
        for _ in 0..5 {
            let token = CancellationToken::none();
            permits.push(sem.acquire(&token).await.unwrap());
        }

        assert_eq!(sem.inflight(), 5);
        assert_eq!(sem.capacity(), 10);

        permits.pop();
        permits.pop();

        assert_eq!(sem.inflight(), 3);
    })
    .await
    .expect("test timed out");
}

#[compio::test]
async fn test_semaphore_single_permit() {
    compio::time::timeout(Duration::from_secs(5), async {
        let sem = Arc::new(DynamicSemaphore::new(1));

        assert_eq!(sem.capacity(), 1);
        assert!(!sem.is_full());

        let permit = sem.acquire(&CancellationToken::none()).await.unwrap();
        assert!(sem.is_full());
        assert!(sem.try_acquire().is_none());

        let sem_clone = sem.clone();
        let handle = compio::runtime::spawn(async move {
            let token = CancellationToken::none();
            let _permit = sem_clone.acquire(&token).await.unwrap();
            "acquired"
        });

        compio::time::sleep(Duration::from_millis(10)).await;
        drop(permit);

        let result = compio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().unwrap(), "acquired");
    })
    .await
    .expect("test timed out");
}

#[compio::test]
async fn test_semaphore_fairness() {
    compio::time::timeout(Duration::from_secs(10), async {
        let sem = Arc::new(DynamicSemaphore::new(1));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let permit = sem.acquire(&CancellationToken::none()).await.unwrap();

        let mut handles = vec![];
        for i in 0..5 {
            let sem = sem.clone();
            let order = order.clone();
            let handle = compio::runtime::spawn(async move {
                let token = CancellationToken::none();
                let _permit = sem.acquire(&token).await.unwrap();
                order.lock().unwrap().push(i);
            });
            handles.push(handle);
        }

        compio::time::sleep(Duration::from_millis(50)).await;
        drop(permit);

        for handle in handles {
            handle.await.unwrap();
        }

        let final_order = order.lock().unwrap();
        assert_eq!(*final_order, vec![0, 1, 2, 3, 4]);
    })
    .await
    .expect("test timed out");
}

#[compio::test]
async fn test_semaphore_stress() {
    compio::time::timeout(Duration::from_secs(10), async {
        let sem = Arc::new(DynamicSemaphore::new(100));
        let mut handles = vec![];

        for i in 0..1000 {
            let sem = sem.clone();
            let handle = compio::runtime::spawn(async move {
                let token = CancellationToken::none();
                let _permit = sem.acquire(&token).await.unwrap();
                i * 2
            });
            handles.push(handle);
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), i * 2);
        }

        assert_eq!(sem.inflight(), 0);
    })
    .await
    .expect("test timed out");
}

#[compio::test]
async fn test_semaphore_cancellation_returns_canceled() {
    compio::time::timeout(Duration::from_secs(5), async {
        let sem = Arc::new(DynamicSemaphore::new(1));
        let _held = sem.acquire(&CancellationToken::none()).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let err = sem.acquire(&token).await.unwrap_err();
        assert_eq!(err, Error::Canceled);
    })
    .await
    .expect("test timed out");
}
