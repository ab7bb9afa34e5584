use nodepool_core_pool::{ConnectionPool, PoolConfig, PoolError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_capacity_never_exceeded_under_contention() {
    let created = Arc::new(AtomicUsize::new(0));
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&created);
    let pool = Arc::new(
        ConnectionPool::new(PoolConfig::new(4, Duration::from_secs(10)), move || {
            Ok::<_, std::io::Error>(counter.fetch_add(1, Ordering::SeqCst))
        })
        .unwrap(),
    );

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..25 {
                    pool.with(|_conn| {
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(200));
                        in_use.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(created.load(Ordering::SeqCst) <= 4);
    assert_eq!(pool.stats().active, 0);
}

#[test]
fn test_shutdown_wakes_waiters() {
    let pool = Arc::new(
        ConnectionPool::new(PoolConfig::new(1, Duration::from_secs(10)), || {
            Ok::<_, std::io::Error>(())
        })
        .unwrap(),
    );

    let held = pool.checkout().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.checkout().map(|_| ()))
    };

    thread::sleep(Duration::from_millis(50));
    pool.shutdown(|_conn: ()| Ok::<_, std::io::Error>(())).unwrap();

    assert!(matches!(waiter.join().unwrap(), Err(PoolError::Shutdown)));
    drop(held);
    assert_eq!(pool.stats().total, 0);
}
