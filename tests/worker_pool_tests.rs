// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the worker pool

use camera_hal::HalError;
use camera_hal::media::WorkerPool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

fn pool_sizes() -> std::ops::RangeInclusive<usize> {
    let parallelism = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    1..=parallelism.min(8)
}

#[test]
fn test_every_submitted_job_runs_exactly_once() {
    for size in pool_sizes() {
        let mut pool = WorkerPool::with_threads(size);
        pool.start().unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..200usize)
            .map(|i| {
                let runs = Arc::clone(&runs);
                pool.submit(move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    i * 2
                })
                .unwrap()
            })
            .collect();

        let results: Vec<usize> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, (0..200).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(runs.load(Ordering::SeqCst), 200, "pool of {}", size);
        pool.stop();
    }
}

#[test]
fn test_scope_fills_disjoint_chunks() {
    for size in pool_sizes() {
        let mut pool = WorkerPool::with_threads(size);
        pool.start().unwrap();

        let mut data = vec![0u32; 1000];
        pool.scope(|s| {
            for (n, chunk) in data.chunks_mut(37).enumerate() {
                s.submit(move || {
                    for v in chunk.iter_mut() {
                        *v = n as u32 + 1;
                    }
                });
            }
        })
        .unwrap();

        for (i, v) in data.iter().enumerate() {
            assert_eq!(*v, (i / 37) as u32 + 1, "pool of {}", size);
        }
    }
}

#[test]
fn test_jobs_spread_over_workers() {
    let mut pool = WorkerPool::with_threads(2);
    pool.start().unwrap();
    let names = Mutex::new(HashSet::new());
    pool.scope(|s| {
        for _ in 0..64 {
            s.submit(|| {
                let name = thread::current().name().map(str::to_string);
                names.lock().unwrap().insert(name);
            });
        }
    })
    .unwrap();
    let names = names.into_inner().unwrap();
    assert!(!names.is_empty());
    for name in names {
        assert!(name.unwrap().starts_with("hal-worker-"));
    }
}

#[test]
fn test_lifecycle_errors() {
    let mut pool = WorkerPool::with_threads(2);
    assert!(matches!(pool.submit(|| ()), Err(HalError::PoolNotRunning)));
    assert!(matches!(pool.scope(|_| ()), Err(HalError::PoolNotRunning)));

    pool.start().unwrap();
    assert_eq!(pool.start(), Err(HalError::PoolAlreadyRunning));

    pool.stop();
    assert!(!pool.is_running());
    // Stopping twice is harmless
    pool.stop();

    // The pool can be restarted
    pool.start().unwrap();
    assert_eq!(pool.submit(|| 7).unwrap().wait(), Ok(7));
}

#[test]
fn test_panicking_scope_job_reports_failure() {
    let mut pool = WorkerPool::with_threads(2);
    pool.start().unwrap();
    let result = pool.scope(|s| {
        s.submit(|| panic!("band exploded"));
        s.submit(|| ());
    });
    assert!(matches!(result, Err(HalError::TaskFailed(_))));

    // Workers survive the panic
    assert_eq!(pool.submit(|| 1 + 1).unwrap().wait(), Ok(2));
}
