//! A small fixed pool of OS worker threads with a FIFO task queue.
//!
//! Compile tasks are opaque closures; they report their results over an
//! `mpsc` channel owned by the engine, so the pool itself only has to hand
//! out work. A panic escaping a task is caught and parked in a first-panic
//! slot that the engine inspects at phase boundaries.

use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    thread,
};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker count: hardware concurrency, but never fewer than two.
pub fn max_threads() -> usize {
    std::cmp::max(num_cpus::get(), 2)
}

struct PoolState {
    tasks: VecDeque<Task>,
    stop: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
    first_panic: Mutex<Option<String>>,
}

pub struct ThreadPool {
    workers: Vec<thread::JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    pub fn new() -> ThreadPool {
        ThreadPool::with_size(max_threads())
    }

    pub fn with_size(size: usize) -> ThreadPool {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
            first_panic: Mutex::new(None),
        });

        let mut workers = Vec::with_capacity(size);
        for _ in 0..size {
            let shared = Arc::clone(&shared);
            workers.push(thread::spawn(move || worker_loop(&shared)));
        }

        ThreadPool { workers, shared }
    }

    /// Queue a task. Non-blocking; wakes one idle worker. Submitting after
    /// `join_all` is a programming error.
    pub fn add_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock().expect("pool lock poisoned");
            assert!(!state.stop, "task submitted after join_all");
            state.tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
    }

    /// Drain the queue and wait for every worker to exit. Every task queued
    /// before this call runs to completion.
    pub fn join_all(&mut self) {
        {
            let mut state = self.shared.state.lock().expect("pool lock poisoned");
            state.stop = true;
        }
        self.shared.available.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    /// The first panic message captured from a task, if any.
    pub fn take_panic(&self) -> Option<String> {
        self.shared
            .first_panic
            .lock()
            .expect("pool lock poisoned")
            .take()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.join_all();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock().expect("pool lock poisoned");
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if state.stop {
                    return;
                }
                state = shared
                    .available
                    .wait(state)
                    .expect("pool lock poisoned");
            }
        };

        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "task panicked".to_string()
            };
            log::error!("worker task panicked: {}", message);

            let mut slot = shared.first_panic.lock().expect("pool lock poisoned");
            if slot.is_none() {
                *slot = Some(message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn every_task_runs_before_join_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = ThreadPool::new();
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.add_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join_all();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn single_worker_runs_tasks_in_fifo_order() {
        let (tx, rx) = mpsc::channel();
        let mut pool = ThreadPool::with_size(1);
        for i in 0..10 {
            let tx = tx.clone();
            pool.add_task(move || {
                tx.send(i).unwrap();
            });
        }
        pool.join_all();
        drop(tx);
        let order: Vec<i32> = rx.iter().collect();
        assert_eq!(order, (0..10).collect::<Vec<i32>>());
    }

    #[test]
    fn a_panicking_task_does_not_abort_the_pool() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = ThreadPool::with_size(2);

        pool.add_task(|| panic!("boom in task"));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.add_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join_all();

        assert_eq!(counter.load(Ordering::SeqCst), 20);
        let panic = pool.take_panic().unwrap();
        assert!(panic.contains("boom in task"));
        assert!(pool.take_panic().is_none());
    }

    #[test]
    #[should_panic(expected = "after join_all")]
    fn submitting_after_join_is_an_error() {
        let mut pool = ThreadPool::with_size(2);
        pool.join_all();
        pool.add_task(|| {});
    }

    #[test]
    fn pool_has_at_least_two_workers() {
        assert!(max_threads() >= 2);
    }
}
