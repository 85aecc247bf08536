//! Serializing job queue.
//!
//! Any number of threads may [`push`](JobQueue::push) concurrently. The first
//! pusher to find the queue idle becomes the drainer and runs jobs, in
//! submission order, until the queue is empty; everyone else only enqueues.
//! At any instant at most one thread executes jobs for a given queue, so the
//! state `S` owned by the queue is only ever touched by one job at a time.
//!
//! Jobs must stay short: the thread that wins the drain is blocked on every
//! job it drains, including ones pushed after it started.

use log::error;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A unit of work run against the queue's state.
pub type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

struct Pending<S> {
    jobs: VecDeque<Job<S>>,
    draining: bool,
}

pub struct JobQueue<S> {
    name: String,
    pending: Mutex<Pending<S>>,
    state: Mutex<S>,
}

impl<S: Send + 'static> JobQueue<S> {
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            pending: Mutex::new(Pending {
                jobs: VecDeque::new(),
                draining: false,
            }),
            state: Mutex::new(state),
        }
    }

    /// Enqueues `job`; drains inline if no other thread is draining.
    ///
    /// Calling this from inside a running job only enqueues: the active
    /// drainer picks the new job up after the current one returns.
    pub fn push<F>(&self, job: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let drain = {
            let mut pending = self.pending.lock();
            pending.jobs.push_back(Box::new(job));
            if pending.draining {
                false
            } else {
                pending.draining = true;
                true
            }
        };

        if drain {
            self.execute();
        }
    }

    /// Number of jobs waiting to run.
    pub fn len(&self) -> usize {
        self.pending.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn execute(&self) {
        loop {
            let job = {
                let mut pending = self.pending.lock();
                match pending.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        pending.draining = false;
                        return;
                    }
                }
            };

            // Only the drainer reaches this lock, so it is never contended.
            let mut state = self.state.lock();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(&mut *state))) {
                error!(
                    "Job on queue '{}' panicked: {}",
                    self.name,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_thread_runs_in_order() {
        let queue = JobQueue::new("test", Vec::new());
        for i in 0..10 {
            queue.push(move |log: &mut Vec<u32>| log.push(i));
        }

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        queue.push(move |log: &mut Vec<u32>| *seen_clone.lock() = log.clone());

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 8;
        const JOBS: usize = 2_000;

        let queue = Arc::new(JobQueue::new("order", (0u64, Vec::new())));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..JOBS {
                        queue.push(move |(total, log): &mut (u64, Vec<(usize, usize)>)| {
                            *total += 1;
                            log.push((producer, seq));
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let result = Arc::new(parking_lot::Mutex::new((0u64, Vec::new())));
        let result_clone = Arc::clone(&result);
        queue.push(move |state: &mut (u64, Vec<(usize, usize)>)| {
            *result_clone.lock() = state.clone();
        });

        let (total, log) = result.lock().clone();
        assert_eq!(total, (PRODUCERS * JOBS) as u64);
        assert_eq!(log.len(), PRODUCERS * JOBS);

        let mut next = vec![0usize; PRODUCERS];
        for (producer, seq) in log {
            assert_eq!(seq, next[producer], "producer {} out of order", producer);
            next[producer] += 1;
        }
    }

    #[test]
    fn test_never_more_than_one_drainer() {
        let queue = Arc::new(JobQueue::new("drainers", ()));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                let runs = Arc::clone(&runs);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let active = Arc::clone(&active);
                        let max_seen = Arc::clone(&max_seen);
                        let runs = Arc::clone(&runs);
                        queue.push(move |_: &mut ()| {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            std::hint::spin_loop();
                            active.fetch_sub(1, Ordering::SeqCst);
                            runs.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 4_000);
    }

    #[test]
    fn test_reentrant_push_runs_after_current_job() {
        let queue = Arc::new(JobQueue::new("reentrant", Vec::new()));
        let inner_queue = Arc::clone(&queue);

        queue.push(move |log: &mut Vec<&'static str>| {
            log.push("outer-start");
            inner_queue.push(|log: &mut Vec<&'static str>| log.push("inner"));
            log.push("outer-end");
        });

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        queue.push(move |log: &mut Vec<&'static str>| *seen_clone.lock() = log.clone());

        assert_eq!(*seen.lock(), vec!["outer-start", "outer-end", "inner"]);
    }

    #[test]
    fn test_panicking_job_does_not_stall_queue() {
        let queue = JobQueue::new("panics", 0u32);
        queue.push(|_: &mut u32| panic!("boom"));
        queue.push(|count: &mut u32| *count += 1);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        queue.push(move |count: &mut u32| seen_clone.store(*count as usize, Ordering::SeqCst));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }
}
