//! Tick-driven delayed calls for the main server loop.
//!
//! Jobs are keyed by an absolute target tick (milliseconds on the server
//! [`Clock`]) and kept in a [`PriorityQueue`]. [`TickScheduler::flush`] runs
//! every job whose tick has arrived, inline on the calling thread. A
//! recurring job re-submits itself from its own body.

use crate::clock::Clock;
use crate::heap::PriorityQueue;
use crate::job_queue::panic_message;
use log::error;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

pub type TimedJob = Box<dyn FnOnce() + Send + 'static>;

struct TimerEntry {
    execute_tick: u64,
    seq: u64,
    job: TimedJob,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.execute_tick == other.execute_tick && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.execute_tick
            .cmp(&other.execute_tick)
            .then(self.seq.cmp(&other.seq))
    }
}

pub struct TickScheduler {
    clock: Arc<dyn Clock>,
    timers: Mutex<PriorityQueue<TimerEntry>>,
    next_seq: AtomicU64,
}

impl TickScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            timers: Mutex::new(PriorityQueue::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ticks()
    }

    /// Schedules `job` to run once `delay_ticks` ticks have passed.
    pub fn push_after<F>(&self, delay_ticks: u64, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let entry = TimerEntry {
            execute_tick: self.now().saturating_add(delay_ticks),
            seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
            job: Box::new(job),
        };
        self.timers.lock().push(entry);
    }

    /// Runs every job due at the current tick and returns how many ran.
    ///
    /// The tick is sampled once, so a job that reschedules itself with a
    /// zero delay waits for the next flush instead of spinning here.
    pub fn flush(&self) -> usize {
        let now = self.now();
        let mut executed = 0;

        loop {
            let entry = {
                let mut timers = self.timers.lock();
                match timers.peek() {
                    Some(entry) if entry.execute_tick <= now => timers.pop(),
                    _ => None,
                }
            };
            let Some(entry) = entry else {
                break;
            };

            if let Err(panic) = catch_unwind(AssertUnwindSafe(entry.job)) {
                error!(
                    "Timer job due at tick {} panicked: {}",
                    entry.execute_tick,
                    panic_message(panic.as_ref())
                );
            }
            executed += 1;
        }

        executed
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }

    /// Tick of the earliest pending job.
    pub fn next_due(&self) -> Option<u64> {
        self.timers.lock().peek().map(|entry| entry.execute_tick)
    }
}

/// Runs `job` every `period_ticks`, starting one period from now.
pub fn schedule_recurring<F>(scheduler: &Arc<TickScheduler>, period_ticks: u64, job: F)
where
    F: Fn() + Send + Sync + 'static,
{
    fn arm(scheduler: Arc<TickScheduler>, period_ticks: u64, job: Arc<dyn Fn() + Send + Sync>) {
        let next = Arc::clone(&scheduler);
        scheduler.push_after(period_ticks, move || {
            job();
            arm(next, period_ticks, job);
        });
    }

    arm(Arc::clone(scheduler), period_ticks, Arc::new(job));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn scheduler() -> (Arc<ManualClock>, Arc<TickScheduler>) {
        let clock = Arc::new(ManualClock::new());
        let scheduler = Arc::new(TickScheduler::new(clock.clone()));
        (clock, scheduler)
    }

    #[test]
    fn test_job_waits_for_its_tick() {
        let (clock, scheduler) = scheduler();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired_clone = Arc::clone(&fired);
        scheduler.push_after(100, move || {
            fired_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });

        for _ in 0..99 {
            clock.advance(Duration::from_millis(1));
            assert_eq!(scheduler.flush(), 0);
        }
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);

        clock.advance(Duration::from_millis(1));
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);

        clock.advance(Duration::from_millis(50));
        assert_eq!(scheduler.flush(), 0);
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_late_flush_runs_everything_due_in_tick_order() {
        let (clock, scheduler) = scheduler();
        let order = Arc::new(Mutex::new(Vec::new()));

        for delay in [30u64, 10, 20, 500] {
            let order = Arc::clone(&order);
            scheduler.push_after(delay, move || order.lock().push(delay));
        }

        clock.set(Duration::from_millis(40));
        assert_eq!(scheduler.flush(), 3);
        assert_eq!(*order.lock(), vec![10, 20, 30]);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.next_due(), Some(500));
    }

    #[test]
    fn test_recurring_job_fires_each_period() {
        let (clock, scheduler) = scheduler();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        schedule_recurring(&scheduler, 25, move || {
            count_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });

        for _ in 0..100 {
            clock.advance(Duration::from_millis(5));
            scheduler.flush();
        }

        assert_eq!(count.load(AtomicOrdering::SeqCst), 20);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_zero_delay_from_inside_flush_waits() {
        let (clock, scheduler) = scheduler();
        let inner = Arc::clone(&scheduler);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        scheduler.push_after(0, move || {
            let count = Arc::clone(&count_clone);
            inner.push_after(0, move || {
                count.fetch_add(1, AtomicOrdering::SeqCst);
            });
        });

        assert_eq!(scheduler.flush(), 1);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);

        clock.advance(Duration::from_millis(1));
        assert_eq!(scheduler.flush(), 1);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_timer_is_isolated() {
        let (_clock, scheduler) = scheduler();
        let count = Arc::new(AtomicUsize::new(0));

        scheduler.push_after(0, || panic!("timer failure"));
        let count_clone = Arc::clone(&count);
        scheduler.push_after(0, move || {
            count_clone.fetch_add(1, AtomicOrdering::SeqCst);
        });

        assert_eq!(scheduler.flush(), 2);
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }
}
