use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Queued,
    Started,
    Abandoned,
}

/// Deadline for a queued job to reach a worker, shared by the submitter and the worker that
/// dequeues it. Whichever side settles the slot first wins.
#[derive(Debug)]
pub(crate) struct Admission {
    slot: Mutex<Slot>,
    changed: Condvar,
    deadline: Instant,
    limit: Duration,
}

impl Admission {
    pub(crate) fn new(limit: Duration) -> Self {
        Self {
            slot: Mutex::new(Slot::Queued),
            changed: Condvar::new(),
            deadline: Instant::now() + limit,
            limit,
        }
    }

    pub(crate) fn limit(&self) -> Duration {
        self.limit
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Worker side: take the job off the queue. Returns `false` when the deadline has passed or
    /// the submitter already gave up; the job must then be rejected instead of run.
    pub(crate) fn leave_queue(&self) -> bool {
        let mut slot = self.lock();
        if *slot == Slot::Queued {
            *slot = if Instant::now() <= self.deadline {
                Slot::Started
            } else {
                Slot::Abandoned
            };
        }
        self.changed.notify_all();
        *slot == Slot::Started
    }

    /// Submitter side: block until a worker takes the job or the deadline passes. Returns
    /// `false` on timeout, after which the job will not run.
    pub(crate) fn wait_admitted(&self) -> bool {
        let slot = self.lock();
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let (mut slot, _) = self
            .changed
            .wait_timeout_while(slot, remaining, |s| *s == Slot::Queued)
            .unwrap_or_else(PoisonError::into_inner);
        settle(&mut slot)
    }

    /// Submitter side, once the deadline has passed: abandon the job if it is still queued.
    /// Returns `true` when it timed out.
    pub(crate) fn expire(&self) -> bool {
        !settle(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn settle(slot: &mut Slot) -> bool {
    if *slot == Slot::Queued {
        *slot = Slot::Abandoned;
    }
    *slot == Slot::Started
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn submitter_gives_up_at_the_deadline() {
        let admission = Admission::new(Duration::from_millis(20));
        let started = Instant::now();
        assert!(!admission.wait_admitted());
        assert!(started.elapsed() >= Duration::from_millis(20));
        // The worker that finally dequeues it must not run it.
        assert!(!admission.leave_queue());
    }

    #[test]
    fn worker_pickup_releases_the_submitter() {
        let admission = Arc::new(Admission::new(Duration::from_secs(5)));
        let worker = {
            let admission = Arc::clone(&admission);
            thread::spawn(move || admission.leave_queue())
        };
        assert!(admission.wait_admitted());
        assert!(worker.join().unwrap());
        assert!(!admission.expire());
    }
}
