//! Background task supervisor (§5): checkpoint, corruption scan, WAL
//! rotation, and cache-pressure sampling each run on their own thread at
//! a fixed interval until [`BackgroundSupervisor::stop`] is called.
//!
//! One thread per task, parked on a shared condvar between runs instead
//! of `thread::sleep`, so shutdown wakes every task immediately rather
//! than waiting out its longest interval. `stop` bounds how long it
//! waits for threads to drain and abandons stragglers past the deadline
//! rather than hanging forever.

use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, warn};

struct Shared {
    shutdown: AtomicBool,
    wake: Mutex<()>,
    wake_cond: Condvar,
}

/// One periodically-run named task.
pub struct PeriodicTask {
    pub name: &'static str,
    pub interval: Duration,
    pub work: Box<dyn FnMut() + Send>,
}

/// Runs a fixed set of periodic background tasks, one thread each,
/// until stopped.
pub struct BackgroundSupervisor {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundSupervisor {
    /// Spawn one thread per task. Each thread waits on the shared
    /// condvar for either its interval to elapse or shutdown, runs its
    /// work once per elapsed interval, and catches panics so one
    /// misbehaving task can't take down the others.
    pub fn start(tasks: Vec<PeriodicTask>) -> Self {
        let shared = Arc::new(Shared {
            shutdown: AtomicBool::new(false),
            wake: Mutex::new(()),
            wake_cond: Condvar::new(),
        });

        let handles = tasks
            .into_iter()
            .map(|task| Self::spawn_task(Arc::clone(&shared), task))
            .collect();

        BackgroundSupervisor { shared, handles }
    }

    fn spawn_task(shared: Arc<Shared>, mut task: PeriodicTask) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name(format!("entity-bg-{}", task.name))
            .spawn(move || loop {
                let mut guard = shared.wake.lock();
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let timed_out = shared.wake_cond.wait_for(&mut guard, task.interval).timed_out();
                drop(guard);

                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if !timed_out {
                    continue;
                }

                let name = task.name;
                let result = panic::catch_unwind(AssertUnwindSafe(|| (task.work)()));
                if result.is_err() {
                    error!(task = name, "background task panicked, skipping this run");
                }
            })
            .expect("failed to spawn background task thread")
    }

    /// Signal shutdown, wake every task immediately, and wait up to
    /// `timeout` total for them to finish their current run and exit.
    /// A thread still running past the deadline is logged and abandoned
    /// rather than blocking the caller forever.
    pub fn stop(mut self, timeout: Duration) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.wake.lock();
            self.shared.wake_cond.notify_all();
        }

        let deadline = Instant::now() + timeout;
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("entity-bg").to_string();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(task = %name, "background task still running past shutdown deadline, abandoning");
                continue;
            }

            // JoinHandle::join has no timeout; bound the wait with a
            // channel from a throwaway joiner thread instead.
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let _ = handle.join();
                let _ = tx.send(());
            });
            if rx.recv_timeout(remaining).is_err() {
                warn!(task = %name, "background task did not stop within the shutdown deadline, abandoning");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_task_repeatedly_at_its_interval() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);
        let supervisor = BackgroundSupervisor::start(vec![PeriodicTask {
            name: "counter",
            interval: Duration::from_millis(10),
            work: Box::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        }]);

        std::thread::sleep(Duration::from_millis(80));
        supervisor.stop(Duration::from_secs(1));
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn stop_returns_promptly_even_with_a_long_interval() {
        let supervisor = BackgroundSupervisor::start(vec![PeriodicTask {
            name: "idle",
            interval: Duration::from_secs(3600),
            work: Box::new(|| {}),
        }]);

        let start = Instant::now();
        supervisor.stop(Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn a_panicking_task_does_not_stop_later_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = Arc::clone(&runs);
        let supervisor = BackgroundSupervisor::start(vec![PeriodicTask {
            name: "flaky",
            interval: Duration::from_millis(10),
            work: Box::new(move || {
                let n = runs_clone.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("boom");
                }
            }),
        }]);

        std::thread::sleep(Duration::from_millis(80));
        supervisor.stop(Duration::from_secs(1));
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
