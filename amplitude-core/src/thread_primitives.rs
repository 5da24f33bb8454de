//! A mutex that spins briefly before falling back to blocking, and a
//! fixed-size cooperative task pool for asset decode work — never touched
//! by the audio thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex as PlMutex, MutexGuard};

const DEFAULT_SPIN_COUNT: usize = 1000;

/// Spins up to `spin_count` times attempting a non-blocking lock before
/// falling through to `parking_lot`'s blocking mutex. Game-thread command
/// pushes use this so brief contention never forces a full OS wait.
pub struct SpinMutex<T> {
    inner: PlMutex<T>,
    spin_count: usize,
}

impl<T> SpinMutex<T> {
    pub fn new(value: T) -> Self {
        Self::with_spin_count(value, DEFAULT_SPIN_COUNT)
    }

    pub fn with_spin_count(value: T, spin_count: usize) -> Self {
        Self {
            inner: PlMutex::new(value),
            spin_count,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        for _ in 0..self.spin_count {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            std::hint::spin_loop();
        }
        self.inner.lock()
    }
}

/// A one-shot notifier an async load task can wait on with a timeout.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<(PlMutex<bool>, Condvar)>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((PlMutex::new(false), Condvar::new())),
        }
    }

    pub fn notify(&self) {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock();
        *done = true;
        cvar.notify_all();
    }

    /// Waits for `notify()`, honoring a millisecond timeout. Returns `true`
    /// if notified before the timeout elapsed.
    pub fn await_with_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut done = lock.lock();
        if *done {
            return true;
        }
        let result = cvar.wait_for(&mut done, timeout);
        *done || !result.timed_out()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size worker pool used only for asset decode at load time; the
/// audio thread never submits work here and never waits on it.
pub struct TaskPool {
    sender: Sender<Task>,
    active: Arc<AtomicUsize>,
}

impl TaskPool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = bounded::<Task>(queue_capacity);
        let active = Arc::new(AtomicUsize::new(0));

        for i in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            let active = active.clone();
            thread::Builder::new()
                .name(format!("amplitude-loader-{i}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        active.fetch_add(1, Ordering::SeqCst);
                        task();
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                })
                .expect("failed to spawn loader worker thread");
        }

        Self { sender, active }
    }

    /// Submits a task and returns a `Notifier` that fires once it completes.
    pub fn submit<F>(&self, task: F) -> Notifier
    where
        F: FnOnce() + Send + 'static,
    {
        let notifier = Notifier::new();
        let notify = notifier.clone();
        let wrapped: Task = Box::new(move || {
            task();
            notify.notify();
        });
        self.sender.send(wrapped).expect("task pool queue closed");
        notifier
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn spin_mutex_guards_mutation() {
        let mutex = SpinMutex::new(0u32);
        *mutex.lock() += 1;
        *mutex.lock() += 1;
        assert_eq!(*mutex.lock(), 2);
    }

    #[test]
    fn task_pool_runs_submitted_task() {
        let pool = TaskPool::new(2, 8);
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let notifier = pool.submit(move || {
            ran2.store(true, Ordering::SeqCst);
        });
        assert!(notifier.await_with_timeout(Duration::from_secs(2)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn notifier_times_out_without_notify() {
        let notifier = Notifier::new();
        assert!(!notifier.await_with_timeout(Duration::from_millis(10)));
    }
}
