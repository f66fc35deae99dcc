use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub mod time;

pub use self::time::*;

pub fn is_blank(path: &str) -> bool {
    path.trim().is_empty()
}

/// Cooperative cancellation shared by the probe workers of one checker.
/// `wait_timeout` doubles as the worker's ticker: it sleeps for one period
/// and reports whether cancellation arrived in the meantime.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap();
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Block for up to `period`, returning `true` once cancelled.
    pub fn wait_timeout(&self, period: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap();
        let deadline = std::time::Instant::now() + period;
        loop {
            if *cancelled {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar.wait_timeout(cancelled, deadline - now).unwrap();
            cancelled = guard;
        }
    }
}

/// Counts live workers so shutdown can wait for their acknowledgement
/// within a bounded grace window.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap() += n;
    }

    pub fn done(&self) {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            cvar.notify_all();
        }
    }

    /// Wait until the count drops to zero or the grace window elapses.
    /// Returns `true` if all members checked in.
    pub fn wait_timeout(&self, grace: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock().unwrap();
        let deadline = std::time::Instant::now() + grace;
        loop {
            if *count == 0 {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar.wait_timeout(count, deadline - now).unwrap();
            count = guard;
        }
    }
}
