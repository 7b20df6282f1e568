use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct StopState {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Cooperative cancellation shared between the supervisor and its workers.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    state: Arc<StopState>,
}

impl StopToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests every holder to stop and wakes sleeping waiters.
    pub fn trigger(&self) {
        let _guard = self
            .state
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.wake.notify_all();
    }

    /// Whether stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Sleeps for up to `timeout`, returning early when stop is requested.
    ///
    /// Returns `true` when stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self
            .state
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !self.is_stopped() {
            let Some(deadline) = deadline else {
                guard = self
                    .state
                    .wake
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.state.wake.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn wait_times_out_without_trigger() {
        let token = StopToken::new();
        let started = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[rstest]
    fn unrepresentable_timeout_waits_for_trigger() {
        let token = StopToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || token.wait_timeout(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        token.trigger();
        assert!(waiter.join().expect("waiter thread"));
    }

    #[rstest]
    fn trigger_wakes_waiters_early() {
        let token = StopToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || token.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        token.trigger();
        assert!(waiter.join().expect("waiter thread"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(token.is_stopped());
    }
}
