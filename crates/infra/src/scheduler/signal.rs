//! Wake-up signal between producers and the executor thread.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Why [`WakeSignal::wait`] returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Wake {
    Notified,
    TimedOut,
    Stopped,
}

#[derive(Debug, Default)]
struct WakeState {
    notified: bool,
    stopped: bool,
}

/// A latched notification: a `notify` that happens while nobody waits is not
/// lost, the next `wait` returns immediately.
#[derive(Debug, Default)]
pub struct WakeSignal {
    state: Mutex<WakeState>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.notified = true;
        self.cond.notify_all();
    }

    /// Ask every waiter to stop. Sticky.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.stopped = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stopped
    }

    /// Block until notified, stopped or `timeout` elapses. Consumes a pending
    /// notification. A `timeout` too large to express as a deadline waits
    /// without one.
    pub fn wait(&self, timeout: Duration) -> Wake {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.stopped {
                return Wake::Stopped;
            }
            if state.notified {
                state.notified = false;
                return Wake::Notified;
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wake::TimedOut;
                    }
                    self.cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn notify_before_wait_is_latched() {
        let signal = WakeSignal::new();
        signal.notify();
        assert_eq!(signal.wait(Duration::from_secs(5)), Wake::Notified);
        assert_eq!(signal.wait(Duration::from_millis(10)), Wake::TimedOut);
    }

    #[test]
    fn stop_wins_over_notify_and_sticks() {
        let signal = WakeSignal::new();
        signal.notify();
        signal.stop();
        assert_eq!(signal.wait(Duration::from_secs(5)), Wake::Stopped);
        assert_eq!(signal.wait(Duration::from_secs(5)), Wake::Stopped);
        assert!(signal.is_stopped());
    }

    #[test]
    fn wakes_a_blocked_waiter() {
        let signal = Arc::new(WakeSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.notify();
        assert_eq!(waiter.join().unwrap(), Wake::Notified);
    }

    #[test]
    fn unbounded_timeout_waits_for_stop() {
        let signal = Arc::new(WakeSignal::new());
        signal.notify();
        assert_eq!(signal.wait(Duration::MAX), Wake::Notified);

        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert_eq!(waiter.join().unwrap(), Wake::Stopped);
    }
}
