use crate::tracers::{StopSignal, EXECUTION_TIMEOUT};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// A cancellable timer that stops a tracer when its deadline elapses.
///
/// A watcher thread waits for the configured duration and fires
/// `signal.stop("execution timeout")` unless the deadline is disarmed first.
/// Dropping the deadline disarms it and joins the watcher, so a stop can
/// never fire after the traced run returned.
#[derive(Debug)]
pub struct Deadline {
    shared: Arc<Shared>,
    watcher: Option<thread::JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct Shared {
    disarmed: Mutex<bool>,
    cvar: Condvar,
}

impl Deadline {
    /// Arms a deadline of `timeout` over the given signal.
    pub fn start(timeout: Duration, signal: StopSignal) -> Self {
        let shared = Arc::new(Shared::default());
        let watcher_shared = shared.clone();
        let watcher = thread::Builder::new()
            .name("tracer-deadline".to_string())
            .spawn(move || watch(watcher_shared, timeout, signal))
            .ok();
        Self { shared, watcher }
    }
}

fn watch(shared: Arc<Shared>, timeout: Duration, signal: StopSignal) {
    let deadline = Instant::now() + timeout;
    let mut disarmed = shared.disarmed.lock();
    while !*disarmed {
        let now = Instant::now();
        if now >= deadline {
            signal.stop(EXECUTION_TIMEOUT);
            return
        }
        shared.cvar.wait_for(&mut disarmed, deadline - now);
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        *self.shared.disarmed.lock() = true;
        self.shared.cvar.notify_all();
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_the_timeout() {
        let signal = StopSignal::new();
        let _deadline = Deadline::start(Duration::from_millis(20), signal.clone());
        assert!(!signal.is_stopped());
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(signal.reason().as_deref(), Some(EXECUTION_TIMEOUT));
    }

    #[test]
    fn drop_disarms() {
        let signal = StopSignal::new();
        let deadline = Deadline::start(Duration::from_millis(50), signal.clone());
        drop(deadline);
        std::thread::sleep(Duration::from_millis(100));
        assert!(!signal.is_stopped());
    }
}
