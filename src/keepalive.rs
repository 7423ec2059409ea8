//! Background keep-alive worker.
//!
//! One thread waits on a cancellation signal with a timeout; if the timeout
//! elapses before cancellation, it sends a keep-alive request and consumes
//! the reply. `Session` pauses this worker (signal + join) before every
//! user-facing send/receive and restarts it afterward, so the worker and
//! the user thread never touch the socket at the same time.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::frame::FrameReader;
use crate::session::keepalive_roundtrip;

struct StopSignal {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Waits up to `timeout` for cancellation. Returns `true` if cancelled,
    /// `false` if the timeout elapsed first.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.mutex.lock().unwrap();
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |&mut stopped| !stopped)
            .unwrap();
        *guard
    }

    fn signal(&self) {
        let mut guard = self.mutex.lock().unwrap();
        *guard = true;
        self.condvar.notify_all();
    }
}

/// A session's periodic keep-alive ticker. Subordinate to the session: it
/// shares no socket state with anyone else, only a cloned stream handle
/// handed to it by its parent on `restart`.
pub struct KeepAliveSupervisor {
    period: Duration,
    worker: Option<JoinHandle<()>>,
    stop: Option<Arc<StopSignal>>,
    running: Arc<AtomicBool>,
}

impl KeepAliveSupervisor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            worker: None,
            stop: None,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the keep-alive request, the last time it ran, succeeded.
    /// Becomes `false` permanently after the first failure.
    pub fn is_healthy(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the worker. A no-op precondition violation: calling this while
    /// already running panics in debug builds via the caller contract in
    /// `Session`, which only ever calls `restart` after `pause`.
    pub fn restart(&mut self, stream: TcpStream, reader: FrameReader) {
        debug_assert!(self.worker.is_none(), "keep-alive worker already running");
        let stop = Arc::new(StopSignal::new());
        let running = Arc::new(AtomicBool::new(true));
        let period = self.period;

        let thread_stop = Arc::clone(&stop);
        let thread_running = Arc::clone(&running);
        let mut stream = stream;
        let handle = thread::spawn(move || {
            loop {
                if thread_stop.wait(period) {
                    return;
                }
                if let Err(e) = keepalive_roundtrip(&mut stream, &reader) {
                    log::warn!("keep-alive: request failed: {e}");
                    thread_running.store(false, Ordering::SeqCst);
                    return;
                }
                log::debug!("keep-alive: ping");
            }
        });

        self.stop = Some(stop);
        self.running = running;
        self.worker = Some(handle);
    }

    /// Stop the worker if one is running. No-op otherwise.
    pub fn pause(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.signal();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeepAliveSupervisor {
    fn drop(&mut self) {
        self.pause();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_without_running_is_a_no_op() {
        let mut supervisor = KeepAliveSupervisor::new(Duration::from_secs(1));
        supervisor.pause();
        supervisor.pause();
    }

    #[test]
    fn stop_signal_wakes_immediately_on_signal() {
        let signal = StopSignal::new();
        let signal = Arc::new(signal);
        let waiter = Arc::clone(&signal);
        let start = std::time::Instant::now();
        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        signal.signal();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stop_signal_times_out_without_signal() {
        let signal = StopSignal::new();
        assert!(!signal.wait(Duration::from_millis(20)));
    }
}
