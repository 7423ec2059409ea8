//! The outer driver: discover an inverter, open a session, and sample it
//! at a fixed cadence until something goes wrong, then go back to
//! discovery. Replaces the bare catch-all the vendor tool used around its
//! own `Start()` loop with an explicit fault-to-reconnect state machine.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::discovery;
use crate::error::DiscoveryError;
use crate::sample::{OperationMode, Sample};
use crate::session::Session;

const PORT_RETRY_COUNT: u32 = 5;
const PORT_RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Device-presence events published as the monitor loop advances.
#[derive(Debug, Clone)]
pub enum Lifecycle {
    Searching,
    Connected(SocketAddr),
    Disconnected(String),
}

/// Where decoded samples go when the inverter reports `Normal` operation.
/// Failures are logged, not fatal — a dead sink must not bring down
/// sampling.
pub trait SampleSink {
    fn write(&mut self, sample: &Sample) -> Result<(), Box<dyn std::error::Error>>;
}

/// Run the monitor loop forever: discover, sample, and reconnect on any
/// session fault. `on_sample` sees every decoded sample regardless of
/// operation mode (for a renderer); `sink` only receives samples while the
/// inverter reports `Normal` operation, matching the vendor tool's
/// "don't persist readings while faulted/idle" behavior.
pub fn run(
    config: &MonitorConfig,
    sink: &mut impl SampleSink,
    mut on_sample: impl FnMut(&Sample),
    mut on_lifecycle: impl FnMut(Lifecycle),
) -> ! {
    loop {
        on_lifecycle(Lifecycle::Searching);

        let (stream, addr) = match discovery::open_with_retries(
            config.bind_addr,
            config.advertisements,
            config.advertise_interval,
            PORT_RETRY_COUNT,
            PORT_RETRY_PERIOD,
        ) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("monitor: discovery failed: {e}");
                on_lifecycle(Lifecycle::Disconnected(e.to_string()));
                backoff_after_discovery_failure(&e, config);
                continue;
            }
        };
        on_lifecycle(Lifecycle::Connected(addr));

        let mut session = match Session::new(stream, config.keep_alive_period) {
            Ok(session) => session,
            Err(e) => {
                log::error!("monitor: failed to open session with {addr}: {e}");
                on_lifecycle(Lifecycle::Disconnected(e.to_string()));
                continue;
            }
        };

        sample_loop(&mut session, config, sink, &mut on_sample, &mut on_lifecycle);
    }
}

fn sample_loop(
    session: &mut Session,
    config: &MonitorConfig,
    sink: &mut impl SampleSink,
    on_sample: &mut impl FnMut(&Sample),
    on_lifecycle: &mut impl FnMut(Lifecycle),
) {
    let mut next_tick = Instant::now();
    loop {
        match session.status() {
            Ok(sample) => {
                on_sample(&sample);
                if sample.operation_mode() == Some(OperationMode::Normal) {
                    if let Err(e) = sink.write(&sample) {
                        log::warn!("monitor: sink write failed: {e}");
                    }
                }
            }
            Err(e) => {
                log::error!("monitor: session error, returning to discovery: {e}");
                let _ = session.disconnect();
                on_lifecycle(Lifecycle::Disconnected(e.to_string()));
                return;
            }
        }

        let now = Instant::now();
        next_tick = schedule_next(next_tick, config.sample_interval, now);
        let remaining = next_tick.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }
}

/// Monotonic tick scheduling: `next = prev + interval`, clamped forward to
/// `now` if we've fallen behind, so a slow sample never compounds into an
/// ever-growing backlog of instantly-fired ticks.
fn schedule_next(prev_tick: Instant, interval: Duration, now: Instant) -> Instant {
    let next = prev_tick + interval;
    if next < now {
        now
    } else {
        next
    }
}

fn backoff_after_discovery_failure(error: &DiscoveryError, config: &MonitorConfig) {
    let delay = match error {
        DiscoveryError::PortInUse => PORT_RETRY_PERIOD,
        _ => config.advertise_interval,
    };
    thread::sleep(delay);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_next_advances_by_interval_when_on_time() {
        let prev = Instant::now();
        let interval = Duration::from_secs(1);
        let next = schedule_next(prev, interval, prev);
        assert_eq!(next, prev + interval);
    }

    #[test]
    fn schedule_next_catches_up_when_behind() {
        let prev = Instant::now();
        let interval = Duration::from_millis(10);
        let now = prev + Duration::from_secs(5);
        let next = schedule_next(prev, interval, now);
        assert_eq!(next, now);
    }
}
