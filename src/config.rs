//! Typed configuration surface for the monitor loop.
//!
//! This is a plain struct, not a parser — turning an INI file (or any other
//! external format) into a `MonitorConfig` is the host application's job.
//! The core never reads environment variables, files, or argv itself.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Parameters governing discovery, keep-alive, and sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Local interface to bind the discovery listener and broadcast socket on.
    pub bind_addr: IpAddr,
    /// Number of discovery advertisements to send before giving up.
    pub advertisements: u32,
    /// Delay between advertisements (and the accept timeout per attempt).
    pub advertise_interval: Duration,
    /// How long a session may go without user traffic before a keep-alive fires.
    pub keep_alive_period: Duration,
    /// Interval between consecutive `status()` samples in the monitor loop.
    pub sample_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertisements: 10,
            advertise_interval: Duration::from_secs(5),
            keep_alive_period: Duration::from_secs(11),
            sample_interval: Duration::from_secs(1),
        }
    }
}
