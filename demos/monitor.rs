//! Discover an inverter, open a session, and print decoded samples.
//!
//! Usage: cargo run --example monitor [sample_interval_secs]

use std::env;
use std::time::Duration;

use solarriver_core::monitor::{self, Lifecycle, SampleSink};
use solarriver_core::{MonitorConfig, Sample};

/// A sink that just counts writes — stands in for the MySQL writer the
/// real deployment uses, which lives outside this crate.
struct StdoutSink {
    count: u64,
}

impl SampleSink for StdoutSink {
    fn write(&mut self, sample: &Sample) -> Result<(), Box<dyn std::error::Error>> {
        self.count += 1;
        println!("  [sink #{}] {:?}", self.count, sample.get("energy_total"));
        Ok(())
    }
}

fn main() {
    env_logger::init();

    let interval_secs: u64 = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let config = MonitorConfig {
        sample_interval: Duration::from_secs(interval_secs),
        ..MonitorConfig::default()
    };

    let mut sink = StdoutSink { count: 0 };

    monitor::run(
        &config,
        &mut sink,
        |sample| {
            println!("--- sample ---");
            for (name, value) in sample.iter() {
                println!("  {name}: {value:?}");
            }
        },
        |event| match event {
            Lifecycle::Searching => println!("searching for inverter..."),
            Lifecycle::Connected(addr) => println!("connected to {addr}"),
            Lifecycle::Disconnected(reason) => println!("disconnected: {reason} (retrying discovery)"),
        },
    );
}
