//! Discovery, session, and status-schema client for SolarRiver solar
//! inverters: broadcast-advertise/accept discovery, a framed TCP session
//! with a cooperative keep-alive ticker, and a self-describing status
//! schema that decodes periodic readings into typed [`sample::Sample`]s.

pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod keepalive;
pub mod monitor;
pub mod sample;
pub mod schema;
pub mod session;

pub use config::MonitorConfig;
pub use error::{DiscoveryError, SchemaError, SessionError, WireError};
pub use frame::{Frame, FrameReader};
pub use monitor::{Lifecycle, SampleSink};
pub use sample::{OperationMode, Sample, Value};
pub use session::Session;
