//! Error types for the framing codec, status schema, discovery, and session.
//!
//! One `thiserror`-derived enum per concern, matching how the errors actually
//! propagate: the codec never logs and never knows about sockets, the
//! session converts codec/IO failures into its own taxonomy and logs as it
//! goes, and discovery has its own narrow set of failure modes.

use std::io;
use thiserror::Error;

/// Errors from encoding or decoding a single wire frame.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unexpected end of stream while reading {context}")]
    Eof { context: &'static str },

    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: &'static str },

    #[error("checksum mismatch (frame declared 0x{expected:04X}, computed 0x{computed:04X})")]
    BadChecksum { expected: u16, computed: u16 },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: &'static str },

    #[error("I/O error reading frame: {0}")]
    Io(#[from] io::Error),
}

/// Errors from interpreting a status format/payload pair against the field registry.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("operation mode {0} is not a known value")]
    UnknownOperationMode(u16),
}

/// Errors from the discovery handshake (listen + broadcast + accept).
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not bind discovery listener: port already in use")]
    PortInUse,

    #[error("no inverter answered after {attempts} advertisement(s)")]
    InverterNotFound { attempts: u32 },

    #[error("I/O error during discovery: {0}")]
    Io(#[from] io::Error),
}

/// Errors from a live session (request/response exchange, keep-alive).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl SessionError {
    /// Whether this error should close the owning session permanently.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::InvalidState(_))
    }
}

/// True for the platform error codes that mean "socket already closed",
/// which `Session::disconnect` treats as success rather than propagating.
pub(crate) fn is_already_closed(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(9) | Some(107) | Some(10038))
}

/// True for the platform error codes libc/Windows use for "address in use".
pub(crate) fn is_port_in_use(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::AddrInUse || matches!(e.raw_os_error(), Some(98) | Some(10048))
}

pub type WireResult<T> = std::result::Result<T, WireError>;
pub type SessionResult<T> = std::result::Result<T, SessionError>;
pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;
