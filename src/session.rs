//! A live conversation with one inverter: request/response exchange, status
//! retrieval, and the keep-alive worker that rides along with it.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::error::{is_already_closed, SessionError, SessionResult, WireError};
use crate::frame::{Frame, FrameReader};
use crate::keepalive::KeepAliveSupervisor;
use crate::sample::Sample;
use crate::schema::decode_sample;

/// Requests and responses bound beyond the device's ~1.5s typical response
/// time, while still failing a genuinely stuck socket promptly.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const STATUS_FORMAT_REQUEST: [u8; 3] = [0x01, 0x00, 0x02];
const STATUS_FORMAT_REPLY_PREFIX: [u8; 2] = [0x01, 0x80];
const STATUS_REQUEST: [u8; 3] = [0x01, 0x02, 0x02];
const STATUS_REPLY_PREFIX: [u8; 2] = [0x01, 0x82];
pub(crate) const KEEPALIVE_REQUEST: [u8; 3] = [0x01, 0x09, 0x02];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// One TCP conversation with an inverter, from accept to close.
///
/// All socket access goes through `&mut self`, which is what lets the
/// keep-alive worker and user-initiated requests share the connection
/// without racing: every request-shaped method here pauses the worker
/// before touching the stream and restarts it afterward.
pub struct Session {
    stream: TcpStream,
    reader: FrameReader,
    peer_addr: SocketAddr,
    state: State,
    keep_alive: KeepAliveSupervisor,
    status_format: Option<Vec<u8>>,
}

impl Session {
    /// Take ownership of an accepted connection and open a session on it.
    /// Validates the start marker and checksum of every frame; for interop
    /// debugging against a device known to send malformed frames, use
    /// [`Session::new_with_reader`] with [`FrameReader::lax`] instead.
    pub fn new(stream: TcpStream, keep_alive_period: Duration) -> SessionResult<Self> {
        Self::new_with_reader(stream, keep_alive_period, FrameReader::strict())
    }

    /// Like [`Session::new`], but with an explicit [`FrameReader`] — the
    /// hook for opting into lax (unchecked) frame parsing.
    pub fn new_with_reader(stream: TcpStream, keep_alive_period: Duration, reader: FrameReader) -> SessionResult<Self> {
        stream.set_nodelay(true).map_err(|e| SessionError::ConnectionLost(e.to_string()))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| SessionError::ConnectionLost(e.to_string()))?;
        Ok(Self {
            stream,
            reader,
            peer_addr,
            state: State::Open,
            keep_alive: KeepAliveSupervisor::new(keep_alive_period),
            status_format: None,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    /// Send `identifier`/`payload`, then read frames until one whose
    /// identifier starts with `expected_prefix` arrives. Non-matching
    /// frames are logged and dropped — the inverter can interleave
    /// unsolicited traffic with the reply we're waiting for.
    pub fn request(
        &mut self,
        identifier: [u8; 3],
        payload: Vec<u8>,
        expected_prefix: &[u8],
    ) -> SessionResult<Frame> {
        self.require_open()?;
        self.keep_alive.pause();
        if !self.keep_alive.is_healthy() {
            self.state = State::Closed;
            return Err(SessionError::ConnectionLost("keep-alive request failed".into()));
        }
        let result = self.request_locked(identifier, payload, expected_prefix);
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.state = State::Closed;
            }
        }
        if self.state == State::Open {
            match self.stream.try_clone() {
                Ok(clone) => self.keep_alive.restart(clone, self.reader),
                Err(e) => {
                    self.state = State::Closed;
                    return Err(SessionError::ConnectionLost(e.to_string()));
                }
            }
        }
        result
    }

    fn request_locked(
        &mut self,
        identifier: [u8; 3],
        payload: Vec<u8>,
        expected_prefix: &[u8],
    ) -> SessionResult<Frame> {
        let frame = Frame::new(identifier, payload)?;
        self.write_frame(&frame)?;

        let deadline = Instant::now() + REQUEST_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::ConnectionLost("request timed out".into()));
            }
            self.stream
                .set_read_timeout(Some(remaining))
                .map_err(|e| SessionError::ConnectionLost(e.to_string()))?;
            let reply = self.read_frame()?;
            if reply.identifier_starts_with(expected_prefix) {
                return Ok(reply);
            }
            log::warn!(
                "session: dropping unexpected frame {:02X?} while waiting for {:02X?}",
                reply.identifier,
                expected_prefix
            );
        }
    }

    /// Fetch and cache the status format (the `OK 80` reply to `01 00 02`).
    pub fn status_format(&mut self) -> SessionResult<&[u8]> {
        if self.status_format.is_none() {
            let reply = self.request(STATUS_FORMAT_REQUEST, Vec::new(), &STATUS_FORMAT_REPLY_PREFIX)?;
            self.status_format = Some(reply.payload);
        }
        Ok(self.status_format.as_deref().unwrap())
    }

    /// Fetch one status payload and decode it against the cached format.
    pub fn status(&mut self) -> SessionResult<Sample> {
        let format = self.status_format()?.to_vec();
        let reply = self.request(STATUS_REQUEST, Vec::new(), &STATUS_REPLY_PREFIX)?;

        let expected_len = format.len() * 2;
        if reply.payload.len() != expected_len {
            log::warn!(
                "session: status payload is {} bytes, expected {expected_len} for a {}-byte format",
                reply.payload.len(),
                format.len()
            );
        }

        Ok(decode_sample(&format, &reply.payload)?)
    }

    /// Half-close then close the socket. Already-closed errors are
    /// swallowed; anything else propagates.
    pub fn disconnect(&mut self) -> SessionResult<()> {
        self.keep_alive.pause();
        self.state = State::Closed;
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if is_already_closed(&e) => Ok(()),
            Err(e) => Err(SessionError::ConnectionLost(e.to_string())),
        }
    }

    fn require_open(&self) -> SessionResult<()> {
        if self.state == State::Open {
            Ok(())
        } else {
            Err(SessionError::ConnectionLost("session is closed".into()))
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> SessionResult<()> {
        self.stream
            .write_all(&frame.encode())
            .map_err(|e| SessionError::ConnectionLost(e.to_string()))
    }

    fn read_frame(&mut self) -> SessionResult<Frame> {
        match self.reader.decode(&mut self.stream) {
            Ok(frame) => Ok(frame),
            Err(WireError::Eof { .. }) => Err(SessionError::ConnectionLost("peer closed the connection".into())),
            Err(WireError::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(SessionError::ConnectionLost("request timed out".into()))
            }
            Err(e) => {
                log::warn!("session: malformed frame from peer: {e}");
                Err(SessionError::ConnectionLost(e.to_string()))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.keep_alive.pause();
    }
}

/// Allows the keep-alive worker to perform its own request/response cycle
/// on a cloned stream without touching `Session`'s private state.
pub(crate) fn keepalive_roundtrip(stream: &mut TcpStream, reader: &FrameReader) -> std::io::Result<()> {
    let frame = Frame::new(KEEPALIVE_REQUEST, Vec::new()).expect("keepalive frame is within size limits");
    stream.write_all(&frame.encode())?;
    reader.decode(stream).map(|_| ()).map_err(|e| std::io::Error::other(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (server, client.join().unwrap())
    }

    #[test]
    fn status_format_round_trip() {
        let (server, client) = loopback_pair();
        let mut session = Session::new(client, Duration::from_secs(60)).unwrap();

        let handle = thread::spawn(move || {
            let mut server = server;
            let request = FrameReader::strict().decode(&mut server).unwrap();
            assert_eq!(request.identifier, STATUS_FORMAT_REQUEST);
            let reply = Frame::new([0x01, 0x80, 0x00], vec![0x01, 0x0C]).unwrap();
            server.write_all(&reply.encode()).unwrap();
        });

        let format = session.status_format().unwrap().to_vec();
        assert_eq!(format, vec![0x01, 0x0C]);
        handle.join().unwrap();
    }

    #[test]
    fn request_skips_unexpected_frames() {
        let (server, client) = loopback_pair();
        let mut session = Session::new(client, Duration::from_secs(60)).unwrap();

        let handle = thread::spawn(move || {
            let mut server = server;
            let _ = FrameReader::strict().decode(&mut server).unwrap();
            let noise = Frame::new([0x01, 0x7F, 0x00], vec![]).unwrap();
            server.write_all(&noise.encode()).unwrap();
            let reply = Frame::new([0x01, 0x80, 0x00], vec![0x0C]).unwrap();
            server.write_all(&reply.encode()).unwrap();
        });

        let format = session.status_format().unwrap().to_vec();
        assert_eq!(format, vec![0x0C]);
        handle.join().unwrap();
    }

    #[test]
    fn disconnect_closes_session() {
        let (_server, client) = loopback_pair();
        let mut session = Session::new(client, Duration::from_secs(60)).unwrap();
        session.disconnect().unwrap();
        assert!(!session.is_open());
        let err = session.request([0x01, 0x02, 0x02], vec![], &[0x01, 0x82]).unwrap_err();
        assert!(matches!(err, SessionError::ConnectionLost(_)));
    }
}
