//! Discovery handshake: the client listens and advertises, the inverter
//! dials in.
//!
//! Inverters only initiate an outbound TCP connection after hearing a UDP
//! broadcast, so the client must bind its listener before it starts
//! advertising and re-advertise periodically in case the first announcement
//! is missed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use crate::error::{is_port_in_use, DiscoveryError, DiscoveryResult};
use crate::frame::Frame;

/// Inverters listen for this frame and dial back on [`LISTEN_PORT`].
const ADVERTISE_ID: [u8; 3] = [0x00, 0x40, 0x02];
const ADVERTISE_PAYLOAD: &[u8] = b"I AM SERVER";
const ADVERTISE_PORT: u16 = 1300;
pub const LISTEN_PORT: u16 = 1200;

/// Find an inverter: bind the listener, broadcast an advertisement up to
/// `advertisements` times (pausing `interval` between each, which also
/// bounds how long each accept attempt waits), and return the first
/// accepted connection.
pub fn find(
    bind_addr: IpAddr,
    advertisements: u32,
    interval: Duration,
) -> DiscoveryResult<(TcpStream, SocketAddr)> {
    let listener = bind_listener(bind_addr)?;
    listener.set_nonblocking(false)?;
    let socket2_listener = Socket::from(listener);
    socket2_listener.set_read_timeout(Some(interval))?;
    let listener: TcpListener = socket2_listener.into();

    let broadcaster = UdpSocket::bind((bind_addr, 0))?;
    broadcaster.set_broadcast(true)?;
    let advertisement = Frame::new(ADVERTISE_ID, ADVERTISE_PAYLOAD.to_vec())
        .expect("advertisement frame is within size limits")
        .encode();
    let destination = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), ADVERTISE_PORT);

    for attempt in 1..=advertisements {
        broadcaster.send_to(&advertisement, destination)?;
        log::debug!("discovery: sent advertisement {attempt}/{advertisements}");

        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("discovery: inverter connected from {addr}");
                return Ok((stream, addr));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Err(DiscoveryError::Io(e)),
        }
    }

    Err(DiscoveryError::InverterNotFound { attempts: advertisements })
}

/// Like [`find`], but retries up to `retries` times on `PortInUse`, sleeping
/// `retry_period` between attempts. Any other error propagates immediately.
pub fn open_with_retries(
    bind_addr: IpAddr,
    advertisements: u32,
    interval: Duration,
    retries: u32,
    retry_period: Duration,
) -> DiscoveryResult<(TcpStream, SocketAddr)> {
    let mut attempt = 0;
    loop {
        match find(bind_addr, advertisements, interval) {
            Err(DiscoveryError::PortInUse) if attempt < retries => {
                attempt += 1;
                log::warn!("discovery: port in use, retry {attempt}/{retries}");
                thread::sleep(retry_period);
            }
            other => return other,
        }
    }
}

fn bind_listener(bind_addr: IpAddr) -> DiscoveryResult<TcpListener> {
    let domain = match bind_addr {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, None)?;

    #[cfg(windows)]
    socket.set_exclusive_address_use(true)?;
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?;

    let address = SocketAddr::new(bind_addr, LISTEN_PORT);
    match socket.bind(&address.into()) {
        Ok(()) => {}
        Err(e) if is_port_in_use(&e) => return Err(DiscoveryError::PortInUse),
        Err(e) => return Err(DiscoveryError::Io(e)),
    }
    socket.listen(1)?;
    Ok(socket.into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::Ipv4Addr;

    #[test]
    fn times_out_with_inverter_not_found_on_empty_network() {
        // Use a short interval/count so the test is fast; nothing will
        // ever connect to our listener in this harness.
        let result = find(IpAddr::V4(Ipv4Addr::LOCALHOST), 2, Duration::from_millis(50));
        match result {
            Err(DiscoveryError::InverterNotFound { attempts }) => assert_eq!(attempts, 2),
            other => panic!("expected InverterNotFound, got {other:?}"),
        }
    }

    #[test]
    fn advertisement_frame_matches_wire_contract() {
        let frame = Frame::new(ADVERTISE_ID, ADVERTISE_PAYLOAD.to_vec()).unwrap();
        let wire = frame.encode();
        assert_eq!(&wire[..5], &[0x55, 0xAA, 0x00, 0x40, 0x02]);
        assert_eq!(&wire[5..7], &(ADVERTISE_PAYLOAD.len() as u16).to_be_bytes());
        assert_eq!(&wire[7..7 + ADVERTISE_PAYLOAD.len()], ADVERTISE_PAYLOAD);
    }

    #[test]
    fn accepts_a_connecting_peer() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            let _ = stream.read(&mut buf);
        });
        let mut client = TcpStream::connect(addr).unwrap();
        use std::io::Write;
        let _ = client.write_all(b"ping");
        handle.join().unwrap();
    }
}
