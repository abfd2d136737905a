//! TCP connection to a meter (or a serial-to-IP converter).

use std::net::{TcpStream, ToSocketAddrs};

use log::info;

use super::{ByteChannel, READ_POLL_INTERVAL, TransportError};

/// Connects to `addr` and starts the reader thread on a clone of the socket.
pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<ByteChannel, TransportError> {
    let stream = TcpStream::connect(addr)?;

    // Frames are small and latency-bound
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;

    if let Ok(peer) = stream.peer_addr() {
        info!("Connected to {}", peer);
    }
    let reader = stream.try_clone()?;
    Ok(ByteChannel::from_parts(reader, Box::new(stream), true))
}
