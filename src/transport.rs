use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub mod channel;
#[cfg(feature = "serial")]
pub mod serial;
pub mod tcp;

pub use channel::ByteChannel;

/// How often the background reader wakes up to check for termination.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: io::Error,
    },
    #[error("no data received before the timeout")]
    TimedOut,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Where the byte channel connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportParams {
    Serial { port: String, baudrate: u32 },
    Tcp { host: String, port: u16 },
}

impl fmt::Display for TransportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { port, baudrate } => write!(f, "{} ({} baud)", port, baudrate),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

impl ByteChannel {
    pub fn open(params: &TransportParams) -> Result<Self, TransportError> {
        let opened = match params {
            #[cfg(feature = "serial")]
            TransportParams::Serial { port, baudrate } => serial::open(port, *baudrate),
            #[cfg(not(feature = "serial"))]
            TransportParams::Serial { .. } => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "built without serial support",
            ))),
            TransportParams::Tcp { host, port } => tcp::connect((host.as_str(), *port)),
        };

        opened.map_err(|err| match err {
            TransportError::Io(source) => TransportError::Open { device: params.to_string(), source },
            other => other,
        })
    }
}

/// Byte transport between the client and a meter or modem.
///
/// Implementations must be able to wait for incoming bytes with a bound,
/// the client never blocks on a transport without a timeout.
pub trait Transport: fmt::Debug {
    /// Sends `data` and returns the number of bytes written.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Waits up to `timeout` for data and returns everything available
    /// at that point, or [`TransportError::TimedOut`].
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}
