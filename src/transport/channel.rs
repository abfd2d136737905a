//! Byte channel over a blocking reader.
//!
//! A background thread reads chunks from the device and hands them over a
//! bounded channel. The foreground only ever waits in
//! [`Transport::receive`], always with a timeout.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, warn};

use super::{Transport, TransportError};

const CHANNEL_CAPACITY: usize = 64;
const READ_CHUNK_SIZE: usize = 512;
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ByteChannel {
    writer: Box<dyn Write + Send>,
    receiver: Receiver<Vec<u8>>,
    terminate: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl ByteChannel {
    /// Spawns the reader thread over `reader`.
    ///
    /// The reader should time out periodically so the thread notices
    /// [`ByteChannel::stop`]. A zero-length read ends the thread only when
    /// `zero_read_is_eof` is set (sockets); serial ports return zero bytes
    /// on timeout.
    pub fn from_parts<R>(reader: R, writer: Box<dyn Write + Send>, zero_read_is_eof: bool) -> Self
    where
        R: Read + Send + 'static,
    {
        let (sender, receiver) = channel::bounded(CHANNEL_CAPACITY);
        let terminate = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&terminate);
        let reader = thread::spawn(move || read_loop(reader, sender, flag, zero_read_is_eof));

        Self { writer, receiver, terminate, reader: Some(reader) }
    }

    /// Stops the reader thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.terminate.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
    }
}

fn read_loop<R: Read>(
    mut reader: R,
    sender: Sender<Vec<u8>>,
    terminate: Arc<AtomicBool>,
    zero_read_is_eof: bool,
) {
    let mut buf = [0u8; READ_CHUNK_SIZE];

    while !terminate.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) if zero_read_is_eof => {
                debug!("Connection closed by peer");
                break;
            }
            Ok(0) => {}
            Ok(n) => {
                if !hand_over(&sender, buf[..n].to_vec(), &terminate) {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                warn!("Read failed: {}", err);
                break;
            }
        }
    }
}

/// Queues a chunk, rechecking `terminate` while the queue is full.
/// Returns `false` once the reader should exit.
fn hand_over(sender: &Sender<Vec<u8>>, mut chunk: Vec<u8>, terminate: &AtomicBool) -> bool {
    loop {
        match sender.send_timeout(chunk, SEND_POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Disconnected(_)) => return false,
            Err(SendTimeoutError::Timeout(returned)) => {
                if terminate.load(Ordering::SeqCst) {
                    return false;
                }
                chunk = returned;
            }
        }
    }
}

impl Transport for ByteChannel {
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(data.len())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut data = match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                return Err(TransportError::TimedOut);
            }
        };
        while let Ok(chunk) = self.receiver.try_recv() {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }
}

impl Drop for ByteChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteChannel")
            .field("pending", &self.receiver.len())
            .field("running", &self.reader.is_some())
            .finish()
    }
}
