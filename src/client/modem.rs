//! Hayes modem commands over the byte channel.

use std::thread;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("cannot send modem command: {0}")]
    Send(#[source] TransportError),
    #[error("expected {expected:?} from modem, got {reply:?}")]
    UnexpectedReply { expected: &'static str, reply: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemSettings {
    pub init: String,
    pub phone: String,
    /// Pause after every command.
    pub settle: Duration,
}

/// Sends `command` and collects the reply until it contains `expected`
/// or a receive times out. Waits `settle` afterwards either way.
pub fn command<T>(
    transport: &mut T,
    command: &str,
    expected: &'static str,
    timeout: Duration,
    settle: Duration,
) -> Result<String, ModemError>
where
    T: Transport + ?Sized,
{
    debug!("Modem <- {}", command);
    let line = format!("{}\r\n", command);
    transport.send(line.as_bytes()).map_err(ModemError::Send)?;

    let mut reply = String::new();
    while !reply.contains(expected) {
        match transport.receive(timeout) {
            Ok(data) => reply.push_str(&String::from_utf8_lossy(&data)),
            Err(_) => break,
        }
    }
    debug!("Modem -> {:?}", reply);

    if !settle.is_zero() {
        thread::sleep(settle);
    }

    if reply.contains(expected) {
        Ok(reply)
    } else {
        Err(ModemError::UnexpectedReply { expected, reply: reply.trim().to_string() })
    }
}

pub fn initialise<T>(transport: &mut T, settings: &ModemSettings, timeout: Duration) -> Result<(), ModemError>
where
    T: Transport + ?Sized,
{
    command(transport, &settings.init, "OK", timeout, settings.settle)?;
    info!("Modem initialised");
    Ok(())
}

pub fn dial<T>(transport: &mut T, settings: &ModemSettings, timeout: Duration) -> Result<(), ModemError>
where
    T: Transport + ?Sized,
{
    let reply = command(
        transport,
        &format!("ATD{}", settings.phone),
        "CONNECT",
        timeout,
        settings.settle,
    )?;
    info!("Connected: {}", reply.trim());
    Ok(())
}
