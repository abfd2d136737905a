//! Serial port access, used for direct optical/RS-485 links and modems.

use std::io;

use log::info;
use serialport::{DataBits, FlowControl, Parity, StopBits};

use super::{ByteChannel, READ_POLL_INTERVAL, TransportError};

/// Opens `port` as 8N1 without flow control.
pub fn open(port: &str, baudrate: u32) -> Result<ByteChannel, TransportError> {
    let serial = serialport::new(port, baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_POLL_INTERVAL)
        .open()
        .map_err(io::Error::from)?;
    info!("Opened {} at {} baud", port, baudrate);

    let reader = serial.try_clone().map_err(io::Error::from)?;
    Ok(ByteChannel::from_parts(reader, Box::new(serial), false))
}
