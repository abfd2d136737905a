//! Meter reading client.
//!
//! - [`exchange::FrameExchanger`] runs one HDLC request/response round trip.
//! - [`state`] holds the pure session transition function.
//! - [`session::Session`] drives modem, link, association and object reads.

use core::fmt;
use std::time::Duration;

// ============================================================================
// Shared Constants
// ============================================================================

pub const DEFAULT_MODEM_TIMEOUT: Duration = Duration::from_secs(70);
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after every modem command before the line is used again.
pub const DEFAULT_MODEM_SETTLE: Duration = Duration::from_secs(2);

// ============================================================================
// Submodules
// ============================================================================

pub mod exchange;
pub mod modem;
pub mod session;
pub mod state;

pub use exchange::{ExchangeError, FrameExchanger, ReceiveAssembly};
pub use modem::{ModemError, ModemSettings};
pub use session::{ReadError, Session, SessionError, SessionSettings, Step, Timeouts};
pub use state::{Effect, Event, FailureStage, RetryPolicy, SessionState, transition};

/// Formats bytes as space separated upper case hex for trace output.
pub struct HexDisplay<'a>(pub &'a [u8]);

impl fmt::Display for HexDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_display() {
        assert_eq!(HexDisplay(&[]).to_string(), "");
        assert_eq!(HexDisplay(&[0x7E, 0xA0, 0x0A]).to_string(), "7E A0 0A");
    }
}
