//! DLMS/COSEM meter reading client.
//!
//! Reads a configured list of COSEM objects from a meter over HDLC, on a
//! serial line, through a Hayes modem or over TCP, and renders each value
//! as XML-like text.
//!
//! ```text
//! ByteChannel -> FrameExchanger -> Session -> Printer -> ObjectSink
//! ```
//!
//! - [`transport`]: [`transport::ByteChannel`] with a background reader
//! - [`hdlc`]: frame codec and link sequencing
//! - [`client`]: round trips, the session state machine and its driver
//! - [`association`], [`get`], [`selective_access`]: APDU codecs
//! - [`axdr`], [`printer`]: value walking and rendering
//! - [`config`], [`output`]: JSON configuration and result files

pub mod association;
pub mod axdr;
pub mod client;
pub mod config;
pub mod datetime;
pub mod get;
pub mod hdlc;
pub mod obis_code;
pub mod output;
pub mod printer;
pub mod selective_access;
pub mod transport;
pub mod unit;

pub use client::{Session, SessionError, SessionSettings};
pub use obis_code::ObisCode;
pub use output::{DirectorySink, MemorySink, ObjectSink};
pub use printer::Printer;
pub use transport::{ByteChannel, Transport, TransportError, TransportParams};
