//! One HDLC request/response round trip.
//!
//! Half-duplex lines (optical heads, some RS-485 adapters) echo every byte
//! sent, so the echo of the last transmission is dropped before decoding.
//! Segmented responses are acknowledged with RR frames until the final
//! segment arrives.

use std::time::Duration;

use log::{debug, trace};
use thiserror::Error;

use crate::client::HexDisplay;
use crate::hdlc::{self, Decode, DecodedFrame, FrameType, HDLC_FLAG, HdlcError, LinkState};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] HdlcError),
    #[error("send failed: {0}")]
    SendFailed(#[source] TransportError),
}

/// Bytes received during one exchange.
#[derive(Debug, Default)]
pub struct ReceiveAssembly {
    buffer: Vec<u8>,
    cursor: usize,
    last_sent: Vec<u8>,
    echo_pending: bool,
}

impl ReceiveAssembly {
    pub fn unread(&self) -> &[u8] {
        &self.buffer[self.cursor..]
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn consume(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.buffer.len());
    }

    /// Consumes a decoded frame but keeps its closing flag, which may open
    /// the next frame.
    pub fn consume_frame(&mut self, frame: &DecodedFrame) {
        self.consume(frame.frame_len - 1);
    }

    /// Records a transmission; its echo is looked for once.
    pub fn sent(&mut self, frame: Vec<u8>) {
        self.last_sent = frame;
        self.echo_pending = true;
    }

    /// Drops the echo of the last transmission from the unread bytes.
    ///
    /// Returns `false` while the unread bytes are a strict prefix of the
    /// transmitted frame and more data is needed to decide.
    pub fn skip_echo(&mut self) -> bool {
        if !self.echo_pending {
            return true;
        }

        while self.unread().starts_with(&[HDLC_FLAG, HDLC_FLAG]) {
            self.cursor += 1;
        }
        let unread = self.unread();
        if unread.starts_with(&self.last_sent) {
            trace!("Dropping {} echoed bytes", self.last_sent.len());
            self.cursor += self.last_sent.len();
        } else if self.last_sent.starts_with(unread) {
            return false;
        }
        self.echo_pending = false;
        true
    }
}

#[derive(Debug, Default)]
pub struct FrameExchanger {
    last_frame: Option<DecodedFrame>,
}

impl FrameExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type of the last frame received, e.g. to tell a UA from a DM.
    pub fn last_frame_type(&self) -> Option<FrameType> {
        self.last_frame.map(|frame| frame.frame_type)
    }

    /// Sends `to_send` and collects the information fields of every frame
    /// received until a final frame arrives.
    ///
    /// `timeout` bounds each wait for data, not the exchange as a whole.
    pub fn exchange<T>(
        &mut self,
        transport: &mut T,
        link: &mut LinkState,
        mut to_send: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ExchangeError>
    where
        T: Transport + ?Sized,
    {
        let mut assembly = ReceiveAssembly::default();
        let mut payload = Vec::new();
        self.last_frame = None;

        loop {
            if !to_send.is_empty() {
                debug!("TX: {}", HexDisplay(&to_send));
                transport.send(&to_send).map_err(ExchangeError::SendFailed)?;
                link.frame_sent();
                assembly.sent(std::mem::take(&mut to_send));
            }

            let data = match transport.receive(timeout) {
                Ok(data) => data,
                Err(TransportError::TimedOut) => return Err(ExchangeError::Timeout),
                Err(err) => {
                    debug!("Receive failed: {}", err);
                    return Err(ExchangeError::Timeout);
                }
            };
            debug!("RX: {}", HexDisplay(&data));
            assembly.extend(&data);

            if !assembly.skip_echo() {
                continue;
            }

            let mut acknowledge = false;
            loop {
                let frame = match hdlc::decode(assembly.unread())? {
                    Decode::Incomplete => break,
                    Decode::Frame(frame) => frame,
                };
                payload.extend_from_slice(frame.payload(assembly.unread()));
                assembly.consume_frame(&frame);
                link.frame_received(&frame);
                self.last_frame = Some(frame);

                if frame.is_final() {
                    return Ok(payload);
                }
                if frame.needs_ack() {
                    acknowledge = true;
                }
            }
            // One RR covers every segment decoded from this read
            if acknowledge {
                to_send = link.encode_rr()?;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hdlc::{LinkParameters, Role, encode_parameters};
    use std::collections::VecDeque;

    /// Scripted transport: records what is sent and replays queued chunks.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub sent_data: Vec<Vec<u8>>,
        pub response_queue: VecDeque<Vec<u8>>,
        pub fail_send: bool,
    }

    impl MockTransport {
        pub fn push_response(&mut self, data: Vec<u8>) {
            self.response_queue.push_back(data);
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            if self.fail_send {
                return Err(TransportError::Io(std::io::Error::other("line down")));
            }
            self.sent_data.push(data.to_vec());
            Ok(data.len())
        }

        fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
            self.response_queue.pop_front().ok_or(TransportError::TimedOut)
        }
    }

    pub(crate) fn client_link() -> LinkState {
        LinkState::new(0x01, 0x01, 0x11, 4)
    }

    pub(crate) fn server_link() -> LinkState {
        let mut link = client_link();
        link.role = Role::Server;
        link
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_snrm_ua_exchange() {
        let mut server = server_link();
        let parameters = LinkParameters { max_info_rx: 256, ..LinkParameters::default() };
        let ua = server.encode_ua(&encode_parameters(&parameters)).unwrap();

        let mut transport = MockTransport::default();
        transport.push_response(ua);

        let mut link = client_link();
        let snrm = link.encode_snrm().unwrap();
        let mut exchanger = FrameExchanger::new();
        let info = exchanger.exchange(&mut transport, &mut link, snrm.clone(), TIMEOUT).unwrap();

        assert_eq!(transport.sent_data, vec![snrm]);
        assert_eq!(exchanger.last_frame_type(), Some(FrameType::Ua));
        link.apply_ua(&info).unwrap();
        assert_eq!(link.parameters.max_info_rx, 256);
        // SNRM is not sequenced
        assert_eq!(link.sss, 0);
    }

    #[test]
    fn test_echo_is_skipped() {
        let mut link = client_link();
        let request = link.clone().encode_info(&[0xE6, 0xE6, 0x00, 0x01]).unwrap();
        let mut server = server_link();
        server.rrr = 1;
        let response = server.encode_info(&[0xE6, 0xE7, 0x00, 0x02]).unwrap();

        // Echo split across two reads, the response glued to its tail
        let mut transport = MockTransport::default();
        transport.push_response(request[..4].to_vec());
        let mut rest = request[4..].to_vec();
        rest.extend_from_slice(&response);
        transport.push_response(rest);

        let to_send = link.encode_info(&[0xE6, 0xE6, 0x00, 0x01]).unwrap();
        let payload =
            FrameExchanger::new().exchange(&mut transport, &mut link, to_send, TIMEOUT).unwrap();

        assert_eq!(payload, [0xE6, 0xE7, 0x00, 0x02]);
        assert_eq!(link.sss, 1);
        assert_eq!(link.rrr, 1);
    }

    #[test]
    fn test_no_echo_skips_nothing() {
        let mut assembly = ReceiveAssembly::default();
        assembly.sent(vec![0x7E, 0xA0, 0x07, 0x03]);
        assembly.extend(&[0x7E, 0xA0, 0x0A, 0x00]);

        assert!(assembly.skip_echo());
        assert_eq!(assembly.unread(), &[0x7E, 0xA0, 0x0A, 0x00]);

        // Checked once per transmission
        assembly.consume(4);
        assembly.extend(&[0x7E, 0xA0, 0x07, 0x03]);
        assert!(assembly.skip_echo());
        assert_eq!(assembly.unread().len(), 4);
    }

    #[test]
    fn test_echo_prefix_waits_for_more() {
        let mut assembly = ReceiveAssembly::default();
        assembly.sent(vec![0x7E, 0xA0, 0x07, 0x03]);
        assembly.extend(&[0x7E, 0xA0]);
        assert!(!assembly.skip_echo());

        assembly.extend(&[0x07, 0x03, 0x7E]);
        assert!(assembly.skip_echo());
        assert_eq!(assembly.unread(), &[0x7E]);
    }

    #[test]
    fn test_segmented_response_is_acknowledged() {
        let mut server = server_link();
        server.rrr = 1;
        let first = server.encode_segment(&[0xE6, 0xE7, 0x00, 0x0A], true).unwrap();
        server.frame_sent();
        let last = server.encode_segment(&[0x0B, 0x0C], false).unwrap();

        let mut transport = MockTransport::default();
        transport.push_response(first);
        transport.push_response(last);

        let mut link = client_link();
        let request = link.encode_info(&[0xE6, 0xE6, 0x00, 0xC0]).unwrap();
        let payload =
            FrameExchanger::new().exchange(&mut transport, &mut link, request, TIMEOUT).unwrap();

        assert_eq!(payload, [0xE6, 0xE7, 0x00, 0x0A, 0x0B, 0x0C]);
        assert_eq!(transport.sent_data.len(), 2);

        let rr = match hdlc::decode(&transport.sent_data[1]).unwrap() {
            Decode::Frame(frame) => frame,
            Decode::Incomplete => panic!("incomplete RR"),
        };
        assert_eq!(rr.frame_type, FrameType::ReceiveReady);
        assert_eq!(rr.recv_seq, 1);
        assert_eq!(link.rrr, 2);
        assert_eq!(link.sss, 1);
    }

    #[test]
    fn test_buffered_segments_share_one_rr() {
        let mut server = server_link();
        server.rrr = 1;
        let first = server.encode_segment(&[0xE6, 0xE7, 0x00, 0x01], true).unwrap();
        server.frame_sent();
        let second = server.encode_segment(&[0x02], true).unwrap();
        server.frame_sent();
        let last = server.encode_segment(&[0x03], false).unwrap();

        let mut transport = MockTransport::default();
        transport.push_response([first, second].concat());
        transport.push_response(last);

        let mut link = client_link();
        let request = link.encode_info(&[0xE6, 0xE6, 0x00, 0xC0]).unwrap();
        let payload =
            FrameExchanger::new().exchange(&mut transport, &mut link, request, TIMEOUT).unwrap();

        assert_eq!(payload, [0xE6, 0xE7, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(transport.sent_data.len(), 2);
        let rr = match hdlc::decode(&transport.sent_data[1]).unwrap() {
            Decode::Frame(frame) => frame,
            Decode::Incomplete => panic!("incomplete RR"),
        };
        assert_eq!(rr.recv_seq, 2);
        assert_eq!(link.rrr, 3);
    }

    #[test]
    fn test_final_segment_already_buffered() {
        let mut server = server_link();
        server.rrr = 1;
        let first = server.encode_segment(&[0xE6, 0xE7, 0x00, 0x0A], true).unwrap();
        server.frame_sent();
        let last = server.encode_segment(&[0x0B], false).unwrap();

        // Shared flag between the two frames, inter-frame fill before the first
        let mut chunk = vec![HDLC_FLAG];
        chunk.extend_from_slice(&first);
        chunk.extend_from_slice(&last[1..]);
        let mut transport = MockTransport::default();
        transport.push_response(chunk);

        let mut link = client_link();
        let request = link.encode_info(&[0xE6, 0xE6, 0x00, 0xC0]).unwrap();
        let mut exchanger = FrameExchanger::new();
        let payload = exchanger.exchange(&mut transport, &mut link, request.clone(), TIMEOUT).unwrap();

        assert_eq!(payload, [0xE6, 0xE7, 0x00, 0x0A, 0x0B]);
        assert_eq!(transport.sent_data, vec![request]);
    }

    #[test]
    fn test_rr_echo_after_kept_flag() {
        let mut assembly = ReceiveAssembly::default();
        assembly.extend(&[0x7E]);
        assembly.sent(vec![0x7E, 0xA0, 0x07, 0x03]);
        assembly.extend(&[0x7E, 0xA0, 0x07, 0x03, 0x7E, 0xA0]);

        assert!(assembly.skip_echo());
        assert_eq!(assembly.unread(), &[0x7E, 0xA0]);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut server = server_link();
        let response = server.encode_info(&[0xE6, 0xE7, 0x00, 0x61]).unwrap();

        let mut transport = MockTransport::default();
        transport.push_response(response[..2].to_vec());
        transport.push_response(response[2..9].to_vec());
        transport.push_response(response[9..].to_vec());

        let mut link = client_link();
        let request = link.encode_info(&[0xE6, 0xE6, 0x00, 0x60]).unwrap();
        let payload =
            FrameExchanger::new().exchange(&mut transport, &mut link, request, TIMEOUT).unwrap();
        assert_eq!(payload, [0xE6, 0xE7, 0x00, 0x61]);
    }

    #[test]
    fn test_timeout_and_malformed() {
        let mut link = client_link();
        let mut transport = MockTransport::default();
        let request = link.encode_info(&[0x01]).unwrap();
        let result = FrameExchanger::new().exchange(&mut transport, &mut link, request, TIMEOUT);
        assert!(matches!(result, Err(ExchangeError::Timeout)));
        // Counters are not rolled back
        assert_eq!(link.sss, 1);

        transport.push_response(vec![0x7E, 0x10, 0x07, 0x00]);
        let request = link.encode_info(&[0x01]).unwrap();
        let result = FrameExchanger::new().exchange(&mut transport, &mut link, request, TIMEOUT);
        assert!(matches!(result, Err(ExchangeError::MalformedFrame(HdlcError::InvalidFormat))));
    }

    #[test]
    fn test_send_failure() {
        let mut link = client_link();
        let mut transport = MockTransport { fail_send: true, ..MockTransport::default() };
        let request = link.encode_info(&[0x01]).unwrap();
        let result = FrameExchanger::new().exchange(&mut transport, &mut link, request, TIMEOUT);

        assert!(matches!(result, Err(ExchangeError::SendFailed(_))));
        assert_eq!(link.sss, 0);
    }
}
