//! HDLC frame format type 3 for DLMS/COSEM (IEC 62056-46, ISO/IEC 13239).
//!
//! ```text
//! +------+--------+--------+------+------+------+-----+------+-----+------+
//! | Flag | Format | Length | Dest | Src  | Ctrl | HCS | Info | FCS | Flag |
//! | 0x7E |   (1)  |   (1)  | 1-4  | 1-4  | (1)  | (2) | (n)  | (2) | 0x7E |
//! +------+--------+--------+------+------+------+-----+------+-----+------+
//! ```
//!
//! The format field is `1010 S LLL`: `S` is the segmentation bit and `LLL`
//! the top three bits of the 11-bit length, which covers everything between
//! the flags. Frames without an information field carry no HCS.

use nom::{
    IResult, Parser,
    bytes::complete::take,
    error::{Error, ErrorKind},
    number::complete::u8,
};
use thiserror::Error as ThisError;

// ============================================================================
// Constants
// ============================================================================

/// HDLC frame delimiter.
pub const HDLC_FLAG: u8 = 0x7E;

/// LLC header of a request sent by the client.
pub const LLC_REQUEST: [u8; 3] = [0xE6, 0xE6, 0x00];

/// LLC header of a response sent by the server.
pub const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

const FORMAT_TYPE_3: u8 = 0xA0;
const FORMAT_TYPE_MASK: u8 = 0xF0;
const SEGMENTATION_BIT: u8 = 0x08;
const POLL_FINAL_BIT: u8 = 0x10;
const ADDRESS_END_BIT: u8 = 0x01;

/// The length field has 11 bits.
const MAX_FRAME_LENGTH: usize = 0x7FF;

/// Format(1) + Length(1) + Dest(1) + Src(1) + Ctrl(1) + FCS(2).
const MIN_FRAME_LENGTH: usize = 7;

const CONTROL_SNRM: u8 = 0x93;

/// FCS-16 (ISO/IEC 13239), bit-reflected form of x^16 + x^12 + x^5 + 1.
pub(crate) const FCS16_POLYNOMIAL: u16 = 0x8408;
pub(crate) const FCS16_INIT: u16 = 0xFFFF;
pub(crate) const FCS16_XOR_OUTPUT: u16 = 0xFFFF;

const DEFAULT_MAX_INFO_LENGTH: u16 = 128;
const DEFAULT_WINDOW_SIZE: u32 = 1;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum HdlcError {
    #[error("HDLC information field too large ({size} bytes, maximum {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("invalid HDLC flag byte")]
    InvalidFlag,
    #[error("invalid HDLC frame format")]
    InvalidFormat,
    #[error("invalid HDLC address field")]
    InvalidAddress,
    #[error("unsupported HDLC server address size {0}")]
    InvalidAddressSize(u8),
    #[error("HDLC header check sequence failed")]
    HcsError,
    #[error("HDLC FCS verification failed")]
    FcsError,
    #[error("invalid HDLC parameter negotiation field")]
    InvalidParameters,
    #[error("invalid LLC header")]
    InvalidLlc,
}

// ============================================================================
// Link state
// ============================================================================

/// Which end of the link encodes frames with this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Information,
    ReceiveReady,
    ReceiveNotReady,
    Snrm,
    Disc,
    Ua,
    Dm,
    Frmr,
    Ui,
    Unknown(u8),
}

impl FrameType {
    fn from_control(control: u8) -> Self {
        if control & 0x01 == 0 {
            return Self::Information;
        }
        if control & 0x03 == 0x01 {
            return match control & 0x0F {
                0x01 => Self::ReceiveReady,
                0x05 => Self::ReceiveNotReady,
                _ => Self::Unknown(control),
            };
        }
        match control & !POLL_FINAL_BIT {
            0x83 => Self::Snrm,
            0x43 => Self::Disc,
            0x63 => Self::Ua,
            0x0F => Self::Dm,
            0x87 => Self::Frmr,
            0x03 => Self::Ui,
            _ => Self::Unknown(control),
        }
    }
}

/// Parameters announced by the server in its UA, from the server's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParameters {
    pub max_info_tx: u16,
    pub max_info_rx: u16,
    pub window_tx: u32,
    pub window_rx: u32,
}

impl Default for LinkParameters {
    fn default() -> Self {
        Self {
            max_info_tx: DEFAULT_MAX_INFO_LENGTH,
            max_info_rx: DEFAULT_MAX_INFO_LENGTH,
            window_tx: DEFAULT_WINDOW_SIZE,
            window_rx: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Addressing and sequencing of one HDLC link.
///
/// `sss` is the send sequence number of the next I-frame, `rrr` the
/// receive sequence number expected from the peer. Both count modulo 8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    pub role: Role,
    pub phy_address: u16,
    pub logical_device: u16,
    /// Width in bytes of the server address field: 1, 2 or 4.
    pub addr_len: u8,
    pub client_address: u8,
    /// Type of the last frame encoded.
    pub frame_type: FrameType,
    pub sss: u8,
    pub rrr: u8,
    pub parameters: LinkParameters,
}

impl LinkState {
    pub fn new(client_address: u8, logical_device: u16, phy_address: u16, addr_len: u8) -> Self {
        Self {
            role: Role::Client,
            phy_address,
            logical_device,
            addr_len,
            client_address,
            frame_type: FrameType::Snrm,
            sss: 0,
            rrr: 0,
            parameters: LinkParameters::default(),
        }
    }

    /// Encodes the server address: upper part is the logical device, lower
    /// part the physical address. Only the last byte carries the end bit.
    pub fn server_address(&self) -> Result<Vec<u8>, HdlcError> {
        let mut out = Vec::with_capacity(usize::from(self.addr_len));
        match self.addr_len {
            1 => push_address_part(self.logical_device, 1, &mut out),
            2 => {
                push_address_part(self.logical_device, 1, &mut out);
                push_address_part(self.phy_address, 1, &mut out);
            }
            4 => {
                push_address_part(self.logical_device, 2, &mut out);
                push_address_part(self.phy_address, 2, &mut out);
            }
            other => return Err(HdlcError::InvalidAddressSize(other)),
        }
        if let Some(last) = out.last_mut() {
            *last |= ADDRESS_END_BIT;
        }
        Ok(out)
    }

    pub fn client_address_field(&self) -> [u8; 1] {
        [((self.client_address & 0x7F) << 1) | ADDRESS_END_BIT]
    }

    fn addresses(&self) -> Result<(Vec<u8>, Vec<u8>), HdlcError> {
        let server = self.server_address()?;
        let client = self.client_address_field().to_vec();
        Ok(match self.role {
            Role::Client => (server, client),
            Role::Server => (client, server),
        })
    }

    /// Encodes a SNRM and resets both sequence counters.
    pub fn encode_snrm(&mut self) -> Result<Vec<u8>, HdlcError> {
        self.sss = 0;
        self.rrr = 0;
        self.frame_type = FrameType::Snrm;
        let (dest, src) = self.addresses()?;
        Ok(encode_frame(&dest, &src, CONTROL_SNRM, &[], false))
    }

    /// Encodes an unnumbered acknowledgement carrying `info`; used by the
    /// server side to answer a SNRM.
    pub fn encode_ua(&mut self, info: &[u8]) -> Result<Vec<u8>, HdlcError> {
        self.sss = 0;
        self.rrr = 0;
        self.frame_type = FrameType::Ua;
        let (dest, src) = self.addresses()?;
        Ok(encode_frame(&dest, &src, 0x63 | POLL_FINAL_BIT, info, false))
    }

    /// Encodes one I-frame with the poll bit set. The send counter is not
    /// advanced here; that happens once the frame has been transmitted.
    pub fn encode_info(&mut self, info: &[u8]) -> Result<Vec<u8>, HdlcError> {
        self.encode_segment(info, false)
    }

    pub fn encode_segment(&mut self, info: &[u8], segmented: bool) -> Result<Vec<u8>, HdlcError> {
        // Room for two 4-byte addresses and the HCS inside the 11-bit length
        let max = usize::from(self.parameters.max_info_rx).min(MAX_FRAME_LENGTH - MIN_FRAME_LENGTH - 8);
        if info.len() > max {
            return Err(HdlcError::FrameTooLarge { size: info.len(), max });
        }

        self.frame_type = FrameType::Information;
        let control = ((self.rrr & 0x07) << 5) | POLL_FINAL_BIT | ((self.sss & 0x07) << 1);
        let (dest, src) = self.addresses()?;
        Ok(encode_frame(&dest, &src, control, info, segmented))
    }

    /// Encodes a receive-ready acknowledgement.
    pub fn encode_rr(&mut self) -> Result<Vec<u8>, HdlcError> {
        self.frame_type = FrameType::ReceiveReady;
        let control = ((self.rrr & 0x07) << 5) | POLL_FINAL_BIT | 0x01;
        let (dest, src) = self.addresses()?;
        Ok(encode_frame(&dest, &src, control, &[], false))
    }

    /// Called after a frame built from this state has been transmitted.
    pub fn frame_sent(&mut self) {
        if self.frame_type == FrameType::Information {
            self.sss = (self.sss + 1) % 8;
        }
    }

    /// Records a received frame; an I-frame is acknowledged by expecting
    /// its successor next.
    pub fn frame_received(&mut self, frame: &DecodedFrame) {
        if frame.frame_type == FrameType::Information {
            self.rrr = (frame.send_seq + 1) % 8;
        }
    }

    /// Applies the parameter negotiation field of a UA. An empty field
    /// keeps the defaults.
    pub fn apply_ua(&mut self, info: &[u8]) -> Result<(), HdlcError> {
        if info.is_empty() {
            return Ok(());
        }
        let (_, parameters) =
            parse_parameters(info, self.parameters).map_err(|_| HdlcError::InvalidParameters)?;
        self.parameters = parameters;
        Ok(())
    }
}

fn push_address_part(value: u16, width: usize, out: &mut Vec<u8>) {
    if width == 2 {
        out.push((((value >> 7) & 0x7F) as u8) << 1);
    }
    out.push(((value & 0x7F) as u8) << 1);
}

/// Encodes the UA parameter negotiation field.
pub fn encode_parameters(parameters: &LinkParameters) -> Vec<u8> {
    let mut group = Vec::new();
    group.extend_from_slice(&[0x05, 0x02]);
    group.extend_from_slice(&parameters.max_info_tx.to_be_bytes());
    group.extend_from_slice(&[0x06, 0x02]);
    group.extend_from_slice(&parameters.max_info_rx.to_be_bytes());
    group.extend_from_slice(&[0x07, 0x04]);
    group.extend_from_slice(&parameters.window_tx.to_be_bytes());
    group.extend_from_slice(&[0x08, 0x04]);
    group.extend_from_slice(&parameters.window_rx.to_be_bytes());

    let mut out = vec![0x81, 0x80, group.len() as u8];
    out.extend_from_slice(&group);
    out
}

fn parse_parameters(input: &[u8], defaults: LinkParameters) -> IResult<&[u8], LinkParameters> {
    let (input, (format, group, length)) = (u8, u8, u8).parse(input)?;
    if format != 0x81 || group != 0x80 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    let (rest, mut body) = take(length).parse(input)?;

    let mut parameters = defaults;
    while !body.is_empty() {
        let (next, (id, size)) = (u8, u8).parse(body)?;
        let (next, value) = take(size).parse(next)?;
        if size > 4 {
            return Err(nom::Err::Error(Error::new(next, ErrorKind::LengthValue)));
        }
        let value = value.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        match id {
            0x05 => parameters.max_info_tx = value as u16,
            0x06 => parameters.max_info_rx = value as u16,
            0x07 => parameters.window_tx = value,
            0x08 => parameters.window_rx = value,
            _ => {}
        }
        body = next;
    }

    Ok((rest, parameters))
}

// ============================================================================
// Frame codec
// ============================================================================

/// Computes the FCS-16 of `data`; transmitted least significant byte first.
pub fn compute_fcs(data: &[u8]) -> u16 {
    let mut fcs = FCS16_INIT;

    for &byte in data {
        fcs ^= u16::from(byte);
        for _ in 0..8 {
            if fcs & 0x0001 != 0 {
                fcs = (fcs >> 1) ^ FCS16_POLYNOMIAL;
            } else {
                fcs >>= 1;
            }
        }
    }

    fcs ^ FCS16_XOR_OUTPUT
}

fn encode_frame(dest: &[u8], src: &[u8], control: u8, info: &[u8], segmented: bool) -> Vec<u8> {
    let header_len = 2 + dest.len() + src.len() + 1;
    let length = if info.is_empty() { header_len + 2 } else { header_len + 2 + info.len() + 2 };

    let mut frame = Vec::with_capacity(length + 2);
    frame.push(HDLC_FLAG);
    let mut format = FORMAT_TYPE_3 | ((length >> 8) as u8 & 0x07);
    if segmented {
        format |= SEGMENTATION_BIT;
    }
    frame.push(format);
    frame.push((length & 0xFF) as u8);
    frame.extend_from_slice(dest);
    frame.extend_from_slice(src);
    frame.push(control);

    if !info.is_empty() {
        let hcs = compute_fcs(&frame[1..]);
        frame.extend_from_slice(&hcs.to_le_bytes());
        frame.extend_from_slice(info);
    }

    let fcs = compute_fcs(&frame[1..]);
    frame.extend_from_slice(&fcs.to_le_bytes());
    frame.push(HDLC_FLAG);
    frame
}

/// Layout of one frame found at the start of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub dest_address: u32,
    pub src_address: u32,
    pub control: u8,
    pub frame_type: FrameType,
    pub segmented: bool,
    pub poll_final: bool,
    pub send_seq: u8,
    pub recv_seq: u8,
    /// Offset of the information field within the buffer.
    pub data_offset: usize,
    pub data_len: usize,
    /// Total size including both flags.
    pub frame_len: usize,
}

impl DecodedFrame {
    /// Last frame of a transfer: not segmented and with the final bit set.
    pub fn is_final(&self) -> bool {
        !self.segmented && self.poll_final
    }

    /// More segments follow and the peer waits for an acknowledgement.
    pub fn needs_ack(&self) -> bool {
        self.segmented && self.poll_final
    }

    pub fn payload<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.data_offset..self.data_offset + self.data_len]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    Frame(DecodedFrame),
    /// The buffer holds the beginning of a frame only.
    Incomplete,
}

fn decode_address(buffer: &[u8], start: usize, end: usize) -> Result<(u32, usize), HdlcError> {
    let mut value = 0u32;
    for (i, &byte) in buffer[start..end].iter().take(4).enumerate() {
        value = (value << 7) | u32::from(byte >> 1);
        if byte & ADDRESS_END_BIT != 0 {
            return Ok((value, i + 1));
        }
    }
    Err(HdlcError::InvalidAddress)
}

/// Decodes the frame at the start of `buffer`.
///
/// Repeated flags before the frame (inter-frame fill, or the closing flag
/// of the previous frame left in place) are skipped; the last one opens the
/// frame. Offsets and `frame_len` of the result count the skipped flags.
pub fn decode(buffer: &[u8]) -> Result<Decode, HdlcError> {
    let flags = buffer.iter().take_while(|&&byte| byte == HDLC_FLAG).count();
    if buffer.is_empty() {
        return Ok(Decode::Incomplete);
    }
    if flags == 0 {
        return Err(HdlcError::InvalidFlag);
    }

    let start = flags - 1;
    Ok(match decode_frame_at(&buffer[start..])? {
        Decode::Frame(frame) => Decode::Frame(DecodedFrame {
            data_offset: frame.data_offset + start,
            frame_len: frame.frame_len + start,
            ..frame
        }),
        Decode::Incomplete => Decode::Incomplete,
    })
}

fn decode_frame_at(buffer: &[u8]) -> Result<Decode, HdlcError> {
    if buffer.len() < 3 {
        return Ok(Decode::Incomplete);
    }

    let format = buffer[1];
    if format & FORMAT_TYPE_MASK != FORMAT_TYPE_3 {
        return Err(HdlcError::InvalidFormat);
    }
    let segmented = format & SEGMENTATION_BIT != 0;
    let length = (usize::from(format & 0x07) << 8) | usize::from(buffer[2]);
    if length < MIN_FRAME_LENGTH {
        return Err(HdlcError::InvalidFormat);
    }

    let frame_len = length + 2;
    if buffer.len() < frame_len {
        return Ok(Decode::Incomplete);
    }
    if buffer[frame_len - 1] != HDLC_FLAG {
        return Err(HdlcError::InvalidFlag);
    }

    // Offsets below are relative to the buffer; the FCS sits before the closing flag
    let fcs_pos = frame_len - 3;
    let (dest_address, dest_len) = decode_address(buffer, 3, fcs_pos)?;
    let (src_address, src_len) = decode_address(buffer, 3 + dest_len, fcs_pos)?;
    let control_pos = 3 + dest_len + src_len;
    if control_pos >= fcs_pos {
        return Err(HdlcError::InvalidFormat);
    }
    let control = buffer[control_pos];

    let fcs = u16::from_le_bytes([buffer[fcs_pos], buffer[fcs_pos + 1]]);
    if compute_fcs(&buffer[1..fcs_pos]) != fcs {
        return Err(HdlcError::FcsError);
    }

    let hcs_pos = control_pos + 1;
    let (data_offset, data_len) = if hcs_pos == fcs_pos {
        (hcs_pos, 0)
    } else {
        if hcs_pos + 2 > fcs_pos {
            return Err(HdlcError::InvalidFormat);
        }
        let hcs = u16::from_le_bytes([buffer[hcs_pos], buffer[hcs_pos + 1]]);
        if compute_fcs(&buffer[1..hcs_pos]) != hcs {
            return Err(HdlcError::HcsError);
        }
        (hcs_pos + 2, fcs_pos - hcs_pos - 2)
    };

    let frame_type = FrameType::from_control(control);
    Ok(Decode::Frame(DecodedFrame {
        dest_address,
        src_address,
        control,
        frame_type,
        segmented,
        poll_final: control & POLL_FINAL_BIT != 0,
        send_seq: (control >> 1) & 0x07,
        recv_seq: (control >> 5) & 0x07,
        data_offset,
        data_len,
        frame_len,
    }))
}

// ============================================================================
// LLC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Unicast,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Command,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlcHeader {
    pub destination: Destination,
    pub message_type: MessageType,
}

/// Splits the LLC header off an information field.
pub fn parse_llc_header(input: &[u8]) -> Result<(&[u8], LlcHeader), HdlcError> {
    let (input, (dest_lsap, src_lsap, quality)) = (u8::<_, Error<&[u8]>>, u8, u8)
        .parse(input)
        .map_err(|_| HdlcError::InvalidLlc)?;
    if quality != 0x00 {
        return Err(HdlcError::InvalidLlc);
    }
    let destination = match dest_lsap {
        0xE6 => Destination::Unicast,
        0xFF => Destination::Broadcast,
        _ => return Err(HdlcError::InvalidLlc),
    };
    let message_type = match src_lsap {
        0xE6 => MessageType::Command,
        0xE7 => MessageType::Response,
        _ => return Err(HdlcError::InvalidLlc),
    };

    Ok((input, LlcHeader { destination, message_type }))
}
