//! GET service APDUs (DLMS Green Book Ed. 12, Table 70).
//!
//! Response data is kept as raw A-XDR bytes: a long read arrives in blocks
//! whose boundaries fall anywhere inside the encoded value, so decoding
//! happens only once every block has been collected.
//!
//! # APDU Tags
//! - GET-Request: 0xC0
//! - GET-Response: 0xC4

use core::fmt;

use derive_try_from_primitive::TryFromPrimitive;
use log::warn;
use nom::{
    IResult, Parser,
    bytes::complete::take,
    combinator::rest,
    error::{Error, ErrorKind},
    number::complete::{be_u16, be_u32, u8 as nom_u8},
};

use crate::axdr::{decode_length, encode_length};
use crate::obis_code::ObisCode;

pub const GET_REQUEST_TAG: u8 = 0xC0;
pub const GET_RESPONSE_TAG: u8 = 0xC4;

/// Invoke-id 1, confirmed service, high priority.
pub const DEFAULT_INVOKE_ID: u8 = 0xC1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetRequest {
    /// GET-Request-Normal (choice 0x01)
    Normal(GetRequestNormal),
    /// GET-Request-Next (choice 0x02)
    NextDataBlock(GetRequestNext),
}

/// ```text
/// C0 01 C1 00 03 01 01 01 08 00 FF 02 00
/// │  │  │  │     └───────────────┘  │  └─ no access selection
/// │  │  │  class_id   instance_id   attribute_id
/// │  │  invoke_id
/// │  choice: Normal
/// tag: GET-Request
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequestNormal {
    pub invoke_id: u8,
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub attribute_id: u8,
    pub access_selection: Option<AccessSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequestNext {
    pub invoke_id: u8,
    pub block_number: u32,
}

/// Selective access: selector plus its already encoded parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessSelector {
    pub selector: u8,
    pub parameters: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetResponse {
    /// GET-Response-Normal (choice 0x01)
    Normal(GetResponseNormal),
    /// GET-Response-With-Datablock (choice 0x02)
    WithDataBlock(GetResponseWithDataBlock),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponseNormal {
    pub invoke_id: u8,
    pub result: GetDataResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponseWithDataBlock {
    pub invoke_id: u8,
    pub last_block: bool,
    pub block_number: u32,
    pub result: GetDataResult,
}

/// Either encoded data (choice 0x00) or an access error (choice 0x01).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetDataResult {
    Data(Vec<u8>),
    DataAccessError(DataAccessResult),
}

/// Data access error codes (Blue Book Section 4.1.8.3.2). Codes outside
/// this list are rejected when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum DataAccessResult {
    Success = 0,
    HardwareFault = 1,
    TemporaryFailure = 2,
    ReadWriteDenied = 3,
    ObjectUndefined = 4,
    ObjectClassInconsistent = 9,
    ObjectUnavailable = 11,
    TypeUnmatched = 12,
    ScopeOfAccessViolated = 13,
    DataBlockUnavailable = 14,
    LongGetAborted = 15,
    NoLongGetInProgress = 16,
    LongSetAborted = 17,
    NoLongSetInProgress = 18,
    DataBlockNumberInvalid = 19,
    OtherReason = 250,
}

impl fmt::Display for DataAccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::HardwareFault => "hardware fault",
            Self::TemporaryFailure => "temporary failure",
            Self::ReadWriteDenied => "read write denied",
            Self::ObjectUndefined => "object undefined",
            Self::ObjectClassInconsistent => "object class inconsistent",
            Self::ObjectUnavailable => "object unavailable",
            Self::TypeUnmatched => "type unmatched",
            Self::ScopeOfAccessViolated => "scope of access violated",
            Self::DataBlockUnavailable => "data block unavailable",
            Self::LongGetAborted => "long get aborted",
            Self::NoLongGetInProgress => "no long get in progress",
            Self::LongSetAborted => "long set aborted",
            Self::NoLongSetInProgress => "no long set in progress",
            Self::DataBlockNumberInvalid => "data block number invalid",
            Self::OtherReason => "other reason",
        };
        f.write_str(text)
    }
}

// ============================================================================
// Encoding
// ============================================================================

impl GetRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![GET_REQUEST_TAG];

        match self {
            GetRequest::Normal(req) => {
                buf.push(0x01);
                buf.push(req.invoke_id);
                buf.extend_from_slice(&req.class_id.to_be_bytes());
                buf.extend_from_slice(&req.instance_id.encode());
                buf.push(req.attribute_id);

                if let Some(access) = &req.access_selection {
                    buf.push(0x01);
                    buf.push(access.selector);
                    buf.extend_from_slice(&access.parameters);
                } else {
                    buf.push(0x00);
                }
            }
            GetRequest::NextDataBlock(req) => {
                buf.push(0x02);
                buf.push(req.invoke_id);
                buf.extend_from_slice(&req.block_number.to_be_bytes());
            }
        }

        buf
    }
}

fn encode_result(result: &GetDataResult, block: bool, buf: &mut Vec<u8>) {
    match result {
        GetDataResult::Data(data) => {
            buf.push(0x00);
            if block {
                encode_length(data.len(), buf);
            }
            buf.extend_from_slice(data);
        }
        GetDataResult::DataAccessError(error) => {
            buf.push(0x01);
            buf.push(*error as u8);
        }
    }
}

impl GetResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![GET_RESPONSE_TAG];

        match self {
            GetResponse::Normal(resp) => {
                buf.push(0x01);
                buf.push(resp.invoke_id);
                encode_result(&resp.result, false, &mut buf);
            }
            GetResponse::WithDataBlock(resp) => {
                buf.push(0x02);
                buf.push(resp.invoke_id);
                buf.push(u8::from(resp.last_block));
                buf.extend_from_slice(&resp.block_number.to_be_bytes());
                encode_result(&resp.result, true, &mut buf);
            }
        }

        buf
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_access_error(input: &[u8]) -> IResult<&[u8], GetDataResult> {
    let (input, code) = nom_u8(input)?;
    let error = DataAccessResult::try_from(code)
        .map_err(|_| nom::Err::Error(Error::new(input, ErrorKind::Verify)))?;
    Ok((input, GetDataResult::DataAccessError(error)))
}

/// Raw data of one block: an A-XDR length followed by that many bytes.
/// A block shorter than announced yields what is there.
fn parse_raw_block(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, length) = decode_length(input)?;
    let length = length as usize;
    if input.len() < length {
        warn!("Data block announces {} bytes but carries {}", length, input.len());
        let (input, data) = rest(input)?;
        return Ok((input, data.to_vec()));
    }
    let (input, data) = take(length).parse(input)?;
    Ok((input, data.to_vec()))
}

impl GetRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (tag, choice)) = (nom_u8, nom_u8).parse(input)?;
        if tag != GET_REQUEST_TAG {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }

        match choice {
            0x01 => {
                let (input, (invoke_id, class_id, instance_id, attribute_id, selection)) =
                    (nom_u8, be_u16, ObisCode::parse, nom_u8, nom_u8).parse(input)?;
                let (input, access_selection) = if selection == 0x01 {
                    let (input, (selector, parameters)) = (nom_u8, rest).parse(input)?;
                    (input, Some(AccessSelector { selector, parameters: parameters.to_vec() }))
                } else {
                    (input, None)
                };

                Ok((
                    input,
                    GetRequest::Normal(GetRequestNormal {
                        invoke_id,
                        class_id,
                        instance_id,
                        attribute_id,
                        access_selection,
                    }),
                ))
            }
            0x02 => {
                let (input, (invoke_id, block_number)) = (nom_u8, be_u32).parse(input)?;
                Ok((input, GetRequest::NextDataBlock(GetRequestNext { invoke_id, block_number })))
            }
            _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Switch))),
        }
    }
}

impl GetResponse {
    /// Parses a GET-Response. Normal data extends to the end of `input`.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (tag, choice)) = (nom_u8, nom_u8).parse(input)?;
        if tag != GET_RESPONSE_TAG {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
        }

        match choice {
            0x01 => {
                let (input, (invoke_id, result_choice)) = (nom_u8, nom_u8).parse(input)?;
                let (input, result) = match result_choice {
                    0x00 => {
                        let (input, data) = rest(input)?;
                        (input, GetDataResult::Data(data.to_vec()))
                    }
                    _ => parse_access_error(input)?,
                };
                Ok((input, GetResponse::Normal(GetResponseNormal { invoke_id, result })))
            }
            0x02 => {
                let (input, (invoke_id, last_block, block_number, result_choice)) =
                    (nom_u8, nom_u8, be_u32, nom_u8).parse(input)?;
                let (input, result) = match result_choice {
                    0x00 => {
                        let (input, data) = parse_raw_block(input)?;
                        (input, GetDataResult::Data(data))
                    }
                    _ => parse_access_error(input)?,
                };
                Ok((
                    input,
                    GetResponse::WithDataBlock(GetResponseWithDataBlock {
                        invoke_id,
                        last_block: last_block != 0x00,
                        block_number,
                        result,
                    }),
                ))
            }
            _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Switch))),
        }
    }
}
