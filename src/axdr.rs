//! A-XDR tagged value walker.
//!
//! Values are laid out depth-first: a container announces its child count and
//! its children simply follow it. The walker therefore never recurses; it
//! reports every value in document order through a callback and leaves the
//! nesting to the consumer.

use derive_try_from_primitive::TryFromPrimitive;
use nom::{
    IResult, Parser,
    bytes::complete::take,
    error::{Error, ErrorKind},
    number::complete::u8,
};
use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
#[rustfmt::skip]
pub enum DataType {
  Null               = 0x00,
  Array              = 0x01,
  Structure          = 0x02,
  Bool               = 0x03,
  BitString          = 0x04,
  DoubleLong         = 0x05,
  DoubleLongUnsigned = 0x06,
  OctetString        = 0x09,
  VisibleString      = 0x0A,
  Utf8String         = 0x0C,
  BinaryCodedDecimal = 0x0D,
  Integer            = 0x0F,
  Long               = 0x10,
  Unsigned           = 0x11,
  LongUnsigned       = 0x12,
  CompactArray       = 0x13,
  Long64             = 0x14,
  Long64Unsigned     = 0x15,
  Enum               = 0x16,
  Float32            = 0x17,
  Float64            = 0x18,
  DateTime           = 0x19,
  Date               = 0x1A,
  Time               = 0x1B,
}

impl DataType {
    /// Content size of fixed-width types, `None` for containers and strings.
    pub fn fixed_size(self) -> Option<usize> {
        Some(match self {
            Self::Null => 0,
            Self::Bool | Self::BinaryCodedDecimal | Self::Integer | Self::Unsigned | Self::Enum => 1,
            Self::Long | Self::LongUnsigned => 2,
            Self::DoubleLong | Self::DoubleLongUnsigned | Self::Float32 | Self::Time => 4,
            Self::Date => 5,
            Self::Long64 | Self::Long64Unsigned | Self::Float64 => 8,
            Self::DateTime => 12,
            Self::Array
            | Self::Structure
            | Self::BitString
            | Self::OctetString
            | Self::VisibleString
            | Self::Utf8String
            | Self::CompactArray => return None,
        })
    }

    pub fn is_container(self) -> bool {
        matches!(self, Self::Array | Self::Structure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum AxdrError {
    #[error("truncated value at offset {offset}")]
    Truncated { offset: usize },
    #[error("invalid length encoding at offset {offset}")]
    InvalidLength { offset: usize },
    #[error("unsupported tag 0x{tag:02X} at offset {offset}")]
    UnsupportedTag { tag: u8, offset: usize },
}

/// Decodes an A-XDR length: one byte below `0x80`, otherwise `0x80 | n`
/// followed by `n` big-endian length bytes (at most four).
pub fn decode_length(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, first) = u8(input)?;
    if first & 0x80 == 0 {
        return Ok((input, u32::from(first)));
    }

    let count = usize::from(first & 0x7F);
    if count == 0 || count > 4 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue)));
    }
    let (input, bytes) = take(count).parse(input)?;
    let length = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Ok((input, length))
}

pub fn encode_length(length: usize, buf: &mut Vec<u8>) {
    if length < 0x80 {
        buf.push(length as u8);
    } else if length <= 0xFF {
        buf.extend_from_slice(&[0x81, length as u8]);
    } else if length <= 0xFFFF {
        buf.push(0x82);
        buf.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        buf.push(0x84);
        buf.extend_from_slice(&(length as u32).to_be_bytes());
    }
}

/// One decoded value header plus its content bytes.
struct Item<'a> {
    tag: u8,
    length: u32,
    content: &'a [u8],
}

fn item(data_type: DataType, tag: u8, input: &[u8]) -> IResult<&[u8], Item<'_>> {
    if let Some(size) = data_type.fixed_size() {
        let (input, content) = take(size).parse(input)?;
        return Ok((input, Item { tag, length: size as u32, content }));
    }

    let (input, length) = decode_length(input)?;
    match data_type {
        DataType::Array | DataType::Structure => Ok((input, Item { tag, length, content: &[] })),
        DataType::BitString => {
            // Length counts bits; content is padded to whole bytes
            let (input, content) = take(length.div_ceil(8) as usize).parse(input)?;
            Ok((input, Item { tag, length, content }))
        }
        _ => {
            let (input, content) = take(length as usize).parse(input)?;
            Ok((input, Item { tag, length, content }))
        }
    }
}

/// Walks `input` and calls `sink(tag, length, content)` once per value.
///
/// `length` is the child count for containers, the bit count for bit
/// strings and the byte count for everything else. A tag the walker cannot
/// size (compact arrays, unknown tags) is still reported, with an empty
/// content, before the walk stops with [`AxdrError::UnsupportedTag`].
///
/// Returns the number of values reported.
pub fn decode_tags<F>(input: &[u8], mut sink: F) -> Result<usize, AxdrError>
where
    F: FnMut(u8, u32, &[u8]),
{
    let mut rest = input;
    let mut count = 0;

    while !rest.is_empty() {
        let offset = input.len() - rest.len();
        let tag = rest[0];

        let data_type = match DataType::try_from(tag) {
            Ok(DataType::CompactArray) | Err(_) => {
                sink(tag, 0, &[]);
                return Err(AxdrError::UnsupportedTag { tag, offset });
            }
            Ok(data_type) => data_type,
        };

        let (next, value) = item(data_type, tag, &rest[1..]).map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) if e.code == ErrorKind::LengthValue => {
                AxdrError::InvalidLength { offset }
            }
            _ => AxdrError::Truncated { offset },
        })?;

        sink(value.tag, value.length, value.content);
        count += 1;
        rest = next;
    }

    Ok(count)
}
