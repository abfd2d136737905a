//! Range selective access on profile generic buffers.
//!
//! The range descriptor (selector 1) restricts the buffer of a profile
//! generic object to the entries whose clock column lies between two
//! timestamps:
//!
//! ```text
//! 02 04                          structure(4)
//!    02 04                         restricting object: structure(4)
//!       12 00 08                     class_id 8 (clock)
//!       09 06 00 00 01 00 00 FF      logical name 0.0.1.0.0.255
//!       0F 02                        attribute 2 (time)
//!       12 00 00                     data index 0
//!    09 0C <12 bytes>              from value
//!    09 0C <12 bytes>              to value
//!    01 00                         selected values: all columns
//! ```

use chrono::NaiveDateTime;
use log::warn;

use crate::datetime::{CosemDateTime, DATE_TIME_LEN};
use crate::get::AccessSelector;
use crate::obis_code::ObisCode;

/// Date format accepted on the command line, e.g. `2024-01-31.23:59:00`.
pub const DATE_FORMAT: &str = "%Y-%m-%d.%H:%M:%S";

pub const PROFILE_GENERIC_CLASS_ID: u16 = 7;
pub const BUFFER_ATTRIBUTE_ID: u8 = 2;

const RANGE_DESCRIPTOR: u8 = 0x01;
const CLOCK_CLASS_ID: u16 = 8;
const CLOCK_TIME_ATTRIBUTE: i8 = 2;
const CLOCK_LOGICAL_NAME: ObisCode = ObisCode { a: 0, b: 0, c: 1, d: 0, e: 0, f: 255 };

/// Time window of a profile read. A missing end is sent as the undefined
/// timestamp, leaving the upper bound open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

impl ReadWindow {
    /// Builds the window from command line values. Without a valid start
    /// there is no window; an end that does not parse is dropped.
    pub fn from_args(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        let start = match NaiveDateTime::parse_from_str(start?, DATE_FORMAT) {
            Ok(start) => start,
            Err(err) => {
                warn!("Ignoring start date: {}", err);
                return None;
            }
        };
        let end = end.and_then(|end| {
            NaiveDateTime::parse_from_str(end, DATE_FORMAT)
                .inspect_err(|err| warn!("Ignoring end date: {}", err))
                .ok()
        });
        Some(Self { start, end })
    }

    /// Only the buffer of a profile generic object supports the window.
    pub fn applies_to(class_id: u16, attribute_id: u8) -> bool {
        class_id == PROFILE_GENERIC_CLASS_ID && attribute_id == BUFFER_ATTRIBUTE_ID
    }

    pub fn encode_parameters(&self) -> Vec<u8> {
        let from = CosemDateTime::from_naive(&self.start);
        let to = self.end.as_ref().map_or_else(CosemDateTime::undefined, CosemDateTime::from_naive);

        let mut buf = Vec::with_capacity(52);
        buf.extend_from_slice(&[0x02, 0x04, 0x02, 0x04, 0x12]);
        buf.extend_from_slice(&CLOCK_CLASS_ID.to_be_bytes());
        buf.extend_from_slice(&[0x09, 0x06]);
        buf.extend_from_slice(&CLOCK_LOGICAL_NAME.encode());
        buf.extend_from_slice(&[0x0F, CLOCK_TIME_ATTRIBUTE as u8, 0x12, 0x00, 0x00]);
        for value in [from, to] {
            buf.extend_from_slice(&[0x09, DATE_TIME_LEN as u8]);
            buf.extend_from_slice(&value.encode());
        }
        buf.extend_from_slice(&[0x01, 0x00]);
        buf
    }

    pub fn access_selector(&self) -> AccessSelector {
        AccessSelector { selector: RANGE_DESCRIPTOR, parameters: self.encode_parameters() }
    }
}
