//! COSEM date and time values (Blue Book 4.1.6.1).
//!
//! A `date-time` is 12 bytes on the wire:
//!
//! ```text
//! year(2) month day day-of-week hour minute second hundredths deviation(2) status
//! ```
//!
//! `0xFF` (or `0xFFFF` for the year) marks a field as not specified and a
//! deviation of `0x8000` means the offset to UTC is unknown.

use core::fmt;

use chrono::{Datelike, NaiveDateTime, Timelike};
use nom::{
    IResult, Parser,
    error::{Error, ErrorKind},
    number::complete::{be_i16, be_u16, u8},
};

pub const DATE_TIME_LEN: usize = 12;
pub const DATE_LEN: usize = 5;
pub const TIME_LEN: usize = 4;

const NOT_SPECIFIED: u8 = 0xFF;
const YEAR_NOT_SPECIFIED: u16 = 0xFFFF;

/// Deviation value meaning "offset to UTC not specified".
pub const DEVIATION_NOT_SPECIFIED: i16 = i16::MIN;

fn verify<T>(input: &[u8], value: T, valid: bool) -> IResult<&[u8], T> {
    if valid { Ok((input, value)) } else { Err(nom::Err::Error(Error::new(input, ErrorKind::Verify))) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CosemDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub day_of_week: u8,
}

impl CosemDate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (year, month, day, day_of_week)) = (be_u16, u8, u8, u8).parse(input)?;

        // 0xFD and 0xFE are daylight-saving markers for month and last days of month
        let (input, month) = verify(input, month, matches!(month, 1..=12 | 0xFD..=0xFF))?;
        let (input, day) = verify(input, day, matches!(day, 1..=31 | 0xFD..=0xFF))?;
        let (input, day_of_week) =
            verify(input, day_of_week, matches!(day_of_week, 1..=7 | NOT_SPECIFIED))?;

        Ok((input, Self { year, month, day, day_of_week }))
    }
}

impl fmt::Display for CosemDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CosemTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

impl CosemTime {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (hour, minute, second, hundredths)) = (u8, u8, u8, u8).parse(input)?;

        let (input, hour) = verify(input, hour, matches!(hour, 0..=23 | NOT_SPECIFIED))?;
        let (input, minute) = verify(input, minute, matches!(minute, 0..=59 | NOT_SPECIFIED))?;
        let (input, second) = verify(input, second, matches!(second, 0..=59 | NOT_SPECIFIED))?;
        let (input, hundredths) =
            verify(input, hundredths, matches!(hundredths, 0..=99 | NOT_SPECIFIED))?;

        Ok((input, Self { hour, minute, second, hundredths }))
    }
}

impl fmt::Display for CosemTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.hour, self.minute, self.second)
    }
}

/// A COSEM `date-time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CosemDateTime {
    pub date: CosemDate,
    pub time: CosemTime,
    pub deviation: i16,
    pub status: u8,
}

impl CosemDateTime {
    /// A value with every field set to "not specified".
    pub fn undefined() -> Self {
        Self {
            date: CosemDate {
                year: YEAR_NOT_SPECIFIED,
                month: NOT_SPECIFIED,
                day: NOT_SPECIFIED,
                day_of_week: NOT_SPECIFIED,
            },
            time: CosemTime {
                hour: NOT_SPECIFIED,
                minute: NOT_SPECIFIED,
                second: NOT_SPECIFIED,
                hundredths: NOT_SPECIFIED,
            },
            deviation: DEVIATION_NOT_SPECIFIED,
            status: NOT_SPECIFIED,
        }
    }

    /// Converts a local calendar time. Day of week, deviation and clock
    /// status are left unspecified and hundredths are zero.
    pub fn from_naive(value: &NaiveDateTime) -> Self {
        Self {
            date: CosemDate {
                year: value.year().clamp(0, i32::from(u16::MAX - 1)) as u16,
                month: value.month() as u8,
                day: value.day() as u8,
                day_of_week: NOT_SPECIFIED,
            },
            time: CosemTime {
                hour: value.hour() as u8,
                minute: value.minute() as u8,
                second: value.second() as u8,
                hundredths: 0,
            },
            deviation: DEVIATION_NOT_SPECIFIED,
            status: NOT_SPECIFIED,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (date, time, deviation, status)) =
            (CosemDate::parse, CosemTime::parse, be_i16, u8).parse(input)?;
        let (input, deviation) = verify(
            input,
            deviation,
            deviation == DEVIATION_NOT_SPECIFIED || (-720..=720).contains(&deviation),
        )?;

        Ok((input, Self { date, time, deviation, status }))
    }

    /// Decodes exactly [`DATE_TIME_LEN`] bytes; anything else is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match Self::parse(bytes) {
            Ok((rest, value)) if rest.is_empty() => Some(value),
            _ => None,
        }
    }

    pub fn encode(&self) -> [u8; DATE_TIME_LEN] {
        let year = self.date.year.to_be_bytes();
        let deviation = self.deviation.to_be_bytes();
        [
            year[0],
            year[1],
            self.date.month,
            self.date.day,
            self.date.day_of_week,
            self.time.hour,
            self.time.minute,
            self.time.second,
            self.time.hundredths,
            deviation[0],
            deviation[1],
            self.status,
        ]
    }
}

impl fmt::Display for CosemDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date, self.time)
    }
}
