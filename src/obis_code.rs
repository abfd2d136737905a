use core::fmt::{self, Debug, Display};
use core::str::FromStr;

use nom::{IResult, Parser, number::complete::u8};
use thiserror::Error;

/// An OBIS code (the logical name of a COSEM object).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObisCode {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: u8,
}

/// Error returned when a dotted logical name cannot be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid logical name `{0}`: expected six dot-separated values 0-255")]
pub struct InvalidLogicalName(pub String);

impl ObisCode {
    pub fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, (a, b, c, d, e, f)) = (u8, u8, u8, u8, u8, u8).parse(input)?;
        Ok((input, Self::new(a, b, c, d, e, f)))
    }

    pub fn encode(&self) -> [u8; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

impl FromStr for ObisCode {
    type Err = InvalidLogicalName;

    /// Parses the dotted form `1.0.1.8.0.255`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidLogicalName(s.to_string());

        let mut values = [0u8; 6];
        let mut parts = s.trim().split('.');
        for value in values.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            *value = part.trim().parse::<u8>().map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        let [a, b, c, d, e, f] = values;
        Ok(Self::new(a, b, c, d, e, f))
    }
}

impl Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}:{}.{}.{}*{}", self.a, self.b, self.c, self.d, self.e, self.f)
    }
}

impl Debug for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObisCode({})", self)
    }
}
