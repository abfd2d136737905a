//! Application association: AARQ encoding and AARE parsing.
//!
//! Only logical-name referencing without ciphering is requested, with
//! either no authentication or low level security (password).
//!
//! Reference: DLMS Green Book Ed. 12, Section 11.4

use core::fmt;

use nom::{
    IResult, Parser,
    bytes::complete::take,
    error::{Error, ErrorKind},
    number::complete::{be_u16, u8 as nom_u8},
};
use thiserror::Error as ThisError;

// ============================================================================
// Constants
// ============================================================================

const TAG_AARQ: u8 = 0x60;
const TAG_AARE: u8 = 0x61;

/// A1: application-context-name, Logical_Name_Referencing_No_Ciphering.
const APPLICATION_CONTEXT_LN: [u8; 11] =
    [0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01];

/// 8A: sender-acse-requirements, authentication functional unit.
const ACSE_REQUIREMENTS_AUTH: [u8; 4] = [0x8A, 0x02, 0x07, 0x80];

/// 8B: mechanism-name, COSEM_lowest_level_security_mechanism_name.
const MECHANISM_LOW: [u8; 9] = [0x8B, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01];

const TAG_CALLING_AUTHENTICATION: u8 = 0xAC;
const TAG_CHARSTRING: u8 = 0x80;

/// BE: user-information wrapping an xDLMS InitiateRequest with conformance
/// `00 7E 1F` (get, set, action, block transfer, selective access) and a
/// maximum receive PDU size of 0xFFFF.
const USER_INFORMATION: [u8; 18] = [
    0xBE, 0x10, 0x04, 0x0E, 0x01, 0x00, 0x00, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x00, 0x7E,
    0x1F, 0xFF, 0xFF,
];

const INITIATE_RESPONSE: u8 = 0x08;

// ============================================================================
// Types
// ============================================================================

/// Authentication used when associating.
#[derive(Clone, PartialEq, Eq)]
pub enum Authentication {
    None,
    Low { password: Vec<u8> },
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Low { password } => write!(f, "Low {{ password: {} bytes }}", password.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationResult {
    Accepted,
    RejectedPermanent,
    RejectedTransient,
    Unknown(u8),
}

impl From<u8> for AssociationResult {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Accepted,
            1 => Self::RejectedPermanent,
            2 => Self::RejectedTransient,
            other => Self::Unknown(other),
        }
    }
}

/// Result source diagnostic (A3) of an AARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    User(u8),
    Provider(u8),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(code) => {
                let text = match code {
                    0 => "null",
                    1 => "no reason given",
                    2 => "application context name not supported",
                    11 => "authentication mechanism name not recognised",
                    12 => "authentication mechanism name required",
                    13 => "authentication failure",
                    14 => "authentication required",
                    _ => return write!(f, "acse-service-user {}", code),
                };
                write!(f, "{}", text)
            }
            Self::Provider(code) => match code {
                0 => write!(f, "null"),
                1 => write!(f, "no reason given"),
                2 => write!(f, "no common acse version"),
                _ => write!(f, "acse-service-provider {}", code),
            },
        }
    }
}

/// Fields of the xDLMS InitiateResponse the client reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiateResponse {
    pub dlms_version: u8,
    pub conformance: u32,
    pub max_pdu_size: u16,
}

/// A decoded AARE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aare {
    pub result: AssociationResult,
    pub diagnostic: Option<Diagnostic>,
    pub initiate_response: Option<InitiateResponse>,
}

impl Aare {
    pub fn is_accepted(&self) -> bool {
        self.result == AssociationResult::Accepted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum AssociationError {
    #[error("malformed AARE")]
    Malformed,
    #[error("association rejected ({result:?}, diagnostic: {})", .diagnostic.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string()))]
    Rejected { result: AssociationResult, diagnostic: Option<Diagnostic> },
    #[error("password of {0} bytes does not fit the AARQ")]
    PasswordTooLong(usize),
}

// ============================================================================
// AARQ
// ============================================================================

/// Encodes the AARQ APDU for `authentication`.
pub fn encode_aarq(authentication: &Authentication) -> Result<Vec<u8>, AssociationError> {
    let mut content = Vec::with_capacity(64);
    content.extend_from_slice(&APPLICATION_CONTEXT_LN);

    if let Authentication::Low { password } = authentication {
        // Keep every length in the short form
        if password.len() > 0x40 {
            return Err(AssociationError::PasswordTooLong(password.len()));
        }
        content.extend_from_slice(&ACSE_REQUIREMENTS_AUTH);
        content.extend_from_slice(&MECHANISM_LOW);
        content.push(TAG_CALLING_AUTHENTICATION);
        content.push(password.len() as u8 + 2);
        content.push(TAG_CHARSTRING);
        content.push(password.len() as u8);
        content.extend_from_slice(password);
    }

    content.extend_from_slice(&USER_INFORMATION);

    let mut apdu = Vec::with_capacity(content.len() + 2);
    apdu.push(TAG_AARQ);
    apdu.push(content.len() as u8);
    apdu.extend_from_slice(&content);
    Ok(apdu)
}

// ============================================================================
// AARE
// ============================================================================

fn parse_tag(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, tag) = nom_u8(input)?;
    if tag & 0x1F == 0x1F {
        // Multi-byte tags never appear in an AARE
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((input, tag))
}

fn parse_length(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, first) = nom_u8(input)?;
    if first & 0x80 == 0 {
        return Ok((input, usize::from(first)));
    }

    let num_octets = usize::from(first & 0x7F);
    if num_octets == 0 || num_octets > 2 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue)));
    }
    let (input, bytes) = take(num_octets).parse(input)?;
    Ok((input, bytes.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b))))
}

fn parse_tlv(input: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (input, tag) = parse_tag(input)?;
    let (input, length) = parse_length(input)?;
    let (input, content) = take(length).parse(input)?;
    Ok((input, (tag, content)))
}

/// INTEGER wrapped in a constructed context tag: `02 01 vv`.
fn parse_wrapped_integer(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, (tag, content)) = parse_tlv(input)?;
    if tag != 0x02 || content.len() != 1 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((input, content[0]))
}

fn parse_diagnostic(input: &[u8]) -> IResult<&[u8], Diagnostic> {
    let (input, (tag, content)) = parse_tlv(input)?;
    let (_, code) = parse_wrapped_integer(content)?;
    match tag {
        0xA1 => Ok((input, Diagnostic::User(code))),
        0xA2 => Ok((input, Diagnostic::Provider(code))),
        _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Tag))),
    }
}

fn parse_initiate_response(input: &[u8]) -> IResult<&[u8], InitiateResponse> {
    let (input, qos_present) = nom_u8(input)?;
    let (input, _) = take(usize::from(qos_present != 0)).parse(input)?;
    let (input, (dlms_version, conformance_tag, _, _)) =
        (nom_u8, be_u16, nom_u8, nom_u8).parse(input)?;
    if conformance_tag != 0x5F1F {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    let (input, conformance) = take(3usize).parse(input)?;
    let (input, max_pdu_size) = be_u16(input)?;

    let conformance = conformance.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    Ok((input, InitiateResponse { dlms_version, conformance, max_pdu_size }))
}

/// user-information: `04 len` octet string holding the xDLMS APDU.
fn parse_user_information(input: &[u8]) -> Option<InitiateResponse> {
    let (_, (tag, content)) = parse_tlv(input).ok()?;
    if tag != 0x04 {
        return None;
    }
    match content.split_first() {
        Some((&INITIATE_RESPONSE, rest)) => parse_initiate_response(rest).ok().map(|(_, r)| r),
        // A confirmed-service-error carries nothing worth reporting
        _ => None,
    }
}

/// Parses an AARE. Unknown fields are skipped.
pub fn parse_aare(input: &[u8]) -> Result<Aare, AssociationError> {
    let (_, (tag, mut content)) = parse_tlv(input).map_err(|_| AssociationError::Malformed)?;
    if tag != TAG_AARE {
        return Err(AssociationError::Malformed);
    }

    let mut result = None;
    let mut diagnostic = None;
    let mut initiate_response = None;

    while !content.is_empty() {
        let (rest, (field, value)) = parse_tlv(content).map_err(|_| AssociationError::Malformed)?;
        match field {
            0xA2 => {
                let (_, code) =
                    parse_wrapped_integer(value).map_err(|_| AssociationError::Malformed)?;
                result = Some(AssociationResult::from(code));
            }
            0xA3 => diagnostic = parse_diagnostic(value).ok().map(|(_, d)| d),
            0xBE => initiate_response = parse_user_information(value),
            _ => {}
        }
        content = rest;
    }

    let result = result.ok_or(AssociationError::Malformed)?;
    Ok(Aare { result, diagnostic, initiate_response })
}

/// Parses an AARE and turns anything but an acceptance into an error.
pub fn check_aare(input: &[u8]) -> Result<Aare, AssociationError> {
    let aare = parse_aare(input)?;
    if aare.is_accepted() {
        Ok(aare)
    } else {
        Err(AssociationError::Rejected { result: aare.result, diagnostic: aare.diagnostic })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepted AARE with InitiateResponse (conformance 00 50 1F, PDU 0x01F4).
    const AARE_ACCEPTED: [u8; 43] = [
        0x61, 0x29, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2, 0x03,
        0x02, 0x01, 0x00, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x00, 0xBE, 0x10, 0x04, 0x0E, 0x08,
        0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x00, 0x50, 0x1F, 0x01, 0xF4, 0x00, 0x07,
    ];

    #[test]
    fn test_aarq_without_authentication() {
        let apdu = encode_aarq(&Authentication::None).unwrap();

        assert_eq!(apdu[0], 0x60);
        assert_eq!(usize::from(apdu[1]), apdu.len() - 2);
        assert_eq!(&apdu[2..13], &APPLICATION_CONTEXT_LN);
        assert_eq!(&apdu[13..], &USER_INFORMATION);
    }

    #[test]
    fn test_aarq_low_level_security() {
        let auth = Authentication::Low { password: b"12345678".to_vec() };
        let apdu = encode_aarq(&auth).unwrap();

        let mut expected = vec![0x60, 0x36];
        expected.extend_from_slice(&APPLICATION_CONTEXT_LN);
        expected.extend_from_slice(&[0x8A, 0x02, 0x07, 0x80]);
        expected.extend_from_slice(&[0x8B, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01]);
        expected.extend_from_slice(&[0xAC, 0x0A, 0x80, 0x08]);
        expected.extend_from_slice(b"12345678");
        expected.extend_from_slice(&USER_INFORMATION);
        assert_eq!(apdu, expected);
    }

    #[test]
    fn test_aarq_rejects_long_password() {
        let auth = Authentication::Low { password: vec![b'x'; 0x41] };
        assert_eq!(encode_aarq(&auth), Err(AssociationError::PasswordTooLong(0x41)));
    }

    #[test]
    fn test_parse_accepted_aare() {
        let aare = check_aare(&AARE_ACCEPTED).unwrap();

        assert!(aare.is_accepted());
        assert_eq!(aare.diagnostic, Some(Diagnostic::User(0)));
        assert_eq!(
            aare.initiate_response,
            Some(InitiateResponse { dlms_version: 6, conformance: 0x00501F, max_pdu_size: 0x01F4 })
        );
    }

    #[test]
    fn test_parse_rejected_aare() {
        // Rejected permanent, authentication failure
        let input = [
            0x61, 0x1D, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2,
            0x03, 0x02, 0x01, 0x01, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x0D, 0xBE, 0x04, 0x04,
            0x02, 0x0E, 0x01,
        ];

        let err = check_aare(&input).unwrap_err();
        assert_eq!(
            err,
            AssociationError::Rejected {
                result: AssociationResult::RejectedPermanent,
                diagnostic: Some(Diagnostic::User(13)),
            }
        );
        assert!(err.to_string().contains("authentication failure"));
    }

    #[test]
    fn test_parse_malformed_aare() {
        assert_eq!(parse_aare(&[]), Err(AssociationError::Malformed));
        assert_eq!(parse_aare(&[0x60, 0x00]), Err(AssociationError::Malformed));
        // Missing result field
        assert_eq!(parse_aare(&[0x61, 0x00]), Err(AssociationError::Malformed));
        // Declared length beyond input
        assert_eq!(parse_aare(&AARE_ACCEPTED[..20]), Err(AssociationError::Malformed));
    }

    #[test]
    fn test_authentication_debug_hides_password() {
        let auth = Authentication::Low { password: b"secret".to_vec() };
        assert_eq!(format!("{:?}", auth), "Low { password: 6 bytes }");
    }
}
