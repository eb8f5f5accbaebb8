//! EAP message codec (RFC 3748 Section 4)
//!
//! ```text
//! +-----------------+-----------------+----------------------------------+
//! |    Code (1B)    | Identifier (1B) |           Length (2B)            |
//! +-----------------+-----------------+----------------------------------+
//! |    Type (1B)    |  Type-Data ...
//! +-----------------+-----
//! ```
//!
//! Success and Failure packets carry no type; their length is exactly 4.

use super::{EAP_TYPE_NAK, EAP_TYPE_NOTIFICATION};
use crate::ike::{Error, Result};

/// EAP header length in bytes
pub const EAP_HEADER_LENGTH: usize = 4;

/// EAP message code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapCode {
    /// Request (1)
    Request = 1,
    /// Response (2)
    Response = 2,
    /// Success (3)
    Success = 3,
    /// Failure (4)
    Failure = 4,
}

impl EapCode {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Typed portion of a Request/Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapData {
    /// EAP method type code
    pub type_code: u8,

    /// Method type data
    pub type_data: Vec<u8>,
}

impl EapData {
    /// Create new type data
    pub fn new(type_code: u8, type_data: Vec<u8>) -> Self {
        EapData {
            type_code,
            type_data,
        }
    }

    /// Encoded length (type byte + data)
    pub fn len(&self) -> usize {
        1 + self.type_data.len()
    }

    /// True when the type data is empty
    pub fn is_empty(&self) -> bool {
        self.type_data.is_empty()
    }
}

/// A decoded EAP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapMessage {
    /// Message code
    pub code: EapCode,

    /// Identifier matching requests to responses
    pub identifier: u8,

    /// Type and type-data; `None` for Success/Failure
    pub data: Option<EapData>,
}

impl EapMessage {
    /// Create a new message, enforcing the Success/Failure shape.
    pub fn new(code: EapCode, identifier: u8, data: Option<EapData>) -> Result<Self> {
        if matches!(code, EapCode::Success | EapCode::Failure) && data.is_some() {
            return Err(Error::InvalidSyntax(
                "EAP Success/Failure cannot carry type data".into(),
            ));
        }
        if matches!(code, EapCode::Request | EapCode::Response) && data.is_none() {
            return Err(Error::InvalidSyntax(
                "EAP Request/Response must carry a type".into(),
            ));
        }

        Ok(EapMessage {
            code,
            identifier,
            data,
        })
    }

    /// Total encoded length
    pub fn len(&self) -> usize {
        EAP_HEADER_LENGTH + self.data.as_ref().map(|d| d.len()).unwrap_or(0)
    }

    /// True when the message is header-only
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    /// Decode an EAP message from a packet.
    ///
    /// # Errors
    ///
    /// `InvalidSyntax` when the header is truncated, the declared length
    /// exceeds the buffer or undercuts the mandatory fields, or a
    /// Success/Failure packet has length other than 4.
    pub fn decode(packet: &[u8]) -> Result<Self> {
        if packet.len() < EAP_HEADER_LENGTH {
            return Err(Error::InvalidSyntax("EAP packet shorter than header".into()));
        }

        let code = EapCode::from_u8(packet[0])
            .ok_or_else(|| Error::InvalidSyntax(format!("Unknown EAP code: {}", packet[0])))?;
        let identifier = packet[1];
        let length = u16::from_be_bytes([packet[2], packet[3]]) as usize;

        if length < EAP_HEADER_LENGTH {
            return Err(Error::InvalidSyntax(
                "EAP declared length below header size".into(),
            ));
        }
        if length > packet.len() {
            return Err(Error::InvalidSyntax(
                "EAP packet shorter than declared length".into(),
            ));
        }

        let data = match code {
            EapCode::Request | EapCode::Response => {
                if length < EAP_HEADER_LENGTH + 1 {
                    return Err(Error::InvalidSyntax(
                        "EAP Request/Response missing type byte".into(),
                    ));
                }
                Some(EapData::new(packet[4], packet[5..length].to_vec()))
            }
            EapCode::Success | EapCode::Failure => {
                if length != EAP_HEADER_LENGTH {
                    return Err(Error::InvalidSyntax(
                        "EAP Success/Failure packets must be length 4".into(),
                    ));
                }
                None
            }
        };

        EapMessage::new(code, identifier, data)
    }

    /// Encode this message to its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let length = self.len();
        let mut out = Vec::with_capacity(length);
        out.push(self.code.to_u8());
        out.push(self.identifier);
        out.extend_from_slice(&(length as u16).to_be_bytes());

        if let Some(data) = &self.data {
            out.push(data.type_code);
            out.extend_from_slice(&data.type_data);
        }

        out
    }

    /// Build an EAP-Response carrying method type data.
    pub fn response(identifier: u8, type_code: u8, type_data: Vec<u8>) -> Self {
        EapMessage {
            code: EapCode::Response,
            identifier,
            data: Some(EapData::new(type_code, type_data)),
        }
    }

    /// Build an EAP-Response/Notification for the given identifier.
    pub fn notification_response(identifier: u8) -> Self {
        Self::response(identifier, EAP_TYPE_NOTIFICATION, Vec::new())
    }

    /// Build an EAP-Response/Nak advertising the desired method types.
    pub fn nak_response(identifier: u8, desired_types: &[u8]) -> Self {
        Self::response(identifier, EAP_TYPE_NAK, desired_types.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eap::{EAP_TYPE_MSCHAP_V2, EAP_TYPE_SIM};

    #[test]
    fn test_code_conversion() {
        assert_eq!(EapCode::from_u8(1), Some(EapCode::Request));
        assert_eq!(EapCode::from_u8(4), Some(EapCode::Failure));
        assert_eq!(EapCode::from_u8(5), None);
        assert_eq!(EapCode::Response.to_u8(), 2);
    }

    #[test]
    fn test_request_roundtrip() {
        let message = EapMessage::new(
            EapCode::Request,
            0x10,
            Some(EapData::new(EAP_TYPE_SIM, vec![0x0A, 0x00, 0x00])),
        )
        .unwrap();

        let encoded = message.encode();
        assert_eq!(encoded[0], 1);
        assert_eq!(encoded[1], 0x10);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), 8);
        assert_eq!(encoded[4], EAP_TYPE_SIM);

        let decoded = EapMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_success_roundtrip() {
        let message = EapMessage::new(EapCode::Success, 7, None).unwrap();
        let encoded = message.encode();
        assert_eq!(encoded, vec![3, 7, 0, 4]);

        let decoded = EapMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.code, EapCode::Success);
        assert!(decoded.data.is_none());
    }

    #[test]
    fn test_success_with_data_rejected() {
        assert!(EapMessage::new(
            EapCode::Success,
            7,
            Some(EapData::new(EAP_TYPE_SIM, Vec::new()))
        )
        .is_err());

        // Success packet with declared length 5
        let packet = [3, 7, 0, 5, 18];
        assert!(matches!(
            EapMessage::decode(&packet),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_decode_truncated_header() {
        assert!(EapMessage::decode(&[1, 2, 0]).is_err());
    }

    #[test]
    fn test_decode_declared_longer_than_buffer() {
        let packet = [1, 2, 0, 10, 18];
        assert!(matches!(
            EapMessage::decode(&packet),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_decode_request_missing_type() {
        let packet = [1, 2, 0, 4];
        assert!(matches!(
            EapMessage::decode(&packet),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_decode_unknown_code() {
        let packet = [9, 2, 0, 4];
        assert!(matches!(
            EapMessage::decode(&packet),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_beyond_declared_length_ignored() {
        // Declared length 9 covers type + 4 data bytes; two stray bytes follow
        let packet = [2, 5, 0, 9, 26, 1, 2, 3, 4, 0xEE, 0xFF];
        let decoded = EapMessage::decode(&packet).unwrap();
        let data = decoded.data.unwrap();
        assert_eq!(data.type_code, 26);
        assert_eq!(data.type_data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_nak_response() {
        let nak = EapMessage::nak_response(0x22, &[EAP_TYPE_MSCHAP_V2]);
        let encoded = nak.encode();
        assert_eq!(encoded, vec![2, 0x22, 0, 6, 3, 0x1A]);
    }

    #[test]
    fn test_notification_response() {
        let resp = EapMessage::notification_response(9);
        let encoded = resp.encode();
        assert_eq!(encoded, vec![2, 9, 0, 5, 2]);
    }
}
