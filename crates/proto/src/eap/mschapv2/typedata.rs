//! EAP MSCHAPv2 type data codec
//!
//! Packets are framed by a 1-byte op-code, a 1-byte MSCHAPv2 identifier
//! and a 2-byte MS-Length, followed by an op-code specific body
//! (draft-kamath-pppext-eap-mschapv2 Section 2).

use crate::ike::{Error, Result};

/// Op-code: Challenge (1)
pub const OP_CHALLENGE: u8 = 1;
/// Op-code: Response (2)
pub const OP_RESPONSE: u8 = 2;
/// Op-code: Success (3)
pub const OP_SUCCESS: u8 = 3;
/// Op-code: Failure (4)
pub const OP_FAILURE: u8 = 4;

/// Challenge Value-Size
pub const CHALLENGE_VALUE_SIZE: u8 = 16;
/// Response Value-Size: peer challenge + reserved + NT-Response + flags
pub const RESPONSE_VALUE_SIZE: u8 = 49;

const TYPE_DATA_HEADER_SIZE: usize = 5;
const RESERVED_BYTES: usize = 8;

/// A decoded MSCHAPv2 Challenge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    /// MSCHAPv2 transaction identifier
    pub mschapv2_id: u8,

    /// 16-byte authenticator challenge
    pub challenge: [u8; 16],

    /// Authenticator name
    pub name: Vec<u8>,
}

impl ChallengeRequest {
    /// Decode a Challenge request from EAP type data.
    pub fn decode(type_data: &[u8]) -> Result<Self> {
        if type_data.len() < TYPE_DATA_HEADER_SIZE {
            return Err(Error::InvalidSyntax("MSCHAPv2 packet too short".into()));
        }
        if type_data[0] != OP_CHALLENGE {
            return Err(Error::InvalidSyntax(format!(
                "Expected Challenge op-code, got {}",
                type_data[0]
            )));
        }

        let mschapv2_id = type_data[1];
        let ms_length = u16::from_be_bytes([type_data[2], type_data[3]]) as usize;
        let value_size = type_data[4];

        if value_size != CHALLENGE_VALUE_SIZE {
            return Err(Error::InvalidSyntax("Challenge Value-Size must be 16".into()));
        }
        if type_data.len() < TYPE_DATA_HEADER_SIZE + 16 {
            return Err(Error::InvalidSyntax("Challenge value truncated".into()));
        }

        let mut challenge = [0u8; 16];
        challenge.copy_from_slice(&type_data[5..21]);

        let name_len = ms_length
            .checked_sub(TYPE_DATA_HEADER_SIZE + 16)
            .ok_or_else(|| Error::InvalidSyntax("Invalid MS-Length specified".into()))?;
        if type_data.len() < 21 + name_len {
            return Err(Error::InvalidSyntax("Challenge name truncated".into()));
        }

        Ok(ChallengeRequest {
            mschapv2_id,
            challenge,
            name: type_data[21..21 + name_len].to_vec(),
        })
    }
}

/// An MSCHAPv2 Response packet under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// MSCHAPv2 transaction identifier (copied from the challenge)
    pub mschapv2_id: u8,

    /// 16-byte peer challenge
    pub peer_challenge: [u8; 16],

    /// 24-byte NT-Response
    pub nt_response: [u8; 24],

    /// Peer name (the username)
    pub name: Vec<u8>,
}

impl ChallengeResponse {
    /// Encode to EAP type data: op-code 2, Value-Size 49, peer challenge,
    /// 8 zero reserved bytes, NT-Response, zero flags, name.
    pub fn encode(&self) -> Vec<u8> {
        let ms_length = TYPE_DATA_HEADER_SIZE + RESPONSE_VALUE_SIZE as usize + self.name.len();

        let mut out = Vec::with_capacity(ms_length);
        out.push(OP_RESPONSE);
        out.push(self.mschapv2_id);
        out.extend_from_slice(&(ms_length as u16).to_be_bytes());
        out.push(RESPONSE_VALUE_SIZE);
        out.extend_from_slice(&self.peer_challenge);
        out.extend_from_slice(&[0u8; RESERVED_BYTES]);
        out.extend_from_slice(&self.nt_response);
        out.push(0); // flags
        out.extend_from_slice(&self.name);
        out
    }
}

/// A decoded MSCHAPv2 Success request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessRequest {
    /// MSCHAPv2 transaction identifier
    pub mschapv2_id: u8,

    /// The 42-character `"S=<40 hex>"` authenticator response
    pub authenticator_response: String,

    /// Optional operator message
    pub message: String,
}

impl SuccessRequest {
    /// Decode a Success request from EAP type data.
    ///
    /// The body is `S=<auth_string> M=<message>`.
    pub fn decode(type_data: &[u8]) -> Result<Self> {
        if type_data.len() < 4 {
            return Err(Error::InvalidSyntax("MSCHAPv2 packet too short".into()));
        }
        if type_data[0] != OP_SUCCESS {
            return Err(Error::InvalidSyntax(format!(
                "Expected Success op-code, got {}",
                type_data[0]
            )));
        }

        let mschapv2_id = type_data[1];
        let ms_length = u16::from_be_bytes([type_data[2], type_data[3]]) as usize;
        if ms_length > type_data.len() {
            return Err(Error::InvalidSyntax("Success MS-Length overruns packet".into()));
        }

        let body = std::str::from_utf8(&type_data[4..ms_length])
            .map_err(|_| Error::InvalidSyntax("Success body is not UTF-8".into()))?;

        if !body.starts_with("S=") || body.len() < 42 {
            return Err(Error::InvalidSyntax(
                "Success body missing authenticator response".into(),
            ));
        }

        let authenticator_response = body[..42].to_string();
        let message = body[42..]
            .trim_start()
            .strip_prefix("M=")
            .unwrap_or("")
            .to_string();

        Ok(SuccessRequest {
            mschapv2_id,
            authenticator_response,
            message,
        })
    }
}

/// A decoded MSCHAPv2 Failure request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRequest {
    /// MSCHAPv2 transaction identifier
    pub mschapv2_id: u8,

    /// Parsed `E=` error code, when present
    pub error_code: Option<u32>,

    /// Parsed `R=` retry flag
    pub retry_allowed: bool,

    /// Optional operator message
    pub message: String,
}

impl FailureRequest {
    /// Decode a Failure request from EAP type data.
    ///
    /// The body is `E=eeeeeeeeee R=r C=<challenge> V=<version> M=<message>`.
    pub fn decode(type_data: &[u8]) -> Result<Self> {
        if type_data.len() < 4 {
            return Err(Error::InvalidSyntax("MSCHAPv2 packet too short".into()));
        }
        if type_data[0] != OP_FAILURE {
            return Err(Error::InvalidSyntax(format!(
                "Expected Failure op-code, got {}",
                type_data[0]
            )));
        }

        let mschapv2_id = type_data[1];
        let ms_length = u16::from_be_bytes([type_data[2], type_data[3]]) as usize;
        if ms_length > type_data.len() {
            return Err(Error::InvalidSyntax("Failure MS-Length overruns packet".into()));
        }

        let body = std::str::from_utf8(&type_data[4..ms_length])
            .map_err(|_| Error::InvalidSyntax("Failure body is not UTF-8".into()))?;

        let mut error_code = None;
        let mut retry_allowed = false;
        let mut message = String::new();

        for field in body.split_whitespace() {
            if let Some(code) = field.strip_prefix("E=") {
                error_code = code.parse::<u32>().ok();
            } else if let Some(retry) = field.strip_prefix("R=") {
                retry_allowed = retry == "1";
            } else if let Some(msg) = field.strip_prefix("M=") {
                message = msg.to_string();
            }
        }

        Ok(FailureRequest {
            mschapv2_id,
            error_code,
            retry_allowed,
            message,
        })
    }
}

/// Encode the one-byte Success acknowledgement response.
pub fn encode_success_response() -> Vec<u8> {
    vec![OP_SUCCESS]
}

/// Encode the one-byte Failure acknowledgement response.
pub fn encode_failure_response() -> Vec<u8> {
    vec![OP_FAILURE]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_type_data(name: &[u8]) -> Vec<u8> {
        let ms_length = 5 + 16 + name.len();
        let mut out = vec![OP_CHALLENGE, 0x2A];
        out.extend_from_slice(&(ms_length as u16).to_be_bytes());
        out.push(CHALLENGE_VALUE_SIZE);
        out.extend_from_slice(&[0x5B; 16]);
        out.extend_from_slice(name);
        out
    }

    #[test]
    fn test_challenge_request_decode() {
        let data = challenge_type_data(b"authenticator");
        let request = ChallengeRequest::decode(&data).unwrap();

        assert_eq!(request.mschapv2_id, 0x2A);
        assert_eq!(request.challenge, [0x5B; 16]);
        assert_eq!(request.name, b"authenticator".to_vec());
    }

    #[test]
    fn test_challenge_request_bad_value_size() {
        let mut data = challenge_type_data(b"");
        data[4] = 17;
        assert!(matches!(
            ChallengeRequest::decode(&data),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_challenge_request_bad_ms_length() {
        let mut data = challenge_type_data(b"");
        data[2..4].copy_from_slice(&10u16.to_be_bytes()); // below header + value
        assert!(matches!(
            ChallengeRequest::decode(&data),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_challenge_request_wrong_opcode() {
        let mut data = challenge_type_data(b"");
        data[0] = OP_SUCCESS;
        assert!(ChallengeRequest::decode(&data).is_err());
    }

    #[test]
    fn test_challenge_response_encode() {
        let response = ChallengeResponse {
            mschapv2_id: 0x2A,
            peer_challenge: [0x21; 16],
            nt_response: [0x82; 24],
            name: b"User".to_vec(),
        };

        let encoded = response.encode();
        assert_eq!(encoded[0], OP_RESPONSE);
        assert_eq!(encoded[1], 0x2A);
        assert_eq!(
            u16::from_be_bytes([encoded[2], encoded[3]]) as usize,
            encoded.len()
        );
        assert_eq!(encoded[4], RESPONSE_VALUE_SIZE);
        assert_eq!(&encoded[5..21], &[0x21; 16]);
        assert_eq!(&encoded[21..29], &[0u8; 8]); // reserved
        assert_eq!(&encoded[29..53], &[0x82; 24]);
        assert_eq!(encoded[53], 0); // flags
        assert_eq!(&encoded[54..], b"User");
    }

    #[test]
    fn test_success_request_decode() {
        let body = b"S=407A5589115FD0D6209F510FE9C04566932CDA56 M=Welcome";
        let mut data = vec![OP_SUCCESS, 0x2A];
        data.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
        data.extend_from_slice(body);

        let request = SuccessRequest::decode(&data).unwrap();
        assert_eq!(
            request.authenticator_response,
            "S=407A5589115FD0D6209F510FE9C04566932CDA56"
        );
        assert_eq!(request.message, "Welcome");
    }

    #[test]
    fn test_success_request_missing_auth_string() {
        let body = b"M=Hello";
        let mut data = vec![OP_SUCCESS, 0x2A];
        data.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
        data.extend_from_slice(body);

        assert!(matches!(
            SuccessRequest::decode(&data),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_failure_request_decode() {
        let body = b"E=691 R=1 C=00112233445566778899AABBCCDDEEFF V=3 M=Bad password";
        let mut data = vec![OP_FAILURE, 0x2A];
        data.extend_from_slice(&((4 + body.len()) as u16).to_be_bytes());
        data.extend_from_slice(body);

        let request = FailureRequest::decode(&data).unwrap();
        assert_eq!(request.error_code, Some(691));
        assert!(request.retry_allowed);
        assert_eq!(request.message, "Bad");
    }

    #[test]
    fn test_acknowledgements() {
        assert_eq!(encode_success_response(), vec![3]);
        assert_eq!(encode_failure_response(), vec![4]);
    }
}
