//! EAP-SIM/AKA attribute codec
//!
//! Attributes are 4-byte aligned TLVs with a 1-byte type, a 1-byte length
//! in 4-byte units, and a type-specific value (RFC 4186 Section 10,
//! RFC 4187 Section 10, RFC 5448 Section 3).
//!
//! Attribute types at 128 and above are skippable: an unrecognised one is
//! carried opaquely. An unrecognised type below 128 aborts decoding.

use crate::ike::{Error, Result};

/// Attribute lengths are expressed in units of 4 bytes
pub const LENGTH_SCALING: usize = 4;

/// First skippable attribute type
pub const SKIPPABLE_RANGE_START: u8 = 128;

/// AT_RAND (1)
pub const AT_RAND: u8 = 1;
/// AT_AUTN (2)
pub const AT_AUTN: u8 = 2;
/// AT_RES (3)
pub const AT_RES: u8 = 3;
/// AT_AUTS (4)
pub const AT_AUTS: u8 = 4;
/// AT_PADDING (6)
pub const AT_PADDING: u8 = 6;
/// AT_NONCE_MT (7)
pub const AT_NONCE_MT: u8 = 7;
/// AT_PERMANENT_ID_REQ (10)
pub const AT_PERMANENT_ID_REQ: u8 = 10;
/// AT_MAC (11)
pub const AT_MAC: u8 = 11;
/// AT_NOTIFICATION (12)
pub const AT_NOTIFICATION: u8 = 12;
/// AT_ANY_ID_REQ (13)
pub const AT_ANY_ID_REQ: u8 = 13;
/// AT_IDENTITY (14)
pub const AT_IDENTITY: u8 = 14;
/// AT_VERSION_LIST (15)
pub const AT_VERSION_LIST: u8 = 15;
/// AT_SELECTED_VERSION (16)
pub const AT_SELECTED_VERSION: u8 = 16;
/// AT_FULLAUTH_ID_REQ (17)
pub const AT_FULLAUTH_ID_REQ: u8 = 17;
/// AT_COUNTER (19)
pub const AT_COUNTER: u8 = 19;
/// AT_COUNTER_TOO_SMALL (20)
pub const AT_COUNTER_TOO_SMALL: u8 = 20;
/// AT_NONCE_S (21)
pub const AT_NONCE_S: u8 = 21;
/// AT_CLIENT_ERROR_CODE (22)
pub const AT_CLIENT_ERROR_CODE: u8 = 22;
/// AT_KDF_INPUT (23)
pub const AT_KDF_INPUT: u8 = 23;
/// AT_KDF (24)
pub const AT_KDF: u8 = 24;
/// AT_IV (129)
pub const AT_IV: u8 = 129;
/// AT_ENCR_DATA (130)
pub const AT_ENCR_DATA: u8 = 130;
/// AT_NEXT_PSEUDONYM (132)
pub const AT_NEXT_PSEUDONYM: u8 = 132;
/// AT_NEXT_REAUTH_ID (133)
pub const AT_NEXT_REAUTH_ID: u8 = 133;
/// AT_RESULT_IND (135)
pub const AT_RESULT_IND: u8 = 135;

/// Client error code: unable to process packet (0)
pub const CLIENT_ERROR_UNABLE_TO_PROCESS: u16 = 0;
/// Client error code: unsupported version (1)
pub const CLIENT_ERROR_UNSUPPORTED_VERSION: u16 = 1;
/// Client error code: insufficient number of challenges (2)
pub const CLIENT_ERROR_INSUFFICIENT_CHALLENGES: u16 = 2;
/// Client error code: RANDs are not fresh (3)
pub const CLIENT_ERROR_STALE_RANDS: u16 = 3;

/// Notification code: general failure after authentication (0)
pub const NOTIFICATION_GENERAL_FAILURE_POST_CHALLENGE: u16 = 0;
/// Notification code: general failure before authentication (0x4000)
pub const NOTIFICATION_GENERAL_FAILURE_PRE_CHALLENGE: u16 = 0x4000;
/// Notification code: success (0x8000)
pub const NOTIFICATION_SUCCESS: u16 = 0x8000;
/// Notification code: temporarily denied access (1026)
pub const NOTIFICATION_DENIED_ACCESS_POST_CHALLENGE: u16 = 1026;
/// Notification code: not subscribed to the requested service (1031)
pub const NOTIFICATION_USER_NOT_SUBSCRIBED_POST_CHALLENGE: u16 = 1031;

const SUCCESS_MASK: u16 = 0x8000;
const PRE_CHALLENGE_MASK: u16 = 0x4000;

/// A single EAP-SIM/AKA attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EapSimAkaAttribute {
    /// AT_RAND: 1-3 distinct 16-byte RANDs (EAP-SIM uses 2-3, EAP-AKA 1)
    Rand(Vec<[u8; 16]>),
    /// AT_AUTN: UMTS network authentication token
    Autn([u8; 16]),
    /// AT_RES: UMTS signed response with its length in bits
    Res(Vec<u8>),
    /// AT_AUTS: resynchronization token
    Auts([u8; 14]),
    /// AT_PADDING: `length` zero bytes after the attribute header
    Padding(usize),
    /// AT_NONCE_MT: peer nonce for EAP-SIM
    NonceMt([u8; 16]),
    /// AT_PERMANENT_ID_REQ
    PermanentIdReq,
    /// AT_MAC: 16-byte message authentication code
    Mac([u8; 16]),
    /// AT_NOTIFICATION
    Notification(u16),
    /// AT_ANY_ID_REQ
    AnyIdReq,
    /// AT_IDENTITY
    Identity(Vec<u8>),
    /// AT_VERSION_LIST
    VersionList(Vec<u16>),
    /// AT_SELECTED_VERSION
    SelectedVersion(u16),
    /// AT_FULLAUTH_ID_REQ
    FullauthIdReq,
    /// AT_COUNTER (fast re-authentication)
    Counter(u16),
    /// AT_COUNTER_TOO_SMALL
    CounterTooSmall,
    /// AT_NONCE_S (fast re-authentication)
    NonceS([u8; 16]),
    /// AT_CLIENT_ERROR_CODE
    ClientErrorCode(u16),
    /// AT_KDF_INPUT: network name for EAP-AKA'
    KdfInput(Vec<u8>),
    /// AT_KDF: key derivation function selector for EAP-AKA'
    Kdf(u16),
    /// AT_IV
    Iv([u8; 16]),
    /// AT_ENCR_DATA (opaque; encrypted attributes are not interpreted)
    EncrData(Vec<u8>),
    /// AT_RESULT_IND
    ResultInd,
    /// Unrecognised skippable attribute, kept opaquely
    Unknown {
        /// Attribute type (128 and above)
        attr_type: u8,
        /// Raw value bytes after the 2-byte attribute header
        data: Vec<u8>,
    },
}

impl EapSimAkaAttribute {
    /// The wire attribute type
    pub fn attr_type(&self) -> u8 {
        match self {
            EapSimAkaAttribute::Rand(_) => AT_RAND,
            EapSimAkaAttribute::Autn(_) => AT_AUTN,
            EapSimAkaAttribute::Res(_) => AT_RES,
            EapSimAkaAttribute::Auts(_) => AT_AUTS,
            EapSimAkaAttribute::Padding(_) => AT_PADDING,
            EapSimAkaAttribute::NonceMt(_) => AT_NONCE_MT,
            EapSimAkaAttribute::PermanentIdReq => AT_PERMANENT_ID_REQ,
            EapSimAkaAttribute::Mac(_) => AT_MAC,
            EapSimAkaAttribute::Notification(_) => AT_NOTIFICATION,
            EapSimAkaAttribute::AnyIdReq => AT_ANY_ID_REQ,
            EapSimAkaAttribute::Identity(_) => AT_IDENTITY,
            EapSimAkaAttribute::VersionList(_) => AT_VERSION_LIST,
            EapSimAkaAttribute::SelectedVersion(_) => AT_SELECTED_VERSION,
            EapSimAkaAttribute::FullauthIdReq => AT_FULLAUTH_ID_REQ,
            EapSimAkaAttribute::Counter(_) => AT_COUNTER,
            EapSimAkaAttribute::CounterTooSmall => AT_COUNTER_TOO_SMALL,
            EapSimAkaAttribute::NonceS(_) => AT_NONCE_S,
            EapSimAkaAttribute::ClientErrorCode(_) => AT_CLIENT_ERROR_CODE,
            EapSimAkaAttribute::KdfInput(_) => AT_KDF_INPUT,
            EapSimAkaAttribute::Kdf(_) => AT_KDF,
            EapSimAkaAttribute::Iv(_) => AT_IV,
            EapSimAkaAttribute::EncrData(_) => AT_ENCR_DATA,
            EapSimAkaAttribute::ResultInd => AT_RESULT_IND,
            EapSimAkaAttribute::Unknown { attr_type, .. } => *attr_type,
        }
    }

    /// Whether a notification code has the Success bit set
    pub fn notification_is_success(code: u16) -> bool {
        code & SUCCESS_MASK != 0
    }

    /// Whether a notification code has the Phase (pre-challenge) bit set
    pub fn notification_is_pre_challenge(code: u16) -> bool {
        code & PRE_CHALLENGE_MASK != 0
    }

    fn value_bytes(&self) -> Vec<u8> {
        match self {
            EapSimAkaAttribute::Rand(rands) => {
                let mut out = vec![0u8; 2]; // reserved
                for rand in rands {
                    out.extend_from_slice(rand);
                }
                out
            }
            EapSimAkaAttribute::Autn(autn) => {
                let mut out = vec![0u8; 2];
                out.extend_from_slice(autn);
                out
            }
            EapSimAkaAttribute::Res(res) => {
                let mut out = Vec::with_capacity(2 + res.len());
                out.extend_from_slice(&((res.len() * 8) as u16).to_be_bytes());
                out.extend_from_slice(res);
                // pad to alignment
                while (out.len() + 2) % LENGTH_SCALING != 0 {
                    out.push(0);
                }
                out
            }
            EapSimAkaAttribute::Auts(auts) => auts.to_vec(),
            EapSimAkaAttribute::Padding(len) => vec![0u8; len - 2],
            EapSimAkaAttribute::NonceMt(nonce) | EapSimAkaAttribute::NonceS(nonce) => {
                let mut out = vec![0u8; 2];
                out.extend_from_slice(nonce);
                out
            }
            EapSimAkaAttribute::PermanentIdReq
            | EapSimAkaAttribute::AnyIdReq
            | EapSimAkaAttribute::FullauthIdReq
            | EapSimAkaAttribute::CounterTooSmall
            | EapSimAkaAttribute::ResultInd => vec![0u8; 2],
            EapSimAkaAttribute::Mac(mac) => {
                let mut out = vec![0u8; 2];
                out.extend_from_slice(mac);
                out
            }
            EapSimAkaAttribute::Notification(code)
            | EapSimAkaAttribute::SelectedVersion(code)
            | EapSimAkaAttribute::Counter(code)
            | EapSimAkaAttribute::ClientErrorCode(code)
            | EapSimAkaAttribute::Kdf(code) => code.to_be_bytes().to_vec(),
            EapSimAkaAttribute::Identity(identity) => {
                let mut out = Vec::with_capacity(2 + identity.len());
                out.extend_from_slice(&(identity.len() as u16).to_be_bytes());
                out.extend_from_slice(identity);
                while (out.len() + 2) % LENGTH_SCALING != 0 {
                    out.push(0);
                }
                out
            }
            EapSimAkaAttribute::KdfInput(input) => {
                let mut out = Vec::with_capacity(2 + input.len());
                out.extend_from_slice(&(input.len() as u16).to_be_bytes());
                out.extend_from_slice(input);
                while (out.len() + 2) % LENGTH_SCALING != 0 {
                    out.push(0);
                }
                out
            }
            EapSimAkaAttribute::VersionList(versions) => {
                let mut out = Vec::with_capacity(2 + versions.len() * 2);
                out.extend_from_slice(&((versions.len() * 2) as u16).to_be_bytes());
                for v in versions {
                    out.extend_from_slice(&v.to_be_bytes());
                }
                while (out.len() + 2) % LENGTH_SCALING != 0 {
                    out.push(0);
                }
                out
            }
            EapSimAkaAttribute::Iv(iv) => {
                let mut out = vec![0u8; 2];
                out.extend_from_slice(iv);
                out
            }
            EapSimAkaAttribute::EncrData(data) | EapSimAkaAttribute::Unknown { data, .. } => {
                data.clone()
            }
        }
    }

    /// Encode this attribute, including its 2-byte header.
    pub fn encode(&self) -> Vec<u8> {
        let value = self.value_bytes();
        let total = 2 + value.len();
        debug_assert!(total % LENGTH_SCALING == 0);

        let mut out = Vec::with_capacity(total);
        out.push(self.attr_type());
        out.push((total / LENGTH_SCALING) as u8);
        out.extend_from_slice(&value);
        out
    }

    /// Decode one attribute from `value` (the bytes after the 2-byte
    /// attribute header), for the given type and total length.
    fn parse(attr_type: u8, length: usize, value: &[u8]) -> Result<Self> {
        fn fixed<const N: usize>(value: &[u8], skip_reserved: bool) -> Result<[u8; N]> {
            let data = if skip_reserved { &value[2..] } else { value };
            if data.len() != N {
                return Err(Error::InvalidSyntax(format!(
                    "Attribute value length {} (need {})",
                    data.len(),
                    N
                )));
            }
            let mut out = [0u8; N];
            out.copy_from_slice(data);
            Ok(out)
        }

        fn code(value: &[u8]) -> Result<u16> {
            if value.len() != 2 {
                return Err(Error::InvalidSyntax("Attribute value must be 2 bytes".into()));
            }
            Ok(u16::from_be_bytes([value[0], value[1]]))
        }

        let attr = match attr_type {
            AT_RAND => {
                if value.len() < 2 || (value.len() - 2) % 16 != 0 {
                    return Err(Error::InvalidSyntax("AT_RAND has bad length".into()));
                }
                let num_rands = (value.len() - 2) / 16;
                if !(1..=3).contains(&num_rands) {
                    return Err(Error::InvalidSyntax(format!(
                        "AT_RAND carries {} RANDs",
                        num_rands
                    )));
                }

                let mut rands: Vec<[u8; 16]> = Vec::with_capacity(num_rands);
                for i in 0..num_rands {
                    let mut rand = [0u8; 16];
                    rand.copy_from_slice(&value[2 + i * 16..2 + (i + 1) * 16]);
                    if rands.contains(&rand) {
                        return Err(Error::InvalidSyntax("Received identical RANDs".into()));
                    }
                    rands.push(rand);
                }
                EapSimAkaAttribute::Rand(rands)
            }
            AT_AUTN => EapSimAkaAttribute::Autn(fixed::<16>(value, true)?),
            AT_RES => {
                if value.len() < 2 {
                    return Err(Error::InvalidSyntax("AT_RES too short".into()));
                }
                let bits = u16::from_be_bytes([value[0], value[1]]) as usize;
                if bits % 8 != 0 {
                    return Err(Error::InvalidSyntax(
                        "AT_RES length must be a whole number of bytes".into(),
                    ));
                }
                let res_len = bits / 8;
                if value.len() < 2 + res_len {
                    return Err(Error::InvalidSyntax("AT_RES overruns attribute".into()));
                }
                EapSimAkaAttribute::Res(value[2..2 + res_len].to_vec())
            }
            AT_AUTS => EapSimAkaAttribute::Auts(fixed::<14>(value, false)?),
            AT_PADDING => {
                // Padding length is 4, 8 or 12, and every byte must be zero
                if !(4..=12).contains(&length) {
                    return Err(Error::InvalidSyntax("AT_PADDING has bad length".into()));
                }
                if value.iter().any(|&b| b != 0) {
                    return Err(Error::InvalidSyntax(
                        "AT_PADDING bytes must all be 0x00".into(),
                    ));
                }
                EapSimAkaAttribute::Padding(length)
            }
            AT_NONCE_MT => EapSimAkaAttribute::NonceMt(fixed::<16>(value, true)?),
            AT_PERMANENT_ID_REQ => EapSimAkaAttribute::PermanentIdReq,
            AT_MAC => EapSimAkaAttribute::Mac(fixed::<16>(value, true)?),
            AT_NOTIFICATION => {
                let code = code(value)?;
                if Self::notification_is_success(code) && Self::notification_is_pre_challenge(code)
                {
                    return Err(Error::InvalidSyntax(
                        "AT_NOTIFICATION cannot set both Success and Phase bits".into(),
                    ));
                }
                EapSimAkaAttribute::Notification(code)
            }
            AT_ANY_ID_REQ => EapSimAkaAttribute::AnyIdReq,
            AT_IDENTITY => {
                if value.len() < 2 {
                    return Err(Error::InvalidSyntax("AT_IDENTITY too short".into()));
                }
                let id_len = u16::from_be_bytes([value[0], value[1]]) as usize;
                if value.len() < 2 + id_len {
                    return Err(Error::InvalidSyntax("AT_IDENTITY overruns attribute".into()));
                }
                EapSimAkaAttribute::Identity(value[2..2 + id_len].to_vec())
            }
            AT_VERSION_LIST => {
                if value.len() < 2 {
                    return Err(Error::InvalidSyntax("AT_VERSION_LIST too short".into()));
                }
                let list_len = u16::from_be_bytes([value[0], value[1]]) as usize;
                if list_len % 2 != 0 {
                    return Err(Error::InvalidSyntax(
                        "Actual version list length must be a multiple of 2".into(),
                    ));
                }
                if value.len() < 2 + list_len {
                    return Err(Error::InvalidSyntax(
                        "AT_VERSION_LIST overruns attribute".into(),
                    ));
                }
                let versions = value[2..2 + list_len]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                EapSimAkaAttribute::VersionList(versions)
            }
            AT_SELECTED_VERSION => EapSimAkaAttribute::SelectedVersion(code(value)?),
            AT_FULLAUTH_ID_REQ => EapSimAkaAttribute::FullauthIdReq,
            AT_COUNTER => EapSimAkaAttribute::Counter(code(value)?),
            AT_COUNTER_TOO_SMALL => EapSimAkaAttribute::CounterTooSmall,
            AT_NONCE_S => EapSimAkaAttribute::NonceS(fixed::<16>(value, true)?),
            AT_CLIENT_ERROR_CODE => EapSimAkaAttribute::ClientErrorCode(code(value)?),
            AT_KDF_INPUT => {
                if value.len() < 2 {
                    return Err(Error::InvalidSyntax("AT_KDF_INPUT too short".into()));
                }
                let input_len = u16::from_be_bytes([value[0], value[1]]) as usize;
                if value.len() < 2 + input_len {
                    return Err(Error::InvalidSyntax("AT_KDF_INPUT overruns attribute".into()));
                }
                EapSimAkaAttribute::KdfInput(value[2..2 + input_len].to_vec())
            }
            AT_KDF => EapSimAkaAttribute::Kdf(code(value)?),
            AT_IV => EapSimAkaAttribute::Iv(fixed::<16>(value, true)?),
            AT_ENCR_DATA => EapSimAkaAttribute::EncrData(value.to_vec()),
            AT_RESULT_IND => EapSimAkaAttribute::ResultInd,
            t if t >= SKIPPABLE_RANGE_START => EapSimAkaAttribute::Unknown {
                attr_type: t,
                data: value.to_vec(),
            },
            t => return Err(Error::UnsupportedAttribute(t)),
        };

        Ok(attr)
    }
}

/// Decode a packed attribute list.
pub fn decode_attributes(data: &[u8]) -> Result<Vec<EapSimAkaAttribute>> {
    let mut attributes = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if data.len() < offset + 2 {
            return Err(Error::InvalidSyntax("Truncated attribute header".into()));
        }

        let attr_type = data[offset];
        let length = data[offset + 1] as usize * LENGTH_SCALING;
        if length == 0 {
            return Err(Error::InvalidSyntax("Attribute length must be positive".into()));
        }
        if data.len() < offset + length {
            return Err(Error::InvalidSyntax("Attribute overruns packet".into()));
        }

        attributes.push(EapSimAkaAttribute::parse(
            attr_type,
            length,
            &data[offset + 2..offset + length],
        )?);

        offset += length;
    }

    Ok(attributes)
}

/// Encode a packed attribute list.
pub fn encode_attributes(attributes: &[EapSimAkaAttribute]) -> Vec<u8> {
    let mut out = Vec::new();
    for attr in attributes {
        out.extend_from_slice(&attr.encode());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_roundtrip_multiple() {
        let attr = EapSimAkaAttribute::Rand(vec![[0x11; 16], [0x22; 16], [0x33; 16]]);
        let encoded = attr.encode();
        assert_eq!(encoded.len(), 52);
        assert_eq!(encoded[0], AT_RAND);
        assert_eq!(encoded[1], 13);

        let decoded = decode_attributes(&encoded).unwrap();
        assert_eq!(decoded, vec![attr]);
    }

    #[test]
    fn test_rand_rejects_duplicates() {
        let mut encoded = EapSimAkaAttribute::Rand(vec![[0x11; 16], [0x22; 16]]).encode();
        // Overwrite the second RAND with a copy of the first
        encoded.splice(20.., encoded[4..20].to_vec());

        let result = decode_attributes(&encoded);
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_rand_rejects_bad_count() {
        // Four RANDs
        let mut data = vec![AT_RAND, 17, 0, 0];
        for i in 0..4u8 {
            data.extend_from_slice(&[i; 16]);
        }
        assert!(decode_attributes(&data).is_err());
    }

    #[test]
    fn test_padding_must_be_zero() {
        let attr = EapSimAkaAttribute::Padding(8);
        let encoded = attr.encode();
        assert_eq!(encoded, vec![AT_PADDING, 2, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_attributes(&encoded).unwrap(), vec![attr]);

        let mut corrupted = encoded;
        corrupted[5] = 1;
        assert!(matches!(
            decode_attributes(&corrupted),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_version_list_roundtrip() {
        let attr = EapSimAkaAttribute::VersionList(vec![1]);
        let encoded = attr.encode();
        assert_eq!(encoded, vec![AT_VERSION_LIST, 2, 0, 2, 0, 1]);
        assert_eq!(decode_attributes(&encoded).unwrap(), vec![attr]);
    }

    #[test]
    fn test_version_list_odd_length_rejected() {
        let data = vec![AT_VERSION_LIST, 2, 0, 3, 0, 1];
        assert!(matches!(
            decode_attributes(&data),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_notification_bit_exclusivity() {
        let ok = EapSimAkaAttribute::Notification(NOTIFICATION_SUCCESS).encode();
        assert!(decode_attributes(&ok).is_ok());

        // Success + Phase set simultaneously
        let bad = vec![AT_NOTIFICATION, 1, 0xC0, 0x00];
        assert!(matches!(
            decode_attributes(&bad),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_notification_bit_accessors() {
        assert!(EapSimAkaAttribute::notification_is_success(
            NOTIFICATION_SUCCESS
        ));
        assert!(!EapSimAkaAttribute::notification_is_success(
            NOTIFICATION_GENERAL_FAILURE_PRE_CHALLENGE
        ));
        assert!(EapSimAkaAttribute::notification_is_pre_challenge(
            NOTIFICATION_GENERAL_FAILURE_PRE_CHALLENGE
        ));
        assert!(!EapSimAkaAttribute::notification_is_pre_challenge(
            NOTIFICATION_DENIED_ACCESS_POST_CHALLENGE
        ));
    }

    #[test]
    fn test_identity_roundtrip_with_padding() {
        let attr = EapSimAkaAttribute::Identity(b"1234567890123456@nai.example".to_vec());
        let encoded = attr.encode();
        assert_eq!(encoded.len() % LENGTH_SCALING, 0);
        assert_eq!(decode_attributes(&encoded).unwrap(), vec![attr]);
    }

    #[test]
    fn test_mac_roundtrip() {
        let attr = EapSimAkaAttribute::Mac([0xAB; 16]);
        let encoded = attr.encode();
        assert_eq!(encoded.len(), 20);
        assert_eq!(decode_attributes(&encoded).unwrap(), vec![attr]);
    }

    #[test]
    fn test_res_roundtrip() {
        let attr = EapSimAkaAttribute::Res(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let encoded = attr.encode();
        assert_eq!(encoded.len() % LENGTH_SCALING, 0);
        assert_eq!(decode_attributes(&encoded).unwrap(), vec![attr]);
    }

    #[test]
    fn test_auts_roundtrip() {
        let attr = EapSimAkaAttribute::Auts([0x5A; 14]);
        let encoded = attr.encode();
        assert_eq!(encoded.len(), 16);
        assert_eq!(decode_attributes(&encoded).unwrap(), vec![attr]);
    }

    #[test]
    fn test_kdf_input_roundtrip() {
        let attr = EapSimAkaAttribute::KdfInput(b"WLAN".to_vec());
        let encoded = attr.encode();
        assert_eq!(decode_attributes(&encoded).unwrap(), vec![attr]);

        let kdf = EapSimAkaAttribute::Kdf(1);
        assert_eq!(decode_attributes(&kdf.encode()).unwrap(), vec![kdf]);
    }

    #[test]
    fn test_unknown_skippable_kept() {
        let data = vec![200, 1, 0xDE, 0xAD];
        let decoded = decode_attributes(&data).unwrap();
        assert_eq!(
            decoded,
            vec![EapSimAkaAttribute::Unknown {
                attr_type: 200,
                data: vec![0xDE, 0xAD],
            }]
        );

        // And round-trips
        assert_eq!(encode_attributes(&decoded), data);
    }

    #[test]
    fn test_unknown_non_skippable_rejected() {
        let data = vec![99, 1, 0x00, 0x00];
        assert!(matches!(
            decode_attributes(&data),
            Err(Error::UnsupportedAttribute(99))
        ));
    }

    #[test]
    fn test_zero_length_rejected() {
        let data = vec![AT_MAC, 0, 0, 0];
        assert!(matches!(
            decode_attributes(&data),
            Err(Error::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_multiple_attributes() {
        let attrs = vec![
            EapSimAkaAttribute::VersionList(vec![1]),
            EapSimAkaAttribute::PermanentIdReq,
        ];
        let encoded = encode_attributes(&attrs);
        assert_eq!(decode_attributes(&encoded).unwrap(), attrs);
    }
}
