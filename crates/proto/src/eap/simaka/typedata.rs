//! EAP-SIM/AKA type data framing
//!
//! The type data of an EAP-SIM or EAP-AKA packet is a 1-byte subtype, two
//! reserved bytes, and a packed attribute list (RFC 4186 Section 8.1,
//! RFC 4187 Section 8.1).

use super::attribute::{self, decode_attributes, encode_attributes, EapSimAkaAttribute};
use crate::ike::{Error, Result};

/// EAP-AKA subtype: AKA-Challenge (1)
pub const SUBTYPE_AKA_CHALLENGE: u8 = 1;
/// EAP-AKA subtype: AKA-Authentication-Reject (2)
pub const SUBTYPE_AKA_AUTHENTICATION_REJECT: u8 = 2;
/// EAP-AKA subtype: AKA-Synchronization-Failure (4)
pub const SUBTYPE_AKA_SYNCHRONIZATION_FAILURE: u8 = 4;
/// EAP-AKA subtype: AKA-Identity (5)
pub const SUBTYPE_AKA_IDENTITY: u8 = 5;
/// EAP-SIM subtype: SIM-Start (10)
pub const SUBTYPE_SIM_START: u8 = 10;
/// EAP-SIM subtype: SIM-Challenge (11)
pub const SUBTYPE_SIM_CHALLENGE: u8 = 11;
/// Shared subtype: Notification (12)
pub const SUBTYPE_NOTIFICATION: u8 = 12;
/// Shared subtype: Re-authentication (13)
pub const SUBTYPE_REAUTHENTICATION: u8 = 13;
/// Shared subtype: Client-Error (14)
pub const SUBTYPE_CLIENT_ERROR: u8 = 14;

/// Decoded EAP-SIM/AKA type data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapSimAkaTypeData {
    /// Message subtype
    pub subtype: u8,

    /// Attributes in wire order
    pub attributes: Vec<EapSimAkaAttribute>,
}

impl EapSimAkaTypeData {
    /// Create new type data
    pub fn new(subtype: u8, attributes: Vec<EapSimAkaAttribute>) -> Self {
        EapSimAkaTypeData {
            subtype,
            attributes,
        }
    }

    /// Decode type data from the bytes after the EAP type byte.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 3 {
            return Err(Error::InvalidSyntax("SIM/AKA type data too short".into()));
        }

        let subtype = data[0];
        // bytes 1-2 reserved
        let attributes = decode_attributes(&data[3..])?;

        Ok(EapSimAkaTypeData {
            subtype,
            attributes,
        })
    }

    /// Encode to the bytes following the EAP type byte.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.subtype, 0, 0];
        out.extend_from_slice(&encode_attributes(&self.attributes));
        out
    }

    /// Find the first attribute of the given wire type
    pub fn find(&self, attr_type: u8) -> Option<&EapSimAkaAttribute> {
        self.attributes.iter().find(|a| a.attr_type() == attr_type)
    }

    /// Check for an attribute of the given wire type
    pub fn contains(&self, attr_type: u8) -> bool {
        self.find(attr_type).is_some()
    }

    /// How many identity-request attributes are present
    pub fn identity_request_count(&self) -> usize {
        [
            attribute::AT_PERMANENT_ID_REQ,
            attribute::AT_ANY_ID_REQ,
            attribute::AT_FULLAUTH_ID_REQ,
        ]
        .iter()
        .filter(|&&t| self.contains(t))
        .count()
    }

    /// Reject attributes that may only appear in authenticated messages.
    ///
    /// AT_MAC, AT_IV and AT_ENCR_DATA are forbidden before any key material
    /// exists (e.g. in SIM-Start and AKA-Identity).
    pub fn validate_pre_authenticated(&self) -> Result<()> {
        for forbidden in [attribute::AT_MAC, attribute::AT_IV, attribute::AT_ENCR_DATA] {
            if self.contains(forbidden) {
                return Err(Error::InvalidRequest(format!(
                    "Attribute {} not allowed before authentication",
                    forbidden
                )));
            }
        }
        Ok(())
    }

    /// Replace the AT_MAC value with zeroes, for MAC computation over the
    /// packet as transmitted.
    pub fn with_zeroed_mac(&self) -> Self {
        let attributes = self
            .attributes
            .iter()
            .map(|a| match a {
                EapSimAkaAttribute::Mac(_) => EapSimAkaAttribute::Mac([0u8; 16]),
                other => other.clone(),
            })
            .collect();
        EapSimAkaTypeData::new(self.subtype, attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let td = EapSimAkaTypeData::new(
            SUBTYPE_SIM_START,
            vec![
                EapSimAkaAttribute::VersionList(vec![1]),
                EapSimAkaAttribute::PermanentIdReq,
            ],
        );

        let encoded = td.encode();
        assert_eq!(encoded[0], SUBTYPE_SIM_START);
        assert_eq!(&encoded[1..3], &[0, 0]);

        let decoded = EapSimAkaTypeData::decode(&encoded).unwrap();
        assert_eq!(decoded, td);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(EapSimAkaTypeData::decode(&[10, 0]).is_err());
    }

    #[test]
    fn test_find_and_contains() {
        let td = EapSimAkaTypeData::new(
            SUBTYPE_SIM_START,
            vec![EapSimAkaAttribute::VersionList(vec![1])],
        );

        assert!(td.contains(attribute::AT_VERSION_LIST));
        assert!(!td.contains(attribute::AT_MAC));
        assert!(matches!(
            td.find(attribute::AT_VERSION_LIST),
            Some(EapSimAkaAttribute::VersionList(_))
        ));
    }

    #[test]
    fn test_identity_request_count() {
        let td = EapSimAkaTypeData::new(
            SUBTYPE_SIM_START,
            vec![
                EapSimAkaAttribute::PermanentIdReq,
                EapSimAkaAttribute::AnyIdReq,
            ],
        );
        assert_eq!(td.identity_request_count(), 2);
    }

    #[test]
    fn test_pre_authenticated_validation() {
        let clean = EapSimAkaTypeData::new(
            SUBTYPE_SIM_START,
            vec![EapSimAkaAttribute::VersionList(vec![1])],
        );
        assert!(clean.validate_pre_authenticated().is_ok());

        for bad_attr in [
            EapSimAkaAttribute::Mac([0; 16]),
            EapSimAkaAttribute::Iv([0; 16]),
            EapSimAkaAttribute::EncrData(vec![0, 0]),
        ] {
            let td = EapSimAkaTypeData::new(
                SUBTYPE_SIM_START,
                vec![EapSimAkaAttribute::VersionList(vec![1]), bad_attr],
            );
            assert!(matches!(
                td.validate_pre_authenticated(),
                Err(Error::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn test_with_zeroed_mac() {
        let td = EapSimAkaTypeData::new(
            SUBTYPE_SIM_CHALLENGE,
            vec![
                EapSimAkaAttribute::Rand(vec![[0x11; 16], [0x22; 16]]),
                EapSimAkaAttribute::Mac([0xAB; 16]),
            ],
        );

        let zeroed = td.with_zeroed_mac();
        assert!(matches!(
            zeroed.find(attribute::AT_MAC),
            Some(EapSimAkaAttribute::Mac(mac)) if mac == &[0u8; 16]
        ));
        // Other attributes untouched
        assert_eq!(zeroed.attributes[0], td.attributes[0]);
    }
}
