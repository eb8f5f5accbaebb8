//! IKEv2 Payload structures and parsing
//!
//! Implements IKE payloads as defined in RFC 7296 Section 3.2 onwards:
//! SA, KE, Nonce, Identification, AUTH, Certificate, Notify, Delete,
//! Traffic Selector, Configuration, EAP and the Encrypted (SK) payload.
//!
//! Each payload follows the generic header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Next Payload  |C|  RESERVED   |         Payload Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use super::constants::{NotifyType, PayloadType};
use super::proposal::{decode_proposals, encode_proposals, Proposal, ProtocolId};
use crate::ike::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Generic IKE payload header (4 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Next payload type code
    pub next_payload: u8,

    /// Critical bit (if set, must understand this payload)
    pub critical: bool,

    /// Total payload length including header (4 bytes + data)
    pub length: u16,
}

impl PayloadHeader {
    /// Payload header size
    pub const SIZE: usize = 4;

    /// Create new payload header
    pub fn new(next_payload: u8, critical: bool, length: u16) -> Self {
        PayloadHeader {
            next_payload,
            critical,
            length,
        }
    }

    /// Parse payload header from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::BufferTooShort {
                required: Self::SIZE,
                available: data.len(),
            });
        }

        let next_payload = data[0];
        let critical = (data[1] & 0x80) != 0;
        let length = u16::from_be_bytes([data[2], data[3]]);

        if (length as usize) < Self::SIZE {
            return Err(Error::InvalidSyntax(format!(
                "Payload length {} below header size",
                length
            )));
        }

        Ok(PayloadHeader {
            next_payload,
            critical,
            length,
        })
    }

    /// Serialize payload header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.next_payload;
        bytes[1] = if self.critical { 0x80 } else { 0x00 };
        bytes[2..4].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }
}

/// IKE Payload variants
#[derive(Debug, Clone, PartialEq)]
pub enum IkePayload {
    /// Security Association payload
    Sa(SaPayload),
    /// Key Exchange payload
    Ke(KePayload),
    /// Nonce payload
    Nonce(NoncePayload),
    /// Initiator identification
    IdInit(IdPayload),
    /// Responder identification
    IdResp(IdPayload),
    /// Certificate (opaque carrier; path validation is external)
    Cert(Vec<u8>),
    /// Certificate request (opaque carrier)
    CertReq(Vec<u8>),
    /// Authentication payload
    Auth(AuthPayload),
    /// Notify payload
    Notify(NotifyPayload),
    /// Delete payload
    Delete(DeletePayload),
    /// Vendor ID
    Vendor(Vec<u8>),
    /// Initiator traffic selectors
    TsInit(TrafficSelectorsPayload),
    /// Responder traffic selectors
    TsResp(TrafficSelectorsPayload),
    /// Encrypted and authenticated payload (raw body; framing in message.rs)
    Encrypted(EncryptedPayload),
    /// Configuration payload
    Config(ConfigPayload),
    /// EAP payload (raw EAP message bytes)
    Eap(Vec<u8>),
    /// Unknown non-critical payload, carried opaquely
    Unknown {
        /// Raw payload type code
        type_code: u8,
        /// Raw payload data (excluding header)
        data: Vec<u8>,
    },
}

impl IkePayload {
    /// Get payload type code
    pub fn type_code(&self) -> u8 {
        match self {
            IkePayload::Sa(_) => PayloadType::SA.to_u8(),
            IkePayload::Ke(_) => PayloadType::KE.to_u8(),
            IkePayload::Nonce(_) => PayloadType::Nonce.to_u8(),
            IkePayload::IdInit(_) => PayloadType::IDi.to_u8(),
            IkePayload::IdResp(_) => PayloadType::IDr.to_u8(),
            IkePayload::Cert(_) => PayloadType::CERT.to_u8(),
            IkePayload::CertReq(_) => PayloadType::CERTREQ.to_u8(),
            IkePayload::Auth(_) => PayloadType::AUTH.to_u8(),
            IkePayload::Notify(_) => PayloadType::N.to_u8(),
            IkePayload::Delete(_) => PayloadType::D.to_u8(),
            IkePayload::Vendor(_) => PayloadType::V.to_u8(),
            IkePayload::TsInit(_) => PayloadType::TSi.to_u8(),
            IkePayload::TsResp(_) => PayloadType::TSr.to_u8(),
            IkePayload::Encrypted(_) => PayloadType::SK.to_u8(),
            IkePayload::Config(_) => PayloadType::CP.to_u8(),
            IkePayload::Eap(_) => PayloadType::EAP.to_u8(),
            IkePayload::Unknown { type_code, .. } => *type_code,
        }
    }

    /// Parse a payload body of the given type.
    ///
    /// Unknown types are kept opaquely unless the critical bit was set, in
    /// which case decoding fails with `UnsupportedCriticalPayload`.
    pub fn parse(type_code: u8, critical: bool, data: &[u8]) -> Result<Self> {
        let payload = match PayloadType::from_u8(type_code) {
            Some(PayloadType::SA) => IkePayload::Sa(SaPayload::from_payload_data(data)?),
            Some(PayloadType::KE) => IkePayload::Ke(KePayload::from_payload_data(data)?),
            Some(PayloadType::Nonce) => {
                IkePayload::Nonce(NoncePayload::from_payload_data(data)?)
            }
            Some(PayloadType::IDi) => IkePayload::IdInit(IdPayload::from_payload_data(data)?),
            Some(PayloadType::IDr) => IkePayload::IdResp(IdPayload::from_payload_data(data)?),
            Some(PayloadType::CERT) => IkePayload::Cert(data.to_vec()),
            Some(PayloadType::CERTREQ) => IkePayload::CertReq(data.to_vec()),
            Some(PayloadType::AUTH) => IkePayload::Auth(AuthPayload::from_payload_data(data)?),
            Some(PayloadType::N) => IkePayload::Notify(NotifyPayload::from_payload_data(data)?),
            Some(PayloadType::D) => IkePayload::Delete(DeletePayload::from_payload_data(data)?),
            Some(PayloadType::V) => IkePayload::Vendor(data.to_vec()),
            Some(PayloadType::TSi) => {
                IkePayload::TsInit(TrafficSelectorsPayload::from_payload_data(data)?)
            }
            Some(PayloadType::TSr) => {
                IkePayload::TsResp(TrafficSelectorsPayload::from_payload_data(data)?)
            }
            Some(PayloadType::SK) => IkePayload::Encrypted(EncryptedPayload {
                raw: data.to_vec(),
            }),
            Some(PayloadType::CP) => {
                IkePayload::Config(ConfigPayload::from_payload_data(data)?)
            }
            Some(PayloadType::EAP) => IkePayload::Eap(data.to_vec()),
            Some(PayloadType::None) => {
                return Err(Error::InvalidSyntax("Payload of type None".into()))
            }
            None => {
                if critical {
                    return Err(Error::UnsupportedCriticalPayload(type_code));
                }
                IkePayload::Unknown {
                    type_code,
                    data: data.to_vec(),
                }
            }
        };

        Ok(payload)
    }

    /// Serialize payload body (without the generic header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        match self {
            IkePayload::Sa(p) => p.to_payload_data(),
            IkePayload::Ke(p) => p.to_payload_data(),
            IkePayload::Nonce(p) => p.to_payload_data(),
            IkePayload::IdInit(p) | IkePayload::IdResp(p) => p.to_payload_data(),
            IkePayload::Cert(data) | IkePayload::CertReq(data) => data.clone(),
            IkePayload::Auth(p) => p.to_payload_data(),
            IkePayload::Notify(p) => p.to_payload_data(),
            IkePayload::Delete(p) => p.to_payload_data(),
            IkePayload::Vendor(data) => data.clone(),
            IkePayload::TsInit(p) | IkePayload::TsResp(p) => p.to_payload_data(),
            IkePayload::Encrypted(p) => p.raw.clone(),
            IkePayload::Config(p) => p.to_payload_data(),
            IkePayload::Eap(data) => data.clone(),
            IkePayload::Unknown { data, .. } => data.clone(),
        }
    }
}

/// Parse a chain of payloads.
///
/// Each payload header names the type of the payload that follows it; the
/// type of the first payload comes from the enclosing header.
pub fn parse_payload_chain(first_type: u8, data: &[u8]) -> Result<Vec<IkePayload>> {
    let mut payloads = Vec::new();
    let mut current_type = first_type;
    let mut offset = 0;

    while current_type != PayloadType::None.to_u8() {
        if offset >= data.len() {
            return Err(Error::InvalidSyntax(
                "Payload chain runs past end of message".into(),
            ));
        }

        let header = PayloadHeader::from_bytes(&data[offset..])?;
        let end = offset + header.length as usize;
        if end > data.len() {
            return Err(Error::BufferTooShort {
                required: header.length as usize,
                available: data.len() - offset,
            });
        }

        let body = &data[offset + PayloadHeader::SIZE..end];
        payloads.push(IkePayload::parse(current_type, header.critical, body)?);

        current_type = header.next_payload;
        offset = end;
    }

    if offset != data.len() {
        return Err(Error::InvalidSyntax(
            "Trailing bytes after last payload".into(),
        ));
    }

    Ok(payloads)
}

/// Serialize a payload chain, linking each header to the next payload type.
pub fn encode_payload_chain(payloads: &[IkePayload]) -> Vec<u8> {
    let mut data = Vec::new();

    for (i, payload) in payloads.iter().enumerate() {
        let next_type = if i + 1 < payloads.len() {
            payloads[i + 1].type_code()
        } else {
            PayloadType::None.to_u8()
        };

        let body = payload.to_payload_data();
        let header = PayloadHeader::new(next_type, false, (PayloadHeader::SIZE + body.len()) as u16);
        data.extend_from_slice(&header.to_bytes());
        data.extend_from_slice(&body);
    }

    data
}

/// Security Association Payload (RFC 7296 Section 3.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaPayload {
    /// Offered or selected proposals
    pub proposals: Vec<Proposal>,
}

impl SaPayload {
    /// Create new SA payload
    pub fn new(proposals: Vec<Proposal>) -> Self {
        SaPayload { proposals }
    }

    /// Parse SA payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        Ok(SaPayload {
            proposals: decode_proposals(data)?,
        })
    }

    /// Serialize SA payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        encode_proposals(&self.proposals)
    }
}

/// Key Exchange Payload (RFC 7296 Section 3.4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KePayload {
    /// Diffie-Hellman group number
    pub dh_group: u16,

    /// Key exchange data (public value)
    pub key_data: Vec<u8>,
}

impl KePayload {
    /// Create new KE payload
    pub fn new(dh_group: u16, key_data: Vec<u8>) -> Self {
        KePayload { dh_group, key_data }
    }

    /// Parse KE payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let dh_group = u16::from_be_bytes([data[0], data[1]]);
        // bytes 2-3 reserved
        let key_data = data[4..].to_vec();

        Ok(KePayload { dh_group, key_data })
    }

    /// Serialize KE payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.key_data.len());
        data.extend_from_slice(&self.dh_group.to_be_bytes());
        data.extend_from_slice(&[0u8, 0u8]);
        data.extend_from_slice(&self.key_data);
        data
    }
}

/// Nonce Payload (RFC 7296 Section 3.9)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoncePayload {
    /// Nonce data (16-256 bytes of random data)
    pub nonce: Vec<u8>,
}

impl NoncePayload {
    /// Minimum nonce size (16 bytes)
    pub const MIN_SIZE: usize = 16;

    /// Maximum nonce size (256 bytes)
    pub const MAX_SIZE: usize = 256;

    /// Create new nonce payload
    pub fn new(nonce: Vec<u8>) -> Result<Self> {
        if nonce.len() < Self::MIN_SIZE || nonce.len() > Self::MAX_SIZE {
            return Err(Error::InvalidSyntax(format!(
                "Nonce length {} outside 16..=256",
                nonce.len()
            )));
        }

        Ok(NoncePayload { nonce })
    }

    /// Parse nonce payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        Self::new(data.to_vec())
    }

    /// Serialize nonce payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        self.nonce.clone()
    }
}

/// Identification forms (RFC 7296 Section 3.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    /// ID_IPV4_ADDR (1)
    Ipv4(Ipv4Addr),
    /// ID_FQDN (2)
    Fqdn(String),
    /// ID_RFC822_ADDR (3)
    Rfc822(String),
    /// ID_IPV6_ADDR (5)
    Ipv6(Ipv6Addr),
    /// ID_DER_ASN1_DN (9)
    DerAsn1Dn(Vec<u8>),
    /// ID_KEY_ID (11); equality is byte-wise
    KeyId(Vec<u8>),
}

impl Identification {
    /// Get the wire ID type code
    pub fn type_code(&self) -> u8 {
        match self {
            Identification::Ipv4(_) => 1,
            Identification::Fqdn(_) => 2,
            Identification::Rfc822(_) => 3,
            Identification::Ipv6(_) => 5,
            Identification::DerAsn1Dn(_) => 9,
            Identification::KeyId(_) => 11,
        }
    }

    /// Identification data bytes as they appear on the wire
    pub fn data(&self) -> Vec<u8> {
        match self {
            Identification::Ipv4(addr) => addr.octets().to_vec(),
            Identification::Fqdn(s) | Identification::Rfc822(s) => s.as_bytes().to_vec(),
            Identification::Ipv6(addr) => addr.octets().to_vec(),
            Identification::DerAsn1Dn(d) | Identification::KeyId(d) => d.clone(),
        }
    }
}

/// Identification Payload (RFC 7296 Section 3.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPayload {
    /// The identification carried by this payload
    pub id: Identification,
}

impl IdPayload {
    /// Create new identification payload
    pub fn new(id: Identification) -> Self {
        IdPayload { id }
    }

    /// Parse identification payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let id_data = &data[4..];
        let id = match data[0] {
            1 => {
                if id_data.len() != 4 {
                    return Err(Error::InvalidSyntax("IPv4 ID must be 4 bytes".into()));
                }
                Identification::Ipv4(Ipv4Addr::new(
                    id_data[0], id_data[1], id_data[2], id_data[3],
                ))
            }
            2 => Identification::Fqdn(
                String::from_utf8(id_data.to_vec())
                    .map_err(|_| Error::InvalidSyntax("FQDN ID is not UTF-8".into()))?,
            ),
            3 => Identification::Rfc822(
                String::from_utf8(id_data.to_vec())
                    .map_err(|_| Error::InvalidSyntax("RFC822 ID is not UTF-8".into()))?,
            ),
            5 => {
                if id_data.len() != 16 {
                    return Err(Error::InvalidSyntax("IPv6 ID must be 16 bytes".into()));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(id_data);
                Identification::Ipv6(Ipv6Addr::from(octets))
            }
            9 => Identification::DerAsn1Dn(id_data.to_vec()),
            11 => Identification::KeyId(id_data.to_vec()),
            other => {
                return Err(Error::InvalidSyntax(format!("Unknown ID type: {}", other)))
            }
        };

        Ok(IdPayload { id })
    }

    /// Serialize identification payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let id_data = self.id.data();
        let mut data = Vec::with_capacity(4 + id_data.len());
        data.push(self.id.type_code());
        data.extend_from_slice(&[0u8; 3]); // reserved
        data.extend_from_slice(&id_data);
        data
    }
}

/// Authentication method (RFC 7296 Section 3.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    /// RSA digital signature (1)
    RsaSignature = 1,
    /// Shared key message integrity code (2)
    SharedKeyMic = 2,
    /// Generic digital signature, RFC 7427 (14)
    DigitalSignature = 14,
}

impl AuthMethod {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AuthMethod::RsaSignature),
            2 => Some(AuthMethod::SharedKeyMic),
            14 => Some(AuthMethod::DigitalSignature),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Authentication Payload (RFC 7296 Section 3.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    /// Authentication method
    pub method: AuthMethod,

    /// Authentication data (MAC or signature)
    pub data: Vec<u8>,
}

impl AuthPayload {
    /// Create new AUTH payload
    pub fn new(method: AuthMethod, data: Vec<u8>) -> Self {
        AuthPayload { method, data }
    }

    /// Parse AUTH payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let method = AuthMethod::from_u8(data[0])
            .ok_or_else(|| Error::InvalidSyntax(format!("Unknown auth method: {}", data[0])))?;

        Ok(AuthPayload {
            method,
            data: data[4..].to_vec(),
        })
    }

    /// Serialize AUTH payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.data.len());
        data.push(self.method.to_u8());
        data.extend_from_slice(&[0u8; 3]); // reserved
        data.extend_from_slice(&self.data);
        data
    }
}

/// Notify Payload (RFC 7296 Section 3.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    /// Protocol ID (0 when the notify concerns no specific SA)
    pub protocol_id: u8,

    /// SPI of the SA this notification concerns (may be empty)
    pub spi: Vec<u8>,

    /// Notify message type
    pub notify_type: u16,

    /// Notification data
    pub data: Vec<u8>,
}

impl NotifyPayload {
    /// Create a notify payload without an SPI
    pub fn new(notify_type: NotifyType, data: Vec<u8>) -> Self {
        NotifyPayload {
            protocol_id: 0,
            spi: Vec::new(),
            notify_type: notify_type.to_u16(),
            data,
        }
    }

    /// Create a REKEY_SA notify naming the child SA being rekeyed
    pub fn rekey_sa(spi: Vec<u8>) -> Self {
        NotifyPayload {
            protocol_id: ProtocolId::Esp.to_u8(),
            spi,
            notify_type: NotifyType::RekeySa.to_u16(),
            data: Vec::new(),
        }
    }

    /// Typed notify type, when recognised
    pub fn typed(&self) -> Option<NotifyType> {
        NotifyType::from_u16(self.notify_type)
    }

    /// Check if this is an error notification (type below 16384)
    pub fn is_error(&self) -> bool {
        self.notify_type < NotifyType::STATUS_TYPES_START
    }

    /// Parse notify payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let protocol_id = data[0];
        let spi_size = data[1] as usize;
        let notify_type = u16::from_be_bytes([data[2], data[3]]);

        if data.len() < 4 + spi_size {
            return Err(Error::InvalidSyntax("Notify SPI overruns payload".into()));
        }

        Ok(NotifyPayload {
            protocol_id,
            spi: data[4..4 + spi_size].to_vec(),
            notify_type,
            data: data[4 + spi_size..].to_vec(),
        })
    }

    /// Serialize notify payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.spi.len() + self.data.len());
        data.push(self.protocol_id);
        data.push(self.spi.len() as u8);
        data.extend_from_slice(&self.notify_type.to_be_bytes());
        data.extend_from_slice(&self.spi);
        data.extend_from_slice(&self.data);
        data
    }
}

/// Delete Payload (RFC 7296 Section 3.11)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    /// Protocol of the SAs being deleted
    pub protocol_id: ProtocolId,

    /// SPIs being deleted (empty, with SPI size 0, for the IKE SA itself)
    pub spis: Vec<Vec<u8>>,
}

impl DeletePayload {
    /// Delete payload naming the IKE SA itself
    pub fn delete_ike_sa() -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Ike,
            spis: Vec::new(),
        }
    }

    /// Delete payload naming child SAs by SPI
    pub fn delete_child_sas(spis: Vec<Vec<u8>>) -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Esp,
            spis,
        }
    }

    /// Parse delete payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let protocol_id = ProtocolId::from_u8(data[0])
            .ok_or_else(|| Error::InvalidSyntax("Unknown protocol in delete".into()))?;
        let spi_size = data[1] as usize;
        let num_spis = u16::from_be_bytes([data[2], data[3]]) as usize;

        if data.len() != 4 + spi_size * num_spis {
            return Err(Error::InvalidSyntax(
                "Delete payload length does not match SPI count".into(),
            ));
        }

        let mut spis = Vec::with_capacity(num_spis);
        for i in 0..num_spis {
            let start = 4 + i * spi_size;
            spis.push(data[start..start + spi_size].to_vec());
        }

        Ok(DeletePayload { protocol_id, spis })
    }

    /// Serialize delete payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let spi_size = self.spis.first().map(|s| s.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(4 + spi_size * self.spis.len());
        data.push(self.protocol_id.to_u8());
        data.push(spi_size as u8);
        data.extend_from_slice(&(self.spis.len() as u16).to_be_bytes());
        for spi in &self.spis {
            data.extend_from_slice(spi);
        }
        data
    }
}

/// A single traffic selector (RFC 7296 Section 3.13.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSelector {
    /// TS type: 7 = IPv4 address range, 8 = IPv6 address range
    pub ts_type: u8,

    /// IP protocol ID (0 for any)
    pub ip_protocol: u8,

    /// Start of port range
    pub start_port: u16,

    /// End of port range
    pub end_port: u16,

    /// Start of address range (4 or 16 bytes)
    pub start_addr: Vec<u8>,

    /// End of address range (4 or 16 bytes)
    pub end_addr: Vec<u8>,
}

impl TrafficSelector {
    /// TS_IPV4_ADDR_RANGE
    pub const TYPE_IPV4: u8 = 7;
    /// TS_IPV6_ADDR_RANGE
    pub const TYPE_IPV6: u8 = 8;

    /// Selector matching all IPv4 traffic
    pub fn all_ipv4() -> Self {
        TrafficSelector {
            ts_type: Self::TYPE_IPV4,
            ip_protocol: 0,
            start_port: 0,
            end_port: 65535,
            start_addr: vec![0, 0, 0, 0],
            end_addr: vec![255, 255, 255, 255],
        }
    }
}

/// Traffic Selector Payload (RFC 7296 Section 3.13)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSelectorsPayload {
    /// The selectors in this payload
    pub selectors: Vec<TrafficSelector>,
}

impl TrafficSelectorsPayload {
    /// Create new traffic selectors payload
    pub fn new(selectors: Vec<TrafficSelector>) -> Self {
        TrafficSelectorsPayload { selectors }
    }

    /// Parse traffic selectors from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let count = data[0] as usize;
        let mut selectors = Vec::with_capacity(count);
        let mut offset = 4;

        for _ in 0..count {
            if data.len() < offset + 8 {
                return Err(Error::InvalidSyntax("Truncated traffic selector".into()));
            }

            let ts_type = data[offset];
            let ip_protocol = data[offset + 1];
            let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let addr_len = match ts_type {
                TrafficSelector::TYPE_IPV4 => 4,
                TrafficSelector::TYPE_IPV6 => 16,
                other => {
                    return Err(Error::InvalidSyntax(format!("Unknown TS type: {}", other)))
                }
            };

            if length != 8 + 2 * addr_len || data.len() < offset + length {
                return Err(Error::InvalidSyntax("Bad traffic selector length".into()));
            }

            let start_port = u16::from_be_bytes([data[offset + 4], data[offset + 5]]);
            let end_port = u16::from_be_bytes([data[offset + 6], data[offset + 7]]);
            let start_addr = data[offset + 8..offset + 8 + addr_len].to_vec();
            let end_addr = data[offset + 8 + addr_len..offset + length].to_vec();

            selectors.push(TrafficSelector {
                ts_type,
                ip_protocol,
                start_port,
                end_port,
                start_addr,
                end_addr,
            });
            offset += length;
        }

        if offset != data.len() {
            return Err(Error::InvalidSyntax(
                "Trailing bytes after traffic selectors".into(),
            ));
        }

        Ok(TrafficSelectorsPayload { selectors })
    }

    /// Serialize traffic selectors to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.push(self.selectors.len() as u8);
        data.extend_from_slice(&[0u8; 3]); // reserved

        for ts in &self.selectors {
            let length = 8 + ts.start_addr.len() + ts.end_addr.len();
            data.push(ts.ts_type);
            data.push(ts.ip_protocol);
            data.extend_from_slice(&(length as u16).to_be_bytes());
            data.extend_from_slice(&ts.start_port.to_be_bytes());
            data.extend_from_slice(&ts.end_port.to_be_bytes());
            data.extend_from_slice(&ts.start_addr);
            data.extend_from_slice(&ts.end_addr);
        }

        data
    }
}

/// Encrypted (SK) payload body.
///
/// The body layout depends on the negotiated cipher, so the chain parser
/// keeps it raw; `message.rs` splits IV, ciphertext and checksum once the
/// algorithms are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Raw SK payload body: IV ‖ ciphertext (+tag) ‖ checksum
    pub raw: Vec<u8>,
}

impl EncryptedPayload {
    /// Assemble an SK body from its parts.
    ///
    /// `checksum` is empty for AEAD ciphers (the tag rides inside the
    /// ciphertext) and for pre-checksum encoding (the ICV is appended after
    /// the packet length is known).
    pub fn assemble(iv: &[u8], ciphertext: &[u8], checksum: &[u8]) -> Self {
        let mut raw = Vec::with_capacity(iv.len() + ciphertext.len() + checksum.len());
        raw.extend_from_slice(iv);
        raw.extend_from_slice(ciphertext);
        raw.extend_from_slice(checksum);
        EncryptedPayload { raw }
    }

    /// Split the body into (IV, ciphertext, checksum) given the lengths
    /// mandated by the negotiated algorithms.
    pub fn split(&self, iv_len: usize, checksum_len: usize) -> Result<(&[u8], &[u8], &[u8])> {
        if self.raw.len() < iv_len + checksum_len {
            return Err(Error::BufferTooShort {
                required: iv_len + checksum_len,
                available: self.raw.len(),
            });
        }

        let iv = &self.raw[..iv_len];
        let ct_end = self.raw.len() - checksum_len;
        Ok((iv, &self.raw[iv_len..ct_end], &self.raw[ct_end..]))
    }
}

/// Configuration payload types (RFC 7296 Section 3.15)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigType {
    /// CFG_REQUEST
    Request = 1,
    /// CFG_REPLY
    Reply = 2,
    /// CFG_SET
    Set = 3,
    /// CFG_ACK
    Ack = 4,
}

impl ConfigType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ConfigType::Request),
            2 => Some(ConfigType::Reply),
            3 => Some(ConfigType::Set),
            4 => Some(ConfigType::Ack),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Recognised configuration attributes (RFC 7296 Section 3.15.1)
///
/// Values are `None` in requests (empty attribute asking for assignment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAttribute {
    /// INTERNAL_IP4_ADDRESS (1)
    Ipv4Address(Option<Ipv4Addr>),
    /// INTERNAL_IP4_NETMASK (2)
    Ipv4Netmask(Option<Ipv4Addr>),
    /// INTERNAL_IP4_DNS (3)
    Ipv4Dns(Option<Ipv4Addr>),
    /// INTERNAL_IP4_DHCP (6)
    Ipv4Dhcp(Option<Ipv4Addr>),
    /// INTERNAL_IP6_ADDRESS (8): address + prefix length
    Ipv6Address(Option<(Ipv6Addr, u8)>),
    /// INTERNAL_IP6_DNS (10)
    Ipv6Dns(Option<Ipv6Addr>),
    /// INTERNAL_IP4_SUBNET (13): address + netmask
    Ipv4Subnet(Option<(Ipv4Addr, Ipv4Addr)>),
    /// INTERNAL_IP6_SUBNET (15): address + prefix length
    Ipv6Subnet(Option<(Ipv6Addr, u8)>),
}

impl ConfigAttribute {
    /// Wire attribute type code
    pub fn type_code(&self) -> u16 {
        match self {
            ConfigAttribute::Ipv4Address(_) => 1,
            ConfigAttribute::Ipv4Netmask(_) => 2,
            ConfigAttribute::Ipv4Dns(_) => 3,
            ConfigAttribute::Ipv4Dhcp(_) => 6,
            ConfigAttribute::Ipv6Address(_) => 8,
            ConfigAttribute::Ipv6Dns(_) => 10,
            ConfigAttribute::Ipv4Subnet(_) => 13,
            ConfigAttribute::Ipv6Subnet(_) => 15,
        }
    }

    fn value_bytes(&self) -> Vec<u8> {
        fn v4(addr: &Option<Ipv4Addr>) -> Vec<u8> {
            addr.map(|a| a.octets().to_vec()).unwrap_or_default()
        }

        match self {
            ConfigAttribute::Ipv4Address(a)
            | ConfigAttribute::Ipv4Netmask(a)
            | ConfigAttribute::Ipv4Dns(a)
            | ConfigAttribute::Ipv4Dhcp(a) => v4(a),
            ConfigAttribute::Ipv6Address(a) | ConfigAttribute::Ipv6Subnet(a) => a
                .map(|(addr, prefix)| {
                    let mut out = addr.octets().to_vec();
                    out.push(prefix);
                    out
                })
                .unwrap_or_default(),
            ConfigAttribute::Ipv6Dns(a) => {
                a.map(|addr| addr.octets().to_vec()).unwrap_or_default()
            }
            ConfigAttribute::Ipv4Subnet(a) => a
                .map(|(addr, mask)| {
                    let mut out = addr.octets().to_vec();
                    out.extend_from_slice(&mask.octets());
                    out
                })
                .unwrap_or_default(),
        }
    }

    fn parse(attr_type: u16, value: &[u8]) -> Result<Option<Self>> {
        fn v4(value: &[u8]) -> Result<Option<Ipv4Addr>> {
            match value.len() {
                0 => Ok(None),
                4 => Ok(Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]))),
                n => Err(Error::InvalidSyntax(format!(
                    "IPv4 config attribute with length {}",
                    n
                ))),
            }
        }

        fn v6(value: &[u8]) -> Result<Option<Ipv6Addr>> {
            match value.len() {
                0 => Ok(None),
                16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(value);
                    Ok(Some(Ipv6Addr::from(octets)))
                }
                n => Err(Error::InvalidSyntax(format!(
                    "IPv6 config attribute with length {}",
                    n
                ))),
            }
        }

        fn v6_prefixed(value: &[u8]) -> Result<Option<(Ipv6Addr, u8)>> {
            match value.len() {
                0 => Ok(None),
                17 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&value[..16]);
                    Ok(Some((Ipv6Addr::from(octets), value[16])))
                }
                n => Err(Error::InvalidSyntax(format!(
                    "IPv6 prefixed config attribute with length {}",
                    n
                ))),
            }
        }

        let attr = match attr_type {
            1 => Some(ConfigAttribute::Ipv4Address(v4(value)?)),
            2 => Some(ConfigAttribute::Ipv4Netmask(v4(value)?)),
            3 => Some(ConfigAttribute::Ipv4Dns(v4(value)?)),
            6 => Some(ConfigAttribute::Ipv4Dhcp(v4(value)?)),
            8 => Some(ConfigAttribute::Ipv6Address(v6_prefixed(value)?)),
            10 => Some(ConfigAttribute::Ipv6Dns(v6(value)?)),
            13 => match value.len() {
                0 => Some(ConfigAttribute::Ipv4Subnet(None)),
                8 => Some(ConfigAttribute::Ipv4Subnet(Some((
                    Ipv4Addr::new(value[0], value[1], value[2], value[3]),
                    Ipv4Addr::new(value[4], value[5], value[6], value[7]),
                )))),
                n => {
                    return Err(Error::InvalidSyntax(format!(
                        "IPv4 subnet attribute with length {}",
                        n
                    )))
                }
            },
            15 => Some(ConfigAttribute::Ipv6Subnet(v6_prefixed(value)?)),
            // Unrecognised attribute types are ignored silently
            _ => None,
        };

        Ok(attr)
    }
}

/// Configuration Payload (RFC 7296 Section 3.15)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    /// CFG type
    pub cfg_type: ConfigType,

    /// Recognised attributes, in wire order
    pub attributes: Vec<ConfigAttribute>,
}

impl ConfigPayload {
    /// Create new configuration payload
    pub fn new(cfg_type: ConfigType, attributes: Vec<ConfigAttribute>) -> Self {
        ConfigPayload {
            cfg_type,
            attributes,
        }
    }

    /// Parse configuration payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let cfg_type = ConfigType::from_u8(data[0])
            .ok_or_else(|| Error::InvalidSyntax(format!("Unknown CFG type: {}", data[0])))?;

        let mut attributes = Vec::new();
        let mut offset = 4;
        while offset < data.len() {
            if data.len() < offset + 4 {
                return Err(Error::InvalidSyntax("Truncated config attribute".into()));
            }

            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]) & 0x7FFF;
            let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            if data.len() < offset + 4 + length {
                return Err(Error::InvalidSyntax(
                    "Config attribute overruns payload".into(),
                ));
            }

            if let Some(attr) =
                ConfigAttribute::parse(attr_type, &data[offset + 4..offset + 4 + length])?
            {
                attributes.push(attr);
            }

            offset += 4 + length;
        }

        Ok(ConfigPayload {
            cfg_type,
            attributes,
        })
    }

    /// Serialize configuration payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.push(self.cfg_type.to_u8());
        data.extend_from_slice(&[0u8; 3]); // reserved

        for attr in &self.attributes {
            let value = attr.value_bytes();
            data.extend_from_slice(&attr.type_code().to_be_bytes());
            data.extend_from_slice(&(value.len() as u16).to_be_bytes());
            data.extend_from_slice(&value);
        }

        data
    }

    /// Validate a CFG_REPLY: an IPv4 netmask must accompany an IPv4 address
    /// and at most one netmask may be present.
    pub fn validate_reply(&self) -> Result<()> {
        let mut has_address = false;
        let mut netmask_count = 0;

        for attr in &self.attributes {
            match attr {
                ConfigAttribute::Ipv4Address(_) => has_address = true,
                ConfigAttribute::Ipv4Netmask(_) => netmask_count += 1,
                _ => {}
            }
        }

        if netmask_count > 0 && !has_address {
            return Err(Error::InvalidSyntax(
                "INTERNAL_IP4_NETMASK without INTERNAL_IP4_ADDRESS".into(),
            ));
        }
        if netmask_count > 1 {
            return Err(Error::InvalidSyntax(
                "More than one INTERNAL_IP4_NETMASK".into(),
            ));
        }

        Ok(())
    }
}
