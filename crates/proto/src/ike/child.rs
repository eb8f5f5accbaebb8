//! Child SA negotiation and keying
//!
//! Child SAs are negotiated inside IKE_AUTH and CREATE_CHILD_SA exchanges
//! and protect data traffic with ESP. The IKE session owns the child
//! table; each child is addressed by an opaque local identifier, and the
//! derived keys are handed to the external installer rather than used
//! here.
//!
//! # Key Derivation
//!
//! ```text
//! KEYMAT = prf+(SK_d, Ni | Nr)
//! SK_ei | SK_ai | SK_er | SK_ar = KEYMAT
//! ```

use super::crypto::{ChildKeyMaterial, PrfAlgorithm};
use super::payload::{TrafficSelector, TrafficSelectorsPayload};
use super::proposal::Proposal;
use super::sa::NegotiatedAlgorithms;
use crate::ike::{Error, Result};
use burrow_platform::ChildSaKeys;
use rand::Rng;

/// State of one child SA pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSaState {
    /// Carrying traffic
    Active,
    /// Replaced by a rekey, awaiting deletion
    Rekeyed,
    /// Deleted from the dataplane
    Deleted,
}

/// One negotiated child SA pair (inbound + outbound)
#[derive(Debug)]
pub struct ChildSaPair {
    /// Opaque identifier the caller uses to address this child
    pub child_id: u32,

    /// SPI of the inbound (remote→local) SA, chosen by us
    pub inbound_spi: u32,

    /// SPI of the outbound (local→remote) SA, chosen by the peer
    pub outbound_spi: u32,

    /// Selected proposal
    pub proposal: Proposal,

    /// Negotiated traffic selectors (initiator side)
    pub ts_init: TrafficSelectorsPayload,

    /// Negotiated traffic selectors (responder side)
    pub ts_resp: TrafficSelectorsPayload,

    /// Lifecycle state
    pub state: ChildSaState,
}

/// Keys for both directions of a child SA pair, ready for the installer
#[derive(Debug)]
pub struct ChildSaKeyPair {
    /// Keys protecting remote→local traffic
    pub inbound: ChildSaKeys,
    /// Keys protecting local→remote traffic
    pub outbound: ChildSaKeys,
}

/// Allocate a random non-zero child SPI.
pub fn allocate_child_spi() -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let spi: u32 = rng.gen();
        if spi != 0 {
            return spi;
        }
    }
}

/// Default traffic selectors covering all IPv4 traffic.
pub fn default_traffic_selectors() -> TrafficSelectorsPayload {
    TrafficSelectorsPayload::new(vec![TrafficSelector::all_ipv4()])
}

/// Check that the responder's selectors are a subset (narrowing) of what
/// we offered; an empty selector list is never valid.
pub fn validate_narrowing(
    offered: &TrafficSelectorsPayload,
    chosen: &TrafficSelectorsPayload,
) -> Result<()> {
    if chosen.selectors.is_empty() {
        return Err(Error::InvalidSyntax("Empty traffic selector list".into()));
    }

    for ts in &chosen.selectors {
        let contained = offered.selectors.iter().any(|offer| {
            offer.ts_type == ts.ts_type
                && (offer.ip_protocol == 0 || offer.ip_protocol == ts.ip_protocol)
                && offer.start_port <= ts.start_port
                && ts.end_port <= offer.end_port
                && offer.start_addr <= ts.start_addr
                && ts.end_addr <= offer.end_addr
        });
        if !contained {
            return Err(Error::InvalidSyntax(
                "Responder widened the traffic selectors".into(),
            ));
        }
    }

    Ok(())
}

/// Derive the keys for one child SA pair from the parent SA's SK_d.
///
/// The initiator encrypts outbound traffic under SK_ei and decrypts
/// inbound traffic under SK_er.
pub fn derive_child_keys(
    prf: PrfAlgorithm,
    sk_d: &[u8],
    nonce_i: &[u8],
    nonce_r: &[u8],
    proposal: &Proposal,
) -> Result<ChildSaKeyPair> {
    // Child proposals carry no PRF/DH; resolve just the cipher suite
    let (cipher, integ) = NegotiatedAlgorithms::from_child_proposal(proposal)?;
    let encr_key_len = cipher.key_len();
    let integ_key_len = integ.map(|i| i.key_len()).unwrap_or(0);

    let keymat = ChildKeyMaterial::derive(prf, sk_d, nonce_i, nonce_r, encr_key_len, integ_key_len);

    Ok(ChildSaKeyPair {
        outbound: ChildSaKeys {
            encryption_key: keymat.sk_ei.clone(),
            integrity_key: keymat.sk_ai.clone(),
        },
        inbound: ChildSaKeys {
            encryption_key: keymat.sk_er.clone(),
            integrity_key: keymat.sk_ar.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ike::proposal::{EncrTransformId, ProtocolId, Transform, ESN_NONE};

    fn child_proposal() -> Proposal {
        Proposal::new(1, ProtocolId::Esp)
            .add_transform(Transform::encr_with_key_len(EncrTransformId::AesGcm16, 128))
            .add_transform(Transform::esn(ESN_NONE))
    }

    #[test]
    fn test_allocate_child_spi_nonzero() {
        for _ in 0..64 {
            assert_ne!(allocate_child_spi(), 0);
        }
    }

    #[test]
    fn test_derive_child_keys() {
        let keys = derive_child_keys(
            PrfAlgorithm::HmacSha256,
            &[0x0A; 32],
            &[0x01; 32],
            &[0x02; 32],
            &child_proposal(),
        )
        .unwrap();

        assert_eq!(keys.outbound.encryption_key.len(), 16);
        assert_eq!(keys.inbound.encryption_key.len(), 16);
        assert!(keys.outbound.integrity_key.is_empty());
        assert_ne!(keys.outbound.encryption_key, keys.inbound.encryption_key);
    }

    #[test]
    fn test_narrowing_accepts_subset() {
        let offered = default_traffic_selectors();

        let narrowed = TrafficSelectorsPayload::new(vec![TrafficSelector {
            ts_type: TrafficSelector::TYPE_IPV4,
            ip_protocol: 6,
            start_port: 443,
            end_port: 443,
            start_addr: vec![10, 0, 0, 0],
            end_addr: vec![10, 0, 0, 255],
        }]);

        assert!(validate_narrowing(&offered, &narrowed).is_ok());
    }

    #[test]
    fn test_narrowing_rejects_widening() {
        let offered = TrafficSelectorsPayload::new(vec![TrafficSelector {
            ts_type: TrafficSelector::TYPE_IPV4,
            ip_protocol: 0,
            start_port: 0,
            end_port: 1024,
            start_addr: vec![10, 0, 0, 0],
            end_addr: vec![10, 255, 255, 255],
        }]);

        let widened = default_traffic_selectors();
        assert!(validate_narrowing(&offered, &widened).is_err());
    }

    #[test]
    fn test_narrowing_rejects_empty() {
        let offered = default_traffic_selectors();
        let empty = TrafficSelectorsPayload::new(Vec::new());
        assert!(validate_narrowing(&offered, &empty).is_err());
    }
}
