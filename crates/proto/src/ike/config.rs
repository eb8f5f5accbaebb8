//! IKE session configuration
//!
//! Provides the configuration structure and builder for [`crate::ike::client::IkeClient`].

use super::crypto::DhGroup;
use super::payload::Identification;
use super::proposal::{Proposal, TransformType};
use crate::eap::EapSessionConfig;
use crate::ike::{Error, Result};
use std::net::SocketAddr;

/// How one side of the IKE_AUTH exchange authenticates
#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// Pre-shared key
    Psk(Vec<u8>),

    /// Digital signature with a certificate chain and a raw Ed25519 key
    /// (the private key locally, the peer's public key remotely;
    /// certificate path validation is external)
    PubKeySignature {
        /// DER certificates, end entity first
        cert_chain: Vec<Vec<u8>>,
        /// 32-byte Ed25519 key
        key: Vec<u8>,
    },

    /// EAP with the embedded authenticator (local side only)
    Eap(EapSessionConfig),
}

/// Configuration for one IKE session (initiator)
#[derive(Debug, Clone)]
pub struct IkeSessionConfig {
    /// Remote gateway endpoint
    pub server_address: SocketAddr,

    /// Our identification
    pub local_identification: Identification,

    /// The gateway's expected identification
    pub remote_identification: Identification,

    /// How we authenticate
    pub local_auth: AuthConfig,

    /// How the gateway authenticates
    pub remote_auth: AuthConfig,

    /// IKE SA proposals, in preference order; the first proposal's DH
    /// group seeds the initial KE payload
    pub sa_proposals: Vec<Proposal>,

    /// Child SA proposals, in preference order
    pub child_proposals: Vec<Proposal>,

    /// Use UDP encapsulation (port 4500, non-ESP marker) for NAT-T
    pub udp_encap: bool,
}

impl IkeSessionConfig {
    /// Create builder for session configuration
    pub fn builder() -> IkeSessionConfigBuilder {
        IkeSessionConfigBuilder::new()
    }

    /// The DH group used for the initial key exchange
    pub fn initial_dh_group(&self) -> Result<DhGroup> {
        let first = self
            .sa_proposals
            .first()
            .ok_or_else(|| Error::InvalidParameter("No IKE proposals configured".into()))?;

        first
            .get_transform(TransformType::Dh)
            .and_then(|t| DhGroup::from_transform_id(t.transform_id))
            .ok_or_else(|| {
                Error::InvalidParameter("First IKE proposal has no supported DH group".into())
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sa_proposals.is_empty() {
            return Err(Error::InvalidParameter(
                "At least one IKE proposal required".into(),
            ));
        }
        if self.child_proposals.is_empty() {
            return Err(Error::InvalidParameter(
                "At least one child proposal required".into(),
            ));
        }

        for proposal in &self.sa_proposals {
            proposal.validate_ike()?;
        }
        for proposal in &self.child_proposals {
            proposal.validate_child()?;
        }

        self.initial_dh_group()?;

        match &self.local_auth {
            AuthConfig::Psk(psk) if psk.is_empty() => {
                return Err(Error::InvalidParameter("PSK cannot be empty".into()))
            }
            AuthConfig::Eap(eap) => eap.validate()?,
            _ => {}
        }
        if matches!(self.remote_auth, AuthConfig::Eap(_)) {
            return Err(Error::InvalidParameter(
                "The gateway cannot authenticate with EAP".into(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`IkeSessionConfig`]
#[derive(Default)]
pub struct IkeSessionConfigBuilder {
    server_address: Option<SocketAddr>,
    local_identification: Option<Identification>,
    remote_identification: Option<Identification>,
    local_auth: Option<AuthConfig>,
    remote_auth: Option<AuthConfig>,
    sa_proposals: Option<Vec<Proposal>>,
    child_proposals: Option<Vec<Proposal>>,
    udp_encap: bool,
}

impl IkeSessionConfigBuilder {
    /// Create new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the remote gateway endpoint
    pub fn with_server_address(mut self, addr: SocketAddr) -> Self {
        self.server_address = Some(addr);
        self
    }

    /// Set our identification
    pub fn with_local_identification(mut self, id: Identification) -> Self {
        self.local_identification = Some(id);
        self
    }

    /// Set the gateway's expected identification
    pub fn with_remote_identification(mut self, id: Identification) -> Self {
        self.remote_identification = Some(id);
        self
    }

    /// Set our authentication method
    pub fn with_local_auth(mut self, auth: AuthConfig) -> Self {
        self.local_auth = Some(auth);
        self
    }

    /// Set the gateway's authentication method
    pub fn with_remote_auth(mut self, auth: AuthConfig) -> Self {
        self.remote_auth = Some(auth);
        self
    }

    /// Set the IKE SA proposals
    pub fn with_sa_proposals(mut self, proposals: Vec<Proposal>) -> Self {
        self.sa_proposals = Some(proposals);
        self
    }

    /// Set the child SA proposals
    pub fn with_child_proposals(mut self, proposals: Vec<Proposal>) -> Self {
        self.child_proposals = Some(proposals);
        self
    }

    /// Enable UDP encapsulation (NAT-T)
    pub fn with_udp_encap(mut self) -> Self {
        self.udp_encap = true;
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<IkeSessionConfig> {
        use super::proposal::{
            DhTransformId, EncrTransformId, PrfTransformId, ProtocolId, Transform, ESN_NONE,
        };

        let config = IkeSessionConfig {
            server_address: self
                .server_address
                .ok_or_else(|| Error::InvalidParameter("server_address is required".into()))?,
            local_identification: self.local_identification.ok_or_else(|| {
                Error::InvalidParameter("local_identification is required".into())
            })?,
            remote_identification: self.remote_identification.ok_or_else(|| {
                Error::InvalidParameter("remote_identification is required".into())
            })?,
            local_auth: self
                .local_auth
                .ok_or_else(|| Error::InvalidParameter("local_auth is required".into()))?,
            remote_auth: self
                .remote_auth
                .ok_or_else(|| Error::InvalidParameter("remote_auth is required".into()))?,
            sa_proposals: self.sa_proposals.unwrap_or_else(|| {
                vec![
                    // Default: AES-GCM-128, HMAC-SHA256 PRF, DH group 14
                    Proposal::new(1, ProtocolId::Ike)
                        .add_transform(Transform::encr_with_key_len(
                            EncrTransformId::AesGcm16,
                            128,
                        ))
                        .add_transform(Transform::prf(PrfTransformId::HmacSha256))
                        .add_transform(Transform::dh(DhTransformId::Group14)),
                ]
            }),
            child_proposals: self.child_proposals.unwrap_or_else(|| {
                vec![
                    // Default: AES-GCM-128, no ESN
                    Proposal::new(1, ProtocolId::Esp)
                        .add_transform(Transform::encr_with_key_len(
                            EncrTransformId::AesGcm16,
                            128,
                        ))
                        .add_transform(Transform::esn(ESN_NONE)),
                ]
            }),
            udp_encap: self.udp_encap,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ike::proposal::{
        DhTransformId, EncrTransformId, PrfTransformId, ProtocolId, Transform,
    };
    use std::net::Ipv4Addr;

    fn base_builder() -> IkeSessionConfigBuilder {
        IkeSessionConfig::builder()
            .with_server_address(SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), 500)))
            .with_local_identification(Identification::Fqdn("client.example.com".into()))
            .with_remote_identification(Identification::Fqdn("vpn.example.com".into()))
            .with_local_auth(AuthConfig::Psk(b"swordfish".to_vec()))
            .with_remote_auth(AuthConfig::Psk(b"swordfish".to_vec()))
    }

    #[test]
    fn test_builder_with_defaults() {
        let config = base_builder().build().expect("Failed to build config");

        assert_eq!(config.sa_proposals.len(), 1);
        assert_eq!(config.child_proposals.len(), 1);
        assert!(!config.udp_encap);
        assert_eq!(config.initial_dh_group().unwrap(), DhGroup::Modp2048);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let result = IkeSessionConfig::builder()
            .with_local_auth(AuthConfig::Psk(b"x".to_vec()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_psk_rejected() {
        let result = base_builder()
            .with_local_auth(AuthConfig::Psk(Vec::new()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_remote_eap_rejected() {
        let result = base_builder()
            .with_remote_auth(AuthConfig::Eap(crate::eap::EapSessionConfig::new()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_eap_local_auth() {
        let config = base_builder()
            .with_local_auth(AuthConfig::Eap(
                crate::eap::EapSessionConfig::new().with_mschapv2("User", "clientPass"),
            ))
            .build()
            .unwrap();
        assert!(matches!(config.local_auth, AuthConfig::Eap(_)));
    }

    #[test]
    fn test_invalid_ike_proposal_rejected() {
        // Child-style proposal offered as an IKE proposal
        let bad = Proposal::new(1, ProtocolId::Esp)
            .add_transform(Transform::encr_with_key_len(EncrTransformId::AesGcm16, 128));

        let result = base_builder().with_sa_proposals(vec![bad]).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unsupported_first_dh_group_rejected() {
        let proposal = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_with_key_len(EncrTransformId::AesGcm16, 128))
            .add_transform(Transform::prf(PrfTransformId::HmacSha256))
            .add_transform(Transform::dh(DhTransformId::Group15));

        let result = base_builder().with_sa_proposals(vec![proposal]).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_udp_encap_flag() {
        let config = base_builder().with_udp_encap().build().unwrap();
        assert!(config.udp_encap);
    }
}
