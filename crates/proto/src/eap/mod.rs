//! Embedded EAP authentication subsystem
//!
//! This module implements the peer side of EAP (RFC 3748) as used inside
//! IKE_AUTH exchanges:
//!
//! - **EAP-SIM** (RFC 4186) - GSM triplet authentication
//! - **EAP-AKA / EAP-AKA'** (RFC 4187 / RFC 5448) - UMTS authentication
//! - **EAP-MSCHAPv2** (draft-kamath-pppext-eap-mschapv2, RFC 2759) -
//!   password authentication
//!
//! # Architecture
//!
//! ```text
//! IKE session (EAP payload bytes)
//!        ↓
//! EapAuthenticator          decode, method selection, NAK, Notification
//!        ↓
//! Method state machine      SIM / AKA / AKA' / MSCHAPv2
//!        ↓
//! SIM applet / subscriber source (burrow-platform traits)
//! ```
//!
//! A method that completes successfully exports its MSK and EMSK, which the
//! IKE session mixes into the final AUTH payload computation.

pub mod aka;
pub mod authenticator;
pub mod message;
pub mod mschapv2;
pub mod sim;
pub mod simaka;

pub use authenticator::{EapAuthenticator, EapResult};
pub use message::{EapCode, EapData, EapMessage};

use crate::ike::{Error, Result};

/// EAP method type: Identity (1)
pub const EAP_TYPE_IDENTITY: u8 = 1;
/// EAP method type: Notification (2)
pub const EAP_TYPE_NOTIFICATION: u8 = 2;
/// EAP method type: Legacy Nak (3)
pub const EAP_TYPE_NAK: u8 = 3;
/// EAP method type: EAP-SIM (18)
pub const EAP_TYPE_SIM: u8 = 18;
/// EAP method type: EAP-AKA (23)
pub const EAP_TYPE_AKA: u8 = 23;
/// EAP method type: EAP-MSCHAPv2 (26)
pub const EAP_TYPE_MSCHAP_V2: u8 = 26;
/// EAP method type: EAP-AKA' (50)
pub const EAP_TYPE_AKA_PRIME: u8 = 50;

/// What a method state machine produced for one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    /// Type-data bytes for an EAP-Response of the method's type
    Response(Vec<u8>),
    /// The method concluded successfully and exported session keys
    Success {
        /// Master Session Key
        msk: Vec<u8>,
        /// Extended Master Session Key
        emsk: Vec<u8>,
    },
    /// The method concluded in failure
    Failure,
}

/// Configuration for EAP-SIM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapSimConfig {
    /// Subscription the identity and triplets come from
    pub sub_id: u32,
    /// Card application to authenticate against
    pub app_type: burrow_platform::SimAppType,
}

/// Configuration for EAP-AKA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapAkaConfig {
    /// Subscription the identity and quintets come from
    pub sub_id: u32,
    /// Card application to authenticate against
    pub app_type: burrow_platform::SimAppType,
}

/// Configuration for EAP-AKA'
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapAkaPrimeConfig {
    /// Subscription the identity and quintets come from
    pub sub_id: u32,
    /// Card application to authenticate against
    pub app_type: burrow_platform::SimAppType,
    /// Network name the server must prove knowledge of
    pub network_name: String,
}

/// Configuration for EAP-MSCHAPv2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapMsChapV2Config {
    /// Username (ASCII only)
    pub username: String,
    /// Password (encoded UTF-16LE for hashing)
    pub password: String,
}

/// Which EAP methods this session is willing to run
///
/// Multiple methods may coexist; the server picks one, and anything else it
/// asks for is answered with a Nak listing the configured types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EapSessionConfig {
    /// Identity for EAP-Request/Identity (may be empty)
    pub identity: Vec<u8>,
    /// EAP-SIM configuration
    pub sim: Option<EapSimConfig>,
    /// EAP-AKA configuration
    pub aka: Option<EapAkaConfig>,
    /// EAP-AKA' configuration
    pub aka_prime: Option<EapAkaPrimeConfig>,
    /// EAP-MSCHAPv2 configuration
    pub mschapv2: Option<EapMsChapV2Config>,
}

impl EapSessionConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identity for EAP-Request/Identity
    pub fn with_identity(mut self, identity: impl Into<Vec<u8>>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Enable EAP-SIM
    pub fn with_sim(mut self, sub_id: u32, app_type: burrow_platform::SimAppType) -> Self {
        self.sim = Some(EapSimConfig { sub_id, app_type });
        self
    }

    /// Enable EAP-AKA
    pub fn with_aka(mut self, sub_id: u32, app_type: burrow_platform::SimAppType) -> Self {
        self.aka = Some(EapAkaConfig { sub_id, app_type });
        self
    }

    /// Enable EAP-AKA'
    pub fn with_aka_prime(
        mut self,
        sub_id: u32,
        app_type: burrow_platform::SimAppType,
        network_name: impl Into<String>,
    ) -> Self {
        self.aka_prime = Some(EapAkaPrimeConfig {
            sub_id,
            app_type,
            network_name: network_name.into(),
        });
        self
    }

    /// Enable EAP-MSCHAPv2
    pub fn with_mschapv2(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.mschapv2 = Some(EapMsChapV2Config {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// The method type codes this configuration allows, for Nak responses
    pub fn configured_types(&self) -> Vec<u8> {
        let mut types = Vec::new();
        if self.sim.is_some() {
            types.push(EAP_TYPE_SIM);
        }
        if self.aka.is_some() {
            types.push(EAP_TYPE_AKA);
        }
        if self.aka_prime.is_some() {
            types.push(EAP_TYPE_AKA_PRIME);
        }
        if self.mschapv2.is_some() {
            types.push(EAP_TYPE_MSCHAP_V2);
        }
        types
    }

    /// Check whether a requested method type is configured
    pub fn supports(&self, type_code: u8) -> bool {
        self.configured_types().contains(&type_code)
    }

    /// Validate that at least one method is configured
    pub fn validate(&self) -> Result<()> {
        if self.configured_types().is_empty() {
            return Err(Error::InvalidParameter(
                "EAP session configuration has no methods".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_platform::SimAppType;

    #[test]
    fn test_configured_types() {
        let config = EapSessionConfig::new()
            .with_sim(1, SimAppType::Sim)
            .with_mschapv2("user", "pass");

        assert_eq!(config.configured_types(), vec![EAP_TYPE_SIM, EAP_TYPE_MSCHAP_V2]);
        assert!(config.supports(EAP_TYPE_SIM));
        assert!(!config.supports(EAP_TYPE_AKA));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_invalid() {
        assert!(EapSessionConfig::new().validate().is_err());
    }

    #[test]
    fn test_aka_prime_network_name() {
        let config = EapSessionConfig::new().with_aka_prime(
            2,
            SimAppType::Usim,
            "WLAN",
        );
        assert_eq!(config.aka_prime.unwrap().network_name, "WLAN");
    }
}
