//! Collaborator traits consumed by Burrow protocol modules
//!
//! The IKE/EAP engine never talks to hardware or the kernel directly. The
//! SIM/USIM applet, the subscriber identity source, and the kernel IPsec
//! interface are injected through these traits so they can be mocked in
//! tests and backed by platform services in production.

use crate::BurrowResult;

/// Which card application performs the authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimAppType {
    /// GSM SIM application
    Sim,
    /// UMTS USIM application
    Usim,
    /// ISIM application
    Isim,
}

/// Result of a SIM/USIM authentication run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimAuthResult {
    /// GSM triplet response: (SRES, Kc)
    Gsm {
        /// 4-byte signed response
        sres: Vec<u8>,
        /// 8-byte GSM cipher key
        kc: Vec<u8>,
    },
    /// UMTS quintet response: (RES, CK, IK)
    Umts {
        /// Signed response (4-16 bytes)
        res: Vec<u8>,
        /// Cipher key
        ck: Vec<u8>,
        /// Integrity key
        ik: Vec<u8>,
    },
    /// The card detected a sequence-number mismatch and produced AUTS
    SyncFailure {
        /// 14-byte resynchronization token
        auts: Vec<u8>,
    },
}

/// SIM/USIM authentication applet interface
///
/// Implementations must not block for unbounded time; the protocol engine
/// calls this between queued events.
pub trait SimAuthenticator: Send {
    /// Run an authentication round on the card.
    ///
    /// `autn` is `Some` for UMTS (AKA) challenges and `None` for GSM (SIM)
    /// challenges.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::Unavailable` when no card (or no matching
    /// application) is present.
    fn authenticate(
        &mut self,
        app: SimAppType,
        rand: &[u8],
        autn: Option<&[u8]>,
    ) -> BurrowResult<SimAuthResult>;
}

/// Source of the subscriber identity (IMSI or equivalent)
pub trait SubscriberIdSource: Send {
    /// Return the subscriber identity, or `None` when it cannot be read.
    fn subscriber_id(&self) -> Option<String>;
}

/// Keying material for one direction of a child SA
#[derive(Debug, Clone)]
pub struct ChildSaKeys {
    /// Encryption key
    pub encryption_key: Vec<u8>,
    /// Integrity key (empty for AEAD ciphers)
    pub integrity_key: Vec<u8>,
}

/// Kernel IPsec SA installation interface
pub trait ChildSaInstaller: Send {
    /// Install a negotiated child SA into the dataplane.
    ///
    /// # Errors
    ///
    /// An installation failure is fatal to the IKE session.
    fn install_child_sa(
        &mut self,
        spi: u32,
        inbound: bool,
        keys: ChildSaKeys,
    ) -> BurrowResult<()>;

    /// Remove a previously installed child SA.
    fn delete_child_sa(&mut self, spi: u32) -> BurrowResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedIdentity(Option<String>);

    impl SubscriberIdSource for FixedIdentity {
        fn subscriber_id(&self) -> Option<String> {
            self.0.clone()
        }
    }

    #[test]
    fn test_subscriber_id_source() {
        let source = FixedIdentity(Some("123456789012345".to_string()));
        assert_eq!(source.subscriber_id().unwrap(), "123456789012345");

        let missing = FixedIdentity(None);
        assert!(missing.subscriber_id().is_none());
    }

    #[test]
    fn test_sim_auth_result_variants() {
        let gsm = SimAuthResult::Gsm {
            sres: vec![1, 2, 3, 4],
            kc: vec![0; 8],
        };
        assert!(matches!(gsm, SimAuthResult::Gsm { .. }));

        let sync = SimAuthResult::SyncFailure { auts: vec![0; 14] };
        assert!(matches!(sync, SimAuthResult::SyncFailure { .. }));
    }
}
