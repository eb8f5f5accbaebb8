//! EAP-AKA and EAP-AKA' method state machines (RFC 4187, RFC 5448)
//!
//! Peer-side flow:
//!
//! ```text
//! Created ──AKA-Identity (optional)──▶ Identity ──AKA-Challenge──▶ Final
//!                                         │
//!                                         └─sync failure─▶ AT_AUTS, await a new challenge
//! ```
//!
//! EAP-AKA' reuses the AKA flow with a key derivation that binds the
//! authenticated network name carried in AT_KDF_INPUT; a name that does
//! not match the configured one is answered with
//! AKA-Authentication-Reject.

use super::message::{EapCode, EapMessage};
use super::simaka::attribute::{
    self, EapSimAkaAttribute, CLIENT_ERROR_UNABLE_TO_PROCESS,
};
use super::simaka::keys::{self, EapSimAkaKeys, MacAlgorithm};
use super::simaka::typedata::{
    EapSimAkaTypeData, SUBTYPE_AKA_AUTHENTICATION_REJECT, SUBTYPE_AKA_CHALLENGE,
    SUBTYPE_AKA_IDENTITY, SUBTYPE_AKA_SYNCHRONIZATION_FAILURE, SUBTYPE_CLIENT_ERROR,
    SUBTYPE_NOTIFICATION,
};
use super::{EapAkaConfig, EapAkaPrimeConfig, MethodOutcome, EAP_TYPE_AKA, EAP_TYPE_AKA_PRIME};
use crate::ike::{Error, Result};
use burrow_platform::{SimAuthResult, SimAuthenticator, SubscriberIdSource};

/// Identity prefix for EAP-AKA permanent identities
const AKA_IDENTITY_PREFIX: u8 = b'0';

/// Identity prefix for EAP-AKA' permanent identities
const AKA_PRIME_IDENTITY_PREFIX: u8 = b'6';

/// The only AT_KDF value defined for EAP-AKA'
const KDF_AKA_PRIME: u16 = 1;

#[derive(Debug)]
enum AkaMode {
    Aka(EapAkaConfig),
    AkaPrime(EapAkaPrimeConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Identity,
    Final,
}

#[derive(Debug)]
enum PendingResult {
    Success(EapSimAkaKeys),
    Failure,
}

/// EAP-AKA (and EAP-AKA') method state machine
#[derive(Debug)]
pub struct EapAkaStateMachine {
    mode: AkaMode,
    state: State,
    identity: Vec<u8>,
    pending: Option<PendingResult>,
    notification_count: u8,
    challenge_done: bool,
}

impl EapAkaStateMachine {
    /// Create an EAP-AKA machine in the `Created` state.
    pub fn new_aka(config: EapAkaConfig) -> Self {
        Self::new(AkaMode::Aka(config))
    }

    /// Create an EAP-AKA' machine in the `Created` state.
    pub fn new_aka_prime(config: EapAkaPrimeConfig) -> Self {
        Self::new(AkaMode::AkaPrime(config))
    }

    fn new(mode: AkaMode) -> Self {
        EapAkaStateMachine {
            mode,
            state: State::Created,
            identity: Vec::new(),
            pending: None,
            notification_count: 0,
            challenge_done: false,
        }
    }

    /// The EAP method type this machine implements
    pub fn method_type(&self) -> u8 {
        match self.mode {
            AkaMode::Aka(_) => EAP_TYPE_AKA,
            AkaMode::AkaPrime(_) => EAP_TYPE_AKA_PRIME,
        }
    }

    fn app_type(&self) -> burrow_platform::SimAppType {
        match &self.mode {
            AkaMode::Aka(config) => config.app_type,
            AkaMode::AkaPrime(config) => config.app_type,
        }
    }

    fn identity_prefix(&self) -> u8 {
        match self.mode {
            AkaMode::Aka(_) => AKA_IDENTITY_PREFIX,
            AkaMode::AkaPrime(_) => AKA_PRIME_IDENTITY_PREFIX,
        }
    }

    fn mac_algorithm(&self) -> MacAlgorithm {
        match self.mode {
            AkaMode::Aka(_) => MacAlgorithm::HmacSha1_128,
            AkaMode::AkaPrime(_) => MacAlgorithm::HmacSha256_128,
        }
    }

    /// Process one EAP message addressed to this method.
    pub fn process(
        &mut self,
        message: &EapMessage,
        sim: &mut dyn SimAuthenticator,
        subscriber: &dyn SubscriberIdSource,
    ) -> Result<MethodOutcome> {
        match message.code {
            EapCode::Failure => {
                self.state = State::Final;
                self.pending = None;
                Ok(MethodOutcome::Failure)
            }
            EapCode::Success => {
                if self.state == State::Final {
                    if let Some(PendingResult::Success(keys)) = self.pending.take() {
                        return Ok(MethodOutcome::Success {
                            msk: keys.msk.clone(),
                            emsk: keys.emsk.clone(),
                        });
                    }
                }
                Err(Error::InvalidRequest(
                    "EAP-Success before AKA challenge completion".into(),
                ))
            }
            EapCode::Response => Err(Error::InvalidRequest(
                "Peer cannot receive an EAP-Response".into(),
            )),
            EapCode::Request => self.process_request(message, sim, subscriber),
        }
    }

    fn process_request(
        &mut self,
        message: &EapMessage,
        sim: &mut dyn SimAuthenticator,
        subscriber: &dyn SubscriberIdSource,
    ) -> Result<MethodOutcome> {
        let data = message
            .data
            .as_ref()
            .ok_or_else(|| Error::InvalidRequest("EAP request without type data".into()))?;
        if data.type_code != self.method_type() {
            return Err(Error::InvalidRequest(format!(
                "Type {} routed to EAP-AKA method",
                data.type_code
            )));
        }

        let type_data = EapSimAkaTypeData::decode(&data.type_data)?;

        match type_data.subtype {
            SUBTYPE_NOTIFICATION => self.process_notification(message, &type_data),
            _ if self.state == State::Final => Err(Error::InvalidRequest(
                "EAP-AKA session already concluded".into(),
            )),
            SUBTYPE_AKA_IDENTITY => self.process_identity(&type_data, subscriber),
            SUBTYPE_AKA_CHALLENGE => self.process_challenge(message, &type_data, sim, subscriber),
            other => {
                tracing::debug!(subtype = other, "Unexpected EAP-AKA subtype");
                Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS))
            }
        }
    }

    fn fetch_identity(&mut self, subscriber: &dyn SubscriberIdSource) -> Result<()> {
        if !self.identity.is_empty() {
            return Ok(());
        }
        let imsi = subscriber
            .subscriber_id()
            .ok_or_else(|| Error::Unavailable("subscriber identity".into()))?;
        let mut identity = vec![self.identity_prefix()];
        identity.extend_from_slice(imsi.as_bytes());
        self.identity = identity;
        Ok(())
    }

    fn process_identity(
        &mut self,
        type_data: &EapSimAkaTypeData,
        subscriber: &dyn SubscriberIdSource,
    ) -> Result<MethodOutcome> {
        if type_data.validate_pre_authenticated().is_err()
            || type_data.identity_request_count() > 1
        {
            return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS));
        }

        self.fetch_identity(subscriber)?;

        let mut attributes = Vec::new();
        if type_data.identity_request_count() == 1 {
            attributes.push(EapSimAkaAttribute::Identity(self.identity.clone()));
        }

        self.state = State::Identity;
        let response = EapSimAkaTypeData::new(SUBTYPE_AKA_IDENTITY, attributes);
        Ok(MethodOutcome::Response(response.encode()))
    }

    fn process_challenge(
        &mut self,
        message: &EapMessage,
        type_data: &EapSimAkaTypeData,
        sim: &mut dyn SimAuthenticator,
        subscriber: &dyn SubscriberIdSource,
    ) -> Result<MethodOutcome> {
        let rand = match type_data.find(attribute::AT_RAND) {
            Some(EapSimAkaAttribute::Rand(rands)) if rands.len() == 1 => rands[0],
            _ => return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS)),
        };
        let autn = match type_data.find(attribute::AT_AUTN) {
            Some(EapSimAkaAttribute::Autn(autn)) => *autn,
            _ => return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS)),
        };
        let received_mac = match type_data.find(attribute::AT_MAC) {
            Some(EapSimAkaAttribute::Mac(mac)) => *mac,
            _ => return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS)),
        };

        // EAP-AKA' binds the network name the server authenticated with
        let network_name = if let AkaMode::AkaPrime(config) = &self.mode {
            match (
                type_data.find(attribute::AT_KDF),
                type_data.find(attribute::AT_KDF_INPUT),
            ) {
                (
                    Some(EapSimAkaAttribute::Kdf(KDF_AKA_PRIME)),
                    Some(EapSimAkaAttribute::KdfInput(name)),
                ) => {
                    if name != config.network_name.as_bytes() {
                        self.state = State::Final;
                        self.pending = Some(PendingResult::Failure);
                        let response = EapSimAkaTypeData::new(
                            SUBTYPE_AKA_AUTHENTICATION_REJECT,
                            Vec::new(),
                        );
                        return Ok(MethodOutcome::Response(response.encode()));
                    }
                    Some(name.clone())
                }
                _ => return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS)),
            }
        } else {
            None
        };

        self.fetch_identity(subscriber)?;

        let (res, ck, ik) = match sim.authenticate(self.app_type(), &rand, Some(&autn)) {
            Ok(SimAuthResult::Umts { res, ck, ik }) => (res, ck, ik),
            Ok(SimAuthResult::SyncFailure { auts }) => {
                // Report AUTS and wait for a fresh challenge
                let auts: [u8; 14] = auts.try_into().map_err(|_| {
                    Error::Internal("SIM applet returned AUTS of wrong length".into())
                })?;
                let response = EapSimAkaTypeData::new(
                    SUBTYPE_AKA_SYNCHRONIZATION_FAILURE,
                    vec![EapSimAkaAttribute::Auts(auts)],
                );
                return Ok(MethodOutcome::Response(response.encode()));
            }
            Ok(SimAuthResult::Gsm { .. }) => {
                return Err(Error::Internal(
                    "SIM applet returned a GSM result for a UMTS challenge".into(),
                ))
            }
            Err(e) => return Err(Error::Unavailable(e.to_string())),
        };

        let keys = match network_name {
            Some(name) => keys::derive_aka_prime_keys(&self.identity, &ik, &ck, &name),
            None => keys::derive_aka_keys(&self.identity, &ik, &ck),
        };

        // MAC over the challenge request with a zeroed MAC field
        let request_packet = EapMessage {
            code: EapCode::Request,
            identifier: message.identifier,
            data: Some(super::message::EapData::new(
                self.method_type(),
                type_data.with_zeroed_mac().encode(),
            )),
        }
        .encode();

        if !keys::verify_mac(
            self.mac_algorithm(),
            &keys.k_aut,
            &request_packet,
            &[],
            &received_mac,
        ) {
            self.state = State::Final;
            self.pending = Some(PendingResult::Failure);
            return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS));
        }

        // Response: AKA-Challenge with AT_RES and AT_MAC over the response
        let unsealed = EapSimAkaTypeData::new(
            SUBTYPE_AKA_CHALLENGE,
            vec![
                EapSimAkaAttribute::Res(res.clone()),
                EapSimAkaAttribute::Mac([0u8; 16]),
            ],
        );
        let response_packet =
            EapMessage::response(message.identifier, self.method_type(), unsealed.encode())
                .encode();
        let mac = keys::compute_mac(
            self.mac_algorithm(),
            &keys.k_aut,
            &response_packet,
            &[],
        );

        let sealed = EapSimAkaTypeData::new(
            SUBTYPE_AKA_CHALLENGE,
            vec![EapSimAkaAttribute::Res(res), EapSimAkaAttribute::Mac(mac)],
        );

        self.challenge_done = true;
        self.state = State::Final;
        self.pending = Some(PendingResult::Success(keys));

        Ok(MethodOutcome::Response(sealed.encode()))
    }

    fn process_notification(
        &mut self,
        message: &EapMessage,
        type_data: &EapSimAkaTypeData,
    ) -> Result<MethodOutcome> {
        self.notification_count += 1;
        if self.notification_count > 1 {
            return Err(Error::InvalidRequest(
                "More than one EAP-AKA notification in a session".into(),
            ));
        }

        let code = match type_data.find(attribute::AT_NOTIFICATION) {
            Some(EapSimAkaAttribute::Notification(code)) => *code,
            _ => {
                return Err(Error::InvalidRequest(
                    "Notification without AT_NOTIFICATION".into(),
                ))
            }
        };

        let pre_challenge = EapSimAkaAttribute::notification_is_pre_challenge(code);
        if pre_challenge && self.challenge_done {
            return Err(Error::InvalidRequest(
                "Pre-challenge notification after challenge".into(),
            ));
        }
        if !pre_challenge && !self.challenge_done {
            return Err(Error::InvalidRequest(
                "Post-challenge notification before challenge".into(),
            ));
        }

        if !EapSimAkaAttribute::notification_is_success(code) {
            tracing::info!(code, "EAP-AKA failure notification");
        }

        let response = if self.challenge_done {
            match &self.pending {
                Some(PendingResult::Success(keys)) => {
                    let unsealed = EapSimAkaTypeData::new(
                        SUBTYPE_NOTIFICATION,
                        vec![EapSimAkaAttribute::Mac([0u8; 16])],
                    );
                    let packet = EapMessage::response(
                        message.identifier,
                        self.method_type(),
                        unsealed.encode(),
                    )
                    .encode();
                    let mac =
                        keys::compute_mac(self.mac_algorithm(), &keys.k_aut, &packet, &[]);
                    EapSimAkaTypeData::new(
                        SUBTYPE_NOTIFICATION,
                        vec![EapSimAkaAttribute::Mac(mac)],
                    )
                }
                _ => EapSimAkaTypeData::new(SUBTYPE_NOTIFICATION, Vec::new()),
            }
        } else {
            EapSimAkaTypeData::new(SUBTYPE_NOTIFICATION, Vec::new())
        };

        Ok(MethodOutcome::Response(response.encode()))
    }

    fn client_error(&self, code: u16) -> MethodOutcome {
        let response = EapSimAkaTypeData::new(
            SUBTYPE_CLIENT_ERROR,
            vec![EapSimAkaAttribute::ClientErrorCode(code)],
        );
        MethodOutcome::Response(response.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eap::message::EapData;
    use burrow_platform::SimAppType;

    const IMSI: &str = "123456789012345";

    struct FakeSubscriber;

    impl SubscriberIdSource for FakeSubscriber {
        fn subscriber_id(&self) -> Option<String> {
            Some(IMSI.to_string())
        }
    }

    enum UsimBehavior {
        Accept,
        SyncFailure,
    }

    struct FakeUsim {
        behavior: UsimBehavior,
    }

    impl SimAuthenticator for FakeUsim {
        fn authenticate(
            &mut self,
            _app: SimAppType,
            rand: &[u8],
            autn: Option<&[u8]>,
        ) -> burrow_platform::BurrowResult<SimAuthResult> {
            assert!(autn.is_some());
            match self.behavior {
                UsimBehavior::Accept => Ok(SimAuthResult::Umts {
                    res: rand[..8].to_vec(),
                    ck: rand.to_vec(),
                    ik: autn.unwrap().to_vec(),
                }),
                UsimBehavior::SyncFailure => Ok(SimAuthResult::SyncFailure {
                    auts: vec![0x77; 14],
                }),
            }
        }
    }

    fn aka_machine() -> EapAkaStateMachine {
        EapAkaStateMachine::new_aka(EapAkaConfig {
            sub_id: 1,
            app_type: SimAppType::Usim,
        })
    }

    fn prime_machine(network: &str) -> EapAkaStateMachine {
        EapAkaStateMachine::new_aka_prime(EapAkaPrimeConfig {
            sub_id: 1,
            app_type: SimAppType::Usim,
            network_name: network.to_string(),
        })
    }

    fn request(machine: &EapAkaStateMachine, identifier: u8, td: &EapSimAkaTypeData) -> EapMessage {
        EapMessage {
            code: EapCode::Request,
            identifier,
            data: Some(EapData::new(machine.method_type(), td.encode())),
        }
    }

    fn expected_identity(prefix: u8) -> Vec<u8> {
        std::iter::once(prefix).chain(IMSI.bytes()).collect()
    }

    fn sealed_challenge(
        machine: &EapAkaStateMachine,
        identifier: u8,
        extra_attrs: Vec<EapSimAkaAttribute>,
    ) -> EapMessage {
        let rand = [0x42u8; 16];
        let autn = [0x24u8; 16];

        // Mirror the keys the peer will derive from the fake card
        let ck = rand.to_vec();
        let ik = autn.to_vec();

        let identity = expected_identity(machine.identity_prefix());
        let keys = match &machine.mode {
            AkaMode::Aka(_) => keys::derive_aka_keys(&identity, &ik, &ck),
            AkaMode::AkaPrime(config) => keys::derive_aka_prime_keys(
                &identity,
                &ik,
                &ck,
                config.network_name.as_bytes(),
            ),
        };

        let mut attrs = vec![
            EapSimAkaAttribute::Rand(vec![rand]),
            EapSimAkaAttribute::Autn(autn),
        ];
        attrs.extend(extra_attrs);
        attrs.push(EapSimAkaAttribute::Mac([0u8; 16]));

        let unsealed = EapSimAkaTypeData::new(SUBTYPE_AKA_CHALLENGE, attrs.clone());
        let packet = EapMessage {
            code: EapCode::Request,
            identifier,
            data: Some(EapData::new(machine.method_type(), unsealed.encode())),
        }
        .encode();
        let mac = keys::compute_mac(machine.mac_algorithm(), &keys.k_aut, &packet, &[]);

        let last = attrs.len() - 1;
        attrs[last] = EapSimAkaAttribute::Mac(mac);
        request(
            machine,
            identifier,
            &EapSimAkaTypeData::new(SUBTYPE_AKA_CHALLENGE, attrs),
        )
    }

    #[test]
    fn test_identity_round() {
        let mut machine = aka_machine();
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let identity_req = request(
            &machine,
            1,
            &EapSimAkaTypeData::new(
                SUBTYPE_AKA_IDENTITY,
                vec![EapSimAkaAttribute::PermanentIdReq],
            ),
        );

        let outcome = machine
            .process(&identity_req, &mut usim, &FakeSubscriber)
            .unwrap();
        let response = match outcome {
            MethodOutcome::Response(bytes) => EapSimAkaTypeData::decode(&bytes).unwrap(),
            other => panic!("Expected response, got {:?}", other),
        };

        assert_eq!(response.subtype, SUBTYPE_AKA_IDENTITY);
        assert!(matches!(
            response.find(attribute::AT_IDENTITY),
            Some(EapSimAkaAttribute::Identity(id)) if id == &expected_identity(b'0')
        ));
        assert_eq!(machine.state, State::Identity);
    }

    #[test]
    fn test_full_aka_challenge_flow() {
        let mut machine = aka_machine();
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let challenge = sealed_challenge(&machine, 2, Vec::new());
        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();

        let response = match outcome {
            MethodOutcome::Response(bytes) => EapSimAkaTypeData::decode(&bytes).unwrap(),
            other => panic!("Expected response, got {:?}", other),
        };
        assert_eq!(response.subtype, SUBTYPE_AKA_CHALLENGE);
        assert!(response.contains(attribute::AT_RES));
        assert!(response.contains(attribute::AT_MAC));

        let success = EapMessage::new(EapCode::Success, 3, None).unwrap();
        match machine
            .process(&success, &mut usim, &FakeSubscriber)
            .unwrap()
        {
            MethodOutcome::Success { msk, emsk } => {
                assert_eq!(msk.len(), 64);
                assert_eq!(emsk.len(), 64);
            }
            other => panic!("Expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_sync_failure_keeps_awaiting_challenge() {
        let mut machine = aka_machine();
        let mut usim = FakeUsim {
            behavior: UsimBehavior::SyncFailure,
        };

        let challenge = sealed_challenge(&machine, 2, Vec::new());
        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();

        let response = match outcome {
            MethodOutcome::Response(bytes) => EapSimAkaTypeData::decode(&bytes).unwrap(),
            other => panic!("Expected response, got {:?}", other),
        };
        assert_eq!(response.subtype, SUBTYPE_AKA_SYNCHRONIZATION_FAILURE);
        assert!(matches!(
            response.find(attribute::AT_AUTS),
            Some(EapSimAkaAttribute::Auts(auts)) if auts == &[0x77; 14]
        ));
        assert_ne!(machine.state, State::Final);

        // A fresh challenge after resynchronization still succeeds
        usim.behavior = UsimBehavior::Accept;
        let challenge = sealed_challenge(&machine, 3, Vec::new());
        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();
        match outcome {
            MethodOutcome::Response(bytes) => {
                let td = EapSimAkaTypeData::decode(&bytes).unwrap();
                assert_eq!(td.subtype, SUBTYPE_AKA_CHALLENGE);
            }
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_challenge_bad_mac_fails() {
        let mut machine = aka_machine();
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let mut challenge = sealed_challenge(&machine, 2, Vec::new());
        if let Some(data) = &mut challenge.data {
            let last = data.type_data.len() - 1;
            data.type_data[last] ^= 0xFF;
        }

        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();
        match outcome {
            MethodOutcome::Response(bytes) => {
                let td = EapSimAkaTypeData::decode(&bytes).unwrap();
                assert_eq!(td.subtype, SUBTYPE_CLIENT_ERROR);
            }
            other => panic!("Expected client error, got {:?}", other),
        }
        assert_eq!(machine.state, State::Final);
    }

    #[test]
    fn test_challenge_missing_autn_rejected() {
        let mut machine = aka_machine();
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let td = EapSimAkaTypeData::new(
            SUBTYPE_AKA_CHALLENGE,
            vec![
                EapSimAkaAttribute::Rand(vec![[0x42; 16]]),
                EapSimAkaAttribute::Mac([0; 16]),
            ],
        );
        let challenge = request(&machine, 2, &td);

        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();
        match outcome {
            MethodOutcome::Response(bytes) => {
                let td = EapSimAkaTypeData::decode(&bytes).unwrap();
                assert_eq!(td.subtype, SUBTYPE_CLIENT_ERROR);
            }
            other => panic!("Expected client error, got {:?}", other),
        }
    }

    #[test]
    fn test_aka_prime_challenge_flow() {
        let mut machine = prime_machine("WLAN");
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let challenge = sealed_challenge(
            &machine,
            2,
            vec![
                EapSimAkaAttribute::Kdf(KDF_AKA_PRIME),
                EapSimAkaAttribute::KdfInput(b"WLAN".to_vec()),
            ],
        );

        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();
        match outcome {
            MethodOutcome::Response(bytes) => {
                let td = EapSimAkaTypeData::decode(&bytes).unwrap();
                assert_eq!(td.subtype, SUBTYPE_AKA_CHALLENGE);
            }
            other => panic!("Expected response, got {:?}", other),
        }
        assert_eq!(machine.method_type(), EAP_TYPE_AKA_PRIME);
    }

    #[test]
    fn test_aka_prime_wrong_network_rejected() {
        let mut machine = prime_machine("WLAN");
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let challenge = sealed_challenge(
            &machine,
            2,
            vec![
                EapSimAkaAttribute::Kdf(KDF_AKA_PRIME),
                EapSimAkaAttribute::KdfInput(b"EVIL".to_vec()),
            ],
        );

        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();
        match outcome {
            MethodOutcome::Response(bytes) => {
                let td = EapSimAkaTypeData::decode(&bytes).unwrap();
                assert_eq!(td.subtype, SUBTYPE_AKA_AUTHENTICATION_REJECT);
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
        assert_eq!(machine.state, State::Final);
    }

    #[test]
    fn test_aka_prime_missing_kdf_input_rejected() {
        let mut machine = prime_machine("WLAN");
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let challenge = sealed_challenge(&machine, 2, Vec::new());
        let outcome = machine
            .process(&challenge, &mut usim, &FakeSubscriber)
            .unwrap();
        match outcome {
            MethodOutcome::Response(bytes) => {
                let td = EapSimAkaTypeData::decode(&bytes).unwrap();
                assert_eq!(td.subtype, SUBTYPE_CLIENT_ERROR);
            }
            other => panic!("Expected client error, got {:?}", other),
        }
    }

    #[test]
    fn test_second_notification_rejected() {
        let mut machine = aka_machine();
        let mut usim = FakeUsim {
            behavior: UsimBehavior::Accept,
        };

        let notification = request(
            &machine,
            5,
            &EapSimAkaTypeData::new(
                SUBTYPE_NOTIFICATION,
                vec![EapSimAkaAttribute::Notification(
                    attribute::NOTIFICATION_GENERAL_FAILURE_PRE_CHALLENGE,
                )],
            ),
        );

        assert!(machine
            .process(&notification, &mut usim, &FakeSubscriber)
            .is_ok());
        assert!(matches!(
            machine.process(&notification, &mut usim, &FakeSubscriber),
            Err(Error::InvalidRequest(_))
        ));
    }
}
