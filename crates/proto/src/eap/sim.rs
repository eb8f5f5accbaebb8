//! EAP-SIM method state machine (RFC 4186)
//!
//! Peer-side flow:
//!
//! ```text
//! Created ──SIM/Start──▶ Start ──SIM/Challenge──▶ Final
//! ```
//!
//! The Start round advertises version 1 and the peer nonce, and answers
//! identity requests from the subscriber identity source (prefixed with
//! '1' per RFC 4186 Section 4.2.1.6). The Challenge round runs each RAND
//! through the SIM applet, derives the session keys, and verifies AT_MAC
//! before committing to success.

use super::message::{EapCode, EapMessage};
use super::simaka::attribute::{
    self, EapSimAkaAttribute, CLIENT_ERROR_INSUFFICIENT_CHALLENGES,
    CLIENT_ERROR_UNABLE_TO_PROCESS, CLIENT_ERROR_UNSUPPORTED_VERSION,
};
use super::simaka::keys::{self, EapSimAkaKeys, MacAlgorithm};
use super::simaka::typedata::{
    EapSimAkaTypeData, SUBTYPE_CLIENT_ERROR, SUBTYPE_NOTIFICATION, SUBTYPE_SIM_CHALLENGE,
    SUBTYPE_SIM_START,
};
use super::{EapSimConfig, MethodOutcome, EAP_TYPE_SIM};
use crate::ike::{Error, Result};
use burrow_platform::{SimAuthResult, SimAuthenticator, SubscriberIdSource};
use rand::RngCore;

/// Identity prefix for EAP-SIM permanent identities
const IDENTITY_PREFIX: u8 = b'1';

/// EAP-SIM supports exactly version 1
const SUPPORTED_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Start,
    Final,
}

#[derive(Debug)]
enum PendingResult {
    Success(EapSimAkaKeys),
    Failure,
}

/// EAP-SIM method state machine
#[derive(Debug)]
pub struct EapSimStateMachine {
    config: EapSimConfig,
    state: State,
    identity: Vec<u8>,
    nonce_mt: Option<[u8; 16]>,
    version_list: Vec<u16>,
    pending: Option<PendingResult>,
    notification_count: u8,
    challenge_done: bool,
}

impl EapSimStateMachine {
    /// Create a machine in the `Created` state.
    pub fn new(config: EapSimConfig) -> Self {
        EapSimStateMachine {
            config,
            state: State::Created,
            identity: Vec::new(),
            nonce_mt: None,
            version_list: Vec::new(),
            pending: None,
            notification_count: 0,
            challenge_done: false,
        }
    }

    /// The EAP method type this machine implements
    pub fn method_type(&self) -> u8 {
        EAP_TYPE_SIM
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
                    "EAP-Success before SIM challenge completion".into(),
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
        if data.type_code != EAP_TYPE_SIM {
            return Err(Error::InvalidRequest(format!(
                "Type {} routed to EAP-SIM method",
                data.type_code
            )));
        }

        let type_data = EapSimAkaTypeData::decode(&data.type_data)?;

        match type_data.subtype {
            SUBTYPE_NOTIFICATION => self.process_notification(message, &type_data),
            _ if self.state == State::Final => Err(Error::InvalidRequest(
                "EAP-SIM session already concluded".into(),
            )),
            SUBTYPE_SIM_START => self.process_start(&type_data, subscriber),
            SUBTYPE_SIM_CHALLENGE => self.process_challenge(message, &type_data, sim),
            other => {
                tracing::debug!(subtype = other, "Unexpected EAP-SIM subtype");
                Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS))
            }
        }
    }

    fn is_valid_start(&self, type_data: &EapSimAkaTypeData) -> bool {
        type_data.validate_pre_authenticated().is_ok()
            && type_data.contains(attribute::AT_VERSION_LIST)
            && type_data.identity_request_count() <= 1
    }

    fn process_start(
        &mut self,
        type_data: &EapSimAkaTypeData,
        subscriber: &dyn SubscriberIdSource,
    ) -> Result<MethodOutcome> {
        if self.state != State::Created && self.state != State::Start {
            return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS));
        }

        if !self.is_valid_start(type_data) {
            return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS));
        }

        let versions = match type_data.find(attribute::AT_VERSION_LIST) {
            Some(EapSimAkaAttribute::VersionList(versions)) => versions.clone(),
            _ => return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS)),
        };
        if !versions.contains(&SUPPORTED_VERSION) {
            return Ok(self.client_error(CLIENT_ERROR_UNSUPPORTED_VERSION));
        }

        // The permanent identity feeds the key derivation even when the
        // server did not ask for AT_IDENTITY
        let imsi = subscriber
            .subscriber_id()
            .ok_or_else(|| Error::Unavailable("subscriber identity".into()))?;
        let mut identity = vec![IDENTITY_PREFIX];
        identity.extend_from_slice(imsi.as_bytes());
        self.identity = identity;

        let nonce_mt = *self.nonce_mt.get_or_insert_with(|| {
            let mut nonce = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut nonce);
            nonce
        });
        self.version_list = versions;

        let mut attributes = vec![
            EapSimAkaAttribute::NonceMt(nonce_mt),
            EapSimAkaAttribute::SelectedVersion(SUPPORTED_VERSION),
        ];
        if type_data.identity_request_count() == 1 {
            attributes.push(EapSimAkaAttribute::Identity(self.identity.clone()));
        }

        self.state = State::Start;

        let response = EapSimAkaTypeData::new(SUBTYPE_SIM_START, attributes);
        Ok(MethodOutcome::Response(response.encode()))
    }

    fn process_challenge(
        &mut self,
        message: &EapMessage,
        type_data: &EapSimAkaTypeData,
        sim: &mut dyn SimAuthenticator,
    ) -> Result<MethodOutcome> {
        if self.state != State::Start {
            return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS));
        }

        let rands = match type_data.find(attribute::AT_RAND) {
            Some(EapSimAkaAttribute::Rand(rands)) => rands.clone(),
            _ => return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS)),
        };
        if rands.len() < 2 {
            return Ok(self.client_error(CLIENT_ERROR_INSUFFICIENT_CHALLENGES));
        }

        let received_mac = match type_data.find(attribute::AT_MAC) {
            Some(EapSimAkaAttribute::Mac(mac)) => *mac,
            _ => return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS)),
        };

        let nonce_mt = self
            .nonce_mt
            .ok_or_else(|| Error::Internal("NONCE_MT missing in Start state".into()))?;

        // Run every RAND through the card
        let mut kcs = Vec::with_capacity(rands.len());
        let mut sres_concat = Vec::new();
        for rand in &rands {
            match sim.authenticate(self.config.app_type, rand, None) {
                Ok(SimAuthResult::Gsm { sres, kc }) => {
                    sres_concat.extend_from_slice(&sres);
                    kcs.push(kc);
                }
                Ok(_) => {
                    return Err(Error::Internal(
                        "SIM applet returned a UMTS result for a GSM challenge".into(),
                    ))
                }
                Err(e) => return Err(Error::Unavailable(e.to_string())),
            }
        }

        let keys = keys::derive_sim_keys(
            &self.identity,
            &kcs,
            &nonce_mt,
            &self.version_list,
            SUPPORTED_VERSION,
        );

        // MAC over the challenge request with a zeroed MAC field, keyed on
        // K_aut, with NONCE_MT appended (RFC 4186 Section 9.3)
        let request_packet = EapMessage {
            code: EapCode::Request,
            identifier: message.identifier,
            data: Some(super::message::EapData::new(
                EAP_TYPE_SIM,
                type_data.with_zeroed_mac().encode(),
            )),
        }
        .encode();

        if !keys::verify_mac(
            MacAlgorithm::HmacSha1_128,
            &keys.k_aut,
            &request_packet,
            &nonce_mt,
            &received_mac,
        ) {
            self.state = State::Final;
            self.pending = Some(PendingResult::Failure);
            return Ok(self.client_error(CLIENT_ERROR_UNABLE_TO_PROCESS));
        }

        // Response: SIM/Challenge carrying AT_MAC over the response packet
        // with n*SRES appended (RFC 4186 Section 9.4)
        let response_type_data = EapSimAkaTypeData::new(
            SUBTYPE_SIM_CHALLENGE,
            vec![EapSimAkaAttribute::Mac([0u8; 16])],
        );
        let response_packet =
            EapMessage::response(message.identifier, EAP_TYPE_SIM, response_type_data.encode())
                .encode();
        let mac = keys::compute_mac(
            MacAlgorithm::HmacSha1_128,
            &keys.k_aut,
            &response_packet,
            &sres_concat,
        );

        let sealed = EapSimAkaTypeData::new(
            SUBTYPE_SIM_CHALLENGE,
            vec![EapSimAkaAttribute::Mac(mac)],
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
                "More than one EAP-SIM notification in a session".into(),
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
            tracing::info!(code, "EAP-SIM failure notification");
        }

        // Post-challenge notifications are MACed in both directions
        let response = if self.challenge_done {
            let keys = match &self.pending {
                Some(PendingResult::Success(keys)) => Some(keys),
                _ => None,
            };
            match keys {
                Some(keys) => {
                    let unsealed = EapSimAkaTypeData::new(
                        SUBTYPE_NOTIFICATION,
                        vec![EapSimAkaAttribute::Mac([0u8; 16])],
                    );
                    let packet = EapMessage::response(
                        message.identifier,
                        EAP_TYPE_SIM,
                        unsealed.encode(),
                    )
                    .encode();
                    let mac = keys::compute_mac(
                        MacAlgorithm::HmacSha1_128,
                        &keys.k_aut,
                        &packet,
                        &[],
                    );
                    EapSimAkaTypeData::new(
                        SUBTYPE_NOTIFICATION,
                        vec![EapSimAkaAttribute::Mac(mac)],
                    )
                }
                None => EapSimAkaTypeData::new(SUBTYPE_NOTIFICATION, Vec::new()),
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
